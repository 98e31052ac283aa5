//! Configuration for Complyscan.
//!
//! Loads [`ComplyscanConfig`] from a file, inline JSON or defaults, installs
//! the tracing subscriber and wires a
//! [`ScanOrchestrator`](complyscan_core::ScanOrchestrator) from the result.
//! The `complyscan` binary is a thin CLI over these pieces.

#![allow(missing_docs)]

pub mod assemble;
pub mod loader;
pub mod models;
pub mod telemetry;

pub use assemble::{build_orchestrator, cloud_from_config, evaluator_from_config};
pub use loader::{CONFIG_JSON_VAR, CONFIG_PATH_VAR, DATABASE_URL_VAR};
pub use models::{
    CloudConfig, ComplyscanConfig, ConfigSource, DatabaseConfig,
    EvaluatorConfig,
};
pub use telemetry::init_tracing;
