//! # Complyscan Core
//!
//! Scan orchestration and findings engine for cloud compliance scanning.
//!
//! ## Overview
//!
//! - **Orchestration**: scan lifecycle state machine, supervised worker pool,
//!   cooperative cancellation and lifecycle events
//! - **Discovery**: per-region, per-service resource collectors with failure
//!   isolation, backed by a pluggable cloud client
//! - **Evaluation**: pluggable [`evaluator::RuleEvaluator`] port with
//!   subprocess and HTTP adapters
//! - **Findings**: stable identity hashing, severity and framework
//!   normalisation, grouping and statistics
//! - **Scoring**: severity-weighted compliance score
//! - **Database**: repository ports with in-memory and Postgres adapters
//!
//! ## Feature Flags
//!
//! - `postgres` (default): Postgres-backed repositories and embedded
//!   migrations
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use complyscan_core::{
//!     CommandRuleEvaluator, FixtureCloud, OrchestratorConfig, ScanOrchestrator,
//! };
//! use complyscan_model::{ScanType, StartScanRequest, TenantId};
//!
//! async fn scan_once() -> complyscan_core::Result<()> {
//!     let orchestrator = ScanOrchestrator::builder(OrchestratorConfig::default())
//!         .with_cloud(Arc::new(FixtureCloud::from_path("inventory.json")?))
//!         .with_evaluator(Arc::new(CommandRuleEvaluator::new("rules-engine", Vec::new())))
//!         .build()?;
//!
//!     let request = StartScanRequest {
//!         tenant_id: TenantId::new("acme"),
//!         account_id: Some("123456789012".to_string()),
//!         scan_type: ScanType::Full,
//!         regions: vec!["us-east-1".to_string()],
//!         services: Vec::new(),
//!         frameworks: Vec::new(),
//!         settings: Default::default(),
//!         requested_by: "ops@acme.test".to_string(),
//!     };
//!     let started = orchestrator.start_scan(request, None).await?;
//!     let done = orchestrator
//!         .wait_for_terminal(&TenantId::new("acme"), started.scan_id)
//!         .await?;
//!     println!("{} finished as {}", done.scan_id, done.status);
//!     orchestrator.shutdown().await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod config;
pub mod database;
pub mod discovery;
pub mod error;
pub mod evaluator;
pub mod findings;
pub mod orchestration;
pub mod scoring;

pub use config::{EstimateConfig, OrchestratorConfig};
pub use database::{
    FindingRepository, ScanCursor, ScanJobRepository, TenantRepository,
    WriteSummary,
};
pub use discovery::{
    CloudClient, CloudClientFactory, CollectorRegistry, DiscoveryOutcome,
    FixtureCloud, FixtureInventory, GatewayClientFactory, ResourceCollector,
    ResourceDiscovery,
};
pub use error::{Result, ScanError};
pub use evaluator::{CommandRuleEvaluator, HttpRuleEvaluator, RuleEvaluator};
pub use findings::{ResultProcessor, finding_hash};
pub use orchestration::{
    ScanEvent, ScanEventBus, ScanOrchestrator, ScanOrchestratorBuilder,
};
pub use scoring::compliance_score;

/// Embedded migrations for the Postgres adapters.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
