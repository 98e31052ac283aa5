//! Repository ports (interfaces) consumed by the scan engine.
//!
//! Implementations live under `database::infrastructure` and must not leak
//! storage types into the orchestration layer.

pub mod findings;
pub mod scan_jobs;
pub mod tenants;

pub use findings::{FindingRepository, WriteSummary, reconcile_finding};
pub use scan_jobs::ScanJobRepository;
pub use tenants::TenantRepository;
