//! Core data model definitions shared across Complyscan crates.
#![allow(missing_docs)]

pub mod error;
pub mod finding;
pub mod ids;
pub mod page;
pub mod resource;
pub mod scan;
pub mod tenant;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use finding::{
    EvaluationContext, Finding, FindingFilter, FindingStatistics,
    FindingStatus, Framework, RuleResult, Severity,
};
pub use ids::{FindingId, ScanId, TenantId};
pub use page::{Page, PageRequest};
pub use resource::CloudResource;
pub use scan::{
    CoverageGap, ScanJob, ScanProgress, ScanResults, ScanResultsView,
    ScanSettings, ScanStage, ScanStatus, ScanStatusView, ScanSummary,
    ScanType, StartScanRequest, StartScanResponse,
};
pub use tenant::Tenant;
