//! Findings engine: turns failing rule results into identity-hashed findings
//! and reduces them into the per-scan and per-tenant aggregates.

pub mod grouping;
pub mod hash;
pub mod processor;

pub use grouping::{
    count_by_framework, count_by_region, count_by_resource_type,
    count_by_service, count_by_severity, finding_statistics,
    group_findings_by_framework, group_findings_by_region,
    group_findings_by_resource_type, group_findings_by_service,
    group_findings_by_severity,
};
pub use hash::finding_hash;
pub use processor::{ArnParts, ResultProcessor, normalize_framework, normalize_severity};
