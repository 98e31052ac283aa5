//! Postgres adapters for the repository ports.

mod findings;
mod scan_jobs;
mod tenants;

pub use findings::PostgresFindingRepository;
pub use scan_jobs::PostgresScanJobRepository;
pub use tenants::PostgresTenantRepository;

use complyscan_model::{Framework, ModelError};

use crate::error::{Result, ScanError};

pub(crate) const TERMINAL_STATUSES: [&str; 3] =
    ["completed", "failed", "cancelled"];

pub(crate) fn encode_frameworks(frameworks: &[Framework]) -> Vec<String> {
    frameworks.iter().map(|f| f.as_str().to_string()).collect()
}

pub(crate) fn decode_frameworks(raw: &[String]) -> Result<Vec<Framework>> {
    raw.iter()
        .map(|s| s.parse::<Framework>())
        .collect::<std::result::Result<Vec<_>, ModelError>>()
        .map_err(|e| ScanError::Storage(format!("corrupt framework: {e}")))
}
