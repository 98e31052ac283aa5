//! Persistence layer: repository ports and their adapters.

pub mod cursor;
pub mod infrastructure;
pub mod ports;

pub use cursor::ScanCursor;
pub use ports::{
    FindingRepository, ScanJobRepository, TenantRepository, WriteSummary,
};
