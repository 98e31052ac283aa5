pub mod memory;
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres;

pub use memory::{
    InMemoryFindingRepository, InMemoryScanJobRepository,
    InMemoryTenantRepository,
};
#[cfg(feature = "postgres")]
pub use postgres::{
    PostgresFindingRepository, PostgresScanJobRepository,
    PostgresTenantRepository,
};
