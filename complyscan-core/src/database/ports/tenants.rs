use async_trait::async_trait;
use complyscan_model::{Tenant, TenantId};

use crate::error::Result;

/// Read-only view of the tenant service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn get_by_id(&self, tenant_id: &TenantId) -> Result<Option<Tenant>>;
}
