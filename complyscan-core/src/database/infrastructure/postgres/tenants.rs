use async_trait::async_trait;
use complyscan_model::{Tenant, TenantId};
use sqlx::PgPool;

use crate::database::ports::TenantRepository;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct PostgresTenantRepository {
    pool: PgPool,
}

impl PostgresTenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    name: String,
    active: bool,
    default_account_id: Option<String>,
    default_regions: Vec<String>,
}

#[async_trait]
impl TenantRepository for PostgresTenantRepository {
    async fn get_by_id(&self, tenant_id: &TenantId) -> Result<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(
            r#"
            SELECT id, name, active, default_account_id, default_regions
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(tenant_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Tenant {
            id: TenantId(row.id),
            name: row.name,
            active: row.active,
            default_account_id: row.default_account_id,
            default_regions: row.default_regions,
        }))
    }
}
