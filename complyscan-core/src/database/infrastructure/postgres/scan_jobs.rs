use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use complyscan_model::{
    Page, PageRequest, ScanId, ScanJob, ScanProgress, ScanResults,
    ScanSettings, ScanStatus, ScanType, TenantId,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{TERMINAL_STATUSES, decode_frameworks, encode_frameworks};
use crate::database::cursor::ScanCursor;
use crate::database::ports::ScanJobRepository;
use crate::error::{Result, ScanError};

#[derive(Clone)]
pub struct PostgresScanJobRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresScanJobRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresScanJobRepository")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

#[derive(sqlx::FromRow)]
struct ScanJobRow {
    id: Uuid,
    tenant_id: String,
    scan_type: String,
    status: String,
    account_id: String,
    regions: Vec<String>,
    services: Vec<String>,
    frameworks: Vec<String>,
    progress: Json<ScanProgress>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    results: Option<Json<ScanResults>>,
    settings: Json<ScanSettings>,
    requested_by: String,
    request_id: Option<String>,
}

impl TryFrom<ScanJobRow> for ScanJob {
    type Error = ScanError;

    fn try_from(row: ScanJobRow) -> Result<Self> {
        Ok(ScanJob {
            id: ScanId(row.id),
            tenant_id: TenantId(row.tenant_id),
            scan_type: row.scan_type.parse::<ScanType>()?,
            status: row.status.parse::<ScanStatus>()?,
            account_id: row.account_id,
            regions: row.regions,
            services: row.services,
            frameworks: decode_frameworks(&row.frameworks)?,
            progress: row.progress.0,
            started_at: row.started_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            results: row.results.map(|r| r.0),
            settings: row.settings.0,
            requested_by: row.requested_by,
            request_id: row.request_id,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, tenant_id, scan_type, status, account_id, regions, services,
           frameworks, progress, started_at, updated_at, completed_at,
           results, settings, requested_by, request_id
    FROM scan_jobs
"#;

impl PostgresScanJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_job(
        tx: &mut Transaction<'_, Postgres>,
        id: ScanId,
    ) -> Result<ScanJob> {
        let row: Option<ScanJobRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = $1 FOR UPDATE"))
                .bind(id.to_uuid())
                .fetch_optional(&mut **tx)
                .await?;
        row.ok_or_else(|| ScanError::NotFound(format!("scan job {id}")))?
            .try_into()
    }

    async fn exists(&self, id: ScanId) -> Result<Option<ScanStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM scan_jobs WHERE id = $1")
                .bind(id.to_uuid())
                .fetch_optional(&self.pool)
                .await?;
        status
            .map(|s| s.parse::<ScanStatus>().map_err(ScanError::from))
            .transpose()
    }
}

#[async_trait]
impl ScanJobRepository for PostgresScanJobRepository {
    async fn create(&self, job: ScanJob) -> Result<ScanJob> {
        let result = sqlx::query(
            r#"
            INSERT INTO scan_jobs (
                id, tenant_id, scan_type, status, account_id, regions,
                services, frameworks, stage_ordinal, progress, started_at,
                updated_at, completed_at, results, settings, requested_by,
                request_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id.to_uuid())
        .bind(job.tenant_id.as_str())
        .bind(job.scan_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.account_id)
        .bind(&job.regions)
        .bind(&job.services)
        .bind(encode_frameworks(&job.frameworks))
        .bind(job.progress.stage.ordinal() as i32)
        .bind(Json(&job.progress))
        .bind(job.started_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .bind(job.results.as_ref().map(Json))
        .bind(Json(&job.settings))
        .bind(&job.requested_by)
        .bind(&job.request_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScanError::Conflict(format!(
                "scan job {} already exists",
                job.id
            )));
        }
        Ok(job)
    }

    async fn update_status(
        &self,
        id: ScanId,
        status: ScanStatus,
        progress: Option<ScanProgress>,
    ) -> Result<ScanJob> {
        let mut tx = self.pool.begin().await?;
        let mut job = Self::lock_job(&mut tx, id).await?;
        if let Some(progress) = progress {
            job.record_progress(progress);
        }
        job.transition(status)?;

        sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = $2, progress = $3, stage_ordinal = $4,
                updated_at = $5, completed_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id.to_uuid())
        .bind(job.status.as_str())
        .bind(Json(&job.progress))
        .bind(job.progress.stage.ordinal() as i32)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn update_progress(
        &self,
        id: ScanId,
        progress: ScanProgress,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET progress = $2, stage_ordinal = $3, updated_at = NOW()
            WHERE id = $1
              AND stage_ordinal <= $3
              AND status <> ALL($4)
            "#,
        )
        .bind(id.to_uuid())
        .bind(Json(&progress))
        .bind(progress.stage.ordinal() as i32)
        .bind(&TERMINAL_STATUSES[..])
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.exists(id).await? {
            Some(status) => {
                debug!(
                    target: "scan::store",
                    scan = %id,
                    stage = %progress.stage,
                    %status,
                    "progress write ignored"
                );
                Ok(false)
            }
            None => Err(ScanError::NotFound(format!("scan job {id}"))),
        }
    }

    async fn update_results(
        &self,
        id: ScanId,
        results: ScanResults,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET results = $2, updated_at = NOW()
            WHERE id = $1 AND status <> ALL($3)
            "#,
        )
        .bind(id.to_uuid())
        .bind(Json(&results))
        .bind(&TERMINAL_STATUSES[..])
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        match self.exists(id).await? {
            Some(status) => Err(ScanError::Conflict(format!(
                "scan job {id} is already {status}"
            ))),
            None => Err(ScanError::NotFound(format!("scan job {id}"))),
        }
    }

    async fn get_by_id(&self, id: ScanId) -> Result<Option<ScanJob>> {
        let row: Option<ScanJobRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = $1"))
                .bind(id.to_uuid())
                .fetch_optional(&self.pool)
                .await?;
        row.map(ScanJob::try_from).transpose()
    }

    async fn get_scan_jobs_by_tenant(
        &self,
        tenant_id: &TenantId,
        page: &PageRequest,
    ) -> Result<Page<ScanJob>> {
        let cursor = page
            .continuation_token
            .as_deref()
            .map(ScanCursor::decode)
            .transpose()?;
        let limit = page.effective_limit();

        // Fetch one extra row to learn whether another page exists.
        let rows: Vec<ScanJobRow> = match cursor {
            Some(cursor) => {
                sqlx::query_as(&format!(
                    "{SELECT_COLUMNS} WHERE tenant_id = $1 \
                     AND (started_at, id) < ($2, $3) \
                     ORDER BY started_at DESC, id DESC LIMIT $4"
                ))
                .bind(tenant_id.as_str())
                .bind(cursor.started_at)
                .bind(cursor.id.to_uuid())
                .bind((limit + 1) as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "{SELECT_COLUMNS} WHERE tenant_id = $1 \
                     ORDER BY started_at DESC, id DESC LIMIT $2"
                ))
                .bind(tenant_id.as_str())
                .bind((limit + 1) as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let has_more = rows.len() > limit;
        let items = rows
            .into_iter()
            .take(limit)
            .map(ScanJob::try_from)
            .collect::<Result<Vec<_>>>()?;
        let token = match (has_more, items.last()) {
            (true, Some(last)) => Some(ScanCursor::after(last).encode()?),
            _ => None,
        };
        Ok(Page::new(items, token))
    }
}
