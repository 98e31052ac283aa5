use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use complyscan_model::{
    Finding, FindingFilter, FindingId, FindingStatistics, FindingStatus,
    Framework, ScanId, Severity, TenantId,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use crate::database::ports::{FindingRepository, WriteSummary};
use crate::error::{Result, ScanError};

#[derive(Clone)]
pub struct PostgresFindingRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresFindingRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresFindingRepository")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresFindingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FindingRow {
    id: Uuid,
    tenant_id: String,
    hash: String,
    scan_id: Uuid,
    rule_id: String,
    resource_identifier: String,
    resource_type: String,
    service: String,
    region: String,
    account_id: String,
    severity: String,
    framework: String,
    status: String,
    title: Option<String>,
    recommendation: Option<String>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    count: i32,
    tags: Vec<String>,
    metadata: Json<serde_json::Value>,
}

fn corrupt(column: &str, err: impl fmt::Display) -> ScanError {
    ScanError::Storage(format!("corrupt finding {column}: {err}"))
}

impl TryFrom<FindingRow> for Finding {
    type Error = ScanError;

    fn try_from(row: FindingRow) -> Result<Self> {
        Ok(Finding {
            id: FindingId(row.id),
            tenant_id: TenantId(row.tenant_id),
            scan_id: ScanId(row.scan_id),
            rule_id: row.rule_id,
            resource_identifier: row.resource_identifier,
            resource_type: row.resource_type,
            service: row.service,
            region: row.region,
            account_id: row.account_id,
            severity: row
                .severity
                .parse::<Severity>()
                .map_err(|e| corrupt("severity", e))?,
            framework: row
                .framework
                .parse::<Framework>()
                .map_err(|e| corrupt("framework", e))?,
            status: row
                .status
                .parse::<FindingStatus>()
                .map_err(|e| corrupt("status", e))?,
            hash: row.hash,
            title: row.title,
            recommendation: row.recommendation,
            first_seen: row.first_seen,
            last_seen: row.last_seen,
            count: u32::try_from(row.count).unwrap_or(0),
            tags: row.tags,
            metadata: row.metadata.0,
        })
    }
}

// Conflicting rows keep id, first_seen and a suppressed status; count grows
// by one and last_seen only moves forward.
const UPSERT: &str = r#"
    INSERT INTO findings (
        id, tenant_id, hash, scan_id, rule_id, resource_identifier,
        resource_type, service, region, account_id, severity, framework,
        status, title, recommendation, first_seen, last_seen, count, tags,
        metadata
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
            $16, $17, $18, $19, $20)
    ON CONFLICT (tenant_id, hash) DO UPDATE SET
        scan_id = EXCLUDED.scan_id,
        rule_id = EXCLUDED.rule_id,
        resource_identifier = EXCLUDED.resource_identifier,
        resource_type = EXCLUDED.resource_type,
        service = EXCLUDED.service,
        region = EXCLUDED.region,
        account_id = EXCLUDED.account_id,
        severity = EXCLUDED.severity,
        framework = EXCLUDED.framework,
        status = CASE WHEN findings.status = 'suppressed'
                      THEN 'suppressed' ELSE 'open' END,
        title = EXCLUDED.title,
        recommendation = EXCLUDED.recommendation,
        first_seen = LEAST(findings.first_seen, EXCLUDED.first_seen),
        last_seen = GREATEST(findings.last_seen, EXCLUDED.last_seen),
        count = findings.count + 1,
        tags = EXCLUDED.tags,
        metadata = EXCLUDED.metadata
    RETURNING (xmax = 0) AS inserted
"#;

const SEVERITY_RANK: &str = "CASE severity WHEN 'critical' THEN 0 \
     WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END";

#[async_trait]
impl FindingRepository for PostgresFindingRepository {
    async fn batch_write(&self, findings: Vec<Finding>) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();
        if findings.is_empty() {
            return Ok(summary);
        }

        let mut tx = self.pool.begin().await?;
        for finding in &findings {
            let inserted: bool = sqlx::query_scalar(UPSERT)
                .bind(finding.id.0)
                .bind(finding.tenant_id.as_str())
                .bind(&finding.hash)
                .bind(finding.scan_id.to_uuid())
                .bind(&finding.rule_id)
                .bind(&finding.resource_identifier)
                .bind(&finding.resource_type)
                .bind(&finding.service)
                .bind(&finding.region)
                .bind(&finding.account_id)
                .bind(finding.severity.as_str())
                .bind(finding.framework.as_str())
                .bind(finding.status.as_str())
                .bind(&finding.title)
                .bind(&finding.recommendation)
                .bind(finding.first_seen)
                .bind(finding.last_seen)
                .bind(i32::try_from(finding.count).unwrap_or(i32::MAX))
                .bind(&finding.tags)
                .bind(Json(&finding.metadata))
                .fetch_one(&mut *tx)
                .await?;
            if inserted {
                summary.created += 1;
            } else {
                summary.updated += 1;
            }
        }
        tx.commit().await?;

        debug!(
            target: "scan::store",
            created = summary.created,
            updated = summary.updated,
            "findings written"
        );
        Ok(summary)
    }

    async fn get_findings_by_tenant(
        &self,
        tenant_id: &TenantId,
        filter: &FindingFilter,
    ) -> Result<Vec<Finding>> {
        let mut query: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT id, tenant_id, hash, scan_id, rule_id, resource_identifier, \
             resource_type, service, region, account_id, severity, framework, \
             status, title, recommendation, first_seen, last_seen, count, \
             tags, metadata FROM findings WHERE tenant_id = ",
        );
        query.push_bind(tenant_id.as_str());
        if let Some(severity) = filter.severity {
            query.push(" AND severity = ").push_bind(severity.as_str());
        }
        if let Some(framework) = filter.framework {
            query.push(" AND framework = ").push_bind(framework.as_str());
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(service) = &filter.service {
            query.push(" AND service = ").push_bind(service.clone());
        }
        if let Some(region) = &filter.region {
            query.push(" AND region = ").push_bind(region.clone());
        }
        if let Some(scan_id) = filter.scan_id {
            query.push(" AND scan_id = ").push_bind(scan_id.to_uuid());
        }
        query.push(format!(" ORDER BY {SEVERITY_RANK}, last_seen DESC, hash"));
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows: Vec<FindingRow> =
            query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Finding::try_from).collect()
    }

    async fn get_finding_statistics(
        &self,
        tenant_id: &TenantId,
    ) -> Result<FindingStatistics> {
        let rows: Vec<(String, String, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT status, severity, framework, service, COUNT(*)
            FROM findings
            WHERE tenant_id = $1
            GROUP BY status, severity, framework, service
            "#,
        )
        .bind(tenant_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut stats = FindingStatistics::default();
        let mut by_service: BTreeMap<String, usize> = BTreeMap::new();
        for (status, severity, framework, service, count) in rows {
            let count = usize::try_from(count).unwrap_or(0);
            stats.total += count;
            match status
                .parse::<FindingStatus>()
                .map_err(|e| corrupt("status", e))?
            {
                FindingStatus::Open => stats.open += count,
                FindingStatus::Resolved => stats.resolved += count,
                FindingStatus::Suppressed => stats.suppressed += count,
            }
            let severity = severity
                .parse::<Severity>()
                .map_err(|e| corrupt("severity", e))?;
            *stats.by_severity.entry(severity).or_default() += count;
            let framework = framework
                .parse::<Framework>()
                .map_err(|e| corrupt("framework", e))?;
            *stats.by_framework.entry(framework).or_default() += count;
            *by_service.entry(service).or_default() += count;
        }
        stats.by_service = by_service;
        Ok(stats)
    }
}
