//! In-process repositories. These back the single-binary deployment and the
//! test-suite; every write goes through the same invariants the Postgres
//! adapters enforce in SQL.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use complyscan_model::{
    Finding, FindingFilter, FindingStatistics, Page, PageRequest, ScanId,
    ScanJob, ScanProgress, ScanResults, ScanStatus, Tenant, TenantId,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::database::cursor::ScanCursor;
use crate::database::ports::{
    FindingRepository, ScanJobRepository, TenantRepository, WriteSummary,
    reconcile_finding,
};
use crate::error::{Result, ScanError};
use crate::findings::finding_statistics;

#[derive(Clone, Default)]
pub struct InMemoryTenantRepository {
    tenants: Arc<RwLock<HashMap<TenantId, Tenant>>>,
}

impl fmt::Debug for InMemoryTenantRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.tenants.try_read().map(|t| t.len()).ok();
        f.debug_struct("InMemoryTenantRepository")
            .field("tenants", &count)
            .finish()
    }
}

impl InMemoryTenantRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenants(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        let map = tenants.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self {
            tenants: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn insert(&self, tenant: Tenant) {
        self.tenants.write().await.insert(tenant.id.clone(), tenant);
    }
}

#[async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn get_by_id(&self, tenant_id: &TenantId) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().await.get(tenant_id).cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryScanJobRepository {
    jobs: Arc<RwLock<HashMap<ScanId, ScanJob>>>,
}

impl fmt::Debug for InMemoryScanJobRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.jobs.try_read().map(|j| j.len()).ok();
        f.debug_struct("InMemoryScanJobRepository")
            .field("jobs", &count)
            .finish()
    }
}

impl InMemoryScanJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(id: ScanId) -> ScanError {
    ScanError::NotFound(format!("scan job {id}"))
}

#[async_trait]
impl ScanJobRepository for InMemoryScanJobRepository {
    async fn create(&self, job: ScanJob) -> Result<ScanJob> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(ScanError::Conflict(format!(
                "scan job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update_status(
        &self,
        id: ScanId,
        status: ScanStatus,
        progress: Option<ScanProgress>,
    ) -> Result<ScanJob> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| missing(id))?;
        // Progress first: once the transition lands the job may be terminal
        // and would refuse the checkpoint.
        let mut staged = job.clone();
        if let Some(progress) = progress {
            staged.record_progress(progress);
        }
        staged.transition(status)?;
        *job = staged;
        Ok(job.clone())
    }

    async fn update_progress(
        &self,
        id: ScanId,
        progress: ScanProgress,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| missing(id))?;
        let applied = job.record_progress(progress);
        if !applied {
            debug!(
                target: "scan::store",
                scan = %id,
                stage = %progress.stage,
                status = %job.status,
                "progress write ignored"
            );
        }
        Ok(applied)
    }

    async fn update_results(
        &self,
        id: ScanId,
        results: ScanResults,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| missing(id))?;
        if job.status.is_terminal() {
            return Err(ScanError::Conflict(format!(
                "scan job {id} is already {}",
                job.status
            )));
        }
        job.results = Some(results);
        job.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn get_by_id(&self, id: ScanId) -> Result<Option<ScanJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
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

        let jobs = self.jobs.read().await;
        let mut owned: Vec<&ScanJob> = jobs
            .values()
            .filter(|job| &job.tenant_id == tenant_id)
            .filter(|job| cursor.is_none_or(|c| c.precedes(job)))
            .collect();
        owned.sort_by(|a, b| {
            (b.started_at, b.id).cmp(&(a.started_at, a.id))
        });

        let has_more = owned.len() > limit;
        let items: Vec<ScanJob> =
            owned.into_iter().take(limit).cloned().collect();
        let token = match (has_more, items.last()) {
            (true, Some(last)) => Some(ScanCursor::after(last).encode()?),
            _ => None,
        };
        Ok(Page::new(items, token))
    }
}

/// Finding store keyed by `(tenant, hash)`.
#[derive(Clone, Default)]
pub struct InMemoryFindingRepository {
    findings: Arc<RwLock<HashMap<(TenantId, String), Finding>>>,
}

impl fmt::Debug for InMemoryFindingRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.findings.try_read().map(|m| m.len()).ok();
        f.debug_struct("InMemoryFindingRepository")
            .field("findings", &count)
            .finish()
    }
}

impl InMemoryFindingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FindingRepository for InMemoryFindingRepository {
    async fn batch_write(&self, findings: Vec<Finding>) -> Result<WriteSummary> {
        let mut store = self.findings.write().await;
        let mut summary = WriteSummary::default();
        for finding in findings {
            let key = (finding.tenant_id.clone(), finding.hash.clone());
            let merged = match store.get(&key) {
                Some(existing) => {
                    summary.updated += 1;
                    reconcile_finding(existing, finding)
                }
                None => {
                    summary.created += 1;
                    finding
                }
            };
            store.insert(key, merged);
        }
        Ok(summary)
    }

    async fn get_findings_by_tenant(
        &self,
        tenant_id: &TenantId,
        filter: &FindingFilter,
    ) -> Result<Vec<Finding>> {
        let store = self.findings.read().await;
        let mut matched: Vec<Finding> = store
            .values()
            .filter(|f| &f.tenant_id == tenant_id && filter.matches(f))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
                .then_with(|| a.hash.cmp(&b.hash))
        });
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn get_finding_statistics(
        &self,
        tenant_id: &TenantId,
    ) -> Result<FindingStatistics> {
        let store = self.findings.read().await;
        let owned: Vec<Finding> = store
            .values()
            .filter(|f| &f.tenant_id == tenant_id)
            .cloned()
            .collect();
        Ok(finding_statistics(&owned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use complyscan_model::{
        FindingId, FindingStatus, Framework, ScanSettings, ScanStage,
        ScanType, Severity,
    };

    fn job(tenant: &str, started_offset_secs: i64) -> ScanJob {
        let started = Utc::now() - Duration::seconds(started_offset_secs);
        ScanJob {
            id: ScanId::new(),
            tenant_id: TenantId::new(tenant),
            scan_type: ScanType::Full,
            status: ScanStatus::Initializing,
            account_id: "111122223333".into(),
            regions: vec!["us-east-1".into()],
            services: vec![],
            frameworks: vec![Framework::Soc2],
            progress: ScanProgress::default(),
            started_at: started,
            updated_at: started,
            completed_at: None,
            results: None,
            settings: ScanSettings::default(),
            requested_by: "tester".into(),
            request_id: None,
        }
    }

    fn finding(tenant: &str, hash: &str, severity: Severity) -> Finding {
        let now = Utc::now();
        Finding {
            id: FindingId::from_hash(hash),
            tenant_id: TenantId::new(tenant),
            scan_id: ScanId::new(),
            rule_id: "rule".into(),
            resource_identifier: format!("arn:{hash}"),
            resource_type: "AWS::EC2::Instance".into(),
            service: "ec2".into(),
            region: "us-east-1".into(),
            account_id: "1".into(),
            severity,
            framework: Framework::Soc2,
            status: FindingStatus::Open,
            hash: hash.into(),
            title: None,
            recommendation: None,
            first_seen: now,
            last_seen: now,
            count: 1,
            tags: vec![],
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn terminal_jobs_reject_late_writes() -> Result<()> {
        let repo = InMemoryScanJobRepository::new();
        let job = repo.create(job("t", 0)).await?;

        repo.update_status(job.id, ScanStatus::Cancelled, None).await?;

        let progress = repo
            .update_progress(job.id, ScanProgress::at(ScanStage::Finalizing))
            .await?;
        assert!(!progress);

        let status = repo
            .update_status(job.id, ScanStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(status.is_conflict());

        let results = repo
            .update_results(job.id, ScanResults::error("late"))
            .await
            .unwrap_err();
        assert!(results.is_conflict());

        let stored = repo.get_by_id(job.id).await?.unwrap();
        assert_eq!(stored.status, ScanStatus::Cancelled);
        assert!(stored.results.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn status_update_records_final_progress() -> Result<()> {
        let repo = InMemoryScanJobRepository::new();
        let job = repo.create(job("t", 0)).await?;
        repo.update_status(job.id, ScanStatus::InProgress, None).await?;
        let done = repo
            .update_status(
                job.id,
                ScanStatus::Completed,
                Some(ScanProgress::at(ScanStage::Done)),
            )
            .await?;
        assert_eq!(done.progress.percentage, 100.0);
        assert!(done.completed_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn listing_is_tenant_scoped_and_paginated() -> Result<()> {
        let repo = InMemoryScanJobRepository::new();
        for offset in 0..5 {
            repo.create(job("acme", offset * 10)).await?;
        }
        repo.create(job("other", 0)).await?;

        let tenant = TenantId::new("acme");
        let first = repo
            .get_scan_jobs_by_tenant(&tenant, &PageRequest::first(2))
            .await?;
        assert_eq!(first.items.len(), 2);
        let token = first.continuation_token.clone().expect("more pages");

        let second = repo
            .get_scan_jobs_by_tenant(&tenant, &PageRequest::after(2, token))
            .await?;
        let third = repo
            .get_scan_jobs_by_tenant(
                &tenant,
                &PageRequest::after(2, second.continuation_token.unwrap()),
            )
            .await?;
        assert_eq!(third.items.len(), 1);
        assert!(third.continuation_token.is_none());

        let mut seen: Vec<ScanId> = first
            .items
            .iter()
            .chain(&second.items)
            .chain(&third.items)
            .map(|j| j.id)
            .collect();
        assert!(
            first.items[0].started_at >= first.items[1].started_at,
            "newest first"
        );
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn batch_write_reconciles_by_hash() -> Result<()> {
        let repo = InMemoryFindingRepository::new();
        let first = repo
            .batch_write(vec![
                finding("t", "h1", Severity::High),
                finding("t", "h2", Severity::Low),
            ])
            .await?;
        assert_eq!(first, WriteSummary { created: 2, updated: 0 });

        let again = repo
            .batch_write(vec![finding("t", "h1", Severity::High)])
            .await?;
        assert_eq!(again, WriteSummary { created: 0, updated: 1 });

        // Same hash under another tenant is a different finding.
        let foreign = repo
            .batch_write(vec![finding("u", "h1", Severity::High)])
            .await?;
        assert_eq!(foreign.created, 1);

        let tenant = TenantId::new("t");
        let high = repo
            .get_findings_by_tenant(
                &tenant,
                &FindingFilter {
                    severity: Some(Severity::High),
                    ..FindingFilter::default()
                },
            )
            .await?;
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].count, 2);

        let stats = repo.get_finding_statistics(&tenant).await?;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.open, 2);
        Ok(())
    }
}
