use async_trait::async_trait;
use complyscan_model::{
    Page, PageRequest, ScanId, ScanJob, ScanProgress, ScanResults, ScanStatus,
    TenantId,
};

use crate::error::Result;

/// Repository port for scan job records.
///
/// Writes are keyed by job id and must be safe to retry. Once a job is
/// terminal the store is the arbiter: status and result writes fail with
/// `ScanError::Conflict`, progress writes are ignored.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScanJobRepository: Send + Sync {
    /// Persist a freshly created job. Fails with `Conflict` if the id exists.
    async fn create(&self, job: ScanJob) -> Result<ScanJob>;

    /// Move the job to `status`, optionally recording a progress checkpoint
    /// in the same write. Returns the updated record.
    async fn update_status(
        &self,
        id: ScanId,
        status: ScanStatus,
        progress: Option<ScanProgress>,
    ) -> Result<ScanJob>;

    /// Upsert a progress checkpoint. Returns `false` when the write was a
    /// no-op (lower stage than recorded, or the job is terminal).
    async fn update_progress(
        &self,
        id: ScanId,
        progress: ScanProgress,
    ) -> Result<bool>;

    /// Store the summary or error for a job that has not reached a terminal
    /// state yet.
    async fn update_results(
        &self,
        id: ScanId,
        results: ScanResults,
    ) -> Result<()>;

    async fn get_by_id(&self, id: ScanId) -> Result<Option<ScanJob>>;

    /// Newest first, paginated with an opaque continuation token.
    async fn get_scan_jobs_by_tenant(
        &self,
        tenant_id: &TenantId,
        page: &PageRequest,
    ) -> Result<Page<ScanJob>>;
}
