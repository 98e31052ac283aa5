use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use complyscan_model::{
    FindingFilter, FindingStatistics, Framework, Page, PageRequest, ScanId,
    ScanJob, ScanProgress, ScanResultsView, ScanStatus, ScanStatusView,
    StartScanRequest, StartScanResponse, TenantId,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::events::{ScanEvent, ScanEventBus};
use super::pipeline::ScanPipeline;
use super::runtime::{ScanExecutor, ScanRuntime};
use crate::config::OrchestratorConfig;
use crate::database::infrastructure::{
    InMemoryFindingRepository, InMemoryScanJobRepository,
    InMemoryTenantRepository,
};
use crate::database::ports::{
    FindingRepository, ScanJobRepository, TenantRepository,
};
use crate::discovery::{CloudClientFactory, CollectorRegistry, ResourceDiscovery};
use crate::error::{Result, ScanError};
use crate::evaluator::RuleEvaluator;

/// Entry point for starting, observing and cancelling scans.
///
/// Every lookup is tenant-scoped: a scan that belongs to another tenant is
/// indistinguishable from one that does not exist.
pub struct ScanOrchestrator {
    config: OrchestratorConfig,
    tenants: Arc<dyn TenantRepository>,
    jobs: Arc<dyn ScanJobRepository>,
    findings: Arc<dyn FindingRepository>,
    registry: Arc<CollectorRegistry>,
    pipeline: Arc<ScanPipeline>,
    runtime: ScanRuntime,
    events: Arc<ScanEventBus>,
}

impl fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("runtime", &self.runtime)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl ScanOrchestrator {
    pub fn builder(config: OrchestratorConfig) -> ScanOrchestratorBuilder {
        ScanOrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    /// Validate and persist a new job, then hand it to the worker pool.
    /// Returns as soon as the job is queued.
    pub async fn start_scan(
        &self,
        request: StartScanRequest,
        request_id: Option<String>,
    ) -> Result<StartScanResponse> {
        if request.requested_by.trim().is_empty() {
            return Err(ScanError::Validation(
                "requested_by must not be empty".to_string(),
            ));
        }
        let tenant = self
            .tenants
            .get_by_id(&request.tenant_id)
            .await?
            .ok_or_else(|| {
                ScanError::NotFound(format!("tenant {}", request.tenant_id))
            })?;
        if !tenant.active {
            return Err(ScanError::Validation(format!(
                "tenant {} is not active",
                tenant.id
            )));
        }
        let account_id = request
            .account_id
            .clone()
            .filter(|a| !a.trim().is_empty())
            .or_else(|| tenant.default_account_id.clone())
            .ok_or_else(|| {
                ScanError::Validation(format!(
                    "no account id given and tenant {} has no default",
                    tenant.id
                ))
            })?;

        let unknown: Vec<&str> = request
            .services
            .iter()
            .map(String::as_str)
            .filter(|s| !self.registry.contains(s))
            .collect();
        if !unknown.is_empty() {
            return Err(ScanError::Validation(format!(
                "unsupported services: {}",
                unknown.join(", ")
            )));
        }

        let regions = dedup(if !request.regions.is_empty() {
            request.regions.clone()
        } else if !tenant.default_regions.is_empty() {
            tenant.default_regions.clone()
        } else {
            self.config.default_regions.clone()
        });
        if regions.is_empty() {
            return Err(ScanError::Validation("no regions to scan".to_string()));
        }
        let services = if request.services.is_empty() {
            self.registry.services()
        } else {
            dedup(request.services.clone())
        };
        let frameworks = if request.frameworks.is_empty() {
            Framework::ALL.to_vec()
        } else {
            dedup(request.frameworks.clone())
        };

        let now = Utc::now();
        let job = ScanJob {
            id: ScanId::new(),
            tenant_id: tenant.id.clone(),
            scan_type: request.scan_type,
            status: ScanStatus::Initializing,
            account_id,
            regions,
            services,
            frameworks,
            progress: ScanProgress::default(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            results: None,
            settings: request.settings,
            requested_by: request.requested_by,
            request_id,
        };
        let job = self.jobs.create(job).await?;
        self.events.publish(ScanEvent::Started {
            scan_id: job.id,
            tenant_id: job.tenant_id.clone(),
        });

        if let Err(err) = self.runtime.submit(job.clone()).await {
            warn!(
                target: "scan::orchestrator",
                scan = %job.id,
                error = %err,
                "scan could not be queued"
            );
            self.pipeline.abandon(&job, &err.to_string()).await;
            return Err(err);
        }

        let estimated_duration = self.config.estimate.estimate(
            job.regions.len(),
            job.services.len(),
            job.frameworks.len(),
        );
        info!(
            target: "scan::orchestrator",
            scan = %job.id,
            tenant = %job.tenant_id,
            request_id = job.request_id.as_deref().unwrap_or("-"),
            scan_type = job.scan_type.as_str(),
            regions = job.regions.len(),
            services = job.services.len(),
            frameworks = job.frameworks.len(),
            estimated_duration,
            "scan queued"
        );

        Ok(StartScanResponse {
            scan_id: job.id,
            status: job.status,
            estimated_duration,
            scan_url: format!(
                "{}/scans/{}",
                self.config.api_base_url.trim_end_matches('/'),
                job.id
            ),
        })
    }

    async fn owned_job(
        &self,
        tenant_id: &TenantId,
        scan_id: ScanId,
    ) -> Result<ScanJob> {
        self.jobs
            .get_by_id(scan_id)
            .await?
            .filter(|job| &job.tenant_id == tenant_id)
            .ok_or_else(|| ScanError::NotFound(format!("scan {scan_id}")))
    }

    pub async fn get_scan_status(
        &self,
        tenant_id: &TenantId,
        scan_id: ScanId,
    ) -> Result<ScanStatusView> {
        let job = self.owned_job(tenant_id, scan_id).await?;
        Ok(ScanStatusView::from(&job))
    }

    /// Summary or error of the scan together with the findings it last
    /// observed.
    ///
    /// A finding re-detected by a later scan moves to that scan, so an older
    /// scan lists only the findings no later scan has seen again. Its summary
    /// counts are fixed at completion and may exceed the findings listed.
    pub async fn get_scan_results(
        &self,
        tenant_id: &TenantId,
        scan_id: ScanId,
    ) -> Result<ScanResultsView> {
        let job = self.owned_job(tenant_id, scan_id).await?;
        let findings = self
            .findings
            .get_findings_by_tenant(tenant_id, &FindingFilter::for_scan(scan_id))
            .await?;
        Ok(ScanResultsView {
            scan_id: job.id,
            status: job.status,
            results: job.results,
            findings,
        })
    }

    pub async fn list_scans(
        &self,
        tenant_id: &TenantId,
        page: &PageRequest,
    ) -> Result<Page<ScanStatusView>> {
        let jobs = self.jobs.get_scan_jobs_by_tenant(tenant_id, page).await?;
        Ok(jobs.map(|job| ScanStatusView::from(&job)))
    }

    /// Mark the scan cancelled. The running pipeline notices at its next
    /// checkpoint.
    pub async fn cancel_scan(
        &self,
        tenant_id: &TenantId,
        scan_id: ScanId,
    ) -> Result<ScanStatusView> {
        let job = self.owned_job(tenant_id, scan_id).await?;
        if job.status.is_terminal() {
            return Err(ScanError::Conflict(format!(
                "scan {scan_id} is already {}",
                job.status
            )));
        }
        let job = self
            .jobs
            .update_status(scan_id, ScanStatus::Cancelled, None)
            .await?;
        self.events.publish(ScanEvent::Cancelled {
            scan_id,
            tenant_id: job.tenant_id.clone(),
        });
        info!(
            target: "scan::orchestrator",
            scan = %scan_id,
            tenant = %tenant_id,
            "scan cancelled"
        );
        Ok(ScanStatusView::from(&job))
    }

    pub async fn finding_statistics(
        &self,
        tenant_id: &TenantId,
    ) -> Result<FindingStatistics> {
        self.findings.get_finding_statistics(tenant_id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Resolve once the scan is terminal. Callers bound the wait themselves,
    /// e.g. with `tokio::time::timeout`.
    pub async fn wait_for_terminal(
        &self,
        tenant_id: &TenantId,
        scan_id: ScanId,
    ) -> Result<ScanStatusView> {
        let mut events = self.subscribe();
        loop {
            let status = self.get_scan_status(tenant_id, scan_id).await?;
            if status.status.is_terminal() {
                return Ok(status);
            }
            loop {
                match events.recv().await {
                    Ok(event) if event.scan_id() == scan_id && event.is_terminal() => {
                        break;
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ScanError::Internal(
                            "scan event bus closed".to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Stop the worker pool. Queued scans are marked failed.
    pub async fn shutdown(&self) -> Result<()> {
        self.runtime.shutdown().await
    }
}

fn dedup<T: Clone + Eq + std::hash::Hash>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Assembles a [`ScanOrchestrator`]. Repositories default to the in-memory
/// adapters; the cloud client factory and the rule evaluator are required.
pub struct ScanOrchestratorBuilder {
    config: OrchestratorConfig,
    tenants: Option<Arc<dyn TenantRepository>>,
    jobs: Option<Arc<dyn ScanJobRepository>>,
    findings: Option<Arc<dyn FindingRepository>>,
    cloud: Option<Arc<dyn CloudClientFactory>>,
    registry: Option<CollectorRegistry>,
    evaluator: Option<Arc<dyn RuleEvaluator>>,
}

impl fmt::Debug for ScanOrchestratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOrchestratorBuilder")
            .field("config", &self.config)
            .field("tenants_set", &self.tenants.is_some())
            .field("jobs_set", &self.jobs.is_some())
            .field("findings_set", &self.findings.is_some())
            .field("cloud_set", &self.cloud.is_some())
            .field("registry", &self.registry)
            .field("evaluator_set", &self.evaluator.is_some())
            .finish()
    }
}

impl ScanOrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            tenants: None,
            jobs: None,
            findings: None,
            cloud: None,
            registry: None,
            evaluator: None,
        }
    }

    pub fn with_tenants(mut self, tenants: Arc<dyn TenantRepository>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    pub fn with_jobs(mut self, jobs: Arc<dyn ScanJobRepository>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_findings(
        mut self,
        findings: Arc<dyn FindingRepository>,
    ) -> Self {
        self.findings = Some(findings);
        self
    }

    pub fn with_cloud(mut self, cloud: Arc<dyn CloudClientFactory>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn with_registry(mut self, registry: CollectorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn RuleEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Spawns the worker pool, so this must run inside a tokio runtime.
    pub fn build(self) -> Result<ScanOrchestrator> {
        let cloud = self.cloud.ok_or_else(|| {
            ScanError::Validation("missing cloud client factory".to_string())
        })?;
        let evaluator = self.evaluator.ok_or_else(|| {
            ScanError::Validation("missing rule evaluator".to_string())
        })?;
        let tenants = self
            .tenants
            .unwrap_or_else(|| Arc::new(InMemoryTenantRepository::new()));
        let jobs = self
            .jobs
            .unwrap_or_else(|| Arc::new(InMemoryScanJobRepository::new()));
        let findings = self
            .findings
            .unwrap_or_else(|| Arc::new(InMemoryFindingRepository::new()));
        let registry =
            Arc::new(self.registry.unwrap_or_else(CollectorRegistry::with_defaults));
        if registry.is_empty() {
            return Err(ScanError::Validation(
                "collector registry is empty".to_string(),
            ));
        }

        let config = self.config;
        let events = Arc::new(ScanEventBus::new(config.event_channel_capacity));
        let discovery = ResourceDiscovery::new(
            cloud,
            Arc::clone(&registry),
            config.max_concurrent_collectors,
            config.global_region.clone(),
        );
        let pipeline = Arc::new(ScanPipeline::new(
            Arc::clone(&jobs),
            Arc::clone(&findings),
            discovery,
            evaluator,
            Arc::clone(&events),
        ));
        let runtime = ScanRuntime::start(
            Arc::clone(&pipeline) as Arc<dyn ScanExecutor>,
            config.worker_count,
            config.queue_capacity,
        );

        Ok(ScanOrchestrator {
            config,
            tenants,
            jobs,
            findings,
            registry,
            pipeline,
            runtime,
            events,
        })
    }
}

#[cfg(feature = "postgres")]
impl ScanOrchestratorBuilder {
    /// Use the Postgres adapters for tenants, jobs and findings.
    pub fn with_postgres(self, pool: sqlx::PgPool) -> Self {
        use crate::database::infrastructure::{
            PostgresFindingRepository, PostgresScanJobRepository,
            PostgresTenantRepository,
        };
        self.with_tenants(Arc::new(PostgresTenantRepository::new(pool.clone())))
            .with_jobs(Arc::new(PostgresScanJobRepository::new(pool.clone())))
            .with_findings(Arc::new(PostgresFindingRepository::new(pool)))
    }
}
