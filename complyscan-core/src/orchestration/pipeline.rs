use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use complyscan_model::{
    EvaluationContext, Finding, ScanJob, ScanProgress, ScanResults, ScanStage,
    ScanStatus, ScanSummary,
};
use tracing::{debug, error, info, warn};

use super::events::{ScanEvent, ScanEventBus};
use super::runtime::ScanExecutor;
use crate::database::ports::{FindingRepository, ScanJobRepository};
use crate::discovery::{DiscoveryOutcome, ResourceDiscovery};
use crate::error::{Result, ScanError};
use crate::evaluator::RuleEvaluator;
use crate::findings::{
    ResultProcessor, count_by_framework, count_by_region,
    count_by_resource_type, count_by_service, count_by_severity,
};
use crate::scoring::compliance_score;

/// Discovery → evaluation → processing → persistence for one job.
///
/// Between stages the pipeline re-reads the job and stops quietly once it
/// has gone terminal, which is how cancellation takes effect.
#[derive(Clone)]
pub struct ScanPipeline {
    jobs: Arc<dyn ScanJobRepository>,
    findings: Arc<dyn FindingRepository>,
    discovery: ResourceDiscovery,
    evaluator: Arc<dyn RuleEvaluator>,
    processor: ResultProcessor,
    events: Arc<ScanEventBus>,
}

impl fmt::Debug for ScanPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanPipeline")
            .field("discovery", &self.discovery)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl ScanPipeline {
    pub fn new(
        jobs: Arc<dyn ScanJobRepository>,
        findings: Arc<dyn FindingRepository>,
        discovery: ResourceDiscovery,
        evaluator: Arc<dyn RuleEvaluator>,
        events: Arc<ScanEventBus>,
    ) -> Self {
        Self {
            jobs,
            findings,
            discovery,
            evaluator,
            processor: ResultProcessor::new(),
            events,
        }
    }

    /// Record `stage` unless the job went terminal in the meantime.
    /// Returns `false` when the pipeline should stop.
    /// Re-reads the job; `false` once it has gone terminal.
    async fn still_active(&self, job: &ScanJob, stage: ScanStage) -> Result<bool> {
        let current = self
            .jobs
            .get_by_id(job.id)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("scan job {}", job.id)))?;
        if current.status.is_terminal() {
            info!(
                target: "scan::orchestrator",
                scan = %job.id,
                status = %current.status,
                stage = %stage,
                "scan no longer active, stopping pipeline"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn checkpoint(&self, job: &ScanJob, stage: ScanStage) -> Result<bool> {
        if !self.still_active(job, stage).await? {
            return Ok(false);
        }

        let progress = ScanProgress::at(stage);
        let applied = self.jobs.update_progress(job.id, progress).await?;
        if applied {
            self.publish_progress(job, progress);
        } else {
            debug!(
                target: "scan::orchestrator",
                scan = %job.id,
                stage = %stage,
                "checkpoint not recorded, stopping pipeline"
            );
        }
        Ok(applied)
    }

    fn publish_progress(&self, job: &ScanJob, progress: ScanProgress) {
        self.events.publish(ScanEvent::Progress {
            scan_id: job.id,
            tenant_id: job.tenant_id.clone(),
            progress,
        });
    }

    fn summarize(
        findings: &[Finding],
        discovery: DiscoveryOutcome,
        rules_evaluated: usize,
        started: Instant,
    ) -> ScanSummary {
        let total_resources = discovery.resources.len();
        ScanSummary {
            total_resources,
            total_findings: findings.len(),
            rules_evaluated,
            compliance_score: compliance_score(findings, total_resources),
            by_severity: count_by_severity(findings),
            by_framework: count_by_framework(findings),
            by_service: count_by_service(findings),
            by_region: count_by_region(findings),
            by_resource_type: count_by_resource_type(findings),
            coverage_gaps: discovery.failures,
            completed_at: Some(Utc::now()),
            duration_ms: u64::try_from(started.elapsed().as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

/// `Conflict` from a job write means someone else made the job terminal.
fn stopped_by_conflict<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_conflict() => Ok(None),
        Err(err) => Err(err),
    }
}

#[async_trait]
impl ScanExecutor for ScanPipeline {
    async fn execute(&self, job: ScanJob) -> Result<()> {
        let started = Instant::now();
        let start_progress = ScanProgress::at(ScanStage::Discovery);
        let Some(job) = stopped_by_conflict(
            self.jobs
                .update_status(job.id, ScanStatus::InProgress, Some(start_progress))
                .await,
        )?
        else {
            info!(
                target: "scan::orchestrator",
                scan = %job.id,
                "scan cancelled before it started"
            );
            return Ok(());
        };
        self.publish_progress(&job, start_progress);
        info!(
            target: "scan::orchestrator",
            scan = %job.id,
            tenant = %job.tenant_id,
            regions = job.regions.len(),
            services = job.services.len(),
            "scan started"
        );

        let discovered = self.discovery.discover_resources(&job).await;
        if !self.checkpoint(&job, ScanStage::RuleEvaluation).await? {
            return Ok(());
        }

        let context = EvaluationContext {
            tenant_id: job.tenant_id.clone(),
            scan_id: job.id,
            frameworks: job.frameworks.clone(),
            services: job.services.clone(),
        };
        let results = self
            .evaluator
            .execute_rules(&discovered.resources, &context)
            .await?;
        let rules_evaluated = results.len();
        if !self.checkpoint(&job, ScanStage::ResultProcessing).await? {
            return Ok(());
        }

        let findings =
            self.processor
                .process_results(results, &job, &discovered.resources);
        // Cancellation may have landed since the last checkpoint.
        if !self.still_active(&job, ScanStage::ResultProcessing).await? {
            return Ok(());
        }
        if !findings.is_empty() {
            let written = self.findings.batch_write(findings.clone()).await?;
            debug!(
                target: "scan::orchestrator",
                scan = %job.id,
                created = written.created,
                updated = written.updated,
                "findings persisted"
            );
        }
        if !self.checkpoint(&job, ScanStage::Finalizing).await? {
            return Ok(());
        }

        let summary =
            Self::summarize(&findings, discovered, rules_evaluated, started);
        let total_findings = summary.total_findings;
        let score = summary.compliance_score;
        let gaps = summary.coverage_gaps.len();

        if stopped_by_conflict(
            self.jobs
                .update_results(job.id, ScanResults::Summary(summary))
                .await,
        )?
        .is_none()
        {
            info!(
                target: "scan::orchestrator",
                scan = %job.id,
                "scan ended before results landed"
            );
            return Ok(());
        }
        if stopped_by_conflict(
            self.jobs
                .update_status(
                    job.id,
                    ScanStatus::Completed,
                    Some(ScanProgress::at(ScanStage::Done)),
                )
                .await,
        )?
        .is_none()
        {
            info!(
                target: "scan::orchestrator",
                scan = %job.id,
                "scan ended before completion landed"
            );
            return Ok(());
        }

        self.events.publish(ScanEvent::Completed {
            scan_id: job.id,
            tenant_id: job.tenant_id.clone(),
            total_findings,
            compliance_score: score,
        });
        info!(
            target: "scan::orchestrator",
            scan = %job.id,
            tenant = %job.tenant_id,
            findings = total_findings,
            compliance_score = score,
            coverage_gaps = gaps,
            duration_ms = started.elapsed().as_millis() as u64,
            "scan completed"
        );
        Ok(())
    }

    async fn abandon(&self, job: &ScanJob, reason: &str) {
        match self
            .jobs
            .update_results(job.id, ScanResults::error(reason))
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                debug!(
                    target: "scan::orchestrator",
                    scan = %job.id,
                    "failed scan was already terminal"
                );
                return;
            }
            Err(err) => warn!(
                target: "scan::orchestrator",
                scan = %job.id,
                error = %err,
                "could not record scan error"
            ),
        }

        match self
            .jobs
            .update_status(job.id, ScanStatus::Failed, None)
            .await
        {
            Ok(_) => self.events.publish(ScanEvent::Failed {
                scan_id: job.id,
                tenant_id: job.tenant_id.clone(),
                error: reason.to_string(),
            }),
            Err(err) if err.is_conflict() => debug!(
                target: "scan::orchestrator",
                scan = %job.id,
                "failed scan was already terminal"
            ),
            Err(err) => error!(
                target: "scan::orchestrator",
                scan = %job.id,
                error = %err,
                "could not mark scan failed"
            ),
        }
    }
}
