use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ModelError, Result},
    finding::{Finding, Framework, Severity},
    ids::{ScanId, TenantId},
};

/// Lifecycle of a scan job. `Completed`, `Failed` and `Cancelled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Initializing,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }

    /// Allowed edges: `initializing -> in_progress -> {completed, failed,
    /// cancelled}`; a job may also fail or be cancelled before its pipeline
    /// picks it up.
    pub fn can_transition_to(self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        matches!(
            (self, next),
            (Initializing, InProgress | Failed | Cancelled)
                | (InProgress, Completed | Failed | Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Initializing => "initializing",
            ScanStatus::InProgress => "in_progress",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "initializing" => Ok(ScanStatus::Initializing),
            "in_progress" => Ok(ScanStatus::InProgress),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            "cancelled" => Ok(ScanStatus::Cancelled),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// Pipeline checkpoints. The declaration order is the progress order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    Initializing,
    Discovery,
    RuleEvaluation,
    ResultProcessing,
    Finalizing,
    Done,
}

impl ScanStage {
    pub const COUNT: u32 = 5;

    pub fn ordinal(&self) -> u32 {
        match self {
            ScanStage::Initializing => 0,
            ScanStage::Discovery => 1,
            ScanStage::RuleEvaluation => 2,
            ScanStage::ResultProcessing => 3,
            ScanStage::Finalizing => 4,
            ScanStage::Done => 5,
        }
    }

    pub fn percentage(&self) -> f64 {
        match self {
            ScanStage::Initializing => 0.0,
            ScanStage::Discovery => 10.0,
            ScanStage::RuleEvaluation => 30.0,
            ScanStage::ResultProcessing => 70.0,
            ScanStage::Finalizing => 90.0,
            ScanStage::Done => 100.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStage::Initializing => "initializing",
            ScanStage::Discovery => "discovery",
            ScanStage::RuleEvaluation => "rule_evaluation",
            ScanStage::ResultProcessing => "result_processing",
            ScanStage::Finalizing => "finalizing",
            ScanStage::Done => "done",
        }
    }

    pub fn from_ordinal(ordinal: u32) -> Option<Self> {
        match ordinal {
            0 => Some(ScanStage::Initializing),
            1 => Some(ScanStage::Discovery),
            2 => Some(ScanStage::RuleEvaluation),
            3 => Some(ScanStage::ResultProcessing),
            4 => Some(ScanStage::Finalizing),
            5 => Some(ScanStage::Done),
            _ => None,
        }
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub current: u32,
    pub total: u32,
    pub percentage: f64,
    pub stage: ScanStage,
}

impl ScanProgress {
    pub fn at(stage: ScanStage) -> Self {
        Self {
            current: stage.ordinal(),
            total: ScanStage::COUNT,
            percentage: stage.percentage(),
            stage,
        }
    }

    /// Whether `next` may replace `self` without moving progress backwards.
    pub fn admits(&self, next: &ScanProgress) -> bool {
        next.stage >= self.stage && next.percentage >= self.percentage
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::at(ScanStage::Initializing)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    #[default]
    Full,
    Targeted,
    Scheduled,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Full => "full",
            ScanType::Targeted => "targeted",
            ScanType::Scheduled => "scheduled",
        }
    }
}

impl FromStr for ScanType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(ScanType::Full),
            "targeted" => Ok(ScanType::Targeted),
            "scheduled" => Ok(ScanType::Scheduled),
            other => Err(ModelError::UnknownScanType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Extra tags stamped on every finding the scan produces.
    pub custom_tags: Vec<String>,
    /// Fetch deep per-resource configuration after discovery.
    pub deep_configuration: bool,
    /// Consumed by the external notifier once the job is terminal.
    pub notify_on_completion: bool,
}

/// One isolated collector failure. The scan proceeds without that slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageGap {
    pub service: String,
    pub region: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_resources: usize,
    pub total_findings: usize,
    pub rules_evaluated: usize,
    pub compliance_score: f64,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_framework: BTreeMap<Framework, usize>,
    pub by_service: BTreeMap<String, usize>,
    pub by_region: BTreeMap<String, usize>,
    pub by_resource_type: BTreeMap<String, usize>,
    pub coverage_gaps: Vec<CoverageGap>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanResults {
    Summary(ScanSummary),
    Error {
        message: String,
        failed_at: DateTime<Utc>,
    },
}

impl ScanResults {
    pub fn error(message: impl Into<String>) -> Self {
        ScanResults::Error {
            message: message.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> Option<&ScanSummary> {
        match self {
            ScanResults::Summary(summary) => Some(summary),
            ScanResults::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ScanResults::Error { message, .. } => Some(message),
            ScanResults::Summary(_) => None,
        }
    }
}

/// Unit-of-work record for one discovery-and-evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: ScanId,
    pub tenant_id: TenantId,
    pub scan_type: ScanType,
    pub status: ScanStatus,
    pub account_id: String,
    pub regions: Vec<String>,
    pub services: Vec<String>,
    pub frameworks: Vec<Framework>,
    pub progress: ScanProgress,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub results: Option<ScanResults>,
    pub settings: ScanSettings,
    pub requested_by: String,
    pub request_id: Option<String>,
}

impl ScanJob {
    pub fn transition(&mut self, next: ScanStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Applies a progress checkpoint. Returns `false` when the checkpoint
    /// would move progress backwards or the job is already terminal.
    pub fn record_progress(&mut self, progress: ScanProgress) -> bool {
        if self.status.is_terminal() || !self.progress.admits(&progress) {
            return false;
        }
        self.progress = progress;
        self.updated_at = Utc::now();
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanRequest {
    pub tenant_id: TenantId,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub scan_type: ScanType,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<Framework>,
    #[serde(default)]
    pub settings: ScanSettings,
    pub requested_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanResponse {
    pub scan_id: ScanId,
    pub status: ScanStatus,
    /// Client-facing estimate in seconds; never used for scheduling.
    pub estimated_duration: u64,
    pub scan_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatusView {
    pub scan_id: ScanId,
    pub tenant_id: TenantId,
    pub status: ScanStatus,
    pub progress: ScanProgress,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<&ScanJob> for ScanStatusView {
    fn from(job: &ScanJob) -> Self {
        Self {
            scan_id: job.id,
            tenant_id: job.tenant_id.clone(),
            status: job.status,
            progress: job.progress,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job
                .results
                .as_ref()
                .and_then(ScanResults::error_message)
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResultsView {
    pub scan_id: ScanId,
    pub status: ScanStatus,
    pub results: Option<ScanResults>,
    pub findings: Vec<Finding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ScanJob {
        let now = Utc::now();
        ScanJob {
            id: ScanId::new(),
            tenant_id: TenantId::new("t-1"),
            scan_type: ScanType::Full,
            status: ScanStatus::Initializing,
            account_id: "111122223333".into(),
            regions: vec!["us-east-1".into()],
            services: vec![],
            frameworks: vec![Framework::Soc2],
            progress: ScanProgress::default(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            results: None,
            settings: ScanSettings::default(),
            requested_by: "tester".into(),
            request_id: None,
        }
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        let all = [
            ScanStatus::Initializing,
            ScanStatus::InProgress,
            ScanStatus::Completed,
            ScanStatus::Failed,
            ScanStatus::Cancelled,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn happy_path_transitions() {
        let mut job = job();
        job.transition(ScanStatus::InProgress).unwrap();
        job.transition(ScanStatus::Completed).unwrap();
        assert!(job.completed_at.is_some());

        let err = job.transition(ScanStatus::Cancelled).unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidTransition {
                from: ScanStatus::Completed,
                to: ScanStatus::Cancelled
            }
        );
        assert_eq!(job.status, ScanStatus::Completed);
    }

    #[test]
    fn in_progress_cannot_go_back_to_initializing() {
        let mut job = job();
        job.transition(ScanStatus::InProgress).unwrap();
        assert!(job.transition(ScanStatus::Initializing).is_err());
        assert!(job.transition(ScanStatus::InProgress).is_err());
    }

    #[test]
    fn progress_never_moves_backwards() {
        let mut job = job();
        assert!(job.record_progress(ScanProgress::at(ScanStage::RuleEvaluation)));
        assert!(!job.record_progress(ScanProgress::at(ScanStage::Discovery)));
        assert_eq!(job.progress.percentage, 30.0);
        // Re-applying the same checkpoint is an idempotent upsert.
        assert!(job.record_progress(ScanProgress::at(ScanStage::RuleEvaluation)));
    }

    #[test]
    fn terminal_job_ignores_progress() {
        let mut job = job();
        job.transition(ScanStatus::Cancelled).unwrap();
        assert!(!job.record_progress(ScanProgress::at(ScanStage::Finalizing)));
        assert_eq!(job.progress.stage, ScanStage::Initializing);
    }

    #[test]
    fn unknown_scan_type_names_itself() {
        assert_eq!("targeted".parse::<ScanType>(), Ok(ScanType::Targeted));
        let err = "nightly".parse::<ScanType>().unwrap_err();
        assert_eq!(err, ModelError::UnknownScanType("nightly".into()));
        assert_eq!(err.to_string(), "unknown scan type: nightly");
    }

    #[test]
    fn stage_percentages_are_monotonic() {
        let stages: Vec<ScanStage> =
            (0..=ScanStage::COUNT).filter_map(ScanStage::from_ordinal).collect();
        assert_eq!(stages.len(), 6);
        for pair in stages.windows(2) {
            assert!(pair[0].percentage() < pair[1].percentage());
        }
    }
}
