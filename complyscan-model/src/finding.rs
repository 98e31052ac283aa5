use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::ModelError,
    ids::{FindingId, ScanId, TenantId},
};

/// Closed severity scale for findings, most severe first.
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
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    /// Weight used by the compliance score.
    pub fn weight(&self) -> u64 {
        match self {
            Severity::Critical => 10,
            Severity::High => 5,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            _ => Err(ModelError::UnknownSeverity(s.to_string())),
        }
    }
}

/// Compliance frameworks findings can be filed under.
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
pub enum Framework {
    #[serde(rename = "SOC2")]
    Soc2,
    #[serde(rename = "HIPAA")]
    Hipaa,
    #[serde(rename = "GDPR")]
    Gdpr,
    #[serde(rename = "PCI")]
    Pci,
    #[serde(rename = "ISO27001")]
    Iso27001,
    #[serde(rename = "NIST")]
    Nist,
}

impl Framework {
    pub const ALL: [Framework; 6] = [
        Framework::Soc2,
        Framework::Hipaa,
        Framework::Gdpr,
        Framework::Pci,
        Framework::Iso27001,
        Framework::Nist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Soc2 => "SOC2",
            Framework::Hipaa => "HIPAA",
            Framework::Gdpr => "GDPR",
            Framework::Pci => "PCI",
            Framework::Iso27001 => "ISO27001",
            Framework::Nist => "NIST",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = ModelError;

    /// Accepts the common spellings ("SOC 2", "pci-dss", "ISO 27001",
    /// "NIST 800-53", ...) by comparing alphanumerics only.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match compact.as_str() {
            "SOC2" => Ok(Framework::Soc2),
            "HIPAA" => Ok(Framework::Hipaa),
            "GDPR" => Ok(Framework::Gdpr),
            "PCI" | "PCIDSS" => Ok(Framework::Pci),
            "ISO27001" => Ok(Framework::Iso27001),
            "NIST" | "NIST80053" | "NISTCSF" => Ok(Framework::Nist),
            _ => Err(ModelError::UnknownFramework(s.to_string())),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    #[default]
    Open,
    Resolved,
    Suppressed,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::Open => "open",
            FindingStatus::Resolved => "resolved",
            FindingStatus::Suppressed => "suppressed",
        }
    }
}

impl FromStr for FindingStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(FindingStatus::Open),
            "resolved" => Ok(FindingStatus::Resolved),
            "suppressed" => Ok(FindingStatus::Suppressed),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// Context handed to the rule evaluator alongside the discovered resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    pub tenant_id: TenantId,
    pub scan_id: ScanId,
    pub frameworks: Vec<Framework>,
    pub services: Vec<String>,
}

/// One rule verdict against one resource. Severity and framework arrive as
/// free-form strings and are normalised by the findings engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub rule_id: String,
    pub resource_identifier: String,
    pub compliant: bool,
    /// Blank or missing counts as unrecognised.
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub evidence: Value,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,
    pub tenant_id: TenantId,
    pub scan_id: ScanId,
    pub rule_id: String,
    pub resource_identifier: String,
    pub resource_type: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub severity: Severity,
    pub framework: Framework,
    pub status: FindingStatus,
    pub hash: String,
    pub title: Option<String>,
    pub recommendation: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: u32,
    pub tags: Vec<String>,
    pub metadata: Value,
}

/// Query filter for a tenant's finding store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingFilter {
    pub severity: Option<Severity>,
    pub framework: Option<Framework>,
    pub status: Option<FindingStatus>,
    pub service: Option<String>,
    pub region: Option<String>,
    pub scan_id: Option<ScanId>,
    pub limit: Option<usize>,
}

impl FindingFilter {
    pub fn for_scan(scan_id: ScanId) -> Self {
        Self {
            scan_id: Some(scan_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, finding: &Finding) -> bool {
        self.severity.is_none_or(|s| finding.severity == s)
            && self.framework.is_none_or(|f| finding.framework == f)
            && self.status.is_none_or(|s| finding.status == s)
            && self
                .service
                .as_deref()
                .is_none_or(|s| finding.service == s)
            && self.region.as_deref().is_none_or(|r| finding.region == r)
            && self.scan_id.is_none_or(|id| finding.scan_id == id)
    }
}

/// Tenant-wide aggregate over the finding store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingStatistics {
    pub total: usize,
    pub open: usize,
    pub resolved: usize,
    pub suppressed: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_framework: BTreeMap<Framework, usize>,
    pub by_service: BTreeMap<String, usize>,
}
