use std::collections::{HashMap, HashSet};

use chrono::Utc;
use complyscan_model::{
    CloudResource, Finding, FindingId, FindingStatus, Framework, RuleResult,
    ScanJob, Severity,
};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::hash::finding_hash;

/// Map a free-form severity onto the closed scale. Unknown values become
/// `medium`; the second element reports whether the fallback was taken.
pub fn normalize_severity(raw: &str) -> (Severity, bool) {
    match raw.parse::<Severity>() {
        Ok(severity) => (severity, false),
        Err(_) => (Severity::Medium, true),
    }
}

/// Map a free-form framework name onto the closed set. Unknown values become
/// `SOC2`; the second element reports whether the fallback was taken.
pub fn normalize_framework(raw: &str) -> (Framework, bool) {
    match raw.parse::<Framework>() {
        Ok(framework) => (framework, false),
        Err(_) => (Framework::Soc2, true),
    }
}

/// Components of an `arn:partition:service:region:account:resource` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArnParts {
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource_type: String,
}

impl ArnParts {
    pub fn parse(arn: &str) -> Option<Self> {
        let mut parts = arn.splitn(6, ':');
        if parts.next()? != "arn" {
            return None;
        }
        let _partition = parts.next()?;
        let service = parts.next()?.to_string();
        let region = parts.next()?.to_string();
        let account_id = parts.next()?.to_string();
        let resource = parts.next()?;
        if service.is_empty() {
            return None;
        }
        // "instance/i-123", "db:orders", "function:f" or a bare bucket name.
        let resource_type = match resource.find(['/', ':']) {
            Some(idx) => resource[..idx].to_string(),
            None => service.clone(),
        };
        Some(Self {
            service,
            region,
            account_id,
            resource_type,
        })
    }
}

/// Where a finding is located, resolved from discovery or the identifier.
struct Placement {
    resource_type: String,
    service: String,
    region: String,
    account_id: String,
    name: Option<String>,
}

/// Converts rule verdicts into findings for one scan.
#[derive(Debug, Clone, Default)]
pub struct ResultProcessor;

impl ResultProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Turn the non-compliant `results` into findings owned by `job`.
    ///
    /// Compliant results are dropped. Results that hash identically within
    /// the batch collapse into the first occurrence. `resources` is the
    /// discovery output; identifiers it does not know are located by parsing
    /// them as ARNs.
    pub fn process_results(
        &self,
        results: Vec<RuleResult>,
        job: &ScanJob,
        resources: &[CloudResource],
    ) -> Vec<Finding> {
        let index: HashMap<&str, &CloudResource> = resources
            .iter()
            .map(|r| (r.identifier.as_str(), r))
            .collect();
        let now = Utc::now();
        let mut seen: HashSet<String> = HashSet::new();
        let mut findings = Vec::new();
        let mut compliant = 0usize;
        let mut duplicates = 0usize;

        for result in results {
            if result.compliant {
                compliant += 1;
                continue;
            }

            let (severity, severity_defaulted) =
                normalize_severity(&result.severity);
            let (framework, framework_defaulted) =
                normalize_framework(&result.framework);
            if severity_defaulted || framework_defaulted {
                warn!(
                    target: "scan::findings",
                    scan = %job.id,
                    rule = %result.rule_id,
                    raw_severity = %result.severity,
                    raw_framework = %result.framework,
                    "unrecognised severity or framework, using defaults"
                );
            }

            let hash = finding_hash(
                &result.rule_id,
                &result.resource_identifier,
                &job.tenant_id,
                framework,
            );
            if !seen.insert(hash.clone()) {
                duplicates += 1;
                continue;
            }

            let placement = place(&result.resource_identifier, &index, job);

            let mut metadata = Map::new();
            if !result.evidence.is_null() {
                metadata.insert("evidence".into(), result.evidence.clone());
            }
            if let Some(description) = &result.description {
                metadata.insert("description".into(), json!(description));
            }
            if let Some(name) = &placement.name {
                metadata.insert("resource_name".into(), json!(name));
            }
            if severity_defaulted {
                metadata.insert("raw_severity".into(), json!(result.severity));
            }
            if framework_defaulted {
                metadata
                    .insert("raw_framework".into(), json!(result.framework));
            }

            let tags = build_tags(
                [
                    placement.service.as_str(),
                    framework.as_str(),
                    severity.as_str(),
                    job.scan_type.as_str(),
                    placement.region.as_str(),
                ],
                &job.settings.custom_tags,
            );

            findings.push(Finding {
                id: FindingId::from_hash(&hash),
                tenant_id: job.tenant_id.clone(),
                scan_id: job.id,
                rule_id: result.rule_id,
                resource_identifier: result.resource_identifier,
                resource_type: placement.resource_type,
                service: placement.service,
                region: placement.region,
                account_id: placement.account_id,
                severity,
                framework,
                status: FindingStatus::Open,
                hash,
                title: result.title,
                recommendation: result.recommendation,
                first_seen: now,
                last_seen: now,
                count: 1,
                tags,
                metadata: Value::Object(metadata),
            });
        }

        debug!(
            target: "scan::findings",
            scan = %job.id,
            findings = findings.len(),
            compliant,
            duplicates,
            "rule results processed"
        );
        findings
    }
}

fn place(
    identifier: &str,
    index: &HashMap<&str, &CloudResource>,
    job: &ScanJob,
) -> Placement {
    if let Some(resource) = index.get(identifier) {
        return Placement {
            resource_type: resource.resource_type.clone(),
            service: resource.service.clone(),
            region: resource.region.clone(),
            account_id: resource.account_id.clone(),
            name: Some(resource.name.clone()),
        };
    }

    match ArnParts::parse(identifier) {
        Some(arn) => Placement {
            resource_type: arn.resource_type,
            service: arn.service,
            region: if arn.region.is_empty() {
                "global".to_string()
            } else {
                arn.region
            },
            account_id: if arn.account_id.is_empty() {
                job.account_id.clone()
            } else {
                arn.account_id
            },
            name: None,
        },
        None => Placement {
            resource_type: "unknown".to_string(),
            service: "unknown".to_string(),
            region: job
                .regions
                .first()
                .cloned()
                .unwrap_or_else(|| "global".to_string()),
            account_id: job.account_id.clone(),
            name: None,
        },
    }
}

/// Built-in tags followed by custom tags, first occurrence kept.
fn build_tags<'a>(
    builtin: impl IntoIterator<Item = &'a str>,
    custom: &'a [String],
) -> Vec<String> {
    let mut seen = HashSet::new();
    builtin
        .into_iter()
        .chain(custom.iter().map(String::as_str))
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(*tag))
        .map(str::to_string)
        .collect()
}
