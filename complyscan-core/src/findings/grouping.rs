//! Order-independent reducers over finding slices.

use std::collections::BTreeMap;

use complyscan_model::{
    Finding, FindingStatistics, FindingStatus, Framework, Severity,
};

fn group_by<'a, K: Ord>(
    findings: &'a [Finding],
    key: impl Fn(&'a Finding) -> K,
) -> BTreeMap<K, Vec<&'a Finding>> {
    let mut groups: BTreeMap<K, Vec<&'a Finding>> = BTreeMap::new();
    for finding in findings {
        groups.entry(key(finding)).or_default().push(finding);
    }
    groups
}

fn count_by<'a, K: Ord>(
    findings: &'a [Finding],
    key: impl Fn(&'a Finding) -> K,
) -> BTreeMap<K, usize> {
    let mut counts: BTreeMap<K, usize> = BTreeMap::new();
    for finding in findings {
        *counts.entry(key(finding)).or_default() += 1;
    }
    counts
}

pub fn group_findings_by_severity(
    findings: &[Finding],
) -> BTreeMap<Severity, Vec<&Finding>> {
    group_by(findings, |f| f.severity)
}

pub fn group_findings_by_framework(
    findings: &[Finding],
) -> BTreeMap<Framework, Vec<&Finding>> {
    group_by(findings, |f| f.framework)
}

pub fn group_findings_by_service(
    findings: &[Finding],
) -> BTreeMap<String, Vec<&Finding>> {
    group_by(findings, |f| f.service.clone())
}

pub fn group_findings_by_region(
    findings: &[Finding],
) -> BTreeMap<String, Vec<&Finding>> {
    group_by(findings, |f| f.region.clone())
}

pub fn group_findings_by_resource_type(
    findings: &[Finding],
) -> BTreeMap<String, Vec<&Finding>> {
    group_by(findings, |f| f.resource_type.clone())
}

/// Counts per severity. Every severity is present, zero when unseen.
pub fn count_by_severity(findings: &[Finding]) -> BTreeMap<Severity, usize> {
    let mut counts: BTreeMap<Severity, usize> =
        Severity::ALL.iter().map(|s| (*s, 0)).collect();
    for (severity, n) in count_by(findings, |f| f.severity) {
        counts.insert(severity, n);
    }
    counts
}

pub fn count_by_framework(findings: &[Finding]) -> BTreeMap<Framework, usize> {
    count_by(findings, |f| f.framework)
}

pub fn count_by_service(findings: &[Finding]) -> BTreeMap<String, usize> {
    count_by(findings, |f| f.service.clone())
}

pub fn count_by_region(findings: &[Finding]) -> BTreeMap<String, usize> {
    count_by(findings, |f| f.region.clone())
}

pub fn count_by_resource_type(findings: &[Finding]) -> BTreeMap<String, usize> {
    count_by(findings, |f| f.resource_type.clone())
}

/// Tenant-wide aggregate, as served by the finding store.
pub fn finding_statistics(findings: &[Finding]) -> FindingStatistics {
    let status = count_by(findings, |f| f.status.as_str());
    let of = |s: FindingStatus| status.get(s.as_str()).copied().unwrap_or(0);
    FindingStatistics {
        total: findings.len(),
        open: of(FindingStatus::Open),
        resolved: of(FindingStatus::Resolved),
        suppressed: of(FindingStatus::Suppressed),
        by_severity: count_by(findings, |f| f.severity),
        by_framework: count_by_framework(findings),
        by_service: count_by_service(findings),
    }
}
