//! Compliance score.
//!
//! A heuristic, not a certification: each finding costs its severity weight
//! (critical 10, high 5, medium 2, low 1) against a budget of ten points per
//! scanned resource.

use complyscan_model::{Finding, Severity};

/// Sum of severity weights over `findings`.
pub fn weighted_findings(findings: &[Finding]) -> u64 {
    findings.iter().map(|f| f.severity.weight()).sum()
}

/// Score from per-severity counts. Used when findings are already reduced.
pub fn score_from_counts<'a>(
    counts: impl IntoIterator<Item = (&'a Severity, &'a usize)>,
    total_resources: usize,
) -> f64 {
    let weighted: u64 = counts
        .into_iter()
        .map(|(severity, n)| severity.weight() * *n as u64)
        .sum();
    score_weighted(weighted, total_resources)
}

/// `max(0, 100 - weighted / (total_resources * 10) * 100)`, rounded to two
/// decimals. A scan with no resources scores 100.
pub fn compliance_score(findings: &[Finding], total_resources: usize) -> f64 {
    score_weighted(weighted_findings(findings), total_resources)
}

fn score_weighted(weighted: u64, total_resources: usize) -> f64 {
    if total_resources == 0 {
        return 100.0;
    }
    let budget = total_resources as f64 * 10.0;
    let raw = (100.0 - weighted as f64 / budget * 100.0).clamp(0.0, 100.0);
    (raw * 100.0).round() / 100.0
}
