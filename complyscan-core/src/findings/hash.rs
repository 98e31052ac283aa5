use complyscan_model::{Framework, TenantId};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Fields that define a finding's identity, serialised in this exact order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FindingKey<'a> {
    rule_id: &'a str,
    resource_identifier: &'a str,
    tenant_id: &'a str,
    framework: &'a str,
}

/// Deterministic identity of a finding: hex SHA-256 over the canonical JSON
/// `{"ruleId","resourceIdentifier","tenantId","framework"}`.
///
/// The same rule failing on the same resource for the same tenant and
/// framework hashes identically across scans; that is what lets the finding
/// store reconcile re-occurrences.
pub fn finding_hash(
    rule_id: &str,
    resource_identifier: &str,
    tenant_id: &TenantId,
    framework: Framework,
) -> String {
    let key = FindingKey {
        rule_id,
        resource_identifier,
        tenant_id: tenant_id.as_str(),
        framework: framework.as_str(),
    };
    // Serialising borrowed strings into a Vec cannot fail.
    let canonical = serde_json::to_vec(&key).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}
