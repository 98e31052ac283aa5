use async_trait::async_trait;
use complyscan_model::{
    Finding, FindingFilter, FindingStatistics, FindingStatus, TenantId,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Outcome of a reconciling batch write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub created: usize,
    pub updated: usize,
}

/// Repository port for the tenant finding store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FindingRepository: Send + Sync {
    /// Upsert findings keyed by `(tenant_id, hash)`. A hash already present
    /// for the tenant is a continuation of that finding, see
    /// [`reconcile_finding`].
    async fn batch_write(&self, findings: Vec<Finding>) -> Result<WriteSummary>;

    async fn get_findings_by_tenant(
        &self,
        tenant_id: &TenantId,
        filter: &FindingFilter,
    ) -> Result<Vec<Finding>>;

    async fn get_finding_statistics(
        &self,
        tenant_id: &TenantId,
    ) -> Result<FindingStatistics>;
}

/// Merge a re-occurring finding into its stored predecessor.
///
/// Identity (`id`, `first_seen`) and the triage decision for suppressed
/// findings are kept; everything describing the latest observation comes from
/// `incoming`. Resolved findings reopen.
pub fn reconcile_finding(existing: &Finding, incoming: Finding) -> Finding {
    let status = match existing.status {
        FindingStatus::Suppressed => FindingStatus::Suppressed,
        FindingStatus::Open | FindingStatus::Resolved => FindingStatus::Open,
    };
    Finding {
        id: existing.id,
        first_seen: existing.first_seen.min(incoming.first_seen),
        last_seen: existing.last_seen.max(incoming.last_seen),
        count: existing.count.saturating_add(1),
        status,
        ..incoming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use complyscan_model::{FindingId, Framework, ScanId, Severity};

    fn finding(status: FindingStatus) -> Finding {
        let now = Utc::now();
        Finding {
            id: FindingId::from_hash("abc"),
            tenant_id: TenantId::new("t"),
            scan_id: ScanId::new(),
            rule_id: "s3-encryption".into(),
            resource_identifier: "arn:aws:s3:::b".into(),
            resource_type: "AWS::S3::Bucket".into(),
            service: "s3".into(),
            region: "us-east-1".into(),
            account_id: "1".into(),
            severity: Severity::High,
            framework: Framework::Soc2,
            status,
            hash: "abc".into(),
            title: None,
            recommendation: None,
            first_seen: now,
            last_seen: now,
            count: 1,
            tags: vec![],
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn reconcile_keeps_identity_and_advances_last_seen() {
        let mut old = finding(FindingStatus::Resolved);
        old.first_seen = Utc::now() - Duration::days(3);
        old.last_seen = old.first_seen;
        let new = finding(FindingStatus::Open);
        let new_scan = new.scan_id;

        let merged = reconcile_finding(&old, new.clone());
        assert_eq!(merged.first_seen, old.first_seen);
        assert_eq!(merged.last_seen, new.last_seen);
        assert_eq!(merged.count, 2);
        assert_eq!(merged.status, FindingStatus::Open);
        assert_eq!(merged.scan_id, new_scan);
    }

    #[test]
    fn suppressed_findings_stay_suppressed() {
        let old = finding(FindingStatus::Suppressed);
        let merged = reconcile_finding(&old, finding(FindingStatus::Open));
        assert_eq!(merged.status, FindingStatus::Suppressed);
    }
}
