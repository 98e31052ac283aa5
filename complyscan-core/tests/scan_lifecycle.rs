mod support;

use std::collections::HashSet;

use complyscan_core::{ScanError, ScanEvent};
use complyscan_model::{
    Framework, PageRequest, ScanResults, ScanStatus, Severity,
    TenantId,
};
use support::{Harness, VolumeAndPolicyRules, events_until_terminal, request};

#[tokio::test]
async fn full_scan_reports_findings_gaps_and_score() {
    let harness = Harness::new(VolumeAndPolicyRules::default());
    let mut events = harness.orchestrator.subscribe();

    let started = harness
        .orchestrator
        .start_scan(
            request(&["ec2", "rds", "iam"], &["us-east-1", "eu-west-1"]),
            Some("req-42".into()),
        )
        .await
        .expect("scan accepted");
    assert_eq!(started.status, ScanStatus::Initializing);
    assert!(started.scan_url.ends_with(&format!("/scans/{}", started.scan_id)));

    let done = harness.wait(started.scan_id).await;
    assert_eq!(done.status, ScanStatus::Completed);
    assert_eq!(done.progress.percentage, 100.0);
    assert!(done.completed_at.is_some());

    let view = harness
        .orchestrator
        .get_scan_results(&harness.tenant(), started.scan_id)
        .await
        .expect("results readable");
    let summary = view
        .results
        .as_ref()
        .and_then(ScanResults::summary)
        .expect("completed scan carries a summary");

    // two volumes plus the account password policy
    assert_eq!(summary.total_resources, 3);
    assert_eq!(summary.rules_evaluated, 4);
    assert_eq!(summary.total_findings, 3);
    assert_eq!(summary.by_severity[&Severity::Critical], 1);
    assert_eq!(summary.by_severity[&Severity::High], 1);
    assert_eq!(summary.by_severity[&Severity::Medium], 1);
    assert_eq!(summary.by_severity[&Severity::Low], 0);
    assert_eq!(summary.by_framework[&Framework::Soc2], 2);
    assert_eq!(summary.by_framework[&Framework::Hipaa], 1);
    assert_eq!(summary.by_region["us-east-1"], 2);
    assert_eq!(summary.by_region["global"], 1);
    // (10 + 5 + 2) against a budget of 30
    assert_eq!(summary.compliance_score, 43.33);

    assert_eq!(summary.coverage_gaps.len(), 1);
    let gap = &summary.coverage_gaps[0];
    assert_eq!((gap.service.as_str(), gap.region.as_str()), ("rds", "eu-west-1"));
    assert!(gap.error.contains("AccessDenied"));

    assert_eq!(view.findings.len(), 3);
    assert_eq!(view.findings[0].severity, Severity::Critical);
    let defaulted = view
        .findings
        .iter()
        .find(|f| f.rule_id == "ebs-snapshot-policy")
        .expect("unrecognised verdict still becomes a finding");
    assert_eq!(defaulted.severity, Severity::Medium);
    assert_eq!(defaulted.framework, Framework::Soc2);
    assert_eq!(defaulted.metadata["raw_severity"], "urgent");

    let lifecycle = events_until_terminal(&mut events, started.scan_id).await;
    assert!(matches!(lifecycle.first(), Some(ScanEvent::Started { .. })));
    let percentages: Vec<f64> = lifecycle
        .iter()
        .filter_map(|event| match event {
            ScanEvent::Progress { progress, .. } => Some(progress.percentage),
            _ => None,
        })
        .collect();
    assert_eq!(percentages, vec![10.0, 30.0, 70.0, 90.0]);
    assert!(matches!(
        lifecycle.last(),
        Some(ScanEvent::Completed { total_findings: 3, .. })
    ));

    harness.orchestrator.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn rescanning_continues_existing_findings() {
    let harness = Harness::new(VolumeAndPolicyRules::default());
    let tenant = harness.tenant();

    let first = harness
        .orchestrator
        .start_scan(request(&["ec2"], &["us-east-1"]), None)
        .await
        .expect("first scan accepted");
    harness.wait(first.scan_id).await;
    let before = harness
        .orchestrator
        .get_scan_results(&tenant, first.scan_id)
        .await
        .expect("first results")
        .findings;
    assert_eq!(before.len(), 2);

    let second = harness
        .orchestrator
        .start_scan(request(&["ec2"], &["us-east-1"]), None)
        .await
        .expect("second scan accepted");
    harness.wait(second.scan_id).await;
    let after = harness
        .orchestrator
        .get_scan_results(&tenant, second.scan_id)
        .await
        .expect("second results")
        .findings;
    assert_eq!(after.len(), 2);

    for old in &before {
        let new = after
            .iter()
            .find(|f| f.hash == old.hash)
            .expect("same rule and resource hash identically");
        assert_eq!(new.id, old.id);
        assert_eq!(new.first_seen, old.first_seen);
        assert!(new.last_seen >= old.last_seen);
        assert_eq!(new.count, 2);
        assert_eq!(new.scan_id, second.scan_id);
    }

    let stats = harness
        .orchestrator
        .finding_statistics(&tenant)
        .await
        .expect("statistics");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.open, 2);

    // the first scan's filter no longer matches: findings follow the latest scan
    let stale = harness
        .orchestrator
        .get_scan_results(&tenant, first.scan_id)
        .await
        .expect("first results still readable");
    assert!(stale.findings.is_empty());
    let stale_summary = stale
        .results
        .as_ref()
        .and_then(ScanResults::summary)
        .expect("first summary kept");
    assert_eq!(stale_summary.total_findings, 2);

    harness.orchestrator.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn cancelling_a_completed_scan_conflicts() {
    let harness = Harness::new(VolumeAndPolicyRules::default());
    let tenant = harness.tenant();
    let started = harness
        .orchestrator
        .start_scan(request(&["iam"], &[]), None)
        .await
        .expect("scan accepted");
    assert_eq!(harness.wait(started.scan_id).await.status, ScanStatus::Completed);

    let err = harness
        .orchestrator
        .cancel_scan(&tenant, started.scan_id)
        .await
        .expect_err("terminal scans cannot be cancelled");
    assert!(matches!(err, ScanError::Conflict(_)));

    let status = harness
        .orchestrator
        .get_scan_status(&tenant, started.scan_id)
        .await
        .expect("status readable");
    assert_eq!(status.status, ScanStatus::Completed);

    harness.orchestrator.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn evaluator_failure_marks_scan_failed() {
    let harness = Harness::new(VolumeAndPolicyRules::failing());
    let mut events = harness.orchestrator.subscribe();
    let started = harness
        .orchestrator
        .start_scan(request(&["ec2"], &["us-east-1"]), None)
        .await
        .expect("scan accepted");

    let done = harness.wait(started.scan_id).await;
    assert_eq!(done.status, ScanStatus::Failed);
    assert!(
        done.error
            .as_deref()
            .is_some_and(|e| e.contains("rule pack failed to load"))
    );

    let view = harness
        .orchestrator
        .get_scan_results(&harness.tenant(), started.scan_id)
        .await
        .expect("results readable");
    assert!(view.results.as_ref().and_then(ScanResults::summary).is_none());
    assert!(view.findings.is_empty());

    let lifecycle = events_until_terminal(&mut events, started.scan_id).await;
    assert!(matches!(lifecycle.last(), Some(ScanEvent::Failed { .. })));

    harness.orchestrator.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn scans_are_tenant_scoped() {
    let harness = Harness::new(VolumeAndPolicyRules::default());

    let mut ghost = request(&[], &[]);
    ghost.tenant_id = TenantId::new("initech");
    let err = harness
        .orchestrator
        .start_scan(ghost, None)
        .await
        .expect_err("unknown tenant");
    assert!(matches!(err, ScanError::NotFound(_)));

    let started = harness
        .orchestrator
        .start_scan(request(&["iam"], &[]), None)
        .await
        .expect("scan accepted");
    harness.wait(started.scan_id).await;

    let other = TenantId::new("globex");
    assert!(matches!(
        harness.orchestrator.get_scan_status(&other, started.scan_id).await,
        Err(ScanError::NotFound(_))
    ));
    assert!(matches!(
        harness.orchestrator.cancel_scan(&other, started.scan_id).await,
        Err(ScanError::NotFound(_))
    ));
    let listed = harness
        .orchestrator
        .list_scans(&other, &PageRequest::default())
        .await
        .expect("listing");
    assert!(listed.items.is_empty());

    harness.orchestrator.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn list_scans_pages_newest_first() {
    let harness = Harness::new(VolumeAndPolicyRules::default());
    let tenant = harness.tenant();

    let mut started = Vec::new();
    for _ in 0..3 {
        let response = harness
            .orchestrator
            .start_scan(request(&["iam"], &[]), None)
            .await
            .expect("scan accepted");
        harness.wait(response.scan_id).await;
        started.push(response.scan_id);
    }

    let first = harness
        .orchestrator
        .list_scans(&tenant, &PageRequest::first(2))
        .await
        .expect("first page");
    assert_eq!(first.items.len(), 2);
    let token = first
        .continuation_token
        .clone()
        .expect("more scans remain");
    assert!(first.items[0].started_at >= first.items[1].started_at);

    let second = harness
        .orchestrator
        .list_scans(&tenant, &PageRequest::after(2, token))
        .await
        .expect("second page");
    assert_eq!(second.items.len(), 1);
    assert!(second.continuation_token.is_none());

    let seen: HashSet<_> = first
        .items
        .iter()
        .chain(second.items.iter())
        .map(|s| s.scan_id)
        .collect();
    assert_eq!(seen, started.iter().copied().collect());
    assert_eq!(second.items[0].scan_id, started[0]);

    let err = harness
        .orchestrator
        .list_scans(&tenant, &PageRequest::after(2, "not-a-token"))
        .await
        .expect_err("garbage token");
    assert!(matches!(err, ScanError::Validation(_)));

    harness.orchestrator.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn global_services_are_discovered_once() {
    let harness = Harness::new(VolumeAndPolicyRules::default());
    let started = harness
        .orchestrator
        .start_scan(
            request(&["iam"], &["us-east-1", "eu-west-1", "ap-south-1"]),
            None,
        )
        .await
        .expect("scan accepted");
    harness.wait(started.scan_id).await;

    let findings = harness.findings_for(started.scan_id).await;
    assert_eq!(findings.len(), 1, "one password policy regardless of region count");
    // ListUsers, ListRoles, GetAccountPasswordPolicy
    assert_eq!(harness.cloud.calls(), 3);

    harness.orchestrator.shutdown().await.expect("clean shutdown");
}
