#![cfg(feature = "postgres")]
//! Behaviour of the Postgres adapters. Needs `DATABASE_URL` pointing at a
//! server where `sqlx::test` may create throwaway databases.

use anyhow::Result;
use chrono::{Duration, Utc};
use complyscan_core::database::infrastructure::{
    PostgresFindingRepository, PostgresScanJobRepository,
    PostgresTenantRepository,
};
use complyscan_core::{
    FindingRepository, ScanError, ScanJobRepository, TenantRepository,
    finding_hash,
};
use complyscan_model::{
    Finding, FindingFilter, FindingId, FindingStatus, Framework, PageRequest,
    ScanId, ScanJob, ScanProgress, ScanResults, ScanSettings, ScanStage,
    ScanStatus, ScanType, Severity, TenantId,
};
use serde_json::json;
use sqlx::PgPool;

async fn seed_tenant(pool: &PgPool, id: &str) {
    sqlx::query(
        "INSERT INTO tenants (id, name, default_account_id, default_regions) VALUES ($1, $2, $3, $4)",
    )
    .bind(id)
    .bind(format!("Tenant {id}"))
    .bind("123456789012")
    .bind(vec!["us-east-1"])
    .execute(pool)
    .await
    .expect("seed tenant");
}

fn job(tenant: &str) -> ScanJob {
    let now = Utc::now();
    ScanJob {
        id: ScanId::new(),
        tenant_id: TenantId::new(tenant),
        scan_type: ScanType::Full,
        status: ScanStatus::Initializing,
        account_id: "123456789012".into(),
        regions: vec!["us-east-1".into()],
        services: vec!["s3".into()],
        frameworks: vec![Framework::Soc2, Framework::Hipaa],
        progress: ScanProgress::default(),
        started_at: now,
        updated_at: now,
        completed_at: None,
        results: None,
        settings: ScanSettings::default(),
        requested_by: "auditor".into(),
        request_id: Some("req-1".into()),
    }
}

fn finding(tenant: &str, scan_id: ScanId, rule: &str, severity: Severity) -> Finding {
    let tenant_id = TenantId::new(tenant);
    let resource = "arn:aws:s3:::audit-logs";
    let hash = finding_hash(rule, resource, &tenant_id, Framework::Soc2);
    let now = Utc::now();
    Finding {
        id: FindingId::from_hash(&hash),
        tenant_id,
        scan_id,
        rule_id: rule.into(),
        resource_identifier: resource.into(),
        resource_type: "AWS::S3::Bucket".into(),
        service: "s3".into(),
        region: "us-east-1".into(),
        account_id: "123456789012".into(),
        severity,
        framework: Framework::Soc2,
        status: FindingStatus::Open,
        hash,
        title: Some(rule.into()),
        recommendation: None,
        first_seen: now,
        last_seen: now,
        count: 1,
        tags: vec!["s3".into()],
        metadata: json!({ "evidence": { "rule": rule } }),
    }
}

#[sqlx::test(migrator = "complyscan_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn tenant_lookup(pool: PgPool) -> Result<()> {
    seed_tenant(&pool, "acme").await;
    let tenants = PostgresTenantRepository::new(pool);

    let tenant = tenants
        .get_by_id(&TenantId::new("acme"))
        .await?
        .expect("seeded tenant");
    assert!(tenant.active);
    assert_eq!(tenant.default_regions, vec!["us-east-1".to_string()]);
    assert!(tenants.get_by_id(&TenantId::new("ghost")).await?.is_none());
    Ok(())
}

#[sqlx::test(migrator = "complyscan_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn job_lifecycle_respects_terminal_states(pool: PgPool) -> Result<()> {
    seed_tenant(&pool, "acme").await;
    let jobs = PostgresScanJobRepository::new(pool);

    let created = jobs.create(job("acme")).await?;
    let duplicate = jobs.create(created.clone()).await.unwrap_err();
    assert!(duplicate.is_conflict());

    let running = jobs
        .update_status(
            created.id,
            ScanStatus::InProgress,
            Some(ScanProgress::at(ScanStage::Discovery)),
        )
        .await?;
    assert_eq!(running.status, ScanStatus::InProgress);
    assert_eq!(running.progress.percentage, 10.0);

    assert!(
        jobs.update_progress(created.id, ScanProgress::at(ScanStage::ResultProcessing))
            .await?
    );
    // never backwards
    assert!(
        !jobs
            .update_progress(created.id, ScanProgress::at(ScanStage::RuleEvaluation))
            .await?
    );

    jobs.update_results(created.id, ScanResults::error("collector exploded"))
        .await?;
    let failed = jobs
        .update_status(created.id, ScanStatus::Failed, None)
        .await?;
    assert!(failed.completed_at.is_some());

    let reopen = jobs
        .update_status(created.id, ScanStatus::InProgress, None)
        .await
        .unwrap_err();
    assert!(reopen.is_conflict());
    assert!(
        jobs.update_results(created.id, ScanResults::error("late"))
            .await
            .unwrap_err()
            .is_conflict()
    );
    assert!(
        !jobs
            .update_progress(created.id, ScanProgress::at(ScanStage::Done))
            .await?
    );

    let stored = jobs.get_by_id(created.id).await?.expect("job persisted");
    assert_eq!(stored.status, ScanStatus::Failed);
    assert_eq!(stored.progress.stage, ScanStage::ResultProcessing);
    assert_eq!(
        stored.results.as_ref().and_then(ScanResults::error_message),
        Some("collector exploded")
    );
    assert_eq!(stored.frameworks, vec![Framework::Soc2, Framework::Hipaa]);

    let missing = jobs
        .update_progress(ScanId::new(), ScanProgress::at(ScanStage::Done))
        .await
        .unwrap_err();
    assert!(matches!(missing, ScanError::NotFound(_)));
    Ok(())
}

#[sqlx::test(migrator = "complyscan_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn jobs_page_newest_first(pool: PgPool) -> Result<()> {
    seed_tenant(&pool, "acme").await;
    seed_tenant(&pool, "globex").await;
    let jobs = PostgresScanJobRepository::new(pool);

    let base = Utc::now();
    let mut ids = Vec::new();
    for offset in 0..5 {
        let mut next = job("acme");
        next.started_at = base + Duration::seconds(offset);
        ids.push(jobs.create(next).await?.id);
    }
    jobs.create(job("globex")).await?;

    let tenant = TenantId::new("acme");
    let first = jobs
        .get_scan_jobs_by_tenant(&tenant, &PageRequest::first(2))
        .await?;
    assert_eq!(
        first.items.iter().map(|j| j.id).collect::<Vec<_>>(),
        vec![ids[4], ids[3]]
    );
    let token = first.continuation_token.expect("more pages");

    let second = jobs
        .get_scan_jobs_by_tenant(&tenant, &PageRequest::after(10, token))
        .await?;
    assert_eq!(
        second.items.iter().map(|j| j.id).collect::<Vec<_>>(),
        vec![ids[2], ids[1], ids[0]]
    );
    assert!(second.continuation_token.is_none());
    Ok(())
}

#[sqlx::test(migrator = "complyscan_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn findings_upsert_by_tenant_and_hash(pool: PgPool) -> Result<()> {
    seed_tenant(&pool, "acme").await;
    let findings = PostgresFindingRepository::new(pool.clone());
    let tenant = TenantId::new("acme");

    let first_scan = ScanId::new();
    let original = finding("acme", first_scan, "s3-encryption", Severity::High);
    let other = finding("acme", first_scan, "s3-versioning", Severity::Low);
    let written = findings
        .batch_write(vec![original.clone(), other.clone()])
        .await?;
    assert_eq!((written.created, written.updated), (2, 0));

    sqlx::query("UPDATE findings SET status = 'suppressed' WHERE hash = $1")
        .bind(&other.hash)
        .execute(&pool)
        .await?;

    let second_scan = ScanId::new();
    let mut again = finding("acme", second_scan, "s3-encryption", Severity::High);
    again.first_seen = original.first_seen + Duration::minutes(5);
    again.last_seen = again.first_seen;
    let suppressed_again = finding("acme", second_scan, "s3-versioning", Severity::Low);
    let written = findings
        .batch_write(vec![again.clone(), suppressed_again])
        .await?;
    assert_eq!((written.created, written.updated), (0, 2));

    let latest = findings
        .get_findings_by_tenant(&tenant, &FindingFilter::for_scan(second_scan))
        .await?;
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].severity, Severity::High);
    let merged = &latest[0];
    assert_eq!(merged.id, original.id);
    assert_eq!(merged.count, 2);
    assert_eq!(
        merged.first_seen.timestamp_micros(),
        original.first_seen.timestamp_micros()
    );
    assert_eq!(
        merged.last_seen.timestamp_micros(),
        again.last_seen.timestamp_micros()
    );
    assert_eq!(latest[1].status, FindingStatus::Suppressed);

    let stats = findings.get_finding_statistics(&tenant).await?;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.open, 1);
    assert_eq!(stats.suppressed, 1);
    assert_eq!(stats.by_severity.get(&Severity::High), Some(&1));
    Ok(())
}
