//! Shared fixtures for core integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use complyscan_core::database::infrastructure::{
    InMemoryFindingRepository, InMemoryScanJobRepository,
    InMemoryTenantRepository,
};
use complyscan_core::{
    FindingRepository, FixtureCloud, OrchestratorConfig, Result, RuleEvaluator,
    ScanError, ScanEvent, ScanOrchestrator,
};
use complyscan_model::{
    CloudResource, EvaluationContext, Finding, FindingFilter, RuleResult, ScanId,
    ScanStatusView, StartScanRequest, Tenant, TenantId,
};
use tokio::sync::broadcast;
use serde_json::json;

pub const TENANT: &str = "acme";
pub const ACCOUNT: &str = "123456789012";
pub const WAIT: Duration = Duration::from_secs(10);

/// Two volumes in us-east-1 (one unencrypted), an account without a password
/// policy and an RDS API that denies access in eu-west-1.
pub fn inventory() -> FixtureCloud {
    FixtureCloud::from_value(json!({
        "regions": {
            "us-east-1": {
                "ec2": {
                    "DescribeVolumes": { "pages": [
                        { "Volumes": [
                            { "VolumeId": "vol-plain", "Encrypted": false, "Size": 100 }
                          ], "NextToken": "1" },
                        { "Volumes": [
                            { "VolumeId": "vol-sealed", "Encrypted": true, "Size": 8 }
                        ] }
                    ] }
                }
            }
        },
        "failures": [
            { "region": "eu-west-1", "service": "rds", "message": "AccessDenied" }
        ]
    }))
    .expect("inventory parses")
}

/// Flags unencrypted volumes (critical) and a missing password policy
/// (high). Encrypted volumes get a verdict with a severity and framework
/// nobody recognises.
#[derive(Debug, Default)]
pub struct VolumeAndPolicyRules {
    fail: AtomicBool,
}

impl VolumeAndPolicyRules {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
        }
    }
}

fn verdict(
    rule_id: &str,
    resource: &CloudResource,
    compliant: bool,
    severity: &str,
    framework: &str,
) -> RuleResult {
    RuleResult {
        rule_id: rule_id.to_string(),
        resource_identifier: resource.identifier.clone(),
        compliant,
        severity: severity.to_string(),
        framework: framework.to_string(),
        evidence: resource.metadata.clone(),
        recommendation: None,
        title: Some(rule_id.to_string()),
        description: None,
    }
}

#[async_trait]
impl RuleEvaluator for VolumeAndPolicyRules {
    async fn execute_rules(
        &self,
        resources: &[CloudResource],
        _context: &EvaluationContext,
    ) -> Result<Vec<RuleResult>> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(ScanError::Evaluation("rule pack failed to load".into()));
        }
        let mut results = Vec::new();
        for resource in resources {
            match resource.resource_type.as_str() {
                "AWS::EC2::Volume" => {
                    let encrypted = resource.metadata["encrypted"] == json!(true);
                    results.push(verdict(
                        "ebs-encryption",
                        resource,
                        encrypted,
                        "critical",
                        "SOC2",
                    ));
                    if encrypted {
                        results.push(verdict(
                            "ebs-snapshot-policy",
                            resource,
                            false,
                            "urgent",
                            "house-rules",
                        ));
                    }
                }
                "AWS::IAM::AccountPasswordPolicy" => results.push(verdict(
                    "iam-password-policy",
                    resource,
                    resource.metadata["configured"] == json!(true),
                    "HIGH",
                    "hipaa",
                )),
                _ => {}
            }
        }
        Ok(results)
    }
}

pub struct Harness {
    pub orchestrator: ScanOrchestrator,
    pub jobs: Arc<InMemoryScanJobRepository>,
    pub findings: Arc<InMemoryFindingRepository>,
    pub cloud: FixtureCloud,
}

impl Harness {
    pub fn new(evaluator: impl RuleEvaluator + 'static) -> Self {
        let tenants = InMemoryTenantRepository::with_tenants([
            Tenant::new(TENANT, "Acme")
                .with_account(ACCOUNT)
                .with_regions(["us-east-1"]),
            Tenant::new("globex", "Globex").with_account("210987654321"),
        ]);
        let jobs = Arc::new(InMemoryScanJobRepository::new());
        let findings = Arc::new(InMemoryFindingRepository::new());
        let cloud = inventory();
        let orchestrator = ScanOrchestrator::builder(OrchestratorConfig {
            worker_count: 2,
            ..OrchestratorConfig::default()
        })
        .with_tenants(Arc::new(tenants))
        .with_jobs(jobs.clone())
        .with_findings(findings.clone())
        .with_cloud(Arc::new(cloud.clone()))
        .with_evaluator(Arc::new(evaluator))
        .build()
        .expect("orchestrator builds");
        Self {
            orchestrator,
            jobs,
            findings,
            cloud,
        }
    }

    pub fn tenant(&self) -> TenantId {
        TenantId::new(TENANT)
    }

    pub async fn findings_for(&self, scan_id: ScanId) -> Vec<Finding> {
        self.findings
            .get_findings_by_tenant(&self.tenant(), &FindingFilter::for_scan(scan_id))
            .await
            .expect("findings readable")
    }

    pub async fn wait(&self, scan_id: ScanId) -> ScanStatusView {
        tokio::time::timeout(
            WAIT,
            self.orchestrator.wait_for_terminal(&self.tenant(), scan_id),
        )
        .await
        .expect("scan reaches a terminal state")
        .expect("scan status readable")
    }
}

/// Events for `scan_id` up to and including its terminal event.
pub async fn events_until_terminal(
    events: &mut broadcast::Receiver<ScanEvent>,
    scan_id: ScanId,
) -> Vec<ScanEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("terminal event published")
            .expect("event bus open");
        if event.scan_id() != scan_id {
            continue;
        }
        let terminal = event.is_terminal();
        seen.push(event);
        if terminal {
            return seen;
        }
    }
}

pub fn request(services: &[&str], regions: &[&str]) -> StartScanRequest {
    StartScanRequest {
        tenant_id: TenantId::new(TENANT),
        account_id: None,
        scan_type: Default::default(),
        regions: regions.iter().map(|r| r.to_string()).collect(),
        services: services.iter().map(|s| s.to_string()).collect(),
        frameworks: Vec::new(),
        settings: Default::default(),
        requested_by: "auditor@acme.test".to_string(),
    }
}
