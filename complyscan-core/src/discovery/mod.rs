//! Resource discovery.
//!
//! A scan fans out one task per region; inside a region every requested
//! service runs as its own future. Account-scoped services are discovered
//! once, through the configured global region. A collector that errors or
//! panics becomes a [`CoverageGap`] and never takes its siblings down.

pub mod client;
pub mod collectors;
pub mod fixture;
pub mod gateway;
pub mod registry;

pub use client::{CloudClient, CloudClientFactory, Pagination, paginate};
pub use fixture::{FixtureCloud, FixtureInventory};
pub use gateway::GatewayClientFactory;
pub use registry::{CollectorRegistry, CollectorScope, ResourceCollector};

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use complyscan_model::{CloudResource, CoverageGap, ScanJob};
use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Result, ScanError};

/// Everything one scan's discovery produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryOutcome {
    pub resources: Vec<CloudResource>,
    pub failures: Vec<CoverageGap>,
}

impl DiscoveryOutcome {
    fn merge(&mut self, other: DiscoveryOutcome) {
        self.resources.extend(other.resources);
        self.failures.extend(other.failures);
    }

    fn gap(service: &str, region: &str, error: impl fmt::Display) -> CoverageGap {
        CoverageGap {
            service: service.to_string(),
            region: region.to_string(),
            error: error.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ResourceDiscovery {
    clients: Arc<dyn CloudClientFactory>,
    registry: Arc<CollectorRegistry>,
    max_concurrent_collectors: usize,
    global_region: String,
}

impl fmt::Debug for ResourceDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDiscovery")
            .field("registry", &self.registry)
            .field("max_concurrent_collectors", &self.max_concurrent_collectors)
            .field("global_region", &self.global_region)
            .finish()
    }
}

impl ResourceDiscovery {
    pub fn new(
        clients: Arc<dyn CloudClientFactory>,
        registry: Arc<CollectorRegistry>,
        max_concurrent_collectors: usize,
        global_region: impl Into<String>,
    ) -> Self {
        Self {
            clients,
            registry,
            max_concurrent_collectors: max_concurrent_collectors.max(1),
            global_region: global_region.into(),
        }
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    /// Enumerate the job's regions × services. Never fails as a whole:
    /// whatever could not be collected is reported in `failures`.
    pub async fn discover_resources(&self, job: &ScanJob) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();

        let requested = if job.services.is_empty() {
            self.registry.services()
        } else {
            job.services.clone()
        };
        let mut regional = Vec::new();
        let mut global = Vec::new();
        for service in &requested {
            match self.registry.get(service) {
                Some(collector) => match collector.scope() {
                    CollectorScope::Regional => regional.push(collector),
                    CollectorScope::Global => global.push(collector),
                },
                None => {
                    warn!(
                        target: "scan::discovery",
                        scan = %job.id,
                        service = %service,
                        "no collector registered"
                    );
                    outcome.failures.push(DiscoveryOutcome::gap(
                        service,
                        "*",
                        "no collector registered",
                    ));
                }
            }
        }

        let permits = Arc::new(Semaphore::new(self.max_concurrent_collectors));
        let deep = job.settings.deep_configuration;
        let mut tasks = JoinSet::new();

        if !regional.is_empty() {
            for region in &job.regions {
                tasks.spawn(self.clone().discover_region(
                    job.account_id.clone(),
                    region.clone(),
                    regional.clone(),
                    Arc::clone(&permits),
                    deep,
                ));
            }
        }
        if !global.is_empty() {
            tasks.spawn(self.clone().discover_region(
                job.account_id.clone(),
                self.global_region.clone(),
                global,
                Arc::clone(&permits),
                deep,
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(partial) => outcome.merge(partial),
                Err(err) => {
                    warn!(
                        target: "scan::discovery",
                        scan = %job.id,
                        error = %err,
                        "region task aborted"
                    );
                    outcome
                        .failures
                        .push(DiscoveryOutcome::gap("*", "*", err));
                }
            }
        }

        info!(
            target: "scan::discovery",
            scan = %job.id,
            resources = outcome.resources.len(),
            gaps = outcome.failures.len(),
            "discovery finished"
        );
        outcome
    }

    async fn discover_region(
        self,
        account_id: String,
        region: String,
        collectors: Vec<Arc<dyn ResourceCollector>>,
        permits: Arc<Semaphore>,
        deep_configuration: bool,
    ) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();
        let client = match self.clients.client(&account_id, &region).await {
            Ok(client) => client,
            Err(err) => {
                warn!(
                    target: "scan::discovery",
                    region = %region,
                    error = %err,
                    "cloud client unavailable for region"
                );
                outcome.failures.extend(
                    collectors
                        .iter()
                        .map(|c| DiscoveryOutcome::gap(c.service(), &region, &err)),
                );
                return outcome;
            }
        };

        let runs = collectors.iter().map(|collector| {
            let client = Arc::clone(&client);
            let permits = Arc::clone(&permits);
            async move {
                let service = collector.service();
                let Ok(_permit) = permits.acquire_owned().await else {
                    let closed = ScanError::Internal("collector limiter closed".into());
                    return (service, Err(closed));
                };
                let run = AssertUnwindSafe(async {
                    let mut resources = collector.discover_regional(client.as_ref()).await?;
                    if deep_configuration {
                        enrich(collector.as_ref(), client.as_ref(), &mut resources).await;
                    }
                    Ok::<_, ScanError>(resources)
                })
                .catch_unwind()
                .await;
                let result = run.unwrap_or_else(|panic| {
                    Err(ScanError::Internal(format!(
                        "collector panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });
                (service, result)
            }
        });

        for (service, result) in join_all(runs).await {
            match result {
                Ok(resources) => {
                    debug!(
                        target: "scan::discovery",
                        region = %region,
                        service,
                        count = resources.len(),
                        "collector finished"
                    );
                    outcome.resources.extend(resources);
                }
                Err(err) => {
                    warn!(
                        target: "scan::discovery",
                        region = %region,
                        service,
                        error = %err,
                        "collector failed, continuing without it"
                    );
                    outcome.failures.push(DiscoveryOutcome::gap(service, &region, err));
                }
            }
        }
        outcome
    }

    /// Deeper configuration for a single resource, fetched through a fresh
    /// client for the resource's account and region.
    pub async fn get_resource_configuration(
        &self,
        resource: &CloudResource,
    ) -> Result<Value> {
        let collector = self.registry.get(&resource.service).ok_or_else(|| {
            ScanError::NotFound(format!("collector for service {}", resource.service))
        })?;
        let region = match collector.scope() {
            CollectorScope::Global => self.global_region.as_str(),
            CollectorScope::Regional => resource.region.as_str(),
        };
        let client = self.clients.client(&resource.account_id, region).await?;
        collector.get_configuration(client.as_ref(), resource).await
    }
}

async fn enrich(
    collector: &dyn ResourceCollector,
    client: &dyn CloudClient,
    resources: &mut [CloudResource],
) {
    for resource in resources.iter_mut() {
        match collector.get_configuration(client, resource).await {
            Ok(configuration) => resource.attach_configuration(configuration),
            Err(err) => debug!(
                target: "scan::discovery",
                resource = %resource.identifier,
                error = %err,
                "configuration unavailable"
            ),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
