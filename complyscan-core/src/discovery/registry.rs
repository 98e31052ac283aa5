use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use complyscan_model::CloudResource;
use serde_json::Value;

use super::client::CloudClient;
use super::collectors;
use crate::error::Result;

/// Whether a service is enumerated per region or once per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorScope {
    Regional,
    /// Discovered once per scan through the configured global region.
    Global,
}

/// Enumerates the resources of one cloud service.
#[async_trait]
pub trait ResourceCollector: Send + Sync {
    /// Service name used in scan requests, findings and coverage gaps.
    fn service(&self) -> &'static str;

    fn scope(&self) -> CollectorScope {
        CollectorScope::Regional
    }

    /// List every resource of this service visible through `client`,
    /// restricted to the client's region for regional services.
    async fn discover_regional(
        &self,
        client: &dyn CloudClient,
    ) -> Result<Vec<CloudResource>>;

    /// Deeper configuration for one resource. Sub-documents that cannot be
    /// fetched come back as `null`.
    async fn get_configuration(
        &self,
        client: &dyn CloudClient,
        resource: &CloudResource,
    ) -> Result<Value>;
}

/// Named collectors, iterated in service-name order.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: BTreeMap<String, Arc<dyn ResourceCollector>>,
}

impl fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("services", &self.services())
            .finish()
    }
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in collector.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_collector(collectors::Ec2Collector)
            .with_collector(collectors::S3Collector)
            .with_collector(collectors::RdsCollector)
            .with_collector(collectors::LambdaCollector)
            .with_collector(collectors::DynamoDbCollector)
            .with_collector(collectors::KmsCollector)
            .with_collector(collectors::CloudTrailCollector)
            .with_collector(collectors::IamCollector)
    }

    pub fn with_collector<C: ResourceCollector + 'static>(
        mut self,
        collector: C,
    ) -> Self {
        self.register(Arc::new(collector));
        self
    }

    /// Adds or replaces the collector for its service.
    pub fn register(&mut self, collector: Arc<dyn ResourceCollector>) {
        self.collectors
            .insert(collector.service().to_string(), collector);
    }

    pub fn get(&self, service: &str) -> Option<Arc<dyn ResourceCollector>> {
        self.collectors.get(service).cloned()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.collectors.contains_key(service)
    }

    pub fn services(&self) -> Vec<String> {
        self.collectors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}
