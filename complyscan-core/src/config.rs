use serde::{Deserialize, Serialize};

/// Global knobs that tune orchestrator behaviour.
///
/// All fields carry defaults so deployments can supply a partial
/// configuration payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of scan pipelines executed concurrently by the runtime.
    pub worker_count: usize,
    /// Capacity of the submission queue feeding the workers.
    pub queue_capacity: usize,
    /// Maximum collector calls in flight for a single scan.
    pub max_concurrent_collectors: usize,
    /// Regions scanned when neither the request nor the tenant names any.
    pub default_regions: Vec<String>,
    /// Region used to reach account-scoped (global) services such as IAM.
    pub global_region: String,
    /// Prefix for the `scan_url` handed back by `start_scan`.
    pub api_base_url: String,
    /// Broadcast capacity for scan lifecycle events.
    pub event_channel_capacity: usize,
    /// Constants for the client-facing duration estimate.
    pub estimate: EstimateConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            max_concurrent_collectors: 16,
            default_regions: vec!["us-east-1".to_string()],
            global_region: "us-east-1".to_string(),
            api_base_url: "/api/v1".to_string(),
            event_channel_capacity: 1024,
            estimate: EstimateConfig::default(),
        }
    }
}

/// Seconds added to the estimate per scan dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimateConfig {
    pub base_secs: u64,
    pub per_region_secs: u64,
    pub per_service_secs: u64,
    pub per_framework_secs: u64,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            base_secs: 60,
            per_region_secs: 30,
            per_service_secs: 20,
            per_framework_secs: 15,
        }
    }
}

impl EstimateConfig {
    pub fn estimate(
        &self,
        regions: usize,
        services: usize,
        frameworks: usize,
    ) -> u64 {
        self.base_secs
            + self.per_region_secs * regions as u64
            + self.per_service_secs * services as u64
            + self.per_framework_secs * frameworks as u64
    }
}
