use std::path::PathBuf;

use complyscan_core::OrchestratorConfig;
use complyscan_model::Tenant;
use serde::{Deserialize, Serialize};

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    10
}

/// Where the configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Everything needed to assemble a scan orchestrator.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ComplyscanConfig {
    /// Worker pool, collector concurrency, default regions and estimate
    /// constants.
    pub orchestrator: OrchestratorConfig,
    pub cloud: CloudConfig,
    pub evaluator: EvaluatorConfig,
    pub database: DatabaseConfig,
    /// Tenants served by the in-memory tenant store. Ignored when a database
    /// is configured.
    pub tenants: Vec<Tenant>,
}

/// How describe calls reach the cloud provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloudConfig {
    /// Answer from an inventory document on disk.
    Fixture { path: PathBuf },
    /// Forward to a read-only describe gateway.
    Gateway {
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Default for CloudConfig {
    fn default() -> Self {
        CloudConfig::Fixture {
            path: PathBuf::from("inventory.json"),
        }
    }
}

/// Where rule verdicts come from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluatorConfig {
    /// Spawn a program per scan; request on stdin, verdicts on stdout.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Http {
        endpoint: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig::Command {
            program: "complyscan-rules".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL. Falls back to `$DATABASE_URL`; without either the
    /// in-memory stores are used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub max_connections: u32,
    /// Apply the embedded migrations on startup.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            run_migrations: true,
        }
    }
}
