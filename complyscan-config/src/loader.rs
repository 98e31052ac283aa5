use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};

use crate::models::{
    CloudConfig, ComplyscanConfig, ConfigSource, EvaluatorConfig,
};

pub const CONFIG_PATH_VAR: &str = "COMPLYSCAN_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "COMPLYSCAN_CONFIG_JSON";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

const CANDIDATES: &[&str] = &[
    "complyscan.toml",
    "complyscan.json",
    "config/complyscan.toml",
    "config/complyscan.json",
];

impl ComplyscanConfig {
    /// Load configuration using environment variables.
    /// Evaluation order:
    /// 1) `$COMPLYSCAN_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$COMPLYSCAN_CONFIG_JSON` (inline JSON),
    /// 3) the first of `complyscan.{toml,json}` / `config/complyscan.{toml,json}`
    ///    in the working directory,
    /// 4) defaults if none of the above exist.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        Self::load_with(|key| env::var(key).ok(), Path::new("."))
    }

    /// [`ComplyscanConfig::load_from_env`] with an injectable variable
    /// lookup and search directory.
    pub fn load_with(
        lookup: impl Fn(&str) -> Option<String>,
        search_dir: &Path,
    ) -> anyhow::Result<(Self, ConfigSource)> {
        if let Some(path_str) = lookup(CONFIG_PATH_VAR)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str.trim());
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = lookup(CONFIG_JSON_VAR)
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            return Ok((parsed, ConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file(search_dir) {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read complyscan config from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents).with_context(|| {
                format!("invalid complyscan config {}", path.display())
            }),
            Some("toml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid complyscan config {}: {}", path.display(), err)
            }),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// TOML first, then JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse complyscan config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| anyhow!("invalid complyscan config json: {err}"))
    }

    fn find_default_file(dir: &Path) -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(|candidate| dir.join(candidate))
            .find(|path| path.exists())
    }

    /// Configured URL, else `$DATABASE_URL`. Blank values count as unset.
    pub fn database_url(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        self.database
            .url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| lookup(DATABASE_URL_VAR).filter(|url| !url.trim().is_empty()))
    }

    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let orchestrator = &self.orchestrator;
        if orchestrator.worker_count == 0 {
            bail!("orchestrator.worker_count must be at least 1");
        }
        if orchestrator.queue_capacity == 0 {
            bail!("orchestrator.queue_capacity must be at least 1");
        }
        if orchestrator.max_concurrent_collectors == 0 {
            bail!("orchestrator.max_concurrent_collectors must be at least 1");
        }
        if orchestrator.default_regions.iter().all(|r| r.trim().is_empty()) {
            bail!("orchestrator.default_regions must name at least one region");
        }
        if orchestrator.global_region.trim().is_empty() {
            bail!("orchestrator.global_region must not be empty");
        }

        match &self.cloud {
            CloudConfig::Fixture { path } if path.as_os_str().is_empty() => {
                bail!("cloud.path must not be empty")
            }
            CloudConfig::Gateway { endpoint, .. } if endpoint.trim().is_empty() => {
                bail!("cloud.endpoint must not be empty")
            }
            _ => {}
        }
        match &self.evaluator {
            EvaluatorConfig::Command { program, .. } if program.trim().is_empty() => {
                bail!("evaluator.program must not be empty")
            }
            EvaluatorConfig::Http { endpoint, .. } if endpoint.trim().is_empty() => {
                bail!("evaluator.endpoint must not be empty")
            }
            _ => {}
        }

        let mut seen = HashSet::new();
        for tenant in &self.tenants {
            if tenant.id.as_str().trim().is_empty() {
                bail!("tenant ids must not be empty");
            }
            if !seen.insert(tenant.id.as_str()) {
                bail!("tenant {} is configured twice", tenant.id);
            }
        }
        Ok(())
    }
}
