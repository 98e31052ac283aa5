use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use complyscan_core::database::infrastructure::InMemoryTenantRepository;
use complyscan_core::{
    CloudClientFactory, CommandRuleEvaluator, FixtureCloud,
    GatewayClientFactory, HttpRuleEvaluator, RuleEvaluator, ScanOrchestrator,
};
use tracing::{info, warn};

use crate::models::{CloudConfig, ComplyscanConfig, EvaluatorConfig};

pub fn cloud_from_config(
    cloud: &CloudConfig,
) -> anyhow::Result<Arc<dyn CloudClientFactory>> {
    Ok(match cloud {
        CloudConfig::Fixture { path } => Arc::new(
            FixtureCloud::from_path(path).with_context(|| {
                format!("failed to load cloud inventory {}", path.display())
            })?,
        ),
        CloudConfig::Gateway {
            endpoint,
            token,
            timeout_secs,
        } => Arc::new(GatewayClientFactory::new(
            endpoint,
            token.clone(),
            Duration::from_secs(*timeout_secs),
        )?),
    })
}

pub fn evaluator_from_config(
    evaluator: &EvaluatorConfig,
) -> anyhow::Result<Arc<dyn RuleEvaluator>> {
    Ok(match evaluator {
        EvaluatorConfig::Command { program, args } => {
            Arc::new(CommandRuleEvaluator::new(program.clone(), args.clone()))
        }
        EvaluatorConfig::Http {
            endpoint,
            timeout_secs,
        } => Arc::new(HttpRuleEvaluator::new(
            endpoint,
            Duration::from_secs(*timeout_secs),
        )?),
    })
}

/// Wire a [`ScanOrchestrator`] from configuration. Uses Postgres when a
/// database URL resolves, the in-memory stores otherwise.
pub async fn build_orchestrator(
    config: &ComplyscanConfig,
) -> anyhow::Result<ScanOrchestrator> {
    config.validate()?;
    let builder = ScanOrchestrator::builder(config.orchestrator.clone())
        .with_cloud(cloud_from_config(&config.cloud)?)
        .with_evaluator(evaluator_from_config(&config.evaluator)?);

    let database_url = config.database_url(|key| std::env::var(key).ok());
    let builder = match database_url {
        Some(url) => with_database(builder, config, &url).await?,
        None => {
            info!(
                tenants = config.tenants.len(),
                "no database configured, using in-memory stores"
            );
            builder.with_tenants(Arc::new(InMemoryTenantRepository::with_tenants(
                config.tenants.clone(),
            )))
        }
    };

    Ok(builder.build()?)
}

#[cfg(feature = "postgres")]
async fn with_database(
    builder: complyscan_core::ScanOrchestratorBuilder,
    config: &ComplyscanConfig,
    url: &str,
) -> anyhow::Result<complyscan_core::ScanOrchestratorBuilder> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("failed to connect to postgres")?;
    if config.database.run_migrations {
        complyscan_core::MIGRATOR
            .run(&pool)
            .await
            .context("failed to apply migrations")?;
    }
    if !config.tenants.is_empty() {
        warn!("configured tenants are ignored when a database is used");
    }
    info!(max_connections = config.database.max_connections, "using postgres stores");
    Ok(builder.with_postgres(pool))
}

#[cfg(not(feature = "postgres"))]
async fn with_database(
    _builder: complyscan_core::ScanOrchestratorBuilder,
    _config: &ComplyscanConfig,
    _url: &str,
) -> anyhow::Result<complyscan_core::ScanOrchestratorBuilder> {
    anyhow::bail!("a database URL is configured but postgres support is not compiled in")
}

#[cfg(test)]
mod tests {
    use super::*;
    use complyscan_model::{Tenant, TenantId};
    use tempfile::tempdir;

    #[tokio::test]
    async fn in_memory_wiring_serves_configured_tenants() {
        let dir = tempdir().unwrap();
        let inventory = dir.path().join("inventory.json");
        std::fs::write(&inventory, r#"{ "regions": {} }"#).unwrap();

        let config = ComplyscanConfig {
            cloud: CloudConfig::Fixture { path: inventory },
            tenants: vec![Tenant::new("acme", "Acme").with_account("1")],
            ..Default::default()
        };
        if config.database_url(|key| std::env::var(key).ok()).is_some() {
            // DATABASE_URL is set in this environment; wiring would go to postgres.
            return;
        }

        let orchestrator = build_orchestrator(&config).await.unwrap();
        let listed = orchestrator
            .list_scans(&TenantId::new("acme"), &Default::default())
            .await
            .unwrap();
        assert!(listed.items.is_empty());
        orchestrator.shutdown().await.unwrap();
    }

    #[test]
    fn missing_inventory_is_a_readable_error() {
        let err = cloud_from_config(&CloudConfig::Fixture {
            path: "/definitely/not/here.json".into(),
        })
        .err()
        .unwrap();
        assert!(format!("{err:#}").contains("/definitely/not/here.json"));
    }

    #[test]
    fn http_evaluator_rejects_bad_endpoint() {
        assert!(
            evaluator_from_config(&EvaluatorConfig::Http {
                endpoint: "::".into(),
                timeout_secs: 1,
            })
            .is_err()
        );
    }
}
