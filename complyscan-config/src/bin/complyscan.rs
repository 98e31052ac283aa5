use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use complyscan_config::{
    ComplyscanConfig, ConfigSource, build_orchestrator, init_tracing,
};
use complyscan_model::{
    Framework, ScanSettings, ScanType, StartScanRequest, TenantId,
};
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "complyscan", about = "Cloud compliance scan orchestrator")]
struct Cli {
    /// Load variables from this file before reading configuration
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    /// Configuration file; overrides $COMPLYSCAN_CONFIG_PATH and the
    /// default search
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a scan and optionally wait for its results
    Scan {
        #[arg(long)]
        tenant: String,
        /// Defaults to the tenant's account
        #[arg(long)]
        account: Option<String>,
        /// Repeatable; defaults to the tenant's, then the configured regions
        #[arg(long = "region")]
        regions: Vec<String>,
        /// Repeatable; defaults to every registered service
        #[arg(long = "service")]
        services: Vec<String>,
        /// Repeatable; defaults to every framework
        #[arg(long = "framework")]
        frameworks: Vec<Framework>,
        #[arg(long, default_value = "cli")]
        requested_by: String,
        #[arg(long)]
        request_id: Option<String>,
        /// Fetch per-resource configuration after discovery
        #[arg(long)]
        deep: bool,
        /// Tag stamped on every finding; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Block until the scan is terminal and print its results
        #[arg(long)]
        wait: bool,
        #[arg(long, default_value_t = 900)]
        timeout_secs: u64,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(complyscan_config::telemetry::DEFAULT_FILTER);
    let cli = Cli::parse();

    if let Some(path) = &cli.env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
    } else {
        let _ = dotenvy::dotenv();
    }

    let (config, source) = match &cli.config {
        Some(path) => (
            ComplyscanConfig::load_from_file(path)?,
            ConfigSource::File(path.clone()),
        ),
        None => ComplyscanConfig::load_from_env()?,
    };
    info!(source = ?source, "configuration loaded");

    match cli.command {
        Command::Config => {
            config.validate()?;
            println!("# source: {}", describe(&source));
            print!(
                "{}",
                toml::to_string_pretty(&config).context("failed to render config")?
            );
            Ok(())
        }
        Command::Scan {
            tenant,
            account,
            regions,
            services,
            frameworks,
            requested_by,
            request_id,
            deep,
            tags,
            wait,
            timeout_secs,
        } => {
            let orchestrator = build_orchestrator(&config).await?;
            let tenant_id = TenantId::new(tenant);
            let request = StartScanRequest {
                tenant_id: tenant_id.clone(),
                account_id: account,
                scan_type: if services.is_empty() {
                    ScanType::Full
                } else {
                    ScanType::Targeted
                },
                regions,
                services,
                frameworks,
                settings: ScanSettings {
                    custom_tags: tags,
                    deep_configuration: deep,
                    notify_on_completion: false,
                },
                requested_by,
            };

            let outcome = run_scan(
                &orchestrator,
                &tenant_id,
                request,
                request_id,
                wait,
                timeout_secs,
            )
            .await;
            orchestrator.shutdown().await?;
            outcome
        }
    }
}

async fn run_scan(
    orchestrator: &complyscan_core::ScanOrchestrator,
    tenant_id: &TenantId,
    request: StartScanRequest,
    request_id: Option<String>,
    wait: bool,
    timeout_secs: u64,
) -> Result<()> {
    let started = orchestrator.start_scan(request, request_id).await?;
    print_json(&started)?;
    if !wait {
        return Ok(());
    }

    let finished = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        orchestrator.wait_for_terminal(tenant_id, started.scan_id),
    )
    .await;
    let status = match finished {
        Ok(status) => status?,
        Err(_) => {
            orchestrator.cancel_scan(tenant_id, started.scan_id).await?;
            bail!(
                "scan {} did not finish within {timeout_secs}s and was cancelled",
                started.scan_id
            );
        }
    };
    info!(scan = %status.scan_id, status = %status.status, "scan finished");

    let results = orchestrator
        .get_scan_results(tenant_id, started.scan_id)
        .await?;
    print_json(&results)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn describe(source: &ConfigSource) -> String {
    match source {
        ConfigSource::Default => "defaults".to_string(),
        ConfigSource::EnvInline => format!("${}", complyscan_config::CONFIG_JSON_VAR),
        ConfigSource::EnvPath(path) | ConfigSource::File(path) => {
            path.display().to_string()
        }
    }
}
