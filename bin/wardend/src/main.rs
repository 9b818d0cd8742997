//! ---
//! warden_section: "05-daemon"
//! warden_subsection: "binary"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Binary entrypoint for the warden daemon."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use warden_common::config::AppConfig;
use warden_common::{init_tracing, LogFormat, NotificationConfig, ServiceConfig};
use warden_metrics::{new_registry, spawn_http_server, DaemonMetrics, RedundancyMetrics};
use warden_redundancy::{
    NotificationSink, RedundancyController, TracingNotificationSink, WebhookNotificationSink,
};
use warden_runtime::{DockerCliGateway, RuntimeGateway, StaticCatalog};

mod api;

use api::{spawn_api_server, ApiServer, ApiState};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Fleet Warden redundancy and self-healing daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override the configured stdout log format")]
    log_format: Option<CliLogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Json,
    Pretty,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Json => LogFormat::StructuredJson,
            CliLogFormat::Pretty => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Commands {
    #[command(about = "Run the monitoring loop until interrupted")]
    Run,
    #[command(about = "Load and validate the configuration, then exit")]
    CheckConfig,
    #[command(about = "Print a starter configuration to stdout")]
    PrintDefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::PrintDefaultConfig => {
            print!("{}", starter_config()?);
            Ok(())
        }
        Commands::CheckConfig => {
            let loaded = load_config(&cli)?;
            let redundancy = &loaded.config.redundancy;
            println!(
                "{}: ok ({} services, threshold {}, interval {}s)",
                loaded.source.display(),
                redundancy.services.len(),
                redundancy.failure_threshold,
                redundancy.health_check_interval.as_secs()
            );
            Ok(())
        }
        Commands::Run => {
            let loaded = load_config(&cli)?;
            run_daemon(loaded.config, loaded.source, loaded.load_duration).await
        }
    }
}

struct LoadedConfig {
    config: AppConfig,
    source: PathBuf,
    load_duration: Duration,
}

fn load_config(cli: &Cli) -> Result<LoadedConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/warden.toml"));
    candidates.push(PathBuf::from("/etc/warden/warden.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }
    Ok(LoadedConfig {
        config,
        source: loaded.source,
        load_duration: load_started.elapsed(),
    })
}

async fn run_daemon(config: AppConfig, config_path: PathBuf, load_duration: Duration) -> Result<()> {
    init_tracing("wardend", &config.logging)?;
    info!(
        config_path = %config_path.display(),
        services = config.redundancy.services.len(),
        "configuration loaded"
    );

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.inc_start();
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.set_build_info(VERSION, build_profile());
    daemon_metrics.set_start_time(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_secs_f64())
            .unwrap_or_default(),
    );
    let redundancy_metrics = RedundancyMetrics::new(registry.clone())?;

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let gateway: Arc<dyn RuntimeGateway> = Arc::new(DockerCliGateway::new(
        config.runtime.docker_binary.clone(),
        config.runtime.compose_project.clone(),
    ));
    let catalog = Arc::new(StaticCatalog::new(config.redundancy.service_names()));
    let sink = notification_sink(&config.notification)?;
    let controller = Arc::new(
        RedundancyController::new(
            config.redundancy.clone(),
            gateway,
            catalog,
            sink,
            Some(redundancy_metrics),
        )
        .context("failed to construct redundancy controller")?,
    );
    controller.start()?;

    let mut api_server: Option<ApiServer> = None;
    if config.api.enabled {
        let state = Arc::new(ApiState::new(Arc::clone(&controller), VERSION));
        match spawn_api_server(state, config.api.listen) {
            Ok(server) => {
                info!(address = %server.addr(), "api server listening");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    controller.stop().await;

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn notification_sink(config: &NotificationConfig) -> Result<Arc<dyn NotificationSink>> {
    match &config.webhook_url {
        Some(url) => {
            info!(url = %url, "emergency plans will be posted to webhook");
            Ok(Arc::new(WebhookNotificationSink::new(
                url.clone(),
                config.timeout,
            )?))
        }
        None => {
            info!("no webhook configured; emergency plans are logged only");
            Ok(Arc::new(TracingNotificationSink))
        }
    }
}

fn build_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}

/// Default configuration with a primary/backup pair filled in as a template.
fn starter_config() -> Result<String> {
    let mut config = AppConfig::default();
    config
        .redundancy
        .services
        .insert("app-primary".to_owned(), ServiceConfig::default());
    config
        .redundancy
        .services
        .insert("app-backup".to_owned(), ServiceConfig::default());
    toml::to_string_pretty(&config).context("failed to render default configuration")
}
