//! Spendwatch CLI
//!
//! Runs the alert evaluation loop and its maintenance commands.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use spendwatch::alerting::{AlertEngine, HttpNotifier, Stores};
use spendwatch::config::LoggingConfig;
use spendwatch::db::{AlertEventSink, NoopEventSink, PgStore, PostgresPool, RedisEventPublisher, RedisPool};
use spendwatch::Config;

/// Spendwatch - alerting for AI spend
#[derive(Parser)]
#[command(name = "spendwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "SPENDWATCH_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the evaluation loop until interrupted
    Run {
        /// Organizations to evaluate (defaults to engine.organizations)
        #[arg(long = "org")]
        orgs: Vec<String>,
    },

    /// Run a single evaluation pass for one organization
    Evaluate {
        /// Organization id
        #[arg(long)]
        org: String,
    },

    /// Run the auto-resolution and snooze sweeps once
    Sweep {
        /// Organizations to sweep (defaults to engine.organizations)
        #[arg(long = "org")]
        orgs: Vec<String>,
    },

    /// Validate the configuration and print the effective settings
    CheckConfig,

    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging, cli.verbose);

    let result = match cli.command {
        Commands::Run { orgs } => run_engine(config, orgs).await,
        Commands::Evaluate { org } => run_evaluate(config, &org).await,
        Commands::Sweep { orgs } => run_sweep(config, orgs).await,
        Commands::CheckConfig => check_config(&config),
        Commands::Migrate => run_migrate(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn install_metrics(config: &Config) -> anyhow::Result<()> {
    let Some(listen) = &config.metrics.listen else {
        return Ok(());
    };
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid metrics.listen address '{listen}'"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to start Prometheus exporter")?;

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

async fn build_engine(config: &Config) -> anyhow::Result<AlertEngine> {
    let pool = PostgresPool::new(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;
    let store = Arc::new(PgStore::new(&pool));

    let events: Arc<dyn AlertEventSink> = match &config.redis.url {
        Some(url) => {
            let redis = RedisPool::new(url)?;
            Arc::new(RedisEventPublisher::spawn(&redis, config.redis.event_buffer))
        }
        None => {
            info!("No Redis URL configured; alert events are not published");
            Arc::new(NoopEventSink)
        }
    };

    let notifier = HttpNotifier::new(config.notifications.clone())?;

    Ok(AlertEngine::new(
        config,
        Stores::shared(store),
        Arc::new(notifier),
        events,
    ))
}

fn organizations(config: &Config, orgs: Vec<String>) -> anyhow::Result<Vec<String>> {
    let orgs = if orgs.is_empty() {
        config.engine.organizations.clone()
    } else {
        orgs
    };
    if orgs.is_empty() {
        bail!("no organizations given; pass --org or set engine.organizations");
    }
    Ok(orgs)
}

async fn run_engine(config: Config, orgs: Vec<String>) -> anyhow::Result<()> {
    let orgs = organizations(&config, orgs)?;
    install_metrics(&config)?;
    let engine = build_engine(&config).await?;

    engine
        .run(&orgs, config.engine.tick_interval, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    Ok(())
}

async fn run_evaluate(config: Config, org: &str) -> anyhow::Result<()> {
    let engine = build_engine(&config).await?;
    let report = engine.evaluate_organization(org).await?;

    println!("Organization:     {}", report.org_id);
    println!("Rules evaluated:  {}", report.rules_evaluated);
    println!("Rules skipped:    {}", report.rules_skipped);
    println!("Rules failed:     {}", report.rules_failed);
    println!("Triggers:         {}", report.triggers);
    println!("Alerts created:   {}", report.alerts_created.len());
    for id in &report.alerts_created {
        println!("  {id}");
    }
    println!("Suppressed:       {}", report.suppressed_total());
    for (reason, count) in &report.suppressed {
        println!("  {reason}: {count}");
    }
    if report.persistence_failures > 0 {
        println!("Store failures:   {}", report.persistence_failures);
    }

    Ok(())
}

async fn run_sweep(config: Config, orgs: Vec<String>) -> anyhow::Result<()> {
    let orgs = organizations(&config, orgs)?;
    let engine = build_engine(&config).await?;

    for org in &orgs {
        let report = engine.run_auto_resolution(org).await?;
        println!(
            "{org}: checked {}, resolved {}, failed {}",
            report.checked, report.resolved, report.failed
        );
    }

    let snoozed = engine.process_snoozed().await?;
    println!(
        "snoozed: checked {}, reactivated {}, resolved {}, failed {}",
        snoozed.checked, snoozed.reactivated, snoozed.resolved, snoozed.failed
    );

    Ok(())
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    config.validate()?;
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

async fn run_migrate(config: Config) -> anyhow::Result<()> {
    let pool = PostgresPool::new(&config.database).await?;
    pool.migrate().await?;
    info!("Migrations applied");
    Ok(())
}
