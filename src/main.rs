use clap::{Parser, Subcommand};
use nox_tracker::config::TrackerConfig;
use nox_tracker::entry::NewEntry;
use nox_tracker::TrackerEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "nox-tracker")]
#[command(version = "1.0.0")]
#[command(about = "Nox Tracker — agent activity log service and dashboard client")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_t = default_config_path())]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the activity log API server
    Serve,
    /// Initialize default configuration
    Init,
    /// Record one activity entry
    Log {
        /// Agent the entry belongs to
        #[arg(short, long)]
        agent: Option<String>,
        /// Entry type (research, deploy, note, ...)
        #[arg(short = 't', long = "type")]
        kind: Option<String>,
        /// What happened
        #[arg(short, long)]
        description: String,
        /// Action detail
        #[arg(long)]
        action: Option<String>,
        /// Outcome status
        #[arg(long)]
        status: Option<String>,
        /// Duration in milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Show aggregate activity statistics
    Stats,
    /// Purge entries past the retention window
    Cleanup,
    /// Follow a deployed dashboard and report freshness
    Watch {
        /// Override the dashboard base URL
        #[arg(long)]
        base_url: Option<String>,
    },
}

fn default_config_path() -> String {
    TrackerConfig::default_path().to_string_lossy().to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = PathBuf::from(&cli.config);
    let config = TrackerConfig::load(&config_path).unwrap_or_else(|e| {
        eprintln!("Warning: failed to load config: {e}, using defaults");
        TrackerConfig::default()
    });

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Init => {
            info!("Initializing default configuration");
            config.save(&config_path)?;
            println!("Config saved to: {}", config_path.display());
            Ok(())
        }
        Commands::Log {
            agent,
            kind,
            description,
            action,
            status,
            duration_ms,
        } => {
            let engine = TrackerEngine::new(config);
            let outcome = engine.record(NewEntry {
                agent,
                kind,
                description: Some(description),
                action,
                status,
                duration_ms,
                ..NewEntry::default()
            })?;
            if outcome.accepted {
                println!("Recorded: {}", outcome.id);
            } else {
                println!("Duplicate of: {}", outcome.id);
            }
            Ok(())
        }
        Commands::Stats => {
            let engine = TrackerEngine::new(config);
            let stats = engine.stats();
            println!("Activity Statistics:");
            println!("  Total:     {}", stats.total);
            println!("  Today:     {}", stats.today);
            println!("  This week: {}", stats.this_week);
            println!("  By agent:");
            for (agent, count) in &stats.by_agent {
                println!("    {agent}: {count}");
            }
            println!("  By type:");
            for (kind, count) in &stats.by_type {
                println!("    {kind}: {count}");
            }
            Ok(())
        }
        Commands::Cleanup => {
            let engine = TrackerEngine::new(config);
            let (removed, remaining) = engine.cleanup()?;
            println!("Removed {removed} entries, {remaining} remaining");
            Ok(())
        }
        Commands::Watch { base_url } => {
            let base_url = base_url.unwrap_or_else(|| config.client.base_url.clone());
            info!(base_url = %base_url, "watching dashboard");

            let network = Arc::new(nox_tracker::fetch::HttpFetcher::new(
                &base_url,
                Duration::from_secs(config.client.attempt_timeout_secs),
            ));
            let coordinator = nox_tracker::cache::spawn(
                network as Arc<dyn nox_tracker::fetch::NetworkBackend>,
                "boot",
            );
            let client = Arc::new(nox_tracker::client::DashboardClient::new(
                coordinator,
                nox_tracker::fetch::RetryPolicy {
                    attempt_timeout: Duration::from_secs(config.client.attempt_timeout_secs),
                    base_delay: Duration::from_millis(config.client.base_delay_ms),
                    max_retries: config.client.max_retries,
                },
            ));

            let report = client.reload().await;
            let snapshot = client.snapshot();
            println!("Dashboard at {base_url}:");
            println!("  Activities: {}", snapshot.activities.len());
            println!("  Audits:     {}", snapshot.audits.len());
            println!("  Chains:     {}", snapshot.chains.len());
            println!("  Agents:     {}", snapshot.agents.len());
            println!("  Metadata:   {}", report.metadata);
            println!("  Content:    {}", if report.content_stale { "stale" } else { "current" });
            if !snapshot.failed_resources.is_empty() {
                println!("  Failed:     {}", snapshot.failed_resources.join(", "));
            }

            let mut scheduler = nox_tracker::scheduler::AutoRefreshScheduler::new(
                client,
                config.refresh.enabled,
                Duration::from_secs(config.refresh.freshness_interval_secs),
                Duration::from_secs(config.refresh.reload_interval_secs),
            );
            scheduler.start();

            tokio::signal::ctrl_c().await?;
            info!("watch stopped");
            Ok(())
        }
        Commands::Serve => {
            info!(
                version = "1.0.0",
                addr = %config.server.bind_addr,
                "Nox Tracker starting"
            );

            let bind_addr = config.server.bind_addr.clone();
            let sweep_interval_secs = config.server.sweep_interval_secs;
            let cors_origin = config.server.cors_origin.clone();
            let engine = Arc::new(TrackerEngine::new(config));

            println!("Nox Tracker v1.0.0");
            println!("  Listening: http://{bind_addr}");
            println!("  Entries:   {}", engine.store().count());
            println!("  Data file: {}", engine.config().data_path().display());

            let mut server = nox_tracker::server::ApiServer::new(
                nox_tracker::server::ApiServerConfig {
                    bind_addr,
                    sweep_interval_secs,
                    cors_origin,
                },
                engine.clone(),
            );

            if let Err(e) = server.start().await {
                error!(error = %e, "API server error");
            }

            info!("Nox Tracker stopped");
            Ok(())
        }
    }
}
