//! fleetwatch - fleet telemetry agent
//!
//! Registers this host with the collection service and keeps reporting hardware
//! metrics until interrupted.

use clap::{Parser, Subcommand, ValueEnum};
use fleetwatch_agent::{shutdown_channel, Agent, AgentConfig, ConfigLoader};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "fleetwatch")]
#[command(version)]
#[command(about = "Fleet telemetry agent", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "FLEETWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the identity, lifecycle and queue files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until Ctrl+C
    Run,

    /// Show identity, lifecycle and queue state
    Status,

    /// Tell the service this device is leaving
    Deregister,

    /// Clear a stuck ERROR state
    ResetError,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, load_error) = match ConfigLoader::new().with_cli_path(cli.config.clone()).load() {
        Ok(config) => (config, None),
        Err(e) => (AgentConfig::default(), Some(e)),
    };
    if let Some(dir) = cli.data_dir {
        config.agent.data_dir = dir;
    }

    // CLI verbose flag takes precedence, then config, then default
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match config.agent.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };
    init_logging(log_level, cli.log_format)?;

    match load_error {
        None => info!("Configuration loaded"),
        Some(e) => warn!("Failed to load configuration: {}, using defaults", e),
    }

    match cli.command {
        Commands::Run => run_command(config).await,
        Commands::Status => status_command(config),
        Commands::Deregister => deregister_command(config).await,
        Commands::ResetError => reset_error_command(config),
    }
}

fn init_logging(level: Level, format: LogFormat) -> anyhow::Result<()> {
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

async fn run_command(config: AgentConfig) -> anyhow::Result<()> {
    if config.server.shared_secret.is_empty() {
        warn!("No shared secret configured; registration will fail the credential check");
    }

    let mut agent = Agent::from_config(config)?;
    let (trigger, shutdown) = shutdown_channel();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Interrupt received, shutting down");
        trigger.trigger();
    });

    agent.run(shutdown).await?;
    Ok(())
}

fn status_command(config: AgentConfig) -> anyhow::Result<()> {
    let agent = Agent::inspect(config)?;
    let status = agent.status();

    println!();
    println!("fleetwatch v{}", fleetwatch_agent::VERSION);
    println!();
    println!(
        "Device ID:    {}",
        status.device_id.as_deref().unwrap_or("<unavailable>")
    );
    println!("Secret:       {}", status.secret_fingerprint);
    println!("State:        {}", status.lifecycle.current);
    println!("Reinits:      {}", status.lifecycle.reinit_count);
    if status.error.in_error {
        println!(
            "Error:        {}s in ERROR, {} retries, auto-recovery in {}s",
            status.error.duration_secs, status.error.retry_count, status.error.auto_recovery_in
        );
    }
    if status.lifecycle.pending_deletion_at.is_some() {
        println!("Deletion:     pending");
    }
    if let Some(queue) = &status.queue {
        println!(
            "Queue:        {} pending / {} total",
            queue.pending_count, queue.total_count
        );
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn deregister_command(config: AgentConfig) -> anyhow::Result<()> {
    let mut agent = Agent::inspect(config)?;
    match agent.deregister().await {
        Ok(()) => println!("Deletion notice sent; the agent will reinitialize on next start"),
        Err(e) => {
            println!("Deletion notice failed ({}); marker kept for the next recovery", e);
            return Err(e.into());
        }
    }
    Ok(())
}

fn reset_error_command(config: AgentConfig) -> anyhow::Result<()> {
    let mut agent = Agent::inspect(config)?;
    if agent.reset_error() {
        println!("ERROR state cleared");
    } else {
        println!("Not in ERROR (state: {})", agent.state());
    }
    Ok(())
}
