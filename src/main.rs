use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use skyvault::config::AppConfig;
use skyvault::context::AgentContext;
use skyvault::core::transfer_engine::TransferEngineType;
use skyvault::core::{JobExecutor, Scheduler, TriggerKind};
use skyvault::logging::{self, LogConfig};
use skyvault::store::{self, StoreBackend};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "skyvault")]
#[command(about = "Scheduled mirror-and-snapshot cloud backup agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to /etc/skyvault/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the control plane and run jobs until interrupted
    Daemon(DaemonArgs),
    /// Run one job immediately, as a manual trigger would
    Run {
        job_id: String,
        #[command(flatten)]
        args: DaemonArgs,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Args, Serialize, Default)]
struct DaemonArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    agent_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    store_backend: Option<StoreBackend>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    store_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    store_seed: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    transfer_engine: Option<TransferEngineType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    default_remote: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    json_logs: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file = cli.config.as_deref();

    let config = match &cli.command {
        Commands::Daemon(args) | Commands::Run { args, .. } => AppConfig::load(file, Some(args))?,
        Commands::Config => AppConfig::load(file, None::<&DaemonArgs>)?,
    };

    match cli.command {
        Commands::Daemon(_) => {
            logging::init(LogConfig::from(&config))?;
            let ctx = AgentContext::from_config(config)?;
            run_daemon(ctx).await.context("Agent stopped with an error")?
        }
        Commands::Run { job_id, .. } => {
            logging::init(LogConfig::from(&config))?;
            let ctx = AgentContext::from_config(config)?;
            run_once(ctx, &job_id).await?
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config.redacted())?);
        }
    }

    Ok(())
}

async fn run_daemon(ctx: AgentContext) -> Result<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    Scheduler::new(ctx).run(shutdown).await;
    Ok(())
}

async fn run_once(ctx: AgentContext, job_id: &str) -> Result<()> {
    let store = ctx.store.as_ref();
    let global = store::jobs::global_config(store).await?;
    let jobs = store::jobs::list(store, &ctx.agent_id).await?;

    let Some(job) = jobs.into_iter().find(|j| j.id == job_id) else {
        bail!("No job '{}' configured for agent '{}'", job_id, ctx.agent_id);
    };

    let outcome = JobExecutor::new(&ctx)
        .execute(&job, TriggerKind::Manual, &global)
        .await
        .with_context(|| format!("Backup '{}' failed", job.name))?;

    println!(
        "{}: uploaded {} in {}s, snapshot {}",
        job.name, outcome.size, outcome.duration_secs, outcome.snapshot
    );
    for warning in outcome.warnings() {
        println!("warning: {}", warning);
    }
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, finishing current job before exit"),
        _ = terminate => info!("Received SIGTERM, finishing current job before exit"),
    }

    shutdown.cancel();
}
