//! # Vault Credential Sync
//!
//! Syncs service credentials, certificates and generic credentials from a
//! Kubernetes secret into Vault on a schedule.
//!
//! ## Usage
//!
//! ```text
//! vault-cred-sync                 # run on VAULT_CRED_SYNC_FREQUENCY until SIGTERM
//! vault-cred-sync once            # run a single cycle and exit
//! vault-cred-sync check-schedule "*/5 * * * *"
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use kube::Client;
use std::sync::Arc;
use tracing::{error, info};
use vault_cred_sync::config::SyncConfig;
use vault_cred_sync::job::{CycleOutcome, VaultCredSync};
use vault_cred_sync::observability::{logging, metrics};
use vault_cred_sync::scheduler::{self, Schedule};
use vault_cred_sync::server::{start_server, ServerState};
use vault_cred_sync::source::KubeSecretStore;
use vault_cred_sync::vault::VaultAuthenticator;

/// Sync credentials from a Kubernetes secret into Vault
#[derive(Parser)]
#[command(name = "vault-cred-sync")]
#[command(
    about = "Sync credentials from a Kubernetes secret into Vault",
    long_about = None,
    after_help = "\
Configuration is read from the environment (VAULT_ADDR, VAULT_AUTH_METHOD,
VAULT_CRED_SYNC_SECRET_NAME, VAULT_CRED_SYNC_FREQUENCY, ...).

Examples:
  vault-cred-sync
  vault-cred-sync once
  vault-cred-sync check-schedule '@every 2m'
"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run sync cycles on the configured schedule until terminated (default)
    Run,
    /// Run a single sync cycle and exit
    Once,
    /// Print the next fire times of a schedule expression
    CheckSchedule {
        /// `@every <duration>`, a shortcut such as `@hourly`, or a cron expression
        #[arg(value_name = "EXPR")]
        expr: String,

        /// Number of fire times to print
        #[arg(short, long, default_value_t = 5)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckSchedule { expr, count } => check_schedule(&expr, count),
        Commands::Once => {
            let config = init()?;
            let mut job = build_job(&config).await?;
            match job.run_cycle().await {
                CycleOutcome::SourceUnavailable | CycleOutcome::AuthenticationFailed => {
                    anyhow::bail!("Vault credential sync cycle did not complete")
                }
                outcome => {
                    info!("Vault credential sync cycle finished: {:?}", outcome);
                    Ok(())
                }
            }
        }
        Commands::Run => {
            let config = init()?;
            run(config).await
        }
    }
}

/// Common startup: TLS provider, logging, configuration and metrics
fn init() -> Result<SyncConfig> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = SyncConfig::from_env().context("Failed to load configuration")?;
    logging::init_logging(&config.log_format)?;

    info!(
        "Starting vault-cred-sync {} (built {}, git {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    config.validate().context("Invalid configuration")?;
    metrics::register_metrics()?;

    Ok(config)
}

async fn build_job(config: &SyncConfig) -> Result<VaultCredSync> {
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let store = KubeSecretStore::new(client);
    let authenticator = VaultAuthenticator::new(config.vault.clone(), store.clone());

    Ok(VaultCredSync::new(
        config,
        Arc::new(store),
        Arc::new(authenticator),
    ))
}

async fn run(config: SyncConfig) -> Result<()> {
    let schedule: Schedule = config.frequency.parse()?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let mut job = build_job(&config).await?;

    server_state.mark_ready();
    scheduler::run(&mut job, &schedule, shutdown_signal()).await;

    info!("vault-cred-sync stopped");
    Ok(())
}

fn check_schedule(expr: &str, count: usize) -> Result<()> {
    let schedule: Schedule = expr.parse()?;
    let upcoming = schedule.upcoming(Utc::now(), count);
    if upcoming.is_empty() {
        anyhow::bail!("Schedule '{expr}' has no upcoming fire times");
    }
    for time in upcoming {
        println!("{}", time.to_rfc3339());
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
