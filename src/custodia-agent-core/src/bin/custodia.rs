//! Custodia CLI — drive the agent's operation surface from a terminal.
//!
//! This is a thin host for the engine: the desktop shell exposes the same
//! operations through its own bridge.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use custodia_agent_core::{Agent, AgentConfig, AgentError, CancelToken};
use tracing_subscriber::EnvFilter;

/// TPM-bound custody agent.
#[derive(Parser)]
#[command(name = "custodia", version, about = "TPM-bound custody agent")]
struct Cli {
    /// Custody service base URL (trailing slash).
    #[arg(long)]
    base_url: Option<String>,

    /// Directory decrypted files are written to.
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show TPM availability and provisioning state.
    Status,
    /// Check that a TPM is present and the custody service answers.
    Check,
    /// Provision the device keys and register with the custody service.
    Provision,
    /// Log in to the custody service.
    Login,
    /// List pending operations.
    Operations,
    /// Seal a file and upload it.
    Encrypt {
        /// File to seal.
        path: PathBuf,
    },
    /// Fetch, verify and decrypt an operation into the downloads directory.
    Decrypt {
        /// Operation identifier from `operations`.
        operation_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = AgentConfig::default();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if cli.download_dir.is_some() {
        config.download_dir = cli.download_dir;
    }

    let agent = match Agent::new(config) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("failed to start agent: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C cancels the operation in flight; TPM commands finish on their
    // worker and are discarded.
    let cancel = CancelToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            interrupt.cancel();
        }
    });

    match run(&agent, cli.command, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(agent: &Agent, command: Commands, cancel: &CancelToken) -> Result<(), AgentError> {
    match command {
        Commands::Status => {
            let status = agent.get_status(cancel).await?;
            println!("tpm available:  {}", status.available);
            println!("provisioned:    {}", status.initialized);
            if let Ok(identity) = agent.device_info() {
                println!("device uuid:    {}", identity.uuid);
            }
        }
        Commands::Check => {
            let tpm = agent.check_tpm_presence(cancel).await?;
            let api = agent.check_connection(cancel).await?;
            println!("tpm present:    {tpm}");
            println!("custody online: {api}");
        }
        Commands::Provision => {
            let identity = agent.provision_device(cancel).await?;
            println!("device uuid: {}", identity.uuid);
            println!("signing key:\n{}", identity.signing_pub_pem);
        }
        Commands::Login => {
            agent.auth_login(cancel).await?;
            println!("logged in");
        }
        Commands::Operations => {
            let tickets = agent.get_operations(cancel).await?;
            if tickets.is_empty() {
                println!("no pending operations");
            }
            for ticket in tickets {
                println!(
                    "{}  {}  {}",
                    ticket.operation_id,
                    ticket.status.as_deref().unwrap_or("-"),
                    ticket.file_name.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Encrypt { path } => {
            let receipt = agent.encrypt_file(&path, cancel).await?;
            println!(
                "stored: {}",
                receipt
                    .file_id
                    .or(receipt.message)
                    .unwrap_or_else(|| "ok".into())
            );
        }
        Commands::Decrypt { operation_id } => {
            let path = agent.decrypt_file(&operation_id, cancel).await?;
            println!("decrypted to {}", path.display());
        }
    }

    agent.close().await
}
