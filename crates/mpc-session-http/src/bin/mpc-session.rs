//! Run programs on an MPC node network over HTTP.
use std::{fs, path::PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use mpc_session_client::{MpcSessionClient, NetworkConfig, NodeStatus, Value};
use mpc_session_http::{HttpMetadataExchange, HttpTransport, HttpTransportOpts};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// A client for secure multi-party computation sessions.
///
/// Logging can be controlled with an EnvFilter via the `MPC_SESSION_LOG` environment
/// variable.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Path to the JSON network config.
    #[arg(long, short, global = true, default_value = "network.json")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the configured program and print its result as JSON.
    ///
    /// Values are `true`/`false`, integers, `0x`-prefixed hex bytes or strings in double quotes,
    /// e.g. `--secret 'name="alice"'`.
    Run {
        /// A secret input as `name=value`, can be repeated.
        #[arg(long = "secret", value_parser = parse_input)]
        secret: Vec<(String, Value)>,
        /// A public input as `name=value`, can be repeated.
        #[arg(long = "public", value_parser = parse_input)]
        public: Vec<(String, Value)>,
    },
    /// Connect to the nodes and print which of them are reachable.
    Status,
}

fn parse_input(s: &str) -> Result<(String, Value), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    if name.is_empty() {
        return Err(format!("missing input name in '{s}'"));
    }
    let value = value.parse::<Value>().map_err(|e| e.to_string())?;
    Ok((name.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing().context("tracing initialization")?;

    let cli = Cli::parse();
    let json = fs::read_to_string(&cli.config)
        .with_context(|| format!("unable to read config {}", cli.config.display()))?;
    let config = NetworkConfig::from_json(&json).context("invalid network config")?;
    let transport = HttpTransport::new(HttpTransportOpts::default())?;
    let coordinator = config
        .coordinator_url()
        .map(HttpMetadataExchange::new)
        .transpose()?;
    let mut client = MpcSessionClient::new(config, transport);
    if let Some(coordinator) = coordinator {
        client = client.with_metadata_exchange(coordinator);
    }

    match cli.command {
        Command::Run { secret, public } => {
            if secret.is_empty() && public.is_empty() {
                bail!("no inputs given, use --secret or --public");
            }
            for (name, value) in secret {
                client.set_secret_input(name, value);
            }
            for (name, value) in public {
                client.set_public_input(name, value);
            }
            let cancel = client.cancel_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, cancelling session");
                    if let Err(err) = cancel.cancel().await {
                        warn!(%err, "unable to cancel session");
                    }
                }
            });
            let result = client.run().await;
            client.disconnect().await;
            let result = result.context("session failed")?;
            info!(
                session_id = %result.session_id,
                contributors = ?result.contributors,
                "session complete"
            );
            println!("{}", serde_json::to_string_pretty(&result.value)?);
        }
        Command::Status => {
            if let Err(err) = client.connect().await {
                warn!(%err, "unable to connect");
            }
            let status = client.status();
            println!("program:  {}", status.program_id);
            println!("client:   {}", status.client_id);
            for (index, (address, node)) in status.nodes.iter().enumerate() {
                let node = match node {
                    NodeStatus::Reachable => "reachable",
                    NodeStatus::Unreachable => "unreachable",
                    NodeStatus::Disconnected => "disconnected",
                };
                println!("node {index}:   {address} ({node})");
            }
            let info = client.program_info();
            println!(
                "quorum:   {}/{} nodes available",
                info.nodes_available,
                client.config().threshold()
            );
            client.disconnect().await;
        }
    }
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_env("MPC_SESSION_LOG")
        .or_else(|_| EnvFilter::try_new("mpc_session_http=info,mpc_session_client=info"))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .init();

    Ok(())
}
