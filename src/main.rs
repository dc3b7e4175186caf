use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nrped::commands::CommandInvoker;
use nrped::config::{AppConfig, DEFAULT_PORT};
use nrped::context::ServerContext;
use nrped::core::{EventBus, ReturnValue, Status};
use nrped::logging::{self, LogConfig};
use nrped::plugins::PluginRegistry;
use nrped::protocol::client::CheckClient;
use nrped::server::{AllowList, Server};
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "nrped")]
#[command(about = "Nagios Remote Plugin Executor daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon until interrupted
    Daemon(DaemonArgs),
    /// Query a running daemon
    Check(CheckArgs),
}

#[derive(Args, Serialize)]
struct DaemonArgs {
    #[serde(skip)]
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    command_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    accept_params: Option<bool>,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(long, short = 'H', default_value = "127.0.0.1")]
    host: String,

    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Command to run on the daemon
    #[arg(long, short, default_value = "_NRPE_CHECK")]
    command: String,

    /// Positional argument for the command, repeatable
    #[arg(long = "arg", short = 'a')]
    args: Vec<String>,

    /// Seconds to wait for the answer
    #[arg(long, short, default_value_t = 10)]
    timeout: u64,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(LogConfig {
        json: cli.json_logs,
        verbose: cli.verbose,
    });

    match cli.command {
        Commands::Daemon(args) => match run_daemon(args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Check(args) => run_check(args).await,
    }
}

async fn run_daemon(args: DaemonArgs) -> Result<()> {
    let config = AppConfig::new(args.config.as_deref(), Some(&args))
        .context("Failed to load configuration")?;

    let commands = config
        .command_registry()
        .context("Invalid command definitions")?;
    info!(commands = commands.len(), "Commands loaded");

    let invoker = CommandInvoker::new(Arc::new(commands), Arc::new(PluginRegistry::with_builtins()))
        .accept_params(config.accept_params);
    let allow = AllowList::resolve(&config.allow)
        .await
        .context("Failed to resolve allowed hosts")?;

    let ctx = ServerContext::new(config.server_config(), invoker, allow, EventBus::with_tracing());
    let server = Server::start(&config, ctx)
        .await
        .context("Failed to start daemon")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    server.shutdown().await;
    Ok(())
}

async fn run_check(args: CheckArgs) -> ExitCode {
    let result = match query(&args).await {
        Ok(result) => result,
        Err(e) => ReturnValue::unknown(format!("{:#}", e)),
    };

    if args.json {
        match serde_json::to_string(&result) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", result.to_payload()),
        }
    } else {
        println!("{}", result.to_payload());
    }

    ExitCode::from(exit_code(result.status))
}

async fn query(args: &CheckArgs) -> Result<ReturnValue> {
    let addr: SocketAddr = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("Failed to resolve {}", args.host))?
        .next()
        .with_context(|| format!("No address for {}", args.host))?;

    let client = CheckClient::new(addr).with_timeout(Duration::from_secs(args.timeout));
    let result = client.check(&args.command, &args.args).await?;
    Ok(result)
}

fn exit_code(status: Status) -> u8 {
    status.code() as u8
}
