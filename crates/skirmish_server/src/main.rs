//! Skirmish - Relay Hub

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use skirmish_server::{RelayHub, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Relay hub for lockstep skirmish matches.
#[derive(Parser, Debug)]
#[command(name = "skirmish-server", version, about)]
struct Args {
    /// RON file with server settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind, overriding the config file.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, overriding the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum players per match, overriding the config file.
    #[arg(long)]
    max_players: Option<u32>,

    /// Serve matches back to back instead of exiting after one.
    #[arg(long)]
    forever: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match serve(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Relay hub failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve(args: Args) -> skirmish_server::Result<()> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max_players) = args.max_players {
        config.max_players = max_players;
    }

    tracing::info!("Starting Skirmish relay hub");
    loop {
        let hub = RelayHub::bind(config.clone()).await?;
        let summary = hub.run().await?;
        tracing::info!(?summary, "Match summary");
        if !args.forever {
            return Ok(());
        }
    }
}
