use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gaslink::{
    CommandChannel, LinkConfig, LinkSession, SimulatedTransport, StdinCommands, TracingSink,
    Transport,
};

/// Stream gas-sensor telemetry from a BLE peripheral and send it commands
#[derive(Parser, Debug)]
#[command(name = "gaslink", version, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Substring of the peripheral's advertised name (overrides the config file)
    #[arg(short, long)]
    name: Option<String>,

    /// Scan duration in milliseconds (overrides the config file)
    #[arg(long)]
    scan_timeout_ms: Option<u64>,

    /// Talk to the built-in simulated peripheral instead of a radio
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Log filter, e.g. "gaslink=debug"
    #[arg(long, default_value = "gaslink=info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => LinkConfig::load(path)?,
        None => LinkConfig::default(),
    };
    if let Some(name) = args.name {
        config.target_name = name;
    }
    if let Some(ms) = args.scan_timeout_ms {
        config.scan_timeout = std::time::Duration::from_millis(ms);
    }
    config.validate()?;

    if args.simulate {
        return run(SimulatedTransport::new(), config).await;
    }

    run_radio(config).await
}

#[cfg(feature = "btle")]
async fn run_radio(config: LinkConfig) -> Result<()> {
    let transport = gaslink::BtleTransport::new().await?;
    run(transport, config).await
}

#[cfg(not(feature = "btle"))]
async fn run_radio(_config: LinkConfig) -> Result<()> {
    anyhow::bail!("built without Bluetooth support; rebuild with --features btle or pass --simulate")
}

async fn run<T: Transport>(transport: T, config: LinkConfig) -> Result<()> {
    let mut session = LinkSession::new(transport, config.clone(), TracingSink);

    if let Err(e) = session.connect().await {
        for suggestion in e.recovery_suggestions() {
            warn!("  - {}", suggestion);
        }
        return Err(e).context("failed to establish link");
    }

    let commands = StdinCommands::spawn(&config).context("failed to start stdin reader")?;
    let outcome = CommandChannel::new(commands).run(&mut session).await?;
    info!("Session ended: {:?}", outcome);
    Ok(())
}
