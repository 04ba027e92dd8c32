//! tagbridge - entry point
//!
//! Without reader hardware attached the tag side runs on a simulated reader
//! fed from stdin: every line is presented as one tag holding that text.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tagbridge::bridge::Bridge;
use tagbridge::config::BridgeConfig;
use tagbridge::network::{wait_for_link, HostNetworkLink, LinkRequirement, NetworkLink};
use tagbridge::observability::init_default_logging;
use tagbridge::protocol::LogDisplay;
use tagbridge::tag::{AuthKey, ChannelTagHandle, ChannelTransceiver, SimulatedTag, TagWriter};
use tagbridge::transport::mqtt::connection::parse_broker_url;
use tagbridge::transport::mqtt::MqttClient;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Contactless tag to MQTT bridge
#[derive(Parser)]
#[command(name = "tagbridge")]
#[command(about = "Publish contactless tag identifiers to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge loop
    Run,
    /// Write an identifier into tags presented to the reader
    Write {
        /// Identifier text, at most 16 bytes
        #[arg(long)]
        data: String,
        /// Stop after the first completed write
        #[arg(long)]
        once: bool,
    },
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting tagbridge v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Write { data, once } => run_writer(config, &data, once).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(BridgeConfig::load_from_file(path)?);
    }

    for path_str in ["tagbridge.toml", "config/tagbridge.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(BridgeConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create tagbridge.toml".into())
}

async fn run_bridge(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(cabin_id = config.station.cabin_id, "Bridge starting");
    let shutdown = spawn_signal_watch()?;

    // Network first: nothing else is useful without a link
    let mut link = HostNetworkLink::new();
    let password = config.get_network_password()?;
    link.connect(config.network.ssid.as_deref(), password.as_deref())
        .await?;
    let (broker_host, _) = parse_broker_url(&config.mqtt.broker_url)?;
    let requirement = LinkRequirement::for_broker_host(&broker_host);
    let poll = Duration::from_millis(config.network.link_poll_ms);
    wait_for_link(&link, requirement, poll, &mut shutdown.clone()).await?;

    let broker = MqttClient::new(config.mqtt.clone())
        .with_gateway(link.gateway_address().map(|ip| ip.to_string()));

    let (reader, handle) = ChannelTransceiver::new();
    tokio::spawn(feed_tags_from_stdin(handle, config.tag.block));

    let mut bridge = Bridge::new(&config, broker, reader, Box::new(LogDisplay))?;
    bridge.run(shutdown).await?;
    Ok(())
}

async fn run_writer(
    config: BridgeConfig,
    text: &str,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut shutdown = spawn_signal_watch()?;
    let block = config.tag.block;
    let data = TagWriter::<ChannelTransceiver>::prepare(text)?;

    let (reader, handle) = ChannelTransceiver::new();
    let mut writer = TagWriter::new(reader, block, &config.writer)?;
    tokio::spawn(feed_blank_tags_from_stdin(handle));
    info!(block, "Press Enter to present a blank tag to the writer");

    let idle = Duration::from_millis(50);
    while !*shutdown.borrow() {
        match writer.write_once(&data).await {
            Some(Ok(outcome)) => {
                if let Some(tag) = writer.reader().last_released() {
                    let written = tag.block(block);
                    info!(
                        uid = %tag.uid(),
                        ?outcome,
                        content = %String::from_utf8_lossy(written.as_bytes()).trim_end_matches('\0'),
                        "Tag provisioned"
                    );
                }
                if once {
                    break;
                }
            }
            Some(Err(e)) => warn!("Write failed: {}", e),
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(idle) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
    Ok(())
}

fn handle_config_command(
    config: &BridgeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

/// Translate SIGINT/SIGTERM into the shutdown watch channel
fn spawn_signal_watch() -> Result<watch::Receiver<bool>, Box<dyn std::error::Error>> {
    let (tx, rx) = watch::channel(false);
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        let _ = tx.send(true);
    });
    Ok(rx)
}

/// Present one simulated tag per stdin line
///
/// A line starting with `!` presents a tag whose sector key is not the
/// default one, so authentication fails.
async fn feed_tags_from_stdin(handle: ChannelTagHandle, block: u8) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let (text, locked) = match line.strip_prefix('!') {
            Some(text) => (text, true),
            None => (line.as_str(), false),
        };
        let tag = match SimulatedTag::with_text(block, text) {
            Ok(tag) if locked => tag.with_key(AuthKey::new([0; 6])),
            Ok(tag) => tag,
            Err(e) => {
                warn!(text, "Skipping simulated tag: {}", e);
                continue;
            }
        };
        if handle.present(tag).await.is_err() {
            break;
        }
    }
}

async fn feed_blank_tags_from_stdin(handle: ChannelTagHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(_)) = lines.next_line().await {
        if handle.present(SimulatedTag::blank()).await.is_err() {
            break;
        }
    }
}
