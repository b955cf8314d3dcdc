//! MQTT bridge command line entry point
//!
//! `consume` runs the inbound bridge and prints records as JSON lines;
//! `produce` reads JSON lines from stdin and publishes them through the
//! outbound bridge. Both shut down gracefully on SIGINT/SIGTERM.

use clap::{Parser, Subcommand};
use mqtt_bridge::config::{BridgeConfig, SinkConfig, SourceConfig};
use mqtt_bridge::observability::init_default_logging;
use mqtt_bridge::record::{InboundRecord, Value};
use mqtt_bridge::sink::MqttSink;
use mqtt_bridge::source::{MqttSource, RecordWriter};
use std::path::PathBuf;
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

/// Bridge between streaming pipelines and MQTT brokers
#[derive(Parser)]
#[command(name = "mqtt-bridge")]
#[command(about = "Bridge between streaming pipelines and MQTT brokers")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and print received records as JSON lines on stdout
    Consume,
    /// Read JSON records from stdin and publish them
    Produce,
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

    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Consume => run_consume(config).await,
        Commands::Produce => run_produce(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("loading configuration from: {}", path.display());
            Ok(BridgeConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["bridge.toml", "config/bridge.toml"];
            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("loading configuration from: {}", path.display());
                    return Ok(BridgeConfig::load_from_file(&path)?);
                }
            }
            Err("no configuration file found; pass one with -c/--config or create bridge.toml".into())
        }
    }
}

/// Writer printing each record as one JSON line
struct StdoutWriter;

#[async_trait::async_trait]
impl RecordWriter for StdoutWriter {
    async fn write(
        &self,
        record: InboundRecord,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let line = serde_json::to_string(&record.to_value())?;
        println!("{line}");
        Ok(())
    }
}

async fn run_consume(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let source_config: SourceConfig = config
        .source
        .ok_or("configuration has no [source] section")?;

    let mut source = MqttSource::new(source_config)?;
    let stop = source.stop_handle();

    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!("signal handler failed: {}", e);
        }
        info!("shutdown signal received");
        stop.request_stop();
    });

    source.run(StdoutWriter).await?;
    Ok(())
}

async fn run_produce(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let sink_config: SinkConfig = config.sink.ok_or("configuration has no [sink] section")?;

    let mut sink = MqttSink::connect(sink_config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = sigint.recv() => {
                info!("shutdown signal received");
                break;
            }
            _ = sigterm.recv() => {
                info!("shutdown signal received");
                break;
            }
        };
        let Some(line) = line else {
            break; // stdin closed
        };
        if line.trim().is_empty() {
            continue;
        }

        let record = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(json) => Value::from(json),
            Err(e) => {
                warn!(error = %e, "skipping unparseable input line");
                continue;
            }
        };

        match sink.write(&record).await {
            Ok(()) => {}
            // Shape problems are local to one record; broker failures end
            // the run.
            Err(mqtt_bridge::BridgeError::Record(e)) => {
                warn!(error = %e, "skipping unmappable record");
            }
            Err(e) => {
                sink.close().await;
                return Err(e.into());
            }
        }
    }

    sink.close().await;
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<(), std::io::Error> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

fn handle_config_command(
    config: BridgeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    info!("configuration is valid");
    Ok(())
}
