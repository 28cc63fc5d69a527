//! docbridge - CLI entry point
//!
//! `serve` runs the store and the bus listener; `publish` and `ping` talk to a
//! running listener.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use docbridge::bus::listener::{cleanup_socket, create_listener_at, serve};
use docbridge::cli::{Cli, Command};
use docbridge::config::Config;
use docbridge::{BusClient, Event, ProcessorRegistry, register_db_processors};
use docstore::DocStore;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docbridge")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(log_dir.join("docbridge.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref())
        .context("Failed to load configuration")?
        .with_overrides(cli.db.as_deref(), cli.socket.as_deref());

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve => cmd_serve(&config).await,
        Command::Publish { topic, payload } => cmd_publish(&config, &topic, &payload).await,
        Command::Ping => cmd_ping(&config).await,
    }
}

async fn cmd_serve(config: &Config) -> Result<()> {
    info!(address = %config.store.address, "cmd_serve: starting");
    let store = DocStore::spawn(config.store.clone());

    let mut registry = ProcessorRegistry::new();
    register_db_processors(&mut registry, store.clone(), &config.bus.topic_prefix);

    let (listener, socket_path) = create_listener_at(&config.bus.socket_path())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(serve(listener, Arc::new(registry), shutdown_rx));

    println!("docbridge listening on {}", socket_path.display());

    tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
    info!("cmd_serve: shutdown requested");

    shutdown_tx.send_replace(true);
    server.await.context("Bus listener task failed")?;
    store.close().await;
    cleanup_socket(&socket_path);

    info!("cmd_serve: stopped");
    Ok(())
}

async fn cmd_publish(config: &Config, topic: &str, payload: &str) -> Result<()> {
    let payload = match serde_json::from_str::<Value>(payload).context("Failed to parse payload")? {
        Value::Object(map) => map,
        _ => return Err(eyre::eyre!("payload must be a JSON object")),
    };

    let client = BusClient::with_socket_path(config.bus.socket_path()).with_timeout(config.bus.timeout());
    let ack = client.publish(Event::new(topic, payload)).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&ack).context("Failed to serialize event")?
    );
    Ok(())
}

async fn cmd_ping(config: &Config) -> Result<()> {
    let client = BusClient::with_socket_path(config.bus.socket_path()).with_timeout(config.bus.timeout());
    let version = client.ping().await?;
    println!("docbridge listener is alive (version {})", version);
    Ok(())
}
