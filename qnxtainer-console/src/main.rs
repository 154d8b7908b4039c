//! `qnxtainer`: operate a QNXtainer server from the terminal.
//!
//! One-shot commands start the sync engine, run a single operation and print
//! the refreshed state. `watch` keeps the engine polling and logs every change
//! until Ctrl-C.

mod render;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{self, WrapErr};
use qnxtainer_common::{EndpointConfig, PollingPolicy};
use qnxtainer_sdk::read_image_archive;
use qnxtainer_sync::{
    default_config_path, ConfigStore, EngineSettings, FileConfigStore, InMemoryConfigStore,
    SyncEngine, SyncEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "qnxtainer")]
#[command(about = "Operator console for QNXtainer container runtimes")]
struct Cli {
    /// Path to the endpoint config file
    #[arg(short, long, env = "QNXTAINER_CONFIG")]
    config: Option<PathBuf>,

    /// Server host (overrides the config file for this run)
    #[arg(long, env = "QNXTAINER_HOST")]
    host: Option<String>,

    /// Server port (overrides the config file for this run)
    #[arg(long, env = "QNXTAINER_PORT")]
    port: Option<u16>,

    /// Polling interval used by `watch`
    #[arg(
        long,
        env = "QNXTAINER_POLL_INTERVAL_MS",
        default_value_t = PollingPolicy::DEFAULT_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1_000..=60_000)
    )]
    interval_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and print images and containers
    State,
    /// Poll the server and log every change until Ctrl-C
    Watch,
    /// Upload an image archive
    Upload {
        file: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = qnxtainer_sdk::DEFAULT_TAG)]
        tag: String,
    },
    /// Create a container from an image
    Create { image_id: String, name: String },
    /// Create and start a container from an image
    Run { image_id: String },
    /// Start a container
    Start { container_id: String },
    /// Stop a container
    Stop { container_id: String },
    /// Show or change the persisted endpoint
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Check that the endpoint answers
    Test,
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    Set { host: String, port: u16 },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,qnxtainer_sync=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let file_store = FileConfigStore::new(cli.config.clone().unwrap_or_else(default_config_path));

    if let Command::Config(command) = &cli.command {
        return run_config(&file_store, command).await;
    }

    let endpoint = resolve_endpoint(&file_store, &cli).await;
    let store: Arc<dyn ConfigStore> = if cli.host.is_some() || cli.port.is_some() {
        Arc::new(InMemoryConfigStore::with_config(endpoint.clone()))
    } else {
        Arc::new(file_store)
    };

    let watching = matches!(cli.command, Command::Watch);
    let settings = EngineSettings {
        polling: PollingPolicy::new(watching, cli.interval_ms)?,
        ..EngineSettings::default()
    };
    let engine = SyncEngine::new(store, settings)?;

    match cli.command {
        Command::Test => {
            let snapshot = engine
                .probe_endpoint(&endpoint)
                .await
                .wrap_err_with(|| format!("{} is not reachable", endpoint))?;
            println!(
                "{} answered: {} images, {} containers",
                endpoint,
                snapshot.images.len(),
                snapshot.containers.len()
            );
            return Ok(());
        }
        Command::Watch => return watch(&engine).await,
        _ => {}
    }

    engine.start().await?;
    match cli.command {
        Command::Upload { file, name, tag } => {
            let archive = read_image_archive(&file)
                .await
                .wrap_err_with(|| format!("failed to read {}", file.display()))?;
            let response = engine.upload_image(archive, &name, &tag).await?;
            println!("upload {}:{}: {}", name, tag, response.status);
        }
        Command::Create { image_id, name } => {
            let response = engine.create_container(&image_id, &name).await?;
            println!("container {}: {}", response.container_id, response.status);
        }
        Command::Run { image_id } => {
            let response = engine.start_from_image(&image_id).await?;
            println!("container {}: {}", response.container_id, response.status);
        }
        Command::Start { container_id } => {
            let response = engine.start_container(&container_id).await?;
            println!("container {}: {}", response.container_id, response.status);
        }
        Command::Stop { container_id } => {
            let response = engine.stop_container(&container_id).await?;
            println!("container {}: {}", response.container_id, response.status);
        }
        _ => {}
    }

    let view = engine.view().await;
    engine.stop().await;
    render::print_view(&view);
    if let (false, Some(err)) = (view.connection.connected, &view.connection.last_error) {
        eyre::bail!("{} unavailable: {}", view.endpoint, err);
    }
    Ok(())
}

async fn resolve_endpoint(store: &FileConfigStore, cli: &Cli) -> EndpointConfig {
    let mut endpoint = store.load().await;
    if let Some(host) = &cli.host {
        endpoint.host = host.clone();
    }
    if let Some(port) = cli.port {
        endpoint.port = port;
    }
    endpoint
}

async fn run_config(store: &FileConfigStore, command: &ConfigCommand) -> eyre::Result<()> {
    match command {
        ConfigCommand::Show => {
            println!("file     {}", store.path().display());
            println!("endpoint {}", store.load().await);
        }
        ConfigCommand::Set { host, port } => {
            let endpoint = EndpointConfig::new(host.clone(), *port);
            endpoint.validate()?;
            store
                .save(&endpoint)
                .await
                .wrap_err_with(|| format!("failed to write {}", store.path().display()))?;
            println!("saved {} to {}", endpoint, store.path().display());
        }
    }
    Ok(())
}

async fn watch(engine: &SyncEngine) -> eyre::Result<()> {
    let mut events = engine.subscribe();
    engine.start().await?;
    render::print_view(&engine.view().await);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(engine, event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!("missed {} events, re-reading state", missed);
                    render::print_view(&engine.view().await);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    engine.stop().await;
    Ok(())
}

async fn log_event(engine: &SyncEngine, event: SyncEvent) {
    match event {
        SyncEvent::SnapshotReplaced { generation } => {
            if let Some(snapshot) = engine.snapshot().await {
                info!(
                    generation,
                    images = snapshot.images.len(),
                    running = snapshot.running_count(),
                    stopped = snapshot.stopped_count(),
                    "state refreshed"
                );
            }
        }
        SyncEvent::SnapshotCleared => info!("cached state cleared"),
        SyncEvent::ConnectionChanged(connection) => {
            info!("connection {}", render::connection_line(&connection))
        }
        SyncEvent::LoadingChanged(loading) => info!(loading, "loading changed"),
        SyncEvent::EndpointChanged(endpoint) => info!("endpoint now {}", endpoint),
        SyncEvent::PollingChanged(policy) => info!(
            enabled = policy.enabled,
            interval_ms = policy.interval_ms,
            "polling changed"
        ),
    }
}
