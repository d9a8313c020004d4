use std::sync::Arc;

use anyhow::Context;
use ipsyncd::{EventKind, LocalBackend, SyncConfig, SyncEngine, SyncEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Once,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--once" => mode = CliMode::Once,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ipsyncd=info,ipsync_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: ipsyncd [--once]");
        println!("  --once   Ingest the folder a single time, print the state as JSON and exit");
        return Ok(());
    }
    init_tracing();

    let config = SyncConfig::from_env()?;
    let backend = Arc::new(LocalBackend::new(config.store_binary.clone()));

    if mode == CliMode::Once {
        let engine = SyncEngine::new(config, backend);
        let snapshot = engine.ingest_once().await?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    info!(
        folder = %config.folder.display(),
        repo = %config.repo_path.display(),
        auto_start = config.auto_start,
        "starting"
    );
    let engine = SyncEngine::new(config, backend);
    engine.subscribe(EventKind::StateChanged, |event| {
        if let SyncEvent::StateChanged(state) = event {
            info!(
                connected = state.connected,
                synced = state.synced,
                files = state.files.len(),
                "state changed"
            );
        }
    });
    engine.subscribe(EventKind::FilesAdded, |_| info!("files added"));
    engine.autostart();

    tokio::signal::ctrl_c()
        .await
        .context("failed waiting for shutdown signal")?;
    info!("shutting down");
    engine.stop().await;
    Ok(())
}
