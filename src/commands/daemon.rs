//! `taskd run` — starts the dispatcher/runner engine and blocks until a
//! shutdown signal arrives (spec §4.4 Startup/Shutdown, §5 Cancellation).

use clap::Command;
use std::sync::Arc;

use taskd_core::{Engine, Store};

pub fn command() -> Command {
    Command::new("run").about("Start the scheduler daemon (foreground)")
}

pub async fn run(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let store = Arc::new(Store::open(&config.db_path)?);
    let engine = Engine::new(store, &config);

    tracing::info!(db_path = %config.db_path.display(), "taskd starting");

    let run = engine.run();
    tokio::pin!(run);

    tokio::select! {
        res = &mut run => {
            res?;
        }
        _ = wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received, draining in-flight tasks");
            engine.shutdown().await?;
        }
    }
    tracing::info!("taskd stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
