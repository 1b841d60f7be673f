mod camera;
mod config;
mod error;
mod http;
mod image;
mod poller;
mod utils;

use anyhow::Context;
use clap::Parser;
use config::{Cli, Settings};
use env_logger::Env;
use http::HttpFetcher;
use log::{info, warn};
use poller::Poller;
use tokio::{sync::watch, task};
use utils::SystemClock;

fn spawn_signal_listener(tx: watch::Sender<bool>) {
    task::spawn(async move {
        wait_for_signal().await;
        info!("Signal received, stopping after the current cycle");
        let _ = tx.send(true);
    });
}

/// Resolves on Ctrl-C. If the handler can't be installed this never resolves,
/// so a broken signal setup doesn't stop the poller.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c() => {}
                Some(()) = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let settings = Settings::from_cli(Cli::parse());
    info!("Starting with {}", serde_json::to_string(&settings)?);
    info!("Polling camera {} at {}:{}", settings.camera_name, settings.url.host(), settings.url.port().unwrap_or_default());
    if settings.insecure_tls && settings.url.scheme() == "https" {
        warn!("TLS certificate verification is disabled for {}", settings.url);
    }

    let fetcher = HttpFetcher::new(settings.url.clone(), &settings.fetch_options())
        .context("building http client")?;
    let mut poller = Poller::new(fetcher, SystemClock, &settings.camera_name, &settings.output_dir, settings.interval)
        .with_max_cycles(settings.max_cycles);

    let (tx, rx) = watch::channel(false);
    spawn_signal_listener(tx);

    poller.run(rx).await;
    info!("Stopped {}: {}", settings.camera_name, serde_json::to_string(&poller.stats())?);
    Ok(())
}
