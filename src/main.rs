use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use spotify_bridge::auth::{
    BackgroundRefreshScheduler, CredentialStore, RefreshCoordinator, SpotifyTokenEndpoint,
    perform_browser_login,
};
use spotify_bridge::bridge::{LocalEventBridge, MprisBus};
use spotify_bridge::clock::{Clock, SystemClock};
use spotify_bridge::config::{Cli, Command};
use spotify_bridge::controller::PlaybackController;
use spotify_bridge::logging;
use spotify_bridge::reconciler::StateReconciler;
use spotify_bridge::remote::{RemotePoller, RemoteStateClient, RspotifyApi};
use spotify_bridge::server::{self, AppState};

/// Buffer between the two playback sources and the reconciler loop
const SOURCE_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = match logging::init_logging(&cli.log_dir) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: Failed to initialize logging: {e}");
            None
        }
    };

    match cli.command() {
        Command::Login => login(&cli).await,
        Command::Serve => serve(&cli).await,
    }
}

fn token_endpoint(cli: &Cli) -> Result<SpotifyTokenEndpoint> {
    SpotifyTokenEndpoint::new(cli.spotify.client_id.clone(), cli.spotify.client_secret.clone())
        .context("building token endpoint client")
}

async fn login(cli: &Cli) -> Result<()> {
    let store = Arc::new(CredentialStore::open(&cli.token_file)?);
    let endpoint = Arc::new(token_endpoint(cli)?);
    let coordinator = RefreshCoordinator::new(store, endpoint, Arc::new(SystemClock));
    let credential = perform_browser_login(&cli.spotify).await?;
    coordinator.complete_login(credential).context("saving credential")?;
    tracing::info!(path = %cli.token_file.display(), "Credential stored");
    Ok(())
}

async fn serve(cli: &Cli) -> Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "=== spotify-bridge starting ===");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(CredentialStore::open(&cli.token_file)?);
    let coordinator = RefreshCoordinator::new(store, Arc::new(token_endpoint(cli)?), clock.clone());

    let remote = RemoteStateClient::new(
        Arc::new(RspotifyApi::new()),
        coordinator.clone(),
        Some(cli.device_name.clone()),
    );
    let reconciler = StateReconciler::new();
    let (updates_tx, updates_rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);

    let bus = Arc::new(MprisBus::new(cli.mpris_bus, cli.mpris_prefix.clone()));
    let bridge =
        LocalEventBridge::new(bus, cli.device_name.clone(), clock.clone(), updates_tx.clone());
    let poller = RemotePoller::new(remote.clone(), updates_tx).with_interval(cli.poll_interval());

    let tasks = vec![
        tokio::spawn(reconciler.clone().run(updates_rx)),
        tokio::spawn(reconciler.clone().watch_auth(coordinator.subscribe_status(), clock)),
        tokio::spawn(BackgroundRefreshScheduler::new(coordinator).run()),
        tokio::spawn(poller.run()),
        tokio::spawn(bridge.clone().run()),
    ];

    let controller = PlaybackController::new(remote, Some(bridge), reconciler.clone());
    let state = AppState { controller, reconciler };
    let result = server::serve(state, cli.port, shutdown_signal()).await;

    for task in tasks {
        task.abort();
    }
    tracing::info!("spotify-bridge shutting down");
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
