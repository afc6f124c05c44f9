mod notifier;
mod problem;
mod reconcile;
mod router;
mod telemetry;
mod webhook;

use std::{future::IntoFuture, sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use live_notifier_core::{EventType, WatchedBroadcaster};
use live_notifier_discord::DiscordClient;
use live_notifier_twitch::{HelixClient, TokenProvider, TwitchOAuthClient};
use live_notifier_util::{load_env_file, AppConfig};

use crate::notifier::{LiveNotifier, NotificationDispatcher, StreamInfoFetcher};
use crate::reconcile::{ReconcileWorker, SubscriptionReconciler};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let http = reqwest::Client::builder().timeout(UPSTREAM_TIMEOUT).build()?;
    let tokens = TokenProvider::new(TwitchOAuthClient::new(
        config.twitch.client_id.clone(),
        config.twitch.client_secret.clone(),
        config.twitch.oauth_base_url.clone(),
        http.clone(),
    ));
    let helix = HelixClient::new(
        config.twitch.client_id.clone(),
        config.twitch.helix_base_url.clone(),
        http.clone(),
    );
    let discord = DiscordClient::new(
        config.discord.bot_token.clone(),
        config.discord.api_base_url.clone(),
        http,
    );

    let addr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "listener bound");

    if let Err(err) = tokens.acquire().await {
        error!(stage = "oauth", error = %err, "failed to acquire app access token");
        return Err(err.into());
    }

    let broadcasters: Vec<WatchedBroadcaster> = config
        .broadcaster_ids
        .iter()
        .map(WatchedBroadcaster::new)
        .collect();
    let callback_url = config.callback_url();
    let reconciler = SubscriptionReconciler::new(
        helix.clone(),
        tokens.clone(),
        config.twitch.webhook_secret.clone(),
    );
    let failures = reconciler
        .reconcile_all(&broadcasters, EventType::STREAM_ONLINE, &callback_url)
        .await;
    info!(
        stage = "reconcile",
        broadcasters = broadcasters.len(),
        failures,
        %callback_url,
        "startup reconciliation finished"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = config.reconcile_interval.map(|interval| {
        info!(stage = "reconcile", interval_secs = interval.as_secs(), "starting reconcile worker");
        ReconcileWorker::new(
            reconciler,
            broadcasters,
            EventType::STREAM_ONLINE,
            callback_url,
            interval,
        )
        .spawn(shutdown_rx.clone())
    });

    let tasks = TaskTracker::new();
    let notifier = LiveNotifier::new(
        StreamInfoFetcher::new(helix, tokens),
        NotificationDispatcher::new(Arc::new(discord), config.discord.notify_channel_id.clone()),
    );
    let state = router::AppState::new(
        metrics,
        Arc::from(config.twitch.webhook_secret.as_bytes()),
        notifier,
        tasks.clone(),
    );

    info!(stage = "app", %addr, "starting HTTP server");
    let mut server_shutdown = shutdown_rx;
    let mut server = tokio::spawn(
        axum::serve(listener, router::app_router(state))
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .into_future(),
    );

    let server_exited = tokio::select! {
        _ = shutdown_signal() => {
            info!(stage = "app", grace_secs = config.shutdown_grace.as_secs(), "shutdown requested; draining");
            false
        }
        result = &mut server => {
            log_server_exit(result);
            true
        }
    };
    let _ = shutdown_tx.send(true);

    let drain = async {
        if !server_exited {
            log_server_exit((&mut server).await);
        }
        tasks.close();
        tasks.wait().await;
    };
    if tokio::time::timeout(config.shutdown_grace, drain).await.is_err() {
        warn!(stage = "app", in_flight = tasks.len(), "grace period elapsed; abandoning in-flight work");
        server.abort();
    }

    if let Some(worker) = worker {
        worker.abort();
    }

    info!(stage = "app", "shutdown complete");
    Ok(())
}

fn log_server_exit(result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!(stage = "app", "HTTP server stopped"),
        Ok(Err(err)) => error!(stage = "app", error = %err, "HTTP server failed"),
        Err(err) => error!(stage = "app", error = %err, "HTTP server task panicked"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(stage = "app", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(stage = "app", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
