// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process assembly.
//!
//! Startup order: logging → configuration → state store → services → seed
//! workflows → dispatch worker → HTTP server. Exit codes: 0 clean shutdown,
//! 1 configuration error, 2 backend unreachable at startup.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use ops_core::application::{
    Dispatcher, DispatcherConfig, LifecycleManager, TaskQueue, WorkflowEngine,
};
use ops_core::config::Config;
use ops_core::domain::repository::create_state_store;
use ops_core::infrastructure::event_bus::EventBus;
use ops_core::infrastructure::routing_client::RoutingClient;
use ops_core::presentation::api::{router, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = init_logging() {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(1);
        }
    };

    let store = match create_state_store(&config.storage_backend).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "state store backend unreachable");
            std::process::exit(2);
        }
    };

    let events = EventBus::with_default_capacity();
    let lifecycle = Arc::new(LifecycleManager::new(store.clone(), events.clone()));
    let queue = Arc::new(TaskQueue::new());
    let engine = Arc::new(WorkflowEngine::new(store, lifecycle.clone(), queue.clone()));

    if let Some(dir) = &config.seed_workflows {
        match engine.seed_from_dir(dir).await {
            Ok(count) => info!(count, dir = %dir.display(), "seeded workflow definitions"),
            Err(e) => {
                error!(error = %e, "failed to seed workflow definitions");
                std::process::exit(1);
            }
        }
    }

    let routing_client = match RoutingClient::new(
        &config.routing_base_url,
        config.routing_timeout,
        config.routing_authorization.clone(),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "failed to build routing client");
            std::process::exit(1);
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(
        queue,
        lifecycle.clone(),
        routing_client,
        events,
        DispatcherConfig::default(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.run(shutdown_rx).await }
    });

    let state = Arc::new(AppState {
        lifecycle,
        engine,
        api_key: config.api_key.clone(),
    });
    let app = router(state);

    if let Err(e) = serve(app, config.listen_addr).await {
        error!(error = %e, "http server failed");
        let _ = shutdown_tx.send(true);
        let _ = worker.await;
        std::process::exit(1);
    }

    // Server returned after the shutdown signal; stop the dispatch worker at
    // its next task boundary.
    let _ = shutdown_tx.send(true);
    let _ = worker.await;
    info!("shutdown complete");
}

async fn serve(app: axum::Router, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "ops-core listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

/// Initialize tracing subscriber for logging
fn init_logging() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| {
            let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::EnvFilter::try_new(level)
        })
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}
