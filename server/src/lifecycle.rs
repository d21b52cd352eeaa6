//! Application lifecycle and graceful shutdown.
//!
//! 1. **Startup**: connect to `PostgreSQL`, apply migrations, wire the engine
//! 2. **Runtime**: serve the API and `/metrics`, sweep in the background
//! 3. **Shutdown**: on Ctrl+C or SIGTERM stop accepting requests, signal the
//!    sweeper and wait for it (bounded by `SHUTDOWN_TIMEOUT_SECS`)

use crate::config::Config;
use crate::notifications::TracingNotificationGateway;
use anyhow::Context;
use axum::{Router, routing::get};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use waitlist_core::environment::SystemClock;
use waitlist_postgres::{
    PostgresAccessPolicy, PostgresCapacityTracker, PostgresWaitlistStore, run_migrations,
};
use waitlist_runtime::metrics::MetricsServer;
use waitlist_runtime::{ExpirySweeper, WaitlistEngine, WaitlistEnvironment};
use waitlist_web::{AppState, router};

/// A fully wired server, ready to run.
pub struct Application {
    listener: tokio::net::TcpListener,
    app: Router,
    metrics_listener: tokio::net::TcpListener,
    metrics_app: Router,
    sweeper: ExpirySweeper,
    shutdown_tx: broadcast::Sender<()>,
    config: Config,
}

impl Application {
    /// Connect to the backends and bind both listeners.
    ///
    /// # Errors
    ///
    /// Fails when the database is unreachable, a migration fails, the
    /// metrics recorder cannot be installed or an address cannot be bound.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        info!(
            max_connections = config.database.max_connections,
            "Connecting to PostgreSQL"
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await
            .context("failed to connect to PostgreSQL")?;
        run_migrations(&pool)
            .await
            .context("failed to apply migrations")?;

        let environment = WaitlistEnvironment {
            store: Arc::new(PostgresWaitlistStore::from_pool(pool.clone())),
            tracker: Arc::new(PostgresCapacityTracker::new(pool.clone())),
            notifications: Arc::new(TracingNotificationGateway),
            access: Arc::new(PostgresAccessPolicy::new(pool)),
            clock: Arc::new(SystemClock),
        };
        let engine = WaitlistEngine::new(environment, config.engine_config());

        let mut metrics = MetricsServer::new(config.metrics_addr()?);
        metrics.start()?;
        let handle = metrics.handle().cloned();
        let metrics_app = Router::new().route(
            "/metrics",
            get(move || {
                let body = handle.as_ref().map(|h| h.render()).unwrap_or_default();
                async move { body }
            }),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let sweeper = ExpirySweeper::new(engine.clone(), shutdown_rx);
        let app = router(AppState::new(engine).with_sweeper(sweeper.health()));

        let listener = tokio::net::TcpListener::bind(config.server_addr()?)
            .await
            .context("failed to bind HTTP listener")?;
        let metrics_listener = tokio::net::TcpListener::bind(metrics.addr())
            .await
            .context("failed to bind metrics listener")?;

        Ok(Self {
            listener,
            app,
            metrics_listener,
            metrics_app,
            sweeper,
            shutdown_tx,
            config,
        })
    }

    /// Run until a shutdown signal arrives, then drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            listener,
            app,
            metrics_listener,
            metrics_app,
            sweeper,
            shutdown_tx,
            config,
        } = self;

        let sweeper_handle = sweeper.spawn();

        let mut metrics_shutdown = shutdown_tx.subscribe();
        let metrics_handle = tokio::spawn(async move {
            let served = axum::serve(metrics_listener, metrics_app)
                .with_graceful_shutdown(async move {
                    let _ = metrics_shutdown.recv().await;
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "Metrics server stopped with error");
            }
        });

        info!(addr = %listener.local_addr()?, "Waitlist server listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server failed")?;

        info!("HTTP server stopped, shutting down background tasks");
        let _ = shutdown_tx.send(());

        let timeout = Duration::from_secs(config.server.shutdown_timeout);
        for (name, handle) in [("sweeper", sweeper_handle), ("metrics", metrics_handle)] {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(task = name, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Task panicked during shutdown"),
                Err(_) => warn!(task = name, ?timeout, "Task did not stop within timeout"),
            }
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Resolve on Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
