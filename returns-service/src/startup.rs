//! Application startup and lifecycle management.

use crate::config::ReturnsConfig;
use crate::handlers;
use crate::services::metrics::init_metrics;
use crate::services::Database;
use axum::{
    middleware::from_fn,
    routing::{get, patch, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::tracing::request_context_middleware;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ReturnsConfig,
    pub db: Database,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ReturnsConfig) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;

        db.run_migrations().await?;
        init_metrics();

        let state = AppState {
            config: config.clone(),
            db,
        };

        // Bind listener (port 0 = random port for testing)
        let host: std::net::IpAddr = config.common.host.parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Invalid host '{}': {}",
                config.common.host,
                e
            ))
        })?;
        let addr = SocketAddr::new(host, config.common.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Returns service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        let router = build_router(self.state);
        axum::serve(self.listener, router).await?;
        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        // Order store (seeding + return-entry lookup)
        .route("/orders", post(handlers::orders::create_order))
        .route(
            "/orders/:order_number/returnability",
            get(handlers::orders::order_returnability),
        )
        // Return request + action queue
        .route(
            "/returns",
            post(handlers::returns::create_return).get(handlers::returns::list_returns),
        )
        .route(
            "/returns/schedule-pickup",
            post(handlers::returns::schedule_pickup_batch),
        )
        .route("/returns/:id", get(handlers::returns::get_return))
        // Line transitions
        .route(
            "/returns/:id/schedule-pickup",
            post(handlers::returns::schedule_pickup),
        )
        .route(
            "/returns/:id/mark-in-transit",
            post(handlers::returns::mark_in_transit),
        )
        .route("/returns/:id/receive", post(handlers::returns::receive))
        .route("/returns/:id/qc", post(handlers::returns::record_qc))
        .route(
            "/returns/:id/refund-preview",
            get(handlers::returns::refund_preview),
        )
        .route("/returns/:id/refund", post(handlers::returns::process_refund))
        .route(
            "/returns/:id/exchange",
            post(handlers::returns::create_exchange),
        )
        .route("/returns/:id/complete", post(handlers::returns::complete))
        .route("/returns/:id/cancel", post(handlers::returns::cancel))
        .route("/returns/:id/notes", patch(handlers::returns::update_notes))
        // Inventory reads
        .route("/inventory/balances", get(handlers::inventory::balances))
        .route("/inventory/ledger", get(handlers::inventory::ledger))
        .layer(from_fn(request_context_middleware))
        .layer(TraceLayer::new_for_http())
        // Operator tooling calls this service from a browser context
        .layer(CorsLayer::permissive())
        .with_state(state)
}
