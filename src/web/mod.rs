//! API server module.
//!
//! Target/health listing for the status-page layer, target CRUD for the
//! admin layer, the maintenance override and the manual "run check now"
//! trigger. Every mutation notifies the scheduler so the live registry
//! stays current.

mod handlers;

pub use handlers::*;

use crate::config::EngineConfig;
use crate::db::Store;
use crate::scheduler::Scheduler;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
}

/// API server for statuspulse.
pub struct Server {
    config: EngineConfig,
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: EngineConfig, store: Arc<Store>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            config,
            state: AppState { store, scheduler },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/targets", get(handlers::handle_get_targets))
            .route("/api/targets/{kind}", post(handlers::handle_create_target))
            .route("/api/targets/{kind}/{id}", get(handlers::handle_get_target))
            .route("/api/targets/{kind}/{id}", put(handlers::handle_update_target))
            .route(
                "/api/targets/{kind}/{id}",
                delete(handlers::handle_delete_target),
            )
            .route(
                "/api/targets/{kind}/{id}/maintenance",
                post(handlers::handle_set_maintenance),
            )
            .route(
                "/api/targets/{kind}/{id}/check",
                post(handlers::handle_run_check),
            )
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.routes();

        tracing::info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
