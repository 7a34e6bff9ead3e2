//! # Metarepo HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /transaction` - Run one operation request as a transaction
//! - `GET /entity/{guid}` - Current entity (full or proxy)
//! - `GET /entity/{guid}/relationships` - Relationships attached to an entity
//! - `GET /relationship/{guid}` - Current relationship
//! - `GET /history/{guid}` - Stored versions, newest first
//!
//! ## Environment Variables
//!
//! - `METAREPO_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)

mod handlers;
mod types;

// Re-exports for integration tests (via `metarepo::api::*`)
pub use handlers::{
    USER_HEADER, entity_handler, entity_relationships_handler, health_handler, history_handler,
    relationship_handler, status_for, transaction_handler,
};
pub use types::{
    DEFAULT_HISTORY_LIMIT, EntityResponse, ErrorBody, HealthResponse, HistoryQuery,
    HistoryResponse, MAX_HISTORY_LIMIT, RelationshipResponse, RelationshipsQuery,
    RelationshipsResponse, TransactionResponse, parse_operation,
};

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    routing::{get, post},
};
use metarepo_core::{MetarepoError, Repository};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Maximum accepted request body (2 MB).
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state: the repository and the user recorded on anonymous writes.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<RwLock<Repository>>,
    pub default_user: String,
}

impl AppState {
    #[must_use]
    pub fn new(repository: Repository, default_user: impl Into<String>) -> Self {
        Self {
            repository: Arc::new(RwLock::new(repository)),
            default_user: default_user.into(),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from `METAREPO_CORS_ORIGINS`.
///
/// "*" allows every origin, a comma-separated list allows those origins,
/// anything else (or nothing) allows localhost only.
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("METAREPO_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!("CORS: Allowing ALL origins (METAREPO_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in METAREPO_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                restrict(CorsLayer::new().allow_origin(allowed_origins))
            }
        }
        None => {
            tracing::info!("CORS: No METAREPO_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

fn restrict(layer: CorsLayer) -> CorsLayer {
    layer
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(USER_HEADER)])
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();

    restrict(CorsLayer::new().allow_origin(origins))
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner): tracing, CORS, body limit.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/transaction", post(handlers::transaction_handler))
        .route("/entity/{guid}", get(handlers::entity_handler))
        .route(
            "/entity/{guid}/relationships",
            get(handlers::entity_relationships_handler),
        )
        .route("/relationship/{guid}", get(handlers::relationship_handler))
        .route("/history/{guid}", get(handlers::history_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer())
                .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve `state` on `addr` until Ctrl+C.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), MetarepoError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| MetarepoError::Storage(format!("Bind failed: {}", e)))?;

    tracing::info!("Metarepo HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| MetarepoError::Storage(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
