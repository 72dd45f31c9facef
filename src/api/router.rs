//! API router configuration.

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::auth::{auth_middleware, SecurityConfig};
use super::handlers::{
    api_info, create_session, delete_session, exec_command, get_session, health,
    interrupt_session, list_sessions, AppState,
};
use crate::error::ArbitriumError;

/// Create the API router with a fresh registry and no authentication.
pub fn create_router() -> Router {
    create_router_with_state(AppState::new())
}

/// Create the API router with custom state and no authentication.
pub fn create_router_with_state(state: AppState) -> Router {
    create_router_with_security(state, SecurityConfig::default())
}

/// Create the API router; everything but `/health` requires a key when
/// `security` has any.
pub fn create_router_with_security(state: AppState, security: SecurityConfig) -> Router {
    let session_routes = Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/{id}", get(get_session).delete(delete_session))
        .route("/{id}/exec", post(exec_command))
        .route("/{id}/interrupt", post(interrupt_session));

    let mut api_v1 = Router::new()
        .route("/", get(api_info))
        .nest("/sessions", session_routes);
    if security.auth_enabled() {
        api_v1 = api_v1.layer(middleware::from_fn_with_state(
            Arc::new(security),
            auth_middleware,
        ));
    }

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    pub security: SecurityConfig,
    /// Stop accepting on Ctrl-C / SIGTERM and close all sessions.
    pub graceful_shutdown: bool,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    pub fn without_graceful_shutdown(mut self) -> Self {
        self.graceful_shutdown = false;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            security: SecurityConfig::default(),
            graceful_shutdown: true,
        }
    }
}

/// Start the API server with a fresh registry.
pub async fn serve(config: ServerConfig) -> crate::Result<()> {
    serve_with_state(config, AppState::new()).await
}

/// Start the API server with custom state.
///
/// Every session still open when the server stops is closed before this
/// returns.
pub async fn serve_with_state(config: ServerConfig, state: AppState) -> crate::Result<()> {
    let addr = config.bind_address();
    let registry = state.registry.clone();
    if config.security.auth_enabled() {
        info!(keys = config.security.key_count(), "API key authentication enabled");
    } else {
        warn!("API key authentication disabled");
    }
    let router = create_router_with_security(state, config.security.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(ArbitriumError::Io)?;
    info!("Starting arbitrium API server on {}", addr);

    let served = if config.graceful_shutdown {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    } else {
        axum::serve(listener, router).await
    };

    let closed = registry.close_all().await;
    info!(sessions = closed.len(), "Server stopped");

    served.map_err(|e| ArbitriumError::Io(std::io::Error::other(e.to_string())))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
