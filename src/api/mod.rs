//! HTTP/JSON API over the session registry.
//!
//! ## Endpoints
//!
//! ### Health & Info
//! - `GET /health` - Health check (never authenticated)
//! - `GET /api/v1` - API information
//!
//! ### Sessions
//! - `GET /api/v1/sessions` - List live sessions
//! - `POST /api/v1/sessions` - Spawn a session
//! - `GET /api/v1/sessions/{id}` - Describe a session
//! - `DELETE /api/v1/sessions/{id}` - Close a session
//! - `POST /api/v1/sessions/{id}/exec` - Run a command
//! - `POST /api/v1/sessions/{id}/interrupt` - Interrupt the running command
//!
//! ## Example
//!
//! ```no_run
//! use arbitrium::api::{serve, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> arbitrium::Result<()> {
//!     let config = ServerConfig::new("127.0.0.1", 3000);
//!     serve(config).await
//! }
//! ```

pub mod auth;
pub mod handlers;
pub mod router;
pub mod types;

pub use auth::{auth_middleware, SecurityConfig};
pub use handlers::AppState;
pub use router::{
    create_router, create_router_with_security, create_router_with_state, serve,
    serve_with_state, ServerConfig,
};
pub use types::{
    CloseSessionResponse, CreateSessionRequest, CreateSessionResponse, ErrorResponse, ExecRequest,
    ExecResponse, ListSessionsResponse,
};
