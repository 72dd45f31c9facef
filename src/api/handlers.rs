//! REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::types::{
    CloseSessionResponse, CreateSessionRequest, CreateSessionResponse, ErrorResponse, ExecRequest,
    ExecResponse, ListSessionsResponse,
};
use crate::error::ArbitriumError;
use crate::session::{SessionInfo, SessionRegistry};

/// Error half of every handler result.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

type ApiResult<T> = Result<T, ApiError>;

fn api_error(err: ArbitriumError) -> ApiError {
    let (status, body) = ErrorResponse::from_error(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    } else {
        tracing::debug!(error = %err, "Request rejected");
    }
    (status, Json(body))
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(SessionRegistry::with_defaults()))
    }

    pub fn with_registry(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "arbitrium",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// List all live sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
) -> ApiResult<Json<ListSessionsResponse>> {
    let sessions = state.registry.list().await.map_err(api_error)?;
    Ok(Json(ListSessionsResponse {
        count: sessions.len(),
        sessions,
    }))
}

/// Create a new session.
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<CreateSessionResponse>)> {
    let session = state.registry.spawn(req).await.map_err(api_error)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse::from_session(&session)),
    ))
}

/// Describe one session.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionInfo>> {
    let session = state.registry.get(&id).await.map_err(api_error)?;
    Ok(Json(session.describe()))
}

/// Close a session.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CloseSessionResponse>> {
    let summary = state.registry.close(&id).await.map_err(api_error)?;
    Ok(Json(CloseSessionResponse {
        session_id: summary.session_id,
        command_count: summary.command_count,
    }))
}

/// Run a command in a session.
pub async fn exec_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExecRequest>,
) -> ApiResult<Json<ExecResponse>> {
    if req.timeout_ms == Some(0) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request("timeout_ms must be greater than zero")),
        ));
    }
    let timeout = req
        .timeout()
        .unwrap_or(state.registry.config().default_timeout);

    let result = state
        .registry
        .exec(&id, &req.command, Some(timeout))
        .await
        .map_err(api_error)?;
    Ok(Json(ExecResponse::from_result(result, timeout)))
}

/// Interrupt the running command of a session.
pub async fn interrupt_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.interrupt(&id).map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_new() {
        let state = AppState::new();
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        assert_eq!(health().await, "OK");
    }

    #[tokio::test]
    async fn test_api_info_endpoint() {
        let Json(info) = api_info().await;
        assert_eq!(info["name"], "arbitrium");
        assert_eq!(info["status"], "running");
    }

    #[tokio::test]
    async fn test_list_sessions_empty() {
        let Json(list) = list_sessions(State(AppState::new())).await.unwrap();
        assert_eq!(list.count, 0);
        assert!(list.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let state = AppState::new();
        let err = get_session(State(state.clone()), Path("missing".into()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        assert_eq!(err.1.code, "SESSION_NOT_FOUND");

        let err = delete_session(State(state), Path("missing".into()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let req = ExecRequest {
            command: "true".into(),
            timeout_ms: Some(0),
        };
        let err = exec_command(State(AppState::new()), Path("any".into()), Json(req))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_exec_close_flow() {
        let state = AppState::new();
        let req = CreateSessionRequest {
            session_id: Some("handler-flow".into()),
            shell: Some("/bin/sh".into()),
            ..Default::default()
        };
        let (status, Json(created)) = create_session(State(state.clone()), Json(req))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.session_id.as_str(), "handler-flow");

        let exec = ExecRequest {
            command: "echo hello".into(),
            timeout_ms: Some(5_000),
        };
        let Json(resp) = exec_command(State(state.clone()), Path("handler-flow".into()), Json(exec))
            .await
            .unwrap();
        assert_eq!(resp.status, "completed");
        assert_eq!(resp.exit_code, Some(0));
        assert_eq!(resp.output.trim(), "hello");

        let Json(closed) = delete_session(State(state.clone()), Path("handler-flow".into()))
            .await
            .unwrap();
        assert_eq!(closed.command_count, 1);
        assert!(state.registry.is_empty());
    }
}
