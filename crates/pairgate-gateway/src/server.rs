use crate::error::ApiError;
use crate::middleware::{auth_middleware, AuthConfig};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware as axum_mw,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pairgate_core::{PairgateError, SessionId};
use pairgate_session::{AuthOutcome, ConnectionStatus, HandleSnapshot, SessionManager};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;

/// Shared application state.
pub struct AppState {
    /// Owner of every live session.
    pub manager: Arc<SessionManager>,
}

/// The HTTP gateway.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway without auth.
    pub fn build(manager: Arc<SessionManager>) -> Router {
        Self::build_with_auth(manager, AuthConfig::default())
    }

    /// Build the gateway, requiring an API key on every route except
    /// `/health` when `auth` has keys configured.
    pub fn build_with_auth(manager: Arc<SessionManager>, auth: AuthConfig) -> Router {
        let state = Arc::new(AppState { manager });

        let api = Router::new()
            .route("/create-session", post(create_session_handler))
            .route("/sessions", get(list_sessions_handler))
            .route(
                "/session/{id}",
                get(session_status_handler).delete(remove_session_handler),
            )
            .route("/session/{id}/qr", get(qr_handler))
            .route("/session/{id}/send", post(send_handler))
            .route("/session/{id}/reconnect", post(reconnect_handler));

        let api = if auth.is_enabled() {
            api.route_layer(
                ServiceBuilder::new()
                    .layer(axum_mw::from_fn_with_state(Arc::new(auth), auth_middleware)),
            )
        } else {
            api
        };

        Router::new()
            .route("/health", get(health_handler))
            .merge(api)
            .with_state(state)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SendRequest {
    phone: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RemoveQuery {
    #[serde(default)]
    purge: bool,
}

/// Parse a JSON body, treating an empty body as the default request.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}

fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::bad_request(format!("'{field}' is required"))),
    }
}

fn session_view(snapshot: &HandleSnapshot) -> Value {
    json!({
        "sessionId": snapshot.session_id,
        "status": snapshot.status,
        "account": snapshot.account,
        "hasPairingCode": snapshot.pairing_code.is_some(),
        "disconnectReason": snapshot.disconnect_reason,
        "statusChangedAt": snapshot.status_changed_at,
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "pairgate",
        "sessions": state.manager.registry().len(),
    }))
}

/// `POST /create-session`: create (or fetch) a session and wait for it to
/// either issue a pairing code or report ready.
async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: CreateSessionRequest = parse_body(&body)?;
    let session_id = request.session_id.map(SessionId::parse).transpose()?;

    let handle = state.manager.create_session(session_id).await?;
    let session_id = handle.session_id().clone();

    match state.manager.await_authentication(&handle, None).await {
        Ok(AuthOutcome::PairingCode(code)) => {
            Ok(Json(json!({ "sessionId": session_id, "qr": code })).into_response())
        }
        Ok(AuthOutcome::Ready) => Ok(Json(json!({
            "sessionId": session_id,
            "message": "Client is ready",
        }))
        .into_response()),
        Err(PairgateError::Timeout(after)) => {
            info!(session_id = %session_id, ?after, "Authentication still pending");
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "sessionId": session_id,
                    "message": format!(
                        "No pairing code after {}s; poll /session/{session_id}/qr",
                        after.as_secs()
                    ),
                })),
            )
                .into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// `GET /session/{id}/qr`: current pairing code, or why there is none.
async fn qr_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state.manager.get_session(&id)?.snapshot();

    let body = match (snapshot.status, snapshot.pairing_code) {
        (ConnectionStatus::Ready, _) => json!({ "message": "Client is ready", "qr": null }),
        (_, Some(code)) => json!({ "qr": code }),
        (ConnectionStatus::Disconnected, None) => json!({
            "message": format!(
                "Client disconnected: {}",
                snapshot.disconnect_reason.as_deref().unwrap_or("unknown reason")
            ),
            "qr": null,
        }),
        (_, None) => json!({ "message": "Waiting for pairing code", "qr": null }),
    };
    Ok(Json(body))
}

/// `POST /session/{id}/send`: send a text message.
async fn send_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    // Unknown sessions are reported before the body is validated.
    state.manager.get_session(&id)?;

    let request: SendRequest = parse_body(&body)?;
    let phone = required("phone", request.phone)?;
    let message = required("message", request.message)?;

    state.manager.send_message(&id, &phone, &message).await?;
    Ok(Json(json!({ "success": true })))
}

async fn list_sessions_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sessions: Vec<Value> = state.manager.list_sessions().iter().map(session_view).collect();
    Json(json!({ "sessions": sessions }))
}

async fn session_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state.manager.get_session(&id)?.snapshot();
    Ok(Json(session_view(&snapshot)))
}

async fn reconnect_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.manager.reconnect(&id).await?;
    Ok(Json(session_view(&handle.snapshot())))
}

async fn remove_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<RemoveQuery>,
) -> Result<Json<Value>, ApiError> {
    state.manager.remove_session(&id, query.purge).await?;
    Ok(Json(json!({ "success": true, "purged": query.purge })))
}
