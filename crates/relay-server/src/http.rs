//! HTTP API: registration, inspection, deletion, and the two endpoints that
//! speak into a session on a peer's behalf.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use metrics::counter;
use relay_core::{
    AppMessage, BusError, BusEvent, HandshakeError, Payload, RelayError, Role, SessionId, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::SESSIONS_CREATED_TOTAL;
use crate::relay::termination::KillCause;
use crate::server::AppState;

/// Default and maximum `limit` for `GET /api/logs`.
const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 200;

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown or expired session.
    #[error("session not found")]
    NotFound,
    /// Bad session id / token pair.
    #[error("invalid session credentials")]
    InvalidSession,
    /// Registry or bus outage.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The workstation did not answer in time.
    #[error("workstation did not answer in time")]
    Timeout,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Self::InvalidSession => (StatusCode::FORBIDDEN, "invalid_session"),
            Self::Unavailable(_) => {
                warn!(error = %self, "api request failed");
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            Self::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        };
        (status, Json(json!({ "error": code }))).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        if err.is_missing() {
            return Self::NotFound;
        }
        match err {
            RelayError::Handshake(HandshakeError::Unavailable(detail)) => Self::Unavailable(detail),
            RelayError::Handshake(_) => Self::InvalidSession,
            RelayError::Store(e) => Self::Unavailable(e.to_string()),
            RelayError::Bus(e) => Self::Unavailable(e.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        RelayError::from(err).into()
    }
}

impl From<HandshakeError> for ApiError {
    fn from(err: HandshakeError) -> Self {
        RelayError::from(err).into()
    }
}

impl From<BusError> for ApiError {
    fn from(err: BusError) -> Self {
        RelayError::from(err).into()
    }
}

/// Routes under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/register", post(register_handler))
        .route("/api/session/{id}", get(session_handler).delete(delete_handler))
        .route("/api/transcripts", post(transcripts_handler))
        .route("/api/logs", get(logs_handler))
}

/// Content a pairing UI encodes into a scannable code.
#[derive(Debug, Serialize, Deserialize)]
pub struct QrPayload {
    /// WebSocket endpoint.
    pub u: String,
    /// Session id.
    pub s: String,
    /// Token.
    pub t: String,
}

/// `POST /api/register` response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// New session id.
    pub session_id: String,
    /// Shared secret for both peers.
    pub token: String,
    /// Idle timeout.
    pub ttl_seconds: u64,
    /// Where peers connect.
    pub ws_endpoint: String,
    /// Pairing code content.
    pub qr_payload: QrPayload,
}

/// POST /api/register
async fn register_handler(State(state): State<AppState>) -> Result<Json<RegisterResponse>, ApiError> {
    let session = state.ctx.registry.create().await?;
    counter!(SESSIONS_CREATED_TOTAL).increment(1);
    let ws_endpoint = state.ctx.config.ws_endpoint.clone();
    Ok(Json(RegisterResponse {
        qr_payload: QrPayload {
            u: ws_endpoint.clone(),
            s: session.id.to_string(),
            t: session.token.clone(),
        },
        session_id: session.id.into_inner(),
        token: session.token,
        ttl_seconds: session.ttl_secs,
        ws_endpoint,
    }))
}

/// GET /api/session/{id}
async fn session_handler(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let ctx = &state.ctx;
    let session = ctx.registry.lookup(&SessionId::from(id)).await?;
    let store = ctx.registry.store();
    let workstation = store.occupant(&session.id, Role::Workstation).await?.is_some();
    let phone = store.occupant(&session.id, Role::Phone).await?.is_some();
    Ok(Json(json!({
        "sessionId": session.id,
        "createdAt": session.created_at.to_rfc3339(),
        "lastActiveAt": session.last_active_at.to_rfc3339(),
        "ttlSeconds": session.ttl_secs,
        "roles": { "workstation": workstation, "phone": phone },
    })))
}

/// DELETE /api/session/{id}
async fn delete_handler(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state
        .ctx
        .terminator
        .kill(&SessionId::from(id), KillCause::Explicit)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/transcripts` body.
#[derive(Debug, Deserialize)]
pub struct TranscriptRequest {
    sid: String,
    tok: String,
    text: String,
    #[serde(rename = "final_", default)]
    is_final: bool,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// POST /api/transcripts
async fn transcripts_handler(
    State(state): State<AppState>,
    Json(req): Json<TranscriptRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let ctx = &state.ctx;
    let session = ctx.registry.authenticate(&SessionId::from(req.sid), &req.tok).await?;
    let source = req.source.unwrap_or_else(|| "api".into());
    let message = AppMessage::user_text(req.text, req.id, Some(source), req.is_final);
    ctx.router
        .publish(&session.id, Role::Phone, Payload::Text(message.to_json()))
        .await?;
    if let Err(e) = ctx.liveness.touch(&session.id).await {
        debug!(session_id = %session.id, error = %e, "touch after transcript failed");
    }
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true }))))
}

/// `GET /api/logs` query.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    sid: String,
    tok: String,
    #[serde(default)]
    limit: Option<usize>,
}

/// GET /api/logs
async fn logs_handler(State(state): State<AppState>, Query(q): Query<LogsQuery>) -> Result<Json<Value>, ApiError> {
    let ctx = &state.ctx;
    let session = ctx.registry.authenticate(&SessionId::from(q.sid), &q.tok).await?;

    // subscribe before asking so the answer cannot slip past
    let mut channel = ctx.router.subscribe(&session.id).await?;
    let request_id = Uuid::new_v4().to_string();
    let request = AppMessage::GetLogs {
        id: request_id.clone(),
        limit: q.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT),
    };
    ctx.router
        .publish(&session.id, Role::Phone, Payload::Text(request.to_json()))
        .await?;

    let answer = async {
        while let Some(raw) = channel.next().await {
            if let Some(items) = logs_reply(&raw, &request_id) {
                return Some(items);
            }
        }
        None
    };
    match tokio::time::timeout(ctx.config.logs_request_timeout, answer).await {
        Ok(Some(items)) => {
            if let Err(e) = ctx.liveness.touch(&session.id).await {
                debug!(session_id = %session.id, error = %e, "touch after logs failed");
            }
            info!(session_id = %session.id, count = items.len(), "logs relayed");
            Ok(Json(json!({ "items": items })))
        }
        Ok(None) | Err(_) => Err(ApiError::Timeout),
    }
}

/// Items of a workstation `logs` answer to `request_id`, if `raw` is one.
fn logs_reply(raw: &str, request_id: &str) -> Option<Vec<Value>> {
    let BusEvent::Frame(envelope) = serde_json::from_str(raw).ok()? else {
        return None;
    };
    if envelope.from_role != Role::Workstation || envelope.b64 {
        return None;
    }
    match AppMessage::parse(&envelope.frame)? {
        AppMessage::Logs { reply_to, items } if reply_to == request_id => Some(items),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_core::Envelope;

    fn frame(role: Role, text: &str) -> String {
        let envelope = Envelope::wrap(SessionId::from("s"), role, Payload::Text(text.into()), Utc::now());
        serde_json::to_string(&BusEvent::Frame(envelope)).unwrap()
    }

    #[test]
    fn logs_reply_matches_correlation_id() {
        let raw = frame(Role::Workstation, r#"{"type":"logs","replyTo":"r1","items":[{"m":"a"}]}"#);
        assert_eq!(logs_reply(&raw, "r1"), Some(vec![json!({"m": "a"})]));
        assert_eq!(logs_reply(&raw, "r2"), None);
    }

    #[test]
    fn logs_reply_ignores_phone_and_other_messages() {
        let from_phone = frame(Role::Phone, r#"{"type":"logs","replyTo":"r1","items":[]}"#);
        assert_eq!(logs_reply(&from_phone, "r1"), None);
        let other = frame(Role::Workstation, "pong-1");
        assert_eq!(logs_reply(&other, "r1"), None);
        assert_eq!(logs_reply("garbage", "r1"), None);
    }

    #[test]
    fn store_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from(StoreError::Expired("s".into())).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(StoreError::Unavailable("down".into())).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn credential_errors_are_forbidden() {
        assert_eq!(
            ApiError::from(HandshakeError::BadToken).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(HandshakeError::UnknownSession).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(HandshakeError::Unavailable("x".into())).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn bus_outage_is_unavailable() {
        let err = ApiError::from(BusError::Unavailable("refused".into()));
        assert!(err.to_string().contains("refused"));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ApiError::from(RelayError::Store(StoreError::NotFound("s".into()))).to_string(),
            "session not found"
        );
    }

    #[test]
    fn transcript_request_accepts_final_underscore() {
        let req: TranscriptRequest =
            serde_json::from_str(r#"{"sid":"s","tok":"t","text":"hi","final_":true}"#).unwrap();
        assert!(req.is_final);
        assert!(req.source.is_none());
    }
}
