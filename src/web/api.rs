use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode, Uri},
    middleware::Next,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::dispatch::{BatchSnapshot, BatchStatus};
use crate::gate::{AdmissionError, RequestGate, SendSmsRequest};
use crate::storage::{MessageLog, OutcomeStore, StorageError};

pub const AVAILABLE_ROUTES: &[&str] = &[
    "GET /",
    "GET /api/health",
    "GET /api/status",
    "POST /api/send-sms",
    "GET /api/sms-logs",
    "GET /api/batches",
    "GET /api/batches/:id",
    "POST /api/batches/:id/cancel",
    "GET /api/progress",
];

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<RequestGate>,
    pub store: Arc<dyn OutcomeStore>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(gate: Arc<RequestGate>, store: Arc<dyn OutcomeStore>) -> Self {
        Self {
            gate,
            store,
            start_time: Instant::now(),
        }
    }
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    Admission(AdmissionError),
    BadRequest(String),
    NotFound(String),
    Storage(StorageError),
}

impl From<AdmissionError> for ApiError {
    fn from(e: AdmissionError) -> Self {
        ApiError::Admission(e)
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Storage(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, reason, message) = match self {
            ApiError::Admission(e) => {
                let (status, reason) = match &e {
                    AdmissionError::Validation(v) => (StatusCode::BAD_REQUEST, v.reason()),
                    AdmissionError::Conflict { .. } => (StatusCode::CONFLICT, "batch_in_progress"),
                    AdmissionError::RateLimited { retry_after: wait } => {
                        retry_after = Some(wait.as_secs().max(1));
                        (StatusCode::TOO_MANY_REQUESTS, "rate_limited")
                    }
                };
                (status, reason, e.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Storage(e) => {
                tracing::error!(error = %e, "Storage error while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    "Failed to retrieve SMS logs.".to_string(),
                )
            }
        };

        let body = Json(json!({
            "status": "error",
            "reason": reason,
            "message": message,
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// General per-client limit on every /api route
pub async fn api_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    match state.gate.check_api(addr.ip()) {
        Ok(()) => next.run(request).await,
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// GET /
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "SMS Batch API Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": AVAILABLE_ROUTES,
    }))
}

/// GET /api/health
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "success",
        "message": "SMS Batch API is running",
        "timestamp": Utc::now(),
        "uptime": state.start_time.elapsed().as_secs_f64(),
    }))
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let engine = state.gate.engine();
    let active = engine
        .list_batches()
        .iter()
        .filter(|b| b.status == BatchStatus::Sending)
        .count();

    Json(json!({
        "status": "success",
        "data": {
            "service": "SMS Batch API",
            "version": env!("CARGO_PKG_VERSION"),
            "carrier": engine.carrier_kind(),
            "activeBatches": active,
            "progressObservers": engine.publisher().observer_count(),
            "features": {
                "smsSupported": true,
                "rateLimitingEnabled": true,
                "loggingEnabled": true,
                "progressStream": true,
            },
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSmsResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub accepted: bool,
    pub estimated_duration_seconds: u64,
    pub batch_id: Uuid,
    pub details: SendSmsDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSmsDetails {
    pub phone_number: String,
    pub message_count: u32,
    pub speed: String,
    pub estimated_duration: String,
}

/// POST /api/send-sms
pub async fn send_sms(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: Result<Json<SendSmsRequest>, JsonRejection>,
) -> Result<Json<SendSmsResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let ack = state.gate.admit(addr.ip(), &request)?;
    let snapshot = state.gate.engine().snapshot(ack.batch_id);

    let (phone_number, message_count, speed) = match snapshot {
        Some(s) => (s.recipient, s.total, s.speed.to_string()),
        None => (
            request.phone_number.clone().unwrap_or_default(),
            0,
            request.speed.clone().unwrap_or_default(),
        ),
    };

    Ok(Json(SendSmsResponse {
        status: "success",
        message: "SMS sending process initiated.",
        accepted: ack.accepted,
        estimated_duration_seconds: ack.estimated_duration_seconds,
        batch_id: ack.batch_id,
        details: SendSmsDetails {
            phone_number,
            message_count,
            speed,
            estimated_duration: format!("{} seconds", ack.estimated_duration_seconds),
        },
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_page")]
    pub page: usize,
}

fn default_limit() -> usize {
    50
}

fn default_page() -> usize {
    1
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: u64,
    pub pages: u64,
}

#[derive(Debug, Serialize)]
pub struct LogsPage {
    pub logs: Vec<MessageLog>,
    pub pagination: Pagination,
}

/// GET /api/sms-logs?phoneNumber=&limit=&page=
pub async fn get_sms_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query.limit.clamp(1, 500);
    let page = query.page.max(1);
    let phone = query
        .phone_number
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let offset = (page - 1)
        .checked_mul(limit)
        .filter(|offset| i64::try_from(*offset).is_ok())
        .ok_or_else(|| ApiError::BadRequest(format!("page {} is out of range", page)))?;

    let logs = state.store.query_logs(phone, limit, offset).await?;
    let total = state.store.count_logs(phone).await?;

    let page = LogsPage {
        logs,
        pagination: Pagination {
            page,
            limit,
            total,
            pages: total.div_ceil(limit as u64),
        },
    };

    Ok(Json(json!({ "status": "success", "data": page })))
}

/// GET /api/batches
pub async fn list_batches(State(state): State<AppState>) -> Json<Vec<BatchSnapshot>> {
    Json(state.gate.engine().list_batches())
}

/// GET /api/batches/:id
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchSnapshot>, ApiError> {
    state
        .gate
        .engine()
        .snapshot(batch_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("batch {} not found", batch_id)))
}

/// POST /api/batches/:id/cancel
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = state
        .gate
        .engine()
        .cancel(batch_id)
        .map_err(|e| ApiError::NotFound(e.to_string()))?;

    let message = if status.is_terminal() {
        "Batch already finished."
    } else {
        "Cancellation requested."
    };

    Ok(Json(json!({
        "status": "success",
        "message": message,
        "batchId": batch_id,
        "batchStatus": status,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressQuery {
    #[serde(default)]
    pub batch_id: Option<Uuid>,
}

/// GET /api/progress?batchId= (server-sent events)
pub async fn progress_stream(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.gate.engine().publisher().subscribe();
    let filter = query.batch_id;

    let stream = futures::stream::unfold(subscription, move |mut subscription| async move {
        loop {
            let snapshot = subscription.recv().await?;
            if filter.map_or(true, |id| id == snapshot.batch_id) {
                let event = Event::default()
                    .event("progress")
                    .json_data(&snapshot)
                    .unwrap_or_else(|_| Event::default().comment("unserializable snapshot"));
                return Some((Ok(event), subscription));
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Fallback for unknown routes
pub async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "status": "error",
            "message": format!("Route {} not found", uri),
            "availableRoutes": AVAILABLE_ROUTES,
        })),
    )
}
