//! REST API endpoints for the pdlogger-service.
//!
//! All endpoints answer JSON except the log downloads, which stream
//! `text/csv`, and the `debug` variants of the bulk exports, which return a
//! plain-text catalog dump instead of data.
//!
//! ## Error Handling
//!
//! Endpoints return structured JSON errors via [`AppError`]. Store errors
//! map to 403 (identifier outside the log namespace), 404 (missing segment)
//! or 500. The broker config endpoints and the bulk clear answer with an
//! [`ActionResponse`] instead, which is what the web UI expects.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use pdlogger_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures::stream::BoxStream;
use pdlogger_store::{ExportMode, base_name, resolve_id};
use pdlogger_types::{BrokerConfigDocument, ExportWindow, LogSegmentDescriptor, MeasurementSnapshot};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::state::AppState;

const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const ALL_LOGS_FILENAME: &str = "pd_logger_all.csv";

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/device/info", get(device_info))
        .route("/api/measure/latest", get(latest_measurement))
        // Log segments
        .route("/api/logs", get(list_logs))
        .route("/api/logs/download", get(download_log))
        .route("/api/logs/download_all", get(download_all))
        .route("/api/logs/range", get(download_range))
        .route("/api/logs/clear", post(clear_logs))
        // MQTT
        .route("/api/mqtt/config", get(get_mqtt_config).post(set_mqtt_config))
        .route("/api/mqtt/status", get(mqtt_status))
        .fallback(not_found)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Device identity response.
#[derive(Debug, Serialize)]
pub struct DeviceInfoResponse {
    #[serde(rename = "chipId")]
    pub chip_id: String,
}

async fn device_info(State(state): State<Arc<AppState>>) -> Json<DeviceInfoResponse> {
    Json(DeviceInfoResponse {
        chip_id: state.identity.chip_hex(),
    })
}

async fn latest_measurement(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MeasurementSnapshot>, AppError> {
    state
        .latest_measurement()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no measurement yet".to_string()))
}

/// Log catalog response.
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub count: usize,
    pub total_size: u64,
    /// Matching segments left out because of the catalog bound.
    pub truncated: usize,
    pub segments: Vec<LogSegmentDescriptor>,
}

async fn list_logs(State(state): State<Arc<AppState>>) -> Result<Json<LogsResponse>, AppError> {
    let catalog = state.catalog().await?;
    Ok(Json(LogsResponse {
        count: catalog.len(),
        total_size: catalog.total_size(),
        truncated: catalog.truncated(),
        segments: catalog.segments().to_vec(),
    }))
}

/// Query parameters for single segment downloads.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// Segment identifier, e.g. `/logs/log_0001.csv`.
    pub name: Option<String>,
}

async fn download_log(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let name = params
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing ?name=".to_string()))?;

    resolve_id(&name)?;
    if !state.storage.exists(&name).await {
        return Err(AppError::NotFound(format!("no such log: {}", name)));
    }

    let reader = state.storage.open(&name).await?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CSV_CONTENT_TYPE)
        .header(
            header::CONTENT_DISPOSITION,
            attachment(base_name(&name)),
        )
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Query parameters for the bulk exports.
#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    /// Window length in seconds, or `unbounded`/`max`.
    pub sec: Option<String>,
    /// Return the catalog dump instead of data.
    pub debug: Option<String>,
}

impl ExportQuery {
    /// `?debug`, `?debug=1` and any other value except `0`/`false` enable it.
    pub fn debug_requested(&self) -> bool {
        self.debug
            .as_deref()
            .is_some_and(|v| !matches!(v.trim(), "0" | "false"))
    }
}

async fn download_all(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let catalog = state.catalog().await?;

    if catalog.is_empty() {
        return Err(AppError::NotFound("no logs".to_string()));
    }

    if params.debug_requested() {
        let mut text = String::from("DOWNLOAD ALL - DEBUG\n");
        text.push_str(&catalog.describe(state.storage.as_ref()).await);
        return Ok(plain_text(text));
    }

    info!("Exporting {} log segment(s)", catalog.len());
    csv_stream(
        state.exporter().stream(catalog, ExportMode::Full),
        Some(ALL_LOGS_FILENAME),
    )
}

async fn download_range(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let window = ExportWindow::parse(params.sec.as_deref());
    let now = state.clock.now_epoch();
    let min_epoch = window.min_epoch(now);
    let catalog = state.catalog().await?;

    if catalog.is_empty() {
        return Err(AppError::NotFound("no logs".to_string()));
    }

    if params.debug_requested() {
        let mut text = format!(
            "RANGE - DEBUG\nwindow={} now={} min_epoch={}\n",
            window,
            now.map_or_else(|| "unsynced".to_string(), |n| n.to_string()),
            min_epoch.map_or_else(|| "none".to_string(), |m| m.to_string()),
        );
        text.push_str(&catalog.describe(state.storage.as_ref()).await);
        return Ok(plain_text(text));
    }

    info!(
        "Exporting {} log segment(s), window {}",
        catalog.len(),
        window
    );
    csv_stream(
        state
            .exporter()
            .stream(catalog, ExportMode::Windowed { min_epoch }),
        None,
    )
}

/// Outcome of a mutating action.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    fn ok() -> (StatusCode, Json<Self>) {
        (StatusCode::OK, Json(Self { ok: true, error: None }))
    }

    fn failed(status: StatusCode, error: &str) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                ok: false,
                error: Some(error.to_string()),
            }),
        )
    }
}

async fn clear_logs(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ActionResponse>) {
    match state.storage.clear().await {
        Ok(()) => {
            info!("Cleared all log segments");
            ActionResponse::ok()
        }
        Err(e) => {
            warn!("Clearing logs failed: {}", e);
            ActionResponse::failed(StatusCode::INTERNAL_SERVER_ERROR, "clear failed")
        }
    }
}

async fn get_mqtt_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BrokerConfigDocument>, AppError> {
    state
        .broker_store
        .load_or_init()
        .map(Json)
        .map_err(|e| AppError::Internal(e.to_string()))
}

async fn set_mqtt_config(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<ActionResponse>) {
    if body.is_empty() {
        return ActionResponse::failed(StatusCode::BAD_REQUEST, "empty body");
    }
    let doc: BrokerConfigDocument = match serde_json::from_slice(&body) {
        Ok(doc) => doc,
        Err(_) => return ActionResponse::failed(StatusCode::BAD_REQUEST, "bad json"),
    };
    if doc.validate_port().is_err() {
        return ActionResponse::failed(StatusCode::BAD_REQUEST, "bad port");
    }

    match state.broker_store.save(&doc) {
        Ok(()) => {
            info!("Broker config updated ({}:{})", doc.server, doc.port);
            ActionResponse::ok()
        }
        Err(e) => {
            warn!("{}", e);
            ActionResponse::failed(StatusCode::INTERNAL_SERVER_ERROR, "save failed")
        }
    }
}

/// MQTT status line response.
#[derive(Debug, Serialize)]
pub struct MqttStatusResponse {
    pub message: String,
}

async fn mqtt_status(State(state): State<Arc<AppState>>) -> Json<MqttStatusResponse> {
    Json(MqttStatusResponse {
        message: state.mqtt_status(),
    })
}

async fn not_found() -> AppError {
    AppError::NotFound("not found".to_string())
}

fn attachment(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", filename.replace('"', "_"))
}

fn plain_text(text: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, TEXT_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        text,
    )
        .into_response()
}

fn csv_stream(
    stream: BoxStream<'static, std::io::Result<Bytes>>,
    filename: Option<&str>,
) -> Result<Response, AppError> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CSV_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-store");
    if let Some(filename) = filename {
        builder = builder.header(header::CONTENT_DISPOSITION, attachment(filename));
    }
    builder
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(pdlogger_store::Error),
    Internal(String),
}

impl From<pdlogger_store::Error> for AppError {
    fn from(e: pdlogger_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e @ pdlogger_store::Error::Forbidden(_)) => {
                (StatusCode::FORBIDDEN, e.to_string())
            }
            AppError::Store(e @ pdlogger_store::Error::NotFound(_)) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
