//! HTTP configuration API.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mavrelay_ingest::{IngestError, IngestManager, PortConfig, PortStatus};
use mavrelay_proto::ConfigReport;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::hub::HubHandle;
use crate::maps::MapsParams;

#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestManager,
    pub hub: HubHandle,
    pub maps: MapsParams,
    pub demo: bool,
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/config", get(get_config).post(post_config))
        .route("/api/maps-params", get(maps_params))
        .route("/health", get(health))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid port number")]
    InvalidPort { given: Value },
    #[error("Unable to receive messages on port {port}.")]
    Unreachable { port: u16, exception: String, status: PortStatus },
    /// A newer POST started before this one's bind completed.
    #[error("Superseded by a newer configuration request.")]
    Superseded { current: PortConfig },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (code, body) = match self {
            ApiError::InvalidPort { given } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": { "message": message }, "mavlinkPort": given }),
            ),
            ApiError::Unreachable { port, exception, status } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": { "exception": exception, "message": message },
                    "mavlinkPort": port,
                    "mavlinkStatus": status,
                }),
            ),
            ApiError::Superseded { current } => (
                StatusCode::CONFLICT,
                json!({
                    "error": { "message": message },
                    "mavlinkPort": current.port,
                    "mavlinkStatus": current.status,
                }),
            ),
        };
        (code, Json(body)).into_response()
    }
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigReport> {
    Json(state.ingest.status().report())
}

async fn post_config(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ConfigReport>, ApiError> {
    let given = match body {
        Ok(Json(v)) => v.get("mavlinkPort").cloned().unwrap_or(Value::Null),
        Err(e) => {
            debug!("config: rejected body: {}", e);
            Value::Null
        }
    };
    let port = parse_port(&given).ok_or(ApiError::InvalidPort { given })?;

    // runs to completion even if the client hangs up mid-bind
    let ingest = state.ingest.clone();
    let attempt = tokio::spawn(async move { ingest.configure(port).await })
        .await
        .map_err(|e| ApiError::Unreachable {
            port,
            exception: e.to_string(),
            status: state.ingest.status().status,
        })?;

    match attempt {
        Ok(config) => {
            info!("Successful Mavlink connection on port {}.", port);
            Ok(Json(config.report()))
        }
        Err(IngestError::Superseded) => {
            Err(ApiError::Superseded { current: state.ingest.status() })
        }
        Err(IngestError::InvalidPort(p)) => Err(ApiError::InvalidPort { given: json!(p) }),
        Err(e) => Err(ApiError::Unreachable {
            port,
            exception: e.to_string(),
            status: state.ingest.status().status,
        }),
    }
}

async fn maps_params(State(state): State<AppState>) -> Json<MapsParams> {
    Json(state.maps.published())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.ingest.status();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "viewers": state.hub.viewer_count(),
        "mavlinkPort": status.port,
        "mavlinkStatus": status.status,
        "demo": state.demo,
    }))
}

/// Accepts a positive integer port given as a JSON number or a numeric
/// string ("14550", " 14550 ", "14550.0").
pub fn parse_port(value: &Value) -> Option<u16> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok()?
        }
        _ => return None,
    };
    if n.fract() != 0.0 || n < 1.0 || n > u16::MAX as f64 {
        return None;
    }
    Some(n as u16)
}
