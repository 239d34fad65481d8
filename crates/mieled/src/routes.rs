//! REST surface over the endpoint registry.
//!
//! The registry is an immutable snapshot built at startup; request
//! handlers lock individual sessions but never add or remove them.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use miele_local_core::cipher::strip_trailing_zeros;
use miele_local_core::dop2::parse_records;
use miele_local_core::error::Error;
use miele_local_net::dop2::Dop2Coordinate;
use miele_local_net::session::{remote_start_state, EndpointSession};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Shared server state: the endpoint registry.
pub struct AppState {
    pub endpoints: HashMap<String, Mutex<EndpointSession>>,
}

type SharedState = Arc<AppState>;

/// Error envelope translated from the core error kinds.
pub enum ApiError {
    UnknownEndpoint(String),
    Core(Error),
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::Core(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::UnknownEndpoint(name) => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "code": "unknown_endpoint",
                    "message": format!("no endpoint named {name:?} is configured"),
                })),
            )
                .into_response(),
            ApiError::Core(error) => {
                let status = StatusCode::from_u16(error.status_category())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let mut body = json!({
                    "code": error.code(),
                    "message": error.to_string(),
                });
                if let Error::Device { body: Some(device_body), .. } = &error {
                    body["device_body"] = Value::String(
                        String::from_utf8_lossy(strip_trailing_zeros(device_body))
                            .into_owned(),
                    );
                }
                (status, Json(body)).into_response()
            }
        }
    }
}

/// Build the service router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/generate-summary", get(summaries))
        .route("/generate-summary/:endpoint", get(summary))
        .route("/walkdop2tree/:endpoint", get(walk_tree))
        .route("/endpoints", get(list_endpoints))
        .route("/endpoints/:endpoint", get(show_endpoint))
        .route("/start/:endpoint", get(start_info).post(start))
        .route("/wakeup/:endpoint", axum::routing::post(wakeup))
        .route("/command/:endpoint/:command", get(passthrough))
        .route(
            "/dop2leaf/:endpoint/:unit/:attribute",
            get(dop2_leaf).post(dop2_leaf_write),
        )
        .route("/dop2leaf/:endpoint/:unit/:attribute/:idx1", get(dop2_leaf_idx1))
        .route(
            "/dop2leaf/:endpoint/:unit/:attribute/:idx1/:idx2",
            get(dop2_leaf_idx2),
        )
        .route("/dop2setting/:endpoint/:setting", get(dop2_setting))
        .with_state(state)
}

fn lookup<'a>(
    state: &'a AppState,
    name: &str,
) -> Result<&'a Mutex<EndpointSession>, ApiError> {
    state
        .endpoints
        .get(name)
        .ok_or_else(|| ApiError::UnknownEndpoint(name.to_string()))
}

async fn list_endpoints(State(state): State<SharedState>) -> Json<Value> {
    let mut listing = serde_json::Map::new();
    for (name, session) in &state.endpoints {
        let status = session.lock().await.describe();
        listing.insert(name.clone(), json!(status));
    }
    Json(Value::Object(listing))
}

async fn show_endpoint(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = lookup(&state, &name)?;
    let status = session.lock().await.describe();
    Ok(Json(json!(status)))
}

async fn summaries(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let mut all = serde_json::Map::new();
    for (name, session) in &state.endpoints {
        let summary = session.lock().await.summary().await?;
        all.insert(name.clone(), json!(summary));
    }
    Ok(Json(Value::Object(all)))
}

async fn summary(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = lookup(&state, &name)?;
    let summary = session.lock().await.summary().await?;
    Ok(Json(json!(summary)))
}

async fn walk_tree(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = lookup(&state, &name)?;
    let report = session.lock().await.dop2_walk().await?;
    Ok(Json(json!(report)))
}

async fn start_info(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = lookup(&state, &name)?;
    let summary = session.lock().await.summary().await?;
    let remote = remote_start_state(&summary);
    Ok(Json(json!({
        "DeviceRemoteStartCapable": remote.capable,
        "DeviceRemoteStartEnabled": remote.enabled,
        "message": "Set and start timer first on device if not currently enabled",
    })))
}

async fn start(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = lookup(&state, &name)?;
    let result = session.lock().await.process_action().await?;
    Ok(Json(result))
}

async fn wakeup(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = lookup(&state, &name)?;
    let result = session.lock().await.device_action().await?;
    Ok(Json(result))
}

/// Raw command passthrough: `_` becomes a path separator, `-` is
/// dropped. A JSON body is forwarded as is; a binary body is rendered as
/// parsed attribute records.
async fn passthrough(
    State(state): State<SharedState>,
    Path((name, command)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let path = command.replace('_', "/").replace('-', "");
    debug!(endpoint = %name, %path, "command passthrough");
    let session = lookup(&state, &name)?;
    let body = session.lock().await.get_raw(&path).await?;

    let text = std::str::from_utf8(strip_trailing_zeros(&body)).ok();
    if let Some(value) = text.and_then(|t| serde_json::from_str::<Value>(t).ok()) {
        return Ok(Json(value));
    }
    let records = parse_records(&body)?;
    let rendered: Vec<String> = records.iter().map(|r| r.to_string()).collect();
    Ok(Json(json!(rendered)))
}

async fn dop2_leaf(
    state: State<SharedState>,
    Path((name, unit, attribute)): Path<(String, u16, u16)>,
) -> Result<Json<Value>, ApiError> {
    read_leaf(state, name, Dop2Coordinate::with_indices(unit, attribute, 0, 0)).await
}

async fn dop2_leaf_idx1(
    state: State<SharedState>,
    Path((name, unit, attribute, idx1)): Path<(String, u16, u16, u16)>,
) -> Result<Json<Value>, ApiError> {
    read_leaf(state, name, Dop2Coordinate::with_indices(unit, attribute, idx1, 0)).await
}

async fn dop2_leaf_idx2(
    state: State<SharedState>,
    Path((name, unit, attribute, idx1, idx2)): Path<(String, u16, u16, u16, u16)>,
) -> Result<Json<Value>, ApiError> {
    read_leaf(state, name, Dop2Coordinate::with_indices(unit, attribute, idx1, idx2)).await
}

async fn read_leaf(
    State(state): State<SharedState>,
    name: String,
    coordinate: Dop2Coordinate,
) -> Result<Json<Value>, ApiError> {
    let session = lookup(&state, &name)?;
    let (records, raw) = session.lock().await.dop2_read(coordinate).await?;
    let decoded: Vec<String> = records.iter().map(|r| r.to_string()).collect();
    Ok(Json(json!({
        "decoded": decoded,
        "binary": hex::encode(&raw),
    })))
}

/// Write a leaf. A `text/plain` body is hex-decoded first; anything else
/// is taken as the raw attribute payload.
async fn dop2_leaf_write(
    State(state): State<SharedState>,
    Path((name, unit, attribute)): Path<(String, u16, u16)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload = if headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("text/plain"))
        .unwrap_or(false)
    {
        let text = std::str::from_utf8(&body)
            .map_err(|_| Error::Usage("hex body is not valid UTF-8".into()))?;
        hex::decode(text.trim())
            .map_err(|e| Error::Usage(format!("invalid hex body: {e}")))?
    } else {
        body.to_vec()
    };

    debug!(endpoint = %name, unit, attribute, payload_len = payload.len(), "leaf write");
    let session = lookup(&state, &name)?;
    let records = session
        .lock()
        .await
        .dop2_write(unit, attribute, &payload)
        .await?;
    let rendered: Vec<String> = records.iter().map(|r| r.to_string()).collect();
    Ok(Json(json!(rendered)))
}

async fn dop2_setting(
    State(state): State<SharedState>,
    Path((name, setting)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let setting_id: u16 = setting
        .parse()
        .map_err(|_| Error::Usage(format!("setting must be a numeric id, got {setting:?}")))?;
    let session = lookup(&state, &name)?;
    let leaf = session.lock().await.dop2_setting(setting_id).await?;
    Ok(Json(json!(leaf)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_path_transform() {
        let command = "Devices_000123456789_State".replace('_', "/").replace('-', "");
        assert_eq!(command, "Devices/000123456789/State");
    }

    #[test]
    fn test_unknown_endpoint_is_404() {
        let state = AppState { endpoints: HashMap::new() };
        assert!(matches!(
            lookup(&state, "nope"),
            Err(ApiError::UnknownEndpoint(_))
        ));
    }
}
