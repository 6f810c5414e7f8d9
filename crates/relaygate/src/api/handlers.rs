//! HTTP handlers: kit inventory and decoder device commands.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::device::{CallOptions, GatewayError};
use crate::inventory::{Device, ExpandedKit, KitSummary};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

const REBOOT_PATH: &str = "/api/sys/reboot.json";
const PRESET_STATUS_PATH: &str = "/api/decoder/preset/status.json";
const CURRENT_STATUS_PATH: &str = "/api/decoder/current/status.json";
const CURRENT_SET_PATH: &str = "/api/decoder/current/set.json";

/// Highest preset slot a decoder exposes.
const MAX_PRESET_ID: u64 = 9;

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KitListResponse {
    pub active_kit_id: Option<String>,
    pub kits: Vec<KitSummary>,
}

/// GET /api/kits
pub async fn list_kits(State(state): State<AppState>) -> Json<KitListResponse> {
    Json(KitListResponse {
        active_kit_id: state.inventory.active_kit_id().await,
        kits: state.inventory.list_kits(),
    })
}

/// GET /api/kit
pub async fn get_active_kit(State(state): State<AppState>) -> Json<ExpandedKit> {
    Json(state.inventory.active_kit().await)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveKitResponse {
    pub ok: bool,
    pub active_kit_id: Option<String>,
}

/// Request body as JSON, or `Null` when it is missing or unreadable.
fn body_or_null(body: Result<Json<Value>, JsonRejection>) -> Value {
    match body {
        Ok(Json(value)) => value,
        Err(rejection) => {
            debug!("treating request body as empty: {}", rejection);
            Value::Null
        }
    }
}

/// `kitId` as a non-empty string; numeric ids are accepted as their text.
fn requested_kit_id(body: &Value) -> Option<String> {
    match body.get("kitId")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// POST /api/kit/active
///
/// Switching kits drops every cached device token.
pub async fn set_active_kit(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<SetActiveKitResponse>> {
    let kit_id = requested_kit_id(&body_or_null(body))
        .ok_or_else(|| ApiError::bad_request("kitId required"))?;

    state.inventory.set_active(&kit_id).await?;
    state.gateway.invalidate_all();

    Ok(Json(SetActiveKitResponse {
        ok: true,
        active_kit_id: state.inventory.active_kit_id().await,
    }))
}

async fn require_device(state: &AppState, device_id: &str) -> ApiResult<Device> {
    state
        .inventory
        .device(device_id)
        .await
        .ok_or_else(|| ApiError::not_found("Unknown deviceId for active kit"))
}

/// POST /kiloview/{device_id}/reboot
pub async fn reboot_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let device = require_device(&state, &device_id).await?;
    let result = state
        .gateway
        .call(&device.base, REBOOT_PATH, CallOptions::post())
        .await;

    // Any device reply may mean it is restarting and forgetting its sessions.
    if matches!(result, Ok(_) | Err(GatewayError::UpstreamFailure { .. })) {
        state.gateway.invalidate(&device.base);
    }
    let reply = result?;
    info!(device = %device.id, "reboot requested");

    Ok(Json(reply.data))
}

/// GET /kiloview/{device_id}/presets
pub async fn device_presets(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let device = require_device(&state, &device_id).await?;
    let reply = state
        .gateway
        .call(&device.base, PRESET_STATUS_PATH, CallOptions::get())
        .await?;
    Ok(Json(reply.data))
}

/// GET /kiloview/{device_id}/current
pub async fn device_current(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let device = require_device(&state, &device_id).await?;
    let reply = state
        .gateway
        .call(&device.base, CURRENT_STATUS_PATH, CallOptions::get())
        .await?;
    Ok(Json(reply.data))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeRequest {
    #[serde(default)]
    pub preset_id: Option<Value>,
    #[serde(default)]
    pub source: Option<DecodeSource>,
}

#[derive(Debug, Deserialize)]
pub struct DecodeSource {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Accept integers and integer strings in the preset range.
fn parse_preset_id(value: &Value) -> Option<u64> {
    let id = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    (id <= MAX_PRESET_ID).then_some(id)
}

/// Build the switch call: a stored preset, or an ad-hoc source.
fn decode_options(request: DecodeRequest) -> ApiResult<CallOptions> {
    if let Some(preset) = request.preset_id {
        let id = parse_preset_id(&preset)
            .ok_or_else(|| ApiError::bad_request("presetId must be an integer 0–9"))?;
        return Ok(CallOptions::post().query("id", id.to_string()));
    }

    let source = request.source.and_then(|source| {
        let name = source.name.filter(|n| !n.is_empty())?;
        let url = source.url.filter(|u| !u.is_empty())?;
        Some((name, url))
    });

    match source {
        Some((name, url)) => Ok(CallOptions::post().query("name", name).query("url", url)),
        None => Err(ApiError::bad_request(
            "Provide presetId OR source:{name,url}",
        )),
    }
}

/// POST /kiloview/{device_id}/decode
pub async fn switch_decoder(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let device = require_device(&state, &device_id).await?;
    let request = match body_or_null(body) {
        Value::Null => DecodeRequest::default(),
        value => serde_json::from_value(value)
            .map_err(|e| ApiError::bad_request(format!("Invalid decode request: {e}")))?,
    };
    let options = decode_options(request)?;
    let reply = state
        .gateway
        .call(&device.base, CURRENT_SET_PATH, options)
        .await?;
    Ok(Json(reply.data))
}
