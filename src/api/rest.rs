//! REST API Handlers
//!
//! JSON-over-HTTP surface of the node service. Request and response bodies
//! are the domain types; failures map to a status code by error class.

use crate::domain::ports::{
    NodeExpandVolumeRequest, NodeGetVolumeStatsRequest, NodePublishVolumeRequest,
    NodeStageVolumeRequest, NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest,
};
use crate::error::{Error, ErrorCode};
use crate::node::NodeServer;
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Query of `GET /v1/node/volume-stats`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatsQuery {
    #[serde(default)]
    pub volume_id: String,
    #[serde(default)]
    pub volume_path: String,
}

/// Body of `GET /v1/node/capabilities`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResponse {
    pub capabilities: Vec<crate::domain::ports::NodeCapability>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::Aborted => StatusCode::CONFLICT,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let code = err.code();
    let status = status_for(code);
    if status.is_server_error() {
        warn!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    (
        status,
        Json(ApiErrorResponse {
            error: code.to_string(),
            message: err.to_string(),
            details: err.is_contention().then(|| "retry once the pending operation completes".to_string()),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(result: crate::error::Result<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    node: Arc<NodeServer>,
}

impl RestRouter {
    pub fn new(node: Arc<NodeServer>) -> Self {
        Self { node }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState { node: self.node };

        Router::new()
            // Volume lifecycle
            .route("/v1/node/stage-volume", post(stage_volume))
            .route("/v1/node/unstage-volume", post(unstage_volume))
            .route("/v1/node/publish-volume", post(publish_volume))
            .route("/v1/node/unpublish-volume", post(unpublish_volume))
            .route("/v1/node/expand-volume", post(expand_volume))
            .route("/v1/node/volume-stats", get(volume_stats))
            // Node identity
            .route("/v1/node/info", get(node_info))
            .route("/v1/node/capabilities", get(capabilities))
            // Health
            .route("/healthz", get(health_check))
            .route("/readyz", get(readiness_check))
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    node: Arc<NodeServer>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn stage_volume(
    State(state): State<AppState>,
    Json(request): Json<NodeStageVolumeRequest>,
) -> Response {
    respond(state.node.stage_volume(&request).await.map(|()| serde_json::json!({})))
}

async fn unstage_volume(
    State(state): State<AppState>,
    Json(request): Json<NodeUnstageVolumeRequest>,
) -> Response {
    respond(state.node.unstage_volume(&request).await.map(|()| serde_json::json!({})))
}

async fn publish_volume(
    State(state): State<AppState>,
    Json(request): Json<NodePublishVolumeRequest>,
) -> Response {
    respond(state.node.publish_volume(&request).await.map(|()| serde_json::json!({})))
}

async fn unpublish_volume(
    State(state): State<AppState>,
    Json(request): Json<NodeUnpublishVolumeRequest>,
) -> Response {
    respond(state.node.unpublish_volume(&request).await.map(|()| serde_json::json!({})))
}

async fn expand_volume(
    State(state): State<AppState>,
    Json(request): Json<NodeExpandVolumeRequest>,
) -> Response {
    respond(state.node.expand_volume(&request).await)
}

async fn volume_stats(State(state): State<AppState>, Query(query): Query<VolumeStatsQuery>) -> Response {
    let request = NodeGetVolumeStatsRequest {
        volume_id: query.volume_id,
        volume_path: query.volume_path,
    };
    respond(state.node.get_volume_stats(&request).await)
}

async fn node_info(State(state): State<AppState>) -> Response {
    respond(state.node.get_node_info().await)
}

async fn capabilities(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        Json(CapabilitiesResponse {
            capabilities: state.node.get_capabilities(),
        }),
    )
        .into_response()
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.node.config().node_id.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, "node ID not configured");
    }
    (StatusCode::OK, "Ready")
}
