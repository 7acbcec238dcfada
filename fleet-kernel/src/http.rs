/**
 * API REST FLEET - Serveur HTTP du kernel
 *
 * RÔLE :
 * Vue lecture sur l'état de la flotte (nodes, connexions, qualité réseau) et
 * point d'entrée pour mettre des commandes en file. Le dispatch reste l'affaire
 * de la boucle périodique : POST /commands ne pousse rien directement.
 *
 * ROUTES :
 * - GET  /health                  liveness
 * - GET  /system/health           uptime, connexions, file de commandes, MQTT
 * - GET  /nodes                   liste des nodes
 * - GET  /nodes/{id}              détail + connexion courante
 * - GET  /nodes/{id}/quality      statistiques de latence glissantes
 * - GET  /connections             snapshot des nodes connectés
 * - POST /commands                mise en file
 * - GET  /commands/{id}           état d'une commande
 * - POST /commands/{id}/cancel    annulation (si Queued et annulable)
 */

use crate::connections::ConnectionRegistry;
use crate::error::StoreError;
use crate::health::{HealthTracker, KernelHealth};
use crate::latency::{LatencyStats, QualityTracker};
use crate::models::{Command, CommandId, CommandKind, CommandStatus, ConnectionId, Node, NodeId};
use crate::store::{CommandStore, NodeStore};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub nodes: Arc<dyn NodeStore>,
    pub commands: Arc<dyn CommandStore>,
    pub quality: Arc<QualityTracker>,
    pub health: HealthTracker,
}

/// Erreurs HTTP : 404 / 409 / 400 / 500
#[derive(Debug)]
pub enum ApiError {
    NotFound,
    Conflict(String),
    BadRequest(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NodeNotFound(_) | StoreError::CommandNotFound(_) => ApiError::NotFound,
            StoreError::InvalidTransition { .. } => ApiError::Conflict(e.to_string()),
            other => {
                error!(error = %other, "store error in API handler");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, msg) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (code, Json(serde_json::json!({ "ok": false, "error": msg }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct NodeView {
    #[serde(flatten)]
    node: Node,
    connection_id: Option<ConnectionId>,
}

#[derive(Debug, Serialize)]
struct ConnectionsView {
    version: u64,
    nodes: Vec<NodeId>,
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    node_id: NodeId,
    kind: CommandKind,
    payload: Option<serde_json::Value>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/nodes", get(list_nodes))
        .route("/nodes/{id}", get(get_node))
        .route("/nodes/{id}/quality", get(get_node_quality))
        .route("/connections", get(get_connections))
        .route("/commands", post(enqueue_command))
        .route("/commands/{id}", get(get_command))
        .route("/commands/{id}/cancel", post(cancel_command))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Result<Json<KernelHealth>, ApiError> {
    let queued_commands = app.commands.count_by_status(CommandStatus::Queued).await?;
    Ok(Json(KernelHealth {
        uptime_seconds: app.health.uptime().as_secs(),
        connected_nodes: app.registry.len(),
        queued_commands,
        tracked_quality_windows: app.quality.tracked_nodes(),
        mqtt_status: app.health.mqtt_status().to_string(),
        mqtt_reconnects: app.health.mqtt_reconnects(),
    }))
}

// GET /nodes
async fn list_nodes(State(app): State<AppState>) -> Result<Json<Vec<NodeView>>, ApiError> {
    let nodes = app.nodes.list().await?;
    let views = nodes
        .into_iter()
        .map(|node| NodeView {
            connection_id: app.registry.try_get(&node.id),
            node,
        })
        .collect();
    Ok(Json(views))
}

// GET /nodes/{id}
async fn get_node(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<NodeView>, ApiError> {
    let id = NodeId::from(id);
    let node = app.nodes.get(&id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(NodeView {
        connection_id: app.registry.try_get(&id),
        node,
    }))
}

// GET /nodes/{id}/quality
async fn get_node_quality(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LatencyStats>, ApiError> {
    app.quality
        .stats(&NodeId::from(id))
        .map(Json)
        .ok_or(ApiError::NotFound)
}

// GET /connections
async fn get_connections(State(app): State<AppState>) -> Json<ConnectionsView> {
    let version = app.registry.version();
    let snapshot = app.registry.connected_node_ids_snapshot();
    let mut nodes = snapshot.to_vec();
    nodes.sort();
    Json(ConnectionsView { version, nodes })
}

// POST /commands
async fn enqueue_command(
    State(app): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<Command>), ApiError> {
    if app.nodes.get(&req.node_id).await?.is_none() {
        return Err(ApiError::BadRequest(format!("unknown node {}", req.node_id)));
    }
    let command = Command::new(req.node_id, req.kind, req.payload);
    let id = app.commands.enqueue(command).await?;
    let stored = app.commands.get(id).await?.ok_or(ApiError::NotFound)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

fn parse_command_id(raw: &str) -> Result<CommandId, ApiError> {
    CommandId::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("invalid command id {raw}")))
}

// GET /commands/{id}
async fn get_command(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Command>, ApiError> {
    let id = parse_command_id(&id)?;
    app.commands.get(id).await?.map(Json).ok_or(ApiError::NotFound)
}

// POST /commands/{id}/cancel
async fn cancel_command(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<Command>, ApiError> {
    let id = parse_command_id(&id)?;
    Ok(Json(app.commands.cancel(id).await?))
}
