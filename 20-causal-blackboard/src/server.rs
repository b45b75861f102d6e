//! HTTP surface of a replica.
//!
//! Peers talk to each other over `/propagate` and `/election`; clients use
//! `/board`, `/status` and `/campaign`. All bodies are JSON.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::clock::VectorClock;
use crate::error::{ClockError, NodeError};
use crate::message::{ElectionMessage, Propagate};
use crate::node::{NodeStatus, ReplicaNode};
use crate::store::BoardEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub entry: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyRequest {
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub delete: bool,
}

/// Clock stamped on an accepted local write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteAck {
    pub clock: VectorClock,
}

pub struct ApiError(NodeError);

impl From<NodeError> for ApiError {
    fn from(err: NodeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            NodeError::NoSuchPosition { .. } => StatusCode::NOT_FOUND,
            // The local clock ran out, nothing the caller sent is wrong.
            NodeError::Clock(ClockError::Exhausted { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            NodeError::Malformed(_) | NodeError::Clock(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.0.to_string()).into_response()
    }
}

pub fn router(node: Arc<ReplicaNode>) -> Router {
    Router::new()
        .route("/board", get(read_board).post(submit))
        .route("/board/:index", post(modify))
        .route("/status", get(status))
        .route("/campaign", post(campaign))
        .route("/propagate", post(propagate))
        .route("/election", post(election))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Serves `node` on `listener` until `shutdown` resolves, letting in-flight
/// requests finish.
pub async fn serve<F>(listener: TcpListener, node: Arc<ReplicaNode>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(node))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn read_board(State(node): State<Arc<ReplicaNode>>) -> Json<Vec<BoardEntry>> {
    Json(node.read_board())
}

async fn submit(
    State(node): State<Arc<ReplicaNode>>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<WriteAck>, ApiError> {
    let clock = node.submit(request.entry).await?;
    Ok(Json(WriteAck { clock }))
}

async fn modify(
    State(node): State<Arc<ReplicaNode>>,
    Path(index): Path<usize>,
    Json(request): Json<ModifyRequest>,
) -> Result<Json<WriteAck>, ApiError> {
    let clock = node.modify_at(index, request.entry, request.delete).await?;
    Ok(Json(WriteAck { clock }))
}

async fn status(State(node): State<Arc<ReplicaNode>>) -> Json<NodeStatus> {
    Json(node.status())
}

async fn campaign(State(node): State<Arc<ReplicaNode>>) -> StatusCode {
    node.spawn_election();
    StatusCode::ACCEPTED
}

async fn propagate(
    State(node): State<Arc<ReplicaNode>>,
    Json(message): Json<Propagate>,
) -> Result<StatusCode, ApiError> {
    node.receive(message)?;
    Ok(StatusCode::OK)
}

async fn election(
    State(node): State<Arc<ReplicaNode>>,
    Json(message): Json<ElectionMessage>,
) -> Result<StatusCode, ApiError> {
    node.on_election(message)?;
    Ok(StatusCode::OK)
}
