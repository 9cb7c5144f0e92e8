//! Command facade
//!
//! `POST /execute {node, command}` resolves the node's home worker,
//! runs the command inside the node through the agent's `exec` verb
//! and streams combined stdout/stderr back line by line as plain
//! text. No authentication: the facade is for the same trusted LAN
//! the control plane lives on.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::RwLock;
use tokio_stream::wrappers::LinesStream;
use topology::Assignment;
use tracing::info;

use crate::transport::Worker;

/// Set once the fleet is initialized; requests before that get a 503.
pub type SharedState = Arc<RwLock<Option<FacadeState>>>;

#[derive(Clone)]
pub struct FacadeState {
    pub assignment: Arc<Assignment>,
    pub workers: Arc<Vec<Worker>>,
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    node: String,
    command: String,
}

pub async fn serve(listen: &str, state: SharedState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("facade listening on {}", listen);
    let app = Router::new()
        .route("/execute", post(execute))
        .with_state(state);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn execute(
    State(state): State<SharedState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Response, (StatusCode, String)> {
    let guard = state.read().await;
    let Some(fleet) = guard.as_ref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "emulation not initialized yet".to_string(),
        ));
    };

    let mid = fleet.assignment.mid_of(&req.node).ok_or((
        StatusCode::NOT_FOUND,
        format!("unknown node '{}'", req.node),
    ))?;
    let worker = fleet.workers.iter().find(|w| w.id == mid).ok_or((
        StatusCode::BAD_GATEWAY,
        format!("worker {mid} is offline"),
    ))?;

    let argv: Vec<String> = req.command.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "empty command".to_string()));
    }

    let mut args = vec![req.node.clone()];
    args.extend(argv);
    let (stdout, stderr) = worker
        .agent_stream(&worker.verb("exec", &args))
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

    let out_lines = LinesStream::new(BufReader::new(stdout).lines());
    let err_lines = LinesStream::new(BufReader::new(stderr).lines());
    let merged = futures::stream::select(out_lines, err_lines).map(|line| {
        line.map(|mut l| {
            l.push('\n');
            Bytes::from(l)
        })
    });

    Ok((
        [(header::CONTENT_TYPE, "text/plain")],
        Body::from_stream(merged),
    )
        .into_response())
}
