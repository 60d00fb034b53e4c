//! Status HTTP server.
//!
//! Exposes the engine snapshot for the dashboard and monitoring tools, a
//! job lookup, and a thin submission intake. The intake deserializes and
//! validates, nothing more; the product API with auth and response shaping
//! lives in the surrounding system.

use crate::engine::{Engine, SubmitError};
use crate::lifecycle::LifecycleError;
use crate::metrics::EngineSnapshot;
use crate::request::Submission;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /metrics
/// Returns the current EngineSnapshot as JSON
async fn get_metrics(State(engine): State<Arc<Engine>>) -> Json<EngineSnapshot> {
    let metrics = engine.metrics();
    let snapshot = metrics.read().await.clone();
    Json(snapshot)
}

/// Handler for GET /jobs/{id}
async fn get_job(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<Json<crate::job::Job>, (StatusCode, String)> {
    match engine.lifecycle().get(&id).await {
        Ok(job) => Ok(Json(job)),
        Err(LifecycleError::JobNotFound(_)) => {
            Err((StatusCode::NOT_FOUND, format!("job {} not found", id)))
        }
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    job_id: String,
    status: String,
    deduplicated: bool,
}

/// Handler for POST /jobs: accept a submission and return the job id.
async fn submit_job(
    State(engine): State<Arc<Engine>>,
    Json(submission): Json<Submission>,
) -> Result<(StatusCode, Json<SubmitResponse>), (StatusCode, String)> {
    match engine.submit(submission).await {
        Ok(outcome) => Ok((
            StatusCode::ACCEPTED,
            Json(SubmitResponse {
                job_id: outcome.job.id.clone(),
                status: outcome.job.status.to_string(),
                deduplicated: !outcome.created,
            }),
        )),
        Err(SubmitError::Validation(e)) => Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(SubmitError::Lifecycle(e)) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Creates the axum Router with status endpoints
pub fn create_status_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/jobs", post(submit_job))
        .route("/jobs/:id", get(get_job))
        .with_state(engine)
}

/// Runs the status HTTP server on the given address
pub async fn run_status_server(engine: Arc<Engine>, addr: SocketAddr) -> Result<(), ServerError> {
    let app = create_status_router(engine);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(ServerError::BindError)?;
    Ok(())
}
