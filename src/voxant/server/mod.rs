// SPDX-License-Identifier: MIT

//! HTTP adapter over executors built from a directory of workflow files.
//!
//! Event and topic streams are served as SSE.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::sdk::error::{VoxantError, WorkflowError};
use crate::voxant::bus::TopicBus;
use crate::voxant::engine::{Executor, ExecutorSettings, RunHandle, RunId};
use crate::voxant::workflow::builder::Builder;
use crate::voxant::workflow::loader::WorkflowLoader;
use crate::voxant::workflow::registry::TaskRegistry;

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    dir: PathBuf,
    settings: ExecutorSettings,
    registry: TaskRegistry,
    topics: TopicBus,
    executors: Arc<RwLock<HashMap<String, Arc<Executor>>>>,
}

impl AppState {
    pub fn new(dir: impl Into<PathBuf>, settings: ExecutorSettings, registry: TaskRegistry) -> Self {
        let topics = TopicBus::new(settings.topic_buffer);
        Self {
            dir: dir.into(),
            settings,
            registry,
            topics,
            executors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Executor for workflow `id`, compiled on first use
    pub async fn executor(&self, id: &str) -> Result<Arc<Executor>, VoxantError> {
        if let Some(executor) = self.executors.read().await.get(id) {
            return Ok(executor.clone());
        }

        let path = WorkflowLoader::discover(&self.dir)
            .into_iter()
            .find(|(wid, _)| wid == id)
            .map(|(_, path)| path)
            .ok_or_else(|| WorkflowError::FileNotFound(id.to_string()))?;

        log::info!("Building workflow '{}' from {:?}", id, path);
        let compiled = Builder::new(self.registry.clone())
            .build(&path.to_string_lossy())
            .await?;
        let executor = Arc::new(
            compiled
                .into_executor(self.settings.clone())
                .with_topics(self.topics.clone()),
        );

        let mut executors = self.executors.write().await;
        Ok(executors.entry(id.to_string()).or_insert(executor).clone())
    }

    /// Runs are looked up through their executors, which only retain a
    /// bounded history of finished runs
    async fn find_run(&self, id: &str) -> Result<RunHandle, Response> {
        let run_id: RunId = id
            .parse()
            .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid run id"))?;
        self.executors
            .read()
            .await
            .values()
            .find_map(|executor| executor.run(run_id))
            .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "run not found"))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/workflows", get(list_workflows))
        .route("/api/runs", post(create_run))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/events", get(run_events))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/api/topics/{topic}", post(emit_topic).get(subscribe_topic))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(port: u16, state: AppState) -> Result<(), VoxantError> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// HTTP status for a failure to build or start a run
fn error_status(err: &VoxantError) -> StatusCode {
    match err {
        VoxantError::Workflow(WorkflowError::FileNotFound(_)) => StatusCode::NOT_FOUND,
        VoxantError::Config(_) | VoxantError::Schema(_) => StatusCode::UNPROCESSABLE_ENTITY,
        VoxantError::Workflow(_) | VoxantError::Yaml(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_workflows(State(state): State<AppState>) -> Json<Value> {
    let workflows: Vec<Value> = WorkflowLoader::discover(&state.dir)
        .into_iter()
        .map(|(id, path)| {
            json!({
                "id": id,
                "name": id,
                "file": path.to_string_lossy()
            })
        })
        .collect();
    Json(json!(workflows))
}

#[derive(Deserialize)]
struct CreateRunRequest {
    workflow_id: String,
    #[serde(default)]
    config: Value,
}

async fn create_run(State(state): State<AppState>, Json(payload): Json<CreateRunRequest>) -> Response {
    let executor = match state.executor(&payload.workflow_id).await {
        Ok(executor) => executor,
        Err(e) => return error_response(error_status(&e), e.to_string()),
    };

    match executor.execute(payload.config) {
        Ok(handle) => {
            let id = handle.id();
            (
                StatusCode::CREATED,
                Json(json!({ "run_id": id, "workflow_id": payload.workflow_id })),
            )
                .into_response()
        }
        Err(e) => {
            let err = VoxantError::from(e);
            error_response(error_status(&err), err.to_string())
        }
    }
}

async fn get_run(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.find_run(&id).await {
        Ok(handle) => Json(json!({
            "run_id": handle.id(),
            "workflow": handle.workflow(),
            "status": handle.status(),
            "state": *handle.state(),
        }))
        .into_response(),
        Err(response) => response,
    }
}

async fn run_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let handle = match state.find_run(&id).await {
        Ok(handle) => handle,
        Err(response) => return response,
    };

    let stream = handle
        .events()
        .into_stream()
        .map(|event| SseEvent::default().event(event.kind()).json_data(&event));

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(1)))
        .into_response()
}

async fn cancel_run(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.find_run(&id).await {
        Ok(handle) => {
            handle.cancel();
            Json(json!({ "run_id": handle.id(), "status": handle.status() })).into_response()
        }
        Err(response) => response,
    }
}

async fn emit_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Json(message): Json<Value>,
) -> Json<Value> {
    let delivered = state.topics.emit(&topic, message).await;
    Json(json!({ "topic": topic, "delivered": delivered }))
}

async fn subscribe_topic(State(state): State<AppState>, Path(topic): Path<String>) -> Response {
    let stream = state
        .topics
        .recv(&topic)
        .await
        .into_stream()
        .map(|message| SseEvent::default().event("message").json_data(&message));

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(1)))
        .into_response()
}
