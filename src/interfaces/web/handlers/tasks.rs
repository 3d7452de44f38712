use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use super::ApiError;
use crate::core::config::Tool;
use crate::core::error::CoreError;
use crate::core::task::manager::QueueStats;
use crate::core::task::{Task, TaskSnapshot};
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    tool: String,
    /// Accepted for wire compatibility; the configured tool command always
    /// wins over a client-supplied one.
    #[serde(default)]
    #[allow(dead_code)]
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    let Some(tool) = state.executor.catalog().get(&req.tool) else {
        return Err(ApiError(CoreError::UnknownTool(req.tool)));
    };

    let task = Arc::new(Task::new(&tool.name, &tool.command, req.args));
    state.manager.admit(task.clone()).await?;
    Ok(Json(task.snapshot()))
}

#[derive(Deserialize)]
pub struct ListTasksQuery {
    tool: Option<String>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Json<Vec<TaskSnapshot>> {
    let tasks = match query.tool {
        Some(tool) => state.manager.list_by_tool(&tool).await,
        None => state.manager.list().await,
    };
    Json(tasks)
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    let task = state.manager.get(&id).await?;
    Ok(Json(task.snapshot()))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.manager.cancel(&id).await?;
    Ok(Json(json!({"status": "canceled"})))
}

pub async fn get_tools(State(state): State<AppState>) -> Json<Vec<Tool>> {
    Json(state.executor.catalog().tools.clone())
}

pub async fn get_stats(State(state): State<AppState>) -> Json<HashMap<String, QueueStats>> {
    Json(state.manager.queue_stats().await)
}
