use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};

use super::ApiError;
use crate::core::files::{DirectoryRecord, FileFilters, FileRecord};
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct DirectoryRequest {
    name: String,
    path: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default, rename = "default_dir")]
    is_default: bool,
}

pub async fn create_directory(
    State(state): State<AppState>,
    Json(req): Json<DirectoryRequest>,
) -> Result<Json<DirectoryRecord>, ApiError> {
    let dir = state
        .files
        .create_directory(&req.name, &req.path, req.tool_name, req.is_default)
        .await?;
    Ok(Json(dir))
}

pub async fn list_directories(
    State(state): State<AppState>,
) -> Result<Json<Vec<DirectoryRecord>>, ApiError> {
    Ok(Json(state.files.directories().await?))
}

pub async fn get_directory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DirectoryRecord>, ApiError> {
    Ok(Json(state.files.directory(&id).await?))
}

pub async fn update_directory(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DirectoryRequest>,
) -> Result<Json<DirectoryRecord>, ApiError> {
    let mut dir = state.files.directory(&id).await?;
    dir.name = req.name;
    dir.path = req.path;
    dir.tool_name = req.tool_name;
    dir.is_default = req.is_default;
    state.files.update_directory(&dir).await?;
    Ok(Json(dir))
}

pub async fn delete_directory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.files.delete_directory(&id).await?;
    Ok(Json(json!({"status": "deleted"})))
}

pub async fn scan_directory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let registered = state.files.scan_directory(&id).await?;
    Ok(Json(json!({"status": "scanned", "registered": registered})))
}

pub async fn directory_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<FileRecord>>, ApiError> {
    // 404 on unknown directory rather than an empty listing.
    state.files.directory(&id).await?;
    let files = state
        .files
        .files(&FileFilters {
            directory_id: Some(id),
            ..Default::default()
        })
        .await?;
    Ok(Json(files))
}
