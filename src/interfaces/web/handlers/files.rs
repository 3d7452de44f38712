use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::io::ReaderStream;

use super::ApiError;
use crate::core::files::{FileFilters, FileRecord};
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct FileListQuery {
    directory_id: Option<String>,
    mime_type: Option<String>,
    min_size: Option<i64>,
    max_size: Option<i64>,
}

pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileListQuery>,
) -> Result<Json<Vec<FileRecord>>, ApiError> {
    let filters = FileFilters {
        directory_id: query.directory_id,
        mime_type: query.mime_type,
        min_size: query.min_size,
        max_size: query.max_size,
    };
    Ok(Json(state.files.files(&filters).await?))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
}

pub async fn search_files(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<FileRecord>>, Response> {
    let Some(q) = query.q.filter(|q| !q.is_empty()) else {
        return Err((StatusCode::BAD_REQUEST, "query parameter 'q' is required").into_response());
    };
    state
        .files
        .search_files(&q)
        .await
        .map(Json)
        .map_err(|e| ApiError(e).into_response())
}

pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileRecord>, ApiError> {
    Ok(Json(state.files.file(&id).await?))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.files.delete_file(&id).await?;
    Ok(Json(json!({"status": "deleted"})))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let file = state.files.file(&id).await?;

    let handle = match tokio::fs::File::open(&file.path).await {
        Ok(handle) => handle,
        Err(_) => {
            return Ok((StatusCode::NOT_FOUND, "file not found on filesystem").into_response());
        }
    };

    let stream = ReaderStream::new(handle);
    let response = Response::builder()
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.filename),
        )
        .header(header::CONTENT_TYPE, file.mime_type.clone())
        .header(header::CONTENT_LENGTH, file.size)
        .body(Body::from_stream(stream))
        .map_err(|e| {
            ApiError(crate::core::error::CoreError::Io(std::io::Error::other(e)))
        })?;
    Ok(response)
}

#[derive(Deserialize)]
pub struct MoveFileRequest {
    directory_id: String,
}

pub async fn move_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MoveFileRequest>,
) -> Result<Json<Value>, ApiError> {
    state.files.move_file(&id, &req.directory_id).await?;
    Ok(Json(json!({"status": "moved"})))
}

#[derive(Deserialize)]
pub struct TagFileRequest {
    tags: Vec<String>,
}

pub async fn tag_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TagFileRequest>,
) -> Result<Json<Value>, ApiError> {
    state.files.tag_file(&id, &req.tags).await?;
    Ok(Json(json!({"status": "tagged"})))
}
