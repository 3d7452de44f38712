use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use super::{AppState, static_handler};
use super::handlers::{directories, files, tasks, ws};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/tasks", post(tasks::create_task).get(tasks::list_tasks))
        .route("/api/tasks/{id}", get(tasks::get_task))
        .route("/api/tasks/{id}/cancel", post(tasks::cancel_task))
        .route("/api/tools", get(tasks::get_tools))
        .route("/api/stats", get(tasks::get_stats))
        .route("/api/ws", get(ws::ws_endpoint))
        .route(
            "/api/directories",
            get(directories::list_directories).post(directories::create_directory),
        )
        .route(
            "/api/directories/{id}",
            get(directories::get_directory)
                .put(directories::update_directory)
                .delete(directories::delete_directory),
        )
        .route(
            "/api/directories/{id}/scan",
            post(directories::scan_directory),
        )
        .route(
            "/api/directories/{id}/files",
            get(directories::directory_files),
        )
        .route("/api/files", get(files::list_files))
        .route("/api/files/search", get(files::search_files))
        .route(
            "/api/files/{id}",
            get(files::get_file).delete(files::delete_file),
        )
        .route("/api/files/{id}/download", get(files::download_file))
        .route("/api/files/{id}/move", post(files::move_file))
        .route("/api/files/{id}/tags", post(files::tag_file))
        .fallback(static_handler)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
