//! Artifact file routes

use crate::{AppState, error::Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use opsml_registry::api::{
    CopyFilesRequest, CopyFilesResponse, FileExistsResponse, FileListResponse, FilePathRequest,
};
use tracing::{debug, info};

/// Create file routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/blob/{*path}",
            get(read_blob).put(write_blob).delete(delete_path),
        )
        .route("/list", post(list_files))
        .route("/find", post(find_files))
        .route("/exists", post(path_exists))
        .route("/copy", post(copy_files))
}

async fn read_blob(State(state): State<AppState>, Path(path): Path<String>) -> Result<Vec<u8>> {
    debug!("Reading blob {}", path);
    Ok(state.registries.storage().read(&path).await?)
}

async fn write_blob(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<StatusCode> {
    debug!("Writing {} bytes to {}", body.len(), path);
    state.registries.storage().write(&path, body.to_vec()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Remove a file or every file under a directory
async fn delete_path(State(state): State<AppState>, Path(path): Path<String>) -> Result<StatusCode> {
    state.registries.storage().rm(&path).await?;
    info!("Deleted artifacts at {}", path);
    Ok(StatusCode::NO_CONTENT)
}

async fn list_files(
    State(state): State<AppState>,
    Json(request): Json<FilePathRequest>,
) -> Result<Json<FileListResponse>> {
    let files = state.registries.storage().ls(&request.path).await?;
    Ok(Json(FileListResponse { files }))
}

async fn find_files(
    State(state): State<AppState>,
    Json(request): Json<FilePathRequest>,
) -> Result<Json<FileListResponse>> {
    let files = state.registries.storage().find(&request.path).await?;
    Ok(Json(FileListResponse { files }))
}

async fn path_exists(
    State(state): State<AppState>,
    Json(request): Json<FilePathRequest>,
) -> Result<Json<FileExistsResponse>> {
    let exists = state.registries.storage().exists(&request.path).await?;
    Ok(Json(FileExistsResponse { exists }))
}

async fn copy_files(
    State(state): State<AppState>,
    Json(request): Json<CopyFilesRequest>,
) -> Result<Json<CopyFilesResponse>> {
    state
        .registries
        .storage()
        .copy(&request.src, &request.dst)
        .await?;
    Ok(Json(CopyFilesResponse { copied: true }))
}
