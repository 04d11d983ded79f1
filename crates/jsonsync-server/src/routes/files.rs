use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde_json::Value;

use crate::error::Result;
use crate::json::{FileSummary, SaveResponse};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/files", get(list_files))
        .route("/api/files/:name", get(get_file).put(save_file))
}

async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileSummary>>> {
    let files = state.coordinator.list()?;
    Ok(Json(files.into_iter().map(FileSummary::from).collect()))
}

async fn get_file(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Value>> {
    let name = state.coordinator.store().resolve(&name)?;
    Ok(Json(state.coordinator.read(&name)?))
}

/// Persist the body, then announce it to every subscriber.
async fn save_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(data): Json<Value>,
) -> Result<Json<SaveResponse>> {
    let name = state.coordinator.store().resolve(&name)?;
    state.coordinator.write(&name, data)?;

    Ok(Json(SaveResponse {
        status: "saved",
        file: name.to_string(),
    }))
}
