use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::SharedState;
use crate::error::Result;
use crate::files::schema::{FolderDeletion, FolderEntry};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct FolderQuery {
    pub path: Option<String>,
}

pub async fn list(
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<FolderQuery>,
) -> Result<Json<Value>> {
    let folders = state.store.list_folders(query.path.as_deref()).await?;
    Ok(Json(json!({ "path": query.path.unwrap_or_default(), "folders": folders })))
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderBody {
    pub path: String,
}

pub async fn create(
    State(state): State<SharedState>,
    ApiJson(body): ApiJson<CreateFolderBody>,
) -> Result<(StatusCode, Json<FolderEntry>)> {
    let folder = state.store.create_folder(&body.path).await?;
    Ok((StatusCode::CREATED, Json(folder)))
}

pub async fn delete(
    State(state): State<SharedState>,
    ApiPath(path): ApiPath<String>,
) -> Result<Json<FolderDeletion>> {
    Ok(Json(state.store.delete_folder(&path).await?))
}
