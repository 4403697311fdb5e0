use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::{blocking, SharedState};
use crate::error::{Error, Result};
use crate::files::schema::{FileListResponse, FileRecord, FileRef, FixMode, FixOutcome, MoveReport, ReconcileReport};
use crate::files::validate::classify;
use crate::files::FileContent;
use crate::llm::reshape_input;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub folder: Option<String>,
}

pub async fn list(
    State(state): State<SharedState>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<FileListResponse>> {
    let store = state.store.clone();
    let folder = query.folder.clone();
    let files = blocking(move || store.registry().list(folder.as_deref())).await?;
    Ok(Json(FileListResponse {
        total: files.len(),
        files,
        folder: query.folder,
    }))
}

fn content_response(content: FileContent) -> Response {
    match content {
        FileContent::Json(value) => Json(value).into_response(),
        FileContent::Message { name, message } => {
            Json(json!({ "name": name, "message": message })).into_response()
        }
        FileContent::Download { name, bytes } => {
            let content_type = if name.to_lowercase().ends_with(".csv") {
                "text/csv; charset=utf-8"
            } else {
                "application/octet-stream"
            };
            let disposition = format!("attachment; filename=\"{}\"", name.replace('"', ""));
            let disposition = HeaderValue::from_str(&disposition)
                .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
            (
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
    }
}

pub async fn read(State(state): State<SharedState>, ApiPath(path): ApiPath<String>) -> Result<Response> {
    Ok(content_response(state.store.read(&path).await?))
}

pub async fn read_by_id(State(state): State<SharedState>, ApiPath(id): ApiPath<i64>) -> Result<Response> {
    Ok(content_response(state.store.read_by_id(id).await?))
}

pub async fn write(
    State(state): State<SharedState>,
    ApiPath(path): ApiPath<String>,
    ApiJson(document): ApiJson<Value>,
) -> Result<Json<FileRecord>> {
    Ok(Json(state.store.write_json(&path, &document).await?))
}

pub async fn write_by_id(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(document): ApiJson<Value>,
) -> Result<Json<FileRecord>> {
    Ok(Json(state.store.write_json_by_id(id, &document).await?))
}

#[derive(Debug, Deserialize)]
pub struct SaveDraftBody {
    pub payload: Value,
}

pub async fn save_draft(
    State(state): State<SharedState>,
    ApiPath(path): ApiPath<String>,
    ApiJson(body): ApiJson<SaveDraftBody>,
) -> Result<(StatusCode, Json<FileRecord>)> {
    let record = state.store.save_draft(&path, &body.payload).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn delete(State(state): State<SharedState>, ApiPath(path): ApiPath<String>) -> Result<Json<Value>> {
    let name = state.store.delete(&path).await?;
    Ok(Json(json!({ "deleted": name })))
}

pub async fn delete_by_id(State(state): State<SharedState>, ApiPath(id): ApiPath<i64>) -> Result<Json<Value>> {
    let name = state.store.delete_by_id(id).await?;
    Ok(Json(json!({ "deleted": name, "id": id })))
}

/// Multipart upload: a `file` part plus an optional `folder` text part.
pub async fn upload(
    State(state): State<SharedState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<FileRecord>)> {
    let mut multipart = multipart?;
    let mut folder: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::MalformedInput(format!("multipart read error: {}", e)))?
    {
        let part = field.name().map(str::to_string);
        match part.as_deref() {
            Some("folder") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::MalformedInput(format!("bad folder field: {}", e)))?;
                folder = Some(text).filter(|f| !f.trim().is_empty());
            }
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| Error::MalformedInput("file part has no filename".to_string()))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::MalformedInput(format!("failed to read upload body: {}", e)))?;
                file = Some((filename, data.to_vec()));
            }
            _ => {}
        }
    }

    let (filename, data) =
        file.ok_or_else(|| Error::MalformedInput("missing file part".to_string()))?;
    let record = state.store.upload(&filename, folder.as_deref(), &data).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Deserialize)]
pub struct MoveBody {
    pub files: Vec<FileRef>,
    pub destination: String,
}

pub async fn move_files(
    State(state): State<SharedState>,
    ApiJson(body): ApiJson<MoveBody>,
) -> Result<Json<MoveReport>> {
    let store = state.store.clone();
    let report = blocking(move || store.move_files(&body.files, &body.destination)).await?;
    Ok(Json(report))
}

pub async fn migrate(State(state): State<SharedState>) -> Result<Json<ReconcileReport>> {
    let store = state.store.clone();
    Ok(Json(blocking(move || store.registry().reconcile(None)).await?))
}

pub async fn discussion(State(state): State<SharedState>) -> Result<Json<Value>> {
    Ok(Json(state.store.discussion().await?))
}

pub async fn users(State(state): State<SharedState>, ApiPath(path): ApiPath<String>) -> Result<Json<Value>> {
    let users = state.store.users(&path).await?;
    Ok(Json(json!({ "users": users })))
}

pub async fn fix_preview(State(state): State<SharedState>, ApiPath(id): ApiPath<i64>) -> Result<Json<Value>> {
    let original = state.store.read_json_by_id(id).await?;
    let fixed = state.llm.reshape_discussion(reshape_input(&original)).await?;
    let verdict = classify(&fixed);
    Ok(Json(json!({
        "original": original,
        "fixed": fixed,
        "structure": verdict.label(),
        "structureOk": verdict.status(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ApplyFixBody {
    /// Reviewed output from a preview; reshaped afresh when absent.
    pub fixed: Option<Value>,
    #[serde(default)]
    pub mode: FixMode,
}

pub async fn fix_apply(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<ApplyFixBody>,
) -> Result<Json<FixOutcome>> {
    let fixed = match body.fixed {
        Some(fixed) => fixed,
        None => {
            let original = state.store.read_json_by_id(id).await?;
            state.llm.reshape_discussion(reshape_input(&original)).await?
        }
    };
    Ok(Json(state.store.apply_fix(id, &fixed, body.mode).await?))
}

#[derive(Debug, Deserialize)]
pub struct DeleteBackupBody {
    pub path: String,
}

pub async fn delete_backup(
    State(state): State<SharedState>,
    ApiJson(body): ApiJson<DeleteBackupBody>,
) -> Result<Json<Value>> {
    state.store.delete_backup(&body.path).await?;
    Ok(Json(json!({ "deleted": body.path })))
}
