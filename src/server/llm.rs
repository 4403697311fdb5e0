use super::extract::ApiJson;
use super::SharedState;
use crate::error::Result;
use crate::llm::{DraftMessage, HealthReport, HistoryMessage, RewriteGuidance, SpeakerProfile};
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

pub async fn health(State(state): State<SharedState>) -> Result<Json<HealthReport>> {
    Ok(Json(state.llm.health().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BioBody {
    #[serde(default)]
    pub existing_bio: String,
    #[serde(default)]
    pub messages: Vec<String>,
}

pub async fn generate_bio(
    State(state): State<SharedState>,
    ApiJson(body): ApiJson<BioBody>,
) -> Result<Json<Value>> {
    let bio = state.llm.generate_bio(&body.existing_bio, &body.messages).await?;
    Ok(Json(json!({ "bio": bio })))
}

#[derive(Debug, Deserialize)]
pub struct RewriteBody {
    pub message: DraftMessage,
    pub profile: Option<SpeakerProfile>,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    #[serde(flatten)]
    pub guidance: RewriteGuidance,
}

pub async fn rewrite_message(
    State(state): State<SharedState>,
    ApiJson(body): ApiJson<RewriteBody>,
) -> Result<Json<Value>> {
    let text = state
        .llm
        .rewrite_message(&body.message, body.profile.as_ref(), &body.history, &body.guidance)
        .await?;
    Ok(Json(json!({ "text": text })))
}
