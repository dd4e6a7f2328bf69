//! JSON API over the chat service

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{errors::ApiError, AppState};
use crate::{
    app::{starters, ChatError, ExchangeOutcome, ModelStatus, Starter},
    session::{ConversationStats, Turn},
};

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub message: String,
    #[serde(default)]
    pub max_length: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct HistoryBody {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    #[serde(flatten)]
    pub model: ModelStatus,
    pub sessions: usize,
}

pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.app.create_session().await;
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.app.sessions().remove(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ChatError::SessionNotFound(id).into())
    }
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<HistoryBody>, ApiError> {
    let turns = state.app.history(id).await?;
    let created_at = state.app.created_at(id).await?;
    Ok(Json(HistoryBody {
        session_id: id,
        created_at,
        turns,
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<ExchangeOutcome>, ApiError> {
    let outcome = state
        .app
        .send_message(id, &body.message, body.max_length)
        .await?;
    Ok(Json(outcome))
}

pub async fn clear(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.app.clear(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationStats>, ApiError> {
    Ok(Json(state.app.stats(id).await?))
}

pub async fn list_starters() -> Json<&'static [Starter]> {
    Json(starters())
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthBody>) {
    let model = state.app.model_status().await;
    let status = if model.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthBody {
        model,
        sessions: state.app.sessions().len().await,
    };
    (status, Json(body))
}
