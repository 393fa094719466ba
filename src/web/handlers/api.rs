use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::chat::chart::{chart_points, select_columns, ChartColumns, ChartPoint};
use crate::chat::{SessionError, SessionSnapshot};
use crate::web::state::AppState;

// Chat types

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
    #[serde(default)]
    pub regeneration: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAccepted {
    /// Id of the message that will receive the answer
    pub message_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartResponse {
    pub message_id: String,
    pub columns: ChartColumns,
    pub column_names: Vec<String>,
    pub points: Vec<ChartPoint>,
    pub row_count: usize,
    pub total_row_count: usize,
}

// System status

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub space_id: String,
    pub conversation_id: Option<String>,
    pub message_count: usize,
    pub loading: bool,
}

fn session_error_status(e: &SessionError) -> StatusCode {
    match e {
        SessionError::EmptyMessage => StatusCode::BAD_REQUEST,
        SessionError::NothingToRegenerate => StatusCode::CONFLICT,
    }
}

// API Implementations

pub async fn get_chat(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot().await)
}

/// Starts a send and answers right away; the answer lands on `message_id`.
async fn accept_send(
    state: Arc<AppState>,
    text: &str,
    regeneration: bool,
) -> Result<(StatusCode, Json<SendAccepted>), (StatusCode, String)> {
    let pending = state
        .session
        .begin_send(text, regeneration)
        .await
        .map_err(|e| (session_error_status(&e), e.to_string()))?;

    let message_id = pending.message_id.clone();
    debug!(
        "Accepted send for message {} (regeneration: {})",
        message_id, pending.regeneration
    );

    let background = Arc::clone(&state);
    tokio::spawn(async move {
        background.session.complete(pending).await;
    });

    Ok((StatusCode::ACCEPTED, Json(SendAccepted { message_id })))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendAccepted>), (StatusCode, String)> {
    accept_send(state, &payload.text, payload.regeneration).await
}

pub async fn regenerate(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<SendAccepted>), (StatusCode, String)> {
    accept_send(state, "", true).await
}

pub async fn clear_chat(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session.clear_chat().await;
    StatusCode::NO_CONTENT
}

pub async fn get_chart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ChartResponse>, (StatusCode, String)> {
    let messages = state.session.messages().await;
    let message = messages
        .iter()
        .find(|m| m.id == id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Message '{}' not found", id)))?;

    let table = message.sql_chart_data.as_ref().ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("Message '{}' has no chart data", id),
        )
    })?;

    let columns = table
        .rows
        .first()
        .map(|row| select_columns(row))
        .unwrap_or(ChartColumns { label: 0, value: 1 });

    info!("Serving {} chart points for message {}", table.rows.len(), id);
    Ok(Json(ChartResponse {
        message_id: id,
        columns,
        column_names: table.column_names.clone(),
        points: chart_points(table),
        row_count: table.row_count,
        total_row_count: table.total_row_count,
    }))
}

// System status
pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        space_id: state.config.genie.space_id.clone(),
        conversation_id: state.session.conversation_id().await,
        message_count: state.session.message_count().await,
        loading: state.session.loading(),
    })
}
