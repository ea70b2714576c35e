use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use confer_db::models::group_reactions_by_message;
use confer_types::api::Claims;
use confer_types::models::ChatMessage;

use crate::auth::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` timestamp of the
    /// oldest message from the previous page to fetch older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

/// Paginated history, hydrated with sender metadata, reply previews and
/// reaction tallies. Fetching a page marks its messages read for the
/// requester; re-fetching the same page is a no-op.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let conversation = conversation_id.to_string();
    let reader = claims.sub.to_string();

    if !state
        .db
        .is_active_participant(&conversation, &reader)
        .map_err(internal)?
    {
        return Err(StatusCode::FORBIDDEN);
    }

    // Run all blocking DB work off the async runtime
    let db = state.clone();
    let limit = query.limit.min(200);
    let before = query.before;

    let (rows, reaction_rows) = tokio::task::spawn_blocking(move || {
        let rows = db
            .db
            .get_messages(&conversation, limit, before.as_deref())
            .map_err(internal)?;

        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db
            .db
            .get_reactions_for_messages(&message_ids)
            .map_err(internal)?;

        // Read-marking side effect: only messages authored by someone else
        // count toward unread, so own rows are skipped.
        let received: Vec<String> = rows
            .iter()
            .filter(|r| r.sender_id != reader)
            .map(|r| r.id.clone())
            .collect();
        db.db.mark_messages_read(&received, &reader).map_err(internal)?;

        Ok::<_, StatusCode>((rows, reaction_rows))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    let mut reaction_map = group_reactions_by_message(reaction_rows);
    let messages: Vec<ChatMessage> = rows
        .into_iter()
        .map(|row| {
            let reactions = reaction_map.remove(&row.id).unwrap_or_default();
            row.into_wire(reactions)
        })
        .collect();

    Ok(Json(messages))
}

/// Substring search over non-deleted content in one conversation. No
/// read-marking: searching is not reading.
pub async fn search_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let conversation = conversation_id.to_string();
    let reader = claims.sub.to_string();

    if !state
        .db
        .is_active_participant(&conversation, &reader)
        .map_err(internal)?
    {
        return Err(StatusCode::FORBIDDEN);
    }

    let needle = query.q.trim().to_string();
    if needle.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.clone();
    let limit = query.limit.min(200);
    let (rows, reaction_rows) = tokio::task::spawn_blocking(move || {
        let rows = db
            .db
            .search_messages(&conversation, &needle, limit)
            .map_err(internal)?;
        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db
            .db
            .get_reactions_for_messages(&message_ids)
            .map_err(internal)?;
        Ok::<_, StatusCode>((rows, reaction_rows))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    let mut reaction_map = group_reactions_by_message(reaction_rows);
    let messages: Vec<ChatMessage> = rows
        .into_iter()
        .map(|row| {
            let reactions = reaction_map.remove(&row.id).unwrap_or_default();
            row.into_wire(reactions)
        })
        .collect();

    Ok(Json(messages))
}

fn internal(e: anyhow::Error) -> StatusCode {
    error!("message query failed: {:#}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
