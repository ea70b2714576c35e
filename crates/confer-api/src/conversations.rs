use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use confer_db::models::{ConversationRow, parse_timestamp};
use confer_types::api::{Claims, ConversationResponse, CreateConversationRequest};
use confer_types::events::GatewayEvent;
use confer_types::models::ConversationKind;

use crate::auth::AppState;

/// Active conversations for the requester, most recently active first,
/// with participant lists and unread counts.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub.to_string();

    let rows = state
        .db
        .conversations_for_user(&user_id)
        .map_err(internal)?;
    let mut unread = state.db.unread_counts_for_user(&user_id).map_err(internal)?;

    let mut conversations = Vec::with_capacity(rows.len());
    for row in rows {
        let participants = state
            .db
            .participants_for_conversation(&row.id)
            .map_err(internal)?
            .into_iter()
            .map(|p| p.into_wire())
            .collect();
        let unread_count = unread.remove(&row.id).unwrap_or(0);
        conversations.push(to_response(row, participants, unread_count));
    }

    Ok(Json(conversations))
}

/// Create a conversation. Direct conversations are idempotent per
/// unordered pair: if one already exists between the two users it is
/// returned instead of creating a second.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let creator = claims.sub.to_string();

    // Everyone named must exist
    for id in &req.participant_ids {
        if state
            .db
            .get_user_by_id(&id.to_string())
            .map_err(internal)?
            .is_none()
        {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    let mut member_ids: Vec<String> = vec![creator.clone()];
    for id in &req.participant_ids {
        let id = id.to_string();
        if !member_ids.contains(&id) {
            member_ids.push(id);
        }
    }

    match req.kind {
        ConversationKind::Direct => {
            if member_ids.len() != 2 {
                return Err(StatusCode::BAD_REQUEST);
            }
            if let Some(existing) = state
                .db
                .find_direct_conversation(&member_ids[0], &member_ids[1])
                .map_err(internal)?
            {
                let response = load_response(&state, &existing, &creator)?;
                return Ok((StatusCode::OK, Json(response)));
            }
        }
        ConversationKind::Group => {
            if req.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
                return Err(StatusCode::BAD_REQUEST);
            }
            if member_ids.len() < 2 {
                return Err(StatusCode::BAD_REQUEST);
            }
        }
    }

    // Direct conversations are unnamed; the client renders the peer's name
    let name = match req.kind {
        ConversationKind::Direct => None,
        ConversationKind::Group => req.name.as_deref().map(str::trim),
    };

    let conversation_id = Uuid::new_v4().to_string();
    state
        .db
        .create_conversation(&conversation_id, req.kind.as_str(), name, &creator, &member_ids)
        .map_err(internal)?;

    let response = load_response(&state, &conversation_id, &creator)?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Leave a group conversation: soft-removes the participant row and tells
/// the room. Direct conversations have immutable membership.
pub async fn leave_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let conversation = state
        .db
        .get_conversation(&conversation_id.to_string())
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if conversation.kind != "group" {
        return Err(StatusCode::BAD_REQUEST);
    }

    let removed = state
        .db
        .deactivate_participant(&conversation_id.to_string(), &claims.sub.to_string())
        .map_err(internal)?;
    if !removed {
        return Err(StatusCode::NOT_FOUND);
    }

    state.dispatcher.publish(GatewayEvent::UserLeftConversation {
        conversation_id,
        user_id: claims.sub,
        username: claims.username.clone(),
    });

    Ok(StatusCode::NO_CONTENT)
}

fn load_response(
    state: &AppState,
    conversation_id: &str,
    user_id: &str,
) -> Result<ConversationResponse, StatusCode> {
    let row = state
        .db
        .get_conversation(conversation_id)
        .map_err(internal)?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    let participants = state
        .db
        .participants_for_conversation(conversation_id)
        .map_err(internal)?
        .into_iter()
        .map(|p| p.into_wire())
        .collect();
    let unread_count = state
        .db
        .unread_count(conversation_id, user_id)
        .map_err(internal)?;
    Ok(to_response(row, participants, unread_count))
}

fn to_response(
    row: ConversationRow,
    participants: Vec<confer_types::models::Participant>,
    unread_count: i64,
) -> ConversationResponse {
    ConversationResponse {
        id: row.id.parse().unwrap_or_default(),
        kind: match row.kind.as_str() {
            "group" => ConversationKind::Group,
            _ => ConversationKind::Direct,
        },
        name: row.name,
        created_by: row.created_by.parse().unwrap_or_default(),
        created_at: parse_timestamp(&row.created_at),
        last_activity_at: parse_timestamp(&row.last_activity_at),
        participants,
        unread_count,
    }
}

fn internal(e: anyhow::Error) -> StatusCode {
    error!("conversation query failed: {:#}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
