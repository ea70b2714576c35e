use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use confer_db::models::parse_timestamp;
use confer_types::api::{Claims, UpdateStatusRequest};
use confer_types::models::User;

use crate::auth::AppState;

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = state
        .db
        .get_user_by_id(&claims.sub.to_string())
        .map_err(|e| {
            error!("user query failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let status = row.status();
    Ok(Json(User {
        id: claims.sub,
        username: row.username,
        display_name: row.display_name,
        avatar_url: row.avatar_url,
        status,
        last_seen: row.last_seen.as_deref().map(parse_timestamp),
    }))
}

/// Explicit presence update (typically `away` and back). Persisted and
/// broadcast like any other status transition, independent of how many
/// connections the user holds.
pub async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .dispatcher
        .presence()
        .set_explicit(claims.sub, req.status)
        .map_err(|e| {
            error!("status update failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(StatusCode::NO_CONTENT)
}
