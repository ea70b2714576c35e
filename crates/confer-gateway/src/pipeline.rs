use uuid::Uuid;

use confer_db::models::group_reactions;
use confer_types::events::GatewayEvent;
use confer_types::models::{ChatMessage, ReactionGroup};

use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;

fn parse_id(s: &str) -> Result<Uuid, GatewayError> {
    s.parse()
        .map_err(|e| GatewayError::Database(anyhow::anyhow!("corrupt id '{}': {}", s, e)))
}

/// Deliver a message: membership check, reply validation, persist, re-read
/// the committed row for the canonical wire form, fan out to the room
/// (including the sender's own other connections), then advance the
/// conversation's activity cursor. Persistence failure aborts the whole
/// operation; nothing is broadcast.
pub fn send_message(
    dispatcher: &Dispatcher,
    sender_id: Uuid,
    conversation_id: Uuid,
    content: &str,
    message_type: Option<&str>,
    reply_to_id: Option<Uuid>,
) -> Result<ChatMessage, GatewayError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(GatewayError::Validation(
            "message content must not be empty".into(),
        ));
    }

    let conversation = conversation_id.to_string();
    let sender = sender_id.to_string();
    if !dispatcher
        .db()
        .is_active_participant(&conversation, &sender)?
    {
        return Err(GatewayError::AccessDenied(
            "not an active participant of this conversation".into(),
        ));
    }

    if let Some(reply_id) = reply_to_id {
        let meta = dispatcher
            .db()
            .get_message_meta(&reply_id.to_string())?
            .filter(|m| !m.deleted)
            .ok_or_else(|| GatewayError::NotFound("reply target does not exist".into()))?;
        if meta.conversation_id != conversation {
            return Err(GatewayError::Validation(
                "reply target belongs to a different conversation".into(),
            ));
        }
    }

    let message_id = Uuid::new_v4().to_string();
    dispatcher.db().insert_message(
        &message_id,
        &conversation,
        &sender,
        content,
        message_type.unwrap_or("text"),
        reply_to_id.map(|id| id.to_string()).as_deref(),
    )?;

    // Never trust the pre-insert object: re-read so generated fields
    // reflect the committed state.
    let row = dispatcher
        .db()
        .get_message(&message_id)?
        .ok_or_else(|| anyhow::anyhow!("message {} missing after insert", message_id))?;
    let message = row.into_wire(Vec::new());

    dispatcher.publish(GatewayEvent::NewMessage(message.clone()));
    dispatcher.db().touch_conversation(&conversation)?;

    Ok(message)
}

/// Sender-owns-message edit: mutate, re-hydrate, broadcast.
pub fn edit_message(
    dispatcher: &Dispatcher,
    sender_id: Uuid,
    message_id: Uuid,
    content: &str,
) -> Result<ChatMessage, GatewayError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(GatewayError::Validation(
            "message content must not be empty".into(),
        ));
    }

    let id = message_id.to_string();
    let meta = dispatcher
        .db()
        .get_message_meta(&id)?
        .filter(|m| !m.deleted)
        .ok_or_else(|| GatewayError::NotFound("message does not exist".into()))?;
    if meta.sender_id != sender_id.to_string() {
        return Err(GatewayError::AccessDenied(
            "only the sender may edit a message".into(),
        ));
    }

    dispatcher.db().edit_message(&id, content)?;

    let row = dispatcher
        .db()
        .get_message(&id)?
        .ok_or_else(|| anyhow::anyhow!("message {} missing after edit", id))?;
    let reactions = group_reactions(dispatcher.db().get_reactions_for_message(&id)?);
    let message = row.into_wire(reactions);

    dispatcher.publish(GatewayEvent::MessageEdited(message.clone()));
    Ok(message)
}

/// Sender-owns-message delete. A tombstone, not a row removal: the message
/// disappears from reads but stays for audit.
pub fn delete_message(
    dispatcher: &Dispatcher,
    sender_id: Uuid,
    message_id: Uuid,
) -> Result<(), GatewayError> {
    let id = message_id.to_string();
    let meta = dispatcher
        .db()
        .get_message_meta(&id)?
        .filter(|m| !m.deleted)
        .ok_or_else(|| GatewayError::NotFound("message does not exist".into()))?;
    if meta.sender_id != sender_id.to_string() {
        return Err(GatewayError::AccessDenied(
            "only the sender may delete a message".into(),
        ));
    }

    dispatcher.db().tombstone_message(&id)?;

    dispatcher.publish(GatewayEvent::MessageDeleted {
        conversation_id: parse_id(&meta.conversation_id)?,
        message_id,
    });
    Ok(())
}

/// Upsert this user's reaction, then broadcast the full recomputed tally,
/// never a delta, so clients never reconcile partial updates.
pub fn add_reaction(
    dispatcher: &Dispatcher,
    sender_id: Uuid,
    message_id: Uuid,
    reaction: &str,
) -> Result<Vec<ReactionGroup>, GatewayError> {
    let reaction = reaction.trim();
    if reaction.is_empty() {
        return Err(GatewayError::Validation("reaction must not be empty".into()));
    }

    let id = message_id.to_string();
    let meta = dispatcher
        .db()
        .get_message_meta(&id)?
        .filter(|m| !m.deleted)
        .ok_or_else(|| GatewayError::NotFound("message does not exist".into()))?;
    if !dispatcher
        .db()
        .is_active_participant(&meta.conversation_id, &sender_id.to_string())?
    {
        return Err(GatewayError::AccessDenied(
            "not an active participant of this conversation".into(),
        ));
    }

    dispatcher
        .db()
        .upsert_reaction(&id, &sender_id.to_string(), reaction)?;

    broadcast_reaction_tally(dispatcher, &meta.conversation_id, message_id)
}

/// Remove this user's reaction. Removing a reaction that is not there is a
/// not-found condition.
pub fn remove_reaction(
    dispatcher: &Dispatcher,
    sender_id: Uuid,
    message_id: Uuid,
) -> Result<Vec<ReactionGroup>, GatewayError> {
    let id = message_id.to_string();
    let meta = dispatcher
        .db()
        .get_message_meta(&id)?
        .filter(|m| !m.deleted)
        .ok_or_else(|| GatewayError::NotFound("message does not exist".into()))?;
    if !dispatcher
        .db()
        .is_active_participant(&meta.conversation_id, &sender_id.to_string())?
    {
        return Err(GatewayError::AccessDenied(
            "not an active participant of this conversation".into(),
        ));
    }

    if !dispatcher
        .db()
        .delete_reaction(&id, &sender_id.to_string())?
    {
        return Err(GatewayError::NotFound("no reaction to remove".into()));
    }

    broadcast_reaction_tally(dispatcher, &meta.conversation_id, message_id)
}

fn broadcast_reaction_tally(
    dispatcher: &Dispatcher,
    conversation_id: &str,
    message_id: Uuid,
) -> Result<Vec<ReactionGroup>, GatewayError> {
    let reactions = group_reactions(
        dispatcher
            .db()
            .get_reactions_for_message(&message_id.to_string())?,
    );
    dispatcher.publish(GatewayEvent::MessageReactionUpdated {
        conversation_id: parse_id(conversation_id)?,
        message_id,
        reactions: reactions.clone(),
    });
    Ok(reactions)
}

/// Typing indicator start/stop. The tracker entry lapses on its own after
/// the quiet window; receivers apply the same timeout locally, so a missing
/// stop event (abrupt disconnect) cannot wedge an indicator.
pub fn typing(
    dispatcher: &Dispatcher,
    sender_id: Uuid,
    username: &str,
    conversation_id: Uuid,
    is_typing: bool,
) -> Result<(), GatewayError> {
    if !dispatcher
        .db()
        .is_active_participant(&conversation_id.to_string(), &sender_id.to_string())?
    {
        return Err(GatewayError::AccessDenied(
            "not an active participant of this conversation".into(),
        ));
    }

    if is_typing {
        dispatcher.typing().start(conversation_id, sender_id);
    } else {
        dispatcher.typing().stop(conversation_id, sender_id);
    }

    dispatcher.publish(GatewayEvent::UserTyping {
        conversation_id,
        user_id: sender_id,
        username: username.to_string(),
        is_typing,
    });
    Ok(())
}
