use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, PresenceStatus, ReactionGroup};

/// Machine-readable error class carried on `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AccessDenied,
    NotFound,
    Validation,
    Internal,
}

/// Events sent from server to clients over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A message was posted to a conversation
    NewMessage(ChatMessage),

    /// A message's content was changed by its sender
    MessageEdited(ChatMessage),

    /// A message was tombstoned by its sender
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    /// Full recomputed reaction tally for one message
    MessageReactionUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        reactions: Vec<ReactionGroup>,
    },

    /// A user started or stopped typing in a conversation
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        username: String,
        is_typing: bool,
    },

    /// A user's presence status changed
    UserStatusChanged {
        user_id: Uuid,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
    },

    /// A user entered the conversation's room
    UserJoinedConversation {
        conversation_id: Uuid,
        user_id: Uuid,
        username: String,
    },

    /// A user left the conversation's room
    UserLeftConversation {
        conversation_id: Uuid,
        user_id: Uuid,
        username: String,
    },

    /// Ack for an explicit join_conversation request
    JoinedConversation { conversation_id: Uuid },

    /// Operation failed; sent only to the requesting connection
    Error { code: ErrorCode, message: String },
}

impl GatewayEvent {
    /// Returns the conversation id if this event is scoped to one room.
    /// Events that return `None` are either global (presence) or targeted
    /// at a single connection (ready, acks, errors).
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::NewMessage(m) => Some(m.conversation_id),
            Self::MessageEdited(m) => Some(m.conversation_id),
            Self::MessageDeleted { conversation_id, .. } => Some(*conversation_id),
            Self::MessageReactionUpdated { conversation_id, .. } => Some(*conversation_id),
            Self::UserTyping { conversation_id, .. } => Some(*conversation_id),
            Self::UserJoinedConversation { conversation_id, .. } => Some(*conversation_id),
            Self::UserLeftConversation { conversation_id, .. } => Some(*conversation_id),
            _ => None,
        }
    }
}

/// Commands sent from client to server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Join the room of a conversation the user participates in
    JoinConversation { conversation_id: Uuid },

    /// Leave a conversation's room (connection-local, no membership change)
    LeaveConversation { conversation_id: Uuid },

    /// Post a message
    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        message_type: Option<String>,
        #[serde(default)]
        reply_to_id: Option<Uuid>,
    },

    /// Replace the content of an own message
    EditMessage { message_id: Uuid, content: String },

    /// Tombstone an own message
    DeleteMessage { message_id: Uuid },

    /// Set or replace this user's reaction on a message
    AddReaction { message_id: Uuid, reaction: String },

    /// Clear this user's reaction on a message
    RemoveReaction { message_id: Uuid },

    /// Indicate typing started in a conversation
    TypingStart { conversation_id: Uuid },

    /// Indicate typing stopped in a conversation
    TypingStop { conversation_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_snake_case_wire_names() {
        let conversation_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"send_message","data":{{"conversation_id":"{conversation_id}","content":"hi"}}}}"#
        );
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        match cmd {
            GatewayCommand::SendMessage {
                conversation_id: cid,
                content,
                message_type,
                reply_to_id,
            } => {
                assert_eq!(cid, conversation_id);
                assert_eq!(content, "hi");
                assert!(message_type.is_none());
                assert!(reply_to_id.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let raw = format!(
            r#"{{"type":"typing_start","data":{{"conversation_id":"{conversation_id}"}}}}"#
        );
        assert!(matches!(
            serde_json::from_str::<GatewayCommand>(&raw).unwrap(),
            GatewayCommand::TypingStart { .. }
        ));
    }

    #[test]
    fn events_serialize_with_snake_case_type_tags() {
        let event = GatewayEvent::UserTyping {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            username: "alice".into(),
            is_typing: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "user_typing");
        assert_eq!(value["data"]["is_typing"], true);

        let event = GatewayEvent::Error {
            code: ErrorCode::AccessDenied,
            message: "nope".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["code"], "access_denied");
    }

    #[test]
    fn room_scoping_follows_the_event_kind() {
        let conversation_id = Uuid::new_v4();
        let scoped = GatewayEvent::MessageDeleted {
            conversation_id,
            message_id: Uuid::new_v4(),
        };
        assert_eq!(scoped.conversation_id(), Some(conversation_id));

        let global = GatewayEvent::UserStatusChanged {
            user_id: Uuid::new_v4(),
            status: crate::models::PresenceStatus::Offline,
            last_seen: None,
        };
        assert_eq!(global.conversation_id(), None);
    }
}
