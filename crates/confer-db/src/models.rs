//! Database row types — these map directly to SQLite rows.
//! Distinct from confer-types wire models to keep the DB layer independent.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use confer_types::models::{
    ChatMessage, ParticipantRole, PresenceStatus, ReactionGroup, ReplyPreview,
};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub status: String,
    pub last_seen: Option<String>,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub last_activity_at: String,
}

pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub joined_at: String,
}

/// A message joined with its sender metadata and, when present, a preview
/// of the non-deleted message it replies to.
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub sender_display_name: String,
    pub content: String,
    pub message_type: String,
    pub reply_to_id: Option<String>,
    pub reply_sender_id: Option<String>,
    pub reply_sender_username: Option<String>,
    pub reply_content: Option<String>,
    pub created_at: String,
    pub edited_at: Option<String>,
}

/// Bare message columns used for ownership and membership checks before a
/// mutation; never sent over the wire.
pub struct MessageMetaRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub deleted: bool,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub reaction: String,
    pub created_at: String,
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Parse RFC 3339 first, then fall back to naive UTC.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::warn!("Corrupt timestamp '{}': {}", s, e);
            DateTime::default()
        })
}

fn parse_uuid(s: &str) -> Uuid {
    s.parse().unwrap_or_else(|e| {
        tracing::warn!("Corrupt uuid '{}': {}", s, e);
        Uuid::default()
    })
}

impl MessageRow {
    /// Build the canonical wire representation, attaching a precomputed
    /// reaction tally.
    pub fn into_wire(self, reactions: Vec<ReactionGroup>) -> ChatMessage {
        let reply_to = match (self.reply_to_id, self.reply_sender_id) {
            (Some(id), Some(sender_id)) => Some(ReplyPreview {
                id: parse_uuid(&id),
                sender_id: parse_uuid(&sender_id),
                sender_username: self.reply_sender_username.unwrap_or_default(),
                content: self.reply_content.unwrap_or_default(),
            }),
            _ => None,
        };

        ChatMessage {
            id: parse_uuid(&self.id),
            conversation_id: parse_uuid(&self.conversation_id),
            sender_id: parse_uuid(&self.sender_id),
            sender_username: self.sender_username,
            sender_display_name: self.sender_display_name,
            content: self.content,
            message_type: self.message_type,
            reply_to,
            created_at: parse_timestamp(&self.created_at),
            edited_at: self.edited_at.as_deref().map(parse_timestamp),
            reactions,
        }
    }
}

impl ParticipantRow {
    pub fn into_wire(self) -> confer_types::models::Participant {
        confer_types::models::Participant {
            user_id: parse_uuid(&self.user_id),
            username: self.username,
            display_name: self.display_name,
            role: match self.role.as_str() {
                "admin" => ParticipantRole::Admin,
                _ => ParticipantRole::Member,
            },
            joined_at: parse_timestamp(&self.joined_at),
        }
    }
}

impl UserRow {
    pub fn status(&self) -> PresenceStatus {
        PresenceStatus::parse(&self.status).unwrap_or(PresenceStatus::Offline)
    }
}

/// Group reaction rows for a single message into the wire tally, ordered by
/// reaction value so repeated recomputations serialize identically.
pub fn group_reactions(rows: Vec<ReactionRow>) -> Vec<ReactionGroup> {
    let mut grouped: std::collections::BTreeMap<String, Vec<Uuid>> =
        std::collections::BTreeMap::new();
    for row in rows {
        grouped
            .entry(row.reaction)
            .or_default()
            .push(parse_uuid(&row.user_id));
    }
    grouped
        .into_iter()
        .map(|(reaction, user_ids)| ReactionGroup {
            count: user_ids.len(),
            reaction,
            user_ids,
        })
        .collect()
}

/// Group a batch of reaction rows by message id, each message's rows
/// collapsed into its tally.
pub fn group_reactions_by_message(
    rows: Vec<ReactionRow>,
) -> std::collections::HashMap<String, Vec<ReactionGroup>> {
    let mut by_message: std::collections::HashMap<String, Vec<ReactionRow>> =
        std::collections::HashMap::new();
    for row in rows {
        by_message.entry(row.message_id.clone()).or_default().push(row);
    }
    by_message
        .into_iter()
        .map(|(message_id, rows)| (message_id, group_reactions(rows)))
        .collect()
}
