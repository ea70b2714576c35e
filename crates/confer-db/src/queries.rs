use std::collections::HashMap;

use crate::Database;
use crate::models::{
    ConversationRow, MessageMetaRow, MessageRow, ParticipantRow, ReactionRow, UserRow,
};
use anyhow::Result;
use rusqlite::Connection;

/// Shared SELECT for hydrated messages: sender metadata joined in, plus a
/// preview of the replied-to message when it exists and is not tombstoned.
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.conversation_id, m.sender_id, u.username, u.display_name,
           m.content, m.message_type, m.reply_to_id,
           r.sender_id, ru.username, r.content,
           m.created_at, m.edited_at
    FROM messages m
    JOIN users u ON u.id = m.sender_id
    LEFT JOIN messages r ON r.id = m.reply_to_id AND r.deleted_at IS NULL
    LEFT JOIN users ru ON ru.id = r.sender_id";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        display_name: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, display_name) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, display_name),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Persist a presence transition and bump last_seen.
    pub fn set_user_status(&self, id: &str, status: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET status = ?2, last_seen = datetime('now') WHERE id = ?1",
                (id, status),
            )?;
            Ok(())
        })
    }

    // -- Conversations --

    /// Insert a conversation together with its participant rows. In group
    /// conversations the creator gets the admin role.
    pub fn create_conversation(
        &self,
        id: &str,
        kind: &str,
        name: Option<&str>,
        created_by: &str,
        member_ids: &[String],
    ) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, kind, name, created_by) VALUES (?1, ?2, ?3, ?4)",
                (id, kind, name, created_by),
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO conversation_participants (conversation_id, user_id, role)
                     VALUES (?1, ?2, ?3)",
                )?;
                for member in member_ids {
                    let role = if kind == "group" && member == created_by {
                        "admin"
                    } else {
                        "member"
                    };
                    stmt.execute((id, member, role))?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Existence check enforcing the one-direct-conversation-per-pair rule.
    /// The pair is unordered, so both participant rows are matched by id.
    pub fn find_direct_conversation(&self, user_a: &str, user_b: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT c.id FROM conversations c
                 JOIN conversation_participants p1
                   ON p1.conversation_id = c.id AND p1.user_id = ?1
                 JOIN conversation_participants p2
                   ON p2.conversation_id = c.id AND p2.user_id = ?2
                 WHERE c.kind = 'direct'",
                (user_a, user_b),
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, kind, name, created_by, created_at, last_activity_at
                 FROM conversations WHERE id = ?1",
                [id],
                map_conversation_row,
            )
            .optional()
        })
    }

    /// All conversations where the user holds an active participant row,
    /// most recently active first.
    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.kind, c.name, c.created_by, c.created_at, c.last_activity_at
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1 AND p.is_active = 1
                 ORDER BY c.last_activity_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Room membership resolution at connect time: just the ids.
    pub fn conversation_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id FROM conversation_participants
                 WHERE user_id = ?1 AND is_active = 1",
            )?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_active_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let row: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversation_participants
                     WHERE conversation_id = ?1 AND user_id = ?2 AND is_active = 1",
                    (conversation_id, user_id),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(row.is_some())
        })
    }

    pub fn participants_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ParticipantRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.conversation_id, p.user_id, u.username, u.display_name,
                        p.role, p.joined_at
                 FROM conversation_participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.conversation_id = ?1 AND p.is_active = 1
                 ORDER BY p.joined_at",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| {
                    Ok(ParticipantRow {
                        conversation_id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                        display_name: row.get(3)?,
                        role: row.get(4)?,
                        joined_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Soft-removal: the row stays for history attribution.
    pub fn deactivate_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversation_participants
                 SET is_active = 0, left_at = datetime('now')
                 WHERE conversation_id = ?1 AND user_id = ?2 AND is_active = 1",
                (conversation_id, user_id),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn touch_conversation(&self, conversation_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET last_activity_at = datetime('now') WHERE id = ?1",
                [conversation_id],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        message_type: &str,
        reply_to_id: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, message_type, reply_to_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, conversation_id, sender_id, content, message_type, reply_to_id],
            )?;
            Ok(())
        })
    }

    /// Bare columns for ownership/membership checks. Returns tombstoned
    /// messages too, so callers can distinguish deleted from absent.
    pub fn get_message_meta(&self, id: &str) -> Result<Option<MessageMetaRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, conversation_id, sender_id, deleted_at FROM messages WHERE id = ?1",
                [id],
                |row| {
                    Ok(MessageMetaRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        deleted: row.get::<_, Option<String>>(3)?.is_some(),
                    })
                },
            )
            .optional()
        })
    }

    /// Re-read one committed message with full hydration. Tombstoned
    /// messages are not returned.
    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1 AND m.deleted_at IS NULL");
            conn.query_row(&sql, [id], map_message_row).optional()
        })
    }

    /// Paginated history, newest first. `before` is the created_at cursor of
    /// the oldest message from the previous page.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let rows = match before {
                Some(cursor) => {
                    let sql = format!(
                        "{MESSAGE_SELECT}
                         WHERE m.conversation_id = ?1 AND m.deleted_at IS NULL
                           AND m.created_at < ?2
                         ORDER BY m.created_at DESC, m.rowid DESC
                         LIMIT ?3"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(
                        rusqlite::params![conversation_id, cursor, limit],
                        map_message_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let sql = format!(
                        "{MESSAGE_SELECT}
                         WHERE m.conversation_id = ?1 AND m.deleted_at IS NULL
                         ORDER BY m.created_at DESC, m.rowid DESC
                         LIMIT ?2"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(rusqlite::params![conversation_id, limit], map_message_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
    }

    pub fn search_messages(
        &self,
        conversation_id: &str,
        needle: &str,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE m.conversation_id = ?1 AND m.deleted_at IS NULL
                   AND m.content LIKE '%' || ?2 || '%'
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, needle, limit],
                    map_message_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn edit_message(&self, id: &str, content: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET content = ?2, edited_at = datetime('now') WHERE id = ?1",
                (id, content),
            )?;
            Ok(())
        })
    }

    /// Soft delete: the row is kept for audit, excluded from all reads.
    pub fn tombstone_message(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET deleted_at = datetime('now') WHERE id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    // -- Read status --

    /// Insert-if-missing, one row per (message, reader). Re-marking an
    /// already-read page is a no-op, never an error. Returns how many rows
    /// were actually inserted.
    pub fn mark_messages_read(&self, message_ids: &[String], user_id: &str) -> Result<usize> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO message_read_status (message_id, user_id)
                     VALUES (?1, ?2)",
                )?;
                for id in message_ids {
                    inserted += stmt.execute((id, user_id))?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    /// Messages in the conversation authored by someone else with no read
    /// row for this user.
    pub fn unread_count(&self, conversation_id: &str, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.conversation_id = ?1 AND m.sender_id != ?2
                   AND m.deleted_at IS NULL
                   AND NOT EXISTS (SELECT 1 FROM message_read_status rs
                                   WHERE rs.message_id = m.id AND rs.user_id = ?2)",
                (conversation_id, user_id),
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Unread counts for every conversation the user actively participates
    /// in, in a single grouped query.
    pub fn unread_counts_for_user(&self, user_id: &str) -> Result<HashMap<String, i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.conversation_id, COUNT(*)
                 FROM messages m
                 JOIN conversation_participants p
                   ON p.conversation_id = m.conversation_id
                  AND p.user_id = ?1 AND p.is_active = 1
                 WHERE m.sender_id != ?1 AND m.deleted_at IS NULL
                   AND NOT EXISTS (SELECT 1 FROM message_read_status rs
                                   WHERE rs.message_id = m.id AND rs.user_id = ?1)
                 GROUP BY m.conversation_id",
            )?;
            let rows = stmt
                .query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<HashMap<String, i64>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reactions --

    /// Upsert-by-(message, user): re-reacting replaces the prior value
    /// instead of adding a second row. The unique constraint makes this
    /// atomic under concurrent requests from the same user's tabs.
    pub fn upsert_reaction(&self, message_id: &str, user_id: &str, reaction: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_reactions (message_id, user_id, reaction)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(message_id, user_id)
                 DO UPDATE SET reaction = excluded.reaction, created_at = datetime('now')",
                (message_id, user_id, reaction),
            )?;
            Ok(())
        })
    }

    /// Returns false when there was no row to delete.
    pub fn delete_reaction(&self, message_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
                (message_id, user_id),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_reactions_for_message(&self, message_id: &str) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, user_id, reaction, created_at
                 FROM message_reactions WHERE message_id = ?1
                 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([message_id], map_reaction_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, reaction, created_at
                 FROM message_reactions WHERE message_id IN ({})
                 ORDER BY created_at",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), map_reaction_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, display_name, avatar_url, status, last_seen, created_at
         FROM users WHERE {column} = ?1"
    );
    let row = conn
        .query_row(&sql, [value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                display_name: row.get(3)?,
                avatar_url: row.get(4)?,
                status: row.get(5)?,
                last_seen: row.get(6)?,
                created_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
        last_activity_at: row.get(5)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row.get(3)?,
        sender_display_name: row.get(4)?,
        content: row.get(5)?,
        message_type: row.get(6)?,
        reply_to_id: row.get(7)?,
        reply_sender_id: row.get(8)?,
        reply_sender_username: row.get(9)?,
        reply_content: row.get(10)?,
        created_at: row.get(11)?,
        edited_at: row.get(12)?,
    })
}

fn map_reaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReactionRow> {
    Ok(ReactionRow {
        message_id: row.get(0)?,
        user_id: row.get(1)?,
        reaction: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn seed_user(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, username, "hash", username).unwrap();
        id
    }

    fn seed_direct(db: &Database, a: &str, b: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_conversation(&id, "direct", None, a, &[a.to_string(), b.to_string()])
            .unwrap();
        id
    }

    fn seed_message(db: &Database, conversation: &str, sender: &str, content: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_message(&id, conversation, sender, content, "text", None)
            .unwrap();
        id
    }

    #[test]
    fn direct_conversation_found_for_unordered_pair() {
        let db = db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let conv = seed_direct(&db, &alice, &bob);

        assert_eq!(
            db.find_direct_conversation(&alice, &bob).unwrap(),
            Some(conv.clone())
        );
        assert_eq!(
            db.find_direct_conversation(&bob, &alice).unwrap(),
            Some(conv)
        );

        let carol = seed_user(&db, "carol");
        assert_eq!(db.find_direct_conversation(&alice, &carol).unwrap(), None);
    }

    #[test]
    fn group_creator_gets_admin_role() {
        let db = db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let conv = Uuid::new_v4().to_string();
        db.create_conversation(
            &conv,
            "group",
            Some("plans"),
            &alice,
            &[alice.clone(), bob.clone()],
        )
        .unwrap();

        let participants = db.participants_for_conversation(&conv).unwrap();
        assert_eq!(participants.len(), 2);
        let alice_row = participants.iter().find(|p| p.user_id == alice).unwrap();
        let bob_row = participants.iter().find(|p| p.user_id == bob).unwrap();
        assert_eq!(alice_row.role, "admin");
        assert_eq!(bob_row.role, "member");
    }

    #[test]
    fn deactivated_participant_loses_access() {
        let db = db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let conv = Uuid::new_v4().to_string();
        db.create_conversation(
            &conv,
            "group",
            Some("plans"),
            &alice,
            &[alice.clone(), bob.clone()],
        )
        .unwrap();

        assert!(db.is_active_participant(&conv, &bob).unwrap());
        assert!(db.deactivate_participant(&conv, &bob).unwrap());
        assert!(!db.is_active_participant(&conv, &bob).unwrap());
        // Already inactive: nothing to update
        assert!(!db.deactivate_participant(&conv, &bob).unwrap());
        // The row itself survives for attribution
        assert!(db.conversation_ids_for_user(&bob).unwrap().is_empty());
    }

    #[test]
    fn reaction_upsert_keeps_one_row_with_latest_value() {
        let db = db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let conv = seed_direct(&db, &alice, &bob);
        let msg = seed_message(&db, &conv, &alice, "hi");

        db.upsert_reaction(&msg, &bob, "👍").unwrap();
        db.upsert_reaction(&msg, &bob, "🎉").unwrap();

        let rows = db.get_reactions_for_message(&msg).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reaction, "🎉");
        assert_eq!(rows[0].user_id, bob);
    }

    #[test]
    fn delete_reaction_reports_missing_row() {
        let db = db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let conv = seed_direct(&db, &alice, &bob);
        let msg = seed_message(&db, &conv, &alice, "hi");

        assert!(!db.delete_reaction(&msg, &bob).unwrap());
        db.upsert_reaction(&msg, &bob, "👍").unwrap();
        assert!(db.delete_reaction(&msg, &bob).unwrap());
        assert!(db.get_reactions_for_message(&msg).unwrap().is_empty());
    }

    #[test]
    fn mark_read_is_idempotent() {
        let db = db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let conv = seed_direct(&db, &alice, &bob);
        let msg = seed_message(&db, &conv, &alice, "hi");

        let ids = vec![msg.clone()];
        assert_eq!(db.mark_messages_read(&ids, &bob).unwrap(), 1);
        assert_eq!(db.mark_messages_read(&ids, &bob).unwrap(), 0);
        assert_eq!(db.unread_count(&conv, &bob).unwrap(), 0);
    }

    #[test]
    fn unread_count_excludes_own_and_deleted_messages() {
        let db = db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let conv = seed_direct(&db, &alice, &bob);

        seed_message(&db, &conv, &bob, "my own message");
        let from_alice = seed_message(&db, &conv, &alice, "unread");
        let deleted = seed_message(&db, &conv, &alice, "gone");
        db.tombstone_message(&deleted).unwrap();

        assert_eq!(db.unread_count(&conv, &bob).unwrap(), 1);

        db.mark_messages_read(&[from_alice], &bob).unwrap();
        assert_eq!(db.unread_count(&conv, &bob).unwrap(), 0);

        let counts = db.unread_counts_for_user(&bob).unwrap();
        assert!(counts.get(&conv).is_none());
    }

    #[test]
    fn tombstoned_message_is_excluded_from_reads() {
        let db = db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let conv = seed_direct(&db, &alice, &bob);
        let msg = seed_message(&db, &conv, &alice, "oops");

        db.tombstone_message(&msg).unwrap();

        assert!(db.get_message(&msg).unwrap().is_none());
        assert!(db.get_messages(&conv, 50, None).unwrap().is_empty());
        // Meta still resolves, flagged as deleted, for audit paths
        let meta = db.get_message_meta(&msg).unwrap().unwrap();
        assert!(meta.deleted);
    }

    #[test]
    fn edit_updates_content_and_sets_edited_at() {
        let db = db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let conv = seed_direct(&db, &alice, &bob);
        let msg = seed_message(&db, &conv, &alice, "draft");

        db.edit_message(&msg, "final").unwrap();

        let row = db.get_message(&msg).unwrap().unwrap();
        assert_eq!(row.content, "final");
        assert!(row.edited_at.is_some());
    }

    #[test]
    fn reply_preview_is_hydrated_and_dropped_when_target_deleted() {
        let db = db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let conv = seed_direct(&db, &alice, &bob);
        let original = seed_message(&db, &conv, &alice, "original");

        let reply = Uuid::new_v4().to_string();
        db.insert_message(&reply, &conv, &bob, "reply", "text", Some(&original))
            .unwrap();

        let row = db.get_message(&reply).unwrap().unwrap();
        assert_eq!(row.reply_to_id.as_deref(), Some(original.as_str()));
        assert_eq!(row.reply_content.as_deref(), Some("original"));
        assert_eq!(row.reply_sender_username.as_deref(), Some("alice"));

        db.tombstone_message(&original).unwrap();
        let row = db.get_message(&reply).unwrap().unwrap();
        assert!(row.reply_sender_id.is_none());
        assert!(row.reply_content.is_none());
    }

    #[test]
    fn search_matches_content_in_one_conversation_only() {
        let db = db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let carol = seed_user(&db, "carol");
        let conv = seed_direct(&db, &alice, &bob);
        let other = seed_direct(&db, &alice, &carol);

        seed_message(&db, &conv, &alice, "deploy friday");
        seed_message(&db, &conv, &bob, "nothing relevant");
        seed_message(&db, &other, &alice, "deploy saturday");

        let hits = db.search_messages(&conv, "deploy", 50).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "deploy friday");
    }

    #[test]
    fn set_user_status_persists_and_bumps_last_seen() {
        let db = db();
        let alice = seed_user(&db, "alice");

        db.set_user_status(&alice, "online").unwrap();
        let row = db.get_user_by_id(&alice).unwrap().unwrap();
        assert_eq!(row.status, "online");
        assert!(row.last_seen.is_some());
    }
}
