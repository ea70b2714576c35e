use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            avatar_url      TEXT,
            status          TEXT NOT NULL DEFAULT 'offline'
                            CHECK (status IN ('online', 'offline', 'away')),
            last_seen       TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT PRIMARY KEY,
            kind                TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
            name                TEXT,
            created_by          TEXT NOT NULL REFERENCES users(id),
            created_at          TEXT NOT NULL DEFAULT (datetime('now')),
            last_activity_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS conversation_participants (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            role            TEXT NOT NULL DEFAULT 'member'
                            CHECK (role IN ('admin', 'member')),
            is_active       INTEGER NOT NULL DEFAULT 1,
            joined_at       TEXT NOT NULL DEFAULT (datetime('now')),
            left_at         TEXT,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON conversation_participants(user_id, is_active);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            message_type    TEXT NOT NULL DEFAULT 'text',
            reply_to_id     TEXT REFERENCES messages(id),
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            edited_at       TEXT,
            deleted_at      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS message_read_status (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            read_at     TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_read_status_user
            ON message_read_status(user_id);

        CREATE TABLE IF NOT EXISTS message_reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            reaction    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON message_reactions(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
