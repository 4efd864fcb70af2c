use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id                      TEXT PRIMARY KEY,
                email                   TEXT NOT NULL UNIQUE,
                password                TEXT NOT NULL,
                name                    TEXT NOT NULL,
                telegram_id             TEXT,
                telegram_username       TEXT,
                telegram_phone_number   TEXT,
                telegram_session        TEXT,
                twilio_account_sid      TEXT,
                twilio_auth_token       TEXT,
                twilio_phone_number     TEXT,
                target_phone_number     TEXT,
                is_active               INTEGER NOT NULL DEFAULT 1,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id                      TEXT PRIMARY KEY,
                user_id                 TEXT NOT NULL REFERENCES users(id),
                content                 TEXT NOT NULL,
                sender                  TEXT NOT NULL,
                recipient               TEXT NOT NULL,
                status                  TEXT NOT NULL DEFAULT 'pending'
                                        CHECK (status IN ('pending', 'delivered', 'failed')),
                provider_message_id     TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_user
                ON messages(user_id, created_at);

            CREATE TABLE IF NOT EXISTS settings (
                id                      TEXT PRIMARY KEY,
                user_id                 TEXT NOT NULL UNIQUE REFERENCES users(id),
                forward_all_chats       INTEGER NOT NULL,
                only_non_muted_chats    INTEGER NOT NULL,
                monitored_chats         TEXT NOT NULL DEFAULT '[]',
                include_sender_name     INTEGER NOT NULL,
                max_sms_length          INTEGER NOT NULL,
                forward_media           INTEGER NOT NULL,
                forward_own_messages    INTEGER NOT NULL,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
