use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use uuid::Uuid;

use smsbridge_types::api::SettingsPatch;
use smsbridge_types::models::{DailyCount, Message, MessageStatus, Settings};

use crate::Database;
use crate::models::{UserChanges, UserRow};

/// Per-status totals for one user's messages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: u64,
    pub delivered: u64,
    pub failed: u64,
    pub pending: u64,
}

const USER_COLUMNS: &str = "id, email, password, name, telegram_id, telegram_username,
    telegram_phone_number, telegram_session, twilio_account_sid, twilio_auth_token,
    twilio_phone_number, target_phone_number, is_active, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, user_id, content, sender, recipient, status, provider_message_id, created_at, updated_at";

const SETTINGS_COLUMNS: &str = "id, user_id, forward_all_chats, only_non_muted_chats,
    monitored_chats, include_sender_name, max_sms_length, forward_media,
    forward_own_messages, created_at, updated_at";

impl Database {
    // -- Users --

    /// Insert a user together with its settings record in one transaction.
    pub fn create_user(&self, user: &UserRow, settings: &Settings) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (id, email, password, name, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.id.to_string(),
                    user.email,
                    user.password,
                    user.name,
                    user.is_active,
                    user.created_at,
                    user.updated_at,
                ],
            )?;
            upsert_settings(&tx, settings)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS);
            Ok(conn.query_row(&sql, [email], user_from_row).optional()?)
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
            Ok(conn.query_row(&sql, [id.to_string()], user_from_row).optional()?)
        })
    }

    /// Apply `changes` to one user and return the updated row, or `None` if
    /// the user is gone. Columns not named in `changes` are never written.
    pub fn update_profile(&self, id: Uuid, changes: &UserChanges) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE users SET
                    name = COALESCE(?2, name),
                    email = COALESCE(?3, email),
                    password = COALESCE(?4, password),
                    twilio_account_sid = COALESCE(?5, twilio_account_sid),
                    twilio_auth_token = COALESCE(?6, twilio_auth_token),
                    twilio_phone_number = COALESCE(?7, twilio_phone_number),
                    target_phone_number = COALESCE(?8, target_phone_number),
                    updated_at = ?9
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    changes.name,
                    changes.email,
                    changes.password,
                    changes.twilio_account_sid,
                    changes.twilio_auth_token,
                    changes.twilio_phone_number,
                    changes.target_phone_number,
                    Utc::now(),
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
            let user = tx.query_row(&sql, [id.to_string()], user_from_row)?;
            tx.commit()?;
            Ok(Some(user))
        })
    }

    /// Record a pending Telegram linking code. Returns false if the user is gone.
    pub fn set_telegram_code(&self, id: Uuid, phone_number: &str, code: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET telegram_phone_number = ?2, telegram_session = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![id.to_string(), phone_number, code, Utc::now()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Link a Telegram account if `code` matches the pending one, consuming it.
    /// Returns false when no such code is outstanding for the user.
    pub fn link_telegram(&self, id: Uuid, code: &str, telegram_id: &str, telegram_username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET
                    telegram_id = ?3, telegram_username = ?4, telegram_session = NULL, updated_at = ?5
                 WHERE id = ?1 AND telegram_session = ?2",
                params![id.to_string(), code, telegram_id, telegram_username, Utc::now()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Drop every Telegram linking field, including a pending code.
    pub fn clear_telegram(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET
                    telegram_id = NULL, telegram_username = NULL,
                    telegram_phone_number = NULL, telegram_session = NULL, updated_at = ?2
                 WHERE id = ?1",
                params![id.to_string(), Utc::now()],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, user_id, content, sender, recipient, status,
                    provider_message_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    message.id.to_string(),
                    message.user.to_string(),
                    message.content,
                    message.sender,
                    message.recipient,
                    message.status.as_str(),
                    message.provider_message_id,
                    message.created_at,
                    message.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Newest-first page of a user's messages.
    pub fn get_messages(&self, user_id: Uuid, limit: u32, offset: u64) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let offset = i64::try_from(offset)?;
            let rows = stmt
                .query_map(params![user_id.to_string(), limit, offset], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_messages(&self, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE user_id = ?1",
                [user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Fetch a message only if it belongs to `user_id`.
    pub fn get_message(&self, user_id: Uuid, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE id = ?1 AND user_id = ?2",
                MESSAGE_COLUMNS
            );
            Ok(conn
                .query_row(&sql, [id.to_string(), user_id.to_string()], message_from_row)
                .optional()?)
        })
    }

    pub fn message_status_counts(&self, user_id: Uuid) -> Result<StatusCounts> {
        self.with_conn(|conn| {
            let (total, delivered, failed, pending): (i64, i64, i64, i64) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'delivered'), 0),
                        COALESCE(SUM(status = 'failed'), 0),
                        COALESCE(SUM(status = 'pending'), 0)
                 FROM messages WHERE user_id = ?1",
                [user_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
            Ok(StatusCounts {
                total: total as u64,
                delivered: delivered as u64,
                failed: failed as u64,
                pending: pending as u64,
            })
        })
    }

    /// Messages per UTC day created at or after `since`, oldest day first.
    pub fn daily_message_counts(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<DailyCount>> {
        self.with_conn(|conn| {
            // Timestamps are stored as "YYYY-MM-DD HH:MM:SS.f+00:00", so the
            // first ten characters are the UTC date.
            let mut stmt = conn.prepare(
                "SELECT substr(created_at, 1, 10) AS day, COUNT(*)
                 FROM messages
                 WHERE user_id = ?1 AND created_at >= ?2
                 GROUP BY day
                 ORDER BY day ASC",
            )?;
            let rows = stmt
                .query_map(params![user_id.to_string(), since], |row| {
                    Ok(DailyCount {
                        date: row.get(0)?,
                        count: row.get::<_, i64>(1)? as u64,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Settings --

    pub fn get_settings(&self, user_id: Uuid) -> Result<Option<Settings>> {
        self.with_conn(|conn| query_settings(conn, user_id))
    }

    /// Return the user's settings, inserting defaults first if there are none.
    /// The UNIQUE index on user_id makes concurrent callers converge on one row.
    pub fn get_or_create_settings(&self, user_id: Uuid) -> Result<Settings> {
        self.with_conn_mut(|conn| {
            let defaults = Settings::defaults(user_id);
            let sql = format!(
                "INSERT OR IGNORE INTO settings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                SETTINGS_COLUMNS
            );
            conn.execute(&sql, params_from_iter(settings_params(&defaults)?))?;
            query_settings(conn, user_id)?
                .ok_or_else(|| anyhow::anyhow!("settings for {} vanished after insert", user_id))
        })
    }

    /// Merge `patch` into the user's settings (defaults if none exist yet) and
    /// store the result, all under one transaction.
    pub fn update_settings(&self, user_id: Uuid, patch: &SettingsPatch) -> Result<Settings> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut settings =
                query_settings(&tx, user_id)?.unwrap_or_else(|| Settings::defaults(user_id));
            settings.apply(patch);
            upsert_settings(&tx, &settings)?;
            tx.commit()?;
            Ok(settings)
        })
    }
}

fn query_settings(conn: &Connection, user_id: Uuid) -> Result<Option<Settings>> {
    let sql = format!("SELECT {} FROM settings WHERE user_id = ?1", SETTINGS_COLUMNS);
    Ok(conn.query_row(&sql, [user_id.to_string()], settings_from_row).optional()?)
}

fn upsert_settings(conn: &Connection, settings: &Settings) -> Result<()> {
    let sql = format!(
        "INSERT INTO settings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(user_id) DO UPDATE SET
            forward_all_chats = excluded.forward_all_chats,
            only_non_muted_chats = excluded.only_non_muted_chats,
            monitored_chats = excluded.monitored_chats,
            include_sender_name = excluded.include_sender_name,
            max_sms_length = excluded.max_sms_length,
            forward_media = excluded.forward_media,
            forward_own_messages = excluded.forward_own_messages,
            updated_at = excluded.updated_at",
        SETTINGS_COLUMNS
    );
    conn.execute(&sql, params_from_iter(settings_params(settings)?))?;
    Ok(())
}

fn settings_params(s: &Settings) -> Result<Vec<Box<dyn rusqlite::ToSql>>> {
    Ok(vec![
        Box::new(s.id.to_string()),
        Box::new(s.user.to_string()),
        Box::new(s.forward_all_chats),
        Box::new(s.only_non_muted_chats),
        Box::new(serde_json::to_string(&s.monitored_chats)?),
        Box::new(s.include_sender_name),
        Box::new(s.max_sms_length),
        Box::new(s.forward_media),
        Box::new(s.forward_own_messages),
        Box::new(s.created_at),
        Box::new(s.updated_at),
    ])
}

fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_at(row, 0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        name: row.get(3)?,
        telegram_id: row.get(4)?,
        telegram_username: row.get(5)?,
        telegram_phone_number: row.get(6)?,
        telegram_session: row.get(7)?,
        twilio_account_sid: row.get(8)?,
        twilio_auth_token: row.get(9)?,
        twilio_phone_number: row.get(10)?,
        target_phone_number: row.get(11)?,
        is_active: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    let status: String = row.get(5)?;
    let status = status
        .parse::<MessageStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into()))?;

    Ok(Message {
        id: uuid_at(row, 0)?,
        user: uuid_at(row, 1)?,
        content: row.get(2)?,
        sender: row.get(3)?,
        recipient: row.get(4)?,
        status,
        provider_message_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn settings_from_row(row: &Row) -> rusqlite::Result<Settings> {
    let chats: String = row.get(4)?;
    let monitored_chats = serde_json::from_str(&chats)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(Settings {
        id: uuid_at(row, 0)?,
        user: uuid_at(row, 1)?,
        forward_all_chats: row.get(2)?,
        only_non_muted_chats: row.get(3)?,
        monitored_chats,
        include_sender_name: row.get(5)?,
        max_sms_length: row.get(6)?,
        forward_media: row.get(7)?,
        forward_own_messages: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::is_constraint_violation;

    fn db_with_user(email: &str) -> (Database, UserRow) {
        let db = Database::open_in_memory().unwrap();
        let user = UserRow::new(email.into(), "hash".into(), "Test".into());
        db.create_user(&user, &Settings::defaults(user.id)).unwrap();
        (db, user)
    }

    fn message_at(user: Uuid, status: MessageStatus, created_at: DateTime<Utc>) -> Message {
        let mut msg = Message::pending(user, "hello".into(), "+15550000".into(), "+15551111".into())
            .settle(status, Some("SM1".into()));
        msg.created_at = created_at;
        msg
    }

    #[test]
    fn create_user_also_creates_settings() {
        let (db, user) = db_with_user("a@example.com");

        let fetched = db.get_user_by_email("a@example.com").unwrap().unwrap();
        assert_eq!(fetched.id, user.id);
        assert!(fetched.is_active);

        let settings = db.get_settings(user.id).unwrap().unwrap();
        assert_eq!(settings.user, user.id);
        assert_eq!(settings.max_sms_length, 160);
    }

    #[test]
    fn duplicate_email_is_a_constraint_violation() {
        let (db, _) = db_with_user("dup@example.com");
        let other = UserRow::new("dup@example.com".into(), "hash".into(), "Other".into());

        let err = db.create_user(&other, &Settings::defaults(other.id)).unwrap_err();
        assert!(is_constraint_violation(&err));
        // The transaction rolled back: no orphaned settings row.
        assert!(db.get_settings(other.id).unwrap().is_none());
    }

    #[test]
    fn update_profile_writes_only_named_columns() {
        let (db, user) = db_with_user("b@example.com");
        let changes = UserChanges {
            twilio_account_sid: Some("AC123".into()),
            ..Default::default()
        };

        let updated = db.update_profile(user.id, &changes).unwrap().unwrap();
        assert_eq!(updated.twilio_account_sid.as_deref(), Some("AC123"));
        assert_eq!(updated.name, user.name);
        assert_eq!(updated.email, user.email);
        assert_eq!(updated.password, user.password);

        let ghost = UserRow::new("ghost@example.com".into(), "h".into(), "G".into());
        assert!(db.update_profile(ghost.id, &changes).unwrap().is_none());
    }

    #[test]
    fn profile_edit_keeps_concurrent_telegram_link() {
        let (db, user) = db_with_user("race@example.com");
        // A profile request loads the row before the link lands.
        let stale = db.get_user_by_id(user.id).unwrap().unwrap();
        assert!(stale.telegram_id.is_none());

        assert!(db.set_telegram_code(user.id, "+15550000", "123456").unwrap());
        assert!(db.link_telegram(user.id, "123456", "telegram_1", "user_1").unwrap());

        let changes = UserChanges { name: Some("Renamed".into()), ..Default::default() };
        let updated = db.update_profile(stale.id, &changes).unwrap().unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.telegram_id.as_deref(), Some("telegram_1"));
        assert_eq!(updated.telegram_username.as_deref(), Some("user_1"));
    }

    #[test]
    fn telegram_code_is_single_use() {
        let (db, user) = db_with_user("tg@example.com");
        assert!(!db.link_telegram(user.id, "123456", "telegram_1", "user_1").unwrap());

        assert!(db.set_telegram_code(user.id, "+15550000", "123456").unwrap());
        assert!(!db.link_telegram(user.id, "654321", "telegram_1", "user_1").unwrap());
        assert!(db.link_telegram(user.id, "123456", "telegram_1", "user_1").unwrap());
        assert!(!db.link_telegram(user.id, "123456", "telegram_2", "user_2").unwrap());

        let linked = db.get_user_by_id(user.id).unwrap().unwrap();
        assert_eq!(linked.telegram_id.as_deref(), Some("telegram_1"));
        assert_eq!(linked.telegram_phone_number.as_deref(), Some("+15550000"));
        assert!(linked.telegram_session.is_none());

        assert!(db.clear_telegram(user.id).unwrap());
        let cleared = db.get_user_by_id(user.id).unwrap().unwrap();
        assert!(cleared.telegram_id.is_none());
        assert!(cleared.telegram_phone_number.is_none());
    }

    #[test]
    fn messages_page_newest_first() {
        let (db, user) = db_with_user("c@example.com");
        let base = Utc::now() - Duration::hours(1);
        for i in 0..25 {
            db.insert_message(&message_at(user.id, MessageStatus::Pending, base + Duration::seconds(i)))
                .unwrap();
        }

        assert_eq!(db.count_messages(user.id).unwrap(), 25);

        let first = db.get_messages(user.id, 10, 0).unwrap();
        assert_eq!(first.len(), 10);
        assert!(first[0].created_at > first[9].created_at);

        let last = db.get_messages(user.id, 10, 20).unwrap();
        assert_eq!(last.len(), 5);
        assert!(db.get_messages(user.id, 10, 30).unwrap().is_empty());
    }

    #[test]
    fn get_message_is_scoped_to_owner() {
        let (db, owner) = db_with_user("owner@example.com");
        let intruder = UserRow::new("intruder@example.com".into(), "h".into(), "I".into());
        db.create_user(&intruder, &Settings::defaults(intruder.id)).unwrap();

        let msg = message_at(owner.id, MessageStatus::Delivered, Utc::now());
        db.insert_message(&msg).unwrap();

        assert!(db.get_message(owner.id, msg.id).unwrap().is_some());
        assert!(db.get_message(intruder.id, msg.id).unwrap().is_none());
    }

    #[test]
    fn status_counts_and_daily_breakdown() {
        let (db, user) = db_with_user("d@example.com");
        let now = Utc::now();

        assert_eq!(db.message_status_counts(user.id).unwrap(), StatusCounts::default());

        db.insert_message(&message_at(user.id, MessageStatus::Delivered, now)).unwrap();
        db.insert_message(&message_at(user.id, MessageStatus::Delivered, now)).unwrap();
        db.insert_message(&message_at(user.id, MessageStatus::Failed, now - Duration::days(2)))
            .unwrap();
        db.insert_message(&message_at(user.id, MessageStatus::Pending, now - Duration::days(45)))
            .unwrap();

        let counts = db.message_status_counts(user.id).unwrap();
        assert_eq!(
            counts,
            StatusCounts { total: 4, delivered: 2, failed: 1, pending: 1 }
        );

        let daily = db.daily_message_counts(user.id, now - Duration::days(30)).unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].date, (now - Duration::days(2)).format("%Y-%m-%d").to_string());
        assert_eq!(daily[0].count, 1);
        assert_eq!(daily[1].date, now.format("%Y-%m-%d").to_string());
        assert_eq!(daily[1].count, 2);
    }

    #[test]
    fn get_or_create_settings_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let user = UserRow::new("e@example.com".into(), "h".into(), "E".into());
        // Register normally, then drop the settings row to simulate a legacy account.
        db.create_user(&user, &Settings::defaults(user.id)).unwrap();
        db.with_conn(|conn| {
            conn.execute("DELETE FROM settings WHERE user_id = ?1", [user.id.to_string()])?;
            Ok(())
        })
        .unwrap();

        let first = db.get_or_create_settings(user.id).unwrap();
        let second = db.get_or_create_settings(user.id).unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.forward_all_chats);
        assert!(!first.forward_own_messages);
    }

    #[test]
    fn update_settings_merges_into_stored_row() {
        let (db, user) = db_with_user("g@example.com");
        let before = db.get_settings(user.id).unwrap().unwrap();

        let first = SettingsPatch { forward_media: Some(false), ..Default::default() };
        db.update_settings(user.id, &first).unwrap();
        let second = SettingsPatch { max_sms_length: Some(320), ..Default::default() };
        let merged = db.update_settings(user.id, &second).unwrap();

        assert_eq!(merged.id, before.id);
        assert!(!merged.forward_media);
        assert_eq!(merged.max_sms_length, 320);
        assert_eq!(db.get_settings(user.id).unwrap().unwrap(), merged);
    }
}
