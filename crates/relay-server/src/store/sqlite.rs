//! `SQLite`-backed message store and group directory.
//!
//! One pooled database holds both concerns. Writes are single statements,
//! so there is no transaction plumbing here; status updates enforce
//! monotonicity in SQL as a second line of defense behind the in-memory
//! tracker.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};
use tracing::info;

use relay_core::ids::{ChatId, GroupId, MessageId, UserId};
use relay_core::status::MessageStatus;

use crate::chat::resolver::{DirectoryError, GroupDirectory, GroupRecord};
use crate::store::{MessageStore, StoreError, StoredMessage};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY,
    sender     TEXT NOT NULL,
    chat       TEXT NOT NULL,
    body       TEXT NOT NULL,
    reply_to   TEXT,
    status     TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender, created_at);

CREATE TABLE IF NOT EXISTS groups (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    created_by TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    user_id  TEXT NOT NULL,
    PRIMARY KEY (group_id, user_id)
);
";

/// Shared pooled database handle; clone-cheap.
#[derive(Clone)]
pub struct SqliteStores {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStores {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;",
            )
        });
        let pool = Pool::builder().max_size(8).build(manager)?;
        pool.get()?.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "sqlite store opened");
        Ok(Self { pool })
    }

    /// The message-store view of this database.
    pub fn messages(&self) -> SqliteMessageStore {
        SqliteMessageStore {
            pool: self.pool.clone(),
        }
    }

    /// The group-directory view of this database.
    pub fn groups(&self) -> SqliteGroupDirectory {
        SqliteGroupDirectory {
            pool: self.pool.clone(),
        }
    }
}

/// [`MessageStore`] over the pooled database.
#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: Pool<SqliteConnectionManager>,
}

/// Lifecycle rank used for the SQL-side monotonicity guard.
fn rank(status: MessageStatus) -> i64 {
    match status {
        MessageStatus::Sending => 0,
        MessageStatus::Sent => 1,
        MessageStatus::Delivered => 2,
        MessageStatus::Seen => 3,
    }
}

fn status_from_str(s: &str) -> MessageStatus {
    match s {
        "sent" => MessageStatus::Sent,
        "delivered" => MessageStatus::Delivered,
        "seen" => MessageStatus::Seen,
        _ => MessageStatus::Sending,
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let status: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(StoredMessage {
        id: MessageId::new(row.get::<_, String>(0)?),
        sender: UserId::new(row.get::<_, String>(1)?),
        chat: ChatId::new(row.get::<_, String>(2)?),
        body: row.get(3)?,
        reply_to: row.get::<_, Option<String>>(4)?.map(MessageId::new),
        status: status_from_str(&status),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

const MESSAGE_COLUMNS: &str = "id, sender, chat, body, reply_to, status, created_at";

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn persist(&self, message: &StoredMessage) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        // Client-generated ids: a duplicate send keeps the first write.
        let _ = conn.execute(
            "INSERT INTO messages (id, sender, chat, body, reply_to, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO NOTHING",
            params![
                message.id.as_str(),
                message.sender.as_str(),
                message.chat.as_str(),
                message.body,
                message.reply_to.as_ref().map(MessageId::as_str),
                message.status.as_str(),
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: &MessageId,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let _ = conn.execute(
            "UPDATE messages SET status = ?2
             WHERE id = ?1
               AND (CASE status
                    WHEN 'sending' THEN 0
                    WHEN 'sent' THEN 1
                    WHEN 'delivered' THEN 2
                    ELSE 3 END) < ?3",
            params![id.as_str(), status.as_str(), rank(status)],
        )?;
        Ok(())
    }

    async fn conversation(
        &self,
        user: &UserId,
        peer: &ChatId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (sender = ?1 AND chat = ?2) OR (sender = ?2 AND chat = ?1)
             ORDER BY created_at ASC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            params![user.as_str(), peer.as_str(), i64::from(limit), i64::from(offset)],
            row_to_message,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn group_history(
        &self,
        group: &GroupId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE chat = ?1
             ORDER BY created_at ASC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(
            params![group.as_str(), i64::from(limit), i64::from(offset)],
            row_to_message,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// [`GroupDirectory`] over the pooled database.
#[derive(Clone)]
pub struct SqliteGroupDirectory {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteGroupDirectory {
    /// Seed a group with its member set. Group management proper lives
    /// outside the fanout core; this exists for provisioning and tests.
    pub fn insert_group(
        &self,
        id: &GroupId,
        name: &str,
        members: &[UserId],
        created_by: Option<&UserId>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let _ = tx.execute(
            "INSERT INTO groups (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![
                id.as_str(),
                name,
                created_by.map(UserId::as_str),
                Utc::now().to_rfc3339(),
            ],
        )?;
        let _ = tx.execute(
            "DELETE FROM group_members WHERE group_id = ?1",
            params![id.as_str()],
        )?;
        for member in members {
            let _ = tx.execute(
                "INSERT INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                params![id.as_str(), member.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn fetch_group(&self, id: &GroupId) -> Result<Option<GroupRecord>, StoreError> {
        let conn = self.pool.get()?;
        let name: Option<String> = conn
            .query_row(
                "SELECT name FROM groups WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(name) = name else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY user_id")?;
        let members = stmt
            .query_map(params![id.as_str()], |row| {
                row.get::<_, String>(0).map(UserId::new)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some(GroupRecord { name, members }))
    }
}

#[async_trait]
impl GroupDirectory for SqliteGroupDirectory {
    async fn get_group(&self, id: &GroupId) -> Result<Option<GroupRecord>, DirectoryError> {
        self.fetch_group(id)
            .map_err(|e| DirectoryError::Lookup(e.to_string()))
    }
}
