//! Persistence for users, customizations, and newsletters.
//!
//! Row-level operations only; the pipeline is the sole writer. "Not found"
//! is its own error so callers can tell a well-formed-but-unknown reply
//! token apart from a broken store.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

use crate::routing::normalize_email;

#[derive(Debug)]
pub struct PersonalizationStore {
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub prompt: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CustomizationRecord {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewsletterRecord {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate signup: {0} is already registered")]
    DuplicateEmail(String),
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
}

impl PersonalizationStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    pub fn create_user(&self, email: &str, prompt: &str) -> Result<UserRecord, StoreError> {
        let email =
            normalize_email(email).ok_or_else(|| StoreError::InvalidEmail(email.to_string()))?;
        let conn = self.open()?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let inserted = conn.execute(
            "INSERT INTO users (id, email, prompt, is_active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![id.as_str(), email.as_str(), prompt, format_datetime(now)],
        );
        match inserted {
            Ok(_) => Ok(UserRecord {
                id,
                email,
                prompt: prompt.to_string(),
                is_active: true,
                created_at: now,
            }),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateEmail(email))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn user_by_id(&self, id: &str) -> Result<UserRecord, StoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, email, prompt, is_active, created_at FROM users WHERE id = ?1",
                params![id],
                user_row,
            )
            .optional()?;
        match row {
            Some(raw) => user_from_raw(raw),
            None => Err(StoreError::NotFound(format!("user {id}"))),
        }
    }

    pub fn user_by_email(&self, email: &str) -> Result<UserRecord, StoreError> {
        let email =
            normalize_email(email).ok_or_else(|| StoreError::InvalidEmail(email.to_string()))?;
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, email, prompt, is_active, created_at FROM users WHERE email = ?1",
                params![email.as_str()],
                user_row,
            )
            .optional()?;
        match row {
            Some(raw) => user_from_raw(raw),
            None => Err(StoreError::NotFound(format!("user {email}"))),
        }
    }

    pub fn list_active_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, email, prompt, is_active, created_at FROM users
             WHERE is_active = 1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], user_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(user_from_raw(row?)?);
        }
        Ok(users)
    }

    pub fn update_prompt(&self, user_id: &str, prompt: &str) -> Result<(), StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE users SET prompt = ?1 WHERE id = ?2",
            params![prompt, user_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    pub fn set_active(&self, user_id: &str, active: bool) -> Result<(), StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active as i64, user_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    /// Append one accepted-feedback audit row. Rows are never mutated after
    /// creation; a duplicate append from a retried delivery is harmless.
    pub fn append_customization(
        &self,
        user_id: &str,
        kind: &str,
        content: &str,
    ) -> Result<CustomizationRecord, StoreError> {
        let conn = self.open()?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO customizations (id, user_id, kind, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.as_str(), user_id, kind, content, format_datetime(now)],
        )?;
        Ok(CustomizationRecord {
            id,
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }

    pub fn customizations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<CustomizationRecord>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, content, created_at FROM customizations
             WHERE user_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut customizations = Vec::new();
        for row in rows {
            let (id, user_id, kind, content, created_at) = row?;
            customizations.push(CustomizationRecord {
                id,
                user_id,
                kind,
                content,
                created_at: parse_datetime(&created_at)?,
            });
        }
        Ok(customizations)
    }

    pub fn insert_newsletter(
        &self,
        user_id: &str,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<NewsletterRecord, StoreError> {
        let conn = self.open()?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO newsletters (id, user_id, content, sent_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id.as_str(), user_id, content, format_datetime(sent_at)],
        )?;
        Ok(NewsletterRecord {
            id,
            user_id: user_id.to_string(),
            content: content.to_string(),
            sent_at,
        })
    }

    /// Whether a newsletter row exists for this user on the given UTC day.
    /// Drives the batch run's retried-trigger idempotency.
    pub fn newsletter_exists_on(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let prefix = format!("{}T%", date.format("%Y-%m-%d"));
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM newsletters WHERE user_id = ?1 AND sent_at LIKE ?2",
            params![user_id, prefix.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn newsletters_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<NewsletterRecord>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, content, sent_at FROM newsletters
             WHERE user_id = ?1 ORDER BY sent_at",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut newsletters = Vec::new();
        for row in rows {
            let (id, user_id, content, sent_at) = row?;
            newsletters.push(NewsletterRecord {
                id,
                user_id,
                content,
                sent_at: parse_datetime(&sent_at)?,
            });
        }
        Ok(newsletters)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(STORE_SCHEMA)?;
        Ok(conn)
    }
}

type RawUserRow = (String, String, String, i64, String);

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUserRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn user_from_raw(raw: RawUserRow) -> Result<UserRecord, StoreError> {
    let (id, email, prompt, is_active, created_at) = raw;
    Ok(UserRecord {
        id,
        email,
        prompt,
        is_active: is_active != 0,
        created_at: parse_datetime(&created_at)?,
    })
}

const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    prompt TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS customizations (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS newsletters (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    content TEXT NOT NULL,
    sent_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_customizations_user ON customizations(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_newsletters_user ON newsletters(user_id, sent_at);
"#;

fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests;
