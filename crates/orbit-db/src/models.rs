//! Database row types. These map directly to SQLite rows and stay distinct
//! from the orbit-types API models; `into_model` does the parsing.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use orbit_types::models::{Chat, Message, User};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ChatRow {
    pub id: String,
    pub name: String,
    pub public: bool,
    pub user_id: String,
    pub creator: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub user_id: Option<String>,
    pub sender: String,
    pub content: String,
    pub from_client: bool,
    pub seq: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    pub fn into_model(self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.id)?,
            username: self.username,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

impl ChatRow {
    /// The chat without its messages.
    pub fn into_model(self) -> Result<Chat> {
        Ok(Chat {
            id: parse_id(&self.id)?,
            name: self.name,
            public: self.public,
            user_id: parse_id(&self.user_id)?,
            creator: self.creator,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            messages: Vec::new(),
        })
    }
}

impl MessageRow {
    pub fn into_model(self) -> Result<Message> {
        Ok(Message {
            chat_id: parse_id(&self.chat_id)?,
            user_id: self.user_id.as_deref().map(parse_id).transpose()?,
            created_at: parse_timestamp(&self.created_at)
                .with_context(|| format!("message {}", self.id))?,
            updated_at: parse_timestamp(&self.updated_at)
                .with_context(|| format!("message {}", self.id))?,
            id: self.id,
            sender: self.sender,
            content: self.content,
            from_client: self.from_client,
        })
    }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings with microsecond
/// precision, so string order in SQL equals chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("corrupt timestamp '{}'", raw))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt id '{}'", raw))
}
