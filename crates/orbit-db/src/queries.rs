use crate::Database;
use crate::models::{ChatRow, MessageRow, UserRow, format_timestamp, parse_timestamp};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, username, password, created_at, updated_at";
const CHAT_COLUMNS: &str = "id, name, public, user_id, creator, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, chat_id, user_id, sender, content, from_client, seq, created_at, updated_at";

impl Database {
    // -- Users --

    /// Insert a user. `None` when the username is already taken.
    pub fn insert_user(&self, id: &str, username: &str, password_hash: &str) -> Result<Option<UserRow>> {
        let now = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, password, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                (id, username, password_hash, &now),
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
            let row = query_user(conn, "id", id)?
                .ok_or_else(|| anyhow!("user {} vanished after insert", id))?;
            Ok(Some(row))
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Delete a user after all of their chats and those chats' messages.
    pub fn remove_user(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM messages WHERE chat_id IN (SELECT id FROM chats WHERE user_id = ?1)",
                [id],
            )?;
            tx.execute("DELETE FROM chats WHERE user_id = ?1", [id])?;
            let removed = tx.execute("DELETE FROM users WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    // -- Chats --

    pub fn insert_chat(
        &self,
        id: &str,
        name: &str,
        public: bool,
        user_id: &str,
        creator: &str,
    ) -> Result<ChatRow> {
        let now = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (id, name, public, user_id, creator, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![id, name, public, user_id, creator, &now],
            )?;
            query_chat(conn, id)?.ok_or_else(|| anyhow!("chat {} vanished after insert", id))
        })
    }

    pub fn get_chat_row(&self, id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| query_chat(conn, id))
    }

    /// A chat row plus its messages in one lock acquisition, so the pair is consistent.
    pub fn get_chat_rows(&self, id: &str) -> Result<Option<(ChatRow, Vec<MessageRow>)>> {
        self.with_conn(|conn| {
            let Some(chat) = query_chat(conn, id)? else {
                return Ok(None);
            };
            let messages = query_messages(conn, id)?;
            Ok(Some((chat, messages)))
        })
    }

    pub fn get_chat_rows_for_user(&self, user_id: &str) -> Result<Vec<(ChatRow, Vec<MessageRow>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHAT_COLUMNS} FROM chats WHERE user_id = ?1 ORDER BY created_at ASC"
            ))?;
            let chats = stmt
                .query_map([user_id], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            with_messages(conn, chats)
        })
    }

    pub fn get_public_chat_rows(&self) -> Result<Vec<(ChatRow, Vec<MessageRow>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHAT_COLUMNS} FROM chats WHERE public = 1 ORDER BY updated_at DESC"
            ))?;
            let chats = stmt
                .query_map([], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            with_messages(conn, chats)
        })
    }

    pub fn update_chat_row(&self, id: &str, name: &str, public: bool) -> Result<Option<ChatRow>> {
        let now = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE chats SET name = ?2, public = ?3, updated_at = ?4 WHERE id = ?1",
                rusqlite::params![id, name, public, &now],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_chat(conn, id)
        })
    }

    /// Delete a chat, its messages first.
    pub fn remove_chat(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM messages WHERE chat_id = ?1", [id])?;
            let removed = tx.execute("DELETE FROM chats WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    // -- Messages --

    /// Insert a message at the end of its chat.
    ///
    /// Assigns the next per-chat sequence number and a `created_at` strictly
    /// greater than every live message in the chat, even if the wall clock
    /// stepped backwards or two inserts land in the same microsecond.
    pub fn append_message(
        &self,
        id: &str,
        chat_id: &str,
        user_id: Option<&str>,
        sender: &str,
        content: &str,
        from_client: bool,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let seq: i64 = tx.query_row(
                "UPDATE chats SET message_seq = message_seq + 1 WHERE id = ?1 RETURNING message_seq",
                [chat_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| anyhow!("chat {} not found", chat_id))?;

            let last: Option<String> = tx
                .query_row(
                    "SELECT MAX(created_at) FROM messages WHERE chat_id = ?1",
                    [chat_id],
                    |row| row.get(0),
                )?;
            let last = last.as_deref().map(parse_timestamp).transpose()?;
            // Truncate first: stored precision is microseconds.
            let created_at = next_timestamp(Utc::now().trunc_subsecs(6), last);
            let created = format_timestamp(created_at);

            tx.execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)"
                ),
                rusqlite::params![id, chat_id, user_id, sender, content, from_client, seq, &created],
            )?;
            tx.execute(
                "UPDATE chats SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![chat_id, &created],
            )?;

            let row = query_message(&tx, id)?
                .ok_or_else(|| anyhow!("message {} vanished after insert", id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn get_message_row(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    pub fn set_message_content(&self, id: &str, content: &str) -> Result<Option<MessageRow>> {
        let now = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET content = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, content, &now],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_message(conn, id)
        })
    }

    /// Delete every message of the chat created at or after `from`.
    pub fn remove_messages_from(&self, chat_id: &str, from: DateTime<Utc>) -> Result<usize> {
        let from = format_timestamp(from);
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM messages WHERE chat_id = ?1 AND created_at >= ?2",
                rusqlite::params![chat_id, &from],
            )?;
            Ok(removed)
        })
    }
}

/// `now`, unless that would not sort strictly after `last`.
fn next_timestamp(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}

fn with_messages(conn: &Connection, chats: Vec<ChatRow>) -> Result<Vec<(ChatRow, Vec<MessageRow>)>> {
    chats
        .into_iter()
        .map(|chat| {
            let messages = query_messages(conn, &chat.id)?;
            Ok((chat, messages))
        })
        .collect()
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_chat(conn: &Connection, id: &str) -> Result<Option<ChatRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"))?;
    let row = stmt.query_row([id], chat_from_row).optional()?;
    Ok(row)
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        name: row.get(1)?,
        public: row.get(2)?,
        user_id: row.get(3)?,
        creator: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"))?;
    let row = stmt.query_row([id], message_from_row).optional()?;
    Ok(row)
}

fn query_messages(conn: &Connection, chat_id: &str) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY created_at ASC, seq ASC"
    ))?;

    let rows = stmt
        .query_map([chat_id], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        user_id: row.get(2)?,
        sender: row.get(3)?,
        content: row.get(4)?,
        from_client: row.get(5)?,
        seq: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
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
