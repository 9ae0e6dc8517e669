use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user together with every chat they own, as returned by the chat CRUD routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWithChats {
    #[serde(flatten)]
    pub user: User,
    pub chats: Vec<Chat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub name: String,
    pub public: bool,
    pub user_id: Uuid,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Chat {
    /// Messages sorted ascending by `created_at`. The sort is stable, so equal
    /// timestamps keep the order the store returned them in.
    pub fn sorted_messages(&self) -> Vec<Message> {
        let mut messages = self.messages.clone();
        messages.sort_by_key(|m| m.created_at);
        messages
    }

    /// The trailing empty model message left behind by a generation that has
    /// not finished (or never will, if the server died mid-call).
    pub fn pending_placeholder(&self) -> Option<&Message> {
        self.messages
            .iter()
            .max_by_key(|m| m.created_at)
            .filter(|m| m.is_pending_placeholder())
    }
}

/// A single chat turn.
///
/// `id` is a string rather than a `Uuid` because optimistic client messages
/// carry synthesized `temp-client-...` ids until the server replaces them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: Uuid,
    pub user_id: Option<Uuid>,
    pub sender: String,
    pub content: String,
    pub from_client: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn is_pending_placeholder(&self) -> bool {
        !self.from_client && self.content.is_empty()
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.starts_with(OPTIMISTIC_ID_PREFIX)
    }
}

/// Prefix of ids the client synthesizes for messages the server has not confirmed.
pub const OPTIMISTIC_ID_PREFIX: &str = "temp-client-";
