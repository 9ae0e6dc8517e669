use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Chat, UserWithChats};

// -- JWT Claims --

/// JWT claims shared across orbit-api (REST middleware) and orbit-gateway
/// (WebSocket authentication).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserWithChats,
    pub token: String,
}

// -- Chats --

/// Chat visibility as sent by clients: either the `"public"` / `"private"`
/// labels or a plain boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Visibility {
    Flag(bool),
    Label(String),
}

impl Visibility {
    pub fn public() -> Self {
        Self::Label("public".into())
    }

    pub fn private() -> Self {
        Self::Label("private".into())
    }

    /// `None` when the label is not one of the two known values.
    pub fn is_public(&self) -> Option<bool> {
        match self {
            Self::Flag(flag) => Some(*flag),
            Self::Label(label) => match label.as_str() {
                "public" => Some(true),
                "private" => Some(false),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateChatRequest {
    pub chat_name: String,
    pub chat_public: Option<Visibility>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct EditChatRequest {
    pub chat_id: String,
    pub chat_name: String,
    pub chat_public: Option<Visibility>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteChatRequest {
    pub chat_id: String,
}

/// `?id=` query for the single-chat GET routes.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatQuery {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserChatResponse {
    pub user: UserWithChats,
    pub chat: Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub chat: Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicChatsResponse {
    pub chats: Vec<Chat>,
}

// -- Messages --

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    pub chat_id: String,
    pub prompt: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct RegeneratePromptRequest {
    pub chat_id: String,
    pub message_id: String,
    pub prompt: String,
}

// -- Errors --

/// JSON body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub message: String,
}

// -- Generation backend --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Body POSTed to the generation backend. Field names are the backend's, not ours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePromptRequest {
    pub prompt: String,
    pub api_key: String,
    pub history: Vec<HistoryEntry>,
    pub message_id: String,
    pub chat_id: String,
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePromptResponse {
    pub message: String,
}
