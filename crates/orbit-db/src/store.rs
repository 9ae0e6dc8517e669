use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use orbit_types::models::{Chat, Message, User, UserWithChats};

use crate::Database;
use crate::models::{ChatRow, MessageRow};

pub struct NewChat<'a> {
    pub name: &'a str,
    pub public: bool,
    pub user_id: Uuid,
    pub creator: &'a str,
}

pub struct NewMessage<'a> {
    pub chat_id: Uuid,
    pub user_id: Option<Uuid>,
    pub sender: &'a str,
    pub content: &'a str,
    pub from_client: bool,
}

/// Persistence seam for users, chats and messages.
///
/// Services receive this as `Arc<dyn ChatStore>`; `Database` is the SQLite
/// implementation. Chats returned by `get_chat_with_messages`, the listing
/// calls and `get_user_with_chats` carry their messages ordered by
/// `created_at` ascending; every other chat comes back with `messages` empty.
pub trait ChatStore: Send + Sync {
    // -- Users --
    /// `None` when the username is already taken.
    fn create_user(&self, username: &str, password_hash: &str) -> Result<Option<User>>;
    fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    /// The user and their stored password hash.
    fn get_credentials(&self, username: &str) -> Result<Option<(User, String)>>;
    fn get_user_with_chats(&self, id: Uuid) -> Result<Option<UserWithChats>>;
    fn delete_user(&self, id: Uuid) -> Result<bool>;

    // -- Chats --
    fn create_chat(&self, chat: NewChat<'_>) -> Result<Chat>;
    fn get_chat(&self, id: Uuid) -> Result<Option<Chat>>;
    fn get_chat_with_messages(&self, id: Uuid) -> Result<Option<Chat>>;
    fn list_chats_for_user(&self, user_id: Uuid) -> Result<Vec<Chat>>;
    /// Public chats, most recently updated first.
    fn list_public_chats(&self) -> Result<Vec<Chat>>;
    fn update_chat(&self, id: Uuid, name: &str, public: bool) -> Result<Option<Chat>>;
    fn delete_chat(&self, id: Uuid) -> Result<bool>;

    // -- Messages --
    fn get_message(&self, id: &str) -> Result<Option<Message>>;
    fn insert_message(&self, message: NewMessage<'_>) -> Result<Message>;
    fn update_message_content(&self, id: &str, content: &str) -> Result<Message>;
    /// Delete every message in the chat with `created_at >= from`. Returns the count.
    fn delete_messages_from(&self, chat_id: Uuid, from: DateTime<Utc>) -> Result<usize>;

    /// Release the underlying resources. Later calls fail.
    fn close(&self) -> Result<()>;
}

impl ChatStore for Database {
    fn create_user(&self, username: &str, password_hash: &str) -> Result<Option<User>> {
        let id = Uuid::new_v4().to_string();
        self.insert_user(&id, username, password_hash)?
            .map(|row| row.into_model())
            .transpose()
    }

    fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.get_user_by_id(&id.to_string())?
            .map(|row| row.into_model())
            .transpose()
    }

    fn get_credentials(&self, username: &str) -> Result<Option<(User, String)>> {
        let Some(mut row) = self.get_user_by_username(username)? else {
            return Ok(None);
        };
        let password = std::mem::take(&mut row.password);
        Ok(Some((row.into_model()?, password)))
    }

    fn get_user_with_chats(&self, id: Uuid) -> Result<Option<UserWithChats>> {
        let Some(user) = self.get_user(id)? else {
            return Ok(None);
        };
        let chats = self.list_chats_for_user(id)?;
        Ok(Some(UserWithChats { user, chats }))
    }

    fn delete_user(&self, id: Uuid) -> Result<bool> {
        self.remove_user(&id.to_string())
    }

    fn create_chat(&self, chat: NewChat<'_>) -> Result<Chat> {
        let id = Uuid::new_v4().to_string();
        self.insert_chat(
            &id,
            chat.name,
            chat.public,
            &chat.user_id.to_string(),
            chat.creator,
        )?
        .into_model()
    }

    fn get_chat(&self, id: Uuid) -> Result<Option<Chat>> {
        self.get_chat_row(&id.to_string())?
            .map(|row| row.into_model())
            .transpose()
    }

    fn get_chat_with_messages(&self, id: Uuid) -> Result<Option<Chat>> {
        self.get_chat_rows(&id.to_string())?
            .map(populate)
            .transpose()
    }

    fn list_chats_for_user(&self, user_id: Uuid) -> Result<Vec<Chat>> {
        self.get_chat_rows_for_user(&user_id.to_string())?
            .into_iter()
            .map(populate)
            .collect()
    }

    fn list_public_chats(&self) -> Result<Vec<Chat>> {
        self.get_public_chat_rows()?
            .into_iter()
            .map(populate)
            .collect()
    }

    fn update_chat(&self, id: Uuid, name: &str, public: bool) -> Result<Option<Chat>> {
        self.update_chat_row(&id.to_string(), name, public)?
            .map(|row| row.into_model())
            .transpose()
    }

    fn delete_chat(&self, id: Uuid) -> Result<bool> {
        self.remove_chat(&id.to_string())
    }

    fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.get_message_row(id)?
            .map(|row| row.into_model())
            .transpose()
    }

    fn insert_message(&self, message: NewMessage<'_>) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        let user_id = message.user_id.map(|u| u.to_string());
        self.append_message(
            &id,
            &message.chat_id.to_string(),
            user_id.as_deref(),
            message.sender,
            message.content,
            message.from_client,
        )?
        .into_model()
    }

    fn update_message_content(&self, id: &str, content: &str) -> Result<Message> {
        self.set_message_content(id, content)?
            .ok_or_else(|| anyhow!("message {} not found", id))?
            .into_model()
    }

    fn delete_messages_from(&self, chat_id: Uuid, from: DateTime<Utc>) -> Result<usize> {
        self.remove_messages_from(&chat_id.to_string(), from)
    }

    fn close(&self) -> Result<()> {
        Database::close(self)
    }
}

fn populate((chat, messages): (ChatRow, Vec<MessageRow>)) -> Result<Chat> {
    let mut chat = chat.into_model()?;
    chat.messages = messages
        .into_iter()
        .map(MessageRow::into_model)
        .collect::<Result<_>>()?;
    Ok(chat)
}
