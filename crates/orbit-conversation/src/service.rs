use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use orbit_db::{ChatStore, NewMessage};
use orbit_gateway::Dispatcher;
use orbit_types::events::{MessageDelta, SocketEvent};
use orbit_types::models::{Chat, Message, User};

use crate::generation::{GenerationError, GenerationRequest, Generator, TokenSink};
use crate::history::{DEFAULT_HISTORY_WINDOW, generation_window};
use crate::locks::ChatLocks;

/// Stored in place of the model's reply when generation fails.
pub const APOLOGY: &str = "Sorry, something went wrong. Please try again.";

pub fn apology(reason: Option<&str>) -> String {
    match reason {
        Some(reason) if !reason.is_empty() => format!("{} Error: {}", APOLOGY, reason),
        _ => APOLOGY.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ServiceError {
    fn validation(msg: &str) -> Self {
        Self::Validation(msg.to_string())
    }

    fn not_found(msg: &str) -> Self {
        Self::NotFound(msg.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ConversationSettings {
    /// Sender name on model-authored messages.
    pub chatbot_name: String,
    pub history_window: usize,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            chatbot_name: "Orbit".to_string(),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

/// Server-side orchestrator for send-message and regenerate.
///
/// Persists the client turn and an empty placeholder, runs the generation
/// backend with tokens streamed to the user's gateway connections, then
/// finalizes the placeholder. Mutations of one chat are serialized through
/// [`ChatLocks`].
#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ChatStore>,
    generator: Arc<dyn Generator>,
    dispatcher: Dispatcher,
    locks: ChatLocks,
    settings: ConversationSettings,
}

impl ConversationService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        generator: Arc<dyn Generator>,
        dispatcher: Dispatcher,
        settings: ConversationSettings,
    ) -> Self {
        Self {
            store,
            generator,
            dispatcher,
            locks: ChatLocks::default(),
            settings,
        }
    }

    pub fn settings(&self) -> &ConversationSettings {
        &self.settings
    }

    /// Append a client turn to the chat and generate the model's reply.
    ///
    /// Backend failures do not fail the call: the reply then holds the apology.
    pub async fn send_message(
        &self,
        user_id: Uuid,
        chat_id: &str,
        prompt: &str,
    ) -> Result<Chat, ServiceError> {
        if chat_id.is_empty() {
            return Err(ServiceError::validation("Missing chat ID"));
        }
        if prompt.is_empty() {
            return Err(ServiceError::validation("Missing prompt"));
        }

        let chat_id = parse_chat_id(chat_id)?;
        let _guard = self.locks.lock(chat_id).await;
        let (user, chat) = self.load_owned_chat(user_id, chat_id).await?;

        self.exchange(&user, chat, prompt).await
    }

    /// Replace a client turn and everything after it with a new exchange.
    pub async fn regenerate(
        &self,
        user_id: Uuid,
        chat_id: &str,
        message_id: &str,
        prompt: &str,
    ) -> Result<Chat, ServiceError> {
        if chat_id.is_empty() {
            return Err(ServiceError::validation("Missing chat ID"));
        }
        if message_id.is_empty() {
            return Err(ServiceError::validation("Missing message ID"));
        }
        if prompt.is_empty() {
            return Err(ServiceError::validation("Missing prompt"));
        }

        let chat_id = parse_chat_id(chat_id)?;
        let _guard = self.locks.lock(chat_id).await;
        let (user, mut chat) = self.load_owned_chat(user_id, chat_id).await?;

        let target = {
            let store = self.store.clone();
            let message_id = message_id.to_string();
            blocking(move || store.get_message(&message_id)).await?
        };
        let target = match target {
            Some(m) if m.chat_id == chat.id => m,
            _ => {
                return Err(ServiceError::not_found(
                    "Message ID does not point to a message in chat",
                ));
            }
        };
        if !target.from_client {
            return Err(ServiceError::not_found(
                "Message ID does not point to a client-sent message",
            ));
        }

        let removed = {
            let store = self.store.clone();
            let from = target.created_at;
            blocking(move || store.delete_messages_from(chat_id, from)).await?
        };
        chat.messages.retain(|m| m.created_at < target.created_at);
        info!(
            "regenerating chat {} from message {} ({} messages removed)",
            chat_id, target.id, removed
        );

        self.exchange(&user, chat, prompt).await
    }

    /// Loads the user and their chat. A chat owned by someone else is
    /// reported as not found.
    async fn load_owned_chat(&self, user_id: Uuid, chat_id: Uuid) -> Result<(User, Chat), ServiceError> {
        let store = self.store.clone();
        let (user, chat) = blocking(move || {
            let user = store.get_user(user_id)?;
            let chat = store.get_chat_with_messages(chat_id)?;
            Ok((user, chat))
        })
        .await?;

        let user = user.ok_or_else(|| ServiceError::not_found("User not found"))?;
        let chat = chat.ok_or_else(|| ServiceError::not_found("Chat not found"))?;
        if chat.user_id != user.id {
            return Err(ServiceError::not_found("Chat ID does not belong to user"));
        }
        Ok((user, chat))
    }

    /// Persist the client turn and placeholder, generate, finalize.
    /// `chat.messages` is the surviving history; the result extends it by
    /// exactly the two new messages.
    async fn exchange(&self, user: &User, mut chat: Chat, prompt: &str) -> Result<Chat, ServiceError> {
        let history = generation_window(&chat.messages, self.settings.history_window);

        let (client_message, placeholder) = {
            let store = self.store.clone();
            let chat_id = chat.id;
            let user_id = user.id;
            let username = user.username.clone();
            let chatbot = self.settings.chatbot_name.clone();
            let prompt = prompt.to_string();
            blocking(move || {
                let client_message = store.insert_message(NewMessage {
                    chat_id,
                    user_id: Some(user_id),
                    sender: &username,
                    content: &prompt,
                    from_client: true,
                })?;
                let placeholder = store.insert_message(NewMessage {
                    chat_id,
                    user_id: None,
                    sender: &chatbot,
                    content: "",
                    from_client: false,
                })?;
                Ok((client_message, placeholder))
            })
            .await?
        };

        debug!(
            "chat {}: generating {} with {} history turns",
            chat.id,
            placeholder.id,
            history.len()
        );

        let request = GenerationRequest {
            prompt: prompt.to_string(),
            history,
            correlation_id: placeholder.id.clone(),
            chat_id: chat.id,
            user_id: user.id,
            username: user.username.clone(),
        };
        let tokens = TokenSink::new(self.dispatcher.clone(), user.id, chat.id, placeholder.id.clone());

        let content = match self.generator.generate(request, &tokens).await {
            Ok(text) => text,
            Err(e) => {
                log_generation_failure(&chat, &placeholder, &e);
                apology(e.reason().as_deref())
            }
        };

        let placeholder = {
            let store = self.store.clone();
            let id = placeholder.id.clone();
            let content = content.clone();
            blocking(move || store.update_message_content(&id, &content)).await?
        };

        self.dispatcher
            .notify(
                user.id,
                SocketEvent::FinishMessage(MessageDelta {
                    id: placeholder.id.clone(),
                    chat_id: chat.id,
                    content,
                }),
            )
            .await;

        chat.updated_at = placeholder.created_at;
        chat.messages.push(client_message);
        chat.messages.push(placeholder);
        Ok(chat)
    }
}

fn log_generation_failure(chat: &Chat, placeholder: &Message, e: &GenerationError) {
    match e {
        GenerationError::Unconfigured => {
            warn!("chat {}: no generation backend configured", chat.id)
        }
        _ => error!("chat {}: generation for {} failed: {}", chat.id, placeholder.id, e),
    }
}

fn parse_chat_id(chat_id: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(chat_id).map_err(|_| ServiceError::not_found("Chat not found"))
}

/// Run a store call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ServiceError::Store(anyhow::anyhow!("store task failed: {}", e))
        })?
        .map_err(ServiceError::Store)
}
