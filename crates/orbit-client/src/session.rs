use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use orbit_types::events::SocketEvent;
use orbit_types::models::{Chat, Message, OPTIMISTIC_ID_PREFIX};

use crate::api::ChatApi;
use crate::error::ClientError;

/// Tokens streamed so far for one placeholder message.
#[derive(Debug, Clone, PartialEq)]
pub struct AwaitingMessage {
    pub id: String,
    pub content: String,
}

/// A user-visible error, the equivalent of a toast.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The server accepted the request and its chat replaced the local one.
    Sent,
    /// Nothing was done: empty prompt, unknown target, or a request in flight.
    Ignored,
}

/// Client-side state of one open chat.
///
/// Edits are applied optimistically and replaced by the server's chat once
/// the request resolves; a failed request restores the exact prior state.
/// Token events from the gateway are overlaid on top while a reply streams.
/// Methods take `&self` so events can be applied while a request is out.
pub struct ChatSession<A> {
    api: A,
    user_id: Uuid,
    username: String,
    state: Mutex<SessionState>,
}

struct SessionState {
    chat: Chat,
    request_in_flight: bool,
    awaiting_message: Option<AwaitingMessage>,
    notices: Vec<Notice>,
}

impl SessionState {
    /// Appends the optimistic message and returns the state to restore on failure.
    fn splice(&mut self, kept: Vec<Message>, optimistic: Message) -> Chat {
        let mut spliced = self.chat.clone();
        spliced.messages = kept;
        spliced.messages.push(optimistic);
        self.request_in_flight = true;
        std::mem::replace(&mut self.chat, spliced)
    }
}

impl<A: ChatApi> ChatSession<A> {
    pub fn new(api: A, user_id: Uuid, username: impl Into<String>, chat: Chat) -> Self {
        Self {
            api,
            user_id,
            username: username.into(),
            state: Mutex::new(SessionState {
                awaiting_message: pending_stream(&chat),
                chat,
                request_in_flight: false,
                notices: Vec::new(),
            }),
        }
    }

    /// Replace the local chat, e.g. after a page reload.
    pub fn load(&self, chat: Chat) {
        let mut state = self.state();
        state.awaiting_message = pending_stream(&chat);
        state.chat = chat;
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn chat(&self) -> Chat {
        self.state().chat.clone()
    }

    /// True while this session's own send or regenerate is out. A streamed
    /// reply from elsewhere (another tab, a reloaded placeholder) only
    /// affects rendering.
    pub fn awaiting_response(&self) -> bool {
        self.state().request_in_flight
    }

    pub fn awaiting_message(&self) -> Option<AwaitingMessage> {
        self.state().awaiting_message.clone()
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.state().notices)
    }

    /// What to render: the chat's messages in order, with any streamed reply
    /// overlaid on its placeholder or appended after the last message.
    pub fn visible_messages(&self) -> Vec<Message> {
        let state = self.state();
        let mut messages = state.chat.sorted_messages();

        if let Some(awaiting) = &state.awaiting_message {
            match messages.iter().position(|m| m.id == awaiting.id) {
                Some(i) => messages[i].content = awaiting.content.clone(),
                None => {
                    let at = messages
                        .last()
                        .map_or(state.chat.updated_at, |m| m.created_at);
                    messages.push(Message {
                        id: awaiting.id.clone(),
                        chat_id: state.chat.id,
                        user_id: None,
                        sender: String::new(),
                        content: awaiting.content.clone(),
                        from_client: false,
                        created_at: at,
                        updated_at: at,
                    });
                }
            }
        }

        messages
    }

    pub async fn send_message(&self, prompt: &str) -> Result<Outcome, ClientError> {
        let (chat_id, snapshot) = {
            let mut state = self.state();
            if prompt.is_empty() || state.request_in_flight {
                return Ok(Outcome::Ignored);
            }
            let optimistic = self.optimistic_message(&state.chat, prompt, None);
            let kept = state.chat.messages.clone();
            (state.chat.id, state.splice(kept, optimistic))
        };

        let result = self.api.send_message(chat_id, prompt).await;
        self.settle(result, snapshot, "Could not send message")
    }

    /// Edit an earlier client turn: locally everything from the target on is
    /// dropped, mirroring the server's truncation.
    pub async fn regenerate(&self, message_id: &str, prompt: &str) -> Result<Outcome, ClientError> {
        let (chat_id, snapshot) = {
            let mut state = self.state();
            if prompt.is_empty() || state.request_in_flight {
                return Ok(Outcome::Ignored);
            }
            let Some(target) = state.chat.messages.iter().find(|m| m.id == message_id) else {
                debug!("regenerate target {} not in chat", message_id);
                return Ok(Outcome::Ignored);
            };
            let cutoff = target.created_at;
            let kept: Vec<Message> = state
                .chat
                .messages
                .iter()
                .filter(|m| m.created_at < cutoff)
                .cloned()
                .collect();
            let optimistic = self.optimistic_message(&state.chat, prompt, Some(message_id));
            (state.chat.id, state.splice(kept, optimistic))
        };

        let result = self.api.regenerate_prompt(chat_id, message_id, prompt).await;
        self.settle(result, snapshot, "Could not regenerate prompt")
    }

    /// Apply a gateway event. Returns whether it changed anything.
    pub fn apply_event(&self, event: &SocketEvent) -> bool {
        let mut guard = self.state();
        let state = &mut *guard;
        match event {
            SocketEvent::UpdateMessage(delta) => {
                if delta.chat_id != state.chat.id {
                    return false;
                }
                // Late tokens for a reply the server already finalized.
                if state
                    .chat
                    .messages
                    .iter()
                    .any(|m| m.id == delta.id && !m.is_pending_placeholder())
                {
                    return false;
                }
                match &mut state.awaiting_message {
                    Some(awaiting) if awaiting.id == delta.id => {
                        awaiting.content.push_str(&delta.content)
                    }
                    slot => {
                        *slot = Some(AwaitingMessage {
                            id: delta.id.clone(),
                            content: delta.content.clone(),
                        })
                    }
                }
                true
            }
            SocketEvent::FinishMessage(delta) => {
                if delta.chat_id != state.chat.id {
                    return false;
                }
                let finishes_awaiting = state
                    .awaiting_message
                    .as_ref()
                    .is_some_and(|a| a.id == delta.id);
                match state.chat.messages.iter_mut().find(|m| m.id == delta.id) {
                    Some(placeholder) => {
                        if placeholder.is_pending_placeholder() {
                            placeholder.content = delta.content.clone();
                        }
                        if finishes_awaiting {
                            state.awaiting_message = None;
                        }
                    }
                    // The response is still on its way; show the final text until it lands.
                    None if state.request_in_flight => {
                        state.awaiting_message = Some(AwaitingMessage {
                            id: delta.id.clone(),
                            content: delta.content.clone(),
                        });
                    }
                    None => {
                        if finishes_awaiting {
                            state.awaiting_message = None;
                        }
                    }
                }
                true
            }
            SocketEvent::Ready { .. } => false,
        }
    }

    fn settle(
        &self,
        result: Result<Chat, ClientError>,
        snapshot: Chat,
        title: &str,
    ) -> Result<Outcome, ClientError> {
        let mut state = self.state();
        state.request_in_flight = false;
        state.awaiting_message = None;
        match result {
            Ok(chat) => {
                state.chat = chat;
                Ok(Outcome::Sent)
            }
            Err(e) => {
                warn!("{}: {}", title, e);
                state.chat = snapshot;
                state.notices.push(Notice {
                    title: title.to_string(),
                    description: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// A stand-in for the client turn, sorted after everything already shown.
    /// `regenerating` names the message being replaced, if any.
    fn optimistic_message(&self, chat: &Chat, prompt: &str, regenerating: Option<&str>) -> Message {
        let now = Utc::now();
        let created_at = chat
            .messages
            .iter()
            .map(|m| m.created_at)
            .max()
            .filter(|last| *last >= now)
            .map_or(now, |last| last + Duration::microseconds(1));
        let kind = match regenerating {
            Some(target) => format!("regen-message-{}", target),
            None => "message".to_string(),
        };
        Message {
            id: format!(
                "{}{}-{}-{}",
                OPTIMISTIC_ID_PREFIX,
                self.user_id,
                kind,
                now.timestamp_millis()
            ),
            chat_id: chat.id,
            user_id: Some(self.user_id),
            sender: self.username.clone(),
            content: prompt.to_string(),
            from_client: true,
            created_at,
            updated_at: created_at,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A trailing empty model message means a reply may still be generating;
/// its tokens are overlaid if they arrive. An orphaned placeholder whose
/// generation died never gets any, and blocks nothing.
fn pending_stream(chat: &Chat) -> Option<AwaitingMessage> {
    chat.pending_placeholder().map(|m| AwaitingMessage {
        id: m.id.clone(),
        content: String::new(),
    })
}
