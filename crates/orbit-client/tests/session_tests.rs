use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use orbit_client::{ChatApi, ChatSession, ClientError, Outcome};
use orbit_types::events::{MessageDelta, SocketEvent};
use orbit_types::models::{Chat, Message};

/// Answers with scripted replies, optionally holding each call until released.
#[derive(Default)]
struct MockApi {
    replies: Mutex<VecDeque<Result<Chat, ClientError>>>,
    calls: Mutex<Vec<String>>,
    started: Arc<Notify>,
    release: Option<Arc<Notify>>,
}

impl MockApi {
    fn replying(reply: Result<Chat, ClientError>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([reply])),
            ..Default::default()
        }
    }

    fn held(mut self) -> (Self, Arc<Notify>, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        self.release = Some(release.clone());
        let started = self.started.clone();
        (self, started, release)
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn respond(&self, call: String) -> Result<Chat, ClientError> {
        self.calls.lock().unwrap().push(call);
        self.started.notify_one();
        if let Some(release) = &self.release {
            release.notified().await;
        }
        let reply = self.replies.lock().unwrap().pop_front();
        reply.unwrap_or_else(|| Err(failure("no reply scripted")))
    }
}

#[async_trait]
impl ChatApi for MockApi {
    async fn send_message(&self, _chat_id: Uuid, prompt: &str) -> Result<Chat, ClientError> {
        self.respond(format!("send {}", prompt)).await
    }

    async fn regenerate_prompt(
        &self,
        _chat_id: Uuid,
        message_id: &str,
        prompt: &str,
    ) -> Result<Chat, ClientError> {
        self.respond(format!("regenerate {} {}", message_id, prompt)).await
    }
}

fn failure(message: &str) -> ClientError {
    ClientError::Api {
        status: 500,
        message: message.into(),
    }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

fn chat_id() -> Uuid {
    Uuid::from_u128(7)
}

fn user_id() -> Uuid {
    Uuid::from_u128(1)
}

fn message(i: i64, from_client: bool, content: &str) -> Message {
    let at = base() + Duration::seconds(i);
    Message {
        id: format!("m{}", i),
        chat_id: chat_id(),
        user_id: from_client.then(user_id),
        sender: if from_client { "ada".into() } else { "Orbit".into() },
        content: content.into(),
        from_client,
        created_at: at,
        updated_at: at,
    }
}

fn chat(messages: Vec<Message>) -> Chat {
    Chat {
        id: chat_id(),
        name: "notes".into(),
        public: false,
        user_id: user_id(),
        creator: "ada".into(),
        created_at: base(),
        updated_at: messages.last().map_or(base(), |m| m.created_at),
        messages,
    }
}

fn session(api: MockApi, chat: Chat) -> ChatSession<MockApi> {
    ChatSession::new(api, user_id(), "ada", chat)
}

fn update(id: &str, content: &str) -> SocketEvent {
    SocketEvent::UpdateMessage(MessageDelta {
        id: id.into(),
        chat_id: chat_id(),
        content: content.into(),
    })
}

fn finish(id: &str, content: &str) -> SocketEvent {
    SocketEvent::FinishMessage(MessageDelta {
        id: id.into(),
        chat_id: chat_id(),
        content: content.into(),
    })
}

#[tokio::test]
async fn failed_send_restores_the_prior_list_exactly() {
    let original = chat(vec![message(0, true, "hi"), message(1, false, "hello")]);
    let session = session(MockApi::replying(Err(failure("boom"))), original.clone());

    let err = session.send_message("are you there?").await.unwrap_err();
    assert_eq!(err.to_string(), "boom");

    assert_eq!(session.chat(), original);
    assert_eq!(session.visible_messages(), original.messages);
    assert!(!session.awaiting_response());

    let notices = session.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "Could not send message");
    assert_eq!(notices[0].description, "boom");
    assert!(session.take_notices().is_empty());
}

#[tokio::test]
async fn successful_send_adopts_the_server_chat() {
    let original = chat(vec![message(0, true, "hi"), message(1, false, "hello")]);
    let confirmed = chat(vec![
        message(0, true, "hi"),
        message(1, false, "hello"),
        message(2, true, "more"),
        message(3, false, "sure"),
    ]);
    let api = MockApi::replying(Ok(confirmed.clone()));
    let session = session(api, original);

    assert_eq!(session.send_message("more").await.unwrap(), Outcome::Sent);
    assert_eq!(session.chat(), confirmed);
    assert!(session.visible_messages().iter().all(|m| !m.is_optimistic()));
    assert!(session.take_notices().is_empty());
}

#[tokio::test]
async fn in_flight_send_shows_the_optimistic_turn_and_streamed_tokens() {
    let original = chat(vec![message(0, true, "hi"), message(1, false, "hello")]);
    let confirmed = chat(vec![
        message(0, true, "hi"),
        message(1, false, "hello"),
        message(2, true, "tell me more"),
        message(3, false, "Sure thing"),
    ]);
    let (api, started, release) = MockApi::replying(Ok(confirmed.clone())).held();
    let session = Arc::new(session(api, original));

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.send_message("tell me more").await })
    };
    started.notified().await;

    let visible = session.visible_messages();
    assert_eq!(visible.len(), 3);
    let optimistic = &visible[2];
    assert!(optimistic.is_optimistic());
    assert!(optimistic.id.starts_with(&format!("temp-client-{}-", user_id())));
    assert!(optimistic.from_client);
    assert_eq!(optimistic.content, "tell me more");
    assert!(optimistic.created_at > visible[1].created_at);
    assert!(session.awaiting_response());

    // Gate: nothing else goes out while the first request is pending.
    assert_eq!(session.send_message("again").await.unwrap(), Outcome::Ignored);
    assert_eq!(session.regenerate("m0", "edit").await.unwrap(), Outcome::Ignored);

    assert!(session.apply_event(&update("m3", "Sure")));
    assert!(session.apply_event(&update("m3", " thing")));
    let visible = session.visible_messages();
    assert_eq!(visible.len(), 4);
    assert_eq!(visible[3].id, "m3");
    assert_eq!(visible[3].content, "Sure thing");
    assert!(!visible[3].from_client);

    release.notify_one();
    assert_eq!(task.await.unwrap().unwrap(), Outcome::Sent);
    assert_eq!(session.visible_messages(), confirmed.messages);
    assert!(session.awaiting_message().is_none());
    assert!(!session.awaiting_response());
    assert_eq!(session.api_calls(), vec!["send tell me more".to_string()]);

    // Tokens that arrive after the response cannot resurrect the overlay.
    assert!(!session.apply_event(&update("m3", " late")));
    assert_eq!(session.visible_messages(), confirmed.messages);
}

#[tokio::test]
async fn regenerate_splices_locally_and_rolls_back_on_failure() {
    let original = chat(vec![
        message(0, true, "one"),
        message(1, false, "reply one"),
        message(2, true, "two"),
        message(3, false, "reply two"),
    ]);
    let (api, started, release) = MockApi::replying(Err(failure("Chat not found"))).held();
    let session = Arc::new(session(api, original.clone()));

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.regenerate("m2", "two, edited").await })
    };
    started.notified().await;

    let visible = session.visible_messages();
    let ids: Vec<&str> = visible.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(&ids[..2], &["m0", "m1"]);
    assert_eq!(visible.len(), 3);
    assert!(visible[2].is_optimistic());
    assert_eq!(visible[2].content, "two, edited");

    release.notify_one();
    assert!(task.await.unwrap().is_err());

    assert_eq!(session.chat(), original);
    let notices = session.take_notices();
    assert_eq!(notices[0].title, "Could not regenerate prompt");
    assert_eq!(notices[0].description, "Chat not found");
}

#[tokio::test]
async fn invalid_invocations_are_ignored_without_a_request() {
    let original = chat(vec![message(0, true, "one")]);
    let session = session(MockApi::default(), original.clone());

    assert_eq!(session.send_message("").await.unwrap(), Outcome::Ignored);
    assert_eq!(session.regenerate("missing", "x").await.unwrap(), Outcome::Ignored);
    assert_eq!(session.regenerate("m0", "").await.unwrap(), Outcome::Ignored);

    assert!(session.api_calls().is_empty());
    assert_eq!(session.chat(), original);
}

#[tokio::test]
async fn reload_with_a_pending_placeholder_overlays_its_tokens() {
    let reloaded = chat(vec![
        message(0, true, "hi"),
        message(1, false, "hello"),
        message(2, true, "still there?"),
        message(3, false, ""),
    ]);
    let session = session(MockApi::default(), reloaded);

    assert!(!session.awaiting_response());
    assert_eq!(session.awaiting_message().unwrap().id, "m3");

    session.apply_event(&update("m3", "Yes, "));
    session.apply_event(&update("m3", "I am"));
    let visible = session.visible_messages();
    assert_eq!(visible.len(), 4);
    assert_eq!(visible[3].content, "Yes, I am");

    assert!(session.apply_event(&finish("m3", "Yes, I am.")));
    assert!(session.awaiting_message().is_none());
    assert_eq!(session.chat().messages[3].content, "Yes, I am.");
    assert_eq!(session.visible_messages()[3].content, "Yes, I am.");
}

#[tokio::test]
async fn orphaned_placeholder_does_not_block_new_requests() {
    let orphaned = chat(vec![message(0, true, "hi"), message(1, false, "")]);
    let resent = chat(vec![
        message(0, true, "hi"),
        message(1, false, ""),
        message(2, true, "retry"),
        message(3, false, "here now"),
    ]);
    let regenerated = chat(vec![message(4, true, "hi again"), message(5, false, "hello")]);
    let api = MockApi {
        replies: Mutex::new(VecDeque::from([Ok(resent.clone()), Ok(regenerated.clone())])),
        ..Default::default()
    };
    let session = session(api, orphaned);

    assert_eq!(session.send_message("retry").await.unwrap(), Outcome::Sent);
    assert_eq!(session.chat(), resent);
    assert!(session.awaiting_message().is_none());

    assert_eq!(session.regenerate("m0", "hi again").await.unwrap(), Outcome::Sent);
    assert_eq!(session.chat(), regenerated);
    assert_eq!(
        session.api_calls(),
        vec!["send retry".to_string(), "regenerate m0 hi again".to_string()]
    );
}

#[tokio::test]
async fn optimistic_ids_name_the_request_kind() {
    let original = chat(vec![message(0, true, "one"), message(1, false, "reply one")]);
    let sent = chat(vec![
        message(0, true, "one"),
        message(1, false, "reply one"),
        message(2, true, "two"),
        message(3, false, "reply two"),
    ]);
    let (api, started, release) = MockApi::replying(Ok(sent.clone())).held();
    api.replies.lock().unwrap().push_back(Ok(original.clone()));
    let session = Arc::new(session(api, original));

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.send_message("two").await })
    };
    started.notified().await;
    let id = session.visible_messages()[2].id.clone();
    let millis = id
        .strip_prefix(&format!("temp-client-{}-message-", user_id()))
        .unwrap_or_else(|| panic!("unexpected send id {}", id));
    assert!(millis.parse::<i64>().is_ok(), "{}", id);
    release.notify_one();
    assert_eq!(task.await.unwrap().unwrap(), Outcome::Sent);

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.regenerate("m2", "two, edited").await })
    };
    started.notified().await;
    let id = session.visible_messages()[2].id.clone();
    let millis = id
        .strip_prefix(&format!("temp-client-{}-regen-message-m2-", user_id()))
        .unwrap_or_else(|| panic!("unexpected regenerate id {}", id));
    assert!(millis.parse::<i64>().is_ok(), "{}", id);
    release.notify_one();
    assert_eq!(task.await.unwrap().unwrap(), Outcome::Sent);
}

#[tokio::test]
async fn events_for_other_chats_are_ignored() {
    let original = chat(vec![message(0, true, "hi")]);
    let session = session(MockApi::default(), original.clone());

    let foreign = SocketEvent::UpdateMessage(MessageDelta {
        id: "x".into(),
        chat_id: Uuid::from_u128(99),
        content: "nope".into(),
    });
    assert!(!session.apply_event(&foreign));
    assert!(!session.apply_event(&SocketEvent::Ready {
        user_id: user_id(),
        username: "ada".into(),
    }));
    assert_eq!(session.visible_messages(), original.messages);
}

#[tokio::test]
async fn a_new_stream_id_starts_a_new_accumulator() {
    let session = session(MockApi::default(), chat(vec![message(0, true, "hi")]));
    session.apply_event(&update("a", "first"));
    session.apply_event(&update("b", "second"));
    let awaiting = session.awaiting_message().unwrap();
    assert_eq!(awaiting.id, "b");
    assert_eq!(awaiting.content, "second");

    session.apply_event(&finish("b", "second!"));
    assert!(session.awaiting_message().is_none());
}

trait ApiCalls {
    fn api_calls(&self) -> Vec<String>;
}

impl ApiCalls for ChatSession<MockApi> {
    fn api_calls(&self) -> Vec<String> {
        self.api().calls()
    }
}
