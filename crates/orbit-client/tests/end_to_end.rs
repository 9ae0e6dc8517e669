use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use orbit_api::AppStateInner;
use orbit_client::{ChatSession, GatewayListener, HttpChatApi, Outcome};
use orbit_conversation::{
    ConversationService, ConversationSettings, GenerationError, GenerationRequest, Generator,
    TokenSink,
};
use orbit_db::{ChatStore, Database};
use orbit_gateway::Dispatcher;
use orbit_types::api::Visibility;
use orbit_types::events::{Acknowledgement, MessageDelta, SocketEvent};

const SECRET: &str = "end-to-end-secret";

/// Streams the prompt back word by word.
struct Parrot;

#[async_trait]
impl Generator for Parrot {
    async fn generate(
        &self,
        request: GenerationRequest,
        tokens: &TokenSink,
    ) -> Result<String, GenerationError> {
        for word in request.prompt.split_inclusive(' ') {
            tokens.push(word).await;
        }
        Ok(request.prompt)
    }
}

async fn serve() -> (String, Dispatcher) {
    let store: Arc<dyn ChatStore> = Arc::new(Database::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new(Duration::from_secs(5));
    let conversation = ConversationService::new(
        store.clone(),
        Arc::new(Parrot),
        dispatcher.clone(),
        ConversationSettings::default(),
    );
    let app = orbit_api::router(Arc::new(AppStateInner {
        store,
        conversation,
        dispatcher: dispatcher.clone(),
        jwt_secret: SECRET.into(),
    }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), dispatcher)
}

async fn wait_for_connection(dispatcher: &Dispatcher, user_id: Uuid) {
    for _ in 0..200 {
        if dispatcher.connection_count(user_id).await > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("gateway connection never registered");
}

#[tokio::test]
async fn listener_acknowledges_events() {
    let (base, dispatcher) = serve().await;
    let mut api = HttpChatApi::new(&base).unwrap();
    let user = api.register("ada", "correct horse").await.unwrap();

    let mut gateway = GatewayListener::connect(&api.gateway_url().unwrap()).await.unwrap();
    match gateway.next_event().await.unwrap() {
        Some(SocketEvent::Ready { user_id, username }) => {
            assert_eq!(user_id, user.user.id);
            assert_eq!(username, "ada");
        }
        other => panic!("expected ready, got {:?}", other),
    }
    wait_for_connection(&dispatcher, user.user.id).await;

    let event = SocketEvent::FinishMessage(MessageDelta {
        id: "placeholder".into(),
        chat_id: Uuid::nil(),
        content: "done".into(),
    });
    let handle = dispatcher.emit(user.user.id, event.clone()).await;
    let reader = tokio::spawn(async move { gateway.next_event().await.unwrap() });

    assert_eq!(handle.wait().await, vec![Acknowledgement::ok()]);
    assert_eq!(reader.await.unwrap(), Some(event));
}

#[tokio::test]
async fn session_round_trip_with_streamed_tokens() {
    let (base, dispatcher) = serve().await;
    let mut api = HttpChatApi::new(&base).unwrap();
    let user = api.register("ada", "correct horse").await.unwrap();
    let created = api.create_chat("notes", Visibility::private()).await.unwrap();
    assert_eq!(created.user.chats.len(), 1);

    let gateway = GatewayListener::connect(&api.gateway_url().unwrap()).await.unwrap();
    let (tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    let _reader = gateway.spawn(tx);
    wait_for_connection(&dispatcher, user.user.id).await;

    let session = ChatSession::new(api.clone(), user.user.id, "ada", created.chat.clone());
    assert_eq!(session.send_message("hello there friend").await.unwrap(), Outcome::Sent);

    let chat = session.chat();
    assert_eq!(chat.messages.len(), 2);
    assert_eq!(chat.messages[0].content, "hello there friend");
    assert_eq!(chat.messages[1].content, "hello there friend");
    let placeholder_id = chat.messages[1].id.clone();

    // ready, three tokens, finish
    let mut streamed = String::new();
    let mut finished = None;
    while finished.is_none() {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match &event {
            SocketEvent::UpdateMessage(d) => {
                assert_eq!(d.id, placeholder_id);
                streamed.push_str(&d.content);
            }
            SocketEvent::FinishMessage(d) => finished = Some(d.content.clone()),
            SocketEvent::Ready { .. } => {}
        }
        session.apply_event(&event);
    }
    assert_eq!(streamed, "hello there friend");
    assert_eq!(finished.as_deref(), Some("hello there friend"));
    assert_eq!(session.visible_messages(), chat.messages);

    let shared = api.get_shared_chat(chat.id).await.unwrap_err();
    assert!(shared.to_string().contains("not publicly shared"));
}
