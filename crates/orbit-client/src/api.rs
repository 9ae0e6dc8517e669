use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use orbit_types::api::{
    AuthResponse, ChatResponse, ErrorBody, PublicChatsResponse, UserChatResponse, Visibility,
};
use orbit_types::models::{Chat, UserWithChats};

use crate::error::ClientError;

/// The two calls a [`ChatSession`](crate::ChatSession) makes to the server.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(&self, chat_id: Uuid, prompt: &str) -> Result<Chat, ClientError>;

    async fn regenerate_prompt(
        &self,
        chat_id: Uuid,
        message_id: &str,
        prompt: &str,
    ) -> Result<Chat, ClientError>;
}

/// REST client for the Orbit server.
#[derive(Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpChatApi {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub async fn register(&mut self, username: &str, password: &str) -> Result<UserWithChats, ClientError> {
        let auth: AuthResponse = self
            .post("api/auth/register", &json!({"username": username, "password": password}))
            .await?;
        self.token = Some(auth.token);
        Ok(auth.user)
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<UserWithChats, ClientError> {
        let auth: AuthResponse = self
            .post("api/auth/login", &json!({"username": username, "password": password}))
            .await?;
        self.token = Some(auth.token);
        Ok(auth.user)
    }

    pub async fn create_chat(&self, name: &str, visibility: Visibility) -> Result<UserChatResponse, ClientError> {
        self.post(
            "api/chat/create-chat",
            &json!({"chatName": name, "chatPublic": visibility}),
        )
        .await
    }

    pub async fn edit_chat(
        &self,
        chat_id: Uuid,
        name: &str,
        visibility: Visibility,
    ) -> Result<UserChatResponse, ClientError> {
        self.post(
            "api/chat/edit-chat",
            &json!({"chatId": chat_id, "chatName": name, "chatPublic": visibility}),
        )
        .await
    }

    pub async fn delete_chat(&self, chat_id: Uuid) -> Result<UserChatResponse, ClientError> {
        self.post("api/chat/delete-chat", &json!({"chatId": chat_id}))
            .await
    }

    pub async fn get_chat(&self, chat_id: Uuid) -> Result<UserChatResponse, ClientError> {
        self.get("api/chat/get-chat", &[("id", chat_id.to_string())])
            .await
    }

    pub async fn get_public(&self) -> Result<Vec<Chat>, ClientError> {
        let response: PublicChatsResponse = self.get("api/chat/get-public", &[]).await?;
        Ok(response.chats)
    }

    pub async fn get_shared_chat(&self, chat_id: Uuid) -> Result<Chat, ClientError> {
        let response: ChatResponse = self
            .get("api/chat/get-shared-chat", &[("id", chat_id.to_string())])
            .await?;
        Ok(response.chat)
    }

    /// Websocket URL of the realtime gateway, token included.
    pub fn gateway_url(&self) -> Result<Url, ClientError> {
        let token = self.token.as_deref().ok_or(ClientError::NoToken)?;
        let mut url = self.base.join("gateway")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Url(format!("cannot use {} for {}", scheme, url)))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(self.base.join(path)?).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        decode(request.send().await?).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<R, ClientError> {
        let mut request = self.client.get(self.base.join(path)?).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        decode(request.send().await?).await
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn send_message(&self, chat_id: Uuid, prompt: &str) -> Result<Chat, ClientError> {
        let response: ChatResponse = self
            .post("api/chat/send-message", &json!({"chatId": chat_id, "prompt": prompt}))
            .await?;
        Ok(response.chat)
    }

    async fn regenerate_prompt(
        &self,
        chat_id: Uuid,
        message_id: &str,
        prompt: &str,
    ) -> Result<Chat, ClientError> {
        let response: ChatResponse = self
            .post(
                "api/chat/regenerate-prompt",
                &json!({"chatId": chat_id, "messageId": message_id, "prompt": prompt}),
            )
            .await?;
        Ok(response.chat)
    }
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    debug!("request failed with {}: {}", status, text);
    Err(error_from_body(status, &text))
}

fn error_from_body(status: StatusCode, text: &str) -> ClientError {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => ClientError::Api {
            status: body.status,
            message: body.message,
        },
        Err(_) => ClientError::Api {
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
        },
    }
}
