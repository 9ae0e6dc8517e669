use axum::{
    Extension, Json,
    extract::{Query, State},
};
use tracing::info;
use uuid::Uuid;

use orbit_db::NewChat;
use orbit_types::api::{
    ChatQuery, ChatResponse, Claims, CreateChatRequest, DeleteChatRequest, EditChatRequest,
    PublicChatsResponse, UserChatResponse, Visibility,
};
use orbit_types::models::{Chat, User};

use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<CreateChatRequest>,
) -> Result<Json<UserChatResponse>, ApiError> {
    let user = load_user(&state, claims.sub).await?;

    if req.chat_name.is_empty() {
        return Err(ApiError::bad_request("Missing chat name"));
    }
    let public = parse_visibility(req.chat_public.as_ref())?;

    let name = req.chat_name;
    let (user, chat) = state
        .with_store(move |store| {
            let chat = store.create_chat(NewChat {
                name: &name,
                public,
                user_id: user.id,
                creator: &user.username,
            })?;
            let user = store
                .get_user_with_chats(user.id)?
                .ok_or_else(|| anyhow::anyhow!("user {} vanished", user.id))?;
            Ok((user, chat))
        })
        .await?;

    info!("{} created chat {}", user.user.username, chat.id);
    Ok(Json(UserChatResponse { user, chat }))
}

pub async fn edit_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<EditChatRequest>,
) -> Result<Json<UserChatResponse>, ApiError> {
    let user = load_user(&state, claims.sub).await?;

    if req.chat_id.is_empty() {
        return Err(ApiError::bad_request("Missing chat id"));
    }
    if req.chat_name.is_empty() {
        return Err(ApiError::bad_request("Missing chat name"));
    }
    let public = parse_visibility(req.chat_public.as_ref())?;

    let chat = load_chat(&state, &req.chat_id).await?;
    if chat.user_id != user.id {
        return Err(ApiError::forbidden("Access to chat denied"));
    }

    let name = req.chat_name;
    let (user, chat) = state
        .with_store(move |store| {
            store.update_chat(chat.id, &name, public)?;
            let chat = store
                .get_chat_with_messages(chat.id)?
                .ok_or_else(|| anyhow::anyhow!("chat {} vanished", chat.id))?;
            let user = store
                .get_user_with_chats(user.id)?
                .ok_or_else(|| anyhow::anyhow!("user {} vanished", user.id))?;
            Ok((user, chat))
        })
        .await?;

    Ok(Json(UserChatResponse { user, chat }))
}

/// Responds with the chat as it was just before deletion.
pub async fn delete_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<DeleteChatRequest>,
) -> Result<Json<UserChatResponse>, ApiError> {
    let user = load_user(&state, claims.sub).await?;

    if req.chat_id.is_empty() {
        return Err(ApiError::bad_request("Missing chat id"));
    }

    let chat = load_chat(&state, &req.chat_id).await?;
    if chat.user_id != user.id {
        return Err(ApiError::forbidden("Access to chat denied"));
    }

    let (user, chat) = state
        .with_store(move |store| {
            let chat = store
                .get_chat_with_messages(chat.id)?
                .ok_or_else(|| anyhow::anyhow!("chat {} vanished", chat.id))?;
            store.delete_chat(chat.id)?;
            let user = store
                .get_user_with_chats(user.id)?
                .ok_or_else(|| anyhow::anyhow!("user {} vanished", user.id))?;
            Ok((user, chat))
        })
        .await?;

    info!("{} deleted chat {} ({} messages)", user.user.username, chat.id, chat.messages.len());
    Ok(Json(UserChatResponse { user, chat }))
}

/// The caller's own chat. Other users' chats are reported as missing.
pub async fn get_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ChatQuery>,
) -> Result<Json<UserChatResponse>, ApiError> {
    let user = load_user(&state, claims.sub).await?;

    if query.id.is_empty() {
        return Err(ApiError::bad_request("Missing chat id"));
    }
    let chat = load_chat(&state, &query.id).await?;
    if chat.user_id != user.id {
        return Err(ApiError::not_found("Chat not found"));
    }

    let user = state
        .with_store(move |store| {
            store
                .get_user_with_chats(user.id)?
                .ok_or_else(|| anyhow::anyhow!("user {} vanished", user.id))
        })
        .await?;
    Ok(Json(UserChatResponse { user, chat }))
}

pub async fn get_public(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<PublicChatsResponse>, ApiError> {
    load_user(&state, claims.sub).await?;
    let chats = state.with_store(|store| store.list_public_chats()).await?;
    Ok(Json(PublicChatsResponse { chats }))
}

/// Read-only share link. Needs no token; only public chats are served.
pub async fn get_shared_chat(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
) -> Result<Json<ChatResponse>, ApiError> {
    if query.id.is_empty() {
        return Err(ApiError::bad_request("Missing chat id"));
    }
    let chat = load_chat(&state, &query.id).await?;
    if !chat.public {
        return Err(ApiError::forbidden("This chat is not publicly shared"));
    }
    Ok(Json(ChatResponse { chat }))
}

async fn load_user(state: &AppState, user_id: Uuid) -> Result<User, ApiError> {
    state
        .with_store(move |store| store.get_user(user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Request token is not from a valid user"))
}

/// The chat with its messages. Ids that do not parse cannot exist.
async fn load_chat(state: &AppState, chat_id: &str) -> Result<Chat, ApiError> {
    let chat_id = Uuid::parse_str(chat_id).map_err(|_| ApiError::not_found("Chat not found"))?;
    state
        .with_store(move |store| store.get_chat_with_messages(chat_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Chat not found"))
}

fn parse_visibility(visibility: Option<&Visibility>) -> Result<bool, ApiError> {
    visibility
        .and_then(Visibility::is_public)
        .ok_or_else(|| ApiError::bad_request("Invalid chat visibility"))
}
