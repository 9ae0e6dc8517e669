use axum::{Extension, Json, extract::State};

use orbit_types::api::{ChatResponse, Claims, RegeneratePromptRequest, SendMessageRequest};

use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

/// Generation failures still answer 200; the reply then carries the apology.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let chat = state
        .conversation
        .send_message(claims.sub, &req.chat_id, &req.prompt)
        .await?;
    Ok(Json(ChatResponse { chat }))
}

pub async fn regenerate_prompt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<RegeneratePromptRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let chat = state
        .conversation
        .regenerate(claims.sub, &req.chat_id, &req.message_id, &req.prompt)
        .await?;
    Ok(Json(ChatResponse { chat }))
}
