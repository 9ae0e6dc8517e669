use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::state::AppState;
use crate::{auth, chats, gateway, messages};
use crate::middleware::require_auth;

/// Every route of the service: REST under `/api`, the websocket at `/gateway`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/chat/get-shared-chat", get(chats::get_shared_chat));

    let protected_routes = Router::new()
        .route("/chat/create-chat", post(chats::create_chat))
        .route("/chat/edit-chat", post(chats::edit_chat))
        .route("/chat/delete-chat", post(chats::delete_chat))
        .route("/chat/get-chat", get(chats::get_chat))
        .route("/chat/get-public", get(chats::get_public))
        .route("/chat/send-message", post(messages::send_message))
        .route("/chat/regenerate-prompt", post(messages::regenerate_prompt))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .nest("/api", public_routes.merge(protected_routes))
        .route("/gateway", get(gateway::ws_upgrade))
        .with_state(state)
}
