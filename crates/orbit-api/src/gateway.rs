use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use serde::Deserialize;

use orbit_gateway::connection;

use crate::auth::verify_token;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// Upgrade to the realtime channel. Browsers cannot set headers on a
/// websocket handshake, so the JWT may also come as `?token=`.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let token = match (&query.token, &bearer) {
        (Some(token), _) => token.as_str(),
        (None, Ok(TypedHeader(Authorization(bearer)))) => bearer.token(),
        (None, Err(_)) => return Err(ApiError::unauthorized("Authentication failed")),
    };
    let claims = verify_token(&state.jwt_secret, token)
        .ok_or_else(|| ApiError::unauthorized("Authentication failed"))?;

    let dispatcher = state.dispatcher.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, claims.sub, claims.username)
    }))
}
