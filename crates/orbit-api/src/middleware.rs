use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};

use crate::auth::verify_token;
use crate::error::ApiError;
use crate::state::AppState;

/// Validate the bearer JWT and stash its claims in the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.map_err(|_| ApiError::unauthorized("Authentication failed"))?;

    let claims = verify_token(&state.jwt_secret, bearer.token())
        .ok_or_else(|| ApiError::unauthorized("Authentication failed"))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
