use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use colloquy_types::api::Claims;

use crate::state::AppState;

/// Verify a bearer token if one is present and attach its claims to the request.
///
/// Missing or invalid tokens are not rejected here: handlers validate the
/// request body first and only then decide that no identity means `unauthorized`.
pub async fn resolve_identity(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if let Some(Authorization(bearer)) = req.headers().typed_get::<Authorization<Bearer>>() {
        match verify_token(bearer.token(), &state.jwt_secret) {
            Ok(claims) => {
                req.extensions_mut().insert(claims);
            }
            Err(e) => debug!(error = %e, "ignoring invalid identity token"),
        }
    }
    next.run(req).await
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
}

/// Claims resolved by [`resolve_identity`], if any.
#[derive(Debug, Clone)]
pub struct Identity(pub Option<Claims>);

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Identity(parts.extensions.get::<Claims>().cloned()))
    }
}
