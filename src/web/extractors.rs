//! Request extractors for the gateway's own auth surface.

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};

use crate::errors::AuthError;

/// The raw bearer token pulled out of `Authorization: Bearer <token>`,
/// or an `AuthError` if the header is missing or malformed (spec §4.6,
/// grounded on `original_source/middleware/auth.py`'s
/// `auth_header.split(" ")[1]` extraction).
pub struct BearerToken(pub String);

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingOrMalformed)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MissingOrMalformed)?;

        if token.is_empty() {
            return Err(AuthError::MissingOrMalformed);
        }

        Ok(BearerToken(token.to_string()))
    }
}
