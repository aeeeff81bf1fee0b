use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::convert::Infallible;
use teamsync_core::Identity;

/// Header carrying the authenticated user id, set by the upstream auth proxy.
pub const IDENTITY_ID_HEADER: &str = "x-identity-id";
/// Header carrying the authenticated user's display name.
pub const IDENTITY_NAME_HEADER: &str = "x-identity-name";

/// The caller's identity, or `None` for an anonymous request.
#[derive(Debug, Clone)]
pub struct Caller(pub Option<Identity>);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caller(identity_from_headers(&parts.headers)))
    }
}

pub fn identity_from_headers(headers: &HeaderMap) -> Option<Identity> {
    let id = headers
        .get(IDENTITY_ID_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .to_string();
    if id.is_empty() {
        return None;
    }
    let name = headers
        .get(IDENTITY_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim()
        .to_string();
    Some(Identity { id, name })
}
