//! Acting user, as forwarded by the authenticating proxy

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};

const IDENTITY_HEADERS: [&str; 2] = ["x-auth-request-email", "x-forwarded-user"];

pub const ANONYMOUS: &str = "anonymous";

/// Identity of the requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let name = IDENTITY_HEADERS
            .iter()
            .filter_map(|h| parts.headers.get(*h))
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .find(|v| !v.is_empty())
            .unwrap_or(ANONYMOUS);
        Ok(Actor(name.to_string()))
    }
}
