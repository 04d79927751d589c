use std::collections::HashMap;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::COOKIE, request::Parts, HeaderMap},
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{error::AppError, state::AppState, token};

/// Name of the cookie carrying the opaque session identifier.
pub const SESSION_COOKIE: &str = "session_id";

/// Server-side state bound to one authenticated browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub username: String,
    pub is_premium: bool,
}

/// Key-value session storage keyed by an opaque token. Sessions have no
/// expiry of their own; they live as long as the backing store keeps them.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores the session and returns its freshly minted token.
    async fn create(&self, session: Session) -> String;
    async fn get(&self, token: &str) -> Option<Session>;
    /// Removes the session. Destroying an absent session is not an error.
    async fn destroy(&self, token: &str);
    /// Updates the cached premium flag in place, so authorization checks
    /// reflect an upgrade without re-login.
    async fn set_premium(&self, token: &str, is_premium: bool);
}

/// In-process store. An external KV store plugs in at the same trait seam.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: Session) -> String {
        let token = token::generate();
        self.inner.write().await.insert(token.clone(), session);
        token
    }

    async fn get(&self, token: &str) -> Option<Session> {
        self.inner.read().await.get(token).cloned()
    }

    async fn destroy(&self, token: &str) {
        self.inner.write().await.remove(token);
    }

    async fn set_premium(&self, token: &str, is_premium: bool) {
        if let Some(session) = self.inner.write().await.get_mut(token) {
            session.is_premium = is_premium;
        }
    }
}

/// Pulls the session token out of the request's Cookie headers.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_string())
}

pub fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Extractor binding a request to its authenticated session. Rejects with
/// 401 when no valid session cookie is presented.
#[derive(Debug)]
pub struct AuthSession {
    pub token: String,
    pub session: Session,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Not authorized".into()))?;

        let session = state
            .sessions
            .get(&token)
            .await
            .ok_or_else(|| AppError::Unauthorized("Not authorized".into()))?;

        Ok(AuthSession { token, session })
    }
}
