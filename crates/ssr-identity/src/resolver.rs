//! Identity resolution.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use ssr_core::{RenderRequest, UserRef};
use thiserror::Error;

/// Cookie holding the login token.
pub const LOGIN_TOKEN_COOKIE: &str = "loginToken";

/// Legacy cookie name still sent by older clients.
pub const LEGACY_LOGIN_TOKEN_COOKIE: &str = "meteor_login_token";

/// Errors raised by identity lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The user store could not be reached.
    #[error("user store unavailable: {0}")]
    Unavailable(String),

    /// The lookup failed for another reason.
    #[error("identity lookup failed: {0}")]
    Lookup(String),
}

/// Resolves the user behind a request.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Return the identified user, or `None` for an anonymous request.
    async fn resolve_user(&self, request: &RenderRequest) -> Result<Option<UserRef>, IdentityError>;
}

/// A login token carried by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginToken(String);

impl LoginToken {
    /// Extract the token from the login cookie (current or legacy name) or
    /// an `Authorization: Bearer` header, in that order.
    pub fn from_request(request: &RenderRequest) -> Option<Self> {
        let cookie = |name: &str| request.cookie(name).filter(|token| !token.is_empty());
        let from_cookie = cookie(LOGIN_TOKEN_COOKIE).or_else(|| cookie(LEGACY_LOGIN_TOKEN_COOKIE));

        let from_header = || {
            request.header("authorization").and_then(|value| {
                let (scheme, token) = value.trim().split_once(' ')?;
                scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
            })
        };

        from_cookie
            .or_else(from_header)
            .filter(|token| !token.is_empty())
            .map(|token| Self(token.to_string()))
    }

    /// Get the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lookup of users by login token.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Return the user owning `token`, if any.
    async fn user_for_token(&self, token: &LoginToken) -> Result<Option<UserRef>, IdentityError>;
}

/// Resolver that reads a [`LoginToken`] and looks it up in a [`UserStore`].
pub struct TokenIdentityResolver<S> {
    store: S,
}

impl<S: UserStore> TokenIdentityResolver<S> {
    /// Create a resolver over a user store.
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: UserStore> IdentityResolver for TokenIdentityResolver<S> {
    async fn resolve_user(&self, request: &RenderRequest) -> Result<Option<UserRef>, IdentityError> {
        match LoginToken::from_request(request) {
            Some(token) => self.store.user_for_token(&token).await,
            None => Ok(None),
        }
    }
}

/// In-memory token → user map.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, UserRef>>,
}

impl InMemoryUserStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a user.
    pub fn with_user(self, token: impl Into<String>, user: UserRef) -> Self {
        self.insert(token, user);
        self
    }

    /// Register a token for a user.
    pub fn insert(&self, token: impl Into<String>, user: UserRef) {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users.insert(token.into(), user);
    }

    /// Forget a token.
    pub fn revoke(&self, token: &str) -> bool {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users.remove(token).is_some()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn user_for_token(&self, token: &LoginToken) -> Result<Option<UserRef>, IdentityError> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        Ok(users.get(token.as_str()).cloned())
    }
}

/// Resolver that treats every request as anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousResolver;

#[async_trait]
impl IdentityResolver for AnonymousResolver {
    async fn resolve_user(&self, _request: &RenderRequest) -> Result<Option<UserRef>, IdentityError> {
        Ok(None)
    }
}
