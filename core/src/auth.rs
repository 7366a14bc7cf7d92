//! Authentication seam. The engine only needs a yes/no before it starts
//! consuming a stream; token verification itself lives behind the trait.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

/// Opaque identity of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gate consulted once per session, before any stream byte is processed.
#[async_trait]
pub trait AuthGate: Send + Sync {
    /// Returns the user behind the token, or `None` to reject the session.
    async fn authenticate(&self, token: &str) -> Option<UserId>;
}

/// Fixed token table, for tests and local development.
#[derive(Debug, Default)]
pub struct StaticTokenAuth {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user: UserId) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }
}

#[async_trait]
impl AuthGate for StaticTokenAuth {
    async fn authenticate(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).cloned()
    }
}
