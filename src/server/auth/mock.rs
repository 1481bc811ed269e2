//! Mock authenticator for development and testing.
//!
//! **Never use in production.** Tokens are looked up in a table instead of
//! being verified.
//!
//! # Example
//!
//! ```rust
//! use oauth2_addons::server::auth::{MockAuthenticator, Principal, TokenAuthenticator};
//!
//! # async fn example() -> Result<(), oauth2_addons::Error> {
//! let authenticator = MockAuthenticator::new()
//!     .with_token("admin-token", Principal::new("admin", "https://mock").with_authorities(["ADMIN"]))
//!     .with_token("user-token", Principal::new("user", "https://mock"));
//!
//! let principal = authenticator.authenticate("admin-token").await?;
//! assert!(principal.has_authority("ADMIN"));
//! # Ok(())
//! # }
//! ```

use super::authenticator::TokenAuthenticator;
use super::principal::Principal;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// Token table authenticator.
///
/// Known tokens resolve to their registered principal. Unknown tokens resolve
/// to the fallback principal when one is set, and are rejected as
/// [`Error::InvalidToken`] otherwise.
#[derive(Debug, Clone, Default)]
pub struct MockAuthenticator {
    /// Token → principal.
    tokens: HashMap<String, Principal>,
    /// Principal returned for any other token.
    fallback: Option<Principal>,
}

impl MockAuthenticator {
    /// Create an authenticator that rejects every token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an authenticator accepting any token as `principal`.
    pub fn accepting_any(principal: Principal) -> Self {
        Self {
            tokens: HashMap::new(),
            fallback: Some(principal),
        }
    }

    /// Register a token.
    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

#[async_trait]
impl TokenAuthenticator for MockAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Principal> {
        self.tokens
            .get(token)
            .or(self.fallback.as_ref())
            .cloned()
            .map(|principal| principal.with_token(token))
            .ok_or_else(|| Error::invalid_token("Unknown mock token"))
    }
}
