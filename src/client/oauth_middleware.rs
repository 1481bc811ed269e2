//! Bearer token propagation for outgoing requests.
//!
//! A [`BearerProvider`] supplies the token, if any, for each outgoing request.
//! [`BearerTokenMiddleware`] attaches it as `Authorization: Bearer <token>`;
//! when no token is available the request is forwarded unmodified. The
//! provider is asked once per request: no caching, no retry.
//!
//! ```rust
//! use oauth2_addons::client::http_middleware::HttpMiddlewareChain;
//! use oauth2_addons::client::oauth_middleware::{BearerTokenMiddleware, StaticBearerProvider};
//! use std::sync::Arc;
//!
//! let provider = StaticBearerProvider::new("my-api-token");
//! let mut chain = HttpMiddlewareChain::new();
//! chain.add(Arc::new(BearerTokenMiddleware::new(Arc::new(provider))));
//! ```

use crate::client::http_middleware::{
    HttpMiddleware, HttpMiddlewareContext, HttpRequest, HttpResponse,
};
use crate::error::Result;
use crate::server::auth::Principal;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Supplies bearer tokens for outgoing requests.
#[async_trait]
pub trait BearerProvider: Send + Sync {
    /// Token for the next request, or `None` to send it without credentials.
    async fn get_bearer(&self) -> Option<String>;
}

/// OAuth bearer token
#[derive(Debug, Clone)]
pub struct BearerToken {
    /// The access token
    pub token: String,
    /// Optional expiration time
    pub expires_at: Option<SystemTime>,
}

impl BearerToken {
    /// Create a token that never expires.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// Create a token expiring after `expires_in`.
    pub fn with_expiry(token: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: Some(SystemTime::now() + expires_in),
        }
    }

    /// Check if token is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| SystemTime::now() >= expires_at)
    }
}

/// Provider holding one token, replaceable at runtime.
///
/// An expired token is not sent.
#[derive(Debug)]
pub struct StaticBearerProvider {
    token: RwLock<BearerToken>,
}

impl StaticBearerProvider {
    /// Create a provider for a token that never expires.
    pub fn new(token: impl Into<String>) -> Self {
        Self::from_token(BearerToken::new(token))
    }

    /// Create a provider for `token`.
    pub fn from_token(token: BearerToken) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    /// Replace the token.
    pub fn update_token(&self, token: BearerToken) {
        *self.token.write() = token;
    }

    /// Current token.
    pub fn token(&self) -> BearerToken {
        self.token.read().clone()
    }
}

#[async_trait]
impl BearerProvider for StaticBearerProvider {
    async fn get_bearer(&self) -> Option<String> {
        let token = self.token.read();
        if token.is_expired() {
            tracing::warn!("Bearer token expired, sending request without credentials");
            return None;
        }
        Some(token.token.clone())
    }
}

/// Provider backed by a closure.
pub struct FnBearerProvider<F> {
    f: F,
}

impl<F> FnBearerProvider<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> std::fmt::Debug for FnBearerProvider<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnBearerProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> BearerProvider for FnBearerProvider<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    async fn get_bearer(&self) -> Option<String> {
        (self.f)()
    }
}

tokio::task_local! {
    static CURRENT_PRINCIPAL: Principal;
}

/// Forwards the token of the principal handling the current request.
///
/// The principal is bound to the task with [`PrincipalBearerProvider::scope`];
/// outside of a scope, or for a principal without a token, nothing is sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalBearerProvider;

impl PrincipalBearerProvider {
    /// Run `f` with `principal` as the current principal.
    pub async fn scope<F>(principal: Principal, f: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_PRINCIPAL.scope(principal, f).await
    }
}

#[async_trait]
impl BearerProvider for PrincipalBearerProvider {
    async fn get_bearer(&self) -> Option<String> {
        CURRENT_PRINCIPAL
            .try_with(|principal| principal.token.clone())
            .ok()
            .flatten()
    }
}

/// Attaches bearer tokens to outgoing requests.
pub struct BearerTokenMiddleware {
    provider: Arc<dyn BearerProvider>,
}

impl BearerTokenMiddleware {
    /// Create a middleware using `provider`.
    pub fn new(provider: Arc<dyn BearerProvider>) -> Self {
        Self { provider }
    }

    /// Attach a bearer token to a `reqwest` request, if one is available.
    ///
    /// An `Authorization` header already set on `builder` is replaced.
    pub async fn apply(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(token) = self.provider.get_bearer().await else {
            return builder;
        };

        let mut value = match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Bearer token is not a valid header value, sending request without credentials");
                return builder;
            },
        };
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        builder.headers(headers)
    }
}

impl std::fmt::Debug for BearerTokenMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenMiddleware").finish_non_exhaustive()
    }
}

#[async_trait]
impl HttpMiddleware for BearerTokenMiddleware {
    async fn on_request(
        &self,
        request: &mut HttpRequest,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        let Some(token) = self.provider.get_bearer().await else {
            return Ok(());
        };

        if request.has_header("Authorization") {
            tracing::debug!(url = %context.url, "Replacing existing Authorization header");
        }
        request.add_header("Authorization", &format!("Bearer {}", token));
        Ok(())
    }

    async fn on_response(
        &self,
        response: &mut HttpResponse,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        if response.status == 401 || response.status == 403 {
            context.set_metadata("auth_failure", "true");
            tracing::debug!(
                method = %context.method,
                url = %context.url,
                status = response.status,
                "Downstream rejected credentials"
            );
        }
        Ok(())
    }

    fn priority(&self) -> i32 {
        10 // High priority - run early
    }
}
