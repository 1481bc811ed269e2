//! Inbound resource server filter.
//!
//! [`ResourceServer`] combines the [`TokenAuthenticator`] with the compiled
//! [`AccessRules`], the selected [`CsrfStrategy`] and the [`CorsPolicies`].
//! [`ResourceServer::authorize`] is framework independent; with the
//! `http-layer` feature the same decision is exposed as an axum middleware
//! that attaches the [`Principal`] to the request extensions.
//!
//! ```rust,ignore
//! use axum::{routing::get, Router};
//! use oauth2_addons::server::{auth::Principal, ResourceServer};
//! use std::sync::Arc;
//!
//! let server = Arc::new(ResourceServer::from_config(&config, None)?);
//! let app = Router::new()
//!     .route("/greetings", get(|p: Principal| async move { format!("Hi {}!", p.name()) }));
//! let app = server.protect(app);
//! ```

use super::access::{AccessRules, CorsPolicies, CsrfStrategy};
use super::auth::{Authenticator, Principal, PrincipalFactory, SecurityConfig, TokenAuthenticator};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Resource server access decision point.
pub struct ResourceServer {
    authenticator: Arc<dyn TokenAuthenticator>,
    rules: AccessRules,
    csrf: CsrfStrategy,
    cors: CorsPolicies,
    #[cfg(feature = "http-layer")]
    cors_layers: Vec<(super::access::PathPattern, tower_http::cors::CorsLayer)>,
}

impl std::fmt::Debug for ResourceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceServer")
            .field("rules", &self.rules)
            .field("csrf", &self.csrf)
            .field("cors", &self.cors)
            .finish_non_exhaustive()
    }
}

impl ResourceServer {
    /// Build the resource server described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for any invalid issuer, rule, CORS
    /// policy or principal factory mismatch.
    pub fn from_config(
        config: &SecurityConfig,
        custom_factory: Option<Arc<dyn PrincipalFactory>>,
    ) -> Result<Self> {
        let authenticator = Authenticator::from_config(config, custom_factory)?;
        Self::with_authenticator(config, Arc::new(authenticator))
    }

    /// Build a resource server around an existing authenticator.
    pub fn with_authenticator(
        config: &SecurityConfig,
        authenticator: Arc<dyn TokenAuthenticator>,
    ) -> Result<Self> {
        let rules = AccessRules::compile(config)?;
        let csrf = config.csrf.resolve(config.stateless_sessions);
        let cors = CorsPolicies::compile(config)?;

        #[cfg(feature = "http-layer")]
        let cors_layers = config
            .cors
            .iter()
            .map(|policy| {
                Ok((
                    super::access::PathPattern::new(&policy.path)?,
                    policy.to_layer()?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            issuers = config.issuers.len(),
            permit_all = ?config.permit_all,
            access_rules = config.access.len(),
            csrf = ?csrf,
            cors_policies = config.cors.len(),
            "Configured resource server"
        );

        Ok(Self {
            authenticator,
            rules,
            csrf,
            cors,
            #[cfg(feature = "http-layer")]
            cors_layers,
        })
    }

    /// Authenticate the request credentials and apply the access rules.
    ///
    /// On permit-all paths bad credentials are ignored and the request
    /// proceeds anonymously.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownIssuer`] / [`Error::InvalidToken`] for rejected tokens
    /// - [`Error::Unauthorized`] when a principal is required but absent
    /// - [`Error::Forbidden`] when the principal lacks the required authority
    pub async fn authorize(
        &self,
        path: &str,
        authorization: Option<&str>,
    ) -> Result<Option<Principal>> {
        let principal = match self.authenticator.authenticate_header(authorization).await {
            Ok(principal) => principal,
            Err(e) if self.rules.is_permit_all(path) => {
                tracing::debug!(path, error = %e, "Ignoring credentials on permit-all path");
                None
            },
            Err(e) => return Err(e),
        };

        self.rules.check(path, principal.as_ref())?;
        Ok(principal)
    }

    /// Compiled access rules.
    pub fn rules(&self) -> &AccessRules {
        &self.rules
    }

    /// Selected CSRF strategy.
    pub fn csrf(&self) -> CsrfStrategy {
        self.csrf
    }

    /// Configured CORS policies.
    pub fn cors(&self) -> &CorsPolicies {
        &self.cors
    }
}

#[cfg(feature = "http-layer")]
mod layer {
    use super::*;
    use axum::extract::{FromRequestParts, OptionalFromRequestParts, Request, State};
    use axum::middleware::Next;
    use axum::response::{IntoResponse, Response};
    use axum::{Json, Router};
    use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
    use http::request::Parts;
    use http::HeaderValue;
    use std::convert::Infallible;
    use tower::{Layer, ServiceExt};

    impl ResourceServer {
        /// Apply the resource server filter to every route of `router`.
        pub fn protect<S>(self: Arc<Self>, router: Router<S>) -> Router<S>
        where
            S: Clone + Send + Sync + 'static,
        {
            router.layer(axum::middleware::from_fn_with_state(
                self,
                resource_server_middleware,
            ))
        }

        async fn guard(&self, mut request: Request, next: Next) -> Response {
            let path = request.uri().path().to_string();
            let authorization = request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok());

            match self.authorize(&path, authorization).await {
                Ok(principal) => {
                    if let Some(principal) = principal {
                        request.extensions_mut().insert(principal);
                    }
                    request.extensions_mut().insert(self.csrf);
                    next.run(request).await
                },
                Err(e) => {
                    tracing::warn!(path = %path, status = %e.status_code(), error = %e, "Request rejected");
                    e.into_response()
                },
            }
        }
    }

    /// axum middleware applying a [`ResourceServer`].
    ///
    /// CORS headers of the first matching policy are applied to every
    /// response, including rejections; preflight requests are answered
    /// without authentication.
    pub async fn resource_server_middleware(
        State(server): State<Arc<ResourceServer>>,
        request: Request,
        next: Next,
    ) -> Response {
        let cors = server
            .cors_layers
            .iter()
            .find(|(pattern, _)| pattern.matches(request.uri().path()))
            .map(|(_, layer)| layer.clone());

        let inner = tower::service_fn(move |request: Request| {
            let server = Arc::clone(&server);
            let next = next.clone();
            async move { Ok::<_, Infallible>(server.guard(request, next).await) }
        });

        let result = match cors {
            Some(cors) => cors.layer(inner).oneshot(request).await,
            None => inner.oneshot(request).await,
        };
        match result {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    impl IntoResponse for Error {
        fn into_response(self) -> Response {
            let status = self.status_code();
            let code = match self {
                Error::UnknownIssuer { .. } | Error::InvalidToken(_) => "invalid_token",
                Error::Unauthorized => "unauthorized",
                Error::Forbidden { .. } => "insufficient_scope",
                Error::Configuration(_) | Error::Internal(_) => "server_error",
                Error::Http(_) => "bad_gateway",
            };
            let body = Json(serde_json::json!({
                "error": code,
                "error_description": self.to_string(),
            }));

            let mut response = (status, body).into_response();
            let challenge = match self {
                Error::UnknownIssuer { .. } | Error::InvalidToken(_) => {
                    Some(r#"Bearer error="invalid_token""#)
                },
                Error::Unauthorized => Some("Bearer"),
                Error::Forbidden { .. } => Some(r#"Bearer error="insufficient_scope""#),
                _ => None,
            };
            if let Some(challenge) = challenge {
                response
                    .headers_mut()
                    .insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
            }
            response
        }
    }

    /// Extracts the principal attached by [`resource_server_middleware`].
    impl<S> FromRequestParts<S> for Principal
    where
        S: Send + Sync,
    {
        type Rejection = Error;

        async fn from_request_parts(
            parts: &mut Parts,
            _state: &S,
        ) -> std::result::Result<Self, Self::Rejection> {
            parts
                .extensions
                .get::<Principal>()
                .cloned()
                .ok_or(Error::Unauthorized)
        }
    }

    impl<S> OptionalFromRequestParts<S> for Principal
    where
        S: Send + Sync,
    {
        type Rejection = Infallible;

        async fn from_request_parts(
            parts: &mut Parts,
            _state: &S,
        ) -> std::result::Result<Option<Self>, Self::Rejection> {
            Ok(parts.extensions.get::<Principal>().cloned())
        }
    }
}

#[cfg(feature = "http-layer")]
pub use layer::resource_server_middleware;
