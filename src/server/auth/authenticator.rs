//! Bearer token authentication pipeline.
//!
//! `Authorization` header → unverified `iss` → issuer decoder → verified
//! claims → [`Principal`].

use super::authorities::ClaimPathAuthoritiesConverter;
use super::config::{PrincipalFactoryMode, SecurityConfig};
use super::jwt_validator::{peek_issuer, DecoderResolver};
use super::principal::{DefaultPrincipalFactory, Principal, PrincipalFactory};
use super::registry::IssuerRegistry;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Turns bearer tokens into principals.
#[async_trait]
pub trait TokenAuthenticator: Send + Sync {
    /// Authenticate a raw bearer token.
    async fn authenticate(&self, token: &str) -> Result<Principal>;

    /// Authenticate the value of an `Authorization` header.
    ///
    /// Returns `Ok(None)` when no bearer credentials are present; the access
    /// rules decide whether anonymous access is acceptable.
    async fn authenticate_header(&self, authorization: Option<&str>) -> Result<Option<Principal>> {
        match authorization.and_then(bearer_token) {
            Some(token) => self.authenticate(token).await.map(Some),
            None => Ok(None),
        }
    }
}

/// Extract the token of a `Bearer` authorization value (scheme is case-insensitive).
pub fn bearer_token(authorization: &str) -> Option<&str> {
    let (scheme, token) = authorization.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Multi-issuer JWT authenticator.
pub struct Authenticator {
    resolver: DecoderResolver,
    factory: Arc<dyn PrincipalFactory>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Create an authenticator from a resolver and a principal factory.
    pub fn new(resolver: DecoderResolver, factory: Arc<dyn PrincipalFactory>) -> Self {
        Self { resolver, factory }
    }

    /// Build the authenticator described by `config`.
    ///
    /// `custom_factory` must be supplied exactly when the configuration selects
    /// [`PrincipalFactoryMode::Custom`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for invalid issuers or a factory mode
    /// mismatch.
    pub fn from_config(
        config: &SecurityConfig,
        custom_factory: Option<Arc<dyn PrincipalFactory>>,
    ) -> Result<Self> {
        let factory: Arc<dyn PrincipalFactory> = match (config.principal_factory, custom_factory) {
            (PrincipalFactoryMode::Default, None) => Arc::new(DefaultPrincipalFactory::new(
                Arc::new(ClaimPathAuthoritiesConverter),
            )),
            (PrincipalFactoryMode::Custom, Some(factory)) => factory,
            (PrincipalFactoryMode::Default, Some(_)) => {
                return Err(Error::configuration(
                    "A principal factory was supplied but principal_factory is \"default\"",
                ))
            },
            (PrincipalFactoryMode::Custom, None) => {
                return Err(Error::configuration(
                    "principal_factory is \"custom\" but no factory was supplied",
                ))
            },
        };

        let registry = Arc::new(IssuerRegistry::new(config.issuers.iter().cloned())?);
        let resolver = DecoderResolver::from_config(registry, config)?;
        Ok(Self::new(resolver, factory))
    }

    /// Decoder resolver used by this authenticator.
    pub fn resolver(&self) -> &DecoderResolver {
        &self.resolver
    }
}

#[async_trait]
impl TokenAuthenticator for Authenticator {
    async fn authenticate(&self, token: &str) -> Result<Principal> {
        let issuer = peek_issuer(token)?;
        let decoder = self.resolver.resolve(&issuer).await.map_err(|e| {
            tracing::warn!(issuer = %issuer, error = %e, "Issuer rejected");
            e
        })?;
        let decoded = decoder.decode(token).await.map_err(|e| {
            tracing::warn!(issuer = %issuer, error = %e, "Token rejected");
            e
        })?;
        let principal = self.factory.create(&decoded, decoder.issuer())?;

        tracing::trace!(
            name = %principal.name(),
            issuer = %principal.issuer,
            authorities = ?principal.authorities,
            "Authenticated principal"
        );
        Ok(principal)
    }
}
