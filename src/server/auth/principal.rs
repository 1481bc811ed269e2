//! Authenticated principal and the factories that build it.
//!
//! [`Principal`] is the only authentication type application code should
//! interact with. It is built from a [`DecodedToken`] either by the
//! [`DefaultPrincipalFactory`] (claims → authorities conversion, then
//! composition) or by an application supplied [`PrincipalFactory`], never both.
//!
//! ```rust
//! use oauth2_addons::server::auth::Principal;
//!
//! fn handle(principal: &Principal) -> Result<String, oauth2_addons::Error> {
//!     principal.require_authority("NICE")?;
//!     Ok(format!("Dear {}!", principal.name()))
//! }
//! ```

use super::authorities::{Authorities, AuthoritiesConverter};
use super::config::IssuerConfig;
use super::jwt_validator::DecodedToken;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Authenticated identity exposed to request handlers.
///
/// Immutable once built. Owned by the request that created it, or by a
/// session store in the multi-tenant client case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal name (subject or the issuer's configured username claim).
    pub name: String,

    /// Issuer that authenticated this principal.
    pub issuer: String,

    /// Granted authorities.
    pub authorities: Authorities,

    /// Granted OAuth2 scopes (`scope` / `scp` claims).
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Raw token claims.
    #[serde(default)]
    pub claims: Map<String, Value>,

    /// Original bearer token, for forwarding to downstream services.
    /// Never serialized.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Token expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Principal {
    /// Compose a principal from a decoded token and its authorities.
    ///
    /// The name is the token subject.
    pub fn build(token: &DecodedToken, authorities: Authorities) -> Self {
        Self {
            name: token.subject.clone(),
            issuer: token.issuer.clone(),
            authorities,
            scopes: parse_scopes(&token.claims),
            claims: token.claims.as_object().cloned().unwrap_or_default(),
            token: Some(token.raw.clone()),
            expires_at: Some(token.expires_at),
        }
    }

    /// Create a principal with no claims, for tests and programmatic use.
    pub fn new(name: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            issuer: issuer.into(),
            authorities: Authorities::new(),
            scopes: Vec::new(),
            claims: Map::new(),
            token: None,
            expires_at: None,
        }
    }

    /// Add authorities.
    pub fn with_authorities<I, S>(mut self, authorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorities
            .extend(authorities.into_iter().map(Into::into));
        self
    }

    /// Add a claim.
    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    /// Set the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Use the string value of `claim` as name, if present.
    pub fn with_name_from_claim(mut self, claim: &str) -> Self {
        if let Some(name) = self.claims.get(claim).and_then(Value::as_str) {
            self.name = name.to_string();
        }
        self
    }

    /// Principal name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subject claim, if any.
    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").and_then(Value::as_str)
    }

    /// Get a typed claim value.
    pub fn claim<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.claims
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Email address (`email`, falling back to `preferred_username`).
    pub fn email(&self) -> Option<&str> {
        self.claims
            .get("email")
            .or_else(|| self.claims.get("preferred_username"))
            .and_then(Value::as_str)
    }

    /// Check for an authority.
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.contains(authority)
    }

    /// Check for any of the authorities.
    pub fn has_any_authority<S: AsRef<str>>(&self, authorities: &[S]) -> bool {
        authorities.iter().any(|a| self.has_authority(a.as_ref()))
    }

    /// Check for a scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Require an authority.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Forbidden`] when the authority is missing.
    pub fn require_authority(&self, authority: &str) -> Result<()> {
        if self.has_authority(authority) {
            Ok(())
        } else {
            Err(Error::forbidden(authority))
        }
    }

    /// Whether the token has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| exp < Utc::now())
    }
}

/// Builds principals from decoded tokens.
///
/// Implement this to take over principal construction entirely; the
/// authorities converter is then bypassed and the factory receives the
/// decoded token as is.
pub trait PrincipalFactory: Send + Sync {
    /// Build the principal for `token`, issued by `issuer`.
    fn create(&self, token: &DecodedToken, issuer: &IssuerConfig) -> Result<Principal>;
}

impl<F> PrincipalFactory for F
where
    F: Fn(&DecodedToken, &IssuerConfig) -> Result<Principal> + Send + Sync,
{
    fn create(&self, token: &DecodedToken, issuer: &IssuerConfig) -> Result<Principal> {
        self(token, issuer)
    }
}

/// Converter-backed factory used unless an application factory is configured.
#[derive(Clone)]
pub struct DefaultPrincipalFactory {
    converter: Arc<dyn AuthoritiesConverter>,
}

impl DefaultPrincipalFactory {
    /// Create a factory using `converter` to derive authorities.
    pub fn new(converter: Arc<dyn AuthoritiesConverter>) -> Self {
        Self { converter }
    }
}

impl std::fmt::Debug for DefaultPrincipalFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultPrincipalFactory").finish_non_exhaustive()
    }
}

impl PrincipalFactory for DefaultPrincipalFactory {
    fn create(&self, token: &DecodedToken, issuer: &IssuerConfig) -> Result<Principal> {
        let authorities = self.converter.convert(&token.claims, issuer);
        Ok(Principal::build(token, authorities).with_name_from_claim(&issuer.username_claim))
    }
}

/// Parse scopes from token claims.
///
/// Handles both space-separated string format and array format.
fn parse_scopes(claims: &Value) -> Vec<String> {
    let scope = claims.get("scope").or_else(|| claims.get("scp"));
    match scope {
        Some(Value::String(s)) => s.split_whitespace().map(String::from).collect(),
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}
