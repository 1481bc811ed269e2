//! Configuration types for the resource server.
//!
//! The configuration is loaded once at startup (TOML file, string, or
//! programmatically) and is read-only afterwards. Environment variables can
//! override the global settings with [`SecurityConfig::apply_env`].
//!
//! # Example
//!
//! ```toml
//! permit_all = ["/favicon.ico", "/actuator/**"]
//! csrf = "default"
//! stateless_sessions = true
//!
//! [[issuers]]
//! location = "https://idp.example.com/realms/master"
//!
//! [issuers.authorities]
//! claims = ["realm_access.roles", "resource_access.client.roles"]
//! prefix = "ROLE_"
//! case = "upper"
//!
//! [[cors]]
//! path = "/api/**"
//! allowed_origins = ["https://localhost:4200"]
//!
//! [[access]]
//! pattern = "/introspect"
//! authority = "INTROSPECTION_CLIENT"
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Case normalization applied to derived authorities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseMode {
    /// Leave authorities as they appear in the token.
    #[default]
    Unchanged,
    /// Uppercase authorities.
    Upper,
    /// Lowercase authorities.
    Lower,
}

impl CaseMode {
    /// Apply this case mode to an authority.
    pub fn apply(self, authority: String) -> String {
        match self {
            Self::Unchanged => authority,
            Self::Upper => authority.to_uppercase(),
            Self::Lower => authority.to_lowercase(),
        }
    }
}

/// Rules mapping token claims to authorities for one issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthoritiesMapping {
    /// Dotted claim paths, processed in declared order.
    #[serde(default = "default_claim_paths")]
    pub claims: Vec<String>,

    /// Prefix prepended to every authority (before case normalization).
    #[serde(default)]
    pub prefix: String,

    /// Case normalization applied after prefixing.
    #[serde(default)]
    pub case: CaseMode,
}

impl Default for AuthoritiesMapping {
    fn default() -> Self {
        Self {
            claims: default_claim_paths(),
            prefix: String::new(),
            case: CaseMode::Unchanged,
        }
    }
}

/// Configuration of one trusted issuer.
///
/// Identity of an issuer is its `location`, which must equal the `iss` claim of
/// the tokens it emits (a trailing slash is ignored).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuerConfig {
    /// Issuer URL.
    pub location: String,

    /// Explicit JWKS URI. When absent, OIDC discovery on `location` provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// Accepted audiences. Empty disables the audience check.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,

    /// Accepted signature algorithms.
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<String>,

    /// Claim used as the principal name.
    #[serde(default = "default_username_claim")]
    pub username_claim: String,

    /// Clock skew tolerance in seconds.
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,

    /// Authorities mapping rules.
    #[serde(default)]
    pub authorities: AuthoritiesMapping,
}

impl IssuerConfig {
    /// Create an issuer configuration with default mapping rules.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            jwks_uri: None,
            audiences: Vec::new(),
            algorithms: default_algorithms(),
            username_claim: default_username_claim(),
            leeway_secs: default_leeway(),
            authorities: AuthoritiesMapping::default(),
        }
    }

    /// Set the claim paths authorities are read from.
    pub fn with_claims<I, S>(mut self, claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorities.claims = claims.into_iter().map(Into::into).collect();
        self
    }

    /// Set the authority prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.authorities.prefix = prefix.into();
        self
    }

    /// Set the case normalization.
    pub fn with_case(mut self, case: CaseMode) -> Self {
        self.authorities.case = case;
        self
    }

    /// Set an explicit JWKS URI, skipping discovery.
    pub fn with_jwks_uri(mut self, jwks_uri: impl Into<String>) -> Self {
        self.jwks_uri = Some(jwks_uri.into());
        self
    }

    /// Set the accepted audiences.
    pub fn with_audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    /// Set the accepted signature algorithms.
    pub fn with_algorithms<I, S>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.algorithms = algorithms.into_iter().map(Into::into).collect();
        self
    }

    /// Set the claim used as principal name.
    pub fn with_username_claim(mut self, claim: impl Into<String>) -> Self {
        self.username_claim = claim.into();
        self
    }

    /// Set the clock skew tolerance.
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway_secs = seconds;
        self
    }

    /// Registry key for this issuer.
    pub fn key(&self) -> &str {
        normalize_location(&self.location)
    }

    /// URL of the OIDC discovery document.
    pub fn discovery_uri(&self) -> String {
        format!(
            "{}/.well-known/openid-configuration",
            normalize_location(&self.location)
        )
    }
}

/// Normalize an issuer location or `iss` claim for registry lookups.
pub fn normalize_location(location: &str) -> &str {
    location.trim_end_matches('/')
}

/// CORS policy registered for one path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorsPolicy {
    /// Path pattern the policy applies to.
    #[serde(default = "default_cors_path")]
    pub path: String,

    /// Allowed origins (`*` for any).
    #[serde(default = "wildcard")]
    pub allowed_origins: Vec<String>,

    /// Allowed methods (`*` for any).
    #[serde(default = "wildcard")]
    pub allowed_methods: Vec<String>,

    /// Allowed request headers (`*` for any).
    #[serde(default = "wildcard")]
    pub allowed_headers: Vec<String>,

    /// Headers exposed to scripts (`*` for any).
    #[serde(default = "wildcard")]
    pub exposed_headers: Vec<String>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            path: default_cors_path(),
            allowed_origins: wildcard(),
            allowed_methods: wildcard(),
            allowed_headers: wildcard(),
            exposed_headers: wildcard(),
        }
    }
}

/// CSRF protection mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsrfMode {
    /// No CSRF protection.
    Disable,
    /// Disabled when sessions are stateless, session-bound otherwise.
    #[default]
    Default,
    /// Token stored in the session.
    Session,
    /// Token stored in a cookie the client script cannot read.
    CookieHttpOnly,
    /// Token stored in a cookie readable by client script (SPA frameworks).
    CookieAccessibleFromJs,
}

impl std::str::FromStr for CsrfMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "disable" => Ok(Self::Disable),
            "default" => Ok(Self::Default),
            "session" => Ok(Self::Session),
            "cookie_http_only" => Ok(Self::CookieHttpOnly),
            "cookie_accessible_from_js" => Ok(Self::CookieAccessibleFromJs),
            other => Err(Error::configuration(format!("Unknown CSRF mode: {}", other))),
        }
    }
}

/// How principals are built from decoded tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalFactoryMode {
    /// Claims-to-authorities conversion followed by the default factory.
    #[default]
    Default,
    /// An application supplied factory receives the decoded token.
    Custom,
}

/// One configured access rule, evaluated top to bottom.
///
/// Exactly one of `permit_all`, `authority` or `any_authority` may be set.
/// A rule with none of them requires an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessRuleConfig {
    /// Path pattern.
    pub pattern: String,

    /// Allow anonymous access.
    #[serde(default)]
    pub permit_all: bool,

    /// Required authority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,

    /// Any of these authorities grants access.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_authority: Vec<String>,
}

/// Process-wide security configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Trusted issuers.
    #[serde(default)]
    pub issuers: Vec<IssuerConfig>,

    /// CORS policies. Empty disables CORS handling.
    #[serde(default)]
    pub cors: Vec<CorsPolicy>,

    /// Path patterns accessible without authentication.
    #[serde(default = "default_permit_all")]
    pub permit_all: Vec<String>,

    /// Ordered access rules applied after `permit_all`.
    #[serde(default)]
    pub access: Vec<AccessRuleConfig>,

    /// CSRF protection mode.
    #[serde(default)]
    pub csrf: CsrfMode,

    /// Whether the server keeps no session state.
    #[serde(default = "default_true")]
    pub stateless_sessions: bool,

    /// Principal construction mode.
    #[serde(default)]
    pub principal_factory: PrincipalFactoryMode,

    /// Timeout for discovery and JWKS requests, in seconds.
    #[serde(default = "default_key_fetch_timeout")]
    pub key_fetch_timeout_secs: u64,

    /// JWKS cache lifetime, in seconds.
    #[serde(default = "default_jwks_ttl")]
    pub jwks_cache_ttl_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            issuers: Vec::new(),
            cors: Vec::new(),
            permit_all: default_permit_all(),
            access: Vec::new(),
            csrf: CsrfMode::Default,
            stateless_sessions: true,
            principal_factory: PrincipalFactoryMode::Default,
            key_fetch_timeout_secs: default_key_fetch_timeout(),
            jwks_cache_ttl_secs: default_jwks_ttl(),
        }
    }
}

impl SecurityConfig {
    /// Create a configuration with defaults and no issuers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Into::into)
    }

    /// Add a trusted issuer.
    pub fn with_issuer(mut self, issuer: IssuerConfig) -> Self {
        self.issuers.push(issuer);
        self
    }

    /// Replace the permit-all patterns.
    pub fn with_permit_all<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permit_all = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Append an access rule requiring `authority` on `pattern`.
    pub fn with_authority_rule(
        mut self,
        pattern: impl Into<String>,
        authority: impl Into<String>,
    ) -> Self {
        self.access.push(AccessRuleConfig {
            pattern: pattern.into(),
            permit_all: false,
            authority: Some(authority.into()),
            any_authority: Vec::new(),
        });
        self
    }

    /// Add a CORS policy.
    pub fn with_cors(mut self, policy: CorsPolicy) -> Self {
        self.cors.push(policy);
        self
    }

    /// Set the CSRF mode.
    pub fn with_csrf(mut self, csrf: CsrfMode) -> Self {
        self.csrf = csrf;
        self
    }

    /// Set whether sessions are stateless.
    pub fn with_stateless_sessions(mut self, stateless: bool) -> Self {
        self.stateless_sessions = stateless;
        self
    }

    /// Set the principal construction mode.
    pub fn with_principal_factory(mut self, mode: PrincipalFactoryMode) -> Self {
        self.principal_factory = mode;
        self
    }

    /// Timeout for discovery and JWKS requests.
    pub fn key_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.key_fetch_timeout_secs)
    }

    /// JWKS cache lifetime.
    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_secs)
    }

    /// Apply overrides from the process environment.
    ///
    /// - `OAUTH2_ADDONS_PERMIT_ALL`: comma separated patterns
    /// - `OAUTH2_ADDONS_CSRF`: CSRF mode name
    /// - `OAUTH2_ADDONS_STATELESS_SESSIONS`: `true` or `false`
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(std::env::vars())
    }

    /// Apply overrides from an iterator of `(name, value)` pairs.
    pub fn apply_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "OAUTH2_ADDONS_PERMIT_ALL" => {
                    self.permit_all = value
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect();
                },
                "OAUTH2_ADDONS_CSRF" => {
                    self.csrf = value.parse()?;
                },
                "OAUTH2_ADDONS_STATELESS_SESSIONS" => {
                    self.stateless_sessions = value.trim().parse().map_err(|_| {
                        Error::configuration(format!(
                            "OAUTH2_ADDONS_STATELESS_SESSIONS must be true or false, got {}",
                            value
                        ))
                    })?;
                },
                _ => {},
            }
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_claim_paths() -> Vec<String> {
    vec!["realm_access.roles".to_string()]
}

fn default_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

fn default_username_claim() -> String {
    "sub".to_string()
}

fn default_leeway() -> u64 {
    60 // 1 minute
}

fn default_cors_path() -> String {
    "/**".to_string()
}

fn wildcard() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_permit_all() -> Vec<String> {
    [
        "/actuator/**",
        "/v3/api-docs/**",
        "/swagger-ui/**",
        "/swagger-ui.html",
        "/webjars/swagger-ui/**",
        "/favicon.ico",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_key_fetch_timeout() -> u64 {
    5
}

fn default_jwks_ttl() -> u64 {
    3600 // 1 hour
}
