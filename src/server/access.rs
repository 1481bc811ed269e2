//! Inbound access policy: path rules, CSRF strategy and CORS policies.
//!
//! Rules are compiled once at startup from [`SecurityConfig`]. Evaluation
//! order is fixed: permit-all patterns first, then the configured access rules
//! top to bottom; a path matching nothing requires an authenticated principal.
//!
//! Path patterns use Ant syntax:
//!
//! | pattern | matches |
//! |---------|---------|
//! | `?`     | one character within a segment |
//! | `*`     | any characters within a segment |
//! | `**`    | any number of segments |
//!
//! `/api/**` matches `/api` itself as well as everything below it.

use crate::error::{Error, Result};
use crate::server::auth::config::{AccessRuleConfig, CorsPolicy, CsrfMode, SecurityConfig};
use crate::server::auth::Principal;
use regex::Regex;

/// Compiled Ant-style path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    /// Compile `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the pattern does not start with `/`.
    pub fn new(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(Error::configuration(format!(
                "Path pattern must start with '/': {:?}",
                pattern
            )));
        }

        let chars: Vec<char> = pattern.chars().collect();
        let mut re = String::with_capacity(pattern.len() * 2);
        re.push('^');

        let mut i = 0;
        while i < chars.len() {
            let double_star = chars.get(i + 1) == Some(&'*') && chars.get(i + 2) == Some(&'*');
            let segment_end = matches!(chars.get(i + 3), None | Some('/'));
            match chars[i] {
                '/' if double_star && segment_end => {
                    re.push_str("(?:/.*)?");
                    i += 3;
                },
                '*' if chars.get(i + 1) == Some(&'*') => {
                    re.push_str(".*");
                    i += 2;
                },
                '*' => {
                    re.push_str("[^/]*");
                    i += 1;
                },
                '?' => {
                    re.push_str("[^/]");
                    i += 1;
                },
                c => {
                    re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
                    i += 1;
                },
            }
        }
        re.push('$');

        let regex = Regex::new(&re).map_err(|e| {
            Error::configuration(format!("Invalid path pattern {:?}: {}", pattern, e))
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Whether `path` matches.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Pattern as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// What a path requires from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Anonymous access allowed.
    PermitAll,
    /// Any valid principal.
    Authenticated,
    /// A principal holding this authority.
    HasAuthority(String),
    /// A principal holding at least one of these authorities.
    HasAnyAuthority(Vec<String>),
}

impl Requirement {
    /// Check `principal` against this requirement.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] when a principal is required but absent
    /// - [`Error::Forbidden`] when the principal lacks the authority
    pub fn check(&self, principal: Option<&Principal>) -> Result<()> {
        let principal = match (self, principal) {
            (Self::PermitAll, _) => return Ok(()),
            (_, None) => return Err(Error::Unauthorized),
            (_, Some(principal)) => principal,
        };

        match self {
            Self::HasAuthority(authority) => principal.require_authority(authority),
            Self::HasAnyAuthority(authorities)
                if !principal.has_any_authority(authorities.as_slice()) =>
            {
                Err(Error::forbidden(format!("any of {}", authorities.join(", "))))
            },
            _ => Ok(()),
        }
    }
}

/// One compiled access rule.
#[derive(Debug, Clone)]
pub struct AccessRule {
    /// Path pattern.
    pub pattern: PathPattern,
    /// Requirement for matching paths.
    pub requirement: Requirement,
}

impl AccessRule {
    /// Compile a configured rule.
    pub fn compile(config: &AccessRuleConfig) -> Result<Self> {
        let requirement = match (
            config.permit_all,
            config.authority.as_ref(),
            config.any_authority.is_empty(),
        ) {
            (false, None, true) => Requirement::Authenticated,
            (true, None, true) => Requirement::PermitAll,
            (false, Some(authority), true) => Requirement::HasAuthority(authority.clone()),
            (false, None, false) => Requirement::HasAnyAuthority(config.any_authority.clone()),
            _ => {
                return Err(Error::configuration(format!(
                    "Access rule {:?} sets more than one of permit_all, authority, any_authority",
                    config.pattern
                )))
            },
        };

        Ok(Self {
            pattern: PathPattern::new(&config.pattern)?,
            requirement,
        })
    }
}

/// Ordered access rules.
#[derive(Debug, Clone)]
pub struct AccessRules {
    permit_all: Vec<PathPattern>,
    rules: Vec<AccessRule>,
}

impl AccessRules {
    /// Compile the permit-all patterns and access rules of `config`.
    pub fn compile(config: &SecurityConfig) -> Result<Self> {
        let permit_all = config
            .permit_all
            .iter()
            .map(|p| PathPattern::new(p))
            .collect::<Result<Vec<_>>>()?;
        let rules = config
            .access
            .iter()
            .map(AccessRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { permit_all, rules })
    }

    /// Requirement for `path`.
    pub fn requirement(&self, path: &str) -> Requirement {
        if self.is_permit_all(path) {
            return Requirement::PermitAll;
        }
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(path))
            .map_or(Requirement::Authenticated, |rule| rule.requirement.clone())
    }

    /// Whether `path` matches a permit-all pattern.
    pub fn is_permit_all(&self, path: &str) -> bool {
        self.permit_all.iter().any(|p| p.matches(path))
    }

    /// Check access to `path`.
    pub fn check(&self, path: &str, principal: Option<&Principal>) -> Result<()> {
        self.requirement(path).check(principal)
    }
}

/// Cookie holding the CSRF token.
pub const CSRF_COOKIE_NAME: &str = "XSRF-TOKEN";

/// Header carrying the CSRF token back.
pub const CSRF_HEADER_NAME: &str = "X-XSRF-TOKEN";

/// CSRF token repository strategy handed to the CSRF collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfStrategy {
    /// No CSRF protection.
    Disabled,
    /// Token bound to the server-side session.
    Session,
    /// Token stored in the [`CSRF_COOKIE_NAME`] cookie.
    Cookie {
        /// Whether the cookie is hidden from client script.
        http_only: bool,
    },
}

impl CsrfStrategy {
    /// Whether CSRF protection is active.
    pub fn is_enabled(self) -> bool {
        self != Self::Disabled
    }
}

impl CsrfMode {
    /// Select the token repository strategy.
    ///
    /// `Default` is disabled with stateless sessions and session-bound otherwise.
    pub fn resolve(self, stateless_sessions: bool) -> CsrfStrategy {
        match self {
            Self::Disable => CsrfStrategy::Disabled,
            Self::Default if stateless_sessions => CsrfStrategy::Disabled,
            Self::Default | Self::Session => CsrfStrategy::Session,
            Self::CookieHttpOnly => CsrfStrategy::Cookie { http_only: true },
            Self::CookieAccessibleFromJs => CsrfStrategy::Cookie { http_only: false },
        }
    }
}

/// CORS policies keyed by path pattern, first match wins.
#[derive(Debug, Clone, Default)]
pub struct CorsPolicies {
    policies: Vec<(PathPattern, CorsPolicy)>,
}

impl CorsPolicies {
    /// Compile the CORS policies of `config`.
    pub fn compile(config: &SecurityConfig) -> Result<Self> {
        let policies = config
            .cors
            .iter()
            .map(|policy| Ok((PathPattern::new(&policy.path)?, policy.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { policies })
    }

    /// Policy applying to `path`, if any.
    pub fn resolve(&self, path: &str) -> Option<&CorsPolicy> {
        self.policies
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, policy)| policy)
    }

    /// Whether no policy is configured.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(feature = "http-layer")]
impl CorsPolicy {
    /// Build the `tower_http` layer enforcing this policy.
    ///
    /// A list containing `*` allows anything.
    pub fn to_layer(&self) -> Result<tower_http::cors::CorsLayer> {
        use http::{HeaderName, HeaderValue, Method};
        use tower_http::cors::{Any, CorsLayer};

        fn is_any(values: &[String]) -> bool {
            values.iter().any(|v| v == "*")
        }

        fn parse<T, E: std::fmt::Display>(
            values: &[String],
            what: &str,
            f: impl Fn(&str) -> std::result::Result<T, E>,
        ) -> Result<Vec<T>> {
            values
                .iter()
                .map(|v| {
                    f(v).map_err(|e| Error::configuration(format!("Invalid CORS {} {:?}: {}", what, v, e)))
                })
                .collect()
        }

        let mut layer = CorsLayer::new();

        layer = if is_any(&self.allowed_origins) {
            layer.allow_origin(Any)
        } else {
            layer.allow_origin(parse(&self.allowed_origins, "origin", HeaderValue::from_str)?)
        };
        layer = if is_any(&self.allowed_methods) {
            layer.allow_methods(Any)
        } else {
            layer.allow_methods(parse(&self.allowed_methods, "method", |m| {
                Method::from_bytes(m.as_bytes())
            })?)
        };
        layer = if is_any(&self.allowed_headers) {
            layer.allow_headers(Any)
        } else {
            layer.allow_headers(parse(&self.allowed_headers, "header", |h| {
                HeaderName::from_bytes(h.as_bytes())
            })?)
        };
        layer = if is_any(&self.exposed_headers) {
            layer.expose_headers(Any)
        } else {
            layer.expose_headers(parse(&self.exposed_headers, "header", |h| {
                HeaderName::from_bytes(h.as_bytes())
            })?)
        };

        Ok(layer)
    }
}
