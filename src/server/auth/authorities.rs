//! Claims-to-authorities conversion.
//!
//! Authorities are derived from decoded token claims with the issuer's
//! [`AuthoritiesMapping`](super::config::AuthoritiesMapping): every claim path
//! is walked through the nested claims, the strings found there are prefixed
//! and case-normalized, and the union over all paths is returned.
//!
//! ```rust
//! use oauth2_addons::server::auth::{AuthoritiesConverter, ClaimPathAuthoritiesConverter, IssuerConfig};
//! use serde_json::json;
//!
//! let issuer = IssuerConfig::new("https://idp.example.com/realms/master");
//! let claims = json!({"realm_access": {"roles": ["USER", "AUTHOR"]}});
//!
//! let authorities = ClaimPathAuthoritiesConverter.convert(&claims, &issuer);
//! assert!(authorities.contains("USER"));
//! assert!(authorities.contains("AUTHOR"));
//! ```

use super::config::IssuerConfig;
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::BTreeSet;

/// Deduplicated set of authority labels.
pub type Authorities = BTreeSet<String>;

/// Converts decoded claims into authorities for one issuer.
///
/// Implementations must be pure: the result depends only on the claims and
/// the issuer configuration.
pub trait AuthoritiesConverter: Send + Sync {
    /// Derive the authorities granted by `claims`.
    fn convert(&self, claims: &Value, issuer: &IssuerConfig) -> Authorities;
}

impl<F> AuthoritiesConverter for F
where
    F: Fn(&Value, &IssuerConfig) -> Authorities + Send + Sync,
{
    fn convert(&self, claims: &Value, issuer: &IssuerConfig) -> Authorities {
        self(claims, issuer)
    }
}

/// Default converter reading authorities from dotted claim paths.
///
/// - a path resolving to an array contributes each string element
/// - a path resolving to a string contributes that single string (no splitting)
/// - a missing path, or any other value, contributes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimPathAuthoritiesConverter;

impl AuthoritiesConverter for ClaimPathAuthoritiesConverter {
    fn convert(&self, claims: &Value, issuer: &IssuerConfig) -> Authorities {
        let mapping = &issuer.authorities;
        mapping
            .claims
            .iter()
            .flat_map(|path| candidates(claims, path))
            .map(|candidate| mapping.case.apply(format!("{}{}", mapping.prefix, candidate)))
            .collect()
    }
}

/// Strings found at `path` in `claims`.
fn candidates<'a>(claims: &'a Value, path: &str) -> Vec<&'a str> {
    match resolve_path(claims, path) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => vec![s.as_str()],
        _ => Vec::new(),
    }
}

/// Walk `claims` by the dot separated segments of `path`.
///
/// A leading `$.` is accepted so JSON-path style entries resolve the same way.
pub fn resolve_path<'a>(claims: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    path.split('.')
        .try_fold(claims, |current, segment| current.as_object()?.get(segment))
}

/// Check that a claim path is usable: non-empty with no empty segment.
pub fn validate_claim_path(path: &str) -> Result<()> {
    let trimmed = path.strip_prefix("$.").unwrap_or(path);
    if trimmed.is_empty() || trimmed.split('.').any(|segment| segment.trim().is_empty()) {
        return Err(Error::configuration(format!(
            "Unparseable claim path: {:?}",
            path
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::auth::config::CaseMode;
    use serde_json::json;

    fn issuer(claims: &[&str], prefix: &str, case: CaseMode) -> IssuerConfig {
        IssuerConfig::new("https://idp.example.com")
            .with_claims(claims.iter().copied())
            .with_prefix(prefix)
            .with_case(case)
    }

    fn set(items: &[&str]) -> Authorities {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_realm_roles() {
        let claims = json!({"realm_access": {"roles": ["USER", "AUTHOR"]}});
        let authorities = ClaimPathAuthoritiesConverter.convert(
            &claims,
            &issuer(&["realm_access.roles"], "", CaseMode::Unchanged),
        );
        assert_eq!(authorities, set(&["USER", "AUTHOR"]));
    }

    #[test]
    fn test_prefix_then_case() {
        let claims = json!({"roles": ["admin"]});
        let authorities = ClaimPathAuthoritiesConverter.convert(
            &claims,
            &issuer(&["roles"], "role_", CaseMode::Upper),
        );
        assert_eq!(authorities, set(&["ROLE_ADMIN"]));

        let authorities = ClaimPathAuthoritiesConverter.convert(
            &claims,
            &issuer(&["roles"], "SCOPE_", CaseMode::Lower),
        );
        assert_eq!(authorities, set(&["scope_admin"]));
    }

    #[test]
    fn test_single_string_not_split() {
        let claims = json!({"scope": "read write"});
        let authorities = ClaimPathAuthoritiesConverter.convert(
            &claims,
            &issuer(&["scope"], "", CaseMode::Unchanged),
        );
        assert_eq!(authorities, set(&["read write"]));
    }

    #[test]
    fn test_union_across_paths_deduplicates() {
        let claims = json!({
            "realm_access": {"roles": ["USER", "NICE"]},
            "resource_access": {"api": {"roles": ["NICE", "AUTHOR"]}},
            "permissions": "USER"
        });
        let authorities = ClaimPathAuthoritiesConverter.convert(
            &claims,
            &issuer(
                &["realm_access.roles", "resource_access.api.roles", "permissions"],
                "",
                CaseMode::Unchanged,
            ),
        );
        assert_eq!(authorities, set(&["USER", "NICE", "AUTHOR"]));
    }

    #[test]
    fn test_missing_or_malformed_paths_contribute_nothing() {
        let claims = json!({
            "realm_access": "not-an-object",
            "numbers": [1, 2, 3],
            "mixed": ["A", 1, null, "B"],
            "flag": true
        });
        let authorities = ClaimPathAuthoritiesConverter.convert(
            &claims,
            &issuer(
                &["realm_access.roles", "absent", "numbers", "mixed", "flag"],
                "",
                CaseMode::Unchanged,
            ),
        );
        assert_eq!(authorities, set(&["A", "B"]));
    }

    #[test]
    fn test_non_object_claims() {
        let authorities = ClaimPathAuthoritiesConverter
            .convert(&json!(null), &issuer(&["roles"], "", CaseMode::Upper));
        assert!(authorities.is_empty());
    }

    #[test]
    fn test_json_path_prefix() {
        let claims = json!({"realm_access": {"roles": ["USER"]}});
        assert_eq!(
            resolve_path(&claims, "$.realm_access.roles"),
            Some(&json!(["USER"]))
        );
    }

    #[test]
    fn test_closure_converter() {
        let converter = |_: &Value, _: &IssuerConfig| set(&["FIXED"]);
        let authorities = converter.convert(&json!({}), &IssuerConfig::new("https://a"));
        assert_eq!(authorities, set(&["FIXED"]));
    }

    #[test]
    fn test_validate_claim_path() {
        assert!(validate_claim_path("realm_access.roles").is_ok());
        assert!(validate_claim_path("$.realm_access.roles").is_ok());
        assert!(validate_claim_path("").is_err());
        assert!(validate_claim_path("a..b").is_err());
        assert!(validate_claim_path(".a").is_err());
        assert!(validate_claim_path("a.").is_err());
    }
}
