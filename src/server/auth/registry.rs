//! Table of trusted issuers.
//!
//! The registry is built once from configuration and is immutable afterwards,
//! so it can be shared across threads behind an `Arc` without locking.

use super::authorities::validate_claim_path;
use super::config::{normalize_location, IssuerConfig};
use crate::error::{Error, Result};
use jsonwebtoken::Algorithm;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Issuer location → issuer configuration.
#[derive(Debug, Clone, Default)]
pub struct IssuerRegistry {
    issuers: HashMap<String, Arc<IssuerConfig>>,
}

impl IssuerRegistry {
    /// Build the registry, validating every issuer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when an issuer location is not a URL,
    /// two issuers share a location, a claim path is unparseable, or an
    /// algorithm name is unknown.
    pub fn new<I>(issuers: I) -> Result<Self>
    where
        I: IntoIterator<Item = IssuerConfig>,
    {
        let mut map = HashMap::new();

        for issuer in issuers {
            validate_issuer(&issuer)?;

            let key = issuer.key().to_string();
            if map.contains_key(&key) {
                return Err(Error::configuration(format!(
                    "Duplicate issuer location: {}",
                    issuer.location
                )));
            }
            map.insert(key, Arc::new(issuer));
        }

        tracing::info!(
            issuers = ?map.keys().collect::<Vec<_>>(),
            "Built issuer registry"
        );

        Ok(Self { issuers: map })
    }

    /// Look up the configuration for an `iss` claim.
    pub fn get(&self, issuer: &str) -> Option<&Arc<IssuerConfig>> {
        self.issuers.get(normalize_location(issuer))
    }

    /// Whether the issuer is trusted.
    pub fn contains(&self, issuer: &str) -> bool {
        self.get(issuer).is_some()
    }

    /// Registered issuer locations.
    pub fn locations(&self) -> Vec<&str> {
        self.issuers.values().map(|i| i.location.as_str()).collect()
    }

    /// Number of registered issuers.
    pub fn len(&self) -> usize {
        self.issuers.len()
    }

    /// Whether no issuer is registered.
    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }
}

fn validate_issuer(issuer: &IssuerConfig) -> Result<()> {
    url::Url::parse(&issuer.location).map_err(|e| {
        Error::configuration(format!(
            "Invalid issuer location {:?}: {}",
            issuer.location, e
        ))
    })?;

    if let Some(ref jwks_uri) = issuer.jwks_uri {
        url::Url::parse(jwks_uri).map_err(|e| {
            Error::configuration(format!("Invalid JWKS URI {:?}: {}", jwks_uri, e))
        })?;
    }

    for path in &issuer.authorities.claims {
        validate_claim_path(path)?;
    }

    if issuer.algorithms.is_empty() {
        return Err(Error::configuration(format!(
            "Issuer {} accepts no algorithm",
            issuer.location
        )));
    }
    parse_algorithms(&issuer.algorithms)?;

    Ok(())
}

/// Parse configured algorithm names.
pub(crate) fn parse_algorithms(names: &[String]) -> Result<Vec<Algorithm>> {
    names
        .iter()
        .map(|name| {
            Algorithm::from_str(name)
                .map_err(|_| Error::configuration(format!("Unknown algorithm: {}", name)))
        })
        .collect()
}
