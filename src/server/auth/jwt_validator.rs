//! Multi-issuer JWT decoding.
//!
//! Tokens are handled in two phases. The unverified payload is read first to
//! find the `iss` claim; the [`DecoderResolver`] then picks (or lazily builds)
//! the [`JwtDecoder`] of that trusted issuer, which verifies the signature and
//! standard claims with the issuer's published keys.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DecoderResolver                          │
//! │  IssuerRegistry (read-only)                                 │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │     issuer -> OnceCell<JwtDecoder> (lazy, cached)    │   │
//! │  │  ┌─────────────────┐  ┌─────────────────┐           │   │
//! │  │  │ realms/master   │  │ accounts.org    │  ...      │   │
//! │  │  │ jwks: k1, k2    │  │ jwks: k1        │           │   │
//! │  │  └─────────────────┘  └─────────────────┘           │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use oauth2_addons::server::auth::{DecoderResolver, IssuerConfig, IssuerRegistry};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(IssuerRegistry::new(vec![
//!     IssuerConfig::new("https://idp.example.com/realms/master"),
//! ])?);
//! let resolver = DecoderResolver::new(registry)?;
//!
//! let decoded = resolver.decode(&token).await?;
//! println!("{} from {}", decoded.subject, decoded.issuer);
//! ```

use super::config::{IssuerConfig, SecurityConfig};
use super::registry::{parse_algorithms, IssuerRegistry};
use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jsonwebtoken::jwk::{Jwk, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell, RwLock};

/// Default timeout for discovery and JWKS requests.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default JWKS cache lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Minimum delay between two refreshes triggered by an unknown key ID.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// A token whose signature and standard claims have been verified.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    /// `iss` claim.
    pub issuer: String,
    /// `sub` claim.
    pub subject: String,
    /// All claims of the token body.
    pub claims: Value,
    /// `exp` claim.
    pub expires_at: DateTime<Utc>,
    /// The encoded token.
    pub raw: String,
}

/// Read the `iss` claim of a token without verifying it.
///
/// Only used to select the decoder; nothing else from the unverified payload
/// is trusted.
pub fn peek_issuer(token: &str) -> Result<String> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(Error::invalid_token("Malformed token")),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| Error::invalid_token("Malformed token payload"))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|_| Error::invalid_token("Malformed token payload"))?;

    claims
        .get("iss")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| Error::invalid_token("Token missing issuer claim"))
}

/// Cached signing keys of one issuer.
struct CachedJwks {
    keys: HashMap<Option<String>, DecodingKey>,
    fetched_at: Instant,
    ttl: Duration,
}

impl std::fmt::Debug for CachedJwks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedJwks")
            .field("keys_count", &self.keys.len())
            .field("fetched_at", &self.fetched_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CachedJwks {
    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > self.ttl
    }

    fn key(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self.keys.get(&Some(kid.to_string())).cloned(),
            // Without a key ID only an unambiguous key set can be used
            None if self.keys.len() == 1 => self.keys.values().next().cloned(),
            None => None,
        }
    }
}

/// Verifies tokens of a single issuer.
///
/// Signing keys are fetched from the issuer's JWKS endpoint, cached for the
/// configured TTL and refreshed when a token references an unknown key ID.
/// Concurrent refreshes are collapsed into one request.
pub struct JwtDecoder {
    issuer: Arc<IssuerConfig>,
    jwks_uri: String,
    algorithms: Vec<Algorithm>,
    http_client: reqwest::Client,
    fetch_timeout: Duration,
    cache_ttl: Duration,
    jwks: RwLock<Option<CachedJwks>>,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for JwtDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtDecoder")
            .field("issuer", &self.issuer.location)
            .field("jwks_uri", &self.jwks_uri)
            .field("algorithms", &self.algorithms)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

/// Subset of the OIDC discovery document we need.
#[derive(Debug, Deserialize)]
struct OidcConfiguration {
    issuer: String,
    jwks_uri: String,
}

/// JWKS document, parsed key by key so one unsupported key does not hide the others.
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Value>,
}

impl JwtDecoder {
    /// Build a decoder for `issuer`.
    ///
    /// When the issuer has no explicit `jwks_uri`, the OIDC discovery document
    /// is fetched and its `issuer` must match the configured location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] when discovery fails or times out.
    pub async fn build(
        issuer: Arc<IssuerConfig>,
        http_client: reqwest::Client,
        fetch_timeout: Duration,
        cache_ttl: Duration,
    ) -> Result<Self> {
        let algorithms = parse_algorithms(&issuer.algorithms)?;

        let jwks_uri = match issuer.jwks_uri {
            Some(ref uri) => uri.clone(),
            None => discover_jwks_uri(&http_client, &issuer, fetch_timeout).await?,
        };

        tracing::debug!(issuer = %issuer.location, jwks_uri = %jwks_uri, "Built JWT decoder");

        Ok(Self {
            issuer,
            jwks_uri,
            algorithms,
            http_client,
            fetch_timeout,
            cache_ttl,
            jwks: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Issuer configuration of this decoder.
    pub fn issuer(&self) -> &Arc<IssuerConfig> {
        &self.issuer
    }

    /// JWKS endpoint used by this decoder.
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] if:
    /// - Token format is invalid or the algorithm is not accepted
    /// - Signature verification fails
    /// - Token is expired or not yet valid
    /// - Issuer or audience doesn't match
    /// - Signing keys cannot be fetched
    pub async fn decode(&self, token: &str) -> Result<DecodedToken> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::invalid_token(format!("Invalid token header: {}", e)))?;

        if !self.algorithms.contains(&header.alg) {
            return Err(Error::invalid_token(format!(
                "Algorithm {:?} not accepted",
                header.alg
            )));
        }

        let key = self.get_key(header.kid.as_deref()).await?;

        let location = self.issuer.key();
        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[location.to_string(), format!("{}/", location)]);
        if self.issuer.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(self.issuer.audiences.as_slice());
        }
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = self.issuer.leeway_secs;

        let token_data =
            jsonwebtoken::decode::<Value>(token, &key, &validation).map_err(|e| {
                let msg = match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => "Token expired",
                    jsonwebtoken::errors::ErrorKind::InvalidIssuer => "Invalid issuer",
                    jsonwebtoken::errors::ErrorKind::InvalidAudience => "Invalid audience",
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => "Invalid signature",
                    jsonwebtoken::errors::ErrorKind::ImmatureSignature => "Token not yet valid",
                    jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_) => {
                        "Token missing required claim"
                    },
                    _ => "Token validation failed",
                };
                Error::invalid_token(msg)
            })?;

        let claims = token_data.claims;
        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .unwrap_or(&self.issuer.location)
            .to_string();
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::invalid_token("Token missing subject claim"))?
            .to_string();
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_i64)
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
            .ok_or_else(|| Error::invalid_token("Invalid expiry claim"))?;

        Ok(DecodedToken {
            issuer,
            subject,
            claims,
            expires_at,
            raw: token.to_string(),
        })
    }

    /// Get a key from cache, fetching JWKS if needed.
    async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey> {
        let requested_at = Instant::now();

        {
            let cache = self.jwks.read().await;
            if let Some(ref cached) = *cache {
                if !cached.is_expired() {
                    if let Some(key) = cached.key(kid) {
                        return Ok(key);
                    }
                }
            }
        }

        // Cache miss or expired - fetch JWKS
        self.refresh(requested_at).await?;

        let cache = self.jwks.read().await;
        cache
            .as_ref()
            .and_then(|cached| cached.key(kid))
            .ok_or_else(|| match kid {
                Some(kid) => Error::invalid_token(format!("Unknown key ID: {}", kid)),
                None => Error::invalid_token("Token missing key ID (kid)"),
            })
    }

    /// Refresh the key set unless another request already did since `requested_at`.
    async fn refresh(&self, requested_at: Instant) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        {
            let cache = self.jwks.read().await;
            if let Some(ref cached) = *cache {
                let refreshed_meanwhile = cached.fetched_at >= requested_at;
                let throttled =
                    !cached.is_expired() && cached.fetched_at.elapsed() < MIN_REFRESH_INTERVAL;
                if refreshed_meanwhile || throttled {
                    return Ok(());
                }
            }
        }

        let keys = self.fetch_jwks().await?;
        let mut cache = self.jwks.write().await;
        *cache = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
            ttl: self.cache_ttl,
        });
        Ok(())
    }

    /// Fetch and parse the JWKS document.
    async fn fetch_jwks(&self) -> Result<HashMap<Option<String>, DecodingKey>> {
        tracing::debug!(jwks_uri = %self.jwks_uri, "Fetching JWKS");

        let jwks: JwksResponse =
            fetch_json(&self.http_client, &self.jwks_uri, self.fetch_timeout, "JWKS").await?;

        let mut keys = HashMap::new();
        for value in jwks.keys {
            let jwk: Jwk = match serde_json::from_value(value) {
                Ok(jwk) => jwk,
                Err(err) => {
                    tracing::warn!(jwks_uri = %self.jwks_uri, error = %err, "Skipping unsupported JWK");
                    continue;
                },
            };
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                continue;
            }
            match DecodingKey::from_jwk(&jwk) {
                Ok(key) => {
                    keys.insert(jwk.common.key_id.clone(), key);
                },
                Err(err) => {
                    tracing::warn!(kid = ?jwk.common.key_id, error = %err, "Failed to parse JWK");
                },
            }
        }

        if keys.is_empty() {
            return Err(Error::invalid_token("No valid keys found in JWKS"));
        }

        tracing::info!(jwks_uri = %self.jwks_uri, keys_count = keys.len(), "Cached JWKS keys");
        Ok(keys)
    }

    /// Number of cached keys.
    pub async fn cached_key_count(&self) -> usize {
        self.jwks
            .read()
            .await
            .as_ref()
            .map_or(0, |cached| cached.keys.len())
    }
}

async fn discover_jwks_uri(
    http_client: &reqwest::Client,
    issuer: &IssuerConfig,
    fetch_timeout: Duration,
) -> Result<String> {
    let discovery_uri = issuer.discovery_uri();
    tracing::debug!(discovery_uri = %discovery_uri, "Fetching OIDC configuration");

    let configuration: OidcConfiguration =
        fetch_json(http_client, &discovery_uri, fetch_timeout, "OIDC configuration").await?;

    if super::config::normalize_location(&configuration.issuer) != issuer.key() {
        return Err(Error::invalid_token(format!(
            "Discovery document issuer {} does not match {}",
            configuration.issuer, issuer.location
        )));
    }
    Ok(configuration.jwks_uri)
}

/// GET a JSON document, bounded by `timeout`. Failures are token failures.
async fn fetch_json<T: serde::de::DeserializeOwned>(
    http_client: &reqwest::Client,
    uri: &str,
    timeout: Duration,
    what: &str,
) -> Result<T> {
    let request = async {
        let response = http_client
            .get(uri)
            .send()
            .await
            .map_err(|e| Error::invalid_token(format!("Failed to fetch {}: {}", what, e)))?;

        if !response.status().is_success() {
            return Err(Error::invalid_token(format!(
                "{} endpoint returned status {}",
                what,
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::invalid_token(format!("Failed to parse {}: {}", what, e)))
    };

    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| Error::invalid_token(format!("Timed out fetching {}", what)))?
}

/// Selects the decoder of a token's issuer.
///
/// Decoders are built on first use and cached for the lifetime of the
/// resolver. Concurrent first requests for the same issuer share a single
/// build; a failed build is retried by the next request.
pub struct DecoderResolver {
    registry: Arc<IssuerRegistry>,
    decoders: DashMap<String, Arc<OnceCell<Arc<JwtDecoder>>>>,
    http_client: reqwest::Client,
    fetch_timeout: Duration,
    cache_ttl: Duration,
}

impl std::fmt::Debug for DecoderResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderResolver")
            .field("registry", &self.registry)
            .field("decoders", &self.decoders.len())
            .field("fetch_timeout", &self.fetch_timeout)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl DecoderResolver {
    /// Create a resolver with default timeouts.
    pub fn new(registry: Arc<IssuerRegistry>) -> Result<Self> {
        Self::with_timeouts(registry, DEFAULT_FETCH_TIMEOUT, DEFAULT_CACHE_TTL)
    }

    /// Create a resolver using the timeouts of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the fetch timeout or the cache
    /// TTL is zero.
    pub fn from_config(registry: Arc<IssuerRegistry>, config: &SecurityConfig) -> Result<Self> {
        if config.key_fetch_timeout_secs == 0 {
            return Err(Error::configuration("key_fetch_timeout_secs must be positive"));
        }
        if config.jwks_cache_ttl_secs == 0 {
            return Err(Error::configuration("jwks_cache_ttl_secs must be positive"));
        }
        Self::with_timeouts(registry, config.key_fetch_timeout(), config.jwks_cache_ttl())
    }

    /// Create a resolver with custom fetch timeout and cache TTL.
    pub fn with_timeouts(
        registry: Arc<IssuerRegistry>,
        fetch_timeout: Duration,
        cache_ttl: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_http_client(
            registry,
            http_client,
            fetch_timeout,
            cache_ttl,
        ))
    }

    /// Create a resolver with a custom HTTP client.
    pub fn with_http_client(
        registry: Arc<IssuerRegistry>,
        http_client: reqwest::Client,
        fetch_timeout: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            decoders: DashMap::new(),
            http_client,
            fetch_timeout,
            cache_ttl,
        }
    }

    /// Issuer registry backing this resolver.
    pub fn registry(&self) -> &Arc<IssuerRegistry> {
        &self.registry
    }

    /// Get the decoder for `issuer`, building it on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownIssuer`] when the issuer is not registered
    /// - [`Error::InvalidToken`] when the decoder cannot be built
    pub async fn resolve(&self, issuer: &str) -> Result<Arc<JwtDecoder>> {
        let config = self
            .registry
            .get(issuer)
            .cloned()
            .ok_or_else(|| Error::unknown_issuer(issuer))?;

        let cell = self
            .decoders
            .entry(config.key().to_string())
            .or_default()
            .clone();

        let decoder = cell
            .get_or_try_init(|| {
                let http_client = self.http_client.clone();
                let (fetch_timeout, cache_ttl) = (self.fetch_timeout, self.cache_ttl);
                async move {
                    JwtDecoder::build(config, http_client, fetch_timeout, cache_ttl)
                        .await
                        .map(Arc::new)
                }
            })
            .await?;

        Ok(Arc::clone(decoder))
    }

    /// Verify a token with the decoder of its issuer.
    pub async fn decode(&self, token: &str) -> Result<DecodedToken> {
        let issuer = peek_issuer(token)?;
        self.resolve(&issuer).await?.decode(token).await
    }

    /// Number of decoders built so far.
    pub fn decoder_count(&self) -> usize {
        self.decoders
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }
}
