//! Mock OIDC issuers for integration tests.
//!
//! Each issuer serves a discovery document and a JWKS holding one HS256
//! `oct` key from a mockito server.

#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use oauth2_addons::IssuerConfig;
use serde_json::{json, Value};

pub struct TestIssuer {
    pub server: mockito::ServerGuard,
    pub location: String,
    pub kid: String,
    secret: Vec<u8>,
    pub discovery: mockito::Mock,
    pub jwks: mockito::Mock,
}

impl TestIssuer {
    /// Start an issuer at `{server}/realms/{realm}`.
    pub async fn start(realm: &str, secret: &[u8]) -> Self {
        Self::start_with(realm, secret, None, None).await
    }

    /// Start an issuer whose discovery and JWKS endpoints expect exactly `hits` requests each.
    pub async fn start_expecting(realm: &str, secret: &[u8], hits: usize) -> Self {
        Self::start_with(realm, secret, None, Some(hits)).await
    }

    /// Start an issuer whose discovery document advertises `advertised` as issuer.
    pub async fn start_with(
        realm: &str,
        secret: &[u8],
        advertised: Option<&str>,
        hits: Option<usize>,
    ) -> Self {
        let mut server = mockito::Server::new_async().await;
        let location = format!("{}/realms/{}", server.url(), realm);
        let kid = format!("{}-key", realm);

        let mut discovery = server
            .mock(
                "GET",
                format!("/realms/{}/.well-known/openid-configuration", realm).as_str(),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "issuer": advertised.unwrap_or(&location),
                    "jwks_uri": format!("{}/protocol/openid-connect/certs", location),
                })
                .to_string(),
            );
        if let Some(hits) = hits {
            discovery = discovery.expect(hits);
        }
        let discovery = discovery.create_async().await;

        let mut jwks = server
            .mock(
                "GET",
                format!("/realms/{}/protocol/openid-connect/certs", realm).as_str(),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "keys": [
                        {"kty": "RSA", "kid": "enc", "use": "enc", "n": "AQAB", "e": "AQAB"},
                        {"kty": "oct", "kid": kid, "alg": "HS256", "k": URL_SAFE_NO_PAD.encode(secret)}
                    ]
                })
                .to_string(),
            );
        if let Some(hits) = hits {
            jwks = jwks.expect(hits);
        }
        let jwks = jwks.create_async().await;

        Self {
            server,
            location,
            kid,
            secret: secret.to_vec(),
            discovery,
            jwks,
        }
    }

    /// Issuer configuration accepting HS256.
    pub fn config(&self) -> IssuerConfig {
        IssuerConfig::new(self.location.clone()).with_algorithms(["HS256"])
    }

    /// Claims for `subject` with realm roles, expiring in `expires_in` seconds.
    pub fn claims(&self, subject: &str, roles: &[&str], expires_in: i64) -> Value {
        let now = chrono::Utc::now().timestamp();
        json!({
            "iss": self.location,
            "sub": subject,
            "iat": now,
            "exp": now + expires_in,
            "preferred_username": format!("{}-name", subject),
            "realm_access": {"roles": roles},
            "scope": "openid profile"
        })
    }

    /// Sign `claims` with this issuer's key.
    pub fn sign(&self, claims: &Value) -> String {
        sign_with(claims, &self.kid, &self.secret)
    }

    /// Valid token for `subject` holding `roles`.
    pub fn token(&self, subject: &str, roles: &[&str]) -> String {
        self.sign(&self.claims(subject, roles, 300))
    }
}

/// Start a listener that accepts connections and never answers.
pub async fn silent_server() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            open.push(socket);
        }
    });
    addr
}

/// Sign `claims` with HS256 using an arbitrary key.
pub fn sign_with(claims: &Value, kid: &str, secret: &[u8]) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
}
