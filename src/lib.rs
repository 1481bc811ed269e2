//! # oauth2-addons
//!
//! Multi-issuer OAuth2 / OpenID Connect resource server toolkit.
//!
//! An incoming bearer token is routed to the decoder of the issuer named in
//! its `iss` claim, verified against that issuer's published keys, mapped to
//! authorities with per-issuer rules and exposed to handlers as a
//! [`Principal`]. Ordered access rules then decide between 200, 401 and 403.
//!
//! On the client side, [`client::BearerTokenMiddleware`] propagates tokens to
//! downstream services and [`client::MultiTenantSessionStore`] keeps the
//! principals of sessions logged in with several identity providers.
//!
//! ## Example
//!
//! ```rust
//! use oauth2_addons::server::auth::{CaseMode, IssuerConfig, SecurityConfig};
//! use oauth2_addons::server::ResourceServer;
//!
//! let config = SecurityConfig::new()
//!     .with_issuer(
//!         IssuerConfig::new("https://idp.example.com/realms/master")
//!             .with_claims(["realm_access.roles"])
//!             .with_case(CaseMode::Upper),
//!     )
//!     .with_permit_all(["/favicon.ico"])
//!     .with_authority_rule("/introspect", "INTROSPECTION_CLIENT");
//!
//! let server = ResourceServer::from_config(&config, None).unwrap();
//! assert!(server.rules().is_permit_all("/favicon.ico"));
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod error;
pub mod server;

pub use error::{Error, Result};
pub use server::auth::{IssuerConfig, Principal, SecurityConfig};
pub use server::ResourceServer;

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Does nothing if a global subscriber is already installed.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
