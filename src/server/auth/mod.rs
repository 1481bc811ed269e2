//! Multi-issuer JWT resource server authentication.
//!
//! Application code should only ever see [`Principal`]: the issuer table,
//! decoders, key caches and authorities mapping stay behind the
//! [`Authenticator`].
//!
//! # Quick Start
//!
//! ```rust
//! use oauth2_addons::server::auth::{Authenticator, CaseMode, IssuerConfig, SecurityConfig};
//!
//! let config = SecurityConfig::new()
//!     .with_issuer(
//!         IssuerConfig::new("https://idp.example.com/realms/master")
//!             .with_claims(["realm_access.roles", "resource_access.api.roles"])
//!             .with_prefix("ROLE_")
//!             .with_case(CaseMode::Upper),
//!     )
//!     .with_issuer(IssuerConfig::new("https://accounts.example.org"));
//!
//! let authenticator = Authenticator::from_config(&config, None).unwrap();
//! assert_eq!(authenticator.resolver().registry().len(), 2);
//! ```

pub mod authenticator;
pub mod authorities;
pub mod config;
pub mod jwt_validator;
pub mod mock;
pub mod principal;
pub mod registry;

pub use authenticator::{bearer_token, Authenticator, TokenAuthenticator};
pub use authorities::{Authorities, AuthoritiesConverter, ClaimPathAuthoritiesConverter};
pub use config::{
    AccessRuleConfig, AuthoritiesMapping, CaseMode, CorsPolicy, CsrfMode, IssuerConfig,
    PrincipalFactoryMode, SecurityConfig,
};
pub use jwt_validator::{peek_issuer, DecodedToken, DecoderResolver, JwtDecoder};
pub use mock::MockAuthenticator;
pub use principal::{DefaultPrincipalFactory, Principal, PrincipalFactory};
pub use registry::IssuerRegistry;
