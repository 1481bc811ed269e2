//! Resource server side: token authentication and inbound access policy.

pub mod access;
pub mod auth;
pub mod http_middleware;

pub use access::{AccessRule, AccessRules, CorsPolicies, CsrfStrategy, PathPattern, Requirement};
pub use http_middleware::ResourceServer;

#[cfg(feature = "http-layer")]
pub use http_middleware::resource_server_middleware;
