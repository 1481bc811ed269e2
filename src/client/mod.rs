//! Client side: outbound bearer propagation and multi-tenant sessions.

pub mod http_middleware;
pub mod oauth_middleware;
pub mod session;

pub use http_middleware::{
    HttpMiddleware, HttpMiddlewareChain, HttpMiddlewareContext, HttpRequest, HttpResponse,
};
pub use oauth_middleware::{
    BearerProvider, BearerToken, BearerTokenMiddleware, FnBearerProvider,
    PrincipalBearerProvider, StaticBearerProvider,
};
pub use session::{MultiTenantSessionStore, SessionPrincipals};
