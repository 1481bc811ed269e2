//! Demo resource server.
//!
//! ```text
//! oauth2-addons-demo [config.toml]
//! ```
//!
//! The configuration path may also be given with `OAUTH2_ADDONS_CONFIG`.
//! Listens on `PORT` (default 8080).
//!
//! - `GET /favicon.ico`: anonymous
//! - `GET /greetings`: any authenticated principal
//! - `GET /introspect`: requires `INTROSPECTION_CLIENT`

use anyhow::Context;
use axum::{routing::get, Json, Router};
use oauth2_addons::{Principal, ResourceServer, SecurityConfig};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    oauth2_addons::init_logging();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("OAUTH2_ADDONS_CONFIG").ok());
    let mut config = match path {
        Some(ref path) => SecurityConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => SecurityConfig::new(),
    };
    config.apply_env()?;
    if !config
        .access
        .iter()
        .any(|rule| rule.pattern == "/introspect")
    {
        config = config.with_authority_rule("/introspect", "INTROSPECTION_CLIENT");
    }

    let server = Arc::new(ResourceServer::from_config(&config, None)?);
    let app = server.protect(router());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(%addr, issuers = config.issuers.len(), "Demo resource server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn router() -> Router {
    Router::new()
        .route("/favicon.ico", get(|| async { "" }))
        .route(
            "/greetings",
            get(|principal: Principal| async move {
                format!(
                    "Hi {}! You are granted with: {:?}.",
                    principal.name(),
                    principal.authorities
                )
            }),
        )
        .route(
            "/introspect",
            get(|principal: Principal| async move { Json(principal) }),
        )
}
