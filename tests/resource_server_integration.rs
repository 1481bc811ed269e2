//! Resource server filter on an axum router.

#![cfg(feature = "http-layer")]

mod common;

use axum::body::Body;
use axum::routing::get;
use axum::Router;
use common::TestIssuer;
use http::{header, Method, Request, StatusCode};
use oauth2_addons::server::auth::CorsPolicy;
use oauth2_addons::{Principal, ResourceServer, SecurityConfig};
use std::sync::Arc;
use tower::ServiceExt;

fn routes() -> Router {
    Router::new()
        .route("/favicon.ico", get(|| async { "icon" }))
        .route(
            "/greetings",
            get(|principal: Principal| async move { format!("Hi {}!", principal.name()) }),
        )
        .route(
            "/introspect",
            get(|principal: Principal| async move { principal.name().to_string() }),
        )
        .route("/api/data", get(|| async { "data" }))
}

fn app(issuer: &TestIssuer) -> Router {
    let config = SecurityConfig::new()
        .with_issuer(issuer.config())
        .with_permit_all(["/favicon.ico"])
        .with_authority_rule("/introspect", "INTROSPECTION_CLIENT")
        .with_cors(CorsPolicy {
            path: "/api/**".to_string(),
            allowed_origins: vec!["https://app.example.com".to_string()],
            ..CorsPolicy::default()
        });
    let server = Arc::new(ResourceServer::from_config(&config, None).unwrap());
    server.protect(routes())
}

fn get_request(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_permit_all_without_credentials() {
    let issuer = TestIssuer::start("master", b"master-secret-0123456789abcdef").await;
    let response = app(&issuer)
        .oneshot(get_request("/favicon.ico", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "icon");
}

#[tokio::test]
async fn test_permit_all_ignores_bad_credentials() {
    let issuer = TestIssuer::start("master", b"master-secret-0123456789abcdef").await;
    let response = app(&issuer)
        .oneshot(get_request("/favicon.ico", Some("not-a-jwt")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_introspect_without_credentials_is_401() {
    let issuer = TestIssuer::start("master", b"master-secret-0123456789abcdef").await;
    let response = app(&issuer)
        .oneshot(get_request("/introspect", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );
}

#[tokio::test]
async fn test_introspect_with_authority_is_200() {
    let issuer = TestIssuer::start("master", b"master-secret-0123456789abcdef").await;
    let token = issuer.token("client-1", &["INTROSPECTION_CLIENT"]);
    let response = app(&issuer)
        .oneshot(get_request("/introspect", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "client-1");
}

#[tokio::test]
async fn test_introspect_without_authority_is_403() {
    let issuer = TestIssuer::start("master", b"master-secret-0123456789abcdef").await;
    let token = issuer.token("user-1", &["NICE"]);
    let response = app(&issuer)
        .oneshot(get_request("/introspect", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(body_text(response).await.contains("insufficient_scope"));
}

#[tokio::test]
async fn test_authenticated_route() {
    let issuer = TestIssuer::start("master", b"master-secret-0123456789abcdef").await;
    let token = issuer.token("user-1", &[]);
    let response = app(&issuer)
        .oneshot(get_request("/greetings", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Hi user-1!");
}

#[tokio::test]
async fn test_unknown_issuer_is_401() {
    let issuer = TestIssuer::start("master", b"master-secret-0123456789abcdef").await;
    let mut claims = issuer.claims("user-1", &["INTROSPECTION_CLIENT"], 300);
    claims["iss"] = "https://unknown.example".into();
    let token = issuer.sign(&claims);

    let response = app(&issuer)
        .oneshot(get_request("/greetings", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        r#"Bearer error="invalid_token""#
    );
}

#[tokio::test]
async fn test_cors_preflight_skips_authentication() {
    let issuer = TestIssuer::start("master", b"master-secret-0123456789abcdef").await;
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/data")
        .header(header::ORIGIN, "https://app.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .body(Body::empty())
        .unwrap();

    let response = app(&issuer).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "https://app.example.com"
    );
}

#[tokio::test]
async fn test_cors_headers_on_rejection() {
    let issuer = TestIssuer::start("master", b"master-secret-0123456789abcdef").await;
    let request = Request::builder()
        .uri("/api/data")
        .header(header::ORIGIN, "https://app.example.com")
        .body(Body::empty())
        .unwrap();

    let response = app(&issuer).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));

    // No policy outside /api/**
    let request = Request::builder()
        .uri("/favicon.ico")
        .header(header::ORIGIN, "https://app.example.com")
        .body(Body::empty())
        .unwrap();
    let response = app(&issuer).oneshot(request).await.unwrap();
    assert!(!response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}
