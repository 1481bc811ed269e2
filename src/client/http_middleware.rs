//! Outbound HTTP middleware.
//!
//! Middleware observe and modify outgoing requests before they are sent and
//! the responses after they come back. [`HttpMiddlewareChain::send`] runs a
//! request through the chain and a `reqwest` client.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-request state shared by the middleware of a chain.
#[derive(Debug, Clone)]
pub struct HttpMiddlewareContext {
    /// URL being requested
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Custom metadata
    pub metadata: Arc<parking_lot::RwLock<HashMap<String, String>>>,
}

impl HttpMiddlewareContext {
    /// Create a context for `method url`.
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            metadata: Arc::new(parking_lot::RwLock::new(HashMap::new())),
        }
    }

    /// Set metadata value
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.write().insert(key.into(), value.into());
    }

    /// Get metadata value
    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.metadata.read().get(key).cloned()
    }
}

/// Outgoing request. Header names are case-insensitive.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method
    pub method: String,
    /// Target URL
    pub url: String,
    /// Request headers, keyed by lower-case name
    pub headers: HashMap<String, String>,
    /// Request body
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Create a request.
    pub fn new(method: impl Into<String>, url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
            body,
        }
    }

    /// Set a header, replacing any previous value.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    /// Get a header value
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether a header is set.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_ascii_lowercase())
    }
}

/// Received response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, keyed by lower-case name, every value in arrival order
    pub headers: HashMap<String, Vec<String>>,
    /// Response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    /// First value of a header
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.get_header_values(name).first().map(String::as_str)
    }

    /// All values of a header, such as repeated `set-cookie`.
    pub fn get_header_values(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Append a header value.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
}

/// Outbound HTTP middleware.
///
/// # Examples
///
/// ```rust
/// use oauth2_addons::client::http_middleware::{HttpMiddleware, HttpMiddlewareContext, HttpRequest};
/// use async_trait::async_trait;
///
/// struct ApiKey(String);
///
/// #[async_trait]
/// impl HttpMiddleware for ApiKey {
///     async fn on_request(
///         &self,
///         request: &mut HttpRequest,
///         _context: &HttpMiddlewareContext,
///     ) -> oauth2_addons::Result<()> {
///         request.add_header("X-API-Key", &self.0);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait HttpMiddleware: Send + Sync {
    /// Called before the request is sent
    async fn on_request(
        &self,
        request: &mut HttpRequest,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        let _ = (request, context);
        Ok(())
    }

    /// Called after the response is received
    async fn on_response(
        &self,
        response: &mut HttpResponse,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        let _ = (response, context);
        Ok(())
    }

    /// Priority for ordering (lower runs first)
    fn priority(&self) -> i32 {
        50
    }
}

/// Ordered middleware chain.
#[derive(Default)]
pub struct HttpMiddlewareChain {
    middlewares: Vec<Arc<dyn HttpMiddleware>>,
}

impl HttpMiddlewareChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add middleware, keeping the chain sorted by priority.
    pub fn add(&mut self, middleware: Arc<dyn HttpMiddleware>) {
        self.middlewares.push(middleware);
        self.middlewares.sort_by_key(|m| m.priority());
    }

    /// Number of middleware.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run `request` through every middleware.
    pub async fn process_request(
        &self,
        request: &mut HttpRequest,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.on_request(request, context).await?;
        }
        Ok(())
    }

    /// Run `response` through every middleware, in reverse order.
    pub async fn process_response(
        &self,
        response: &mut HttpResponse,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        for middleware in self.middlewares.iter().rev() {
            middleware.on_response(response, context).await?;
        }
        Ok(())
    }

    /// Process, send and process the response of `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] when the request cannot be built or sent, and
    /// any error raised by a middleware.
    pub async fn send(
        &self,
        client: &reqwest::Client,
        mut request: HttpRequest,
    ) -> Result<HttpResponse> {
        let context = HttpMiddlewareContext::new(request.url.clone(), request.method.clone());
        self.process_request(&mut request, &context).await?;

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::http(format!("Invalid method {}: {}", request.method, e)))?;
        let mut builder = client.request(method, &request.url).body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let reply = builder
            .send()
            .await
            .map_err(|e| Error::http(format!("{} {} failed: {}", context.method, context.url, e)))?;

        let status = reply.status().as_u16();
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in reply.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }
        let body = reply
            .bytes()
            .await
            .map_err(|e| Error::http(format!("Failed to read response body: {}", e)))?
            .to_vec();

        let mut response = HttpResponse {
            status,
            headers,
            body,
        };
        self.process_response(&mut response, &context).await?;

        tracing::trace!(method = %context.method, url = %context.url, status, "HTTP exchange completed");
        Ok(response)
    }
}

impl std::fmt::Debug for HttpMiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMiddlewareChain")
            .field("count", &self.middlewares.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl HttpMiddleware for Recorder {
        async fn on_request(
            &self,
            _request: &mut HttpRequest,
            _context: &HttpMiddlewareContext,
        ) -> Result<()> {
            self.log.lock().push(format!("req:{}", self.name));
            Ok(())
        }

        async fn on_response(
            &self,
            _response: &mut HttpResponse,
            _context: &HttpMiddlewareContext,
        ) -> Result<()> {
            self.log.lock().push(format!("res:{}", self.name));
            Ok(())
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    #[tokio::test]
    async fn test_chain_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HttpMiddlewareChain::new();
        for (name, priority) in [("late", 90), ("early", 10)] {
            chain.add(Arc::new(Recorder {
                name,
                priority,
                log: Arc::clone(&log),
            }));
        }
        assert_eq!(chain.len(), 2);

        let context = HttpMiddlewareContext::new("http://localhost", "GET");
        let mut request = HttpRequest::new("GET", "http://localhost", Vec::new());
        chain.process_request(&mut request, &context).await.unwrap();
        let mut response = HttpResponse::new(200, Vec::new());
        chain.process_response(&mut response, &context).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["req:early", "req:late", "res:late", "res:early"]
        );
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut request = HttpRequest::new("GET", "http://localhost", Vec::new());
        request.add_header("Authorization", "Bearer a");
        assert!(request.has_header("authorization"));
        request.add_header("AUTHORIZATION", "Bearer b");
        assert_eq!(request.get_header("Authorization"), Some("Bearer b"));
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn test_response_keeps_repeated_headers() {
        let mut response = HttpResponse::new(200, Vec::new());
        response.add_header("Set-Cookie", "a=1");
        response.add_header("set-cookie", "b=2");
        assert_eq!(response.get_header("SET-COOKIE"), Some("a=1"));
        assert_eq!(response.get_header_values("set-cookie"), ["a=1", "b=2"]);
        assert!(response.get_header_values("x-missing").is_empty());
    }

    #[test]
    fn test_context_metadata() {
        let context = HttpMiddlewareContext::new("http://localhost", "GET");
        context.set_metadata("k", "v");
        assert_eq!(context.get_metadata("k"), Some("v".to_string()));
        assert_eq!(context.get_metadata("missing"), None);
    }
}
