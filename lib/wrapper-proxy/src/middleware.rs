//! Middleware framework for request/response observation

use hyper::Request;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::Result;
use tracing::{debug, span, Instrument, Level};

/// Metadata key holding the matched route pattern
pub const ROUTE_METADATA_KEY: &str = "route";
/// Metadata key holding the resolved tenant
pub const TENANT_METADATA_KEY: &str = "tenant";
/// Metadata key holding the [`crate::ProxyError::kind`] of a failed request
pub const ERROR_KIND_METADATA_KEY: &str = "error_kind";

/// Context passed through middleware chain
#[derive(Clone)]
pub struct MiddlewareContext {
    /// Request path
    pub path: String,
    /// Request method
    pub method: String,
    /// Request headers
    pub request_headers: HashMap<String, String>,
    /// When the gateway started handling the request
    pub started_at: Instant,
    /// Custom metadata for middleware
    pub metadata: Arc<std::sync::Mutex<HashMap<String, String>>>,
}

impl MiddlewareContext {
    /// Create an empty context for a method and path
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            request_headers: HashMap::new(),
            started_at: Instant::now(),
            metadata: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Create a new middleware context from a request
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let mut context = Self::new(req.method().as_str(), req.uri().path());
        for (k, v) in req.headers() {
            if let Ok(v_str) = v.to_str() {
                context.request_headers.insert(k.to_string(), v_str.to_string());
            }
        }
        context
    }

    /// Get a metadata value
    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.metadata
            .lock()
            .ok()
            .and_then(|m| m.get(key).cloned())
    }

    /// Set a metadata value
    pub fn set_metadata(&self, key: String, value: String) {
        if let Ok(mut m) = self.metadata.lock() {
            m.insert(key, value);
        }
    }

    /// Time since the context was created
    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.started_at)
    }
}

/// Middleware trait for processing requests and responses
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    /// Hook called before processing request (name for logging)
    fn name(&self) -> &'static str {
        "UnnamedMiddleware"
    }

    /// Called before request is processed
    async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
        Ok(())
    }

    /// Called once response headers are ready. For streamed replies this is
    /// before the body has been delivered.
    async fn on_response(
        &self,
        _context: &MiddlewareContext,
        _status: u16,
    ) -> Result<()> {
        Ok(())
    }

    /// Called on a proxy-level error
    async fn on_error(&self, _context: &MiddlewareContext, _error: &str) -> Result<()> {
        Ok(())
    }
}

/// Chain of middleware to execute in order
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create a new middleware chain
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
        }
    }

    /// Add middleware to the chain
    pub fn add<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Process request through all middleware
    pub async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            async {
                debug!("Processing on_request");
                mw.on_request(context).await
            }
            .instrument(span)
            .await?;
        }
        Ok(())
    }

    /// Process response through all middleware (in reverse order)
    pub async fn on_response(
        &self,
        context: &MiddlewareContext,
        status: u16,
    ) -> Result<()> {
        for mw in self.middleware.iter().rev() {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            async {
                debug!("Processing on_response");
                mw.on_response(context, status).await
            }
            .instrument(span)
            .await?;
        }
        Ok(())
    }

    /// Process error through all middleware
    pub async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            async {
                debug!("Processing on_error");
                mw.on_error(context, error).await
            }
            .instrument(span)
            .await?;
        }
        Ok(())
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging middleware that logs request and response info
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        debug!(
            "Request: {} {} (headers: {})",
            context.method,
            context.path,
            context.request_headers.len()
        );
        Ok(())
    }

    async fn on_response(
        &self,
        context: &MiddlewareContext,
        status: u16,
    ) -> Result<()> {
        debug!(
            "Response: {} {} -> {} (duration: {}ms)",
            context.method,
            context.path,
            status,
            context.elapsed().as_millis()
        );
        Ok(())
    }

    async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        debug!("Error: {} {} - {}", context.method, context.path, error);
        Ok(())
    }
}
