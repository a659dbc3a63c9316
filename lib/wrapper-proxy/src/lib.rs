//! Tenant-aware HTTP proxy in front of the LLMTwins backend
pub mod engine;
pub mod error;
pub mod health_check;
pub mod http;
pub mod metrics;
pub mod middleware;
pub mod stream;
pub mod tracing;

pub use engine::{build_client, BodyPolicy, ProxyEngine, ProxyRequestContext, UpstreamClient};
pub use error::{ProxyError, Result};
pub use health_check::{HealthCheckConfig, HealthChecker, HealthReport};
pub use http::ProxyBody;
pub use metrics::{MetricsCollector, MetricsMiddleware};
pub use middleware::{
    LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareContext, ERROR_KIND_METADATA_KEY,
    ROUTE_METADATA_KEY, TENANT_METADATA_KEY,
};
pub use stream::rewrite_stream;
pub use self::tracing::TracingMiddleware;
