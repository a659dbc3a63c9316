//! Request tracing middleware: correlates log lines of one request by trace id

use std::collections::HashMap;
use anyhow::Result;
use tracing::{info, error};
use crate::middleware::{Middleware, MiddlewareContext, TENANT_METADATA_KEY};

/// Metadata key holding the request's trace id
pub const TRACE_ID_METADATA_KEY: &str = "trace_id";

/// Logs request start/completion with a trace id taken from the caller's
/// `traceparent` header or freshly generated.
pub struct TracingMiddleware {
    /// Service name attached to every log line
    pub service_name: String,
}

impl TracingMiddleware {
    pub fn new() -> Self {
        Self {
            service_name: "llmtwins-tenant-wrapper".to_string(),
        }
    }

    pub fn with_service_name(service_name: String) -> Self {
        Self { service_name }
    }

    /// Trace id of a W3C `traceparent` header (`version-trace_id-span_id-flags`)
    pub fn extract_trace_id(headers: &HashMap<String, String>) -> Option<String> {
        let value = headers.get("traceparent")?;
        let parts: Vec<&str> = value.split('-').collect();
        match parts.as_slice() {
            [_, trace_id, _, _] if !trace_id.is_empty() => Some(trace_id.to_string()),
            _ => None,
        }
    }

    /// Generate a new trace ID (random 32 hex digits)
    pub fn generate_trace_id() -> String {
        format!("{:032x}", rand::random::<u128>())
    }
}

impl Default for TracingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

fn tenant_of(context: &MiddlewareContext) -> String {
    context.get_metadata(TENANT_METADATA_KEY).unwrap_or_default()
}

#[async_trait::async_trait]
impl Middleware for TracingMiddleware {
    fn name(&self) -> &'static str {
        "TracingMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        let trace_id = Self::extract_trace_id(&context.request_headers)
            .unwrap_or_else(Self::generate_trace_id);
        context.set_metadata(TRACE_ID_METADATA_KEY.to_string(), trace_id.clone());

        info!(
            service = %self.service_name,
            trace_id = %trace_id,
            tenant = %tenant_of(context),
            method = %context.method,
            path = %context.path,
            "Request started"
        );

        Ok(())
    }

    async fn on_response(
        &self,
        context: &MiddlewareContext,
        status: u16,
    ) -> Result<()> {
        let trace_id = context.get_metadata(TRACE_ID_METADATA_KEY).unwrap_or_default();

        info!(
            service = %self.service_name,
            trace_id = %trace_id,
            tenant = %tenant_of(context),
            status = status,
            method = %context.method,
            path = %context.path,
            elapsed_ms = context.elapsed().as_millis() as u64,
            "Request completed"
        );

        Ok(())
    }

    async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        let trace_id = context.get_metadata(TRACE_ID_METADATA_KEY).unwrap_or_default();

        error!(
            service = %self.service_name,
            trace_id = %trace_id,
            tenant = %tenant_of(context),
            error = %error,
            method = %context.method,
            path = %context.path,
            "Request error"
        );

        Ok(())
    }
}
