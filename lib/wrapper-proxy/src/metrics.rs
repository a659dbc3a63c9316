//! Prometheus metrics middleware for observability

use prometheus::{
    CounterVec, HistogramVec, Registry, Encoder, TextEncoder,
    Opts,
};
use std::sync::Arc;
use anyhow::Result;
use tracing::debug;
use crate::middleware::{Middleware, MiddlewareContext, ERROR_KIND_METADATA_KEY, ROUTE_METADATA_KEY};

/// Tenant label shared by every tenant outside the known set
pub const OTHER_TENANT_LABEL: &str = "other";

/// Prometheus metrics collector for proxied requests.
///
/// Clones share the same registry and metric handles.
#[derive(Clone)]
pub struct MetricsCollector {
    /// Requests received, by method and route pattern
    pub requests_total: CounterVec,
    /// End-to-end handling latency until response headers are ready
    pub request_duration_seconds: HistogramVec,
    /// Responses by status code
    pub responses_total: CounterVec,
    /// Requests per resolved tenant
    pub tenant_requests_total: CounterVec,
    /// Proxy-level failures by kind (not upstream error statuses)
    pub proxy_errors_total: CounterVec,
    /// Streamed chunks by rewrite outcome
    pub stream_chunks_total: CounterVec,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = CounterVec::new(
            Opts::new("wrapper_requests_total", "Total requests received by the wrapper"),
            &["method", "route"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            Opts::new(
                "wrapper_request_duration_seconds",
                "Request handling latency in seconds",
            )
            .into(),
            &["method", "route"],
        )?;

        let responses_total = CounterVec::new(
            Opts::new("wrapper_responses_total", "Total responses by status"),
            &["status"],
        )?;

        let tenant_requests_total = CounterVec::new(
            Opts::new("wrapper_tenant_requests_total", "Proxied requests per tenant"),
            &["tenant"],
        )?;

        let proxy_errors_total = CounterVec::new(
            Opts::new("wrapper_proxy_errors_total", "Proxy-level errors by kind"),
            &["kind"],
        )?;

        let stream_chunks_total = CounterVec::new(
            Opts::new(
                "wrapper_stream_chunks_total",
                "Streamed response chunks by rewrite outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(responses_total.clone()))?;
        registry.register(Box::new(tenant_requests_total.clone()))?;
        registry.register(Box::new(proxy_errors_total.clone()))?;
        registry.register(Box::new(stream_chunks_total.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            responses_total,
            tenant_requests_total,
            proxy_errors_total,
            stream_chunks_total,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn route_label(context: &MiddlewareContext) -> String {
    context
        .get_metadata(ROUTE_METADATA_KEY)
        .unwrap_or_else(|| "unmatched".to_string())
}

/// Prometheus metrics middleware
pub struct MetricsMiddleware {
    pub collector: MetricsCollector,
}

impl MetricsMiddleware {
    /// Create a new metrics middleware
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }
}

#[async_trait::async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "MetricsMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        let route = route_label(context);
        debug!("Recording request metrics for {} {}", context.method, route);

        self.collector
            .requests_total
            .with_label_values(&[&context.method, &route])
            .inc();

        Ok(())
    }

    async fn on_response(
        &self,
        context: &MiddlewareContext,
        status: u16,
    ) -> Result<()> {
        let route = route_label(context);
        debug!("Recording response metrics for {} {} -> {}", context.method, route, status);

        self.collector
            .responses_total
            .with_label_values(&[&status.to_string()])
            .inc();

        self.collector
            .request_duration_seconds
            .with_label_values(&[&context.method, &route])
            .observe(context.elapsed().as_secs_f64());

        Ok(())
    }

    async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        debug!("Recording error metrics for {} {}: {}", context.method, context.path, error);

        let kind = context
            .get_metadata(ERROR_KIND_METADATA_KEY)
            .unwrap_or_else(|| "unknown".to_string());
        self.collector
            .proxy_errors_total
            .with_label_values(&[&kind])
            .inc();

        Ok(())
    }
}
