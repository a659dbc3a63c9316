//! Tenant-aware request forwarding to the LLMTwins upstream
//!
//! One call to [`ProxyEngine::forward`] handles one inbound request: the
//! query string and JSON body get their session identifiers namespaced, the
//! request is sent over the shared connection pool, and the response comes
//! back either fully buffered and de-namespaced, or as an NDJSON stream that
//! is rewritten chunk by chunk.

use crate::error::{ProxyError, Result};
use crate::http::{
    copy_forwardable_headers, full, BoxError, ProxyBody, APPLICATION_JSON, APPLICATION_NDJSON,
};
use crate::metrics::{MetricsCollector, OTHER_TENANT_LABEL};
use crate::stream::rewrite_stream;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info, warn};
use url::form_urlencoded;
use wrapper_core::{IdentifierCodec, OutboundBody, PayloadRewriter, Tenant, WrapperConfig};

/// Marks a request as forwarded by the wrapper
pub const WRAPPER_MARKER_HEADER: HeaderName = HeaderName::from_static("x-tenant-wrapper");

/// Pooled HTTP/1 client shared by every in-flight request
pub type UpstreamClient = Client<HttpConnector, Full<Bytes>>;

const MAX_IDLE_PER_HOST: usize = 32;

/// Build the pooled upstream client
pub fn build_client(connect_timeout: Duration) -> UpstreamClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    connector.set_keepalive(Some(Duration::from_secs(30)));

    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .build(connector)
}

/// How the request body of a route is treated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyPolicy {
    /// Decode JSON bodies of POST/PUT/PATCH and namespace identifier fields
    Rewrite,
    /// Forward the raw bytes untouched (multipart uploads)
    Opaque,
}

fn carries_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Everything needed to issue one upstream call. Owned by a single request.
#[derive(Debug)]
pub struct ProxyRequestContext {
    pub tenant: Tenant,
    pub method: Method,
    pub upstream_url: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: OutboundBody,
}

impl ProxyRequestContext {
    fn build(
        engine: &ProxyEngine,
        rewriter: &PayloadRewriter,
        parts: hyper::http::request::Parts,
        raw_body: Bytes,
        upstream_path: &str,
        policy: BodyPolicy,
    ) -> Result<Self> {
        let tenant = rewriter.tenant().clone();

        let original_query = parts.uri.query();
        let mut query: Vec<(String, String)> = original_query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        // Untouched query strings are forwarded exactly as received
        let query_string = if rewriter.rewrite_query(&mut query) > 0 {
            Some(
                form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(query.iter())
                    .finish(),
            )
        } else {
            original_query.map(str::to_string)
        };

        // Path and query are passed on as received, no normalization
        let upstream_url = match query_string {
            Some(q) if !q.is_empty() => format!("{}{}?{}", engine.upstream_base, upstream_path, q),
            _ => format!("{}{}", engine.upstream_base, upstream_path),
        };

        let body = if policy == BodyPolicy::Rewrite && carries_body(&parts.method) {
            rewriter.rewrite_request_body(raw_body)
        } else {
            OutboundBody::opaque(raw_body)
        };

        let mut headers = copy_forwardable_headers(&parts.headers);
        if body.structured && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        }
        let tenant_value = HeaderValue::from_str(tenant.as_str())
            .map_err(|_| ProxyError::InvalidTenant(tenant.to_string()))?;
        headers.insert(engine.tenant_header.clone(), tenant_value);
        headers.insert(WRAPPER_MARKER_HEADER, HeaderValue::from_static("true"));

        Ok(Self {
            tenant,
            method: parts.method,
            upstream_url,
            query,
            headers,
            body,
        })
    }

    fn into_request(self) -> Result<Request<Full<Bytes>>> {
        let uri: Uri = self
            .upstream_url
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::InvalidUpstreamUrl {
                url: self.upstream_url.clone(),
                reason: e.to_string(),
            })?;

        let mut request = Request::new(Full::new(self.body.bytes));
        *request.method_mut() = self.method;
        *request.uri_mut() = uri;
        *request.headers_mut() = self.headers;
        Ok(request)
    }
}

/// Forwards requests to the upstream with tenant namespacing applied
pub struct ProxyEngine {
    client: UpstreamClient,
    upstream_base: String,
    codec: IdentifierCodec,
    tenant_header: HeaderName,
    default_tenant: String,
    whitelist_enabled: bool,
    timeout: Duration,
    metrics: Option<MetricsCollector>,
}

impl ProxyEngine {
    /// Create an engine from validated configuration
    pub fn new(config: &WrapperConfig) -> Result<Self> {
        let tenant_header = config.tenant_header_name()?;
        let timeout = config.upstream_timeout();

        Ok(Self {
            client: build_client(timeout),
            upstream_base: config.upstream_base_url.trim_end_matches('/').to_string(),
            codec: IdentifierCodec::new(config.tenant_separator.clone()),
            tenant_header,
            default_tenant: config.default_tenant.trim().to_string(),
            whitelist_enabled: !config.valid_tenants.is_empty(),
            timeout,
            metrics: None,
        })
    }

    /// Record stream chunk outcomes in `metrics`
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }

    pub fn upstream_base(&self) -> &str {
        &self.upstream_base
    }

    pub fn codec(&self) -> &IdentifierCodec {
        &self.codec
    }

    pub fn tenant_header(&self) -> &HeaderName {
        &self.tenant_header
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn rewriter_for(&self, tenant: &Tenant) -> PayloadRewriter {
        PayloadRewriter::new(self.codec.clone(), tenant.clone())
    }

    /// Metrics label for `tenant`. Without a whitelist the tenant is caller
    /// chosen, so only the default tenant keeps its own label.
    pub fn tenant_label<'a>(&self, tenant: &'a Tenant) -> &'a str {
        if self.whitelist_enabled || tenant.as_str() == self.default_tenant {
            tenant.as_str()
        } else {
            OTHER_TENANT_LABEL
        }
    }

    /// Forward `request` to `upstream_path` on behalf of `tenant`.
    ///
    /// Upstream error statuses are returned as responses; only transport
    /// failures and timeouts become a [`ProxyError`].
    pub async fn forward<B>(
        &self,
        request: Request<B>,
        tenant: &Tenant,
        upstream_path: &str,
        policy: BodyPolicy,
    ) -> Result<Response<ProxyBody>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let rewriter = self.rewriter_for(tenant);
        let (parts, body) = request.into_parts();
        let raw_body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let err: BoxError = e.into();
                return Err(ProxyError::InboundBody(err.to_string()));
            }
        };

        let context =
            ProxyRequestContext::build(self, &rewriter, parts, raw_body, upstream_path, policy)?;

        info!("[{}] Proxying {} {}", tenant, context.method, upstream_path);
        if let Some(metrics) = &self.metrics {
            metrics
                .tenant_requests_total
                .with_label_values(&[self.tenant_label(tenant)])
                .inc();
        }
        debug!(
            "Upstream call - url: {}, headers: {}, body: {} bytes, structured: {}",
            context.upstream_url,
            context.headers.len(),
            context.body.bytes.len(),
            context.body.structured
        );

        if context.body.streaming {
            self.forward_streamed(context, rewriter).await
        } else {
            self.forward_buffered(context, rewriter).await
        }
    }

    async fn forward_buffered(
        &self,
        context: ProxyRequestContext,
        rewriter: PayloadRewriter,
    ) -> Result<Response<ProxyBody>> {
        let request = context.into_request()?;

        let call = async {
            let response = self.client.request(request).await.map_err(upstream_error)?;
            let (parts, body) = response.into_parts();
            let bytes = body
                .collect()
                .await
                .map_err(|e| ProxyError::UpstreamUnreachable(format!("reading upstream body: {}", e)))?
                .to_bytes();
            Ok::<_, ProxyError>((parts, bytes))
        };

        let (mut parts, bytes) = match tokio_timeout(self.timeout, call).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Upstream request timeout after {:?}", self.timeout);
                return Err(ProxyError::UpstreamTimeout(self.timeout));
            }
        };

        debug!(
            "Upstream responded with status: {} ({} bytes)",
            parts.status,
            bytes.len()
        );

        parts.headers = copy_forwardable_headers(&parts.headers);
        let body = rewriter.rewrite_response_body(bytes);
        Ok(Response::from_parts(parts, full(body)))
    }

    async fn forward_streamed(
        &self,
        context: ProxyRequestContext,
        rewriter: PayloadRewriter,
    ) -> Result<Response<ProxyBody>> {
        let request = context.into_request()?;

        let response = match tokio_timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(upstream_error(e)),
            Err(_) => {
                warn!("Upstream stream not opened within {:?}", self.timeout);
                return Err(ProxyError::UpstreamTimeout(self.timeout));
            }
        };

        debug!("Upstream stream opened with status: {}", response.status());

        let (mut parts, body) = response.into_parts();
        parts.headers = copy_forwardable_headers(&parts.headers);
        parts
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_NDJSON));

        let stream = rewrite_stream(body, rewriter, self.timeout, self.metrics.clone());
        Ok(Response::from_parts(parts, StreamBody::new(stream).boxed_unsync()))
    }
}

fn upstream_error(e: hyper_util::client::legacy::Error) -> ProxyError {
    warn!("Backend request error: {:?}", e);
    if e.is_connect() {
        ProxyError::UpstreamUnreachable(format!("connection failed: {}", e))
    } else {
        ProxyError::UpstreamUnreachable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::StatusCode;
    use hyper_util::rt::TokioIo;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use wrapper_core::TenantResolver;

    struct Captured {
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    }

    /// Spawn an upstream answering every request with the given reply and
    /// reporting what it received.
    async fn spawn_upstream(
        status: StatusCode,
        content_type: &'static str,
        reply: &'static [u8],
    ) -> (String, mpsc::UnboundedReceiver<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let tx = tx.clone();
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = body.collect().await?.to_bytes();
                            let _ = tx.send(Captured {
                                method: parts.method,
                                uri: parts.uri,
                                headers: parts.headers,
                                body,
                            });
                            let mut response = Response::new(Full::new(Bytes::from_static(reply)));
                            *response.status_mut() = status;
                            response
                                .headers_mut()
                                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                            Ok::<_, hyper::Error>(response)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        (format!("http://{}", addr), rx)
    }

    fn engine(base: &str) -> ProxyEngine {
        let config = WrapperConfig {
            upstream_base_url: base.to_string(),
            upstream_timeout_secs: 5,
            ..WrapperConfig::default()
        };
        ProxyEngine::new(&config).expect("engine should build")
    }

    fn tenant(header: Option<&str>) -> Tenant {
        TenantResolver::new("default", Vec::new()).resolve(header).unwrap()
    }

    fn inbound(method: &str, uri: &str, body: &'static [u8]) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "wrapper.local")
            .header("content-length", body.len().to_string())
            .body(Full::new(Bytes::from_static(body)))
            .unwrap()
    }

    async fn body_bytes(response: Response<ProxyBody>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_default_tenant_body_unchanged() {
        let (base, mut rx) = spawn_upstream(StatusCode::OK, APPLICATION_JSON, b"{\"id\":\"s9\"}").await;
        let engine = engine(&base);

        let response = engine
            .forward(
                inbound("POST", "/api/sessions", b"{\"foo\":1}"),
                &tenant(None),
                "/api/sessions",
                BodyPolicy::Rewrite,
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let captured = rx.recv().await.unwrap();
        assert_eq!(captured.method, Method::POST);
        assert_eq!(captured.uri.path(), "/api/sessions");
        assert_eq!(&captured.body[..], b"{\"foo\":1}");
        assert_eq!(captured.headers.get("x-tenant-id").unwrap(), "default");
        assert_eq!(captured.headers.get("x-tenant-wrapper").unwrap(), "true");
        assert_ne!(captured.headers.get("host").unwrap(), "wrapper.local");
    }

    #[tokio::test]
    async fn test_buffered_response_denamespaced() {
        let (base, mut rx) = spawn_upstream(
            StatusCode::OK,
            APPLICATION_JSON,
            b"{\"session_id\":\"acme::s1\",\"status\":\"ready\"}",
        )
        .await;
        let engine = engine(&base);

        let response = engine
            .forward(
                inbound("GET", "/api/sessions/s1/state", b""),
                &tenant(Some("acme")),
                "/api/sessions/acme::s1/state",
                BodyPolicy::Rewrite,
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            &body_bytes(response).await[..],
            b"{\"session_id\":\"s1\",\"status\":\"ready\"}"
        );
        let captured = rx.recv().await.unwrap();
        assert_eq!(captured.uri.path(), "/api/sessions/acme::s1/state");
        assert_eq!(captured.headers.get("x-tenant-id").unwrap(), "acme");
    }

    #[tokio::test]
    async fn test_streamed_response_denamespaced() {
        let (base, mut rx) = spawn_upstream(
            StatusCode::OK,
            "application/json",
            b"{\"session_id\":\"acme::s1\",\"delta\":\"hi\"}\n",
        )
        .await;
        let engine = engine(&base);

        let response = engine
            .forward(
                inbound("POST", "/api/chat", b"{\"session_id\":\"s1\",\"stream\":true}"),
                &tenant(Some("acme")),
                "/api/chat",
                BodyPolicy::Rewrite,
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            APPLICATION_NDJSON
        );
        assert_eq!(
            &body_bytes(response).await[..],
            b"{\"session_id\":\"s1\",\"delta\":\"hi\"}\n"
        );

        let captured = rx.recv().await.unwrap();
        assert_eq!(
            &captured.body[..],
            b"{\"session_id\":\"acme::s1\",\"stream\":true}"
        );
        assert_eq!(
            captured.headers.get("content-length").unwrap(),
            &captured.body.len().to_string()
        );
    }

    #[tokio::test]
    async fn test_opaque_body_forwarded_byte_identical() {
        let (base, mut rx) = spawn_upstream(StatusCode::OK, APPLICATION_JSON, b"{}").await;
        let engine = engine(&base);
        let payload: &'static [u8] = b"\x00\x01{\"session_id\": not json\xff";

        engine
            .forward(
                inbound("POST", "/api/chat", payload),
                &tenant(Some("acme")),
                "/api/chat",
                BodyPolicy::Rewrite,
            )
            .await
            .unwrap();

        let captured = rx.recv().await.unwrap();
        assert_eq!(&captured.body[..], payload);
    }

    #[tokio::test]
    async fn test_opaque_policy_skips_json_rewriting() {
        let (base, mut rx) = spawn_upstream(StatusCode::OK, APPLICATION_JSON, b"{}").await;
        let engine = engine(&base);

        engine
            .forward(
                inbound("POST", "/api/sessions/s1/upload", b"{\"session_id\":\"s1\"}"),
                &tenant(Some("acme")),
                "/api/sessions/acme::s1/upload",
                BodyPolicy::Opaque,
            )
            .await
            .unwrap();

        let captured = rx.recv().await.unwrap();
        assert_eq!(&captured.body[..], b"{\"session_id\":\"s1\"}");
    }

    #[tokio::test]
    async fn test_query_identifier_namespaced() {
        let (base, mut rx) = spawn_upstream(StatusCode::OK, APPLICATION_JSON, b"[]").await;
        let engine = engine(&base);

        let response = engine
            .forward(
                inbound("GET", "/api/history?session_id=s1&limit=5", b""),
                &tenant(Some("acme")),
                "/api/history",
                BodyPolicy::Rewrite,
            )
            .await
            .unwrap();
        assert_eq!(&body_bytes(response).await[..], b"[]");

        let captured = rx.recv().await.unwrap();
        let query: Vec<(String, String)> =
            form_urlencoded::parse(captured.uri.query().unwrap().as_bytes())
                .into_owned()
                .collect();
        assert_eq!(
            query,
            vec![
                ("session_id".to_string(), "acme::s1".to_string()),
                ("limit".to_string(), "5".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_upstream_error_status_passes_through() {
        let (base, _rx) =
            spawn_upstream(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", b"boom").await;
        let engine = engine(&base);

        let response = engine
            .forward(
                inbound("POST", "/api/planning", b"{}"),
                &tenant(Some("acme")),
                "/api/planning",
                BodyPolicy::Rewrite,
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(&body_bytes(response).await[..], b"boom");
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let engine = engine(&format!("http://{}", addr));

        let err = engine
            .forward(
                inbound("GET", "/", b""),
                &tenant(None),
                "/",
                BodyPolicy::Rewrite,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnreachable(_)));
    }

    #[tokio::test]
    async fn test_upstream_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and never answer
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let engine = engine(&format!("http://{}", addr)).with_timeout(Duration::from_millis(100));
        let err = engine
            .forward(
                inbound("GET", "/api/sessions/s1/state", b""),
                &tenant(None),
                "/api/sessions/default::s1/state",
                BodyPolicy::Rewrite,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamTimeout(_)));
    }

    #[tokio::test]
    async fn test_path_and_query_forwarded_verbatim() {
        let (base, mut rx) = spawn_upstream(StatusCode::OK, APPLICATION_JSON, b"{}").await;
        let engine = engine(&base);

        engine
            .forward(
                inbound("GET", "/a/../b?q=it's", b""),
                &tenant(Some("acme")),
                "/a/../b",
                BodyPolicy::Rewrite,
            )
            .await
            .unwrap();

        let captured = rx.recv().await.unwrap();
        assert_eq!(captured.uri.to_string(), "/a/../b?q=it's");
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();

        // Answers with one NDJSON chunk and keeps the response open
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !(request.windows(4).any(|w| w == b"\r\n\r\n") && request.ends_with(b"}")) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let chunk = b"{\"session_id\":\"acme::s1\",\"delta\":\"hi\"}\n";
            let mut response = b"HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n".to_vec();
            response.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            response.extend_from_slice(chunk);
            response.extend_from_slice(b"\r\n");
            socket.write_all(&response).await.unwrap();

            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = closed_tx.send(());
        });

        let engine = engine(&format!("http://{}", addr));
        let response = engine
            .forward(
                inbound("POST", "/api/chat", b"{\"session_id\":\"s1\",\"stream\":true}"),
                &tenant(Some("acme")),
                "/api/chat",
                BodyPolicy::Rewrite,
            )
            .await
            .unwrap();

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(
            &frame.into_data().unwrap()[..],
            b"{\"session_id\":\"s1\",\"delta\":\"hi\"}\n"
        );

        drop(body);
        tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .expect("upstream connection should close")
            .unwrap();
    }

    #[tokio::test]
    async fn test_tenant_metric_label_bounded_without_whitelist() {
        let (base, _rx) = spawn_upstream(StatusCode::OK, APPLICATION_JSON, b"{}").await;
        let metrics = MetricsCollector::new().unwrap();
        let engine = engine(&base).with_metrics(metrics.clone());

        for header in [Some("random-1"), Some("random-2"), None] {
            engine
                .forward(
                    inbound("GET", "/api/x", b""),
                    &tenant(header),
                    "/api/x",
                    BodyPolicy::Rewrite,
                )
                .await
                .unwrap();
        }

        let text = metrics.gather().unwrap();
        assert!(text.contains("wrapper_tenant_requests_total{tenant=\"other\"} 2"));
        assert!(text.contains("wrapper_tenant_requests_total{tenant=\"default\"} 1"));
        assert!(!text.contains("random-1"));
    }

    #[test]
    fn test_tenant_label() {
        let open = engine("http://localhost:8000");
        assert_eq!(open.tenant_label(&tenant(Some("random"))), OTHER_TENANT_LABEL);
        assert_eq!(open.tenant_label(&tenant(None)), "default");

        let config = WrapperConfig {
            valid_tenants: vec!["acme".to_string()],
            ..WrapperConfig::default()
        };
        let whitelisted = ProxyEngine::new(&config).unwrap();
        assert_eq!(whitelisted.tenant_label(&tenant(Some("acme"))), "acme");
    }

    #[test]
    fn test_engine_creation() {
        let engine = engine("http://localhost:8000/");
        assert_eq!(engine.upstream_base(), "http://localhost:8000");
        assert_eq!(engine.timeout(), Duration::from_secs(5));
        assert_eq!(engine.codec().separator(), "::");
    }

    #[test]
    fn test_carries_body() {
        assert!(carries_body(&Method::POST));
        assert!(carries_body(&Method::PUT));
        assert!(carries_body(&Method::PATCH));
        assert!(!carries_body(&Method::GET));
        assert!(!carries_body(&Method::DELETE));
    }
}
