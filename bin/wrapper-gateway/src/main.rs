use anyhow::Result;
use hyper::{body::Incoming, header::HeaderName, server::conn::http1, Request, Response, StatusCode};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wrapper_core::{LoggingConfig, TenantResolver, WrapperConfig};
use wrapper_proxy::http::{bytes_response, json_response, method_not_allowed_response};
use wrapper_proxy::{
    HealthCheckConfig, HealthChecker, LoggingMiddleware, MetricsCollector, MetricsMiddleware,
    MiddlewareChain, MiddlewareContext, ProxyBody, ProxyEngine, ProxyError, TracingMiddleware,
    ERROR_KIND_METADATA_KEY, ROUTE_METADATA_KEY, TENANT_METADATA_KEY,
};

mod router;

use router::{RouteKind, RouteTable};

const SERVICE_NAME: &str = "llmtwins-tenant-wrapper";

/// How long in-flight connections may finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Everything a request task needs, shared read-only
struct AppState {
    resolver: TenantResolver,
    tenant_header: HeaderName,
    routes: RouteTable,
    engine: ProxyEngine,
    health: HealthChecker,
    metrics: MetricsCollector,
    middleware: MiddlewareChain,
}

impl AppState {
    fn new(config: &WrapperConfig) -> Result<Self> {
        let metrics = MetricsCollector::new()?;
        let engine = ProxyEngine::new(config)?.with_metrics(metrics.clone());
        let health = HealthChecker::new(
            engine.client().clone(),
            engine.upstream_base(),
            HealthCheckConfig::default(),
        );
        let middleware = MiddlewareChain::new()
            .add(TracingMiddleware::with_service_name(SERVICE_NAME.to_string()))
            .add(LoggingMiddleware)
            .add(MetricsMiddleware::new(metrics.clone()));

        Ok(Self {
            resolver: TenantResolver::from_config(config),
            tenant_header: engine.tenant_header().clone(),
            routes: RouteTable::new(),
            engine,
            health,
            metrics,
            middleware,
        })
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(WrapperConfig::load()?);
    init_tracing(&config.logging);

    info!("Starting wrapper-gateway...");
    info!("  - Upstream: {}", config.upstream_base_url);
    info!("  - Default tenant: {}", config.default_tenant);
    if config.valid_tenants.is_empty() {
        info!("  - Tenant whitelist: disabled");
    } else {
        info!("  - Tenant whitelist: {}", config.valid_tenants.join(", "));
    }
    info!("  - Upstream timeout: {:?}", config.upstream_timeout());

    let state = Arc::new(AppState::new(&config)?);
    info!(
        "Middleware chain initialized with {} middleware (tracing, logging, metrics)",
        state.middleware.len()
    );

    let cors = config.cors_enabled.then(CorsLayer::permissive);
    let service = ServiceBuilder::new()
        .option_layer(cors)
        .service(tower::service_fn(move |req: Request<Incoming>| {
            handle_request(req, state.clone())
        }));

    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("HTTP server listening on {}", listen_addr);

    let mut connections = JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Error accepting HTTP connection: {}", e);
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let service = TowerToHyperService::new(service.clone());

                connections.spawn(async move {
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                break;
            }
        }
    }

    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            "{} connections still open after {:?}, aborting",
            connections.len(),
            SHUTDOWN_GRACE
        );
        connections.shutdown().await;
    }

    info!("wrapper-gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<ProxyBody>, Infallible> {
    let context = MiddlewareContext::from_request(&req);
    Ok(process(req, &state, &context).await)
}

/// Run the middleware hooks around dispatch and render proxy errors
async fn process<B>(req: Request<B>, state: &AppState, context: &MiddlewareContext) -> Response<ProxyBody>
where
    B: hyper::body::Body<Data = hyper::body::Bytes> + Send,
    B::Error: Into<wrapper_proxy::http::BoxError>,
{
    let response = match dispatch(req, state, context).await {
        Ok(response) => response,
        Err(e) => {
            context.set_metadata(ERROR_KIND_METADATA_KEY.to_string(), e.kind().to_string());
            if let Err(mw_err) = state.middleware.on_error(context, &e.to_string()).await {
                debug!("Middleware on_error error: {}", mw_err);
            }
            e.into_response()
        }
    };

    if let Err(e) = state
        .middleware
        .on_response(context, response.status().as_u16())
        .await
    {
        debug!("Middleware on_response error: {}", e);
    }

    response
}

async fn dispatch<B>(
    req: Request<B>,
    state: &AppState,
    context: &MiddlewareContext,
) -> Result<Response<ProxyBody>, ProxyError>
where
    B: hyper::body::Body<Data = hyper::body::Bytes> + Send,
    B::Error: Into<wrapper_proxy::http::BoxError>,
{
    let path = req.uri().path().to_string();
    let route = match state.routes.match_route(req.method(), &path) {
        Some(route) => route,
        None => {
            if let Err(e) = state.middleware.on_request(context).await {
                debug!("Middleware on_request error: {}", e);
            }
            return Ok(method_not_allowed_response());
        }
    };
    context.set_metadata(ROUTE_METADATA_KEY.to_string(), route.pattern.to_string());

    // Local endpoints do not depend on the caller's tenant
    if route.kind != RouteKind::Proxy {
        if let Err(e) = state.middleware.on_request(context).await {
            debug!("Middleware on_request error: {}", e);
        }
        return local_response(route.kind, state).await;
    }

    let header_value = req
        .headers()
        .get(&state.tenant_header)
        .and_then(|value| value.to_str().ok());
    let tenant = state.resolver.resolve(header_value);
    if let Ok(tenant) = &tenant {
        context.set_metadata(TENANT_METADATA_KEY.to_string(), tenant.to_string());
    }

    if let Err(e) = state.middleware.on_request(context).await {
        debug!("Middleware on_request error: {}", e);
    }

    let tenant = tenant?;
    let upstream_path = route.upstream_path(&tenant, state.engine.codec());
    state
        .engine
        .forward(req, &tenant, &upstream_path, route.policy)
        .await
}

async fn local_response(kind: RouteKind, state: &AppState) -> Result<Response<ProxyBody>, ProxyError> {
    match kind {
        RouteKind::Root => Ok(json_response(
            StatusCode::OK,
            &serde_json::json!({ "status": "ok", "service": SERVICE_NAME }),
        )),
        RouteKind::Health => {
            let report = state.health.report().await;
            let body = serde_json::to_value(&report).map_err(anyhow::Error::from)?;
            Ok(json_response(StatusCode::OK, &body))
        }
        RouteKind::Metrics => {
            let text = state.metrics.gather()?;
            let mut response = bytes_response(StatusCode::OK, text);
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(response)
        }
        RouteKind::Proxy => Err(ProxyError::Internal(anyhow::anyhow!(
            "{:?} is not a local route",
            kind
        ))),
    }
}
