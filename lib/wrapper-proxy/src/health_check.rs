//! Upstream reachability probe behind `GET /health`

use crate::engine::UpstreamClient;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Request, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

/// Health check configuration
#[derive(Clone, Debug)]
pub struct HealthCheckConfig {
    /// Upstream path to probe
    pub http_path: String,
    /// Timeout for a single probe
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            http_path: "/".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Body of the `/health` response
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `ok` when the upstream answered 200, `degraded` otherwise
    pub status: &'static str,
    pub upstream: String,
    pub upstream_ok: bool,
}

/// Probes the upstream root with a short timeout, sharing the engine's pool
#[derive(Clone)]
pub struct HealthChecker {
    client: UpstreamClient,
    upstream_base: String,
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub fn new(client: UpstreamClient, upstream_base: impl Into<String>, config: HealthCheckConfig) -> Self {
        Self {
            client,
            upstream_base: upstream_base.into(),
            config,
        }
    }

    /// `true` iff the upstream answered the probe with 200 within the timeout
    pub async fn check_upstream(&self) -> bool {
        let url = format!("{}{}", self.upstream_base, self.config.http_path);
        let request = match Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .body(Full::new(Bytes::new()))
        {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid health probe URL {}: {}", url, e);
                return false;
            }
        };

        match time::timeout(self.config.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let healthy = response.status() == StatusCode::OK;
                if healthy {
                    debug!("Upstream {} is healthy", url);
                } else {
                    warn!("Upstream {} health probe returned {}", url, response.status());
                }
                healthy
            }
            Ok(Err(e)) => {
                warn!("Upstream {} health probe error: {}", url, e);
                false
            }
            Err(_) => {
                warn!("Upstream {} health probe timeout", url);
                false
            }
        }
    }

    /// Probe and build the `/health` report
    pub async fn report(&self) -> HealthReport {
        let upstream_ok = self.check_upstream().await;
        HealthReport {
            status: if upstream_ok { "ok" } else { "degraded" },
            upstream: self.upstream_base.clone(),
            upstream_ok,
        }
    }
}
