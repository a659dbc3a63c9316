//! Proxy-level failures, kept distinct from upstream error responses

use crate::http::{json_response, ProxyBody};
use hyper::{Response, StatusCode};
use std::time::Duration;
use thiserror::Error;
use wrapper_core::CoreError;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Invalid upstream URL '{url}': {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("Failed to read request body: {0}")]
    InboundBody(String),

    #[error("Internal proxy error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ProxyError {
    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidTenant(_) => "invalid_tenant",
            ProxyError::UpstreamUnreachable(_) => "upstream_unreachable",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
            ProxyError::InvalidUpstreamUrl { .. } => "invalid_upstream_url",
            ProxyError::InboundBody(_) => "inbound_body",
            ProxyError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTenant(_) => StatusCode::FORBIDDEN,
            ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidUpstreamUrl { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::InboundBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render as a `{"detail": ...}` JSON response
    pub fn into_response(self) -> Response<ProxyBody> {
        json_response(
            self.status_code(),
            &serde_json::json!({ "detail": self.to_string() }),
        )
    }
}

impl From<CoreError> for ProxyError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidTenant(tenant) => ProxyError::InvalidTenant(tenant),
            other => ProxyError::Internal(other.into()),
        }
    }
}
