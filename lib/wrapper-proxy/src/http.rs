//! Response body type and helpers shared by the engine and the gateway

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Response, StatusCode};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body of every response the gateway returns, buffered or streamed
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_NDJSON: &str = "application/x-ndjson";

/// Wrap buffered bytes as a [`ProxyBody`]
pub fn full(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Build a response with a buffered body
pub fn bytes_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
}

/// Serialize `value` as a JSON response
pub fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<ProxyBody> {
    let mut response = bytes_response(status, value.to_string());
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    response
}

/// Create a 405 Method Not Allowed response
pub fn method_not_allowed_response() -> Response<ProxyBody> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({ "detail": "Method Not Allowed" }),
    )
}

/// Check if header is hop-by-hop (should not be forwarded)
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers that must not be copied onto a re-sent message: hop-by-hop
/// headers, `host`, and `content-length` (the body may have been rewritten).
pub fn is_stale_on_resend(name: &str) -> bool {
    name == "host" || name == "content-length" || is_hop_by_hop_header(name)
}

/// Copy end-to-end headers, dropping the ones invalidated by re-sending
pub fn copy_forwardable_headers(source: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(source.len());
    for (name, value) in source {
        if !is_stale_on_resend(name.as_str()) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop_header("connection"));
        assert!(is_hop_by_hop_header("keep-alive"));
        assert!(is_hop_by_hop_header("transfer-encoding"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("authorization"));
    }

    #[test]
    fn test_copy_forwardable_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("wrapper.local"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        headers.append(header::ACCEPT, HeaderValue::from_static("text/plain"));
        headers.append(header::ACCEPT, HeaderValue::from_static("application/json"));

        let filtered = copy_forwardable_headers(&headers);
        assert!(filtered.get(header::HOST).is_none());
        assert!(filtered.get(header::CONTENT_LENGTH).is_none());
        assert!(filtered.get(header::CONNECTION).is_none());
        assert_eq!(filtered.get(header::CONTENT_TYPE).unwrap(), APPLICATION_JSON);
        assert_eq!(filtered.get_all(header::ACCEPT).iter().count(), 2);
    }

    #[test]
    fn test_json_response() {
        let response = json_response(StatusCode::OK, &serde_json::json!({"status": "ok"}));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            APPLICATION_JSON
        );
    }

    #[test]
    fn test_method_not_allowed_response() {
        assert_eq!(
            method_not_allowed_response().status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
