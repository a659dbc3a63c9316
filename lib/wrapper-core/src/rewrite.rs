//! Session identifier rewriting inside query strings, JSON bodies and NDJSON
//! stream chunks.
//!
//! Only the top-level fields named in [`SESSION_ID_FIELDS`] are touched, and
//! only when they hold a non-empty string. Payloads that do not decode as
//! JSON are never an error: they are forwarded untouched.
//!
//! The stream transform works on whatever chunks the upstream delivers. A
//! JSON line split across two chunks fails to parse in both halves and is
//! forwarded without rewriting. Chunks are never buffered or re-split.

use crate::{IdentifierCodec, Tenant};
use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Field names that carry the session identifier, in lookup order
pub const SESSION_ID_FIELDS: [&str; 3] = ["session_id", "sessionId", "sid"];

/// Body field that asks the upstream for an NDJSON stream
pub const STREAM_FLAG_FIELD: &str = "stream";

/// Failure of the stream chunk transform. Always recovered by forwarding the
/// original chunk.
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("chunk is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("failed to re-serialize line: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    /// Caller to upstream: add the tenant namespace
    Outbound,
    /// Upstream to caller: strip the tenant namespace
    Inbound,
}

/// Request body prepared for the upstream call
#[derive(Clone, Debug)]
pub struct OutboundBody {
    pub bytes: Bytes,
    /// Body decoded as JSON (possibly re-serialized after rewriting)
    pub structured: bool,
    /// Body is a JSON object with `"stream": true`
    pub streaming: bool,
}

impl OutboundBody {
    /// Raw bytes forwarded without inspection
    pub fn opaque(bytes: Bytes) -> Self {
        Self {
            bytes,
            structured: false,
            streaming: false,
        }
    }
}

/// Applies the identifier codec for one tenant to every payload shape the
/// proxy handles.
#[derive(Clone, Debug)]
pub struct PayloadRewriter {
    codec: IdentifierCodec,
    tenant: Tenant,
}

impl PayloadRewriter {
    pub fn new(codec: IdentifierCodec, tenant: Tenant) -> Self {
        Self { codec, tenant }
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn codec(&self) -> &IdentifierCodec {
        &self.codec
    }

    /// Namespace identifier query parameters. Returns how many were changed.
    pub fn rewrite_query(&self, pairs: &mut [(String, String)]) -> usize {
        let mut changed = 0;
        for (key, value) in pairs.iter_mut() {
            if value.is_empty() || !SESSION_ID_FIELDS.contains(&key.as_str()) {
                continue;
            }
            let namespaced = self.codec.namespace(value, &self.tenant).into_owned();
            if namespaced != *value {
                *value = namespaced;
                changed += 1;
            }
        }
        changed
    }

    /// Namespace identifier fields of a JSON request object
    pub fn rewrite_request(&self, value: &mut Value) -> usize {
        self.rewrite_fields(value, Direction::Outbound)
    }

    /// Strip the namespace from identifier fields of a JSON response object
    pub fn rewrite_response(&self, value: &mut Value) -> usize {
        self.rewrite_fields(value, Direction::Inbound)
    }

    /// Decode and rewrite a request body. Bodies that are not JSON (multipart
    /// uploads, binary payloads, empty bodies) come back as opaque bytes.
    /// Unchanged JSON keeps its original bytes.
    pub fn rewrite_request_body(&self, raw: Bytes) -> OutboundBody {
        let mut value = match serde_json::from_slice::<Value>(&raw) {
            Ok(value) => value,
            Err(e) => {
                debug!("Request body is not JSON, forwarding opaque bytes: {}", e);
                return OutboundBody::opaque(raw);
            }
        };

        let streaming = is_streaming(&value);
        let bytes = if self.rewrite_request(&mut value) > 0 {
            match serde_json::to_vec(&value) {
                Ok(encoded) => Bytes::from(encoded),
                Err(e) => {
                    debug!("Failed to re-encode request body, forwarding original: {}", e);
                    raw
                }
            }
        } else {
            raw
        };

        OutboundBody {
            bytes,
            structured: true,
            streaming,
        }
    }

    /// Rewrite a fully buffered upstream response body. Anything that is not
    /// a JSON object is returned byte-identical.
    pub fn rewrite_response_body(&self, raw: Bytes) -> Bytes {
        let mut value = match serde_json::from_slice::<Value>(&raw) {
            Ok(value) => value,
            Err(_) => return raw,
        };
        if self.rewrite_response(&mut value) == 0 {
            return raw;
        }
        match serde_json::to_vec(&value) {
            Ok(encoded) => Bytes::from(encoded),
            Err(_) => raw,
        }
    }

    /// Rewrite one NDJSON chunk, falling back to the original bytes when the
    /// transform fails.
    pub fn rewrite_chunk(&self, chunk: Bytes) -> Bytes {
        match self.try_rewrite_chunk(&chunk) {
            Ok(Some(rewritten)) => rewritten,
            Ok(None) => chunk,
            Err(e) => {
                debug!("[{}] Forwarding stream chunk unmodified: {}", self.tenant, e);
                chunk
            }
        }
    }

    /// Rewrite one NDJSON chunk line by line. `Ok(None)` means no line
    /// needed rewriting and the chunk can be forwarded as is.
    pub fn try_rewrite_chunk(&self, chunk: &[u8]) -> Result<Option<Bytes>, RewriteError> {
        let text = std::str::from_utf8(chunk)?;
        let mut changed = false;
        let mut lines = Vec::new();

        for line in text.split('\n') {
            if line.trim().is_empty() {
                lines.push(line.to_string());
                continue;
            }
            let Ok(mut value) = serde_json::from_str::<Value>(line) else {
                lines.push(line.to_string());
                continue;
            };
            if self.rewrite_response(&mut value) > 0 {
                lines.push(serde_json::to_string(&value)?);
                changed = true;
            } else {
                lines.push(line.to_string());
            }
        }

        if !changed {
            return Ok(None);
        }
        Ok(Some(Bytes::from(lines.join("\n"))))
    }

    fn rewrite_fields(&self, value: &mut Value, direction: Direction) -> usize {
        match value {
            Value::Object(map) => self.rewrite_map(map, direction),
            _ => 0,
        }
    }

    fn rewrite_map(&self, map: &mut Map<String, Value>, direction: Direction) -> usize {
        let mut changed = 0;
        for field in SESSION_ID_FIELDS {
            let Some(Value::String(id)) = map.get_mut(field) else {
                continue;
            };
            if id.is_empty() {
                continue;
            }
            let rewritten = match direction {
                Direction::Outbound => self.codec.namespace(id, &self.tenant).into_owned(),
                Direction::Inbound => self.codec.denamespace(id, &self.tenant).to_string(),
            };
            if rewritten != *id {
                *id = rewritten;
                changed += 1;
            }
        }
        changed
    }
}

/// `true` when the body is a JSON object carrying `"stream": true`
pub fn is_streaming(value: &Value) -> bool {
    matches!(value.get(STREAM_FLAG_FIELD), Some(Value::Bool(true)))
}
