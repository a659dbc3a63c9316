//! Tenant namespacing core for the LLMTwins wrapper
//!
//! This library provides:
//! - Immutable wrapper configuration
//! - Tenant resolution from the tenant header
//! - Session identifier namespacing
//! - Identifier rewriting for query strings, JSON bodies and NDJSON chunks

pub mod codec;
pub mod config;
pub mod error;
pub mod rewrite;
pub mod tenant;

pub use codec::{IdentifierCodec, DEFAULT_SEPARATOR};
pub use config::{LoggingConfig, WrapperConfig};
pub use error::{CoreError, Result};
pub use rewrite::{is_streaming, OutboundBody, PayloadRewriter, RewriteError, SESSION_ID_FIELDS};
pub use tenant::{Tenant, TenantResolver};
