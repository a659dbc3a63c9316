//! Chunk-by-chunk NDJSON pump from the upstream body to the caller
//!
//! Each upstream data frame is rewritten and yielded before the next one is
//! polled, so nothing is buffered beyond a single chunk. Dropping the
//! returned stream (the caller went away) drops the upstream body, which
//! closes the upstream connection.

use crate::error::ProxyError;
use crate::http::BoxError;
use crate::metrics::MetricsCollector;
use bytes::Bytes;
use futures::Stream;
use http_body_util::BodyExt;
use hyper::body::{Body, Frame};
use std::time::Duration;
use tracing::{debug, warn};
use wrapper_core::PayloadRewriter;

struct PumpState<B> {
    body: B,
    rewriter: PayloadRewriter,
    chunk_timeout: Duration,
    metrics: Option<MetricsCollector>,
}

impl<B> PumpState<B> {
    fn rewrite(&self, chunk: Bytes) -> Bytes {
        let (out, outcome) = match self.rewriter.try_rewrite_chunk(&chunk) {
            Ok(Some(rewritten)) => (rewritten, "rewritten"),
            Ok(None) => (chunk, "unchanged"),
            Err(e) => {
                debug!(
                    "[{}] Forwarding stream chunk unmodified: {}",
                    self.rewriter.tenant(),
                    e
                );
                (chunk, "passthrough")
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.stream_chunks_total.with_label_values(&[outcome]).inc();
        }
        out
    }
}

/// Turn an upstream body into a stream of rewritten data frames.
///
/// Every wait for the next frame is bounded by `chunk_timeout`; the stream
/// as a whole is not. Trailers are dropped. A transport error or timeout is
/// yielded once and ends the stream, leaving already emitted bytes in place.
pub fn rewrite_stream<B>(
    body: B,
    rewriter: PayloadRewriter,
    chunk_timeout: Duration,
    metrics: Option<MetricsCollector>,
) -> impl Stream<Item = Result<Frame<Bytes>, BoxError>> + Send + 'static
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Into<BoxError>,
{
    let state = PumpState {
        body,
        rewriter,
        chunk_timeout,
        metrics,
    };

    futures::stream::unfold(Some(state), |state| async move {
        let mut state = match state {
            Some(state) => state,
            None => return None,
        };

        loop {
            let next = tokio::time::timeout(state.chunk_timeout, state.body.frame()).await;
            match next {
                Err(_) => {
                    warn!(
                        "[{}] Upstream stream stalled for {:?}, closing",
                        state.rewriter.tenant(),
                        state.chunk_timeout
                    );
                    let err: BoxError = Box::new(ProxyError::UpstreamTimeout(state.chunk_timeout));
                    return Some((Err(err), None));
                }
                Ok(None) => return None,
                Ok(Some(Err(e))) => {
                    let err: BoxError = e.into();
                    warn!(
                        "[{}] Upstream stream failed mid-flight: {}",
                        state.rewriter.tenant(),
                        err
                    );
                    return Some((Err(err), None));
                }
                Ok(Some(Ok(frame))) => match frame.into_data() {
                    Ok(chunk) => {
                        let out = state.rewrite(chunk);
                        return Some((Ok(Frame::data(out)), Some(state)));
                    }
                    Err(_) => continue,
                },
            }
        }
    })
}
