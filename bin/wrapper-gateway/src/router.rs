//! Static route table mapping inbound paths to upstream paths

use hyper::Method;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tracing::debug;
use wrapper_core::{IdentifierCodec, Tenant};
use wrapper_proxy::BodyPolicy;

/// Path segment carrying a session identifier
const SESSION_ID_SEGMENT: &str = "{session_id}";

/// Bytes escaped when a namespaced identifier is put back into a path
/// segment. `:` stays literal so `tenant::id` remains readable upstream.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Pattern label of the catch-all route
pub const CATCH_ALL_PATTERN: &str = "/{path}";

/// What the gateway does with a matched request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteKind {
    /// Local service status
    Root,
    /// Local status plus upstream health check
    Health,
    /// Prometheus exposition
    Metrics,
    /// Forward upstream
    Proxy,
}

#[derive(Debug)]
struct Route {
    method: Method,
    pattern: &'static str,
    kind: RouteKind,
    policy: BodyPolicy,
}

impl Route {
    fn new(method: Method, pattern: &'static str, kind: RouteKind) -> Self {
        Self {
            method,
            pattern,
            kind,
            policy: BodyPolicy::Rewrite,
        }
    }

    fn opaque(mut self) -> Self {
        self.policy = BodyPolicy::Opaque;
        self
    }

    /// Match `path` against the pattern, returning the captured session id
    /// segment (if the pattern has one).
    fn matches<'p>(&self, path: &'p str) -> Option<Option<&'p str>> {
        let mut captured = None;
        let mut pattern_segments = self.pattern.split('/');
        let mut path_segments = path.split('/');

        loop {
            match (pattern_segments.next(), path_segments.next()) {
                (None, None) => return Some(captured),
                (Some(SESSION_ID_SEGMENT), Some(segment)) if !segment.is_empty() => {
                    captured = Some(segment);
                }
                (Some(expected), Some(segment)) if expected == segment => {}
                _ => return None,
            }
        }
    }
}

/// A request matched to a route
#[derive(Debug, PartialEq, Eq)]
pub struct RouteMatch<'p> {
    pub kind: RouteKind,
    /// Pattern used as the metrics route label
    pub pattern: &'static str,
    pub policy: BodyPolicy,
    path: &'p str,
    session_id: Option<&'p str>,
}

impl RouteMatch<'_> {
    /// Upstream path with the path-embedded session id namespaced for
    /// `tenant`. Paths without one are forwarded verbatim.
    ///
    /// The segment is percent-decoded before namespacing and the result is
    /// encoded again, so a tenant id can never add path segments or a query.
    pub fn upstream_path(&self, tenant: &Tenant, codec: &IdentifierCodec) -> String {
        match self.session_id {
            Some(segment) => {
                let session_id = percent_decode_str(segment)
                    .decode_utf8()
                    .unwrap_or(std::borrow::Cow::Borrowed(segment));
                let namespaced = codec.namespace(&session_id, tenant);
                let encoded = utf8_percent_encode(&namespaced, SEGMENT).to_string();
                self.pattern.replace(SESSION_ID_SEGMENT, &encoded)
            }
            None => self.path.to_string(),
        }
    }
}

/// Ordered route list, first match wins, catch-all last
pub struct RouteTable {
    routes: Vec<Route>,
    catch_all_methods: Vec<Method>,
}

impl RouteTable {
    pub fn new() -> Self {
        let routes = vec![
            Route::new(Method::GET, "/", RouteKind::Root),
            Route::new(Method::GET, "/health", RouteKind::Health),
            Route::new(Method::POST, "/api/sessions", RouteKind::Proxy),
            Route::new(Method::GET, "/api/sessions/{session_id}/state", RouteKind::Proxy),
            Route::new(Method::POST, "/api/sessions/{session_id}/upload", RouteKind::Proxy).opaque(),
            Route::new(Method::POST, "/api/chat", RouteKind::Proxy),
            Route::new(Method::POST, "/api/mapping", RouteKind::Proxy),
            Route::new(Method::POST, "/api/mapping/update", RouteKind::Proxy),
            Route::new(Method::POST, "/api/mapping/revise", RouteKind::Proxy),
            Route::new(
                Method::POST,
                "/api/sessions/{session_id}/pipeline/one_click",
                RouteKind::Proxy,
            ),
            Route::new(Method::POST, "/api/planning", RouteKind::Proxy),
            Route::new(Method::GET, "/metrics", RouteKind::Metrics),
        ];

        Self {
            routes,
            catch_all_methods: vec![
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
            ],
        }
    }

    /// Find the route for a request. `None` means the method is not served
    /// on this path. HEAD is served wherever GET is.
    pub fn match_route<'p>(&self, method: &Method, path: &'p str) -> Option<RouteMatch<'p>> {
        for route in &self.routes {
            let head_on_get = route.method == Method::GET && *method == Method::HEAD;
            if route.method != *method && !head_on_get {
                continue;
            }
            if let Some(session_id) = route.matches(path) {
                debug!("Matched route {} {}", method, route.pattern);
                return Some(RouteMatch {
                    kind: route.kind,
                    pattern: route.pattern,
                    policy: route.policy,
                    path,
                    session_id,
                });
            }
        }

        if self.catch_all_methods.contains(method) {
            debug!("Catch-all route for {} {}", method, path);
            return Some(RouteMatch {
                kind: RouteKind::Proxy,
                pattern: CATCH_ALL_PATTERN,
                policy: BodyPolicy::Rewrite,
                path,
                session_id: None,
            });
        }

        None
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
