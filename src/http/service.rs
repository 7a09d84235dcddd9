//! Rate limiting middleware for axum routers.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::config::TurnstileConfig;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::{
    peer_addr, AddressSource, CounterStore, Decision, Limit, RateLimitRules, RateLimiter,
    RedisStore,
};

const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Body sent with every 429 response.
pub const TOO_MANY_REQUESTS_BODY: &str = "429, Too Many Requests";

/// Rate limiting in front of an HTTP handler.
///
/// Rules and the address source are fixed at construction. The counter store
/// may be shared with other limiters and other processes.
#[derive(Debug, Clone)]
pub struct HttpLimiter {
    rules: RateLimitRules,
    source: AddressSource,
    limiter: RateLimiter,
}

impl HttpLimiter {
    /// Create a limiter over an existing counter store.
    pub fn new<I>(limits: I, source: AddressSource, store: Arc<dyn CounterStore>) -> Self
    where
        I: IntoIterator<Item = Limit>,
    {
        Self {
            rules: RateLimitRules::build(limits),
            source,
            limiter: RateLimiter::new(store),
        }
    }

    /// Create a limiter, connecting to Redis through `REDIS_URL` when no
    /// store is supplied.
    pub async fn connect<I>(
        limits: I,
        source: AddressSource,
        store: Option<Arc<dyn CounterStore>>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Limit>,
    {
        let store: Arc<dyn CounterStore> = match store {
            Some(store) => store,
            None => Arc::new(RedisStore::from_env().await?),
        };
        Ok(Self::new(limits, source, store))
    }

    /// Create a limiter from loaded configuration. Duplicate or empty rules
    /// are rejected.
    pub fn from_config(config: &TurnstileConfig, store: Arc<dyn CounterStore>) -> Result<Self> {
        Ok(Self {
            rules: RateLimitRules::try_build(config.limits.iter().cloned())?,
            source: config.address_source.clone(),
            limiter: RateLimiter::with_namespace(store, config.store.namespace.clone()),
        })
    }

    /// Use a different first segment for counting keys.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.limiter = RateLimiter::with_namespace(self.limiter.store(), namespace);
        self
    }

    pub fn rules(&self) -> &RateLimitRules {
        &self.rules
    }

    pub fn source(&self) -> &AddressSource {
        &self.source
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Decide a request without running it.
    ///
    /// Returns `Ok(None)` when no rule covers the request's method and path.
    pub async fn evaluate(&self, parts: &Parts) -> Result<Option<Decision>> {
        let Some(limit) = self.rules.lookup(parts.method.as_str(), parts.uri.path()) else {
            return Ok(None);
        };

        let client = self
            .source
            .resolve(&parts.headers, peer_addr(&parts.extensions))?;

        self.limiter.check(limit, &client).await.map(Some)
    }

    /// Wrap a router so every request passes through the limiter first.
    ///
    /// With [`AddressSource::PeerAddress`] the router must be served with
    /// `into_make_service_with_connect_info::<SocketAddr>()`, as
    /// [`HttpServer`](super::HttpServer) does. Without connect info every
    /// limited request is answered with 400.
    pub fn handle<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(Arc::new(self), rate_limit))
    }
}

/// Middleware entry point; use with `axum::middleware::from_fn_with_state`.
///
/// Requests without a rule pass through untouched. Everything else is either
/// forwarded with rate limit headers or answered here without reaching `next`.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn rate_limit(
    State(limiter): State<Arc<HttpLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    let decision = match limiter.evaluate(&parts).await {
        Ok(Some(decision)) => decision,
        Ok(None) => return next.run(Request::from_parts(parts, body)).await,
        Err(TurnstileError::Address(e)) => {
            warn!(error = %e, "Rejecting request without a client address");
            return StatusCode::BAD_REQUEST.into_response();
        }
        Err(e) if e.is_infrastructure() => {
            error!(error = %e, "Counter store failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(e) => {
            error!(error = %e, "Rate limit evaluation failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match decision {
        Decision::Admit { .. } => {
            let mut response = next.run(Request::from_parts(parts, body)).await;
            set_headers(response.headers_mut(), &decision);
            response
        }
        Decision::Reject { .. } => {
            debug!(decision = ?decision, "Request rejected");
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Body::from(TOO_MANY_REQUESTS_BODY))
                .into_response();
            set_headers(response.headers_mut(), &decision);
            response
        }
    }
}

fn set_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_REMAINING),
        HeaderValue::from(decision.remaining()),
    );
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_LIMIT),
        HeaderValue::from(decision.limit()),
    );
    if let Some(retry_after) = decision.retry_after() {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{MemoryStore, Ttl};
    use async_trait::async_trait;
    use axum::extract::ConnectInfo;
    use axum::http::Request as HttpRequest;
    use axum::routing::get;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    /// A store that is always unreachable.
    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn incr(&self, _key: &str) -> Result<u64> {
            Err(TurnstileError::Store("connection refused".to_string()))
        }

        async fn expire(&self, _key: &str, _seconds: u64) -> Result<bool> {
            Err(TurnstileError::Store("connection refused".to_string()))
        }

        async fn ttl(&self, _key: &str) -> Result<Ttl> {
            Err(TurnstileError::Store("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(TurnstileError::Store("connection refused".to_string()))
        }
    }

    fn limits() -> Vec<Limit> {
        vec![
            Limit::new("GET", "/test", 5, 30),
            Limit::new("GET", "/expire", 5, 1),
        ]
    }

    fn app(limiter: HttpLimiter) -> Router {
        let router = Router::new()
            .route("/test", get(|| async { "ok" }))
            .route("/expire", get(|| async { "ok" }))
            .route("/open", get(|| async { "ok" }));
        limiter.handle(router)
    }

    fn request(path: &str, peer: &str) -> Request {
        let mut request = HttpRequest::builder().uri(path).body(Body::empty()).unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    fn header(response: &Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    }

    async fn body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_limits_after_quota() {
        let store = Arc::new(MemoryStore::new());
        let app = app(HttpLimiter::new(limits(), AddressSource::PeerAddress, store));

        for expected in (0..5).rev() {
            let response = app.clone().oneshot(request("/test", "10.0.0.1:5000")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header(&response, "x-ratelimit-remaining"), Some(expected.to_string()));
            assert_eq!(header(&response, "x-ratelimit-limit").as_deref(), Some("5"));
            assert_eq!(header(&response, "retry-after"), None);
            assert_eq!(body(response).await, "ok");
        }

        let response = app.clone().oneshot(request("/test", "10.0.0.1:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some("0"));
        assert_eq!(header(&response, "x-ratelimit-limit").as_deref(), Some("5"));
        assert_eq!(header(&response, "retry-after").as_deref(), Some("30"));
        assert_eq!(body(response).await, TOO_MANY_REQUESTS_BODY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_restores_access() {
        let store = Arc::new(MemoryStore::new());
        let app = app(HttpLimiter::new(limits(), AddressSource::PeerAddress, store));

        for _ in 0..5 {
            let response = app.clone().oneshot(request("/expire", "10.0.0.1:5000")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.clone().oneshot(request("/expire", "10.0.0.1:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        tokio::time::advance(std::time::Duration::from_secs(1)).await;

        let response = app.clone().oneshot(request("/expire", "10.0.0.1:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn test_unlimited_route_passes_through() {
        let store = Arc::new(MemoryStore::new());
        let app = app(HttpLimiter::new(limits(), AddressSource::PeerAddress, store.clone()));

        for _ in 0..20 {
            let open = HttpRequest::builder().uri("/open").body(Body::empty()).unwrap();
            let response = app.clone().oneshot(open).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header(&response, "x-ratelimit-remaining"), None);
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_address_is_bad_request() {
        let store = Arc::new(MemoryStore::new());
        let source = AddressSource::header("X-Forwarded-For");
        let app = app(HttpLimiter::new(limits(), source, store));

        let response = app.clone().oneshot(request("/test", "10.0.0.1:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let proxied = HttpRequest::builder()
            .uri("/test")
            .header("X-Forwarded-For", "1.1.1.1:80, 2.2.2.2:80")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(proxied).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let app = app(HttpLimiter::new(limits(), AddressSource::PeerAddress, Arc::new(DownStore)));

        let response = app.clone().oneshot(request("/test", "10.0.0.1:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header(&response, "x-ratelimit-limit"), None);

        let response = app.clone().oneshot(request("/open", "10.0.0.1:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    /// A store whose Redis connection is gone.
    struct DroppedRedisStore;

    #[async_trait]
    impl CounterStore for DroppedRedisStore {
        async fn incr(&self, _key: &str) -> Result<u64> {
            Err(dropped())
        }

        async fn expire(&self, _key: &str, _seconds: u64) -> Result<bool> {
            Err(dropped())
        }

        async fn ttl(&self, _key: &str) -> Result<Ttl> {
            Err(dropped())
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(dropped())
        }
    }

    fn dropped() -> TurnstileError {
        redis::RedisError::from((redis::ErrorKind::IoError, "connection dropped")).into()
    }

    #[tokio::test]
    async fn test_redis_failure_is_server_error() {
        let app = app(HttpLimiter::new(
            limits(),
            AddressSource::PeerAddress,
            Arc::new(DroppedRedisStore),
        ));

        let response = app.clone().oneshot(request("/test", "10.0.0.1:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(response).await, "");
    }

    #[tokio::test]
    async fn test_missing_connect_info_is_bad_request() {
        let store = Arc::new(MemoryStore::new());
        let app = app(HttpLimiter::new(limits(), AddressSource::PeerAddress, store.clone()));

        let bare = HttpRequest::builder().uri("/test").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(bare).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_forwarded_clients_counted_separately() {
        let store = Arc::new(MemoryStore::new());
        let limiter = HttpLimiter::new(
            vec![Limit::new("GET", "/test", 1, 60)],
            AddressSource::header("X-Forwarded-For"),
            store,
        );
        let app = app(limiter);

        let from = |client: &str| {
            HttpRequest::builder()
                .uri("/test")
                .header("X-Forwarded-For", format!("{}, 10.0.0.1", client))
                .body(Body::empty())
                .unwrap()
        };

        assert_eq!(app.clone().oneshot(from("1.1.1.1")).await.unwrap().status(), StatusCode::OK);
        assert_eq!(app.clone().oneshot(from("2.2.2.2")).await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            app.clone().oneshot(from("1.1.1.1:9000")).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_evaluate_without_rule() {
        let limiter = HttpLimiter::new(limits(), AddressSource::PeerAddress, Arc::new(MemoryStore::new()));
        let (parts, _) = HttpRequest::builder()
            .method("POST")
            .uri("/test")
            .body(Body::empty())
            .unwrap()
            .into_parts();

        assert_eq!(limiter.evaluate(&parts).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_custom_namespace() {
        let store = Arc::new(MemoryStore::new());
        let limiter = HttpLimiter::new(limits(), AddressSource::PeerAddress, store.clone())
            .with_namespace("go-ratelimit");
        let (parts, _) = request("/test", "10.0.0.1:5000").into_parts();

        limiter.evaluate(&parts).await.unwrap();
        assert_eq!(
            store.ttl("go-ratelimit:(10.0.0.1)GET/test").await.unwrap(),
            Ttl::Expires(30)
        );
    }
}
