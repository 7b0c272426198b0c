use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use clientgate::{
    admission_middleware, AdmissionMiddleware, LimiterBuilder, LimiterConfig, ManualClock,
    RemoteAddr,
};
use std::net::{SocketAddr, SocketAddrV6};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    gate: AdmissionMiddleware,
    clock: Arc<ManualClock>,
    hits: Arc<AtomicUsize>,
}

impl TestApp {
    fn new(config: LimiterConfig) -> Self {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let gate = LimiterBuilder::new()
            .config(config)
            .clock(clock.clone())
            .spawn_sweeper(false)
            .build()
            .unwrap();
        Self::with_gate(gate, clock)
    }

    fn with_gate(gate: AdmissionMiddleware, clock: Arc<ManualClock>) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let router = Router::new()
            .route(
                "/",
                get(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        "hello"
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(
                gate.clone(),
                admission_middleware,
            ));

        Self {
            router,
            gate,
            clock,
            hits,
        }
    }

    async fn from_addr(&self, addr: &str) -> Response {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(RemoteAddr(addr.to_string()));
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_burst_then_too_many_requests() {
    let app = TestApp::new(LimiterConfig::new(2, 5));

    for _ in 0..5 {
        let response = app.from_addr("10.0.0.1:40000").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "hello");
    }

    let response = app.from_addr("10.0.0.1:40000").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/html; charset=utf-8"
    );
    assert_eq!(body_text(response).await, "Too Many Requests");

    // the rejected request never reached the handler
    assert_eq!(app.hits(), 5);
}

#[tokio::test]
async fn test_refill_after_half_second() {
    let app = TestApp::new(LimiterConfig::new(2, 5));

    for _ in 0..5 {
        assert_eq!(app.from_addr("10.0.0.1:1").await.status(), StatusCode::OK);
    }
    assert_eq!(
        app.from_addr("10.0.0.1:1").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    app.clock.advance(Duration::from_millis(500));

    assert_eq!(app.from_addr("10.0.0.1:1").await.status(), StatusCode::OK);
    assert_eq!(
        app.from_addr("10.0.0.1:1").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_sustained_rate_after_burst() {
    let app = TestApp::new(LimiterConfig::new(4, 4));

    for _ in 0..4 {
        app.from_addr("10.9.9.9:1").await;
    }

    // one token every 250ms
    for _ in 0..4 {
        app.clock.advance_ms(250);
        assert_eq!(app.from_addr("10.9.9.9:1").await.status(), StatusCode::OK);
        assert_eq!(
            app.from_addr("10.9.9.9:1").await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
    assert_eq!(app.hits(), 8);
}

#[tokio::test]
async fn test_clients_are_independent() {
    let app = TestApp::new(LimiterConfig::new(2, 5));

    for _ in 0..20 {
        app.from_addr("10.0.0.1:1").await;
    }

    for _ in 0..5 {
        assert_eq!(app.from_addr("10.0.0.2:1").await.status(), StatusCode::OK);
    }
    assert_eq!(
        app.from_addr("10.0.0.2:1").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_ports_share_one_budget() {
    let app = TestApp::new(LimiterConfig::new(1, 2));

    assert_eq!(app.from_addr("192.0.2.5:1000").await.status(), StatusCode::OK);
    assert_eq!(app.from_addr("192.0.2.5:2000").await.status(), StatusCode::OK);
    assert_eq!(
        app.from_addr("192.0.2.5:3000").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(app.gate.registry().len(), 1);
}

#[tokio::test]
async fn test_ipv6_origin() {
    let app = TestApp::new(LimiterConfig::new(1, 1));

    assert_eq!(app.from_addr("[2001:db8::7]:443").await.status(), StatusCode::OK);
    assert_eq!(
        app.from_addr("[2001:db8::7]:444").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_evicted_client_gets_fresh_burst() {
    let app = TestApp::new(LimiterConfig::new(2, 4));

    for _ in 0..4 {
        assert_eq!(app.from_addr("10.0.0.3:1").await.status(), StatusCode::OK);
    }
    assert_eq!(
        app.from_addr("10.0.0.3:1").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    // idle past the three-minute default threshold
    app.clock.advance(Duration::from_secs(181));
    assert_eq!(app.gate.registry().sweep(), 1);
    assert!(app.gate.registry().is_empty());

    for _ in 0..4 {
        assert_eq!(app.from_addr("10.0.0.3:1").await.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_recent_client_survives_sweep() {
    let app = TestApp::new(LimiterConfig::new(2, 4));

    app.from_addr("10.0.0.4:1").await;
    app.from_addr("10.0.0.5:1").await;

    app.clock.advance(Duration::from_secs(120));
    app.from_addr("10.0.0.5:1").await;
    app.clock.advance(Duration::from_secs(61));

    assert_eq!(app.gate.registry().sweep(), 1);
    assert_eq!(app.gate.registry().len(), 1);

    let stats = app.gate.registry().stats();
    assert_eq!(stats.total_created, 2);
    assert_eq!(stats.total_evicted, 1);
}

#[tokio::test]
async fn test_disabled_never_rejects() {
    let app = TestApp::new(LimiterConfig::new(1, 1).with_enabled(false));

    for _ in 0..50 {
        assert_eq!(app.from_addr("10.0.0.1:1").await.status(), StatusCode::OK);
    }
    assert_eq!(app.from_addr("garbage").await.status(), StatusCode::OK);

    let bare = Request::builder().uri("/").body(Body::empty()).unwrap();
    assert_eq!(app.send(bare).await.status(), StatusCode::OK);

    assert_eq!(app.hits(), 52);
    assert!(app.gate.registry().is_empty());
}

#[tokio::test]
async fn test_unparseable_origin_is_internal_error() {
    let app = TestApp::new(LimiterConfig::default());

    for addr in ["garbage", "localhost:8080", ""] {
        let response = app.from_addr(addr).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "Internal Server Error");
    }

    assert_eq!(app.hits(), 0);
    assert!(app.gate.registry().is_empty());
}

#[tokio::test]
async fn test_missing_origin_is_internal_error() {
    let app = TestApp::new(LimiterConfig::default());

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.hits(), 0);
}

#[tokio::test]
async fn test_connect_info_origin() {
    let app = TestApp::new(LimiterConfig::new(1, 1));
    let peer: SocketAddr = "203.0.113.8:55555".parse().unwrap();

    let mut first = Request::builder().uri("/").body(Body::empty()).unwrap();
    first.extensions_mut().insert(ConnectInfo(peer));
    assert_eq!(app.send(first).await.status(), StatusCode::OK);

    let mut second = Request::builder().uri("/").body(Body::empty()).unwrap();
    second.extensions_mut().insert(ConnectInfo(peer));
    assert_eq!(app.send(second).await.status(), StatusCode::TOO_MANY_REQUESTS);

    // the same client seen through a raw address shares the bucket
    assert_eq!(
        app.from_addr("203.0.113.8:1").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_scoped_ipv6_connect_info_reaches_handler() {
    let app = TestApp::new(LimiterConfig::new(1, 1));
    let peer = SocketAddr::V6(SocketAddrV6::new("fe80::1".parse().unwrap(), 4000, 0, 2));

    let mut first = Request::builder().uri("/").body(Body::empty()).unwrap();
    first.extensions_mut().insert(ConnectInfo(peer));
    let response = app.send(first).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "hello");
    assert_eq!(app.hits(), 1);

    // scope id is not part of the identity
    let other_scope = SocketAddr::V6(SocketAddrV6::new("fe80::1".parse().unwrap(), 4001, 0, 3));
    let mut second = Request::builder().uri("/").body(Body::empty()).unwrap();
    second.extensions_mut().insert(ConnectInfo(other_scope));
    assert_eq!(app.send(second).await.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(app.gate.registry().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_requests_share_one_bucket() {
    let app = Arc::new(TestApp::new(LimiterConfig::new(1, 10)));

    let mut tasks = Vec::new();
    for i in 0..50 {
        let app = app.clone();
        tasks.push(tokio::spawn(async move {
            app.from_addr(&format!("198.51.100.1:{}", 1000 + i))
                .await
                .status()
        }));
    }

    let mut ok = 0;
    let mut limited = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(ok, 10);
    assert_eq!(limited, 40);
    assert_eq!(app.gate.registry().stats().total_created, 1);
}

#[tokio::test]
async fn test_background_sweeper_evicts_idle_clients() {
    let clock = Arc::new(ManualClock::new(0));
    let gate = LimiterBuilder::new()
        .rps(2)
        .burst(4)
        .sweep_interval_ms(10)
        .idle_threshold_ms(1_000)
        .clock(clock.clone())
        .build()
        .unwrap();
    let app = TestApp::with_gate(gate, clock);

    assert_eq!(app.from_addr("10.0.0.6:1").await.status(), StatusCode::OK);
    assert_eq!(app.gate.registry().len(), 1);

    app.clock.advance_ms(1_001);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !app.gate.registry().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(app.gate.registry().is_empty());

    app.gate.shutdown();
    assert!(!app.gate.is_sweeping());
}
