//! End-to-end tests: real backends, a real proxy listener, and a real client.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use flate2::read::GzDecoder;
use tokio::net::TcpListener;

use vhost_proxy::config::schema::{
    BasicAuthConfig, CompressConfig, CorsConfig, HeaderRulesConfig, HeadersConfig,
    RateLimitConfig, RequestIdConfig, SecurityHeadersConfig,
};
use vhost_proxy::config::{parse_config, MiddlewareConfig};
use vhost_proxy::observability::{AccessLogEntry, AccessLogSink};
use vhost_proxy::{Middleware, ProxyServer, RouteOptions};

mod common;
use common::{client, server_config, start_proxy, Echo};

fn middleware(config: MiddlewareConfig) -> Middleware {
    Middleware::from_config(&config).unwrap()
}

fn rate_limit(requests: u32, window_secs: u64, burst: u32) -> Middleware {
    middleware(MiddlewareConfig::RateLimit(RateLimitConfig {
        requests,
        window_secs,
        burst,
    }))
}

#[tokio::test]
async fn test_end_to_end_forwarding() {
    let backend = common::start_echo_backend().await;
    let server = ProxyServer::new(server_config());
    server
        .route("shop.example.com", &format!("http://{backend}"), RouteOptions::new())
        .unwrap();
    let proxy = start_proxy(server).await;

    let res = client()
        .get(proxy.url("/cart?x=1"))
        .header("host", "shop.example.com")
        .header("x-forwarded-for", "203.0.113.5")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let echo: Echo = res.json().await.unwrap();
    assert_eq!(echo.method, "GET");
    assert_eq!(echo.uri, "/cart?x=1");
    assert_eq!(echo.header("host"), Some("shop.example.com"));
    assert_eq!(echo.header("x-forwarded-host"), Some("shop.example.com"));
    assert_eq!(echo.header("x-forwarded-proto"), Some("http"));
    assert_eq!(echo.header("x-forwarded-for"), Some("203.0.113.5, 127.0.0.1"));

    proxy.stop().await;
}

#[tokio::test]
async fn test_backend_prefix_and_backend_host() {
    let backend = common::start_echo_backend().await;
    let server = ProxyServer::new(server_config());
    server
        .route(
            "*.example.com",
            &format!("http://{backend}/api/"),
            RouteOptions::new().preserve_host(false),
        )
        .unwrap();
    let proxy = start_proxy(server).await;

    let echo: Echo = client()
        .get(proxy.url("/items?page=2"))
        .header("host", "API.Example.com:8080")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(echo.uri, "/api/items?page=2");
    assert_eq!(echo.header("host"), Some(backend.to_string().as_str()));
    assert_eq!(echo.header("x-forwarded-host"), Some("API.Example.com:8080"));

    proxy.stop().await;
}

#[tokio::test]
async fn test_backend_status_and_body_pass_through() {
    let backend = common::start_backend(Router::new().fallback(|| async {
        (StatusCode::IM_A_TEAPOT, [("x-backend", "yes")], "short and stout")
    }))
    .await;

    let server = ProxyServer::new(server_config());
    server
        .route("tea.test", &format!("http://{backend}"), RouteOptions::new())
        .unwrap();
    let proxy = start_proxy(server).await;

    let res = client()
        .get(proxy.url("/"))
        .header("host", "tea.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(res.headers()["x-backend"], "yes");
    assert_eq!(res.text().await.unwrap(), "short and stout");

    proxy.stop().await;
}

#[tokio::test]
async fn test_no_route_and_bad_gateway() {
    // Reserve a port, then free it so nothing is listening there.
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed_addr = closed.local_addr().unwrap();
    drop(closed);

    let server = ProxyServer::new(server_config());
    server
        .route(
            "down.test",
            &format!("http://{closed_addr}"),
            RouteOptions::new().dial_timeout(Duration::from_secs(1)),
        )
        .unwrap();
    let proxy = start_proxy(server).await;
    let client = client();

    let res = client
        .get(proxy.url("/"))
        .header("host", "nowhere.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.text().await.unwrap(), "No route found for host");

    let res = client
        .get(proxy.url("/"))
        .header("host", "down.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(res.text().await.unwrap(), "Bad Gateway");

    proxy.stop().await;
}

#[tokio::test]
async fn test_rate_limit_burst_then_refill() {
    let backend = common::start_echo_backend().await;
    let mut server = ProxyServer::new(server_config());
    server.use_middleware(rate_limit(1, 1, 3));
    server
        .route("api.test", &format!("http://{backend}"), RouteOptions::new())
        .unwrap();
    let proxy = start_proxy(server).await;
    let client = client();

    let mut statuses = Vec::new();
    for _ in 0..4 {
        let res = client
            .get(proxy.url("/"))
            .header("host", "api.test")
            .send()
            .await
            .unwrap();
        statuses.push(res.status());
    }
    let limited = statuses
        .iter()
        .filter(|s| **s == StatusCode::TOO_MANY_REQUESTS)
        .count();
    assert_eq!(limited, 1, "statuses: {statuses:?}");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let res = client
        .get(proxy.url("/"))
        .header("host", "api.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    proxy.stop().await;
}

#[tokio::test]
async fn test_route_rate_limit_overrides_global() {
    let backend = common::start_echo_backend().await;
    let mut server = ProxyServer::new(server_config());
    server.use_middleware(rate_limit(1, 60, 1));
    server
        .route("strict.test", &format!("http://{backend}"), RouteOptions::new())
        .unwrap();
    server
        .route(
            "relaxed.test",
            &format!("http://{backend}"),
            RouteOptions::new().middlewares([rate_limit(100, 1, 100)]),
        )
        .unwrap();
    let proxy = start_proxy(server).await;
    let client = client();

    for _ in 0..5 {
        let res = client
            .get(proxy.url("/"))
            .header("host", "relaxed.test")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let first = client
        .get(proxy.url("/"))
        .header("host", "strict.test")
        .send()
        .await
        .unwrap();
    let second = client
        .get(proxy.url("/"))
        .header("host", "strict.test")
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.text().await.unwrap(), "Rate limit exceeded");

    proxy.stop().await;
}

#[tokio::test]
async fn test_basic_auth_failures_are_uniform() {
    let backend = common::start_echo_backend().await;
    let mut users = BTreeMap::new();
    users.insert("alice".to_string(), bcrypt::hash("wonderland", 8).unwrap());

    let mut server = ProxyServer::new(server_config());
    server.use_middleware(middleware(MiddlewareConfig::BasicAuth(BasicAuthConfig {
        users,
        realm: "Shop".to_string(),
    })));
    server
        .route("secure.test", &format!("http://{backend}"), RouteOptions::new())
        .unwrap();
    let proxy = start_proxy(server).await;
    let client = client();

    let basic = |credentials: &str| format!("Basic {}", STANDARD.encode(credentials));
    let attempts = [
        None,
        Some("Bearer token".to_string()),
        Some("Basic %%%".to_string()),
        Some(basic("alice")),
        Some(basic("alice:wrong")),
        Some(basic("mallory:wonderland")),
    ];

    let reject = |authorization: Option<String>| {
        let mut request = client.get(proxy.url("/")).header("host", "secure.test");
        if let Some(value) = &authorization {
            request = request.header("authorization", value);
        }
        async move {
            let started = Instant::now();
            let res = request.send().await.unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{authorization:?}");
            assert_eq!(res.headers()["www-authenticate"], "Basic realm=\"Shop\"");
            assert_eq!(res.text().await.unwrap(), "Unauthorized");
            started.elapsed()
        }
    };

    for authorization in attempts {
        reject(authorization).await;
    }

    // A missing header still pays for a bcrypt comparison, so it cannot be
    // answered much faster than a wrong password. Medians over interleaved
    // rounds keep scheduler noise out of the comparison.
    let mut missing = Vec::new();
    let mut wrong = Vec::new();
    for _ in 0..5 {
        missing.push(reject(None).await);
        wrong.push(reject(Some(basic("alice:wrong"))).await);
    }
    missing.sort();
    wrong.sort();
    let (missing, wrong) = (missing[2], wrong[2]);
    assert!(
        missing * 4 >= wrong,
        "missing header answered in {missing:?}, wrong password in {wrong:?}"
    );

    let res = client
        .get(proxy.url("/"))
        .header("host", "secure.test")
        .header("authorization", basic("alice:wonderland"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    proxy.stop().await;
}

#[tokio::test]
async fn test_compression_threshold() {
    const MIN_SIZE: usize = 64;
    let small = vec![b'a'; MIN_SIZE - 1];
    let large: Vec<u8> = (0..MIN_SIZE + 1).map(|i| b'a' + (i % 26) as u8).collect();

    let small_backend = common::start_fixed_backend("application/json", small.clone()).await;
    let large_backend = common::start_fixed_backend("application/json", large.clone()).await;
    let png_backend = common::start_fixed_backend("image/png", large.clone()).await;

    let mut server = ProxyServer::new(server_config());
    server.use_middleware(middleware(MiddlewareConfig::Compress(CompressConfig {
        min_size: MIN_SIZE,
        ..Default::default()
    })));
    for (host, backend) in [
        ("small.test", small_backend),
        ("large.test", large_backend),
        ("png.test", png_backend),
    ] {
        server
            .route(host, &format!("http://{backend}"), RouteOptions::new())
            .unwrap();
    }
    let proxy = start_proxy(server).await;
    let client = client();

    let fetch = |host: &'static str| {
        client
            .get(proxy.url("/"))
            .header("host", host)
            .header("accept-encoding", "gzip")
            .send()
    };

    let res = fetch("small.test").await.unwrap();
    assert!(res.headers().get("content-encoding").is_none());
    assert_eq!(&res.bytes().await.unwrap()[..], &small[..]);

    let res = fetch("png.test").await.unwrap();
    assert!(res.headers().get("content-encoding").is_none());
    assert_eq!(&res.bytes().await.unwrap()[..], &large[..]);

    let res = fetch("large.test").await.unwrap();
    assert_eq!(res.headers()["content-encoding"], "gzip");
    assert_eq!(res.headers()["vary"], "Accept-Encoding");
    let compressed = res.bytes().await.unwrap();
    let mut decoded = Vec::new();
    GzDecoder::new(&compressed[..])
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, large);

    // Without Accept-Encoding the body is never touched.
    let res = client
        .get(proxy.url("/"))
        .header("host", "large.test")
        .send()
        .await
        .unwrap();
    assert!(res.headers().get("content-encoding").is_none());
    assert_eq!(&res.bytes().await.unwrap()[..], &large[..]);

    proxy.stop().await;
}

#[tokio::test]
async fn test_cors_policy() {
    let backend = common::start_echo_backend().await;
    let mut server = ProxyServer::new(server_config());
    server.use_middleware(middleware(MiddlewareConfig::Cors(CorsConfig {
        allowed_origins: vec!["https://shop.example.com".to_string()],
        allowed_methods: vec!["GET".to_string(), "PUT".to_string()],
        allowed_headers: vec!["Content-Type".to_string()],
        max_age_secs: 300,
        ..Default::default()
    })));
    server
        .route("api.test", &format!("http://{backend}"), RouteOptions::new())
        .unwrap();
    let proxy = start_proxy(server).await;
    let client = client();

    let res = client
        .get(proxy.url("/"))
        .header("host", "api.test")
        .header("origin", "https://evil.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.text().await.unwrap(), "CORS policy: Origin not allowed");

    let res = client
        .request(reqwest::Method::OPTIONS, proxy.url("/"))
        .header("host", "api.test")
        .header("origin", "https://shop.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        res.headers()["access-control-allow-origin"],
        "https://shop.example.com"
    );
    assert_eq!(res.headers()["access-control-allow-methods"], "GET, PUT");
    assert_eq!(res.headers()["access-control-max-age"], "300");

    let res = client
        .get(proxy.url("/"))
        .header("host", "api.test")
        .header("origin", "https://shop.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()["access-control-allow-origin"],
        "https://shop.example.com"
    );
    assert!(res.headers().get("access-control-allow-methods").is_none());

    // No Origin: not a cross-origin request, passed through untouched.
    let res = client
        .get(proxy.url("/"))
        .header("host", "api.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("access-control-allow-origin").is_none());

    proxy.stop().await;
}

#[tokio::test]
async fn test_header_rewrite_request_id_and_security_headers() {
    let backend = common::start_echo_backend().await;

    let mut request_rules = HeaderRulesConfig::default();
    request_rules
        .set
        .insert("x-env".to_string(), "test".to_string());
    request_rules.remove.push("x-internal".to_string());
    let mut response_rules = HeaderRulesConfig::default();
    response_rules
        .add
        .insert("x-proxy".to_string(), "vhost".to_string());

    let mut server = ProxyServer::new(server_config());
    server.use_middleware(middleware(MiddlewareConfig::RequestId(
        RequestIdConfig::default(),
    )));
    server.use_middleware(middleware(MiddlewareConfig::Headers(HeadersConfig {
        request: request_rules,
        response: response_rules,
    })));
    server.use_middleware(middleware(MiddlewareConfig::SecurityHeaders(
        SecurityHeadersConfig::default(),
    )));
    server
        .route("api.test", &format!("http://{backend}"), RouteOptions::new())
        .unwrap();
    let proxy = start_proxy(server).await;
    let client = client();

    let res = client
        .get(proxy.url("/"))
        .header("host", "api.test")
        .header("x-internal", "secret")
        .send()
        .await
        .unwrap();
    let headers = res.headers().clone();
    let echo: Echo = res.json().await.unwrap();

    let generated = headers["x-request-id"].to_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&generated).is_ok());
    assert_eq!(echo.header("x-request-id"), Some(generated.as_str()));
    assert_eq!(echo.header("x-env"), Some("test"));
    assert_eq!(echo.header("x-internal"), None);
    assert_eq!(headers["x-proxy"], "vhost");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.get("permissions-policy").is_none());

    let res = client
        .get(proxy.url("/"))
        .header("host", "api.test")
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "abc-123");
    let echo: Echo = res.json().await.unwrap();
    assert_eq!(echo.header("x-request-id"), Some("abc-123"));

    proxy.stop().await;
}

#[tokio::test]
async fn test_max_request_body() {
    let backend = common::start_echo_backend().await;
    let mut config = server_config();
    config.max_request_body = 16;
    let server = ProxyServer::new(config);
    server
        .route("upload.test", &format!("http://{backend}"), RouteOptions::new())
        .unwrap();
    let proxy = start_proxy(server).await;
    let client = client();

    let res = client
        .post(proxy.url("/"))
        .header("host", "upload.test")
        .body(vec![0u8; 32])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let res = client
        .post(proxy.url("/"))
        .header("host", "upload.test")
        .body(vec![0u8; 8])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let echo: Echo = res.json().await.unwrap();
    assert_eq!(echo.body_len, 8);

    // No Content-Length: the ceiling is enforced while the body streams.
    let chunks = (0..4).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![0u8; 16])));
    let res = client
        .post(proxy.url("/"))
        .header("host", "upload.test")
        .body(reqwest::Body::wrap_stream(futures_util::stream::iter(chunks)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let chunks = (0..2).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![0u8; 4])));
    let res = client
        .post(proxy.url("/"))
        .header("host", "upload.test")
        .body(reqwest::Body::wrap_stream(futures_util::stream::iter(chunks)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let echo: Echo = res.json().await.unwrap();
    assert_eq!(echo.body_len, 8);

    proxy.stop().await;
}

#[derive(Default)]
struct CaptureLog(Mutex<Vec<AccessLogEntry>>);

impl AccessLogSink for CaptureLog {
    fn log(&self, entry: &AccessLogEntry) {
        self.0.lock().unwrap().push(entry.clone());
    }
}

#[tokio::test]
async fn test_access_log_covers_every_request() {
    let backend = common::start_fixed_backend("text/plain", b"hello".to_vec()).await;
    let sink = Arc::new(CaptureLog::default());
    let server = ProxyServer::new(server_config()).with_access_log(sink.clone());
    server
        .route("app.test", &format!("http://{backend}"), RouteOptions::new())
        .unwrap();
    let proxy = start_proxy(server).await;
    let client = client();

    let res = client
        .get(proxy.url("/greet?lang=en"))
        .header("host", "app.test")
        .header("user-agent", "e2e")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "hello");

    let res = client
        .get(proxy.url("/"))
        .header("host", "missing.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    res.bytes().await.unwrap();

    // Entries are emitted once the body finishes on the server side.
    let deadline = Instant::now() + Duration::from_secs(2);
    while sink.0.lock().unwrap().len() < 2 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let entries = sink.0.lock().unwrap().clone();
    assert_eq!(entries.len(), 2, "{entries:?}");

    let ok = entries.iter().find(|e| e.status == 200).unwrap();
    assert_eq!(ok.method, "GET");
    assert_eq!(ok.path, "/greet?lang=en");
    assert_eq!(ok.size, 5);
    assert_eq!(ok.ip, "127.0.0.1");
    assert_eq!(ok.user_agent.as_deref(), Some("e2e"));

    let missing = entries.iter().find(|e| e.status == 404).unwrap();
    assert_eq!(missing.path, "/");

    proxy.stop().await;
}

#[tokio::test]
async fn test_graceful_shutdown_drains_in_flight() {
    let backend = common::start_slow_backend(Duration::from_millis(500)).await;
    let server = ProxyServer::new(server_config());
    server
        .route("slow.test", &format!("http://{backend}"), RouteOptions::new())
        .unwrap();
    let proxy = start_proxy(server).await;
    let addr = proxy.addr;

    let in_flight = tokio::spawn(
        client()
            .get(proxy.url("/"))
            .header("host", "slow.test")
            .send(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    proxy.stop().await;

    let res = in_flight.await.unwrap().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "done");

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_server_from_config() {
    let backend = common::start_echo_backend().await;
    let config = parse_config(&format!(
        r#"
        [server]
        listen = "127.0.0.1:0"

        [[middlewares]]
        type = "security_headers"

        [routes."cfg.test"]
        backend = "http://{backend}"
        preserve_host = false

        [[routes."cfg.test".middlewares]]
        type = "request_id"
        header_name = "X-Trace-Id"
        "#
    ))
    .unwrap();

    let server = ProxyServer::from_config(&config).unwrap();
    let proxy = start_proxy(server).await;

    let res = client()
        .get(proxy.url("/"))
        .header("host", "cfg.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-content-type-options"], "nosniff");
    assert!(res.headers().contains_key("x-trace-id"));

    let echo: Echo = res.json().await.unwrap();
    assert_eq!(echo.header("host"), Some(backend.to_string().as_str()));

    proxy.stop().await;
}

#[tokio::test]
async fn test_zero_idle_timeout_closes_after_one_response() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut config = server_config();
    config.idle_timeout_secs = 0;
    let proxy = start_proxy(ProxyServer::new(config)).await;

    let mut stream = tokio::net::TcpStream::connect(proxy.addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: nowhere.test\r\n\r\n")
        .await
        .unwrap();

    // read_to_end only returns once the server closes its side.
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("connection left open")
        .unwrap();

    let raw = String::from_utf8_lossy(&raw);
    assert!(raw.starts_with("HTTP/1.1 404"), "{raw}");

    proxy.stop().await;
}
