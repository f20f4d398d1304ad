//! Pool integration tests against the TLS fixture server.
//!
//! WHY: Pooling only pays off if handshakes are amortized and concurrent
//! callers never share a connection. Both need a real TLS peer to observe.
//!
//! WHAT: End-to-end pooled GETs, retry after a transient 503, and slot
//! replacement, all through the public API.
//!
//! HOW: `quarry_testing::http::TestHttpServer::start_tls` with its generated
//! certificate trusted through custom roots.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use quarry_testing::http::{TestHttpServer, TestResponse};
use quarry_transport::netcap::ssl::SecureContextProvider;
use quarry_transport::netcap::{Timeouts, TransportKind};
use quarry_transport::retries::{BackoffStrategy, RetryPolicy};
use quarry_transport::wire::simple_http::client::{
    HttpClient, ResolvedEndpoints, Transport, TransportPool,
};
use quarry_transport::wire::simple_http::{HttpRequestBuilder, SimpleHeaders};
use serial_test::serial;
use tracing_test::traced_test;

const HANDLER_DELAY: Duration = Duration::from_millis(100);

/// The `wait_ms` field of a retry log line.
fn logged_wait_ms(line: &str) -> Option<u128> {
    let (_, rest) = line.split_once("wait_ms=")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn slow_get_server() -> TestHttpServer {
    TestHttpServer::start_tls(|req| {
        thread::sleep(HANDLER_DELAY);
        if req.path == "/get" {
            TestResponse::ok("pooled")
        } else {
            TestResponse::status(404, "Not Found")
        }
    })
}

/// WHY: The point of the pool is to beat fresh connections per call
/// WHAT: Three concurrent callers on a pool of two all get 200, faster than
/// three sequential fresh-connection calls
#[test]
#[serial]
#[ntest::timeout(30000)]
fn test_pooled_calls_beat_sequential_fresh_connections() {
    let server = slow_get_server();
    let pem = server.certificate_pem().into_bytes();

    let client = Arc::new(
        HttpClient::builder("localhost", server.port())
            .secure(true)
            .pool_size(2)
            .secure_context_factory(SecureContextProvider::root_certificates_factory(pem.clone()))
            .timeouts(Timeouts::uniform(Duration::from_secs(5)))
            .build()
            .unwrap(),
    );

    let pooled_started = Instant::now();
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || client.get("/get", &SimpleHeaders::new()).map(|r| r.status()))
        })
        .collect();
    let statuses: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
    let pooled = pooled_started.elapsed();

    assert_eq!(statuses, vec![200, 200, 200]);
    assert!(server.max_in_flight() <= 2);

    let context = SecureContextProvider::with_root_certificates(&pem).unwrap();
    let kind = TransportKind::secure("localhost", context);
    let endpoints = ResolvedEndpoints::new("localhost", server.port(), vec![server.socket_addr()]);
    let request = HttpRequestBuilder::get("/get")
        .with_host(format!("localhost:{}", server.port()))
        .build()
        .unwrap();

    let sequential_started = Instant::now();
    for _ in 0..3 {
        let mut transport =
            Transport::connect(&kind, &endpoints, &Timeouts::uniform(Duration::from_secs(5)))
                .unwrap();
        assert_eq!(transport.cycle(&request).status(), 200);
    }
    let sequential = sequential_started.elapsed();

    assert!(
        pooled < sequential,
        "pooled {pooled:?} should beat sequential {sequential:?}"
    );
}

/// WHY: A transient 503 must be absorbed by the pool's retry loop
/// WHAT: 503 once then 200 returns 200 on the second attempt, and the call
/// takes at least the logged backoff, which stays within the first bound
#[traced_test]
#[test]
#[serial]
fn test_transient_503_is_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let server = TestHttpServer::start_tls(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            TestResponse::status(503, "Service Unavailable")
        } else {
            TestResponse::ok("second time lucky")
        }
    });

    let policy = RetryPolicy::new(
        Duration::from_millis(50),
        Duration::from_millis(200),
        BackoffStrategy::Exponential,
        3,
        [429, 500, 502, 503, 504],
    );
    let endpoints = Arc::new(ResolvedEndpoints::new(
        "localhost",
        server.port(),
        vec![server.socket_addr()],
    ));
    let context = SecureContextProvider::with_root_certificates(server.certificate_pem().as_bytes())
        .unwrap();

    let pool = TransportPool::connect(
        1,
        TransportKind::secure("localhost", context),
        endpoints,
        policy,
        Timeouts::uniform(Duration::from_secs(5)),
    )
    .unwrap();

    let request = HttpRequestBuilder::get("/flaky")
        .with_host("localhost")
        .build()
        .unwrap();
    let started = Instant::now();
    let exchange = pool.send_and_read(&request);
    let elapsed = started.elapsed();

    assert_eq!(exchange.outcome.status(), 200);
    assert_eq!(exchange.attempts, 2);
    assert_eq!(
        exchange.outcome.response().map(|r| r.body_text().into_owned()),
        Some("second time lucky".to_string())
    );
    assert!(logs_contain("retrying in"));
    logs_assert(|lines: &[&str]| {
        let waits: Vec<u128> = lines.iter().filter_map(|line| logged_wait_ms(line)).collect();
        match waits.as_slice() {
            [wait] if *wait > 50 => Err(format!("first wait {wait}ms exceeds the 50ms bound")),
            [wait] if elapsed < Duration::from_millis(u64::try_from(*wait).unwrap()) => Err(
                format!("elapsed {elapsed:?} is shorter than the logged {wait}ms backoff"),
            ),
            [_] => Ok(()),
            other => Err(format!("expected one logged backoff, got {other:?}")),
        }
    });
    assert!(pool.is_secure());
    assert_eq!(pool.available(), 1);
}

/// WHY: Callers queue behind a saturated pool instead of failing
/// WHAT: Eight callers on a pool of one all complete, one at a time
#[test]
#[ntest::timeout(30000)]
fn test_saturated_pool_serializes_callers() {
    let server = TestHttpServer::start_tls(|_| {
        thread::sleep(Duration::from_millis(10));
        TestResponse::ok("queued")
    });

    let client = Arc::new(
        HttpClient::builder("localhost", server.port())
            .secure(true)
            .pool_size(1)
            .secure_context_factory(SecureContextProvider::insecure_factory())
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || client.get("/", &SimpleHeaders::new()).is_ok())
        })
        .collect();

    assert!(handles.into_iter().all(|h| h.join().unwrap()));
    assert_eq!(server.max_in_flight(), 1);
    assert_eq!(server.requests_served(), 8);
    assert_eq!(server.connections_accepted(), 1);
}
