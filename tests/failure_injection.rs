//! Failure injection against real sockets through the hyper transport.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resilient_http::proxy::HealthState;
use resilient_http::{Client, ClientConfig, ClientError, HttpRequest, ProxyAddr};

mod common;

fn base_config() -> ClientConfig {
    let mut config = ClientConfig::minimal();
    config.timeouts.request_ms = 2_000;
    config
}

#[tokio::test]
async fn test_retry_on_failure() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let backend = common::start_programmable_backend(move |_| {
        let cc = cc.clone();
        async move {
            let count = cc.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                (503, "Service Unavailable".into())
            } else {
                (200, "Success".into())
            }
        }
    })
    .await;

    let mut config = base_config();
    config.retries.enabled = true;
    config.retries.max_attempts = 3;
    config.retries.backoff_base_ms = 20;
    config.retries.jitter = false;
    let client = Client::new(config).unwrap();

    let response = client.get(&format!("http://{backend}/")).await.unwrap();
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.text(), "Success");
    assert_eq!(call_count.load(Ordering::SeqCst), 3, "Should have attempted 3 times");

    client.close().await;
}

#[tokio::test]
async fn test_error_status_surfaces_with_attempts() {
    let backend = common::start_programmable_backend(|_| async { (404, "nope".into()) }).await;
    let client = Client::new(base_config()).unwrap();

    let err = client.get(&format!("http://{backend}/missing?token=secret")).await.unwrap_err();
    match err {
        ClientError::Status { status, url, attempts } => {
            assert_eq!(status, 404);
            assert_eq!(attempts, 1);
            assert!(!url.contains("secret"), "credentials leaked into {url}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::new(base_config()).unwrap();
    let err = client.get(&format!("http://{addr}/")).await.unwrap_err();
    assert!(matches!(err, ClientError::Connect { .. }), "got {err:?}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_garbage_response_is_not_retried() {
    let (backend, connections) = common::start_raw_backend(b"THIS IS NOT HTTP\r\n\r\n").await;

    let mut config = base_config();
    config.retries.enabled = true;
    config.retries.max_attempts = 3;
    config.retries.backoff_base_ms = 10;
    config.retries.jitter = false;
    let client = Client::new(config).unwrap();

    let err = client.get(&format!("http://{backend}/")).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse { .. }), "got {err:?}");
    assert!(!err.is_transient());
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let backend = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        (200, "slow".into())
    })
    .await;

    let client = Client::new(base_config()).unwrap();
    let request = client
        .build_request(hyper::Method::GET, &format!("http://{backend}/"))
        .unwrap()
        .timeout(Duration::from_millis(100));
    let err = client.send(request).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_oversized_response_is_rejected() {
    let backend = common::start_mock_backend("this body is definitely longer than sixteen bytes").await;

    let mut config = base_config();
    config.limits.max_response_size = 16;
    let client = Client::new(config).unwrap();

    let err = client.get(&format!("http://{backend}/")).await.unwrap_err();
    assert!(matches!(err, ClientError::ResponseTooLarge { limit: 16, .. }), "got {err:?}");
}

#[tokio::test]
async fn test_request_goes_through_http_proxy() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = seen.clone();
    let proxy = common::start_programmable_backend(move |line| {
        log.lock().unwrap().push(line);
        async { (200, "via proxy".into()) }
    })
    .await;

    let mut config = base_config();
    config.proxy_pool.enabled = true;
    config.proxy_pool.proxies = vec![format!("http://{proxy}")];
    let client = Client::new(config).unwrap();

    let response = client.get("http://origin.test/resource").await.unwrap();
    assert_eq!(response.text(), "via proxy");
    assert_eq!(
        seen.lock().unwrap().first().map(String::as_str),
        Some("GET http://origin.test/resource HTTP/1.1")
    );

    let addr: ProxyAddr = format!("http://{proxy}").parse().unwrap();
    let pool = client.proxy_pool().unwrap();
    assert_eq!(pool.health_of(&addr).unwrap(), Some(HealthState::Healthy));
    let record = pool.records().unwrap().into_iter().find(|r| r.addr == addr).unwrap();
    assert_eq!(record.timed_responses, 1);
    assert!(record.average_response_time().is_some());
}

#[tokio::test]
async fn test_health_check_eviction() {
    let p1 = common::start_mock_backend("p1").await;

    let p2_healthy = Arc::new(AtomicBool::new(true));
    let p2h = p2_healthy.clone();
    let p2 = common::start_programmable_backend(move |_| {
        let p2h = p2h.clone();
        async move {
            if p2h.load(Ordering::SeqCst) {
                (200, "p2".into())
            } else {
                (502, "dead".into())
            }
        }
    })
    .await;

    let mut config = base_config();
    config.proxy_pool.enabled = true;
    config.proxy_pool.proxies = vec![format!("http://{p1}"), format!("http://{p2}")];
    config.proxy_pool.check_url = "http://probe.test/".into();
    config.proxy_pool.unhealthy_threshold = 1;
    config.proxy_pool.check_timeout_ms = 1_000;
    config.error_for_status = false;
    let client = Client::new(config).unwrap();

    let summary = client.check_proxies().await.unwrap();
    assert_eq!(summary.healthy, 2);

    let mut p1_hits = 0;
    let mut p2_hits = 0;
    for _ in 0..10 {
        let body = client.get("http://origin.test/").await.unwrap().text();
        if body == "p1" {
            p1_hits += 1;
        }
        if body == "p2" {
            p2_hits += 1;
        }
    }
    assert!(p1_hits > 0, "p1 should have hits (got {p1_hits})");
    assert!(p2_hits > 0, "p2 should have hits (got {p2_hits})");

    p2_healthy.store(false, Ordering::SeqCst);
    let summary = client.check_proxies().await.unwrap();
    assert_eq!(summary.healthy, 1);
    assert_eq!(summary.unhealthy, 1);

    for _ in 0..10 {
        let body = client.get("http://origin.test/").await.unwrap().text();
        assert_eq!(body, "p1", "Only p1 should be used after p2 eviction");
    }

    let report = client.health_check().await.unwrap();
    assert!(report.is_healthy());
    client.close().await;
}

#[tokio::test]
async fn test_cancelled_request_stops_waiting() {
    let backend = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        (200, "late".into())
    })
    .await;

    let client = Client::new(base_config()).unwrap();
    let cancel = tokio_util::sync::CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let request = HttpRequest::parse(hyper::Method::GET, &format!("http://{backend}/")).unwrap();
    let err = client.send_with_cancel(request, cancel).await.unwrap_err();
    assert!(matches!(err, ClientError::Cancelled), "got {err:?}");
}
