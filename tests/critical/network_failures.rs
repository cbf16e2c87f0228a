//! Network resilience: rate limiting, slow servers, retries and final error
//! reporting.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use jacow_core::download::{ErrorKind, RunOptions};
use jacow_core::organize::{Layout, Organizer};
use jacow_core::{HttpClient, ResumeStore};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::support::socket_guard::start_mock_server_or_skip;
use crate::support::{FlakyResponder, candidate, fast_engine};

fn organizer(temp: &TempDir) -> Organizer {
    Organizer::new(temp.path().join("papers"), Layout::Session)
}

#[tokio::test]
async fn p0_429_waits_for_retry_after_then_succeeds() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let responder = FlakyResponder::new(
        1,
        ResponseTemplate::new(429).insert_header("Retry-After", "1"),
        ResponseTemplate::new(200).set_body_bytes(b"paper".to_vec()),
    );
    let calls = responder.calls();
    Mock::given(method("GET"))
        .and(path("/pdf/MOPA001.pdf"))
        .respond_with(responder)
        .mount(&server)
        .await;

    let temp = TempDir::new().expect("temp dir");
    let store = ResumeStore::open_in_memory().await.expect("store");
    let started = Instant::now();
    let report = fast_engine(1, 3, 1024)
        .run(
            vec![candidate(&format!("{}/pdf/MOPA001.pdf", server.uri()), None)],
            &store,
            Arc::new(HttpClient::new().expect("client")),
            &organizer(&temp),
            RunOptions::default(),
        )
        .await
        .expect("run");

    assert_eq!(report.succeeded, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(
        started.elapsed() >= Duration::from_millis(900),
        "Retry-After must override the millisecond backoff"
    );
}

#[tokio::test]
async fn p0_persistent_429_gives_up_as_rate_limited() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let temp = TempDir::new().expect("temp dir");
    let store = ResumeStore::open_in_memory().await.expect("store");
    let report = fast_engine(1, 2, 1024)
        .run(
            vec![candidate(&format!("{}/pdf/MOPA002.pdf", server.uri()), None)],
            &store,
            Arc::new(HttpClient::new().expect("client")),
            &organizer(&temp),
            RunOptions::default(),
        )
        .await
        .expect("run");

    assert_eq!(report.failed, 1);
    assert_eq!(report.errors[0].kind, ErrorKind::RateLimited);
}

#[tokio::test]
async fn p0_slow_server_times_out_as_transient() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"late".to_vec())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let temp = TempDir::new().expect("temp dir");
    let store = ResumeStore::open_in_memory().await.expect("store");
    let client = HttpClient::with_timeouts(Duration::from_millis(200), Duration::from_millis(200))
        .expect("client");
    let report = fast_engine(1, 2, 1024)
        .run(
            vec![candidate(&format!("{}/pdf/SUPB001.pdf", server.uri()), None)],
            &store,
            Arc::new(client),
            &organizer(&temp),
            RunOptions::default(),
        )
        .await
        .expect("run");

    assert_eq!(report.failed, 1);
    assert_eq!(report.retries, 1);
    assert_eq!(report.errors[0].kind, ErrorKind::Transient);
}
