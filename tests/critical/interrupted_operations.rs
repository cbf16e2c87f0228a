//! Interrupted runs: nothing new starts after the flag is set, in-flight work
//! finishes, and a rerun picks up the rest.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use jacow_core::download::{RunOptions, TaskOutcome};
use jacow_core::organize::{Layout, Organizer};
use jacow_core::{HttpClient, ResumeOutcome, ResumeStore};
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

use crate::support::socket_guard::start_mock_server_or_skip;
use crate::support::{candidate, fast_engine};

#[tokio::test]
async fn p0_interrupt_before_start_cancels_everything_then_rerun_completes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"paper".to_vec()))
        .expect(3)
        .mount(&server)
        .await;

    let temp = TempDir::new().expect("temp dir");
    let organizer = Organizer::new(temp.path().join("papers"), Layout::Session);
    let store = ResumeStore::open(&temp.path().join("resume.db")).await.expect("store");
    let client = Arc::new(HttpClient::new().expect("client"));
    let engine = fast_engine(2, 1, 1024);
    let candidates: Vec<_> = ["MOPA001", "MOPA002", "MOPA003"]
        .iter()
        .map(|name| candidate(&format!("{}/pdf/{name}.pdf", server.uri()), None))
        .collect();

    let interrupted = Arc::new(AtomicBool::new(true));
    let report = engine
        .run(
            candidates.clone(),
            &store,
            client.clone(),
            &organizer,
            RunOptions::with_interrupt(interrupted),
        )
        .await
        .expect("interrupted run");

    assert!(report.interrupted);
    assert_eq!(report.cancelled, 3);
    assert_eq!(report.attempted, 0);
    assert_eq!(store.count(ResumeOutcome::Completed).await.expect("count"), 0);

    let report = engine
        .run(candidates, &store, client, &organizer, RunOptions::default())
        .await
        .expect("rerun");
    assert!(!report.interrupted);
    assert_eq!(report.succeeded, 3);
}

#[tokio::test]
async fn p0_interrupt_mid_run_lets_in_flight_finish() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"paper".to_vec())
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;

    let temp = TempDir::new().expect("temp dir");
    let organizer = Organizer::new(temp.path().join("papers"), Layout::Session);
    let store = ResumeStore::open_in_memory().await.expect("store");
    let candidates: Vec<_> = (1..=4)
        .map(|n| candidate(&format!("{}/pdf/TUPB00{n}.pdf", server.uri()), None))
        .collect();

    let interrupted = Arc::new(AtomicBool::new(false));
    let trip = Arc::clone(&interrupted);
    let options = RunOptions::with_interrupt(Arc::clone(&interrupted)).with_callback(Arc::new(
        move |_: &TaskOutcome| {
            trip.store(true, Ordering::SeqCst);
        },
    ));

    let report = fast_engine(1, 1, 1024)
        .run(
            candidates,
            &store,
            Arc::new(HttpClient::new().expect("client")),
            &organizer,
            options,
        )
        .await
        .expect("run");

    assert!(report.interrupted);
    assert!(report.succeeded >= 1, "the in-flight download completes");
    assert!(report.cancelled >= 1, "queued targets never start");
    assert_eq!(report.succeeded + report.cancelled, 4);
    assert_eq!(
        store.count(ResumeOutcome::Completed).await.expect("count"),
        report.succeeded as u64
    );
}
