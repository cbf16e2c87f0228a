//! Integration tests for the download engine.
//!
//! These drive `DownloadEngine` end to end: real `HttpClient` against a
//! wiremock server, a file-backed `ResumeStore` and an `Organizer` writing into
//! a temp directory.

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use jacow_core::download::{ErrorKind, RunOptions, TaskOutcome};
use jacow_core::organize::{Layout, Organizer};
use jacow_core::{
    CandidateLink, Classification, HttpClient, ResumeOutcome, ResumeStore, SourceContext,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{FlakyResponder, candidate, fast_engine, gzip_stored};

const MB: u64 = 1024 * 1024;

type TestResult = Result<(), Box<dyn Error>>;

struct Workspace {
    dir: TempDir,
    organizer: Organizer,
}

impl Workspace {
    fn new() -> Result<Self, Box<dyn Error>> {
        let dir = TempDir::new()?;
        let organizer = Organizer::new(dir.path().join("papers"), Layout::Session);
        Ok(Self { dir, organizer })
    }

    async fn store(&self) -> Result<ResumeStore, Box<dyn Error>> {
        Ok(ResumeStore::open(&self.dir.path().join("resume.db")).await?)
    }
}

fn client() -> Arc<HttpClient> {
    Arc::new(HttpClient::new().expect("http client"))
}

// ==================== Individual papers ====================

#[tokio::test]
async fn test_individual_paper_is_placed_and_rerun_skips_without_network() -> TestResult {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    let body = vec![b'%'; 2048];
    Mock::given(method("GET"))
        .and(path("/ipac2023/pdf/MOPA001.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let ws = Workspace::new()?;
    let engine = fast_engine(3, 3, 50 * MB);
    let url = format!("{}/ipac2023/pdf/MOPA001.pdf", server.uri());
    let target = candidate(&url, Some(2048));

    let store = ws.store().await?;
    let report = engine
        .run(vec![target.clone()], &store, client(), &ws.organizer, RunOptions::default())
        .await?;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.classification.individual, 1);
    let placed = ws.organizer.output_root().join("IPAC/2023/MOPA/MOPA001.pdf");
    assert_eq!(std::fs::read(&placed)?, body);
    let record = store.lookup(&target.target_key()).await?.expect("record");
    assert_eq!(record.outcome, ResumeOutcome::Completed);
    store.close().await;

    // Fresh store handle, same file: the rerun must not touch the network.
    let store = ws.store().await?;
    let report = engine
        .run(vec![target], &store, client(), &ws.organizer, RunOptions::default())
        .await?;
    assert_eq!(report.skipped_resumed, 1);
    assert_eq!(report.attempted, 0);
    assert_eq!(report.succeeded, 0);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_links_fetch_once() -> TestResult {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    Mock::given(method("GET"))
        .and(path("/pdf/TUPB012.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"paper".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let ws = Workspace::new()?;
    let url = format!("{}/pdf/TUPB012.pdf", server.uri());
    let store = ws.store().await?;
    let report = fast_engine(3, 3, MB)
        .run(
            vec![candidate(&url, None), candidate(&format!("{url}#page=2"), None)],
            &store,
            client(),
            &ws.organizer,
            RunOptions::default(),
        )
        .await?;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(store.count(ResumeOutcome::Completed).await?, 1);
    Ok(())
}

// ==================== Proceedings volumes ====================

#[tokio::test]
async fn test_declared_oversize_volume_rejected_without_request() -> TestResult {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ws = Workspace::new()?;
    let url = format!("{}/ipac2023/ipac23_proceedings_volume.pdf", server.uri());
    let target = candidate(&url, Some(2100 * MB));
    let store = ws.store().await?;
    let report = fast_engine(3, 3, 50 * MB)
        .run(vec![target.clone()], &store, client(), &ws.organizer, RunOptions::default())
        .await?;

    assert_eq!(report.rejected_oversize, 1);
    assert_eq!(report.classification.proceedings, 1);
    assert_eq!(report.errors[0].kind, ErrorKind::OversizeDeclared);
    assert_eq!(report.bytes_transferred, 0);
    let record = store.lookup(&target.target_key()).await?.expect("remembered");
    assert_eq!(record.outcome, ResumeOutcome::PermanentlyFailed);
    assert!(!ws.organizer.output_root().join("IPAC").exists());
    Ok(())
}

#[tokio::test]
async fn test_streamed_oversize_is_never_placed_or_remembered() -> TestResult {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    Mock::given(method("GET"))
        .and(path("/volume.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "gzip")
                .set_body_bytes(gzip_stored(&vec![b'v'; 80_000])),
        )
        .mount(&server)
        .await;

    let ws = Workspace::new()?;
    let url = format!("{}/volume.pdf", server.uri());
    let target = candidate(&url, None);
    let store = ws.store().await?;
    let report = fast_engine(1, 3, 10_000)
        .run(vec![target.clone()], &store, client(), &ws.organizer, RunOptions::default())
        .await?;

    assert_eq!(report.rejected_oversize, 1);
    assert_eq!(report.errors[0].kind, ErrorKind::OversizeStreamed);
    assert!(store.lookup(&target.target_key()).await?.is_none());
    assert!(!ws.organizer.output_root().join("IPAC").exists());
    let staging_left = std::fs::read_dir(ws.organizer.staging_dir())
        .map(Iterator::count)
        .unwrap_or(0);
    assert_eq!(staging_left, 0, "staging must be cleaned up");
    Ok(())
}

// ==================== Failures and retries ====================

#[tokio::test]
async fn test_not_found_fails_after_one_attempt() -> TestResult {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    Mock::given(method("GET"))
        .and(path("/pdf/WEPA404.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let ws = Workspace::new()?;
    let url = format!("{}/pdf/WEPA404.pdf", server.uri());
    let store = ws.store().await?;
    let report = fast_engine(2, 3, MB)
        .run(vec![candidate(&url, None)], &store, client(), &ws.organizer, RunOptions::default())
        .await?;

    assert_eq!(report.failed, 1);
    assert_eq!(report.retries, 0);
    assert_eq!(report.errors[0].kind, ErrorKind::Permanent);
    assert_eq!(store.count(ResumeOutcome::Completed).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_server_errors_retry_then_succeed() -> TestResult {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    let responder = FlakyResponder::new(
        2,
        ResponseTemplate::new(503),
        ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()),
    );
    let calls = responder.calls();
    Mock::given(method("GET"))
        .and(path("/pdf/THPB007.pdf"))
        .respond_with(responder)
        .mount(&server)
        .await;

    let ws = Workspace::new()?;
    let url = format!("{}/pdf/THPB007.pdf", server.uri());
    let store = ws.store().await?;
    let report = fast_engine(1, 3, MB)
        .run(vec![candidate(&url, None)], &store, client(), &ws.organizer, RunOptions::default())
        .await?;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.retries, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_then_rerun_recovers() -> TestResult {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    Mock::given(method("GET"))
        .and(path("/pdf/FRXA01.pdf"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let ws = Workspace::new()?;
    let url = format!("{}/pdf/FRXA01.pdf", server.uri());
    let target = candidate(&url, None);
    let engine = fast_engine(1, 2, MB);
    let store = ws.store().await?;

    let report = engine
        .run(vec![target.clone()], &store, client(), &ws.organizer, RunOptions::default())
        .await?;
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors[0].kind, ErrorKind::Transient);
    assert!(store.lookup(&target.target_key()).await?.is_none());

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/pdf/FRXA01.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fixed".to_vec()))
        .mount(&server)
        .await;

    let report = engine
        .run(vec![target.clone()], &store, client(), &ws.organizer, RunOptions::default())
        .await?;
    assert_eq!(report.succeeded, 1);
    let record = store.lookup(&target.target_key()).await?.expect("completed");
    assert_eq!(record.outcome, ResumeOutcome::Completed);
    Ok(())
}

#[tokio::test]
async fn test_refused_connection_is_transient_and_bounded() -> TestResult {
    let ws = Workspace::new()?;
    let store = ws.store().await?;
    let report = fast_engine(1, 3, MB)
        .run(
            vec![candidate("http://127.0.0.1:1/pdf/MOPA002.pdf", None)],
            &store,
            client(),
            &ws.organizer,
            RunOptions::default(),
        )
        .await?;

    assert_eq!(report.failed, 1);
    assert_eq!(report.retries, 2, "three attempts in total");
    Ok(())
}

// ==================== Mixed batch ====================

#[tokio::test]
async fn test_mixed_batch_accounts_for_every_target() -> TestResult {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    for name in ["MOPA001", "MOPA002", "TUPB010"] {
        Mock::given(method("GET"))
            .and(path(format!("/pdf/{name}.pdf")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(name.as_bytes().to_vec()))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/pdf/MOPA003.pdf"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let ws = Workspace::new()?;
    let link = |name: &str| format!("{}/pdf/{name}.pdf", server.uri());
    let candidates = vec![
        candidate(&link("MOPA001"), None),
        candidate(&link("MOPA002"), None),
        candidate(&link("MOPA003"), None),
        // No session on the page: the bucket comes from the paper identifier.
        CandidateLink::new(link("TUPB010")).with_context(SourceContext::new("IPAC", Some(2023), None)),
        candidate(&link("MOPA001"), None),
        candidate(&format!("{}/ipac2023-proceedings.pdf", server.uri()), Some(200 * MB)),
    ];

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = RunOptions::default().with_callback(Arc::new(move |outcome: &TaskOutcome| {
        sink.lock().unwrap().push(outcome.classification.clone());
    }));

    let store = ws.store().await?;
    let report = fast_engine(2, 2, 50 * MB)
        .run(candidates, &store, client(), &ws.organizer, options)
        .await?;

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.rejected_oversize, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.total(), 5);
    assert_eq!(seen.lock().unwrap().len(), 5);
    assert!(
        seen.lock()
            .unwrap()
            .iter()
            .any(|c| *c == Classification::Proceedings)
    );
    assert!(ws.organizer.output_root().join("IPAC/2023/TUPB/TUPB010.pdf").exists());
    Ok(())
}

#[tokio::test]
async fn test_existing_destination_is_not_overwritten() -> TestResult {
    let Some(server) = start_mock_server_or_skip().await else {
        return Ok(());
    };
    Mock::given(method("GET"))
        .and(path("/pdf/MOPA009.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
        .mount(&server)
        .await;

    let ws = Workspace::new()?;
    let destination = ws.organizer.output_root().join("IPAC/2023/MOPA/MOPA009.pdf");
    std::fs::create_dir_all(destination.parent().expect("parent"))?;
    std::fs::write(&destination, b"old")?;

    let url = format!("{}/pdf/MOPA009.pdf", server.uri());
    let store = ws.store().await?;
    let report = fast_engine(1, 1, MB)
        .run(vec![candidate(&url, None)], &store, client(), &ws.organizer, RunOptions::default())
        .await?;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.already_present, 1);
    assert_eq!(std::fs::read(&destination)?, b"old");
    Ok(())
}
