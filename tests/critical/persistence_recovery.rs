//! Resume store recovery: corrupted databases, crashed runs, remembered
//! rejections across restarts.

use std::sync::Arc;

use jacow_core::download::RunOptions;
use jacow_core::organize::{Layout, Organizer};
use jacow_core::resume::StoreErrorKind;
use jacow_core::{HttpClient, ResumeOutcome, ResumeStore};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::support::socket_guard::start_mock_server_or_skip;
use crate::support::{candidate, fast_engine};

#[tokio::test]
async fn p0_corrupted_resume_db_is_reported_not_overwritten() {
    let temp = TempDir::new().expect("temp dir");
    let db_path = temp.path().join("resume.db");
    std::fs::write(&db_path, b"not a valid sqlite file\x00\x00\x00").expect("write");

    let err = ResumeStore::open(&db_path).await.expect_err("corrupt store must not open");

    assert_eq!(err.kind(), StoreErrorKind::Corrupt);
    assert_eq!(
        std::fs::read(&db_path).expect("read back"),
        b"not a valid sqlite file\x00\x00\x00",
        "the damaged file is left for inspection"
    );
}

#[tokio::test]
async fn p0_staging_leftovers_from_crashed_run_are_swept() {
    let temp = TempDir::new().expect("temp dir");
    let organizer = Organizer::new(temp.path().join("papers"), Layout::Session);
    let staging = organizer.staging_dir();
    std::fs::create_dir_all(&staging).expect("staging");
    std::fs::write(staging.join("deadbeef.part"), b"half a paper").expect("part");
    std::fs::write(staging.join("README"), b"keep me").expect("other");

    let store = ResumeStore::open_in_memory().await.expect("store");
    let report = fast_engine(1, 1, 1024)
        .run(
            Vec::new(),
            &store,
            Arc::new(HttpClient::new().expect("client")),
            &organizer,
            RunOptions::default(),
        )
        .await
        .expect("run");

    assert_eq!(report.total(), 0);
    assert!(!staging.join("deadbeef.part").exists());
    assert!(staging.join("README").exists());
    assert_eq!(store.count(ResumeOutcome::Completed).await.expect("count"), 0);
}

#[tokio::test]
async fn p0_oversize_memory_survives_restart_and_yields_to_raised_limit() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/ipac2023-proceedings.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'p'; 4096]))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().expect("temp dir");
    let db_path = temp.path().join("resume.db");
    let organizer = Organizer::new(temp.path().join("papers"), Layout::Session);
    let target = candidate(&format!("{}/ipac2023-proceedings.pdf", server.uri()), Some(4096));
    let client = Arc::new(HttpClient::new().expect("client"));

    let store = ResumeStore::open(&db_path).await.expect("store");
    let report = fast_engine(1, 1, 1024)
        .run(vec![target.clone()], &store, client.clone(), &organizer, RunOptions::default())
        .await
        .expect("first run");
    assert_eq!(report.rejected_oversize, 1);
    store.close().await;

    // Same limit after a restart: rejected from the store alone.
    let store = ResumeStore::open(&db_path).await.expect("reopen");
    let report = fast_engine(1, 1, 1024)
        .run(vec![target.clone()], &store, client.clone(), &organizer, RunOptions::default())
        .await
        .expect("second run");
    assert_eq!(report.rejected_oversize, 1);
    assert_eq!(report.attempted, 0);

    // Raised limit: fetched once and now completed for good.
    let report = fast_engine(1, 1, 1024 * 1024)
        .run(vec![target.clone()], &store, client, &organizer, RunOptions::default())
        .await
        .expect("third run");
    assert_eq!(report.succeeded, 1);
    let record = store
        .lookup(&target.target_key())
        .await
        .expect("lookup")
        .expect("record");
    assert_eq!(record.outcome, ResumeOutcome::Completed);
    assert!(
        organizer
            .output_root()
            .join("IPAC/2023/proceedings/ipac2023-proceedings.pdf")
            .exists()
    );
}
