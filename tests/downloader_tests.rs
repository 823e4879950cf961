//! End-to-end pipeline runs against a mock server: counter invariants,
//! resolution failures without network calls, cooperative cancellation,
//! and the on-disk layout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use worldpop_downloader::api::CatalogClient;
use worldpop_downloader::config::Config;
use worldpop_downloader::downloader::{Downloader, PipelineEvent};
use worldpop_downloader::error::DownloaderError;
use worldpop_downloader::types::{CatalogItem, JobStatus, RunState, Selection};

fn pop_item(id: &str, collection: &str, year: i64, href: &str) -> CatalogItem {
    serde_json::from_value(json!({
        "id": id,
        "collection": collection,
        "properties": {"year": year},
        "assets": {
            "pop": {"roles": ["data"], "href": href}
        }
    }))
    .unwrap()
}

fn item_without_assets(id: &str) -> CatalogItem {
    serde_json::from_value(json!({
        "id": id,
        "collection": "KEN",
        "properties": {"year": 2020},
        "assets": {
            "thumb": {"roles": ["thumbnail"], "href": "https://x/t.png"}
        }
    }))
    .unwrap()
}

async fn mount_file(server: &MockServer, file_path: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(server)
        .await;
}

fn pipeline(
    config: &Config,
    cancel: Arc<AtomicBool>,
) -> (Downloader, mpsc::UnboundedReceiver<PipelineEvent>) {
    let (events, rx) = mpsc::unbounded_channel();
    let client = CatalogClient::new(config);
    (Downloader::new(client, config.clone(), cancel, events), rx)
}

fn test_config(base_url: &str, dir: &TempDir, subfolders: bool) -> Config {
    Config {
        base_url: base_url.to_string(),
        api_key: String::new(),
        download_dir: dir.path().join("out"),
        create_subfolders: subfolders,
        ..Config::default()
    }
}

#[tokio::test]
async fn run_attempts_every_item_and_balances_the_counters() {
    let server = MockServer::start().await;
    mount_file(&server, "/files/ken_pop_2020.tif", b"pop 2020").await;
    mount_file(&server, "/files/ken_pop_2021.tif", b"pop 2021").await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir, false);

    let mut selection = Selection::new();
    selection.add(&pop_item(
        "ken_pop_2020",
        "KEN",
        2020,
        &format!("{}/files/ken_pop_2020.tif", server.uri()),
    ));
    selection.add(&pop_item(
        "ken_pop_2021",
        "KEN",
        2021,
        &format!("{}/files/ken_pop_2021.tif", server.uri()),
    ));
    selection.add(&item_without_assets("ken_bare_2020"));

    let (downloader, mut rx) = pipeline(&config, Arc::new(AtomicBool::new(false)));
    let summary = downloader.run(&selection).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.downloaded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.downloaded + summary.failed, summary.total);
    assert_eq!(summary.state, RunState::Completed);

    let out = config.download_dir;
    assert_eq!(std::fs::read(out.join("ken_pop_2020.tif")).unwrap(), b"pop 2020");
    assert_eq!(std::fs::read(out.join("ken_pop_2021.tif")).unwrap(), b"pop 2021");

    // The unresolvable item failed without producing a file.
    assert_eq!(summary.jobs[2].status, JobStatus::Failed);
    assert!(!out.join("ken_bare_2020.tif").exists());

    // Events bracket the run and carry attempted-so-far fractions.
    drop(downloader);
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { total: 3 })));
    assert!(matches!(events.last(), Some(PipelineEvent::RunFinished { .. })));
    let fractions: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::FileStarted { fraction, .. } => Some(*fraction),
            _ => None,
        })
        .collect();
    assert_eq!(fractions, vec![0.0, 1.0 / 3.0]);
}

#[tokio::test]
async fn unresolvable_item_fails_without_touching_the_network() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir, false);

    let selection = Selection::select_all(&[item_without_assets("ken_bare_2020")]);
    let (downloader, _rx) = pipeline(&config, Arc::new(AtomicBool::new(false)));
    let summary = downloader.run(&selection).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.state, RunState::Completed);

    let requests = server.received_requests().await.unwrap();
    assert!(requests.is_empty(), "no network call for an unresolved item");
}

/// Serves the file body and flips the shared cancellation flag, so the run
/// is cancelled while the second transfer is still in flight.
struct CancelOnServe {
    cancel: Arc<AtomicBool>,
    body: Vec<u8>,
}

impl Respond for CancelOnServe {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.cancel.store(true, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_bytes(self.body.clone())
    }
}

#[tokio::test]
async fn cancellation_takes_effect_at_the_next_item_boundary() {
    let server = MockServer::start().await;
    let cancel = Arc::new(AtomicBool::new(false));

    mount_file(&server, "/files/p1.tif", b"one").await;
    Mock::given(method("GET"))
        .and(path("/files/p2.tif"))
        .respond_with(CancelOnServe {
            cancel: cancel.clone(),
            body: b"two".to_vec(),
        })
        .mount(&server)
        .await;
    // Items 3-5 are reachable; they must never be requested.
    mount_file(&server, "/files/p3.tif", b"three").await;
    mount_file(&server, "/files/p4.tif", b"four").await;
    mount_file(&server, "/files/p5.tif", b"five").await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir, false);

    let mut selection = Selection::new();
    for i in 1..=5 {
        selection.add(&pop_item(
            &format!("ken_pop_p{}", i),
            "KEN",
            2020 + i,
            &format!("{}/files/p{}.tif", server.uri(), i),
        ));
    }

    let (downloader, _rx) = pipeline(&config, cancel);
    let summary = downloader.run(&selection).await.unwrap();

    assert_eq!(summary.total, 5);
    assert_eq!(summary.downloaded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.state, RunState::Stopped);

    // The in-flight transfer finished; the tail was left untouched.
    assert_eq!(summary.jobs[0].status, JobStatus::Complete);
    assert_eq!(summary.jobs[1].status, JobStatus::Complete);
    for job in &summary.jobs[2..] {
        assert_eq!(job.status, JobStatus::Pending);
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn subfolders_follow_collection_and_year() {
    let server = MockServer::start().await;
    mount_file(&server, "/files/ken_pop_2021.tif", b"layout").await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir, true);

    let selection = Selection::select_all(&[pop_item(
        "ken_pop_2021",
        "KEN",
        2021,
        &format!("{}/files/ken_pop_2021.tif", server.uri()),
    )]);

    let (downloader, _rx) = pipeline(&config, Arc::new(AtomicBool::new(false)));
    let summary = downloader.run(&selection).await.unwrap();

    assert_eq!(summary.downloaded, 1);
    let expected = config
        .download_dir
        .join("KEN")
        .join("2021")
        .join("ken_pop_2021.tif");
    assert_eq!(std::fs::read(&expected).unwrap(), b"layout");
}

#[tokio::test]
async fn failed_transfer_does_not_end_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/broken.tif"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_file(&server, "/files/good.tif", b"good").await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir, false);

    let mut selection = Selection::new();
    selection.add(&pop_item(
        "ken_broken_2020",
        "KEN",
        2020,
        &format!("{}/files/broken.tif", server.uri()),
    ));
    selection.add(&pop_item(
        "ken_good_2021",
        "KEN",
        2021,
        &format!("{}/files/good.tif", server.uri()),
    ));

    let (downloader, _rx) = pipeline(&config, Arc::new(AtomicBool::new(false)));
    let summary = downloader.run(&selection).await.unwrap();

    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.jobs[0].status, JobStatus::Failed);
    assert_eq!(summary.jobs[1].status, JobStatus::Complete);
}

#[tokio::test]
async fn empty_selection_never_starts_a_run() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir, false);

    let (downloader, mut rx) = pipeline(&config, Arc::new(AtomicBool::new(false)));
    let result = downloader.run(&Selection::new()).await;

    assert!(matches!(result, Err(DownloaderError::EmptySelection)));
    drop(downloader);
    assert!(rx.try_recv().is_err(), "no events for a refused run");
    assert!(!config.download_dir.exists());
}
