//! Integration tests for isofetch downloads
//!
//! Every test runs against local wiremock mirrors and a temporary working
//! directory, driving the public library API from probe to promotion.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use isofetch::core::checkpoint;
use isofetch::{CancellationToken, Checkpoint, DownloadOptions, Downloader, Error, Progress};
use tempfile::{tempdir, TempDir};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SIZE: usize = 1000;
const MODIFIED: &str = "Wed, 16 Apr 2025 08:00:00 GMT";
const REBUILT: &str = "Fri, 18 Apr 2025 08:00:00 GMT";

fn image() -> Vec<u8> {
    (0..SIZE).map(|i| (i * 7 % 251) as u8).collect()
}

fn downloader() -> Downloader {
    Downloader::new().unwrap().with_options(DownloadOptions {
        buffer_size: 128,
        settle_delay: Duration::ZERO,
        ..Default::default()
    })
}

struct Workspace {
    _dir: TempDir,
    checkpoint: PathBuf,
    partial: PathBuf,
    dest: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempdir().unwrap();
    Workspace {
        checkpoint: dir.path().join("disk.ops"),
        partial: dir.path().join("disk.img.part"),
        dest: dir.path().join("disk.img"),
        _dir: dir,
    }
}

async fn mount_head(server: &MockServer, route: &str, modified: &str) {
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", SIZE.to_string().as_str())
                .insert_header("last-modified", modified),
        )
        .mount(server)
        .await;
}

fn http_date(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    Some(
        chrono::DateTime::parse_from_rfc2822(value)
            .unwrap()
            .with_timezone(&chrono::Utc),
    )
}

fn url(server: &MockServer, route: &str) -> String {
    format!("{}{}", server.uri(), route)
}

async fn fetch(d: &Downloader, ws: &Workspace, candidates: &[String]) -> isofetch::Result<PathBuf> {
    d.fetch(
        &ws.checkpoint,
        candidates,
        &ws.partial,
        &ws.dest,
        &CancellationToken::new(),
    )
    .await
}

fn assert_clean(ws: &Workspace) {
    assert!(!ws.checkpoint.exists(), "checkpoint should be removed");
    assert!(!ws.partial.exists(), "partial file should be promoted");
}

#[tokio::test]
async fn test_fresh_download() {
    let server = MockServer::start().await;
    mount_head(&server, "/disk.img", MODIFIED).await;
    Mock::given(method("GET"))
        .and(path("/disk.img"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image()))
        .expect(1)
        .mount(&server)
        .await;

    let ws = workspace();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let d = downloader().with_options(DownloadOptions {
        buffer_size: 128,
        settle_delay: Duration::ZERO,
        progress_interval: Duration::ZERO,
        progress: Some({
            let seen = Arc::clone(&seen);
            Arc::new(move |p: Progress| seen.lock().unwrap().push(p.bytes_done))
        }),
        ..Default::default()
    });

    let saved = fetch(&d, &ws, &[url(&server, "/disk.img")]).await.unwrap();

    assert_eq!(saved, ws.dest);
    assert_eq!(std::fs::read(&ws.dest).unwrap(), image());
    assert_clean(&ws);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.last().copied(), Some(SIZE as u64));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress must not go backwards");
}

#[tokio::test]
async fn test_interrupted_download_resumes() {
    let server = MockServer::start().await;
    mount_head(&server, "/disk.img", MODIFIED).await;

    // First attempt: the body ends 400 bytes into the full range.
    Mock::given(method("GET"))
        .and(path("/disk.img"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-999/1000")
                .set_body_bytes(image()[..400].to_vec()),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/disk.img"))
        .and(header("range", "bytes=400-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 400-999/1000")
                .set_body_bytes(image()[400..].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let ws = workspace();
    let d = downloader();
    let candidates = [url(&server, "/disk.img")];

    let err = fetch(&d, &ws, &candidates).await.unwrap_err();
    assert!(matches!(err, Error::ShortTransfer { expected: 1000, received: 400 }));
    assert!(err.is_resumable());

    let saved = checkpoint::read(&ws.checkpoint).await.unwrap();
    assert_eq!(saved.bytes_done, 400);
    assert_eq!(std::fs::metadata(&ws.partial).unwrap().len(), 400);

    fetch(&d, &ws, &candidates).await.unwrap();
    assert_eq!(std::fs::read(&ws.dest).unwrap(), image());
    assert_clean(&ws);
}

#[tokio::test]
async fn test_stale_checkpoint_restarts_from_zero() {
    let server = MockServer::start().await;
    mount_head(&server, "/disk.img", REBUILT).await;
    // Any ranged GET would splice old bytes into the new build.
    Mock::given(method("GET"))
        .and(header_exists("range"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/disk.img"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image()))
        .mount(&server)
        .await;

    let ws = workspace();
    let old = http_date(MODIFIED);
    let mut recorded = Checkpoint::new(url(&server, "/disk.img"), &ws.partial, SIZE as u64, old);
    recorded.bytes_done = 300;
    std::fs::write(&ws.partial, vec![0xEE; 300]).unwrap();
    checkpoint::write(&ws.checkpoint, &recorded).await.unwrap();

    fetch(&downloader(), &ws, &[url(&server, "/disk.img")]).await.unwrap();

    // Nothing from the old build may survive in the output.
    assert_eq!(std::fs::read(&ws.dest).unwrap(), image());
    assert_clean(&ws);
}

#[tokio::test]
async fn test_body_longer_than_advertised_is_rejected() {
    let server = MockServer::start().await;
    mount_head(&server, "/disk.img", MODIFIED).await;
    Mock::given(method("GET"))
        .and(path("/disk.img"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x5A; 2 * SIZE]))
        .mount(&server)
        .await;

    let ws = workspace();
    let err = fetch(&downloader(), &ws, &[url(&server, "/disk.img")])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StaleCheckpoint { .. }));
    assert!(!err.is_resumable());
    assert!(!ws.dest.exists(), "a truncated copy must never be promoted");
    assert_eq!(checkpoint::partial_len(&ws.partial).await.unwrap(), 0);
}

#[tokio::test]
async fn test_zero_length_resource() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/empty.img"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", "0")
                .insert_header("last-modified", MODIFIED),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ws = workspace();
    let saved = fetch(&downloader(), &ws, &[url(&server, "/empty.img")])
        .await
        .unwrap();

    assert_eq!(saved, ws.dest);
    assert_eq!(std::fs::metadata(&ws.dest).unwrap().len(), 0);
    assert_clean(&ws);
}

#[tokio::test]
async fn test_mirror_failover() {
    let server = MockServer::start().await;
    Mock::given(path("/down/disk.img"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_head(&server, "/up/disk.img", MODIFIED).await;
    Mock::given(method("GET"))
        .and(path("/up/disk.img"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image()))
        .mount(&server)
        .await;
    Mock::given(path("/unused/disk.img"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ws = workspace();
    let d = downloader();
    let candidates = [
        url(&server, "/down/disk.img"),
        url(&server, "/up/disk.img"),
        url(&server, "/unused/disk.img"),
    ];

    let prepared = d
        .prepare(&ws.checkpoint, &candidates, &ws.partial, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(prepared.source_url, candidates[1]);

    d.download(&ws.checkpoint, &prepared, &ws.dest, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(std::fs::read(&ws.dest).unwrap(), image());
}

#[tokio::test]
async fn test_all_mirrors_down() {
    let server = MockServer::start().await;
    Mock::given(path("/disk.img"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let ws = workspace();
    let err = fetch(&downloader(), &ws, &[url(&server, "/disk.img")])
        .await
        .unwrap_err();

    match err {
        Error::NoReachableUrl { tried, last } => {
            assert_eq!(tried, 1);
            assert!(matches!(last.as_deref(), Some(Error::HttpStatus { status: 404, .. })));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!ws.checkpoint.exists());
}

#[tokio::test]
async fn test_finalize_failure_keeps_completed_checkpoint() {
    let server = MockServer::start().await;
    mount_head(&server, "/disk.img", MODIFIED).await;
    Mock::given(method("GET"))
        .and(path("/disk.img"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image()))
        .expect(1)
        .mount(&server)
        .await;

    let ws = workspace();
    let d = downloader();
    let candidates = [url(&server, "/disk.img")];
    let cancel = CancellationToken::new();
    let unreachable_dest = ws.dest.parent().unwrap().join("missing").join("disk.img");

    let err = d
        .fetch(&ws.checkpoint, &candidates, &ws.partial, &unreachable_dest, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FinalizeFailed { .. }));

    let kept = checkpoint::read(&ws.checkpoint).await.unwrap();
    assert!(kept.is_complete());

    // The retry only promotes the file; the GET mock allows a single transfer.
    fetch(&d, &ws, &candidates).await.unwrap();
    assert_eq!(std::fs::read(&ws.dest).unwrap(), image());
    assert_clean(&ws);
}

#[tokio::test]
async fn test_cancelled_download_keeps_state() {
    let server = MockServer::start().await;
    mount_head(&server, "/disk.img", MODIFIED).await;
    Mock::given(method("GET"))
        .and(path("/disk.img"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(image())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let ws = workspace();
    let d = downloader();
    let candidates = [url(&server, "/disk.img")];
    let cancel = CancellationToken::new();

    let prepared = d
        .prepare(&ws.checkpoint, &candidates, &ws.partial, &cancel)
        .await
        .unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = d
        .download(&ws.checkpoint, &prepared, &ws.dest, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(!err.is_resumable());
    assert!(ws.checkpoint.exists());
    assert!(!ws.dest.exists());
}

#[tokio::test]
async fn test_candidates_fall_back_to_defaults_without_cache() {
    let d = downloader();
    assert!(!d.remote_url_cache_enabled());

    let defaults = vec!["https://mirror.example/disk.img".to_string()];
    let candidates = d
        .resolve_candidates("disk", None, &defaults, &[], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(candidates, defaults);
}
