mod common;

use std::fs;

use assert_matches::assert_matches;
use camino::Utf8Path;
use sha2::{Digest, Sha256};

use graph_retrieval::config::RetryPolicy;
use graph_retrieval::download::{Deadline, DownloadJob, Downloader, Expected};
use graph_retrieval::error::RetrievalError;
use graph_retrieval::progress::SilentProgress;

use common::{MockHttp, Reply, utf8};

const URL: &str = "https://mock.test/file.txt";

fn fetch(
    http: &MockHttp,
    destination: &Utf8Path,
    expected: &Expected,
) -> Result<graph_retrieval::download::FetchedFile, RetrievalError> {
    Downloader::new(http, RetryPolicy::immediate(3)).fetch(
        URL,
        destination,
        "file.txt",
        expected,
        &Deadline::none(),
        &SilentProgress,
    )
}

fn leftovers(dir: &Utf8Path) -> Vec<String> {
    fs::read_dir(dir.as_std_path())
        .unwrap()
        .flatten()
        .map(|item| item.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".part"))
        .collect()
}

#[test]
fn transient_status_is_retried() {
    let temp = tempfile::tempdir().unwrap();
    let destination = utf8(temp.path().join("file.txt"));
    let http = MockHttp::new();
    http.serve(URL, "payload");
    http.script(URL, [Reply::Status(503), Reply::Status(429)]);

    let fetched = fetch(&http, &destination, &Expected::default()).unwrap();
    assert_eq!(http.requests(URL), 3);
    assert_eq!(fetched.size, 7);
    assert_eq!(fetched.sha256, format!("{:x}", Sha256::digest(b"payload")));
    assert_eq!(fs::read_to_string(destination.as_std_path()).unwrap(), "payload");
}

#[test]
fn client_error_is_not_retried() {
    let temp = tempfile::tempdir().unwrap();
    let destination = utf8(temp.path().join("file.txt"));
    let http = MockHttp::new();

    let err = fetch(&http, &destination, &Expected::default()).unwrap_err();
    assert_matches!(err, RetrievalError::Download { status: Some(404), attempts: 1, .. });
    assert_eq!(http.requests(URL), 1);
    assert!(!destination.exists());
}

#[test]
fn exhausted_retries_surface_last_status() {
    let temp = tempfile::tempdir().unwrap();
    let destination = utf8(temp.path().join("file.txt"));
    let http = MockHttp::new();
    http.serve(URL, "payload");
    http.script(URL, [Reply::Status(503), Reply::Status(503), Reply::Status(503)]);

    let err = fetch(&http, &destination, &Expected::default()).unwrap_err();
    assert_matches!(err, RetrievalError::Download { status: Some(503), attempts: 3, .. });
    assert!(err.is_network());
    assert!(!destination.exists());
}

#[test]
fn transport_errors_are_retried() {
    let temp = tempfile::tempdir().unwrap();
    let destination = utf8(temp.path().join("file.txt"));
    let http = MockHttp::new();
    http.serve(URL, "payload");
    http.script(URL, [Reply::Transport]);

    fetch(&http, &destination, &Expected::default()).unwrap();
    assert_eq!(http.requests(URL), 2);
}

#[test]
fn interrupted_body_never_leaves_partial_file() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path().to_path_buf());
    let destination = dir.join("file.txt");
    let http = MockHttp::new();
    let truncated = Reply::Truncated {
        body: b"pay".to_vec(),
        advertised: 7,
    };
    http.script(URL, [truncated.clone(), truncated.clone(), truncated]);

    let err = fetch(&http, &destination, &Expected::default()).unwrap_err();
    assert_matches!(err, RetrievalError::Download { status: None, attempts: 3, ref message, .. } if message.contains("interrupted"));
    assert!(!destination.exists());
    assert!(leftovers(&dir).is_empty());
}

#[test]
fn short_body_against_content_length_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path().to_path_buf());
    let destination = dir.join("file.txt");
    fs::write(destination.as_std_path(), "previous").unwrap();
    let http = MockHttp::new();
    let short = Reply::Advertised {
        body: b"pay".to_vec(),
        advertised: 7,
    };
    http.script(URL, [short.clone(), short.clone(), short]);

    let err = fetch(&http, &destination, &Expected::default()).unwrap_err();
    assert_matches!(err, RetrievalError::Download { ref message, .. } if message.contains("truncated"));
    assert_eq!(fs::read_to_string(destination.as_std_path()).unwrap(), "previous");
    assert!(leftovers(&dir).is_empty());
}

#[test]
fn expected_size_mismatch_is_rejected_before_streaming() {
    let temp = tempfile::tempdir().unwrap();
    let destination = utf8(temp.path().join("file.txt"));
    let http = MockHttp::new();
    http.serve(URL, "payload");
    let expected = Expected {
        size: Some(3),
        sha256: None,
    };

    let err = fetch(&http, &destination, &expected).unwrap_err();
    assert_matches!(err, RetrievalError::Download { attempts: 3, ref message, .. } if message.contains("expected 3"));
    assert!(!destination.exists());
}

#[test]
fn hash_mismatch_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let destination = utf8(temp.path().join("file.txt"));
    let http = MockHttp::new();
    http.serve(URL, "payload");
    let expected = Expected {
        size: Some(7),
        sha256: Some("0".repeat(64)),
    };

    let err = fetch(&http, &destination, &expected).unwrap_err();
    assert_matches!(err, RetrievalError::Download { ref message, .. } if message.contains("sha256 mismatch"));
    assert!(!destination.exists());
}

#[test]
fn matching_hash_is_accepted() {
    let temp = tempfile::tempdir().unwrap();
    let destination = utf8(temp.path().join("nested/file.txt"));
    let http = MockHttp::new();
    http.serve(URL, "payload");
    let expected = Expected {
        size: Some(7),
        sha256: Some(format!("{:X}", Sha256::digest(b"payload"))),
    };

    let fetched = fetch(&http, &destination, &expected).unwrap();
    assert_eq!(fetched.size, 7);
    assert!(destination.is_file());
}

#[test]
fn fetch_all_keeps_job_order_and_isolates_failures() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path().to_path_buf());
    let http = MockHttp::new();
    let urls = [
        "https://mock.test/a.txt",
        "https://mock.test/b.txt",
        "https://mock.test/c.txt",
    ];
    http.serve(urls[0], "a");
    http.serve(urls[2], "ccc");

    let jobs: Vec<DownloadJob> = urls
        .iter()
        .enumerate()
        .map(|(index, url)| DownloadJob {
            url: url.to_string(),
            destination: dir.join(format!("{index}.txt")),
            label: format!("{index}.txt"),
            expected: Expected::default(),
        })
        .collect();
    let downloader = Downloader::new(&http, RetryPolicy::immediate(2));
    let results = downloader.fetch_all(&jobs, 2, &Deadline::none(), &SilentProgress);

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().size, 1);
    assert_matches!(results[1], Err(RetrievalError::Download { status: Some(404), .. }));
    assert_eq!(results[2].as_ref().unwrap().size, 3);
    assert!(dir.join("0.txt").is_file());
    assert!(!dir.join("1.txt").exists());
    assert!(dir.join("2.txt").is_file());
}

#[test]
fn retry_backoff_longer_than_deadline_gives_up() {
    let temp = tempfile::tempdir().unwrap();
    let destination = utf8(temp.path().join("file.txt"));
    let http = MockHttp::new();
    http.serve(URL, "payload");
    http.script(URL, [Reply::Status(503)]);
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 60_000,
        max_delay_ms: 60_000,
    };

    let err = Downloader::new(&http, retry)
        .fetch(
            URL,
            &destination,
            "file.txt",
            &Expected::default(),
            &Deadline::after(std::time::Duration::from_secs(5)),
            &SilentProgress,
        )
        .unwrap_err();
    assert_matches!(err, RetrievalError::DeadlineExceeded { .. });
    assert_eq!(http.requests(URL), 1);
}
