//! Atomic publish storage + polite HTTP fetch utilities for the harvester.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Serialize;
use sghalal_core::PublishedFile;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "sghalal-storage";

pub use reqwest::header;

/// One file staged inside the publish directory, not yet renamed into place.
#[derive(Debug)]
struct StagedFile {
    temp_path: PathBuf,
    final_path: PathBuf,
    backup_path: PathBuf,
    entry: PublishedFile,
}

/// Directory holding the published dataset.
///
/// Files are only ever replaced through [`PublishStore::publish`], which
/// stages every file next to its destination before renaming any of them, so
/// readers never observe a half-written file.
#[derive(Debug, Clone)]
pub struct PublishStore {
    root: PathBuf,
}

impl PublishStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Write every `(name, bytes)` pair to a temp file in the publish
    /// directory, then rename them into place in the given order.
    ///
    /// If staging fails nothing is renamed. If a rename fails, files already
    /// swapped in are restored from hard-link backups (or removed when they
    /// did not exist before), so the directory keeps the previous set. Each
    /// file is swapped atomically, but a reader listing the directory while
    /// the swap is in progress can still pair a new file with an old one.
    pub async fn publish(&self, files: &[(&str, Vec<u8>)]) -> anyhow::Result<Vec<PublishedFile>> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating publish directory {}", self.root.display()))?;

        let mut staged = Vec::with_capacity(files.len());
        for (name, bytes) in files {
            match self.stage(name, bytes).await {
                Ok(file) => staged.push(file),
                Err(err) => {
                    discard_staged(&staged).await;
                    return Err(err);
                }
            }
        }

        let mut swapped: Vec<(&StagedFile, bool)> = Vec::with_capacity(staged.len());
        for (idx, file) in staged.iter().enumerate() {
            match swap_in(file).await {
                Ok(had_previous) => swapped.push((file, had_previous)),
                Err(err) => {
                    roll_back(&swapped).await;
                    discard_staged(&staged[idx..]).await;
                    return Err(err);
                }
            }
        }

        for (file, had_previous) in &swapped {
            if *had_previous {
                if let Err(err) = fs::remove_file(&file.backup_path).await {
                    warn!(
                        path = %file.backup_path.display(),
                        error = %err,
                        "failed to remove backup"
                    );
                }
            }
        }
        Ok(staged.into_iter().map(|file| file.entry).collect())
    }

    async fn stage(&self, name: &str, bytes: &[u8]) -> anyhow::Result<StagedFile> {
        let final_path = self.root.join(name);
        let stamp = Uuid::new_v4();
        let temp_path = self.root.join(format!(".{name}.{stamp}.tmp"));
        let backup_path = self.root.join(format!(".{name}.{stamp}.bak"));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp publish file {}", temp_path.display()))?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err)
                .with_context(|| format!("writing temp publish file {}", temp_path.display()));
        }

        Ok(StagedFile {
            temp_path,
            final_path,
            backup_path,
            entry: PublishedFile {
                name: name.to_string(),
                sha256: Self::sha256_hex(bytes),
                bytes: bytes.len() as u64,
            },
        })
    }
}

/// Rename a staged file over its destination, keeping a hard link to the
/// previous file. Returns whether a previous file existed.
async fn swap_in(file: &StagedFile) -> anyhow::Result<bool> {
    let had_previous = match fs::hard_link(&file.final_path, &file.backup_path).await {
        Ok(()) => true,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => {
            return Err(err).with_context(|| {
                format!("backing up published file {}", file.final_path.display())
            })
        }
    };
    if let Err(err) = fs::rename(&file.temp_path, &file.final_path).await {
        if had_previous {
            let _ = fs::remove_file(&file.backup_path).await;
        }
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                file.temp_path.display(),
                file.final_path.display()
            )
        });
    }
    Ok(had_previous)
}

async fn roll_back(swapped: &[(&StagedFile, bool)]) {
    for (file, had_previous) in swapped.iter().rev() {
        let restored = if *had_previous {
            fs::rename(&file.backup_path, &file.final_path).await
        } else {
            fs::remove_file(&file.final_path).await
        };
        if let Err(err) = restored {
            warn!(
                path = %file.final_path.display(),
                error = %err,
                "failed to restore published file"
            );
        }
    }
}

async fn discard_staged(files: &[StagedFile]) {
    for file in files {
        if let Err(err) = fs::remove_file(&file.temp_path).await {
            warn!(path = %file.temp_path.display(), error = %err, "failed to remove staged file");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Server errors plus the client statuses that signal a transient condition:
/// 408 Request Timeout, 425 Too Early and 429 Too Many Requests.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    let transient_client = matches!(status.as_u16(), 408 | 425 | 429);
    if status.is_server_error() || transient_client {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Upper bound on requests in flight at once.
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            concurrency: 4,
            backoff: BackoffPolicy::default(),
            token_bucket: Some(TokenBucketConfig {
                capacity: 1,
                refill_every: Duration::from_millis(250),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

/// Token bucket shared by every request; with capacity 1 it degrades to a
/// fixed minimum spacing between requests.
#[derive(Debug)]
pub struct SimpleTokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl SimpleTokenBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if self.refill_every.is_zero() {
                state.tokens = self.capacity;
                state.last_refill = Instant::now();
            } else if elapsed >= self.refill_every {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis().max(1)) as u32;
                state.tokens = (state.tokens.saturating_add(refills)).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every.saturating_sub(elapsed);
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
    token_bucket: Option<Arc<SimpleTokenBucket>>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let token_bucket = config
            .token_bucket
            .map(|c| Arc::new(SimpleTokenBucket::new(c.capacity, c.refill_every)));

        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            token_bucket,
            backoff: config.backoff,
        })
    }

    pub async fn get(&self, url: &str, headers: HeaderMap) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", method = "GET", url);
        self.send_with_retry(url, || self.client.get(url).headers(headers.clone()))
            .instrument(span)
            .await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &B,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", method = "POST", url);
        self.send_with_retry(url, || {
            self.client.post(url).headers(headers.clone()).json(body)
        })
        .instrument(span)
        .await
    }

    /// Issue the request built by `build`, retrying transient failures with
    /// exponential backoff. Every attempt waits for a pool slot and a rate
    /// limit token.
    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            let resp_result = {
                let _permit = self.limit.acquire().await.expect("semaphore not closed");
                if let Some(bucket) = &self.token_bucket {
                    bucket.take().await;
                }
                match build().send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        let final_url = resp.url().to_string();
                        if status.is_success() {
                            resp.bytes().await.map(|body| Ok((status, final_url, body.to_vec())))
                        } else {
                            Ok(Err((status, final_url)))
                        }
                    }
                    Err(err) => Err(err),
                }
            };

            match resp_result {
                Ok(Ok((status, final_url, body))) => {
                    debug!(attempt, status = status.as_u16(), bytes = body.len(), "fetched");
                    return Ok(FetchedResponse {
                        status,
                        final_url,
                        body,
                    });
                }
                Ok(Err((status, final_url))) => {
                    let retryable = classify_status(status) == RetryDisposition::Retryable;
                    if retryable && attempt < self.backoff.max_retries {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(
                            attempt,
                            status = status.as_u16(),
                            ?delay,
                            "retrying after http status"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    let retryable = classify_reqwest_error(&err) == RetryDisposition::Retryable;
                    if retryable && attempt < self.backoff.max_retries {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(attempt, error = %err, ?delay, url, "retrying after request error");
                        last_request_error = Some(err);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn content_hashing_is_stable() {
        let hash = PublishStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn publish_replaces_files_and_reports_checksums() {
        let dir = tempdir().expect("tempdir");
        let store = PublishStore::new(dir.path().join("out"));

        store
            .publish(&[("halal_establishments.csv", b"old".to_vec())])
            .await
            .expect("first publish");
        let published = store
            .publish(&[
                ("halal_establishments.csv", b"name\nnew\n".to_vec()),
                ("metadata.json", b"{}".to_vec()),
            ])
            .await
            .expect("second publish");

        assert_eq!(published.len(), 2);
        assert_eq!(published[0].name, "halal_establishments.csv");
        assert_eq!(published[0].bytes, 9);
        assert_eq!(published[0].sha256, PublishStore::sha256_hex(b"name\nnew\n"));
        let csv = std::fs::read_to_string(store.path_for("halal_establishments.csv")).unwrap();
        assert_eq!(csv, "name\nnew\n");

        let leftovers: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn failed_staging_leaves_previous_files_untouched() {
        let dir = tempdir().expect("tempdir");
        let store = PublishStore::new(dir.path());
        store
            .publish(&[("halal_establishments.json", b"[1]".to_vec())])
            .await
            .expect("seed publish");

        // A name pointing into a missing subdirectory cannot be staged.
        let err = store
            .publish(&[
                ("halal_establishments.json", b"[]".to_vec()),
                ("missing/metadata.json", b"{}".to_vec()),
            ])
            .await;
        assert!(err.is_err());

        let json = std::fs::read_to_string(store.path_for("halal_establishments.json")).unwrap();
        assert_eq!(json, "[1]");
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT), RetryDisposition::Retryable);
        assert_eq!(
            classify_status(StatusCode::from_u16(425).unwrap()),
            RetryDisposition::Retryable
        );
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), RetryDisposition::NonRetryable);
    }

    #[tokio::test]
    async fn token_bucket_allows_burst_up_to_capacity() {
        let bucket = SimpleTokenBucket::new(3, Duration::from_secs(60));
        let started = Instant::now();
        bucket.take().await;
        bucket.take().await;
        bucket.take().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn token_bucket_spaces_requests_once_drained() {
        let bucket = SimpleTokenBucket::new(1, Duration::from_millis(40));
        let started = Instant::now();
        bucket.take().await;
        bucket.take().await;
        assert!(started.elapsed() >= Duration::from_millis(35));
    }

    #[tokio::test]
    async fn failed_rename_restores_files_already_swapped_in() {
        let dir = tempdir().expect("tempdir");
        let store = PublishStore::new(dir.path());
        store
            .publish(&[("halal_establishments.csv", b"old csv".to_vec())])
            .await
            .expect("seed publish");
        // A non-empty directory where the JSON belongs cannot be replaced.
        std::fs::create_dir_all(store.path_for("halal_establishments.json/inner")).unwrap();

        let err = store
            .publish(&[
                ("halal_establishments.csv", b"new csv".to_vec()),
                ("metadata.json", b"{}".to_vec()),
                ("halal_establishments.json", b"[]".to_vec()),
            ])
            .await;
        assert!(err.is_err());

        let csv = std::fs::read_to_string(store.path_for("halal_establishments.csv")).unwrap();
        assert_eq!(csv, "old csv");
        assert!(!store.path_for("metadata.json").exists());
        let leftovers: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp") || name.ends_with(".bak"))
            .collect();
        assert!(leftovers.is_empty(), "leftover files: {leftovers:?}");
    }

    /// Local HTTP server answering each connection with the next status in
    /// `statuses`, repeating the last one once the list runs out.
    struct ScriptedServer {
        url: String,
        hits: Arc<AtomicUsize>,
        requests: Arc<std::sync::Mutex<Vec<String>>>,
    }

    async fn scripted_server(statuses: Vec<u16>) -> ScriptedServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (counter, log) = (hits.clone(), requests.clone());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(n).or(statuses.last()).copied().unwrap_or(200);
                let request = read_request(&mut socket).await;
                log.lock().unwrap().push(request);
                let body = if status == 200 { "ok" } else { "unavailable" };
                let response = format!(
                    "HTTP/1.1 {status} Scripted\r\n\
                     content-length: {}\r\n\
                     connection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        ScriptedServer {
            url: format!("http://{addr}/api/halal/establishments"),
            hits,
            requests,
        }
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn test_fetcher(max_retries: usize) -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            user_agent: Some("sghalal-test".to_string()),
            concurrency: 2,
            backoff: BackoffPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            token_bucket: None,
        })
        .expect("fetcher")
    }

    #[tokio::test]
    async fn server_error_is_retried_until_success() {
        let server = scripted_server(vec![503, 200]).await;
        let fetched = test_fetcher(2)
            .get(&server.url, HeaderMap::new())
            .await
            .expect("second attempt succeeds");
        assert_eq!(fetched.status, StatusCode::OK);
        assert_eq!(fetched.text(), "ok");
        assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn request_timeout_status_is_retried() {
        let server = scripted_server(vec![408, 200]).await;
        let fetched = test_fetcher(2).get(&server.url, HeaderMap::new()).await;
        assert!(fetched.is_ok());
        assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_server_error_gives_up_after_the_retry_limit() {
        let server = scripted_server(vec![503]).await;
        let err = test_fetcher(2)
            .get(&server.url, HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
        assert_eq!(server.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_fails_without_retrying() {
        let server = scripted_server(vec![404, 200]).await;
        let err = test_fetcher(3)
            .get(&server.url, HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
        assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn post_json_sends_the_serialized_body() {
        let server = scripted_server(vec![200]).await;
        let body = serde_json::json!({"text": "rice", "page": 1, "pageSize": 100});
        test_fetcher(0)
            .post_json(&server.url, HeaderMap::new(), &body)
            .await
            .expect("post");

        let requests = server.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert!(request.starts_with("POST /api/halal/establishments "));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        let (_, sent) = request.split_once("\r\n\r\n").unwrap();
        let sent: serde_json::Value = serde_json::from_str(sent).unwrap();
        assert_eq!(sent, body);
    }
}
