use std::sync::Arc;

use hyper::ext::ReasonPhrase;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::scanner::ScanStats;
use crate::types::{ScanResult, ScanTarget};

/// Job queue receiver shared by every worker in the pool.
pub type SharedJobs = Arc<Mutex<mpsc::Receiver<ScanTarget>>>;

/// Recoverable per-target failure. Logged by the worker; never stops it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("request cancelled")]
    Cancelled,
}

/// Perform one GET bound to `cancel` and capture the response metadata.
///
/// The body is never read. The response is dropped before returning on every
/// path, which closes its connection instead of returning it to the pool.
pub async fn fetch(
    client: &Client,
    target: &str,
    cancel: &CancellationToken,
) -> Result<ScanResult, FetchError> {
    let url = Url::parse(target)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::UnsupportedScheme(url.scheme().to_string()));
    }
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        res = client.get(url).send() => res?,
    };
    let reason = response
        .extensions()
        .get::<ReasonPhrase>()
        .map(|r| r.as_bytes());
    let result = ScanResult::from_response(target, response.status(), reason, response.headers());
    drop(response);
    Ok(result)
}

/// One member of the fixed-size pool.
pub struct Worker {
    pub id: usize,
    pub client: Client,
    pub jobs: SharedJobs,
    pub results: mpsc::Sender<ScanResult>,
    pub cancel: CancellationToken,
    pub stats: ScanStats,
}

impl Worker {
    /// Take jobs until the queue is closed and drained or the run is cancelled.
    /// Dropping `self` on return releases this worker's result sender.
    pub async fn run(self) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                job = next_job(&self.jobs) => job,
            };
            let Some(target) = next else {
                break;
            };

            let result = match fetch(&self.client, &target, &self.cancel).await {
                Ok(r) => r,
                Err(FetchError::Cancelled) => {
                    debug!(worker = self.id, url = %target, "request abandoned on cancellation");
                    break;
                }
                Err(e) => {
                    self.stats.record_failure();
                    warn!(worker = self.id, url = %target, error = %e, "fetch failed");
                    continue;
                }
            };
            self.stats.record_fetch();

            let delivered = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                sent = self.results.send(result) => sent.is_ok(),
            };
            if !delivered {
                debug!(worker = self.id, url = %target, "result dropped, run is shutting down");
                break;
            }
        }
        debug!(worker = self.id, "worker exited");
    }
}

async fn next_job(jobs: &SharedJobs) -> Option<ScanTarget> {
    jobs.lock().await.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScanOutcome;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;
    use std::net::SocketAddr;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_ok_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn malformed_url_is_rejected_before_any_request() {
        let client = Client::new();
        let cancel = CancellationToken::new();
        let err = fetch(&client, "not a url", &cancel).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn non_http_scheme_is_rejected() {
        let client = Client::new();
        let cancel = CancellationToken::new();
        let err = fetch(&client, "ftp://files.test/x", &cancel).await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme(s) if s == "ftp"));
    }

    #[tokio::test]
    async fn cancelled_token_prevents_new_requests() {
        let client = Client::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetch(&client, "http://127.0.0.1:9/", &cancel).await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }

    #[tokio::test]
    async fn worker_exits_when_queue_closes() {
        let (job_tx, job_rx) = mpsc::channel::<ScanTarget>(2);
        let (res_tx, mut res_rx) = mpsc::channel(2);
        let stats = ScanStats::default();
        let worker = Worker {
            id: 0,
            client: Client::new(),
            jobs: Arc::new(Mutex::new(job_rx)),
            results: res_tx,
            cancel: CancellationToken::new(),
            stats: stats.clone(),
        };
        job_tx.send("not a url".to_string()).await.unwrap();
        drop(job_tx);

        worker.run().await;

        assert!(res_rx.recv().await.is_none());
        assert_eq!(stats.summary(ScanOutcome::Completed).failed, 1);
    }

    #[tokio::test]
    async fn result_is_abandoned_when_cancelled_while_queue_is_full() {
        let addr = spawn_ok_server().await;
        let (job_tx, job_rx) = mpsc::channel::<ScanTarget>(2);
        let (res_tx, mut res_rx) = mpsc::channel(1);
        res_tx
            .send(ScanResult::from_response("queued", StatusCode::OK, None, &HeaderMap::new()))
            .await
            .unwrap();
        let stats = ScanStats::default();
        let cancel = CancellationToken::new();
        let worker = Worker {
            id: 0,
            client: Client::new(),
            jobs: Arc::new(Mutex::new(job_rx)),
            results: res_tx,
            cancel: cancel.clone(),
            stats: stats.clone(),
        };
        job_tx.send(format!("http://{addr}/")).await.unwrap();
        let handle = tokio::spawn(worker.run());

        // The fetch completes, then the push blocks on the full queue.
        let mut waited = 0;
        while stats.fetched.load(Ordering::Relaxed) == 0 {
            assert!(waited < 200, "fetch never completed");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker exits after cancel")
            .unwrap();

        assert_eq!(res_rx.recv().await.unwrap().url, "queued");
        assert!(res_rx.recv().await.is_none());
    }
}
