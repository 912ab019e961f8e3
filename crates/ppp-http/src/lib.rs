//! Shared HTTP client for PPP: bounded concurrency, optional rate limit and
//! retry with exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub use reqwest::Url;

pub const CRATE_NAME: &str = "ppp-http";

/// Desktop browser user agent; some profile pages refuse obvious bots.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Error bodies kept on [`FetchError::HttpStatus`] are cut to this many bytes.
const MAX_ERROR_BODY_BYTES: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

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
    pub global_concurrency: usize,
    pub per_host_concurrency: usize,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
            per_host_concurrency: 4,
            backoff: BackoffPolicy::default(),
            token_bucket: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

impl TokenBucketConfig {
    /// Bucket allowing `n` requests per minute with a burst of `n`.
    pub fn per_minute(n: u32) -> Self {
        let n = n.max(1);
        Self {
            capacity: n,
            refill_every: Duration::from_millis((60_000 / u64::from(n)).max(1)),
        }
    }
}

const MIN_REFILL_INTERVAL: Duration = Duration::from_millis(1);

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
        Self {
            capacity,
            refill_every: refill_every.max(MIN_REFILL_INTERVAL),
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
            if elapsed >= self.refill_every {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
                state.tokens = (state.tokens.saturating_add(refills)).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every;
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("invalid url `{0}`")]
    InvalidUrl(String),
    #[error("http client is shutting down")]
    Shutdown,
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Request(err) if err.is_timeout())
    }
}

/// Host part of `url`, used as the per-host concurrency key.
pub fn host_key(url: &str) -> Result<String, FetchError> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_host_limit: usize,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    token_bucket: Option<Arc<SimpleTokenBucket>>,
    backoff: BackoffPolicy,
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
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_host_limit: config.per_host_concurrency.max(1),
            per_host: Mutex::new(HashMap::new()),
            token_bucket,
            backoff: config.backoff,
        })
    }

    async fn per_host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = self.per_host.lock().await;
        map.entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    pub async fn get(&self, run_id: Uuid, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, method = "GET", url);
        self.send_with_retry(url, || self.client.get(url))
            .instrument(span)
            .await
    }

    /// POST a JSON body, optionally with a bearer token.
    pub async fn post_json<B>(
        &self,
        run_id: Uuid,
        url: &str,
        bearer: Option<&str>,
        body: &B,
    ) -> Result<FetchedResponse, FetchError>
    where
        B: Serialize + ?Sized,
    {
        let span = info_span!("http_fetch", %run_id, method = "POST", url);
        self.send_with_retry(url, || {
            let request = self.client.post(url).json(body);
            match bearer {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        })
        .instrument(span)
        .await
    }

    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let host = host_key(url)?;
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Shutdown)?;
        let per_host = self.per_host_semaphore(&host).await;
        let _host = per_host.acquire().await.map_err(|_| FetchError::Shutdown)?;

        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }

        let mut attempt = 0usize;
        loop {
            let can_retry = attempt < self.backoff.max_retries;
            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse { body });
                    }

                    if classify_status(status) == RetryDisposition::Retryable && can_retry {
                        debug!(status = status.as_u16(), attempt, "retrying after http status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    let final_url = resp.url().to_string();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                        body: truncate_utf8(&body, MAX_ERROR_BODY_BYTES).to_string(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable && can_retry {
                        debug!(error = %err, attempt, "retrying after transport error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

/// Longest prefix of `text` within `max_bytes` that ends on a char boundary.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
