//! Blocking JSON-over-HTTP client shared by the embedding, chat and vector store clients.


use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Failed to serialize request body: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl HttpError {
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status(404))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff_unit: Duration,
    headers: Vec<(String, String)>,
}

impl Default for HttpClient {
    #[inline]
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
    }
}

impl HttpClient {
    #[inline]
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_unit: Duration::from_secs(1),
            headers: Vec::new(),
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay of the exponential backoff between attempts
    #[inline]
    pub fn with_backoff(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Header sent with every request, e.g. an auth token
    #[inline]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[inline]
    pub fn with_bearer_token(self, token: &str) -> Self {
        if token.is_empty() {
            self
        } else {
            self.with_header("Authorization", &format!("Bearer {}", token))
        }
    }

    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    #[inline]
    pub fn get(&self, url: &str) -> Result<String, HttpError> {
        debug!("GET {}", url);
        self.make_request_with_retry(url, || {
            self.apply_headers(self.agent.get(url))
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    #[inline]
    pub fn post_json<T: Serialize>(&self, url: &str, body: &T) -> Result<String, HttpError> {
        let body = serde_json::to_string(body)?;
        debug!("POST {} ({} bytes)", url, body.len());
        self.make_request_with_retry(url, || {
            self.apply_headers(self.agent.post(url))
                .header("Content-Type", "application/json")
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    #[inline]
    pub fn put_json<T: Serialize>(&self, url: &str, body: &T) -> Result<String, HttpError> {
        let body = serde_json::to_string(body)?;
        debug!("PUT {} ({} bytes)", url, body.len());
        self.make_request_with_retry(url, || {
            self.apply_headers(self.agent.put(url))
                .header("Content-Type", "application/json")
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn apply_headers<B>(&self, mut request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    fn make_request_with_retry<F>(&self, url: &str, mut request_fn: F) -> Result<String, HttpError>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let retryable = match &error {
                        ureq::Error::StatusCode(status) if *status >= 500 => {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, self.retry_attempts
                            );
                            HttpError::Status(*status)
                        }
                        ureq::Error::StatusCode(status) => {
                            debug!("Client error (status {}), not retrying", status);
                            return Err(HttpError::Status(*status));
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            HttpError::Transport(error.to_string())
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            return Err(HttpError::Transport(error.to_string()));
                        }
                    };

                    last_error = Some(retryable);

                    if attempt < self.retry_attempts {
                        let delay = self.backoff_unit * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", url);

        Err(last_error
            .unwrap_or_else(|| HttpError::Transport("Request failed after retries".to_string())))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Join a base URL and a path without doubling or dropping slashes.
#[inline]
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
