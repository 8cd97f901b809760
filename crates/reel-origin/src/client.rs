//! Origin API client on reqwest.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reel_models::{CallbackPayload, ReelId, RenderContext};
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use crate::api::OriginApi;
use crate::error::{OriginError, OriginResult};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for the origin API client.
#[derive(Debug, Clone)]
pub struct OriginConfig {
    /// Base URL, e.g. `https://api.example.com/internal`
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>` when set
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl OriginConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create config from environment variables.
    pub fn from_env() -> OriginResult<Self> {
        let base_url = std::env::var("ORIGIN_API_URL")
            .map_err(|_| OriginError::config_error("ORIGIN_API_URL not set"))?;

        if base_url.trim().is_empty() {
            return Err(OriginError::config_error("ORIGIN_API_URL cannot be empty"));
        }

        let timeout_secs: u64 = std::env::var("ORIGIN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Self {
            base_url,
            token: std::env::var("ORIGIN_API_TOKEN").ok().filter(|t| !t.is_empty()),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(5),
        })
    }
}

/// HTTP client for the origin API.
#[derive(Clone)]
pub struct OriginClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl OriginClient {
    /// Create a new client.
    pub fn new(config: OriginConfig) -> OriginResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("reel-origin/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(OriginError::Network)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> OriginResult<Self> {
        Self::new(OriginConfig::from_env()?)
    }

    fn context_url(&self, reel_id: &ReelId) -> String {
        format!("{}/render-context/{}", self.base_url, reel_id)
    }

    fn callback_url(&self, reel_id: &ReelId) -> String {
        format!("{}/render-callback/{}", self.base_url, reel_id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn handle_error_response(status: StatusCode, url: &str, response: reqwest::Response) -> OriginError {
        let body = response.text().await.unwrap_or_default();
        OriginError::from_http_status(status.as_u16(), format!("{} failed: {}", url, truncate(&body, 512)))
    }
}

#[async_trait]
impl OriginApi for OriginClient {
    async fn fetch_context(&self, reel_id: &ReelId) -> OriginResult<RenderContext> {
        let url = self.context_url(reel_id);
        let started = Instant::now();
        debug!(reel_id = %reel_id, "Fetching render context");

        let response = self.authorize(self.http.get(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::handle_error_response(status, &url, response).await);
        }

        let body = response.bytes().await?;
        let context: RenderContext = serde_json::from_slice(&body)
            .map_err(|e| OriginError::invalid_response(format!("{}: malformed render context: {}", url, e)))?;
        context
            .validate()
            .map_err(|e| OriginError::invalid_response(format!("{}: {}", url, e)))?;

        info!(
            reel_id = %reel_id,
            clips = context.clips.len(),
            duration_ms = context.duration_ms,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched render context"
        );
        Ok(context)
    }

    async fn post_callback(&self, reel_id: &ReelId, payload: &CallbackPayload) -> OriginResult<()> {
        let url = self.callback_url(reel_id);
        debug!(reel_id = %reel_id, mp4_url = %payload.mp4_url, "Posting render callback");

        let response = self
            .authorize(self.http.post(&url))
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::handle_error_response(status, &url, response).await);
        }

        info!(reel_id = %reel_id, "Render callback accepted");
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
