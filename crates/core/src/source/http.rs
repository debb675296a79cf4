use crate::config::Settings;
use crate::error::SourceError;
use crate::source::PageSource;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;

const MAX_BACKOFF_DOUBLINGS: u32 = 6;
const USER_AGENT_VALUE: &str = concat!("epiboard/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct HttpPageSource {
    http: reqwest::Client,
    retries: u32,
    backoff: Duration,
}

impl HttpPageSource {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build source http client")?;

        Ok(Self {
            http,
            retries: settings.http_retries.max(1),
            backoff: Duration::from_millis(500),
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    // Doubles per attempt, capped at 64x the base delay.
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff * (1u32 << attempt.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS))
    }

    async fn fetch_once(&self, url: &str) -> Result<String, SourceError> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Fetch {
                url: url.to_string(),
                status: e.status().map(|s| s.as_u16()),
                detail: e.to_string(),
            })?;

        let status = res.status();
        if !status.is_success() {
            return Err(SourceError::Fetch {
                url: url.to_string(),
                status: Some(status.as_u16()),
                detail: format!("source HTTP {status}"),
            });
        }

        res.text().await.map_err(|e| SourceError::Fetch {
            url: url.to_string(),
            status: Some(status.as_u16()),
            detail: format!("failed to read response body: {e}"),
        })
    }
}

#[async_trait::async_trait]
impl PageSource for HttpPageSource {
    fn source_name(&self) -> &'static str {
        "worldometers_html"
    }

    async fn fetch_page(&self, url: &str) -> Result<String, SourceError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(err) => {
                    if attempt >= self.retries || !err.is_transient() {
                        return Err(err);
                    }
                    let backoff = self.backoff_for(attempt);
                    tracing::warn!(attempt, %url, ?backoff, error = %err, "source fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
