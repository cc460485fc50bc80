use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// Why a page could not be fetched. Every variant is transient: the run keeps
/// what it already has and the next scheduled run tries again.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("page {page} timed out")]
    Timeout { page: u32 },
    #[error("page {page} returned HTTP {status}")]
    Status { page: u32, status: u16 },
    #[error("page {page} transport error: {source}")]
    Transport {
        page: u32,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    fn from_reqwest(page: u32, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout { page }
        } else {
            FetchError::Transport { page, source: e }
        }
    }
}

/// Where listing pages come from. A page with no animal rows is `Ok`.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, page: u32) -> Result<String, FetchError>;
}

/// HTTP client with a browser identity and a hard per-request timeout.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        reqwest::header::HeaderValue::from_static("en-US,en;q=0.5"),
    );

    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .default_headers(headers)
        .build()
        .context("Failed to create HTTP client")
}

pub struct HttpPageSource {
    client: reqwest::Client,
    listing_url: String,
}

impl HttpPageSource {
    pub fn new(listing_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(user_agent, timeout)?,
            listing_url: listing_url.to_string(),
        })
    }

    fn page_url(&self, page: u32) -> String {
        let sep = if self.listing_url.contains('?') { '&' } else { '?' };
        format!("{}{}PAGE={}", self.listing_url, sep, page)
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, page: u32) -> Result<String, FetchError> {
        let url = self.page_url(page);
        debug!(page, %url, "Fetching listing page");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(page, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                page,
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(page, e))
    }
}
