//! `reqwest`-backed fetcher.

use super::{AssetFetcher, FetchError};
use crate::config::IngestConfig;
use crate::validation::validate_url_str;
use async_trait::async_trait;
use reqwest::redirect::{Attempt, Policy};
use reqwest::Client;

const MAX_REDIRECTS: usize = 5;

/// Plain HTTP(S) GET fetcher.
///
/// Every redirect target passes the same URL policy as the original URL.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a client with the configured user agent and timeout.
    pub fn new(config: &IngestConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(Policy::custom(check_redirect));
        if let Some(timeout) = config.fetch_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| FetchError::Transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

fn check_redirect(attempt: Attempt<'_>) -> reqwest::redirect::Action {
    if attempt.previous().len() >= MAX_REDIRECTS {
        return attempt.error("too many redirects");
    }
    if !validate_url_str(attempt.url().as_str()).is_valid() {
        return attempt.error("redirect target is not allowed");
    }
    attempt.follow()
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::Transport(transport_kind(&err)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        if response
            .content_length()
            .is_some_and(|declared| declared > max_bytes)
        {
            return Err(FetchError::TooLarge { limit: max_bytes });
        }

        let capacity = usize::try_from(response.content_length().unwrap_or(0).min(max_bytes))
            .unwrap_or(0);
        let mut body = Vec::with_capacity(capacity);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| FetchError::Transport(transport_kind(&err)))?
        {
            body.extend_from_slice(&chunk);
            if u64::try_from(body.len()).unwrap_or(u64::MAX) > max_bytes {
                return Err(FetchError::TooLarge { limit: max_bytes });
            }
        }
        Ok(body)
    }
}

/// Coarse failure class; `reqwest` messages embed the full URL.
fn transport_kind(err: &reqwest::Error) -> String {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_redirect() {
        "redirect rejected"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_body() || err.is_decode() {
        "body read failed"
    } else {
        "request failed"
    };
    kind.to_string()
}
