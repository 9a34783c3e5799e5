//! Network fetch capability consumed by the ingestion pipeline.
//!
//! # Responsibility
//! - Define the `AssetFetcher` seam so the pipeline never depends on a
//!   concrete HTTP client.
//!
//! # Invariants
//! - A fetch never returns more than `max_bytes` bytes.
//! - Errors carry no response bodies.

use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod http;

pub use http::HttpFetcher;

/// One failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Non-success HTTP status.
    Status(u16),
    /// Body exceeded the caller's byte limit.
    TooLarge { limit: u64 },
    /// Connection, TLS, timeout or redirect-policy failure.
    Transport(String),
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(status) => write!(f, "server responded with status {status}"),
            Self::TooLarge { limit } => write!(f, "response exceeds {limit} bytes"),
            Self::Transport(message) => write!(f, "transport failure: {message}"),
        }
    }
}

impl Error for FetchError {}

/// Fetches the body behind a URL.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Returns the full body of `url`, or `TooLarge` once it passes
    /// `max_bytes`.
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, FetchError>;
}
