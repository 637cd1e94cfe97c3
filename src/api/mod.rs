//! AnyCrawl remote API
//!
//! The scraping, crawling and searching itself happens on the AnyCrawl
//! service. This module defines the seam the tools call through
//! ([`CrawlApi`]), the wire types shared by the tools and the service, and the
//! reqwest-backed [`AnyCrawlClient`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub mod client;
pub mod types;

pub use client::{AnyCrawlClient, DEFAULT_BASE_URL};
pub use types::*;

/// Failure talking to the remote API
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// The service answered with a well-formed failure
    #[error("{message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    /// The request never produced an answer (connect, TLS, timeout)
    #[error("Request to AnyCrawl failed: {0}")]
    Transport(String),

    /// The answer could not be decoded
    #[error("Unexpected response from AnyCrawl: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn remote(message: impl Into<String>) -> Self {
        ApiError::Remote {
            status: None,
            message: message.into(),
        }
    }
}

/// The six remote operations the tools are built on.
#[async_trait]
pub trait CrawlApi: Send + Sync {
    /// Scrape one URL; returns the page record
    async fn scrape(&self, request: &ScrapeRequest) -> Result<Value, ApiError>;

    /// Submit a crawl job
    async fn create_crawl(&self, request: &CrawlRequest) -> Result<CrawlJob, ApiError>;

    async fn crawl_status(&self, job_id: &str) -> Result<CrawlStatus, ApiError>;

    /// One page of crawl results starting at record `skip`
    async fn crawl_results(&self, job_id: &str, skip: u64) -> Result<CrawlResultsPage, ApiError>;

    async fn cancel_crawl(&self, job_id: &str) -> Result<Value, ApiError>;

    async fn search(&self, request: &SearchRequest) -> Result<Value, ApiError>;
}

/// Shared handle to a remote API implementation
pub type ApiHandle = Arc<dyn CrawlApi>;
