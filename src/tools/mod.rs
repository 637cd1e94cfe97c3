//! The AnyCrawl tools
//!
//! Six thin call-throughs to the remote API. Each tool validates its input,
//! forwards exactly the fields the caller supplied, and renders the answer as
//! pretty-printed JSON. Failures the service itself reports come back as
//! `isError` results naming the URL, job id or query involved.

use std::fmt::Display;

use crate::api::{ApiError, ApiHandle};
use crate::catalog::ToolCatalog;
use crate::error::Result;
use crate::protocol::CallToolResult;

pub mod cancel;
pub mod crawl;
pub mod input;
pub mod results;
pub mod scrape;
pub mod search;
pub mod status;

/// Instructions advertised in the `initialize` response
pub const INSTRUCTIONS: &str = "Tools for the AnyCrawl API. Use anycrawl_scrape for a single page, \
anycrawl_crawl to crawl a site and wait for the results, anycrawl_crawl_status, \
anycrawl_crawl_results and anycrawl_cancel_crawl to manage crawl jobs, and anycrawl_search \
to search the web.";

/// Every AnyCrawl tool, bound to `api`
pub fn catalog(api: ApiHandle) -> Result<ToolCatalog> {
    Ok(ToolCatalog::new()
        .tool(scrape::tool(api.clone())?)
        .tool(crawl::tool(api.clone())?)
        .tool(status::tool(api.clone())?)
        .tool(results::tool(api.clone())?)
        .tool(cancel::tool(api.clone())?)
        .tool(search::tool(api)?))
}

/// Remote-reported failures become an `isError` result prefixed with
/// `subject`; every other failure propagates.
pub(crate) fn remote_failure(subject: impl Display, err: ApiError) -> Result<CallToolResult> {
    match err {
        err @ ApiError::Remote { .. } => {
            tracing::warn!(error = %err, "{}", subject);
            Ok(CallToolResult::error(format!("{}: {}", subject, err)))
        }
        err => Err(err.into()),
    }
}
