//! `anycrawl_cancel_crawl`

use crate::api::{ApiHandle, CrawlApi};
use crate::error::Result;
use crate::protocol::CallToolResult;
use crate::tool::{Tool, ToolBuilder};

use super::remote_failure;
use super::status::JobInput;

pub const NAME: &str = "anycrawl_cancel_crawl";

pub fn tool(api: ApiHandle) -> Result<Tool> {
    ToolBuilder::new(NAME)
        .description("Cancel a pending or running crawl job.")
        .idempotent()
        .handler(move |input: JobInput| {
            let api = api.clone();
            async move { cancel_crawl(api.as_ref(), &input.job_id).await }
        })
        .build()
}

pub async fn cancel_crawl(api: &dyn CrawlApi, job_id: &str) -> Result<CallToolResult> {
    match api.cancel_crawl(job_id).await {
        Ok(answer) => {
            tracing::info!(job_id, "Crawl job cancelled");
            Ok(CallToolResult::json(&answer))
        }
        Err(err) => remote_failure(format!("Failed to cancel crawl job {}", job_id), err),
    }
}
