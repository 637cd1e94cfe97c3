//! `anycrawl_search`

use crate::api::{ApiHandle, CrawlApi, SearchRequest};
use crate::error::{FieldError, Result};
use crate::protocol::CallToolResult;
use crate::tool::{Tool, ToolBuilder, Validate};

use super::input::{check_not_blank, check_range, check_scrape_options};
use super::remote_failure;

pub const NAME: &str = "anycrawl_search";

impl Validate for SearchRequest {
    fn validate(&self, errors: &mut Vec<FieldError>) {
        check_not_blank("query", &self.query, errors);
        check_range("limit", self.limit, 1..=100, errors);
        check_range("pages", self.pages, 1..=20, errors);
        check_range("safe_search", self.safe_search, 0..=2, errors);
        if let Some(options) = &self.scrape_options {
            check_scrape_options("scrape_options", options, errors);
        }
    }
}

pub fn tool(api: ApiHandle) -> Result<Tool> {
    ToolBuilder::new(NAME)
        .description(
            "Search the web and return ranked results, optionally scraping each result page.",
        )
        .read_only()
        .non_destructive()
        .handler(move |request: SearchRequest| {
            let api = api.clone();
            async move { search(api.as_ref(), request).await }
        })
        .build()
}

pub async fn search(api: &dyn CrawlApi, request: SearchRequest) -> Result<CallToolResult> {
    match api.search(&request).await {
        Ok(results) => Ok(CallToolResult::json(&results)),
        Err(err) => remote_failure(format!("Search for '{}' failed", request.query), err),
    }
}
