//! `anycrawl_scrape`: fetch one page

use serde_json::Value;

use crate::api::{ApiHandle, CrawlApi, ScrapeRequest};
use crate::error::{FieldError, Result};
use crate::protocol::CallToolResult;
use crate::tool::{Tool, ToolBuilder, Validate};

use super::input::{check_http_url, check_scrape_options};
use super::remote_failure;

pub const NAME: &str = "anycrawl_scrape";

impl Validate for ScrapeRequest {
    fn validate(&self, errors: &mut Vec<FieldError>) {
        check_http_url("url", &self.url, errors);
        check_scrape_options("", &self.options, errors);
    }
}

pub fn tool(api: ApiHandle) -> Result<Tool> {
    ToolBuilder::new(NAME)
        .description(
            "Scrape a single URL with the chosen engine (playwright, cheerio or puppeteer) \
             and return its content in the requested formats.",
        )
        .non_destructive()
        .handler(move |request: ScrapeRequest| {
            let api = api.clone();
            async move { scrape(api.as_ref(), request).await }
        })
        .build()
}

pub async fn scrape(api: &dyn CrawlApi, request: ScrapeRequest) -> Result<CallToolResult> {
    let subject = format!("Failed to scrape {}", request.url);
    let mut page = match api.scrape(&request).await {
        Ok(page) => page,
        Err(err) => return remote_failure(subject, err),
    };

    // A page the service could not fetch still arrives as data
    if page.get("status").and_then(Value::as_str) == Some("failed") {
        let reason = page
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        tracing::warn!(url = %request.url, reason, "Scrape reported failure");
        return Ok(CallToolResult::error(format!("{}: {}", subject, reason)));
    }

    if let Some(fields) = page.as_object_mut() {
        fields
            .entry("url")
            .or_insert_with(|| Value::String(request.url.clone()));
    }
    Ok(CallToolResult::json(&page))
}
