//! `anycrawl_crawl`: submit a crawl job and wait for its results
//!
//! After submission the job status is polled every `poll_seconds` until it is
//! terminal, bounded by `timeout_ms` of wall-clock time. The timeout only
//! abandons the wait; the job keeps running on the service. Completed (or
//! cancelled) jobs are then paged through, and every page's records are
//! returned as one list in page order.
//!
//! Each poll is pushed to the client as a `notifications/message` log entry
//! when the transport has a channel for it. Cancelling the request ends the
//! wait at once, even in the middle of a poll interval.

use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::{
    ApiHandle, CrawlApi, CrawlRequest, CrawlStatus, CrawlStrategy, Engine, JobStatus,
    ScrapeOptions,
};
use crate::context::RequestContext;
use crate::error::{Error, FieldError, Result};
use crate::protocol::CallToolResult;
use crate::tool::{Tool, ToolBuilder, Validate};

use super::input::{check_http_url, check_range, check_scrape_options};
use super::remote_failure;

pub const NAME: &str = "anycrawl_crawl";

pub const DEFAULT_POLL_SECONDS: u64 = 3;
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Crawl arguments.
///
/// Per-page options may be given at the top level or inside `scrape_options`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CrawlInput {
    /// Absolute http(s) URL to start from
    pub url: String,
    pub engine: Engine,
    /// Path patterns to skip
    #[serde(default)]
    pub exclude_paths: Option<Vec<String>>,
    /// Only follow paths matching these patterns
    #[serde(default)]
    pub include_paths: Option<Vec<String>>,
    /// Link depth to follow (1-50)
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub strategy: Option<CrawlStrategy>,
    /// Maximum number of pages (1-50000)
    #[serde(default)]
    pub limit: Option<u32>,
    /// Only scrape pages matching these patterns
    #[serde(default)]
    pub scrape_paths: Option<Vec<String>>,
    /// Per-page options; these win over the same fields given at the top level
    #[serde(default)]
    pub scrape_options: Option<ScrapeOptions>,
    #[serde(flatten)]
    pub page_options: ScrapeOptions,
    /// Seconds between status checks (default 3)
    #[serde(default)]
    pub poll_seconds: Option<u64>,
    /// Give up waiting after this many milliseconds (default 60000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Validate for CrawlInput {
    fn validate(&self, errors: &mut Vec<FieldError>) {
        check_http_url("url", &self.url, errors);
        check_range("max_depth", self.max_depth, 1..=50, errors);
        check_range("limit", self.limit, 1..=50_000, errors);
        check_range("poll_seconds", self.poll_seconds, 1..=60, errors);
        check_range("timeout_ms", self.timeout_ms, 1_000..=3_600_000, errors);
        check_scrape_options("", &self.page_options, errors);
        if let Some(nested) = &self.scrape_options {
            check_scrape_options("scrape_options", nested, errors);
        }
    }
}

/// How long to wait for a job, and how often to look
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl CrawlInput {
    /// The request forwarded to the service, and the local wait settings.
    pub fn into_parts(self) -> (CrawlRequest, PollSettings) {
        let poll = PollSettings {
            interval: Duration::from_secs(self.poll_seconds.unwrap_or(DEFAULT_POLL_SECONDS)),
            timeout: Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
        };
        let scrape_options = match (self.scrape_options, self.page_options) {
            (None, top) if top.is_empty() => None,
            (nested, top) => Some(nested.unwrap_or_default().or(top)),
        };
        let request = CrawlRequest {
            url: self.url,
            engine: self.engine,
            exclude_paths: self.exclude_paths,
            include_paths: self.include_paths,
            max_depth: self.max_depth,
            strategy: self.strategy,
            limit: self.limit,
            scrape_paths: self.scrape_paths,
            scrape_options,
        };
        (request, poll)
    }
}

pub fn tool(api: ApiHandle) -> Result<Tool> {
    ToolBuilder::new(NAME)
        .description(
            "Crawl a website starting from a URL, wait for the job to finish and return \
             every scraped page. Progress is reported while waiting.",
        )
        .non_destructive()
        .handler_with_context(move |ctx: RequestContext, input: CrawlInput| {
            let api = api.clone();
            async move { crawl(api.as_ref(), &ctx, input).await }
        })
        .build()
}

pub async fn crawl(
    api: &dyn CrawlApi,
    ctx: &RequestContext,
    input: CrawlInput,
) -> Result<CallToolResult> {
    let (request, poll) = input.into_parts();

    let job = match api.create_crawl(&request).await {
        Ok(job) => job,
        Err(err) => return remote_failure(format!("Failed to start crawl of {}", request.url), err),
    };
    tracing::info!(job_id = %job.job_id, url = %request.url, "Crawl job submitted");
    ctx.log_info(NAME, json!({ "job_id": job.job_id, "status": "submitted" }));

    match wait_and_collect(api, ctx, &job.job_id, poll).await {
        Ok(aggregate) => Ok(CallToolResult::json(&aggregate)),
        Err(Error::Api(err)) => remote_failure(format!("Crawl job {} failed", job.job_id), err),
        Err(err) => Err(err),
    }
}

async fn wait_and_collect(
    api: &dyn CrawlApi,
    ctx: &RequestContext,
    job_id: &str,
    poll: PollSettings,
) -> Result<Value> {
    let status = tokio::time::timeout(poll.timeout, wait_for_terminal(api, ctx, job_id, poll.interval))
        .await
        .map_err(|_| {
            tracing::warn!(job_id, timeout = ?poll.timeout, "Crawl wait timed out");
            Error::CrawlTimeout {
                job_id: job_id.to_string(),
                timeout_ms: poll.timeout.as_millis() as u64,
            }
        })??;

    if status.status == JobStatus::Failed {
        return Err(Error::CrawlFailed {
            job_id: job_id.to_string(),
            reason: status
                .error
                .unwrap_or_else(|| "no reason given".to_string()),
        });
    }

    collect_results(api, job_id, status).await
}

/// Poll until the job reaches a terminal status
async fn wait_for_terminal(
    api: &dyn CrawlApi,
    ctx: &RequestContext,
    job_id: &str,
    interval: Duration,
) -> Result<CrawlStatus> {
    let stopped = || {
        Error::tool(format!(
            "Stopped waiting for crawl job {}: request cancelled",
            job_id
        ))
    };

    loop {
        if ctx.is_cancelled() {
            return Err(stopped());
        }
        let status = api.crawl_status(job_id).await?;
        tracing::debug!(job_id, status = %status.status, completed = ?status.completed, "Crawl status");
        ctx.log_info(
            NAME,
            json!({
                "job_id": job_id,
                "status": status.status,
                "total": status.total,
                "completed": status.completed,
            }),
        );

        if status.status.is_terminal() {
            return Ok(status);
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = ctx.cancelled() => {
                tracing::debug!(job_id, "Crawl wait cancelled");
                return Err(stopped());
            }
        }
    }
}

/// Page through every result page and merge the records in order
async fn collect_results(api: &dyn CrawlApi, job_id: &str, status: CrawlStatus) -> Result<Value> {
    let mut data = Vec::new();
    let mut skip = 0u64;
    let mut total = status.total;
    let mut completed = status.completed;
    let mut credits_used = status.credits_used;

    loop {
        let page = api.crawl_results(job_id, skip).await?;
        let more = page.has_next() && !page.data.is_empty();
        skip += page.data.len() as u64;
        total = page.total.or(total);
        completed = page.completed.or(completed);
        credits_used = page.credits_used.or(credits_used);
        data.extend(page.data);
        if !more {
            break;
        }
    }

    tracing::info!(job_id, records = data.len(), "Crawl results collected");
    Ok(json!({
        "job_id": job_id,
        "status": status.status,
        "total": total,
        "completed": completed,
        "credits_used": credits_used,
        "data": data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, CrawlResultsPage};
    use crate::context::{ServerNotification, notification_channel};
    use crate::protocol::RequestId;
    use crate::testing::{StubCall, StubCrawlApi};
    use crate::tool::parse_input;

    fn input(extra: Value) -> CrawlInput {
        let mut args = json!({"url": "https://example.com", "engine": "cheerio"});
        if let (Some(args), Some(extra)) = (args.as_object_mut(), extra.as_object()) {
            args.extend(extra.clone());
        }
        parse_input(NAME, args).unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::new(RequestId::Number(1))
    }

    fn job() -> crate::api::CrawlJob {
        crate::api::CrawlJob {
            job_id: "job-1".to_string(),
            status: Some("created".to_string()),
            message: None,
        }
    }

    #[test]
    fn test_nested_options_win_over_top_level() {
        let (request, poll) = input(json!({
            "formats": ["html"],
            "wait_for": 100,
            "scrape_options": {"formats": ["markdown"]},
            "poll_seconds": 5,
        }))
        .into_parts();

        let options = request.scrape_options.unwrap();
        assert_eq!(options.formats, Some(vec![crate::api::Format::Markdown]));
        assert_eq!(options.wait_for, Some(100));
        assert_eq!(poll.interval, Duration::from_secs(5));
        assert_eq!(poll.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn test_absent_options_are_not_invented() {
        let (request, _) = input(json!({})).into_parts();
        assert_eq!(request.scrape_options, None);
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire, json!({"url": "https://example.com", "engine": "cheerio"}));
    }

    #[test]
    fn test_local_controls_are_validated() {
        let err = parse_input::<CrawlInput>(
            NAME,
            json!({"url": "https://example.com", "engine": "cheerio", "poll_seconds": 0, "timeout_ms": 10}),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("poll_seconds"));
        assert!(message.contains("timeout_ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_completed_and_concatenates_pages() {
        let api = StubCrawlApi::new()
            .on_create_crawl(Ok(job()))
            .on_crawl_status(Ok(CrawlStatus::new(JobStatus::Pending)))
            .on_crawl_status(Ok(CrawlStatus::new(JobStatus::Pending)))
            .on_crawl_status(Ok(CrawlStatus::new(JobStatus::Completed)))
            .on_crawl_results(Ok(
                CrawlResultsPage::new(vec![json!({"url": "a"}), json!({"url": "b"})]).with_next("p2")
            ))
            .on_crawl_results(Ok(CrawlResultsPage::new(vec![json!({"url": "c"})])));

        let result = crawl(&api, &ctx(), input(json!({}))).await.unwrap();
        assert!(!result.is_error);
        let body: Value = serde_json::from_str(&result.all_text()).unwrap();
        assert_eq!(body["status"], "completed");
        assert_eq!(body["job_id"], "job-1");
        assert_eq!(body["data"], json!([{"url": "a"}, {"url": "b"}, {"url": "c"}]));

        let calls = api.calls();
        let polls = calls
            .iter()
            .filter(|c| matches!(c, StubCall::CrawlStatus(_)))
            .count();
        assert_eq!(polls, 3);
        let skips: Vec<u64> = calls
            .iter()
            .filter_map(|c| match c {
                StubCall::CrawlResults { skip, .. } => Some(*skip),
                _ => None,
            })
            .collect();
        assert_eq!(skips, vec![0, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_an_error_naming_the_job() {
        let mut failed = CrawlStatus::new(JobStatus::Failed);
        failed.error = Some("robots.txt disallows".to_string());
        let api = StubCrawlApi::new()
            .on_create_crawl(Ok(job()))
            .on_crawl_status(Ok(failed));

        let err = crawl(&api, &ctx(), input(json!({}))).await.unwrap_err();
        assert!(matches!(err, Error::CrawlFailed { .. }));
        assert_eq!(err.to_string(), "Crawl job job-1 failed: robots.txt disallows");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_names_the_job() {
        let api = StubCrawlApi::new()
            .on_create_crawl(Ok(job()))
            .on_crawl_status(Ok(CrawlStatus::new(JobStatus::Running)));

        let err = crawl(&api, &ctx(), input(json!({"timeout_ms": 5000})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CrawlTimeout { .. }));
        let message = err.to_string();
        assert!(message.contains("job-1"));
        assert!(message.contains("timed out"));
        assert!(!api.calls().iter().any(|c| matches!(c, StubCall::CancelCrawl(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_page_ends_pagination() {
        let api = StubCrawlApi::new()
            .on_create_crawl(Ok(job()))
            .on_crawl_status(Ok(CrawlStatus::new(JobStatus::Completed)))
            .on_crawl_results(Ok(CrawlResultsPage::new(vec![]).with_next("more")));

        let result = crawl(&api, &ctx(), input(json!({}))).await.unwrap();
        let body: Value = serde_json::from_str(&result.all_text()).unwrap();
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_poll_interval() {
        let api = StubCrawlApi::new()
            .on_create_crawl(Ok(job()))
            .on_crawl_status(Ok(CrawlStatus::new(JobStatus::Running)));
        let ctx = ctx();
        let token = ctx.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = crawl(&api, &ctx, input(json!({"poll_seconds": 60, "timeout_ms": 600_000})))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(err.to_string().contains("request cancelled"));
        let polls = api
            .calls()
            .iter()
            .filter(|c| matches!(c, StubCall::CrawlStatus(_)))
            .count();
        assert_eq!(polls, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_poll_skips_status() {
        let api = StubCrawlApi::new()
            .on_create_crawl(Ok(job()))
            .on_crawl_status(Ok(CrawlStatus::new(JobStatus::Running)));
        let ctx = ctx();
        ctx.cancel();

        let err = crawl(&api, &ctx, input(json!({}))).await.unwrap_err();
        assert!(err.to_string().contains("request cancelled"));
        assert!(!api.calls().iter().any(|c| matches!(c, StubCall::CrawlStatus(_))));
    }

    #[tokio::test]
    async fn test_rejected_submission_is_error_result() {
        let api = StubCrawlApi::new().on_create_crawl(Err(ApiError::remote("limit exceeded")));
        let result = crawl(&api, &ctx(), input(json!({}))).await.unwrap();
        assert!(result.is_error);
        assert_eq!(
            result.all_text(),
            "Failed to start crawl of https://example.com: limit exceeded"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_pushed() {
        let (tx, mut rx) = notification_channel(16);
        let ctx = ctx().with_notification_sender(tx);
        let api = StubCrawlApi::new()
            .on_create_crawl(Ok(job()))
            .on_crawl_status(Ok(CrawlStatus::new(JobStatus::Running)))
            .on_crawl_status(Ok(CrawlStatus::new(JobStatus::Completed)))
            .on_crawl_results(Ok(CrawlResultsPage::new(vec![json!(1)])));

        crawl(&api, &ctx, input(json!({}))).await.unwrap();

        let mut statuses = Vec::new();
        while let Ok(ServerNotification::LogMessage(params)) = rx.try_recv() {
            assert_eq!(params.logger.as_deref(), Some(NAME));
            statuses.push(params.data.unwrap()["status"].clone());
        }
        assert_eq!(statuses, vec![json!("submitted"), json!("running"), json!("completed")]);
    }
}
