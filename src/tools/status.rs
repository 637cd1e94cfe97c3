//! `anycrawl_crawl_status`

use schemars::JsonSchema;
use serde::Deserialize;

use crate::api::{ApiHandle, CrawlApi};
use crate::error::{FieldError, Result};
use crate::protocol::CallToolResult;
use crate::tool::{Tool, ToolBuilder, Validate};

use super::input::check_job_id;
use super::remote_failure;

pub const NAME: &str = "anycrawl_crawl_status";

/// A crawl job to act on
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct JobInput {
    /// Job id returned when the crawl was submitted
    pub job_id: String,
}

impl Validate for JobInput {
    fn validate(&self, errors: &mut Vec<FieldError>) {
        check_job_id(&self.job_id, errors);
    }
}

pub fn tool(api: ApiHandle) -> Result<Tool> {
    ToolBuilder::new(NAME)
        .description("Get the status and progress of a crawl job.")
        .read_only()
        .non_destructive()
        .idempotent()
        .handler(move |input: JobInput| {
            let api = api.clone();
            async move { crawl_status(api.as_ref(), &input.job_id).await }
        })
        .build()
}

pub async fn crawl_status(api: &dyn CrawlApi, job_id: &str) -> Result<CallToolResult> {
    match api.crawl_status(job_id).await {
        Ok(status) => Ok(CallToolResult::json(&serde_json::to_value(status)?)),
        Err(err) => remote_failure(format!("Failed to get status of crawl job {}", job_id), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, CrawlStatus, JobStatus};
    use crate::testing::StubCrawlApi;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn test_status_passes_through_extra_fields() {
        let mut status = CrawlStatus::new(JobStatus::Running);
        status.completed = Some(4);
        status.extra.insert("start_time".into(), json!("2025-01-01T00:00:00Z"));
        let api = StubCrawlApi::new().on_crawl_status(Ok(status));

        let result = crawl_status(&api, "job-1").await.unwrap();
        let body: Value = serde_json::from_str(&result.all_text()).unwrap();
        assert_eq!(body["status"], "running");
        assert_eq!(body["completed"], 4);
        assert_eq!(body["start_time"], "2025-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn test_unknown_job_is_error_result() {
        let api = StubCrawlApi::new().on_crawl_status(Err(ApiError::remote("Job not found")));
        let result = crawl_status(&api, "job-9").await.unwrap();
        assert!(result.is_error);
        assert_eq!(
            result.all_text(),
            "Failed to get status of crawl job job-9: Job not found"
        );
    }
}
