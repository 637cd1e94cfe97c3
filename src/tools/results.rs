//! `anycrawl_crawl_results`: one page of a crawl job's records

use schemars::JsonSchema;
use serde::Deserialize;

use crate::api::{ApiHandle, CrawlApi};
use crate::error::{FieldError, Result};
use crate::protocol::CallToolResult;
use crate::tool::{Tool, ToolBuilder, Validate};

use super::input::check_job_id;
use super::remote_failure;

pub const NAME: &str = "anycrawl_crawl_results";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ResultsInput {
    /// Job id returned when the crawl was submitted
    pub job_id: String,
    /// Number of records to skip (default 0)
    #[serde(default)]
    pub skip: Option<u64>,
}

impl Validate for ResultsInput {
    fn validate(&self, errors: &mut Vec<FieldError>) {
        check_job_id(&self.job_id, errors);
    }
}

pub fn tool(api: ApiHandle) -> Result<Tool> {
    ToolBuilder::new(NAME)
        .description(
            "Get one page of results from a crawl job. Use `skip` to page through; \
             a non-null `next` means more pages exist.",
        )
        .read_only()
        .non_destructive()
        .idempotent()
        .handler(move |input: ResultsInput| {
            let api = api.clone();
            async move { crawl_results(api.as_ref(), &input.job_id, input.skip.unwrap_or(0)).await }
        })
        .build()
}

pub async fn crawl_results(api: &dyn CrawlApi, job_id: &str, skip: u64) -> Result<CallToolResult> {
    match api.crawl_results(job_id, skip).await {
        Ok(page) => Ok(CallToolResult::json(&serde_json::to_value(page)?)),
        Err(err) => remote_failure(format!("Failed to get results of crawl job {}", job_id), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, CrawlResultsPage};
    use crate::testing::{StubCall, StubCrawlApi};
    use crate::tool::parse_input;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn test_skip_is_forwarded() {
        let api = StubCrawlApi::new()
            .on_crawl_results(Ok(CrawlResultsPage::new(vec![json!({"url": "x"})]).with_next("n")));
        let result = crawl_results(&api, "job-1", 50).await.unwrap();

        let body: Value = serde_json::from_str(&result.all_text()).unwrap();
        assert_eq!(body["data"][0]["url"], "x");
        assert_eq!(body["next"], "n");
        assert!(matches!(
            &api.calls()[0],
            StubCall::CrawlResults { job_id, skip: 50 } if job_id == "job-1"
        ));
    }

    #[tokio::test]
    async fn test_remote_failure_names_job() {
        let api = StubCrawlApi::new().on_crawl_results(Err(ApiError::remote("expired")));
        let result = crawl_results(&api, "job-2", 0).await.unwrap();
        assert!(result.is_error);
        assert!(result.all_text().contains("job-2"));
    }

    #[test]
    fn test_negative_skip_is_rejected() {
        let err = parse_input::<ResultsInput>(NAME, json!({"job_id": "j", "skip": -1})).unwrap_err();
        assert!(err.to_string().starts_with("Invalid arguments for anycrawl_crawl_results"));
    }
}
