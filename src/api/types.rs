//! Request and response bodies of the AnyCrawl API.
//!
//! Every optional field is skipped when absent, so a request carries exactly
//! what the caller supplied and the service applies its own defaults.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Rendering engine used to fetch pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Playwright,
    Cheerio,
    Puppeteer,
}

/// Output format of a scraped page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Format {
    #[serde(rename = "markdown")]
    Markdown,
    #[serde(rename = "html")]
    Html,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "screenshot")]
    Screenshot,
    #[serde(rename = "screenshot@fullPage")]
    ScreenshotFullPage,
    #[serde(rename = "rawHtml")]
    RawHtml,
    #[serde(rename = "json")]
    Json,
}

/// Which representation structured extraction reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExtractSource {
    Markdown,
    Html,
}

/// Which links a crawl follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlStrategy {
    All,
    SameDomain,
    SameHostname,
    SameOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    Google,
}

/// Structured extraction settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JsonOptions {
    /// JSON Schema the extracted object must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    /// Instruction for the extraction model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_description: Option<String>,
}

/// Per-page options, shared by scrape, crawl and search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScrapeOptions {
    /// Output formats to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formats: Option<Vec<Format>>,
    /// Page load timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Extra wait after load in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<u64>,
    /// Only keep elements matching these selectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_tags: Option<Vec<String>>,
    /// Drop elements matching these selectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_tags: Option<Vec<String>>,
    /// Proxy URL to fetch through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_options: Option<JsonOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_source: Option<ExtractSource>,
}

impl ScrapeOptions {
    pub fn is_empty(&self) -> bool {
        self == &ScrapeOptions::default()
    }

    /// Fill every field `self` leaves unset from `fallback`.
    pub fn or(self, fallback: ScrapeOptions) -> ScrapeOptions {
        ScrapeOptions {
            formats: self.formats.or(fallback.formats),
            timeout: self.timeout.or(fallback.timeout),
            wait_for: self.wait_for.or(fallback.wait_for),
            include_tags: self.include_tags.or(fallback.include_tags),
            exclude_tags: self.exclude_tags.or(fallback.exclude_tags),
            proxy: self.proxy.or(fallback.proxy),
            json_options: self.json_options.or(fallback.json_options),
            extract_source: self.extract_source.or(fallback.extract_source),
        }
    }
}

/// `POST /v1/scrape`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScrapeRequest {
    /// Absolute http(s) URL to scrape
    pub url: String,
    pub engine: Engine,
    #[serde(flatten)]
    pub options: ScrapeOptions,
}

/// `POST /v1/crawl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    pub engine: Engine,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<CrawlStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_options: Option<ScrapeOptions>,
}

/// `POST /v1/search`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchRequest {
    /// Search query
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<SearchEngine>,
    /// Maximum number of results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    /// Number of result pages to fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// 0 (off), 1 (moderate) or 2 (strict)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_search: Option<u8>,
    /// Scrape every result page with these options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_options: Option<ScrapeOptions>,
}

/// Status of a crawl job as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// No further transition happens after a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a crawl submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `GET /v1/crawl/{job_id}/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    #[serde(
        default,
        alias = "creditsUsed",
        skip_serializing_if = "Option::is_none"
    )]
    pub credits_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fields this crate does not model, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CrawlStatus {
    pub fn new(status: JobStatus) -> Self {
        Self {
            job_id: None,
            status,
            total: None,
            completed: None,
            failed: None,
            credits_used: None,
            error: None,
            extra: Map::new(),
        }
    }
}

/// `GET /v1/crawl/{job_id}?skip=N`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlResultsPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
    #[serde(
        default,
        alias = "creditsUsed",
        skip_serializing_if = "Option::is_none"
    )]
    pub credits_used: Option<u64>,
    /// Non-null while a further page exists
    #[serde(default)]
    pub next: Option<Value>,
    #[serde(default)]
    pub data: Vec<Value>,
}

impl CrawlResultsPage {
    pub fn new(data: Vec<Value>) -> Self {
        Self {
            status: None,
            total: None,
            completed: None,
            credits_used: None,
            next: None,
            data,
        }
    }

    pub fn with_next(mut self, next: impl Into<Value>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn has_next(&self) -> bool {
        matches!(&self.next, Some(v) if !v.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_options_stay_absent() {
        let req = ScrapeRequest {
            url: "https://example.com".into(),
            engine: Engine::Cheerio,
            options: ScrapeOptions::default(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"url": "https://example.com", "engine": "cheerio"})
        );
    }

    #[test]
    fn format_names_match_wire() {
        let formats: Vec<Format> =
            serde_json::from_value(json!(["screenshot@fullPage", "rawHtml", "markdown"])).unwrap();
        assert_eq!(
            formats,
            vec![Format::ScreenshotFullPage, Format::RawHtml, Format::Markdown]
        );
    }

    #[test]
    fn or_prefers_self() {
        let nested = ScrapeOptions {
            timeout: Some(10),
            ..Default::default()
        };
        let top = ScrapeOptions {
            timeout: Some(99),
            wait_for: Some(5),
            ..Default::default()
        };
        let merged = nested.or(top);
        assert_eq!(merged.timeout, Some(10));
        assert_eq!(merged.wait_for, Some(5));
        assert_eq!(merged.formats, None);
    }

    #[test]
    fn unknown_job_status_is_tolerated() {
        let status: CrawlStatus =
            serde_json::from_value(json!({"status": "queued", "creditsUsed": 3, "start_time": "x"}))
                .unwrap();
        assert_eq!(status.status, JobStatus::Unknown);
        assert!(!status.status.is_terminal());
        assert_eq!(status.credits_used, Some(3));
        assert_eq!(status.extra["start_time"], "x");
    }

    #[test]
    fn null_next_means_last_page() {
        let page: CrawlResultsPage =
            serde_json::from_value(json!({"next": null, "data": [{"url": "a"}]})).unwrap();
        assert!(!page.has_next());
        let page = CrawlResultsPage::new(vec![]).with_next("cursor");
        assert!(page.has_next());
    }
}
