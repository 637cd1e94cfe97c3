//! reqwest implementation of [`CrawlApi`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::{
    ApiError, CrawlApi, CrawlJob, CrawlRequest, CrawlResultsPage, CrawlStatus, ScrapeRequest,
    SearchRequest,
};

/// Default AnyCrawl endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.anycrawl.dev";

/// HTTP client for one credential.
///
/// Each session gets its own client so credentials and connection state are
/// never shared between tenants.
#[derive(Debug, Clone)]
pub struct AnyCrawlClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl AnyCrawlClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Transport(format!("invalid base URL {}: {}", base_url, e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("anycrawl-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Transport(format!("invalid endpoint {}: {}", path, e)))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let builder = self.http.request(method, self.endpoint(path)?);
        Ok(match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        })
    }

    /// Send and return the decoded JSON body, after checking `success`.
    async fn send(&self, builder: RequestBuilder) -> Result<Value, ApiError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let body: Value = match serde_json::from_slice(&bytes) {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(ApiError::Decode(e.to_string())),
            Err(_) => {
                let text = String::from_utf8_lossy(&bytes).trim().to_string();
                return Err(remote_error(status, (!text.is_empty()).then_some(text)));
            }
        };

        let success = body.get("success").and_then(Value::as_bool).unwrap_or(true);
        if !status.is_success() || !success {
            return Err(remote_error(status, error_message(&body)));
        }
        Ok(body)
    }

    /// Send and decode the `data` member of the envelope
    async fn send_data<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let mut body = self.send(builder).await?;
        let data = body
            .get_mut("data")
            .map(Value::take)
            .ok_or_else(|| ApiError::Decode("response has no data".to_string()))?;
        serde_json::from_value(data).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn error_message(body: &Value) -> Option<String> {
    ["error", "message"].iter().find_map(|key| match body.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

fn remote_error(status: StatusCode, message: Option<String>) -> ApiError {
    ApiError::Remote {
        status: Some(status.as_u16()),
        message: message.unwrap_or_else(|| {
            format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("error")
            )
        }),
    }
}

#[async_trait]
impl CrawlApi for AnyCrawlClient {
    async fn scrape(&self, request: &ScrapeRequest) -> Result<Value, ApiError> {
        tracing::debug!(url = %request.url, engine = ?request.engine, "POST /v1/scrape");
        self.send_data(self.request(Method::POST, "/v1/scrape")?.json(request))
            .await
    }

    async fn create_crawl(&self, request: &CrawlRequest) -> Result<CrawlJob, ApiError> {
        tracing::debug!(url = %request.url, engine = ?request.engine, "POST /v1/crawl");
        self.send_data(self.request(Method::POST, "/v1/crawl")?.json(request))
            .await
    }

    async fn crawl_status(&self, job_id: &str) -> Result<CrawlStatus, ApiError> {
        let path = format!("/v1/crawl/{}/status", job_id);
        self.send_data(self.request(Method::GET, &path)?).await
    }

    async fn crawl_results(&self, job_id: &str, skip: u64) -> Result<CrawlResultsPage, ApiError> {
        let path = format!("/v1/crawl/{}", job_id);
        let builder = self
            .request(Method::GET, &path)?
            .query(&[("skip", skip)]);
        // Result pages are not wrapped in `data`; the page fields sit at the top level.
        let body = self.send(builder).await?;
        serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn cancel_crawl(&self, job_id: &str) -> Result<Value, ApiError> {
        let path = format!("/v1/crawl/{}", job_id);
        self.send_data(self.request(Method::DELETE, &path)?).await
    }

    async fn search(&self, request: &SearchRequest) -> Result<Value, ApiError> {
        tracing::debug!(query = %request.query, "POST /v1/search");
        self.send_data(self.request(Method::POST, "/v1/search")?.json(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Engine, JobStatus, ScrapeOptions};
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: &str) -> AnyCrawlClient {
        AnyCrawlClient::new(base, Some("secret".into()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn scrape_sends_bearer_and_unwraps_data() {
        let app = Router::new().route(
            "/v1/scrape",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer secret");
                assert!(body.get("formats").is_none());
                Json(json!({
                    "success": true,
                    "data": {"url": body["url"], "status": "completed", "markdown": "# hi"}
                }))
            }),
        );
        let base = serve(app).await;

        let data = client(&base)
            .scrape(&ScrapeRequest {
                url: "https://example.com".into(),
                engine: Engine::Cheerio,
                options: ScrapeOptions::default(),
            })
            .await
            .unwrap();
        assert_eq!(data["markdown"], "# hi");
    }

    #[tokio::test]
    async fn success_false_is_a_remote_failure() {
        let app = Router::new().route(
            "/v1/crawl/{id}/status",
            get(|| async { Json(json!({"success": false, "error": "Job not found"})) }),
        );
        let base = serve(app).await;

        let err = client(&base).crawl_status("missing").await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Remote {
                status: Some(200),
                message: "Job not found".into()
            }
        );
    }

    #[tokio::test]
    async fn http_error_with_json_body_is_remote() {
        let app = Router::new().route(
            "/v1/search",
            post(|| async {
                (
                    StatusCode::PAYMENT_REQUIRED,
                    Json(json!({"success": false, "message": "Insufficient credits"})),
                )
            }),
        );
        let base = serve(app).await;

        let err = client(&base)
            .search(&SearchRequest {
                query: "rust".into(),
                engine: None,
                limit: None,
                offset: None,
                pages: None,
                lang: None,
                country: None,
                safe_search: None,
                scrape_options: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Remote { status: Some(402), ref message } if message == "Insufficient credits"));
    }

    #[tokio::test]
    async fn garbage_body_is_a_decode_error() {
        let app = Router::new().route("/v1/crawl/{id}", get(|| async { "not json" }));
        let base = serve(app).await;

        let err = client(&base).crawl_results("job", 0).await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[tokio::test]
    async fn results_page_reads_top_level_fields() {
        let app = Router::new().route(
            "/v1/crawl/{id}",
            get(
                |Path(id): Path<String>, Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(id, "job-7");
                    assert_eq!(q["skip"], "2");
                    Json(json!({
                        "success": true,
                        "status": "completed",
                        "total": 3,
                        "completed": 3,
                        "creditsUsed": 3,
                        "next": null,
                        "data": [{"url": "c"}]
                    }))
                },
            ),
        );
        let base = serve(app).await;

        let page = client(&base).crawl_results("job-7", 2).await.unwrap();
        assert_eq!(page.status, Some(JobStatus::Completed));
        assert_eq!(page.credits_used, Some(3));
        assert!(!page.has_next());
        assert_eq!(page.data.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        // Port 9 (discard) on localhost is not listening in test environments.
        let err = client("http://127.0.0.1:9")
            .cancel_crawl("job")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }

    #[test]
    fn blank_api_key_is_dropped() {
        let c = AnyCrawlClient::new(DEFAULT_BASE_URL, Some("  ".into()), Duration::from_secs(1))
            .unwrap();
        assert!(c.api_key.is_none());
    }
}
