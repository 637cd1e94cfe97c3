//! Test utilities.
//!
//! - [`StubCrawlApi`] stands in for the AnyCrawl service: answers are
//!   scripted per operation and every call is recorded.
//! - [`TestClient`] drives an [`McpRouter`] through JSON-RPC framing without a
//!   transport.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use anycrawl_mcp::testing::{StubCrawlApi, TestClient};
//! use anycrawl_mcp::{McpRouter, tools};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let api = StubCrawlApi::new().on_scrape(Ok(json!({"status": "completed", "markdown": "# hi"})));
//! let router = McpRouter::new(tools::catalog(Arc::new(api)).unwrap());
//!
//! let mut client = TestClient::from_router(router);
//! client.initialize().await;
//!
//! let page = client
//!     .call_tool_json("anycrawl_scrape", json!({"url": "https://example.com", "engine": "cheerio"}))
//!     .await;
//! assert_eq!(page["url"], "https://example.com");
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{
    ApiError, CrawlApi, CrawlJob, CrawlRequest, CrawlResultsPage, CrawlStatus, ScrapeRequest,
    SearchRequest,
};
use crate::context::{NotificationReceiver, ServerNotification, notification_channel};
use crate::jsonrpc::JsonRpcService;
use crate::protocol::{CallToolResult, JsonRpcRequest, JsonRpcResponse, McpNotification};
use crate::router::McpRouter;

/// A call received by [`StubCrawlApi`]
#[derive(Debug, Clone, PartialEq)]
pub enum StubCall {
    Scrape(ScrapeRequest),
    CreateCrawl(CrawlRequest),
    CrawlStatus(String),
    CrawlResults { job_id: String, skip: u64 },
    CancelCrawl(String),
    Search(SearchRequest),
}

/// Scripted answers for one operation.
///
/// Answers are handed out in order; the last one repeats once the others are
/// used up, so a job can be left "running" forever.
struct Script<T> {
    operation: &'static str,
    answers: VecDeque<Result<T, ApiError>>,
}

impl<T: Clone> Script<T> {
    fn new(operation: &'static str) -> Self {
        Self {
            operation,
            answers: VecDeque::new(),
        }
    }

    fn next(&mut self) -> Result<T, ApiError> {
        if self.answers.len() > 1
            && let Some(answer) = self.answers.pop_front()
        {
            return answer;
        }
        match self.answers.front() {
            Some(answer) => answer.clone(),
            None => Err(ApiError::Transport(format!(
                "no scripted answer for {}",
                self.operation
            ))),
        }
    }
}

struct StubState {
    scrape: Script<Value>,
    create_crawl: Script<CrawlJob>,
    crawl_status: Script<CrawlStatus>,
    crawl_results: Script<CrawlResultsPage>,
    cancel_crawl: Script<Value>,
    search: Script<Value>,
    calls: Vec<StubCall>,
}

/// In-memory [`CrawlApi`] with scripted answers.
///
/// An operation without a scripted answer fails with
/// [`ApiError::Transport`].
pub struct StubCrawlApi {
    state: Mutex<StubState>,
}

impl Default for StubCrawlApi {
    fn default() -> Self {
        Self::new()
    }
}

impl StubCrawlApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState {
                scrape: Script::new("scrape"),
                create_crawl: Script::new("create_crawl"),
                crawl_status: Script::new("crawl_status"),
                crawl_results: Script::new("crawl_results"),
                cancel_crawl: Script::new("cancel_crawl"),
                search: Script::new("search"),
                calls: Vec::new(),
            }),
        }
    }

    fn script(self, f: impl FnOnce(&mut StubState)) -> Self {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
        self
    }

    pub fn on_scrape(self, answer: Result<Value, ApiError>) -> Self {
        self.script(|s| s.scrape.answers.push_back(answer))
    }

    pub fn on_create_crawl(self, answer: Result<CrawlJob, ApiError>) -> Self {
        self.script(|s| s.create_crawl.answers.push_back(answer))
    }

    pub fn on_crawl_status(self, answer: Result<CrawlStatus, ApiError>) -> Self {
        self.script(|s| s.crawl_status.answers.push_back(answer))
    }

    pub fn on_crawl_results(self, answer: Result<CrawlResultsPage, ApiError>) -> Self {
        self.script(|s| s.crawl_results.answers.push_back(answer))
    }

    pub fn on_cancel_crawl(self, answer: Result<Value, ApiError>) -> Self {
        self.script(|s| s.cancel_crawl.answers.push_back(answer))
    }

    pub fn on_search(self, answer: Result<Value, ApiError>) -> Self {
        self.script(|s| s.search.answers.push_back(answer))
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<StubCall> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    fn answer<T>(
        &self,
        call: StubCall,
        pick: impl FnOnce(&mut StubState) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ApiError::Transport("stub state poisoned".to_string()))?;
        state.calls.push(call);
        pick(&mut state)
    }
}

#[async_trait]
impl CrawlApi for StubCrawlApi {
    async fn scrape(&self, request: &ScrapeRequest) -> Result<Value, ApiError> {
        self.answer(StubCall::Scrape(request.clone()), |s| s.scrape.next())
    }

    async fn create_crawl(&self, request: &CrawlRequest) -> Result<CrawlJob, ApiError> {
        self.answer(StubCall::CreateCrawl(request.clone()), |s| {
            s.create_crawl.next()
        })
    }

    async fn crawl_status(&self, job_id: &str) -> Result<CrawlStatus, ApiError> {
        self.answer(StubCall::CrawlStatus(job_id.to_string()), |s| {
            s.crawl_status.next()
        })
    }

    async fn crawl_results(&self, job_id: &str, skip: u64) -> Result<CrawlResultsPage, ApiError> {
        let call = StubCall::CrawlResults {
            job_id: job_id.to_string(),
            skip,
        };
        self.answer(call, |s| s.crawl_results.next())
    }

    async fn cancel_crawl(&self, job_id: &str) -> Result<Value, ApiError> {
        self.answer(StubCall::CancelCrawl(job_id.to_string()), |s| {
            s.cancel_crawl.next()
        })
    }

    async fn search(&self, request: &SearchRequest) -> Result<Value, ApiError> {
        self.answer(StubCall::Search(request.clone()), |s| s.search.next())
    }
}

/// An ergonomic test client for an [`McpRouter`].
///
/// Methods that expect success panic on JSON-RPC errors, which is
/// appropriate for test code.
pub struct TestClient {
    service: JsonRpcService<McpRouter>,
    router: McpRouter,
    notification_rx: NotificationReceiver,
    next_id: i64,
}

impl TestClient {
    /// Wrap `router`, with a notification channel the client can drain.
    pub fn from_router(router: McpRouter) -> Self {
        let (tx, rx) = notification_channel(256);
        let router = router.with_notification_sender(tx);
        let service = JsonRpcService::new(router.clone());
        Self {
            service,
            router,
            notification_rx: rx,
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Send `initialize` followed by `notifications/initialized`.
    ///
    /// Returns the raw initialize result.
    pub async fn initialize(&mut self) -> Value {
        let result = self
            .send_request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": crate::protocol::LATEST_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "test-client", "version": "1.0.0" }
                })),
            )
            .await;
        self.router
            .handle_notification(McpNotification::Initialized);
        result
    }

    /// The tools array of `tools/list`
    pub async fn list_tools(&mut self) -> Vec<Value> {
        let result = self.send_request("tools/list", None).await;
        result
            .get("tools")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    }

    /// Call a tool; panics on JSON-RPC errors but not on `isError` results.
    pub async fn call_tool(&mut self, name: &str, args: Value) -> CallToolResult {
        let raw = self
            .send_request(
                "tools/call",
                Some(serde_json::json!({ "name": name, "arguments": args })),
            )
            .await;
        serde_json::from_value(raw).expect("failed to deserialize CallToolResult")
    }

    /// Call a tool and parse its text as JSON; panics if the tool failed.
    pub async fn call_tool_json(&mut self, name: &str, args: Value) -> Value {
        let result = self.call_tool(name, args).await;
        assert!(
            !result.is_error,
            "tool '{}' returned an error: {}",
            name,
            result.all_text()
        );
        serde_json::from_str(&result.all_text()).expect("tool result is not JSON")
    }

    /// Send an arbitrary request and expect success.
    pub async fn send_request(&mut self, method: &str, params: Option<Value>) -> Value {
        match self.send(method, params).await {
            JsonRpcResponse::Result(r) => r.result,
            JsonRpcResponse::Error(e) => panic!(
                "expected request '{}' to succeed, but got error: {} (code {})",
                method, e.error.message, e.error.code
            ),
        }
    }

    /// Send an arbitrary request and expect a JSON-RPC error, returned as JSON.
    pub async fn send_request_expect_error(&mut self, method: &str, params: Option<Value>) -> Value {
        match self.send(method, params).await {
            JsonRpcResponse::Error(e) => {
                serde_json::to_value(&e.error).expect("failed to serialize error")
            }
            JsonRpcResponse::Result(r) => panic!(
                "expected request '{}' to fail, but it succeeded: {:?}",
                method, r.result
            ),
        }
    }

    async fn send(&mut self, method: &str, params: Option<Value>) -> JsonRpcResponse {
        let mut req = JsonRpcRequest::new(self.next_id(), method);
        if let Some(p) = params {
            req = req.with_params(p);
        }
        self.service
            .call_single(req)
            .await
            .expect("transport error")
    }

    /// Every notification pushed since the last drain
    pub fn drain_notifications(&mut self) -> Vec<ServerNotification> {
        let mut notifications = Vec::new();
        while let Ok(n) = self.notification_rx.try_recv() {
            notifications.push(n);
        }
        notifications
    }
}
