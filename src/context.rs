//! Request context for tool handlers
//!
//! Carries the request id, a cancellation flag that `notifications/cancelled`
//! flips, and the channel a handler uses to push log notifications to the
//! client while it is still working (crawl progress, for example).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, mpsc};

use crate::protocol::{
    JsonRpcNotification, LogLevel, LoggingMessageParams, RequestId, notifications,
};

/// A notification to be sent to the client
#[derive(Debug, Clone)]
pub enum ServerNotification {
    /// Log message notification
    LogMessage(LoggingMessageParams),
}

impl ServerNotification {
    /// Frame as a JSON-RPC notification
    pub fn into_jsonrpc(self) -> JsonRpcNotification {
        match self {
            ServerNotification::LogMessage(params) => {
                let notification = JsonRpcNotification::new(notifications::MESSAGE);
                match serde_json::to_value(params) {
                    Ok(value) => notification.with_params(value),
                    Err(_) => notification,
                }
            }
        }
    }
}

/// Sender for server notifications
pub type NotificationSender = mpsc::Sender<ServerNotification>;

/// Receiver for server notifications
pub type NotificationReceiver = mpsc::Receiver<ServerNotification>;

/// Create a new notification channel
pub fn notification_channel(buffer: usize) -> (NotificationSender, NotificationReceiver) {
    mpsc::channel(buffer)
}

/// Context for one request
#[derive(Clone)]
pub struct RequestContext {
    request_id: RequestId,
    cancelled: Arc<CancelState>,
    notification_tx: Option<NotificationSender>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("cancelled", &self.cancelled.is_set())
            .finish()
    }
}

impl RequestContext {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            cancelled: Arc::new(CancelState::default()),
            notification_tx: None,
        }
    }

    pub fn with_notification_sender(mut self, tx: NotificationSender) -> Self {
        self.notification_tx = Some(tx);
        self
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_set()
    }

    pub fn cancel(&self) {
        self.cancelled.set();
    }

    /// Resolves once the request is cancelled
    pub async fn cancelled(&self) {
        self.cancelled.wait().await
    }

    /// A handle that shares this request's cancellation flag
    pub fn cancellation_token(&self) -> CancellationToken {
        CancellationToken {
            cancelled: self.cancelled.clone(),
        }
    }

    /// Whether anything is listening for pushed notifications
    pub fn can_notify(&self) -> bool {
        self.notification_tx.is_some()
    }

    /// Push a log notification to the client.
    ///
    /// Best effort: a no-op without a channel, and dropped when the channel is full.
    pub fn send_log(&self, params: LoggingMessageParams) {
        let Some(tx) = &self.notification_tx else {
            return;
        };
        if tx.try_send(ServerNotification::LogMessage(params)).is_err() {
            tracing::debug!(request_id = ?self.request_id, "Notification dropped");
        }
    }

    /// Info-level log notification with a `logger` name and JSON payload
    pub fn log_info(&self, logger: &str, data: serde_json::Value) {
        self.send_log(
            LoggingMessageParams::new(LogLevel::Info)
                .with_logger(logger)
                .with_data(data),
        );
    }
}

#[derive(Debug, Default)]
struct CancelState {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelState {
    fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn set(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    async fn wait(&self) {
        loop {
            // Registered before the check so a concurrent `set` is not missed
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// A token that can be used to check for cancellation
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<CancelState>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_set()
    }

    pub fn cancel(&self) {
        self.cancelled.set();
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        self.cancelled.wait().await
    }
}
