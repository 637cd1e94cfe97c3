//! Session registry for the stateful HTTP bindings
//!
//! Maps `(tenant, token)` to a [`Session`]: one protocol engine, its outbound
//! event channel and its bookkeeping. Tokens are always generated here
//! (UUID v4), never taken from the client, so concurrent `initialize` requests
//! can not race on a key.
//!
//! # Lifecycle
//!
//! ```text
//!  [no entry] --create--> Active --transport closed--> PendingClose
//!  Active --resolve--> Active (activity recorded)
//!  PendingClose --resolve before deadline--> Active (pending removal dropped)
//!  PendingClose --stream open at sweep--> Active
//!  PendingClose --deadline passed--> Expired --sweep or resolve--> [no entry]
//! ```
//!
//! Pending removals are kept apart from the sessions themselves, keyed by
//! `(tenant, token)` with their deadline. Every mutation (create, reactivate,
//! purge) happens under one write lock, and purging an entry that is already
//! gone is a no-op, so a sweep racing a close or a delete never frees a session
//! twice.
//!
//! Transports report closed event streams through a [`CloseGuard`]; the
//! maintenance task started by [`SessionRegistry::start_maintenance`] applies
//! those events and runs the periodic sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, RwLock, broadcast, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use crate::context::notification_channel;
use crate::router::McpRouter;

/// Tenant id used when the deployment is not multi-tenant
pub const DEFAULT_TENANT: &str = "default";

/// Default grace period between transport close and purge: 5 minutes
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Default interval between cleanup sweeps: 30 seconds
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Default maximum number of sessions per registry
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Buffered outbound messages per session; slow stream readers lose the oldest
const OUTBOUND_CAPACITY: usize = 100;

/// Which binding a registry serves. Each kind has its own token namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Streamable HTTP (`/mcp`)
    Streamable,
    /// Legacy SSE (`/sse` + `/messages`)
    LegacySse,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Streamable => "streamable",
            TransportKind::LegacySse => "sse",
        }
    }
}

/// What happens when a session's event stream closes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Purge right away
    Immediate,
    /// Move to PendingClose and purge after the grace period
    Deferred,
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    PendingClose,
    /// Grace period over; removed by the next sweep or lookup
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Session limit of {max} reached")]
    AtCapacity { max: usize },
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub grace_period: Duration,
    pub sweep_interval: Duration,
    pub max_sessions: usize,
    pub close_policy: ClosePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_sessions: DEFAULT_MAX_SESSIONS,
            close_policy: ClosePolicy::Deferred,
        }
    }
}

impl RegistryConfig {
    pub fn close_policy(mut self, policy: ClosePolicy) -> Self {
        self.close_policy = policy;
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }
}

/// One client conversation on a stateful binding
pub struct Session {
    token: String,
    tenant: String,
    router: McpRouter,
    outbound: broadcast::Sender<String>,
    dispatch: Mutex<()>,
    created_at: Instant,
    last_activity: StdMutex<Instant>,
    streams: AtomicUsize,
    forwarder: AbortHandle,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token)
            .field("tenant", &crate::tenant::redact(&self.tenant))
            .field("streams", &self.streams.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Bind `router` to a new session. Notifications the engine pushes are
    /// framed as JSON-RPC and published on the outbound channel.
    fn new(token: String, tenant: String, router: McpRouter) -> Self {
        let (notification_tx, mut notification_rx) = notification_channel(64);
        let router = router.with_notification_sender(notification_tx);
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);

        let publisher = outbound.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = notification_rx.recv().await {
                match serde_json::to_string(&notification.into_jsonrpc()) {
                    // No subscriber means nobody is listening right now
                    Ok(message) => {
                        let _ = publisher.send(message);
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to serialize notification"),
                }
            }
        })
        .abort_handle();

        let now = Instant::now();
        Self {
            token,
            tenant,
            router,
            outbound,
            dispatch: Mutex::new(()),
            created_at: now,
            last_activity: StdMutex::new(now),
            streams: AtomicUsize::new(0),
            forwarder,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// The session's protocol engine
    pub fn router(&self) -> &McpRouter {
        &self.router
    }

    /// Serialize message handling on this session.
    ///
    /// tokio's mutex is fair, so messages are handled in arrival order.
    pub async fn dispatch_lock(&self) -> MutexGuard<'_, ()> {
        self.dispatch.lock().await
    }

    /// Subscribe to messages pushed to the client
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.outbound.subscribe()
    }

    /// Push a serialized JSON-RPC message to every open stream.
    ///
    /// Returns false when no stream is listening.
    pub fn publish(&self, message: String) -> bool {
        self.outbound.send(message).is_ok()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
            .lock()
            .map(|t| *t)
            .unwrap_or(self.created_at)
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    /// Number of open event streams
    pub fn open_streams(&self) -> usize {
        self.streams.load(Ordering::Acquire)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Registry input from transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The last open event stream of a session closed
    TransportClosed { tenant: String, token: String },
}

type PendingKey = (String, String);

#[derive(Default)]
struct RegistryInner {
    partitions: HashMap<String, HashMap<String, Arc<Session>>>,
    pending: HashMap<PendingKey, Instant>,
}

impl RegistryInner {
    fn session(&self, tenant: &str, token: &str) -> Option<&Arc<Session>> {
        self.partitions.get(tenant)?.get(token)
    }

    fn total(&self) -> usize {
        self.partitions.values().map(HashMap::len).sum()
    }

    /// Remove a session and any pending removal; a no-op if already gone
    fn purge(&mut self, tenant: &str, token: &str) -> Option<Arc<Session>> {
        self.pending.remove(&(tenant.to_string(), token.to_string()));
        self.partitions.get_mut(tenant)?.remove(token)
    }
}

/// Sessions of one transport kind, partitioned by tenant
pub struct SessionRegistry {
    kind: TransportKind,
    config: RegistryConfig,
    inner: RwLock<RegistryInner>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    pub fn new(kind: TransportKind, config: RegistryConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            kind,
            config,
            inner: RwLock::new(RegistryInner::default()),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a new Active session for `tenant` around `router`.
    pub async fn create(
        &self,
        tenant: &str,
        router: McpRouter,
    ) -> Result<Arc<Session>, RegistryError> {
        let mut inner = self.inner.write().await;
        let total = inner.total();
        if total >= self.config.max_sessions {
            tracing::warn!(
                kind = self.kind.as_str(),
                max = self.config.max_sessions,
                "Session limit reached, rejecting new session"
            );
            return Err(RegistryError::AtCapacity {
                max: self.config.max_sessions,
            });
        }

        let partition = inner.partitions.entry(tenant.to_string()).or_default();
        let token = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !partition.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Arc::new(Session::new(token.clone(), tenant.to_string(), router));
        partition.insert(token, session.clone());
        self.log_created(&session, total + 1);
        Ok(session)
    }

    fn log_created(&self, session: &Session, total: usize) {
        tracing::info!(
            kind = self.kind.as_str(),
            session_id = %session.token,
            tenant = %crate::tenant::redact(&session.tenant),
            total,
            "Session created"
        );
    }

    /// Register a session under a caller-chosen token
    #[cfg(test)]
    async fn create_with_token(&self, tenant: &str, token: &str, router: McpRouter) -> Arc<Session> {
        let mut inner = self.inner.write().await;
        let session = Arc::new(Session::new(token.to_string(), tenant.to_string(), router));
        inner
            .partitions
            .entry(tenant.to_string())
            .or_default()
            .insert(token.to_string(), session.clone());
        let total = inner.total();
        self.log_created(&session, total);
        session
    }

    /// Look up a session for a request.
    ///
    /// A PendingClose session is reactivated when its deadline has not
    /// passed; past the deadline it is purged and `None` is returned.
    pub async fn resolve(&self, tenant: &str, token: &str) -> Option<Arc<Session>> {
        let key = (tenant.to_string(), token.to_string());
        {
            let inner = self.inner.read().await;
            let session = inner.session(tenant, token)?;
            if !inner.pending.contains_key(&key) {
                session.touch();
                return Some(session.clone());
            }
        }

        // Pending removal: re-check under the write lock
        let mut inner = self.inner.write().await;
        let session = inner.session(tenant, token)?.clone();
        match inner.pending.get(&key).copied() {
            None => {}
            Some(deadline) if Instant::now() < deadline || session.open_streams() > 0 => {
                inner.pending.remove(&key);
                tracing::info!(
                    kind = self.kind.as_str(),
                    session_id = %token,
                    "Session reactivated before its deadline"
                );
            }
            Some(_) => {
                inner.purge(tenant, token);
                tracing::info!(
                    kind = self.kind.as_str(),
                    session_id = %token,
                    "Session expired on access"
                );
                return None;
            }
        }
        session.touch();
        Some(session)
    }

    /// Resolve a token in whichever tenant partition holds it
    pub async fn find_any(&self, token: &str) -> Option<Arc<Session>> {
        let tenant = {
            let inner = self.inner.read().await;
            inner
                .partitions
                .iter()
                .find(|(_, sessions)| sessions.contains_key(token))
                .map(|(tenant, _)| tenant.clone())?
        };
        self.resolve(&tenant, token).await
    }

    /// The session's transport closed: purge now or schedule the purge,
    /// depending on the close policy.
    ///
    /// Close events are applied after the fact, so a client may already have
    /// opened a new stream; a session with an open stream stays Active.
    pub async fn transport_closed(&self, tenant: &str, token: &str) {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.session(tenant, token) else {
            return;
        };
        if session.open_streams() > 0 {
            tracing::debug!(
                kind = self.kind.as_str(),
                session_id = %token,
                "Stream reopened before close was applied, session kept"
            );
            return;
        }

        if self.config.close_policy == ClosePolicy::Immediate {
            inner.purge(tenant, token);
            tracing::info!(
                kind = self.kind.as_str(),
                session_id = %token,
                "Transport closed, session removed"
            );
            return;
        }

        let deadline = Instant::now() + self.config.grace_period;
        inner
            .pending
            .entry((tenant.to_string(), token.to_string()))
            .or_insert(deadline);
        tracing::info!(
            kind = self.kind.as_str(),
            session_id = %token,
            grace_secs = self.config.grace_period.as_secs(),
            "Transport closed, session pending removal"
        );
    }

    /// Tear a session down immediately. Returns whether it existed.
    pub async fn remove(&self, tenant: &str, token: &str) -> bool {
        let removed = self.inner.write().await.purge(tenant, token).is_some();
        if removed {
            tracing::debug!(kind = self.kind.as_str(), session_id = %token, "Session removed");
        }
        removed
    }

    /// Purge every PendingClose session past its deadline.
    ///
    /// Active sessions are never touched, and a pending session that has an
    /// open stream again goes back to Active. Returns the number purged.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let expired: Vec<PendingKey> = inner
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut purged = 0;
        for (tenant, token) in expired {
            if inner
                .session(&tenant, &token)
                .is_some_and(|session| session.open_streams() > 0)
            {
                inner.pending.remove(&(tenant, token));
                continue;
            }
            match inner.purge(&tenant, &token) {
                Some(_) => {
                    purged += 1;
                    tracing::debug!(kind = self.kind.as_str(), session_id = %token, "Purged expired session");
                }
                None => tracing::warn!(
                    kind = self.kind.as_str(),
                    session_id = %token,
                    "Pending removal had no session"
                ),
            }
        }

        if purged > 0 {
            tracing::info!(
                kind = self.kind.as_str(),
                purged,
                remaining = inner.total(),
                "Cleaned up expired sessions"
            );
        }
        purged
    }

    pub async fn status(&self, tenant: &str, token: &str) -> Option<Lifecycle> {
        let inner = self.inner.read().await;
        inner.session(tenant, token)?;
        Some(
            match inner.pending.get(&(tenant.to_string(), token.to_string())) {
                None => Lifecycle::Active,
                Some(deadline) if Instant::now() < *deadline => Lifecycle::PendingClose,
                Some(_) => Lifecycle::Expired,
            },
        )
    }

    /// Number of sessions across all tenants
    pub async fn len(&self) -> usize {
        self.inner.read().await.total()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Track an open event stream on `session`.
    ///
    /// When the last guard of a session drops, a
    /// [`SessionEvent::TransportClosed`] is sent to the maintenance task.
    pub fn close_guard(&self, session: &Arc<Session>) -> CloseGuard {
        session.streams.fetch_add(1, Ordering::AcqRel);
        CloseGuard {
            session: session.clone(),
            events: self.events_tx.clone(),
        }
    }

    /// Apply one transport event
    pub async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::TransportClosed { tenant, token } => {
                self.transport_closed(&tenant, &token).await
            }
        }
    }

    /// Spawn the task that applies transport events and sweeps on the
    /// configured interval. Only the first call receives events.
    pub fn start_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let mut events = self.events_rx.lock().ok().and_then(|mut rx| rx.take());
        if events.is_none() {
            tracing::warn!(
                kind = self.kind.as_str(),
                "Maintenance already started; this task only sweeps"
            );
        }

        let registry = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.config.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        registry.sweep().await;
                    }
                    Some(event) = next_event(&mut events) => {
                        registry.handle_event(event).await;
                    }
                }
            }
            tracing::debug!(kind = registry.kind.as_str(), "Session maintenance stopped");
        });

        MaintenanceHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<SessionEvent>>,
) -> Option<SessionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Held by a transport while a session's event stream is open
pub struct CloseGuard {
    session: Arc<Session>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if self.session.streams.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _ = self.events.send(SessionEvent::TransportClosed {
                tenant: self.session.tenant.clone(),
                token: self.session.token.clone(),
            });
        }
    }
}

/// Owns the maintenance task; dropping it stops the task.
pub struct MaintenanceHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the task and wait for it to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
