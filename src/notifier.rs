//! User-visible lifecycle of long-running actions.
//!
//! Every tracked operation shows its loading message at once, switches to
//! its slow message if it is still unresolved after the kind's threshold,
//! and resolves exactly once: succeeded, failed or cancelled. Calls that
//! arrive after the terminal transition are ignored.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::NotifierConfig;
use crate::error::{GatewayError, NotifierError};

static NEXT_OPERATION: AtomicU64 = AtomicU64::new(1);

/// What an operation does; selects its slow threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateAgent,
    UpdateAgent,
    DeleteAgent,
    UploadDocument,
    DeleteDocument,
    Other,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CreateAgent => "create_agent",
            Self::UpdateAgent => "update_agent",
            Self::DeleteAgent => "delete_agent",
            Self::UploadDocument => "upload_document",
            Self::DeleteDocument => "delete_document",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle phase of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    /// Running; loading message shown.
    Pending,
    /// Running past the slow threshold; slow message shown.
    Slow,
    /// Resolved successfully.
    Succeeded,
    /// Resolved with an error.
    Failed,
    /// Observer went away; message dismissed.
    Cancelled,
}

impl OperationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for OperationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Slow => "slow",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Identifier of one logical action.
///
/// Build it with [`OperationId::unique`] when the natural label (a
/// filename, an agent id) could repeat while an earlier operation with
/// the same label is still running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// `label` namespaced with a process-wide counter.
    pub fn unique(label: impl AsRef<str>) -> Self {
        let n = NEXT_OPERATION.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}#{n}", label.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Texts shown while an operation runs and when it succeeds.
/// Failure text always comes from the error itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationMessages {
    pub loading: String,
    pub slow: String,
    pub success: String,
}

impl OperationMessages {
    pub fn new(
        loading: impl Into<String>,
        slow: impl Into<String>,
        success: impl Into<String>,
    ) -> Self {
        Self {
            loading: loading.into(),
            slow: slow.into(),
            success: success.into(),
        }
    }
}

/// A visible change of an operation's presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub phase: OperationPhase,
    /// `None` when the message is dismissed (cancellation).
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_hint: Option<String>,
}

/// Current state of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSnapshot {
    pub kind: OperationKind,
    pub phase: OperationPhase,
    pub message: Option<String>,
    pub action_hint: Option<String>,
    pub elapsed: Duration,
}

struct Operation {
    /// Distinguishes reuses of the same identifier.
    generation: u64,
    kind: OperationKind,
    phase: OperationPhase,
    messages: OperationMessages,
    message: Option<String>,
    action_hint: Option<String>,
    started_at: Instant,
    resolved_at: Option<Instant>,
    slow_timer: Option<JoinHandle<()>>,
}

impl Operation {
    fn resolve(&mut self, phase: OperationPhase, message: Option<String>, hint: Option<String>) {
        if let Some(timer) = self.slow_timer.take() {
            timer.abort();
        }
        self.phase = phase;
        self.message = message;
        self.action_hint = hint;
        self.resolved_at = Some(Instant::now());
    }

    fn notification(&self, id: &OperationId) -> Notification {
        Notification {
            operation_id: id.clone(),
            kind: self.kind,
            phase: self.phase,
            message: self.message.clone(),
            action_hint: self.action_hint.clone(),
        }
    }
}

struct NotifierInner {
    config: NotifierConfig,
    operations: Mutex<HashMap<OperationId, Operation>>,
    next_generation: AtomicU64,
    tx: broadcast::Sender<Notification>,
}

/// Shared handle tracking operations and broadcasting their notifications.
#[derive(Clone)]
pub struct OperationNotifier {
    inner: Arc<NotifierInner>,
}

impl OperationNotifier {
    pub fn new(config: NotifierConfig) -> Self {
        let (tx, _rx) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(NotifierInner {
                config,
                operations: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                tx,
            }),
        }
    }

    /// Subscribe to notifications. Each view calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.tx.subscribe()
    }

    fn emit(&self, notification: Notification) {
        // Ok if no view is listening.
        let _ = self.inner.tx.send(notification);
    }

    /// Begin tracking `id`. Shows the loading message and arms the slow
    /// timer. Fails if `id` is still in a non-terminal phase.
    pub async fn start(
        &self,
        id: OperationId,
        kind: OperationKind,
        messages: OperationMessages,
    ) -> Result<(), NotifierError> {
        let mut operations = self.inner.operations.lock().await;
        if operations.get(&id).is_some_and(|op| !op.phase.is_terminal()) {
            warn!(operation_id = %id, "Operation identifier reused while active");
            return Err(NotifierError::OperationActive { id: id.to_string() });
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let threshold = self.inner.config.threshold_for(kind);
        let timer = {
            let notifier = self.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(threshold).await;
                notifier.escalate(&id, generation).await;
            })
        };

        let operation = Operation {
            generation,
            kind,
            phase: OperationPhase::Pending,
            message: Some(messages.loading.clone()),
            messages,
            action_hint: None,
            started_at: Instant::now(),
            resolved_at: None,
            slow_timer: Some(timer),
        };
        let notification = operation.notification(&id);
        operations.insert(id.clone(), operation);
        let pruned = prune(
            &mut operations,
            self.inner.config.retain_resolved,
            self.inner.config.max_resolved,
        );
        drop(operations);

        if pruned > 0 {
            debug!(pruned, "Dropped resolved operations");
        }

        debug!(operation_id = %id, kind = %kind, ?threshold, "Operation started");
        self.emit(notification);
        Ok(())
    }

    /// Slow-threshold timer body.
    async fn escalate(&self, id: &OperationId, generation: u64) {
        let mut operations = self.inner.operations.lock().await;
        let Some(op) = operations.get_mut(id) else {
            return;
        };
        if op.generation != generation || op.phase != OperationPhase::Pending {
            return;
        }
        op.phase = OperationPhase::Slow;
        op.message = Some(op.messages.slow.clone());
        op.slow_timer = None;
        let notification = op.notification(id);
        drop(operations);

        info!(operation_id = %id, "Operation is slow");
        self.emit(notification);
    }

    async fn resolve<F>(&self, id: &OperationId, phase: OperationPhase, outcome: F) -> bool
    where
        F: FnOnce(&OperationMessages) -> (Option<String>, Option<String>),
    {
        let mut operations = self.inner.operations.lock().await;
        let Some(op) = operations.get_mut(id) else {
            debug!(operation_id = %id, "Resolving unknown operation ignored");
            return false;
        };
        if op.phase.is_terminal() {
            debug!(operation_id = %id, phase = %op.phase, "Operation already resolved");
            return false;
        }
        let (message, hint) = outcome(&op.messages);
        op.resolve(phase, message, hint);
        let notification = op.notification(id);
        let elapsed = op.started_at.elapsed();
        drop(operations);

        info!(operation_id = %id, phase = %phase, ?elapsed, "Operation resolved");
        self.emit(notification);
        true
    }

    /// Resolve successfully, with the configured success message unless
    /// `message` overrides it. Returns `false` if already resolved.
    pub async fn complete(&self, id: &OperationId, message: Option<String>) -> bool {
        self.resolve(id, OperationPhase::Succeeded, |messages| {
            (Some(message.unwrap_or_else(|| messages.success.clone())), None)
        })
        .await
    }

    /// Resolve with an error; text and hint come from the error taxonomy.
    /// Returns `false` if already resolved.
    pub async fn error(&self, id: &OperationId, err: &GatewayError) -> bool {
        self.resolve(id, OperationPhase::Failed, |_| {
            (Some(err.user_message()), err.action_hint())
        })
        .await
    }

    /// Stop observing: clear the timer and dismiss the message. The
    /// underlying call keeps running; its late result is ignored.
    pub async fn cancel(&self, id: &OperationId) -> bool {
        self.resolve(id, OperationPhase::Cancelled, |_| (None, None))
            .await
    }

    /// Run `call` as a tracked operation and resolve it with the outcome.
    ///
    /// If `id` collides with an active operation the call still runs, just
    /// untracked.
    pub async fn track<T, Fut>(
        &self,
        id: OperationId,
        kind: OperationKind,
        messages: OperationMessages,
        call: Fut,
    ) -> Result<T, GatewayError>
    where
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let tracked = match self.start(id.clone(), kind, messages).await {
            Ok(()) => true,
            Err(e) => {
                warn!(operation_id = %id, error = %e, "Running operation untracked");
                false
            }
        };

        let result = call.await;
        if tracked {
            match &result {
                Ok(_) => {
                    self.complete(&id, None).await;
                }
                Err(err) => {
                    self.error(&id, err).await;
                }
            }
        }
        result
    }

    pub async fn snapshot(&self, id: &OperationId) -> Option<OperationSnapshot> {
        let operations = self.inner.operations.lock().await;
        operations.get(id).map(|op| OperationSnapshot {
            kind: op.kind,
            phase: op.phase,
            message: op.message.clone(),
            action_hint: op.action_hint.clone(),
            elapsed: op
                .resolved_at
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(op.started_at),
        })
    }

    /// Identifiers of operations still pending or slow.
    pub async fn active(&self) -> Vec<OperationId> {
        let operations = self.inner.operations.lock().await;
        operations
            .iter()
            .filter(|(_, op)| !op.phase.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of operations still held, active or resolved.
    pub async fn len(&self) -> usize {
        self.inner.operations.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Forget operations resolved more than `older_than` ago.
    ///
    /// `start` already does this with the configured retention; call it
    /// directly to drop history sooner.
    pub async fn prune_resolved(&self, older_than: Duration) -> usize {
        let mut operations = self.inner.operations.lock().await;
        prune(&mut operations, older_than, usize::MAX)
    }

    /// Cancel every active operation.
    pub async fn shutdown(&self) {
        let mut cancelled = 0;
        for id in self.active().await {
            if self.cancel(&id).await {
                cancelled += 1;
            }
        }
        info!(cancelled, "Notifier shut down");
    }
}

/// Drop resolved operations older than `older_than`, then the oldest
/// resolved ones beyond `max_resolved`. Active operations are never touched.
fn prune(
    operations: &mut HashMap<OperationId, Operation>,
    older_than: Duration,
    max_resolved: usize,
) -> usize {
    let before = operations.len();
    operations.retain(|_, op| op.resolved_at.is_none_or(|at| at.elapsed() < older_than));

    let mut resolved: Vec<(Instant, u64, OperationId)> = operations
        .iter()
        .filter_map(|(id, op)| op.resolved_at.map(|at| (at, op.generation, id.clone())))
        .collect();
    if resolved.len() > max_resolved {
        resolved.sort_unstable_by_key(|(at, generation, _)| (*at, *generation));
        let excess = resolved.len() - max_resolved;
        for (_, _, id) in resolved.into_iter().take(excess) {
            operations.remove(&id);
        }
    }
    before - operations.len()
}
