//! Keyed cache with staleness windows, coalesced fetches and read retries.
//!
//! Reads return a fresh value straight away. A stale value is also
//! returned straight away while one background refresh runs for the key.
//! Only a key that has never held a value makes the caller wait.
//!
//! Writers agree on two counters per entry. `write_epoch` moves on every
//! `set_exact`, `patch` and `evict`; a refresh that started before such a
//! write is discarded when it lands. `invalidate_epoch` moves on every
//! invalidation; a refresh that started before it is stored but stays
//! stale, so only a fetch begun after the invalidation makes the key fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use tokio::sync::{Mutex, broadcast};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use super::{CacheEvent, CacheKey, CachedValue};
use crate::config::CacheConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::model::{Agent, AgentListing, Document, Pagination};

type FetchResult = Result<CachedValue, GatewayError>;
type FetchFuture = Shared<BoxFuture<'static, FetchResult>>;

struct InFlight {
    id: u64,
    future: FetchFuture,
    driver: AbortHandle,
}

struct CacheEntry {
    value: Option<CachedValue>,
    fetched_at: Option<Instant>,
    stale_after: Duration,
    invalidated: bool,
    write_epoch: u64,
    invalidate_epoch: u64,
    in_flight: Option<InFlight>,
}

impl CacheEntry {
    fn new(stale_after: Duration) -> Self {
        Self {
            value: None,
            fetched_at: None,
            stale_after,
            invalidated: false,
            write_epoch: 0,
            invalidate_epoch: 0,
            in_flight: None,
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        if self.invalidated {
            return true;
        }
        match self.fetched_at {
            Some(at) => now.saturating_duration_since(at) >= self.stale_after,
            None => true,
        }
    }

    fn fresh_value(&self, now: Instant) -> Option<&CachedValue> {
        if self.is_stale(now) {
            None
        } else {
            self.value.as_ref()
        }
    }

    fn invalidate(&mut self) {
        self.invalidated = true;
        self.invalidate_epoch += 1;
    }
}

/// Point-in-time view of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub value: Option<CachedValue>,
    pub stale: bool,
    pub fetching: bool,
}

struct StoreInner {
    gateway: Arc<dyn Gateway>,
    config: CacheConfig,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    next_fetch_id: AtomicU64,
    tx: broadcast::Sender<CacheEvent>,
}

/// Shared handle to the cache. Cloning is cheap; all clones see the same
/// entries.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl CacheStore {
    pub fn new(gateway: Arc<dyn Gateway>, config: CacheConfig) -> Self {
        let (tx, _rx) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(StoreInner {
                gateway,
                config,
                entries: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(1),
                tx,
            }),
        }
    }

    /// Subscribe to cache change events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.tx.subscribe()
    }

    /// Cache change events as a stream.
    pub fn events(&self) -> BroadcastStream<CacheEvent> {
        BroadcastStream::new(self.subscribe())
    }

    fn emit(&self, event: CacheEvent) {
        // Ok if nobody is listening.
        let _ = self.inner.tx.send(event);
    }

    fn stale_after(&self, key: &CacheKey) -> Duration {
        match key {
            CacheKey::Documents(_) => self.inner.config.documents_stale_after,
            CacheKey::AgentsList(_) | CacheKey::Agent(_) => self.inner.config.agents_stale_after,
        }
    }

    /// Read a key.
    ///
    /// Fresh: returned as is. Stale: returned as is, with a background
    /// refresh started unless one is already running. Never cached: waits
    /// for the (shared) first fetch.
    pub async fn get(&self, key: &CacheKey) -> FetchResult {
        let (visible, pending) = {
            let mut entries = self.inner.entries.lock().await;
            let stale_after = self.stale_after(key);
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(stale_after));

            if let Some(value) = entry.fresh_value(Instant::now()) {
                debug!(key = %key, "Cache hit");
                return Ok(value.clone());
            }

            let pending = match &entry.in_flight {
                Some(in_flight) => {
                    debug!(key = %key, fetch_id = in_flight.id, "Joining in-flight fetch");
                    in_flight.future.clone()
                }
                None => self.start_fetch(key, entry),
            };
            (entry.value.clone(), pending)
        };

        match visible {
            Some(stale) => Ok(stale),
            None => pending.await,
        }
    }

    /// Force a fetch (or join the running one) and wait for its result.
    pub async fn refresh(&self, key: &CacheKey) -> FetchResult {
        let pending = {
            let mut entries = self.inner.entries.lock().await;
            let stale_after = self.stale_after(key);
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(stale_after));
            match &entry.in_flight {
                Some(in_flight) => in_flight.future.clone(),
                None => self.start_fetch(key, entry),
            }
        };
        pending.await
    }

    /// Wait for the key's running fetch, if any.
    pub async fn settle(&self, key: &CacheKey) -> Option<FetchResult> {
        let pending = {
            let entries = self.inner.entries.lock().await;
            entries
                .get(key)
                .and_then(|e| e.in_flight.as_ref())
                .map(|f| f.future.clone())
        }?;
        Some(pending.await)
    }

    fn start_fetch(&self, key: &CacheKey, entry: &mut CacheEntry) -> FetchFuture {
        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let write_epoch = entry.write_epoch;
        let invalidate_epoch = entry.invalidate_epoch;
        let store = self.clone();
        let fetch_key = key.clone();

        let future = async move {
            let result = store.fetch_with_retry(&fetch_key).await;
            store
                .finish_fetch(&fetch_key, id, write_epoch, invalidate_epoch, result)
                .await
        }
        .boxed()
        .shared();

        // Drive the fetch even if every reader walks away.
        let driver_future = future.clone();
        let driver = tokio::spawn(async move {
            let _ = driver_future.await;
        })
        .abort_handle();

        debug!(key = %key, fetch_id = id, "Fetch started");
        entry.in_flight = Some(InFlight {
            id,
            future: future.clone(),
            driver,
        });
        future
    }

    async fn fetch_once(&self, key: &CacheKey) -> FetchResult {
        let gateway = &self.inner.gateway;
        match key {
            CacheKey::AgentsList(page) => gateway.list_agents(*page).await.map(CachedValue::Agents),
            CacheKey::Agent(id) => gateway.get_agent(id).await.map(CachedValue::Agent),
            CacheKey::Documents(scope) => gateway
                .list_documents(scope.agent_id())
                .await
                .map(CachedValue::Documents),
        }
    }

    /// Retry connectivity and timeout failures with doubling backoff.
    /// Server and contract errors are returned at once.
    async fn fetch_with_retry(&self, key: &CacheKey) -> FetchResult {
        let retries = self.inner.config.refresh_retries;
        let mut attempt: u32 = 0;
        loop {
            match self.fetch_once(key).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < retries => {
                    let delay = self
                        .inner
                        .config
                        .retry_backoff
                        .saturating_mul(1u32 << attempt.min(16));
                    attempt += 1;
                    warn!(key = %key, attempt, error = %err, ?delay, "Fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn finish_fetch(
        &self,
        key: &CacheKey,
        id: u64,
        write_epoch: u64,
        invalidate_epoch: u64,
        result: FetchResult,
    ) -> FetchResult {
        let mut entries = self.inner.entries.lock().await;
        let Some(entry) = entries.get_mut(key) else {
            return result;
        };
        if entry.in_flight.as_ref().is_some_and(|f| f.id == id) {
            entry.in_flight = None;
        }

        match result {
            Ok(value) => {
                if entry.write_epoch != write_epoch {
                    debug!(key = %key, fetch_id = id, "Discarding fetch superseded by a newer write");
                    return Ok(entry.value.clone().unwrap_or(value));
                }
                entry.value = Some(value.clone());
                entry.fetched_at = Some(Instant::now());
                entry.invalidated = entry.invalidate_epoch != invalidate_epoch;
                drop(entries);
                debug!(key = %key, fetch_id = id, "Fetch stored");
                self.emit(CacheEvent::Updated(key.clone()));
                Ok(value)
            }
            Err(error) => {
                warn!(
                    key = %key,
                    fetch_id = id,
                    error = %error,
                    retained = entry.value.is_some(),
                    "Fetch failed"
                );
                drop(entries);
                self.emit(CacheEvent::RefreshFailed {
                    key: key.clone(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Store a value known from a mutation result. The key becomes fresh and
    /// any refresh already running for it is discarded when it lands.
    pub async fn set_exact(&self, key: &CacheKey, value: CachedValue) {
        {
            let mut entries = self.inner.entries.lock().await;
            let stale_after = self.stale_after(key);
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(stale_after));
            entry.value = Some(value);
            entry.fetched_at = Some(Instant::now());
            entry.invalidated = false;
            entry.write_epoch += 1;
        }
        debug!(key = %key, "Value set");
        self.emit(CacheEvent::Updated(key.clone()));
    }

    /// Edit the cached value under `key` in place. Freshness is unchanged.
    /// Returns `false` when nothing is cached.
    pub async fn patch<F>(&self, key: &CacheKey, f: F) -> bool
    where
        F: FnOnce(&mut CachedValue),
    {
        let patched = {
            let mut entries = self.inner.entries.lock().await;
            match entries.get_mut(key) {
                Some(CacheEntry {
                    value: Some(value),
                    write_epoch,
                    ..
                }) => {
                    f(value);
                    *write_epoch += 1;
                    true
                }
                _ => false,
            }
        };
        if patched {
            self.emit(CacheEvent::Updated(key.clone()));
        }
        patched
    }

    /// Edit every cached value whose key matches `pattern`.
    ///
    /// `f` returns whether it changed the value; untouched entries keep
    /// their in-flight refreshes and emit nothing.
    pub async fn patch_matching<F>(&self, pattern: &str, mut f: F) -> usize
    where
        F: FnMut(&CacheKey, &mut CachedValue) -> bool,
    {
        let mut patched = Vec::new();
        {
            let mut entries = self.inner.entries.lock().await;
            for (key, entry) in entries.iter_mut().filter(|(k, _)| k.matches(pattern)) {
                let Some(value) = entry.value.as_mut() else {
                    continue;
                };
                if f(key, value) {
                    entry.write_epoch += 1;
                    patched.push(key.clone());
                }
            }
        }
        let count = patched.len();
        for key in patched {
            self.emit(CacheEvent::Updated(key));
        }
        count
    }

    /// Mark a key stale. Its value stays visible; the next read refreshes.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        let found = {
            let mut entries = self.inner.entries.lock().await;
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.invalidate();
                    true
                }
                None => false,
            }
        };
        if found {
            debug!(key = %key, "Invalidated");
            self.emit(CacheEvent::Invalidated(key.clone()));
        }
        found
    }

    /// Mark every key matching `pattern` stale (see [`CacheKey::matches`]).
    pub async fn invalidate_prefix(&self, pattern: &str) -> usize {
        let keys: Vec<CacheKey> = {
            let mut entries = self.inner.entries.lock().await;
            entries
                .iter_mut()
                .filter(|(key, _)| key.matches(pattern))
                .map(|(key, entry)| {
                    entry.invalidate();
                    key.clone()
                })
                .collect()
        };
        debug!(pattern, count = keys.len(), "Invalidated key family");
        let count = keys.len();
        for key in keys {
            self.emit(CacheEvent::Invalidated(key));
        }
        count
    }

    /// Drop a key's value. A fetch still running for it is detached and its
    /// result discarded; the next read fetches from scratch.
    pub async fn evict(&self, key: &CacheKey) -> bool {
        let found = {
            let mut entries = self.inner.entries.lock().await;
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.value = None;
                    entry.fetched_at = None;
                    if let Some(in_flight) = entry.in_flight.take() {
                        in_flight.driver.abort();
                    }
                    entry.write_epoch += 1;
                    entry.invalidate();
                    true
                }
                None => false,
            }
        };
        if found {
            debug!(key = %key, "Evicted");
            self.emit(CacheEvent::Evicted(key.clone()));
        }
        found
    }

    /// Inspect a key without triggering a fetch.
    pub async fn peek(&self, key: &CacheKey) -> Option<EntrySnapshot> {
        let entries = self.inner.entries.lock().await;
        let now = Instant::now();
        entries.get(key).map(|entry| EntrySnapshot {
            value: entry.value.clone(),
            stale: entry.is_stale(now),
            fetching: entry.in_flight.is_some(),
        })
    }

    /// Abort background fetches and drop every entry.
    pub async fn shutdown(&self) {
        let mut entries = self.inner.entries.lock().await;
        let mut aborted = 0;
        for in_flight in entries.values_mut().filter_map(|e| e.in_flight.take()) {
            in_flight.driver.abort();
            aborted += 1;
        }
        entries.clear();
        info!(aborted, "Cache shut down");
    }

    // ── Typed reads ─────────────────────────────────────────────────

    /// One page of the agent list.
    pub async fn agents(&self, page: Pagination) -> Result<AgentListing, GatewayError> {
        let key = CacheKey::agents_list(page);
        match self.get(&key).await? {
            CachedValue::Agents(listing) => Ok(listing),
            other => Err(mismatch(&key, &other)),
        }
    }

    /// A single agent; `None` when the service does not know it.
    pub async fn agent(&self, id: &str) -> Result<Option<Agent>, GatewayError> {
        let key = CacheKey::agent(id);
        match self.get(&key).await? {
            CachedValue::Agent(agent) => Ok(agent),
            other => Err(mismatch(&key, &other)),
        }
    }

    /// Documents of one agent.
    pub async fn documents(&self, agent_id: &str) -> Result<Vec<Document>, GatewayError> {
        self.documents_for(CacheKey::documents(agent_id)).await
    }

    /// Documents of every agent.
    pub async fn all_documents(&self) -> Result<Vec<Document>, GatewayError> {
        self.documents_for(CacheKey::all_documents()).await
    }

    async fn documents_for(&self, key: CacheKey) -> Result<Vec<Document>, GatewayError> {
        match self.get(&key).await? {
            CachedValue::Documents(documents) => Ok(documents),
            other => Err(mismatch(&key, &other)),
        }
    }

    /// Full agents for a list page. List rows only carry id, count and
    /// creation time, so each row is followed up with a (cached) agent read.
    /// Rows whose agent has vanished are skipped.
    pub async fn agent_details(&self, page: Pagination) -> Result<Vec<Agent>, GatewayError> {
        let listing = self.agents(page).await?;
        let reads = listing.items.iter().map(|item| self.agent(&item.id));
        let mut agents = Vec::with_capacity(listing.items.len());
        for result in join_all(reads).await {
            if let Some(agent) = result? {
                agents.push(agent);
            }
        }
        Ok(agents)
    }
}

fn mismatch(key: &CacheKey, value: &CachedValue) -> GatewayError {
    GatewayError::malformed(format!("cache entry {key} holds unexpected value {value:?}"))
}
