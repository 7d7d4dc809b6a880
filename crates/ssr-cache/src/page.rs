//! Page caching with single-flight renders.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use ssr_core::{RenderError, RenderResult};
use ssr_observability::SsrMetrics;
use tracing::{debug, warn};

use crate::headers::CacheStatus;
use crate::key::CacheKey;
use crate::policy::PageCachePolicy;

/// Result shared with every waiter of a render.
pub type RenderOutcome = Result<Arc<RenderResult>, CacheError>;

/// Failure of a cached render, cloned to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The render itself failed.
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    /// The render task panicked or was cancelled.
    #[error("render task aborted: {0}")]
    Aborted(String),
}

/// A stored page.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: CacheKey,
    result: Arc<RenderResult>,
    inserted_at: Instant,
}

impl CacheEntry {
    fn new(key: CacheKey, result: Arc<RenderResult>) -> Self {
        Self {
            key,
            result,
            inserted_at: Instant::now(),
        }
    }

    /// Key the entry is stored under.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The stored render.
    pub fn result(&self) -> &Arc<RenderResult> {
        &self.result
    }

    /// When the entry was stored.
    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    /// Time since the entry was stored.
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }
}

/// Awaitable, cloneable handle to one render.
///
/// Every clone resolves to the same outcome.
#[derive(Clone)]
pub struct RenderHandle {
    inner: Shared<BoxFuture<'static, RenderOutcome>>,
}

impl RenderHandle {
    fn new(future: BoxFuture<'static, RenderOutcome>) -> Self {
        Self {
            inner: future.shared(),
        }
    }

    /// Wrap a render that is not tracked by any cache.
    ///
    /// The render runs when the handle (or one of its clones) is polled. A
    /// panic resolves to [`CacheError::Aborted`], as it does for cached
    /// renders.
    pub fn detached<Fut>(render: Fut) -> Self
    where
        Fut: Future<Output = Result<RenderResult, RenderError>> + Send + 'static,
    {
        Self::new(AssertUnwindSafe(render).catch_unwind().map(settle).boxed())
    }

    /// Outcome, if the render already finished.
    pub fn peek(&self) -> Option<&RenderOutcome> {
        self.inner.peek()
    }
}

impl Future for RenderHandle {
    type Output = RenderOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl std::fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHandle")
            .field("finished", &self.peek().is_some())
            .finish()
    }
}

/// Result of a non-awaiting cache lookup.
#[derive(Debug)]
pub enum CacheLookup {
    /// Stored, unexpired page.
    Ready(Arc<RenderResult>),
    /// A render for the key is in flight.
    Pending {
        /// Handle to the shared render.
        handle: RenderHandle,
        /// `Miss` if this lookup started the render, `Hit` if it joined one,
        /// `Bypass` if the cache was not consulted.
        status: CacheStatus,
    },
}

impl CacheLookup {
    /// How the lookup was served.
    pub fn status(&self) -> CacheStatus {
        match self {
            Self::Ready(_) => CacheStatus::Hit,
            Self::Pending { status, .. } => *status,
        }
    }

    /// Wait for the page.
    pub async fn wait(self) -> RenderOutcome {
        match self {
            Self::Ready(result) => Ok(result),
            Self::Pending { handle, .. } => handle.await,
        }
    }
}

/// Map a render that may have panicked to the outcome shared with waiters.
fn settle(
    caught: Result<Result<RenderResult, RenderError>, Box<dyn Any + Send>>,
) -> RenderOutcome {
    match caught {
        Ok(rendered) => rendered.map(Arc::new).map_err(CacheError::from),
        Err(_) => Err(CacheError::Aborted("render panicked".to_string())),
    }
}

enum Slot {
    Ready(CacheEntry),
    InFlight { generation: u64, handle: RenderHandle },
}

struct CacheInner {
    policy: PageCachePolicy,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    next_generation: AtomicU64,
    metrics: Arc<SsrMetrics>,
}

/// Shared store of completed renders with at most one render in flight per
/// key.
///
/// Cloning is cheap; clones share storage. Renders started through
/// [`lookup_or_render`](Self::lookup_or_render) run on their own Tokio task,
/// so they finish and are stored even when every waiter goes away. The
/// storage lock is never held across an await.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<CacheInner>,
}

impl PageCache {
    /// Create a cache.
    pub fn new(policy: PageCachePolicy, metrics: Arc<SsrMetrics>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                policy,
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                metrics,
            }),
        }
    }

    /// The cache policy.
    pub fn policy(&self) -> &PageCachePolicy {
        &self.inner.policy
    }

    /// Metrics the cache records into.
    pub fn metrics(&self) -> &Arc<SsrMetrics> {
        &self.inner.metrics
    }

    /// Look up `key`, starting a render if no usable entry exists.
    ///
    /// `render` is only called on a miss and must only construct the future;
    /// it runs while the storage lock is held. Must be called from within a
    /// Tokio runtime.
    pub fn lookup_or_render<F, Fut>(&self, key: &CacheKey, render: F) -> CacheLookup
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RenderResult, RenderError>> + Send + 'static,
    {
        if !self.inner.policy.enabled {
            return CacheLookup::Pending {
                handle: self.bypass_handle(render),
                status: CacheStatus::Bypass,
            };
        }

        let mut slots = self.inner.lock_slots();

        match slots.get(key) {
            Some(Slot::Ready(entry)) if !self.inner.policy.is_expired(entry.age()) => {
                self.inner.metrics.record_hit();
                debug!(cache_key = %key, "page cache hit");
                return CacheLookup::Ready(Arc::clone(&entry.result));
            }
            Some(Slot::InFlight { handle, .. }) => {
                self.inner.metrics.record_hit();
                debug!(cache_key = %key, "joined in-flight render");
                return CacheLookup::Pending {
                    handle: handle.clone(),
                    status: CacheStatus::Hit,
                };
            }
            _ => {}
        }

        self.inner.metrics.record_miss();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let render_future = render();

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let outcome = settle(AssertUnwindSafe(render_future).catch_unwind().await);
            inner.complete(&task_key, generation, &outcome);
            outcome
        });

        let inner = Arc::clone(&self.inner);
        let join_key = key.clone();
        let handle = RenderHandle::new(
            async move {
                match task.await {
                    Ok(outcome) => outcome,
                    Err(join_error) => {
                        let outcome = Err(CacheError::Aborted(join_error.to_string()));
                        inner.complete(&join_key, generation, &outcome);
                        outcome
                    }
                }
            }
            .boxed(),
        );

        debug!(cache_key = %key, generation, "page cache miss, render started");
        slots.insert(
            key.clone(),
            Slot::InFlight {
                generation,
                handle: handle.clone(),
            },
        );

        CacheLookup::Pending {
            handle,
            status: CacheStatus::Miss,
        }
    }

    /// Return the stored page for `key`, rendering it at most once across
    /// concurrent callers.
    pub async fn get_or_render<F, Fut>(&self, key: &CacheKey, render: F) -> RenderOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RenderResult, RenderError>> + Send + 'static,
    {
        self.lookup_or_render(key, render).wait().await
    }

    /// Render without consulting or filling the cache.
    pub fn bypass_handle<F, Fut>(&self, render: F) -> RenderHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RenderResult, RenderError>> + Send + 'static,
    {
        self.inner.metrics.record_bypass();
        RenderHandle::detached(render())
    }

    /// Render without consulting or filling the cache, and wait for it.
    pub async fn bypass<F, Fut>(&self, render: F) -> RenderOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RenderResult, RenderError>> + Send + 'static,
    {
        self.bypass_handle(render).await
    }

    /// Stored, unexpired page for `key`. Does not record metrics.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<RenderResult>> {
        let slots = self.inner.lock_slots();
        match slots.get(key) {
            Some(Slot::Ready(entry)) if !self.inner.policy.is_expired(entry.age()) => {
                Some(Arc::clone(&entry.result))
            }
            _ => None,
        }
    }

    /// Drop the entry or in-flight render for `key`.
    ///
    /// An in-flight render still resolves for its waiters but is not stored.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.inner.lock_slots().remove(key).is_some();
        if removed {
            debug!(cache_key = %key, "page invalidated");
        }
        removed
    }

    /// Drop every entry and in-flight render built for `path`.
    pub fn invalidate_path(&self, path: &str) -> usize {
        let mut slots = self.inner.lock_slots();
        let before = slots.len();
        slots.retain(|key, _| key.route() != Some(path));
        let removed = before - slots.len();
        debug!(path, removed, "route invalidated");
        removed
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.inner.lock_slots().clear();
        debug!("page cache cleared");
    }

    /// Remove expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut slots = self.inner.lock_slots();
        self.inner.purge_expired(&mut slots)
    }

    /// Number of stored pages, expired or not.
    pub fn len(&self) -> usize {
        self.inner
            .lock_slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Check if no pages are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of renders in flight.
    pub fn in_flight(&self) -> usize {
        self.inner
            .lock_slots()
            .values()
            .filter(|slot| matches!(slot, Slot::InFlight { .. }))
            .count()
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl CacheInner {
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settle the in-flight slot for `key` if it still belongs to
    /// `generation`.
    fn complete(&self, key: &CacheKey, generation: u64, outcome: &RenderOutcome) {
        let mut slots = self.lock_slots();

        let is_current = matches!(
            slots.get(key),
            Some(Slot::InFlight { generation: current, .. }) if *current == generation
        );
        if !is_current {
            debug!(cache_key = %key, generation, "render superseded, result not stored");
            return;
        }

        match outcome {
            Ok(result) if result.degraded && !self.policy.store_degraded => {
                slots.remove(key);
                debug!(cache_key = %key, "degraded render not stored");
            }
            Ok(_) if self.policy.max_entries == 0 => {
                slots.remove(key);
            }
            Ok(result) => {
                slots.remove(key);
                self.make_room(&mut slots);
                slots.insert(
                    key.clone(),
                    Slot::Ready(CacheEntry::new(key.clone(), Arc::clone(result))),
                );
                debug!(cache_key = %key, "page stored");
            }
            Err(err) => {
                slots.remove(key);
                warn!(cache_key = %key, error = %err, "render failed, key cleared");
            }
        }
    }

    fn ready_count(slots: &HashMap<CacheKey, Slot>) -> usize {
        slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    fn purge_expired(&self, slots: &mut HashMap<CacheKey, Slot>) -> usize {
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready(entry) => !self.policy.is_expired(entry.age()),
            Slot::InFlight { .. } => true,
        });
        before - slots.len()
    }

    // Leaves room for one more stored page.
    fn make_room(&self, slots: &mut HashMap<CacheKey, Slot>) {
        if Self::ready_count(slots) < self.policy.max_entries {
            return;
        }

        let purged = self.purge_expired(slots);
        if purged > 0 {
            debug!(purged, "expired pages purged");
        }

        while Self::ready_count(slots) >= self.policy.max_entries {
            let oldest = slots
                .iter()
                .filter_map(|(key, slot)| match slot {
                    Slot::Ready(entry) => Some((key, entry.inserted_at)),
                    Slot::InFlight { .. } => None,
                })
                .min_by_key(|(_, inserted_at)| *inserted_at)
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    slots.remove(&key);
                    debug!(cache_key = %key, "oldest page evicted");
                }
                None => break,
            }
        }
    }
}
