//! Priority preload queue.
//!
//! Work is keyed by [`CacheKey`]: enqueueing a key that is already queued or in
//! flight hands back a ticket sharing the existing result. A single worker
//! drains the queue in bounded batches, strictly by priority and FIFO within
//! a priority, yielding to the runtime between batches.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use lumen_model::{CacheKey, MediaKind, Priority};
use parking_lot::Mutex;
use priority_queue::PriorityQueue;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::UrlCache;
use crate::error::{CacheError, Result};

pub const MIN_BATCH_SIZE: usize = 3;
pub const MAX_BATCH_SIZE: usize = 15;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Items started per tick; clamped to 3..=15.
    pub batch_size: usize,
    /// Bound for one queued resolution, measured from when it starts.
    pub op_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            op_timeout_ms: 15_000,
        }
    }
}

impl SchedulerConfig {
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

type SharedOutcome = Shared<BoxFuture<'static, Result<Url>>>;

/// Resolves once the preload for its key settles.
#[must_use = "tickets do nothing unless awaited; dropping one does not cancel the preload"]
#[derive(Clone)]
pub struct PreloadTicket {
    key: CacheKey,
    outcome: SharedOutcome,
}

impl PreloadTicket {
    fn ready(key: CacheKey, result: Result<Url>) -> Self {
        let outcome = futures::future::ready(result).boxed().shared();
        // Poll once so `peek` sees the value straight away.
        let _ = outcome.clone().now_or_never();
        Self { key, outcome }
    }

    fn pending(key: CacheKey) -> (Self, oneshot::Sender<Result<Url>>) {
        let (tx, rx) = oneshot::channel();
        let outcome = rx
            .map(|received| received.unwrap_or(Err(CacheError::Cancelled)))
            .boxed()
            .shared();
        (Self { key, outcome }, tx)
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The settled result, if any, without waiting.
    pub fn peek(&self) -> Option<&Result<Url>> {
        self.outcome.peek()
    }
}

impl std::fmt::Debug for PreloadTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadTicket")
            .field("key", &self.key)
            .field("settled", &self.outcome.peek().is_some())
            .finish()
    }
}

impl Future for PreloadTicket {
    type Output = Result<Url>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().outcome.poll_unpin(cx)
    }
}

#[derive(Debug)]
struct PendingItem {
    kind: MediaKind,
    priority: Priority,
    generation: u64,
    ticket: PreloadTicket,
    // Taken when the item starts running.
    settle: Option<oneshot::Sender<Result<Url>>>,
}

// Rank: priority weight first, then enqueue order (earlier wins).
type Rank = (u8, Reverse<u64>);

#[derive(Debug, Default)]
struct QueueState {
    queue: PriorityQueue<CacheKey, Rank>,
    pending: HashMap<CacheKey, PendingItem>,
    next_seq: u64,
    generation: u64,
}

impl QueueState {
    fn cancel_queued(&mut self, key: &CacheKey) -> bool {
        if self.queue.remove(key).is_none() {
            return false;
        }
        if let Some(mut item) = self.pending.remove(key)
            && let Some(tx) = item.settle.take()
        {
            let _ = tx.send(Err(CacheError::Cancelled));
        }
        true
    }
}

/// Outcome counts for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub started: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct PreloadScheduler {
    cache: UrlCache,
    config: Arc<SchedulerConfig>,
    state: Arc<Mutex<QueueState>>,

    // Wake-up signal for the worker on new or upgraded work
    wake: mpsc::UnboundedSender<()>,

    shutdown: CancellationToken,
}

impl std::fmt::Debug for PreloadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadScheduler")
            .field("queued", &self.queue_len())
            .field("generation", &self.generation())
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl PreloadScheduler {
    pub fn new(
        cache: UrlCache,
        config: SchedulerConfig,
    ) -> (Self, SchedulerWorker) {
        Self::with_shutdown(cache, config, CancellationToken::new())
    }

    /// Tie the scheduler's lifetime to an existing token.
    pub fn with_shutdown(
        cache: UrlCache,
        config: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> (Self, SchedulerWorker) {
        let (wake, wake_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            cache,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(QueueState::default())),
            wake,
            shutdown,
        };
        let worker = SchedulerWorker {
            scheduler: scheduler.clone(),
            wake_rx,
        };
        (scheduler, worker)
    }

    pub fn cache(&self) -> &UrlCache {
        &self.cache
    }

    pub fn enqueue(
        &self,
        key: CacheKey,
        kind: MediaKind,
        priority: Priority,
    ) -> PreloadTicket {
        if self.shutdown.is_cancelled() {
            return PreloadTicket::ready(key, Err(CacheError::Cancelled));
        }
        if let Some(entry) = self.cache.get(&key) {
            return PreloadTicket::ready(key, Ok(entry.url));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let generation = state.generation;

        if let Some(item) = state.pending.get_mut(&key) {
            let ticket = item.ticket.clone();
            item.generation = generation;
            let upgraded = priority.max(item.priority);
            let changed = upgraded != item.priority;
            item.priority = upgraded;
            if changed
                && let Some((_, &(_, seq))) = state.queue.get(&key)
            {
                state.queue.change_priority(&key, (upgraded.weight(), seq));
                drop(guard);
                trace!(key = %key, ?upgraded, "upgraded queued preload");
                self.notify();
            }
            return ticket;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let (ticket, settle) = PreloadTicket::pending(key.clone());
        state.pending.insert(
            key.clone(),
            PendingItem {
                kind,
                priority,
                generation,
                ticket: ticket.clone(),
                settle: Some(settle),
            },
        );
        state.queue.push(key, (priority.weight(), Reverse(seq)));
        drop(guard);

        self.notify();
        ticket
    }

    /// Drop a queued item. In-flight work is left to finish.
    pub fn cancel(&self, key: &CacheKey) -> bool {
        let cancelled = self.state.lock().cancel_queued(key);
        if cancelled {
            debug!(key = %key, "cancelled queued preload");
        }
        cancelled
    }

    /// Start a new generation and cancel everything queued under older ones.
    /// Returns the number of cancelled items.
    pub fn advance_generation(&self) -> usize {
        let mut state = self.state.lock();
        state.generation += 1;
        let current = state.generation;
        let stale: Vec<CacheKey> = state
            .pending
            .iter()
            .filter(|(key, item)| {
                item.generation < current && state.queue.get(*key).is_some()
            })
            .map(|(key, _)| key.clone())
            .collect();
        let cancelled = stale
            .iter()
            .filter(|key| state.cancel_queued(key))
            .count();
        drop(state);

        if cancelled > 0 {
            debug!(generation = current, cancelled, "superseded stale preloads");
        }
        cancelled
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn in_flight(&self) -> usize {
        let state = self.state.lock();
        state.pending.len().saturating_sub(state.queue.len())
    }

    pub fn is_queued(&self, key: &CacheKey) -> bool {
        self.state.lock().queue.get(key).is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop the worker and settle all queued work with `Cancelled`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let mut state = self.state.lock();
        let queued: Vec<CacheKey> =
            state.queue.iter().map(|(key, _)| key.clone()).collect();
        let cancelled = queued
            .iter()
            .filter(|key| state.cancel_queued(key))
            .count();
        drop(state);
        info!(cancelled, "preload scheduler shut down");
    }

    /// Take up to one batch off the queue and run it to completion.
    pub async fn process_next_batch(&self) -> BatchReport {
        let batch = self.take_batch();
        if batch.is_empty() {
            return BatchReport::default();
        }

        let started = batch.len();
        let timeout = self.config.op_timeout();
        let runs = batch.into_iter().map(|(key, kind, settle)| {
            let scheduler = self.clone();
            async move {
                let result = tokio::select! {
                    _ = scheduler.shutdown.cancelled() => Err(CacheError::Cancelled),
                    outcome = tokio::time::timeout(
                        timeout,
                        scheduler.cache.resolve(&key, kind),
                    ) => outcome.unwrap_or(Err(CacheError::Timeout)),
                };
                if let Err(err) = &result {
                    debug!(key = %key, error = %err, "preload failed");
                }
                let ok = result.is_ok();
                // Settle before forgetting the key so a racing enqueue that
                // still sees the pending item gets this result.
                let _ = settle.send(result);
                scheduler.state.lock().pending.remove(&key);
                ok
            }
        });

        let outcomes = join_all(runs).await;
        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        let report = BatchReport {
            started,
            succeeded,
            failed: started - succeeded,
        };
        trace!(?report, "preload batch finished");
        report
    }

    fn take_batch(&self) -> Vec<(CacheKey, MediaKind, oneshot::Sender<Result<Url>>)> {
        if self.shutdown.is_cancelled() {
            return Vec::new();
        }
        let limit = self.config.effective_batch_size();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut batch = Vec::with_capacity(limit);
        while batch.len() < limit {
            let Some((key, _)) = state.queue.pop() else {
                break;
            };
            let Some(item) = state.pending.get_mut(&key) else {
                warn!(key = %key, "queued key without pending state");
                continue;
            };
            match item.settle.take() {
                Some(settle) => batch.push((key, item.kind, settle)),
                None => {
                    state.pending.remove(&key);
                }
            }
        }
        batch
    }

    fn notify(&self) {
        if self.wake.send(()).is_err() {
            trace!("preload worker gone; wake-up dropped");
        }
    }
}

/// Drives a [`PreloadScheduler`] until shutdown.
#[derive(Debug)]
pub struct SchedulerWorker {
    scheduler: PreloadScheduler,
    wake_rx: mpsc::UnboundedReceiver<()>,
}

impl SchedulerWorker {
    pub async fn run(mut self) {
        let shutdown = self.scheduler.shutdown.clone();
        loop {
            while !shutdown.is_cancelled() && self.scheduler.queue_len() > 0 {
                self.scheduler.process_next_batch().await;
                tokio::task::yield_now().await;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                wake = self.wake_rx.recv() => {
                    if wake.is_none() {
                        break;
                    }
                    trace!("preload worker woke");
                }
            }
        }
        debug!("preload worker stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lumen_model::{CacheKey, MediaKind, Priority};

    use super::*;
    use crate::cache::{CacheConfig, UrlCache};
    use crate::testing::{CountingResolver, ManualClock, fixed_now};

    fn setup(batch_size: usize) -> (PreloadScheduler, SchedulerWorker, Arc<CountingResolver>) {
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let resolver = Arc::new(CountingResolver::new(clock.clone()));
        let cache = UrlCache::new(resolver.clone(), clock, CacheConfig::default());
        let (scheduler, worker) = PreloadScheduler::new(
            cache,
            SchedulerConfig {
                batch_size,
                ..SchedulerConfig::default()
            },
        );
        (scheduler, worker, resolver)
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::original(name)
    }

    fn paths(keys: Vec<CacheKey>) -> Vec<String> {
        keys.into_iter().map(|k| k.path).collect()
    }

    #[tokio::test]
    async fn batch_runs_in_priority_order() {
        let (scheduler, _worker, resolver) = setup(3);
        let a = scheduler.enqueue(key("a"), MediaKind::Image, Priority::High);
        let b = scheduler.enqueue(key("b"), MediaKind::Image, Priority::Low);
        let c = scheduler.enqueue(key("c"), MediaKind::Image, Priority::Medium);

        let report = scheduler.process_next_batch().await;
        assert_eq!(report.started, 3);
        assert_eq!(paths(resolver.call_log()), vec!["a", "c", "b"]);
        for ticket in [a, b, c] {
            assert!(ticket.await.is_ok());
        }
    }

    #[tokio::test]
    async fn fifo_within_priority_and_batch_is_bounded() {
        let (scheduler, _worker, resolver) = setup(1);
        for name in ["m1", "m2", "m3", "m4"] {
            let _ = scheduler.enqueue(key(name), MediaKind::Image, Priority::Medium);
        }

        // A batch size of 1 is clamped up to 3.
        scheduler.process_next_batch().await;
        assert_eq!(paths(resolver.call_log()), vec!["m1", "m2", "m3"]);
        assert_eq!(scheduler.queue_len(), 1);
        assert!(scheduler.is_queued(&key("m4")));
    }

    #[tokio::test]
    async fn duplicate_enqueue_shares_one_backend_call_and_upgrades() {
        let (scheduler, _worker, resolver) = setup(3);
        let x1 = scheduler.enqueue(key("x"), MediaKind::Image, Priority::Low);
        let _y = scheduler.enqueue(key("y"), MediaKind::Image, Priority::Medium);
        let x2 = scheduler.enqueue(key("x"), MediaKind::Image, Priority::High);
        assert_eq!(scheduler.queue_len(), 2);

        scheduler.process_next_batch().await;
        assert_eq!(paths(resolver.call_log()), vec!["x", "y"]);
        assert_eq!(x1.await.unwrap(), x2.await.unwrap());
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn cached_keys_settle_immediately() {
        let (scheduler, _worker, resolver) = setup(3);
        let url = scheduler
            .cache()
            .resolve(&key("hot"), MediaKind::Image)
            .await
            .unwrap();

        let ticket = scheduler.enqueue(key("hot"), MediaKind::Image, Priority::Low);
        assert_eq!(ticket.peek(), Some(&Ok(url)));
        assert_eq!(scheduler.queue_len(), 0);
        assert_eq!(resolver.calls(), 1);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let (scheduler, _worker, resolver) = setup(3);
        resolver.fail_key(key("bad"));
        let bad = scheduler.enqueue(key("bad"), MediaKind::Image, Priority::High);
        let good = scheduler.enqueue(key("good"), MediaKind::Image, Priority::High);

        let report = scheduler.process_next_batch().await;
        assert_eq!(report, BatchReport { started: 2, succeeded: 1, failed: 1 });
        assert!(matches!(bad.await, Err(CacheError::Resolution(_))));
        assert!(good.await.is_ok());
        // Never retried by the scheduler.
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn cancel_and_generation_settle_queued_tickets() {
        let (scheduler, _worker, resolver) = setup(3);
        let a = scheduler.enqueue(key("a"), MediaKind::Image, Priority::Low);
        let b = scheduler.enqueue(key("b"), MediaKind::Image, Priority::Low);

        assert!(scheduler.cancel(&key("a")));
        assert!(!scheduler.cancel(&key("a")));
        assert_eq!(a.await, Err(CacheError::Cancelled));

        assert_eq!(scheduler.advance_generation(), 1);
        assert_eq!(scheduler.generation(), 1);
        assert_eq!(b.await, Err(CacheError::Cancelled));

        let fresh = scheduler.enqueue(key("c"), MediaKind::Image, Priority::Low);
        assert_eq!(scheduler.advance_generation(), 1);
        assert_eq!(fresh.await, Err(CacheError::Cancelled));
        assert_eq!(resolver.calls(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_queue_and_rejects_new_work() {
        let (scheduler, worker, _resolver) = setup(3);
        let handle = worker.spawn();
        scheduler.shutdown();
        handle.await.unwrap();

        let late = scheduler.enqueue(key("late"), MediaKind::Image, Priority::High);
        assert_eq!(late.await, Err(CacheError::Cancelled));
        assert_eq!(scheduler.process_next_batch().await, BatchReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_resolution_times_out() {
        let (scheduler, _worker, resolver) = setup(3);
        resolver.set_delay(Duration::from_secs(60));
        let ticket = scheduler.enqueue(key("slow"), MediaKind::Video, Priority::High);
        scheduler.process_next_batch().await;
        assert_eq!(ticket.await, Err(CacheError::Timeout));
    }

    #[tokio::test]
    async fn worker_drains_queue_in_background() {
        let (scheduler, worker, resolver) = setup(3);
        let handle = worker.spawn();
        let tickets: Vec<_> = (0..7)
            .map(|i| {
                scheduler.enqueue(key(&format!("item-{i}")), MediaKind::Image, Priority::Medium)
            })
            .collect();
        for ticket in tickets {
            assert!(ticket.await.is_ok());
        }
        assert_eq!(resolver.calls(), 7);
        assert_eq!(scheduler.in_flight(), 0);

        scheduler.shutdown();
        handle.await.unwrap();
    }
}
