//! Work queue and dispatcher
//!
//! Event-driven scheduling substrate for all reconcilers. Watch events are
//! reduced to object keys and pushed into a deduplicating queue; a fixed
//! pool of workers dequeues keys and runs the reconcile function for each.
//!
//! Scheduling guarantees:
//! - a key pending in the queue is never enqueued twice;
//! - a key is processed by at most one worker at a time: enqueueing a key
//!   that is currently in flight marks it dirty, and it is redelivered once
//!   the current pass completes, so no level trigger is lost;
//! - a reconcile panic is caught at the worker boundary, logged, and the
//!   key requeued with backoff; it never takes down the worker pool.
//!
//! Retry policy is data, not control flow: reconcilers return a
//! [`Requeue`] directive, and error outcomes map to either per-key
//! exponential backoff (transient) or a floor interval (validation).

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::backoff::ExponentialBackoff;
use crate::error::ControllerError;

/// Minimum delay before retrying a transient failure.
pub const BACKOFF_MIN: Duration = Duration::from_secs(1);
/// Maximum delay between retries of a persistently failing key.
pub const BACKOFF_MAX: Duration = Duration::from_secs(300);
/// Validation failures are not retried faster than this.
pub const VALIDATION_RETRY_FLOOR: Duration = Duration::from_secs(30);

/// Resource kinds the dispatcher routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    GatewayClass,
    Gateway,
    HttpRoute,
}

/// Identity of an object to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    /// None for cluster-scoped kinds
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{:?}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{:?}/{}", self.kind, self.name),
        }
    }
}

/// Requeue directive returned by a successful reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Nothing to do; the next watch event re-enqueues the key
    None,
    /// Re-reconcile after the given delay
    After(Duration),
}

/// Reconcile entry point the dispatcher drives.
pub trait Reconcile: Send + Sync + 'static {
    /// One level-triggered pass over the object named by `key`.
    fn reconcile(
        &self,
        key: ObjectKey,
    ) -> impl std::future::Future<Output = Result<Requeue, ControllerError>> + Send;
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    /// Keys currently in the queue
    pending: HashSet<ObjectKey>,
    /// Keys currently being processed by a worker
    active: HashSet<ObjectKey>,
    /// Active keys that were re-enqueued mid-flight
    dirty: HashSet<ObjectKey>,
    shutdown: bool,
}

/// Deduplicating work queue keyed by object identity.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").finish_non_exhaustive()
    }
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        })
    }

    /// Enqueues a key, deduplicating against pending and in-flight keys.
    pub fn add(&self, key: ObjectKey) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.shutdown {
            return;
        }
        if state.active.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.pending.insert(key.clone()) {
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueues a key after `delay` elapses.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Hands out the next key, marking it in flight. Returns None once the
    /// queue is shut down.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = match self.state.lock() {
                    Ok(s) => s,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.pending.remove(&key);
                    state.active.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Wake another idle worker for the remaining items.
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Marks a key's pass complete; a key dirtied mid-flight is redelivered.
    pub fn done(&self, key: &ObjectKey) {
        let redeliver = {
            let mut state = match self.state.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.active.remove(key);
            state.dirty.remove(key)
        };
        if redeliver {
            self.add(key.clone());
        }
    }

    /// Stops the queue; blocked workers drain out with None.
    pub fn shutdown(&self) {
        {
            let mut state = match self.state.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.shutdown = true;
        }
        self.notify.notify_waiters();
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        match self.state.lock() {
            Ok(s) => s.queue.len(),
            Err(poisoned) => poisoned.into_inner().queue.len(),
        }
    }
}

/// Worker pool draining the queue into reconcile calls.
#[derive(Debug)]
pub struct Dispatcher<R> {
    queue: Arc<WorkQueue>,
    reconciler: Arc<R>,
    workers: usize,
    /// Per-key backoff state, reset on a successful pass
    backoffs: Arc<Mutex<HashMap<ObjectKey, ExponentialBackoff>>>,
}

impl<R: Reconcile> Dispatcher<R> {
    pub fn new(queue: Arc<WorkQueue>, reconciler: Arc<R>, workers: usize) -> Self {
        Self {
            queue,
            reconciler,
            workers,
            backoffs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs the worker pool until the queue shuts down.
    pub async fn run(self) {
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let queue = Arc::clone(&self.queue);
            let reconciler = Arc::clone(&self.reconciler);
            let backoffs = Arc::clone(&self.backoffs);
            handles.push(tokio::spawn(async move {
                worker_loop(worker, queue, reconciler, backoffs).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Dispatcher worker task failed: {}", e);
            }
        }
    }
}

async fn worker_loop<R: Reconcile>(
    worker: usize,
    queue: Arc<WorkQueue>,
    reconciler: Arc<R>,
    backoffs: Arc<Mutex<HashMap<ObjectKey, ExponentialBackoff>>>,
) {
    while let Some(key) = queue.next().await {
        debug!("worker {} reconciling {}", worker, key);

        // Isolate the pass in its own task so a panic is contained to this
        // key and surfaces as a JoinError rather than unwinding the pool.
        let outcome = {
            let reconciler = Arc::clone(&reconciler);
            let key = key.clone();
            tokio::spawn(async move { reconciler.reconcile(key).await }).await
        };

        let delay = match outcome {
            Ok(Ok(directive)) => {
                reset_backoff(&backoffs, &key);
                match directive {
                    Requeue::None => None,
                    Requeue::After(d) => Some(d),
                }
            }
            Ok(Err(e)) if e.is_validation() => {
                warn!("Reconcile of {} failed validation: {}", key, e);
                Some(VALIDATION_RETRY_FLOOR)
            }
            Ok(Err(e)) => {
                warn!("Reconcile of {} failed: {}", key, e);
                Some(next_backoff(&backoffs, &key))
            }
            Err(join_err) => {
                error!("Reconcile of {} panicked: {}", key, join_err);
                Some(next_backoff(&backoffs, &key))
            }
        };

        queue.done(&key);
        if let Some(delay) = delay {
            queue.add_after(key, delay);
        }
    }
}

fn next_backoff(
    backoffs: &Mutex<HashMap<ObjectKey, ExponentialBackoff>>,
    key: &ObjectKey,
) -> Duration {
    match backoffs.lock() {
        Ok(mut map) => map
            .entry(key.clone())
            .or_insert_with(|| ExponentialBackoff::new(BACKOFF_MIN, BACKOFF_MAX))
            .next_backoff(),
        Err(e) => {
            warn!("Failed to lock backoff states: {}, using default backoff", e);
            BACKOFF_MIN
        }
    }
}

fn reset_backoff(backoffs: &Mutex<HashMap<ObjectKey, ExponentialBackoff>>, key: &ObjectKey) {
    if let Ok(mut map) = backoffs.lock() {
        map.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(name: &str) -> ObjectKey {
        ObjectKey::namespaced(ResourceKind::Gateway, "default", name)
    }

    #[tokio::test]
    async fn test_add_deduplicates_pending_keys() {
        let queue = WorkQueue::new();

        queue.add(key("gw"));
        queue.add(key("gw"));
        queue.add(key("gw"));

        assert_eq!(queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_are_both_delivered() {
        let queue = WorkQueue::new();

        queue.add(key("gw-0"));
        queue.add(key("gw-1"));

        let first = queue.next().await;
        let second = queue.next().await;
        assert_eq!(first, Some(key("gw-0")));
        assert_eq!(second, Some(key("gw-1")));
    }

    #[tokio::test]
    async fn test_in_flight_key_is_redelivered_after_done() {
        let queue = WorkQueue::new();

        queue.add(key("gw"));
        let taken = queue.next().await;
        assert_eq!(taken, Some(key("gw")));

        // A watch event lands while the key is being processed.
        queue.add(key("gw"));
        assert_eq!(queue.pending_len(), 0);

        queue.done(&key("gw"));
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.next().await, Some(key("gw")));
    }

    #[tokio::test]
    async fn test_done_without_dirty_does_not_redeliver() {
        let queue = WorkQueue::new();

        queue.add(key("gw"));
        let taken = queue.next().await;
        assert!(taken.is_some());
        queue.done(&key("gw"));

        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delivers_after_delay() {
        let queue = WorkQueue::new();

        queue.add_after(key("gw"), Duration::from_secs(30));
        tokio::task::yield_now().await;
        assert_eq!(queue.pending_len(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_next() {
        let queue = WorkQueue::new();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::task::yield_now().await;
        queue.shutdown();

        let delivered = waiter.await.unwrap();
        assert_eq!(delivered, None);
    }

    struct CountingReconciler {
        calls: AtomicUsize,
        panic_on_first: bool,
    }

    impl Reconcile for CountingReconciler {
        async fn reconcile(&self, _key: ObjectKey) -> Result<Requeue, ControllerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_first && call == 0 {
                panic!("boom");
            }
            Ok(Requeue::None)
        }
    }

    #[tokio::test]
    async fn test_dispatcher_drains_queue() {
        let queue = WorkQueue::new();
        let reconciler = Arc::new(CountingReconciler {
            calls: AtomicUsize::new(0),
            panic_on_first: false,
        });

        queue.add(key("gw-0"));
        queue.add(key("gw-1"));

        let dispatcher = Dispatcher::new(Arc::clone(&queue), Arc::clone(&reconciler), 2);
        let run = tokio::spawn(dispatcher.run());

        // Give the workers a chance to drain, then shut down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.shutdown();
        run.await.unwrap();

        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 2);
    }

    struct OneShotRequeuer {
        calls: AtomicUsize,
    }

    impl Reconcile for OneShotRequeuer {
        async fn reconcile(&self, _key: ObjectKey) -> Result<Requeue, ControllerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(Requeue::After(Duration::from_millis(10)))
            } else {
                Ok(Requeue::None)
            }
        }
    }

    #[tokio::test]
    async fn test_requeue_after_directive_redelivers_key() {
        let queue = WorkQueue::new();
        let reconciler = Arc::new(OneShotRequeuer {
            calls: AtomicUsize::new(0),
        });

        queue.add(key("gw"));

        let dispatcher = Dispatcher::new(Arc::clone(&queue), Arc::clone(&reconciler), 1);
        let run = tokio::spawn(dispatcher.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.shutdown();
        run.await.unwrap();

        // First pass requested a delayed requeue; the key came back.
        assert!(reconciler.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_panicking_reconcile_does_not_kill_worker() {
        let queue = WorkQueue::new();
        let reconciler = Arc::new(CountingReconciler {
            calls: AtomicUsize::new(0),
            panic_on_first: true,
        });

        queue.add(key("gw-0"));
        queue.add(key("gw-1"));

        let dispatcher = Dispatcher::new(Arc::clone(&queue), Arc::clone(&reconciler), 1);
        let run = tokio::spawn(dispatcher.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.shutdown();
        run.await.unwrap();

        // The panicking first call did not stop the second key from being
        // processed by the same worker.
        assert!(reconciler.calls.load(Ordering::SeqCst) >= 2);
    }
}
