// ── Reactive resources ──
//
// A Resource tracks the latest value and status of an async source and
// decides, under overlapping fetches, which completion is applied.

mod state;
mod stream;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::batcher::{BatchSource, KeyBatcher};
use crate::error::FetchError;
use crate::memo::Memoized;
use crate::model::Key;

pub use state::{ResourceState, ResourceStatus, Subscription};
pub use stream::{StateStream, StateWatchStream};
use state::Listeners;

/// Which completions a resource applies when fetches overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// Apply every completion, in completion order.
    TakeEvery,
    /// Apply a completion only if no newer fetch has been issued.
    #[default]
    TakeLast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceOptions {
    pub mode: FetchMode,
}

impl ResourceOptions {
    pub fn take_last() -> Self {
        Self {
            mode: FetchMode::TakeLast,
        }
    }

    pub fn take_every() -> Self {
        Self {
            mode: FetchMode::TakeEvery,
        }
    }
}

/// What happened to one fetch's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The result was written to the resource state.
    Applied { generation: u64 },
    /// A newer fetch was issued first; the result was dropped.
    Discarded { generation: u64, current: u64 },
    /// The resource was disposed; nothing was applied.
    Disposed,
}

type Fetcher<A, T, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<Arc<T>, E>> + Send + Sync>;

/// A state change waiting to reach the callback subscribers.
enum Change<T> {
    Status(ResourceStatus),
    Snapshot(Option<Arc<T>>),
}

/// Changes are queued under the state lock and delivered by one drainer
/// at a time, so callbacks observe them in state order.
struct Outbox<T> {
    queue: VecDeque<Change<T>>,
    draining: bool,
}

struct ResourceInner<A, T, E> {
    fetcher: Fetcher<A, T, E>,
    mode: FetchMode,
    state: Mutex<ResourceState<T, E>>,
    disposed: AtomicBool,
    status_tx: watch::Sender<ResourceStatus>,
    snapshot_tx: watch::Sender<Option<Arc<T>>>,
    status_listeners: Arc<Listeners<ResourceStatus>>,
    snapshot_listeners: Arc<Listeners<Option<Arc<T>>>>,
    outbox: Mutex<Outbox<T>>,
}

/// The latest value and status of an async source.
///
/// Cheaply cloneable; clones observe and drive the same state.
pub struct Resource<A, T, E> {
    inner: Arc<ResourceInner<A, T, E>>,
}

impl<A, T, E> Clone for Resource<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T, E> Resource<A, T, E>
where
    A: Send + 'static,
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an idle resource backed by `fetcher`.
    pub fn new<F, Fut>(fetcher: F, options: ResourceOptions) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::from_shared_fetcher(
            Arc::new(move |args| fetcher(args).map(|r| r.map(Arc::new)).boxed()),
            options,
        )
    }

    fn from_shared_fetcher(fetcher: Fetcher<A, T, E>, options: ResourceOptions) -> Self {
        let (status_tx, _) = watch::channel(ResourceStatus::Idle);
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(ResourceInner {
                fetcher,
                mode: options.mode,
                state: Mutex::new(ResourceState::default()),
                disposed: AtomicBool::new(false),
                status_tx,
                snapshot_tx,
                status_listeners: Listeners::new(),
                snapshot_listeners: Listeners::new(),
                outbox: Mutex::new(Outbox {
                    queue: VecDeque::new(),
                    draining: false,
                }),
            }),
        }
    }

    pub fn mode(&self) -> FetchMode {
        self.inner.mode
    }

    // ── Fetching ─────────────────────────────────────────────────────

    /// Start a fetch.
    ///
    /// The generation bump, the `loading` transition and the fetcher
    /// invocation all happen before this returns, and the completion runs
    /// as a task on the current runtime, so the fetch settles whether or
    /// not the returned future is awaited. The future reports whether the
    /// result was applied; it never fails, since errors go to the
    /// resource's error state.
    ///
    /// Outside a runtime the completion is driven by the returned future
    /// instead, and dropping it leaves the resource loading.
    pub fn fetch(&self, args: A) -> BoxFuture<'static, FetchOutcome> {
        if self.is_disposed() {
            return future::ready(FetchOutcome::Disposed).boxed();
        }

        let generation = {
            let mut state = self.inner.lock();
            state.generation += 1;
            if state.status != ResourceStatus::Loading {
                state.status = ResourceStatus::Loading;
                self.inner.stage(Change::Status(ResourceStatus::Loading));
            }
            state.generation
        };
        trace!(generation, "fetch issued");
        self.inner.deliver();

        let pending = (self.inner.fetcher)(args);
        let inner = Arc::clone(&self.inner);
        let completion = async move {
            let result = pending.await;
            inner.complete(generation, result)
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return completion.boxed();
        };
        let task = handle.spawn(completion);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    warn!(generation, error = %e, "fetch task cancelled");
                    FetchOutcome::Disposed
                }
            }
        }
        .boxed()
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Current value, or `None` before the first success.
    pub fn snapshot(&self) -> Option<Arc<T>> {
        self.inner.lock().value.clone()
    }

    pub fn status(&self) -> ResourceStatus {
        self.inner.lock().status
    }

    pub fn error(&self) -> Option<E> {
        self.inner.lock().error.clone()
    }

    pub fn state(&self) -> ResourceState<T, E> {
        self.inner.lock().clone()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Call `callback` synchronously whenever the value changes.
    pub fn subscribe_snapshot(
        &self,
        callback: impl Fn(&Option<Arc<T>>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.snapshot_listeners.add(Arc::new(callback))
    }

    /// Call `callback` synchronously whenever the status changes.
    pub fn subscribe_status(
        &self,
        callback: impl Fn(&ResourceStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.status_listeners.add(Arc::new(callback))
    }

    pub fn watch_snapshot(&self) -> StateStream<Option<Arc<T>>> {
        StateStream::new(self.inner.snapshot_tx.subscribe())
    }

    pub fn watch_status(&self) -> StateStream<ResourceStatus> {
        StateStream::new(self.inner.status_tx.subscribe())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Detach all subscribers. Later fetches do nothing and completions
    /// still in flight are dropped.
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::SeqCst) {
            self.inner.status_listeners.clear();
            self.inner.snapshot_listeners.clear();
            debug!("resource disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

// ── Composition with the lower layers ───────────────────────────────

impl<A, T, E> Resource<A, T, E>
where
    A: Clone + Eq + std::hash::Hash + serde::Serialize + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// A resource whose fetches go through a memoized call.
    pub fn from_memoized(memo: Memoized<A, T, E>, options: ResourceOptions) -> Self {
        Self::new(
            move |args| {
                let memo = memo.clone();
                async move { memo.call(args).await }
            },
            options,
        )
    }
}

impl<T: Send + Sync + 'static> Resource<Key, T, FetchError> {
    /// A resource that fetches one key at a time through a batcher, so
    /// many resources fetching in the same turn share bulk calls.
    pub fn from_batcher<S>(batcher: KeyBatcher<S>, options: ResourceOptions) -> Self
    where
        S: BatchSource<Entity = T>,
    {
        Self::from_shared_fetcher(
            Arc::new(move |key: Key| batcher.request(key).boxed()),
            options,
        )
    }
}

impl<A, T, E> ResourceInner<A, T, E>
where
    T: Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, ResourceState<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Outbox<T>> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `change` to the watch channels and queue it for callbacks.
    /// Must be called with the state lock held.
    fn stage(&self, change: Change<T>) {
        match &change {
            Change::Status(status) => {
                self.status_tx.send_replace(*status);
            }
            Change::Snapshot(value) => {
                self.snapshot_tx.send_replace(value.clone());
            }
        }
        self.lock_outbox().queue.push_back(change);
    }

    /// Run queued callbacks with no lock held. If another caller is already
    /// draining (another thread, or a callback that re-entered the
    /// resource), that caller delivers our changes too.
    fn deliver(&self) {
        {
            let mut outbox = self.lock_outbox();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        let _reset = DrainGuard(self);

        loop {
            let next = {
                let mut outbox = self.lock_outbox();
                let next = outbox.queue.pop_front();
                if next.is_none() {
                    outbox.draining = false;
                }
                next
            };
            match next {
                Some(Change::Status(status)) => self.status_listeners.notify(&status),
                Some(Change::Snapshot(value)) => self.snapshot_listeners.notify(&value),
                None => break,
            }
        }
    }

    fn complete(&self, generation: u64, result: Result<Arc<T>, E>) -> FetchOutcome {
        if self.disposed.load(Ordering::SeqCst) {
            return FetchOutcome::Disposed;
        }

        let status = {
            let mut state = self.lock();
            if self.mode == FetchMode::TakeLast && generation != state.generation {
                trace!(generation, current = state.generation, "stale result discarded");
                return FetchOutcome::Discarded {
                    generation,
                    current: state.generation,
                };
            }

            let previous = state.status;
            let snapshot = match result {
                Ok(value) => {
                    state.value = Some(Arc::clone(&value));
                    state.error = None;
                    state.status = ResourceStatus::Success;
                    Some(value)
                }
                Err(error) => {
                    state.error = Some(error);
                    state.status = ResourceStatus::Error;
                    None
                }
            };
            if previous != state.status {
                self.stage(Change::Status(state.status));
            }
            if let Some(value) = snapshot {
                self.stage(Change::Snapshot(Some(value)));
            }
            state.status
        };

        trace!(generation, %status, "result applied");
        self.deliver();
        FetchOutcome::Applied { generation }
    }
}

/// Clears the draining flag when a callback panics mid-delivery.
struct DrainGuard<'a, A, T, E>(&'a ResourceInner<A, T, E>)
where
    T: Send + Sync + 'static;

impl<A, T, E> Drop for DrainGuard<'_, A, T, E>
where
    T: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock_outbox().draining = false;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot;

    use super::*;
    use crate::memo::{MemoOptions, memoize};

    type Reply = oneshot::Receiver<Result<u32, String>>;

    /// A resource whose fetches resolve when the test says so.
    fn controlled(options: ResourceOptions) -> Resource<Reply, u32, String> {
        Resource::new(
            |rx: Reply| async move { rx.await.unwrap_or_else(|_| Err("dropped".into())) },
            options,
        )
    }

    fn record_snapshots(resource: &Resource<Reply, u32, String>) -> (Arc<Mutex<Vec<u32>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = resource.subscribe_snapshot(move |value| {
            if let Some(v) = value {
                sink.lock().unwrap().push(**v);
            }
        });
        (seen, sub)
    }

    #[tokio::test]
    async fn starts_idle_and_empty() {
        let resource = controlled(ResourceOptions::default());
        assert_eq!(resource.status(), ResourceStatus::Idle);
        assert!(resource.snapshot().is_none());
        assert_eq!(resource.state().generation, 0);
    }

    #[tokio::test]
    async fn take_last_discards_out_of_order_completion() {
        let resource = controlled(ResourceOptions::take_last());
        let (seen, _sub) = record_snapshots(&resource);

        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        let fetch_a = resource.fetch(rx_a);
        let fetch_b = resource.fetch(rx_b);
        assert_eq!(resource.status(), ResourceStatus::Loading);

        tx_b.send(Ok(2)).unwrap();
        assert_eq!(fetch_b.await, FetchOutcome::Applied { generation: 2 });
        tx_a.send(Ok(1)).unwrap();
        assert_eq!(
            fetch_a.await,
            FetchOutcome::Discarded {
                generation: 1,
                current: 2
            }
        );

        assert_eq!(resource.snapshot().as_deref(), Some(&2));
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn take_every_applies_in_completion_order() {
        let resource = controlled(ResourceOptions::take_every());
        let (seen, _sub) = record_snapshots(&resource);

        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        let fetch_a = resource.fetch(rx_a);
        let fetch_b = resource.fetch(rx_b);

        tx_b.send(Ok(2)).unwrap();
        assert_eq!(fetch_b.await, FetchOutcome::Applied { generation: 2 });
        tx_a.send(Ok(1)).unwrap();
        assert_eq!(fetch_a.await, FetchOutcome::Applied { generation: 1 });

        assert_eq!(*seen.lock().unwrap(), vec![2, 1]);
        assert_eq!(resource.snapshot().as_deref(), Some(&1));
    }

    #[tokio::test]
    async fn stale_error_is_discarded() {
        let resource = controlled(ResourceOptions::take_last());

        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        let fetch_a = resource.fetch(rx_a);
        let fetch_b = resource.fetch(rx_b);

        tx_b.send(Ok(9)).unwrap();
        fetch_b.await;
        tx_a.send(Err("late failure".into())).unwrap();
        fetch_a.await;

        assert_eq!(resource.status(), ResourceStatus::Success);
        assert!(resource.error().is_none());
    }

    #[tokio::test]
    async fn status_transitions_are_reported() {
        let resource = controlled(ResourceOptions::default());
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        let _sub = resource.subscribe_status(move |s| sink.lock().unwrap().push(*s));

        let (tx, rx) = oneshot::channel();
        let pending = resource.fetch(rx);
        tx.send(Ok(1)).unwrap();
        pending.await;

        let (tx, rx) = oneshot::channel();
        let pending = resource.fetch(rx);
        tx.send(Err("offline".into())).unwrap();
        pending.await;

        assert_eq!(
            *statuses.lock().unwrap(),
            vec![
                ResourceStatus::Loading,
                ResourceStatus::Success,
                ResourceStatus::Loading,
                ResourceStatus::Error,
            ]
        );

        let state = resource.state();
        assert_eq!(state.value.as_deref(), Some(&1));
        assert_eq!(state.error.as_deref(), Some("offline"));
        assert_eq!(state.generation, 2);
    }

    #[tokio::test]
    async fn success_clears_previous_error() {
        let resource = controlled(ResourceOptions::default());

        let (tx, rx) = oneshot::channel();
        let pending = resource.fetch(rx);
        tx.send(Err("offline".into())).unwrap();
        pending.await;
        assert_eq!(resource.status(), ResourceStatus::Error);
        assert!(resource.snapshot().is_none());

        let (tx, rx) = oneshot::channel();
        let pending = resource.fetch(rx);
        tx.send(Ok(3)).unwrap();
        pending.await;
        assert!(resource.error().is_none());
        assert_eq!(resource.snapshot().as_deref(), Some(&3));
    }

    #[tokio::test]
    async fn dispose_stops_updates() {
        let resource = controlled(ResourceOptions::default());
        let (seen, _sub) = record_snapshots(&resource);

        let (tx, rx) = oneshot::channel();
        let pending = resource.fetch(rx);
        resource.dispose();
        tx.send(Ok(5)).unwrap();
        assert_eq!(pending.await, FetchOutcome::Disposed);

        let (_tx, rx) = oneshot::channel();
        assert_eq!(resource.fetch(rx).await, FetchOutcome::Disposed);
        assert!(seen.lock().unwrap().is_empty());
        assert!(resource.snapshot().is_none());
    }

    #[tokio::test]
    async fn watch_status_sees_latest() {
        let resource = controlled(ResourceOptions::default());
        let mut status = resource.watch_status();
        assert_eq!(*status.current(), ResourceStatus::Idle);

        let (tx, rx) = oneshot::channel();
        let pending = resource.fetch(rx);
        assert_eq!(status.changed().await, Some(ResourceStatus::Loading));

        tx.send(Ok(1)).unwrap();
        pending.await;
        assert_eq!(status.changed().await, Some(ResourceStatus::Success));
        assert_eq!(resource.watch_snapshot().latest().as_deref(), Some(&1));
    }

    #[tokio::test]
    async fn composes_with_memoized_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let memo = memoize(
            move |n: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, String>(n + 100) }
            },
            MemoOptions::default(),
        );
        let resource = Resource::from_memoized(memo, ResourceOptions::default());

        resource.fetch(1).await;
        resource.fetch(1).await;
        assert_eq!(resource.snapshot().as_deref(), Some(&101));
        assert_eq!(resource.state().generation, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_settles_without_being_awaited() {
        let resource = controlled(ResourceOptions::default());
        let mut status = resource.watch_status();

        let (tx, rx) = oneshot::channel();
        drop(resource.fetch(rx));
        tx.send(Ok(4)).unwrap();

        while resource.status() != ResourceStatus::Success {
            status.changed().await.unwrap();
        }
        assert_eq!(resource.snapshot().as_deref(), Some(&4));
    }

    #[tokio::test]
    async fn callback_may_fetch_again() {
        let resource = controlled(ResourceOptions::default());
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        let again = resource.clone();
        let retry = Arc::new(Mutex::new(None));
        let retry_slot = Arc::clone(&retry);
        let _sub = resource.subscribe_status(move |s| {
            sink.lock().unwrap().push(*s);
            if *s != ResourceStatus::Error {
                return;
            }
            if let Some(rx) = retry_slot.lock().unwrap().take() {
                drop(again.fetch(rx));
            }
        });

        let (tx_retry, rx_retry) = oneshot::channel();
        *retry.lock().unwrap() = Some(rx_retry);
        let (tx, rx) = oneshot::channel();
        let pending = resource.fetch(rx);
        tx.send(Err("offline".into())).unwrap();
        pending.await;

        assert_eq!(resource.status(), ResourceStatus::Loading);
        let mut watch = resource.watch_status();
        tx_retry.send(Ok(8)).unwrap();
        assert_eq!(watch.changed().await, Some(ResourceStatus::Success));
        assert_eq!(
            *statuses.lock().unwrap(),
            vec![
                ResourceStatus::Loading,
                ResourceStatus::Error,
                ResourceStatus::Loading,
                ResourceStatus::Success,
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn observers_agree_under_concurrent_fetches() {
        for _ in 0..50 {
            let resource: Resource<u32, u32, String> = Resource::new(
                |n| async move {
                    tokio::task::yield_now().await;
                    Ok(n)
                },
                ResourceOptions::take_last(),
            );
            let last_status = Arc::new(Mutex::new(ResourceStatus::Idle));
            let sink = Arc::clone(&last_status);
            let _sub = resource.subscribe_status(move |s| *sink.lock().unwrap() = *s);

            let tasks: Vec<_> = (0..32)
                .map(|n| {
                    let resource = resource.clone();
                    tokio::spawn(async move { resource.fetch(n).await })
                })
                .collect();
            for task in tasks {
                task.await.unwrap();
            }

            let status = resource.status();
            assert_eq!(status, ResourceStatus::Success);
            assert_eq!(*last_status.lock().unwrap(), status);
            assert_eq!(*resource.watch_status().current(), status);
        }
    }
}
