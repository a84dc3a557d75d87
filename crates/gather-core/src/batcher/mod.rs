// ── Request coalescing ──
//
// A KeyBatcher collects single-key requests issued in one coalescing
// window and dispatches them as bounded bulk calls, routing a per-key
// outcome back to every caller.

mod source;
mod window;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::config::{BatcherConfig, FlushPolicy};
use crate::error::FetchError;
use crate::model::Key;

pub use source::{BatchSource, HttpSource};
pub use window::KeyResult;
use window::{Slot, Window};

/// What to withdraw from an open window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidate {
    Key(Key),
    All,
}

/// Outcome of one `KeyBatcher::request`, resolved when its chunk completes.
///
/// Owns no borrow of the batcher, so it can be moved into spawned tasks.
#[must_use = "the key stays in the window, but its outcome is discarded unless awaited"]
pub struct Pending<T> {
    rx: oneshot::Receiver<KeyResult<T>>,
}

impl<T> Future for Pending<T> {
    type Output = KeyResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(FetchError::Cancelled)))
    }
}

/// Coalesces single-key lookups against one logical endpoint.
///
/// Cheaply cloneable; clones share the same window. Requests register
/// synchronously, so every `request()` made before the flush point lands
/// in the same window regardless of when its future is first polled.
///
/// The zero-delay flush point is the end of the current scheduler turn,
/// which is well defined on a current-thread runtime. On a multi-thread
/// runtime separate `request()` calls may straddle a flush; use
/// `request_many` to keep a group of keys in one window.
pub struct KeyBatcher<S: BatchSource> {
    inner: Arc<BatcherInner<S>>,
}

struct BatcherInner<S: BatchSource> {
    source: S,
    config: BatcherConfig,
    label: String,
    window: Mutex<Window<S::Entity>>,
}

impl<S: BatchSource> Clone for KeyBatcher<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: BatchSource> KeyBatcher<S> {
    pub fn new(source: S, config: BatcherConfig) -> Self {
        let label = source.label();
        Self {
            inner: Arc::new(BatcherInner {
                source,
                config,
                label,
                window: Mutex::new(Window::new()),
            }),
        }
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    /// Number of distinct keys waiting in the open window.
    pub fn pending_len(&self) -> usize {
        self.lock_window().len()
    }

    /// Request one entity.
    ///
    /// The key joins the open window immediately; the returned future
    /// resolves once the chunk carrying it completes. Malformed keys and
    /// keys the source cannot serve resolve with a validation error
    /// without entering the window.
    pub fn request(&self, key: impl Into<Key>) -> Pending<S::Entity> {
        let key = key.into();
        let (tx, rx) = oneshot::channel();

        match self.check(&key) {
            Ok(()) => self.enqueue(vec![(key, tx)]),
            Err(e) => {
                debug!(endpoint = %self.inner.label, %key, error = %e, "rejected key");
                let _ = tx.send(Err(e));
            }
        }

        Pending { rx }
    }

    /// Request several keys at once, in request order.
    ///
    /// All accepted keys are registered under one lock, so they land in
    /// the same window even when a flush task runs on another worker.
    pub fn request_many<I, K>(&self, keys: I) -> Vec<Pending<S::Entity>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let mut accepted = Vec::new();
        let pending = keys
            .into_iter()
            .map(|key| {
                let key = key.into();
                let (tx, rx) = oneshot::channel();
                match self.check(&key) {
                    Ok(()) => accepted.push((key, tx)),
                    Err(e) => {
                        debug!(endpoint = %self.inner.label, %key, error = %e, "rejected key");
                        let _ = tx.send(Err(e));
                    }
                }
                Pending { rx }
            })
            .collect();

        if !accepted.is_empty() {
            self.enqueue(accepted);
        }
        pending
    }

    /// Request several keys in the same window and wait for all of them,
    /// returning outcomes in request order.
    pub async fn request_all<I, K>(&self, keys: I) -> Vec<KeyResult<S::Entity>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        join_all(self.request_many(keys)).await
    }

    /// Dispatch the open window now and wait until all of its chunks have
    /// settled. A window with no keys is a no-op.
    pub async fn flush(&self) {
        let slots = self.lock_window().take();
        if slots.is_empty() {
            return;
        }
        self.dispatch(slots).await;
    }

    /// Withdraw keys that have not been dispatched yet. Their callers
    /// resolve with `FetchError::Invalidated`; keys already in flight are
    /// unaffected.
    pub fn invalidate(&self, target: &Invalidate) {
        let withdrawn: Vec<Slot<S::Entity>> = {
            let mut window = self.lock_window();
            match target {
                Invalidate::Key(key) => window.withdraw(key).into_iter().collect(),
                Invalidate::All => window.take(),
            }
        };

        if !withdrawn.is_empty() {
            debug!(endpoint = %self.inner.label, count = withdrawn.len(), "invalidated pending keys");
        }
        for slot in withdrawn {
            let err = FetchError::Invalidated {
                key: slot.key.to_string(),
            };
            slot.resolve(&Err(err));
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock_window(&self) -> MutexGuard<'_, Window<S::Entity>> {
        self.inner
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, key: &Key) -> Result<(), FetchError> {
        key.validate()?;
        if self.inner.source.accepts(key) {
            Ok(())
        } else {
            Err(FetchError::Validation {
                reason: format!("{} cannot serve key {key}", self.inner.label),
            })
        }
    }

    fn enqueue(&self, keys: Vec<(Key, oneshot::Sender<KeyResult<S::Entity>>)>) {
        let schedule = {
            let mut window = self.lock_window();
            trace!(endpoint = %self.inner.label, keys = keys.len(), "enqueue");
            for (key, tx) in keys {
                window.register(key, tx);
            }
            let schedule = !window.scheduled
                && matches!(self.inner.config.flush, FlushPolicy::Auto { .. });
            if schedule {
                window.scheduled = true;
            }
            schedule
        };

        if schedule {
            self.schedule_flush();
        }
    }

    fn schedule_flush(&self) {
        let FlushPolicy::Auto { delay } = self.inner.config.flush else {
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(endpoint = %self.inner.label, "no async runtime; window waits for an explicit flush");
            self.lock_window().scheduled = false;
            return;
        };

        let batcher = self.clone();
        handle.spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            batcher.flush().await;
        });
    }

    async fn dispatch(&self, mut slots: Vec<Slot<S::Entity>>) {
        if slots.len() == 1 {
            if let Some(slot) = slots.pop() {
                debug!(endpoint = %self.inner.label, key = %slot.key, "flushing single key");
                let result = self
                    .inner
                    .source
                    .fetch_one(&slot.key)
                    .await
                    .map(Arc::new)
                    .map_err(|e| e.for_key(&slot.key));
                if let Err(ref e) = result {
                    debug!(endpoint = %self.inner.label, key = %slot.key, error = %e, "single fetch failed");
                }
                slot.resolve(&result);
            }
            return;
        }

        let size = self.inner.config.chunk_size();
        let mut chunks = Vec::with_capacity(slots.len().div_ceil(size));
        let mut iter = slots.into_iter().peekable();
        while iter.peek().is_some() {
            chunks.push(iter.by_ref().take(size).collect::<Vec<_>>());
        }

        debug!(
            endpoint = %self.inner.label,
            keys = chunks.iter().map(Vec::len).sum::<usize>(),
            chunks = chunks.len(),
            "flushing window"
        );

        join_all(chunks.into_iter().map(|chunk| self.dispatch_chunk(chunk))).await;
    }

    async fn dispatch_chunk(&self, chunk: Vec<Slot<S::Entity>>) {
        let keys: Vec<Key> = chunk.iter().map(|slot| slot.key.clone()).collect();

        match self.inner.source.fetch_many(&keys).await {
            Ok(entities) => {
                let mut found: HashMap<String, Arc<S::Entity>> = HashMap::with_capacity(entities.len());
                for entity in entities {
                    match self.inner.source.key_of(&entity) {
                        Some(key) => {
                            found.entry(key.canonical()).or_insert_with(|| Arc::new(entity));
                        }
                        None => trace!(endpoint = %self.inner.label, "dropping uncorrelated entity"),
                    }
                }

                for slot in chunk {
                    let result = found.get(&slot.key.canonical()).map_or_else(
                        || {
                            Err(FetchError::NotFound {
                                key: slot.key.to_string(),
                            })
                        },
                        |entity| Ok(Arc::clone(entity)),
                    );
                    slot.resolve(&result);
                }
            }
            Err(e) => {
                warn!(endpoint = %self.inner.label, keys = keys.len(), error = %e, "chunk failed");
                let result = Err(e);
                for slot in chunk {
                    slot.resolve(&result);
                }
            }
        }
    }
}
