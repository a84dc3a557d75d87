// ── Memoized async calls ──
//
// Argument-keyed result cache with optional TTL, size bound and
// single-flight sharing of in-flight calls. Failures are never stored.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace};

/// How call arguments are compared when looking up cached results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyEquality {
    /// The argument type's own `Eq` and `Hash`.
    #[default]
    Shallow,
    /// Canonical JSON of the arguments (object keys sorted). Arguments that
    /// serialize identically share an entry; fields skipped by serde do not
    /// take part in the comparison.
    Deep,
}

/// Bounds and sharing behaviour of a memoized call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoOptions {
    /// `None` keeps entries until they expire or are invalidated.
    pub max_entries: Option<usize>,
    /// `None` keeps entries until evicted by size or invalidated.
    pub ttl: Option<Duration>,
    pub key_equality: KeyEquality,
    /// Concurrent calls with equal arguments share one in-flight call.
    pub single_flight: bool,
}

impl Default for MemoOptions {
    fn default() -> Self {
        Self {
            max_entries: None,
            ttl: None,
            key_equality: KeyEquality::Shallow,
            single_flight: true,
        }
    }
}

impl MemoOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn deep(mut self) -> Self {
        self.key_equality = KeyEquality::Deep;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Signature<A> {
    Value(A),
    Canonical(String),
}

struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

type SharedCall<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;
type CallFn<A, T, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

struct Flight<T, E> {
    id: u64,
    future: SharedCall<T, E>,
}

struct MemoState<A, T, E> {
    /// Oldest first; re-inserting a signature moves it to the back.
    entries: IndexMap<Signature<A>, Entry<T>>,
    in_flight: HashMap<Signature<A>, Flight<T, E>>,
    /// Bumped by `invalidate_all`; calls started in an older epoch do not
    /// store their result.
    epoch: u64,
    next_flight: u64,
    /// Flights started and not yet settled.
    running: BTreeSet<u64>,
    /// Per-signature invalidation stamp: the last flight id issued when the
    /// signature was invalidated. Flights up to that id do not store.
    stamps: HashMap<Signature<A>, u64>,
}

struct MemoInner<A, T, E> {
    call: CallFn<A, T, E>,
    options: MemoOptions,
    state: Mutex<MemoState<A, T, E>>,
}

/// A memoized async function. Cheap to clone; clones share one cache.
pub struct Memoized<A, T, E> {
    inner: Arc<MemoInner<A, T, E>>,
}

impl<A, T, E> Clone for Memoized<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Wrap `f` with an argument-keyed cache.
pub fn memoize<A, T, E, F, Fut>(f: F, options: MemoOptions) -> Memoized<A, T, E>
where
    A: Clone + Eq + Hash + Serialize + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Memoized {
        inner: Arc::new(MemoInner {
            call: Arc::new(move |args| f(args).boxed()),
            options,
            state: Mutex::new(MemoState {
                entries: IndexMap::new(),
                in_flight: HashMap::new(),
                epoch: 0,
                next_flight: 0,
                running: BTreeSet::new(),
                stamps: HashMap::new(),
            }),
        }),
    }
}

enum Lookup<T, E> {
    Hit(T),
    Join(SharedCall<T, E>),
    Miss { flight: u64, epoch: u64 },
}

impl<A, T, E> Memoized<A, T, E>
where
    A: Clone + Eq + Hash + Serialize + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn options(&self) -> &MemoOptions {
        &self.inner.options
    }

    /// Call through the cache.
    ///
    /// Returns a live cached value without invoking the function, joins an
    /// in-flight call for equal arguments when single-flight is on, and
    /// otherwise invokes the function and caches a success.
    pub async fn call(&self, args: A) -> Result<T, E> {
        let sig = self.signature(&args);

        let (flight, epoch) = match self.lookup(&sig) {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Join(shared) => return shared.await,
            Lookup::Miss { flight, epoch } => (flight, epoch),
        };

        let call = Arc::clone(&self.inner.call);
        let weak = Arc::downgrade(&self.inner);
        let settle_sig = sig.clone();
        let future = async move {
            let result = call(args).await;
            if let Some(inner) = weak.upgrade() {
                inner.settle(settle_sig, flight, epoch, &result);
            }
            result
        }
        .boxed();

        if !self.inner.options.single_flight {
            return future.await;
        }

        // Another caller may have registered a flight since the lookup; ours
        // has not been polled yet and is dropped in that case.
        let shared = {
            let mut state = self.inner.lock();
            if let Some(existing) = state.in_flight.get(&sig) {
                let joined = existing.future.clone();
                state.running.remove(&flight);
                joined
            } else {
                let shared = future.shared();
                state.in_flight.insert(
                    sig,
                    Flight {
                        id: flight,
                        future: shared.clone(),
                    },
                );
                shared
            }
        };
        shared.await
    }

    /// Drop the cached result and any in-flight registration for `args`.
    /// Calls for `args` already in flight will not store their result.
    pub fn invalidate(&self, args: &A) {
        let sig = self.signature(args);
        let mut state = self.inner.lock();
        let removed = state.entries.shift_remove(&sig).is_some();
        state.in_flight.remove(&sig);
        if !state.running.is_empty() {
            let stamp = state.next_flight;
            state.stamps.insert(sig, stamp);
        }
        if removed {
            debug!("memo entry invalidated");
        }
    }

    /// Drop everything. Calls already in flight will not store their result.
    pub fn invalidate_all(&self) {
        let mut state = self.inner.lock();
        state.entries.clear();
        state.in_flight.clear();
        state.stamps.clear();
        state.epoch += 1;
        debug!(epoch = state.epoch, "memo cache cleared");
    }

    /// Number of live entries. Expired entries are purged first.
    pub fn len(&self) -> usize {
        let mut state = self.inner.lock();
        let now = Instant::now();
        state.entries.retain(|_, entry| entry.is_live(now));
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn signature(&self, args: &A) -> Signature<A> {
        match self.inner.options.key_equality {
            KeyEquality::Shallow => Signature::Value(args.clone()),
            KeyEquality::Deep => match serde_json::to_value(args).map(|v| v.to_string()) {
                Ok(canonical) => Signature::Canonical(canonical),
                Err(e) => {
                    trace!(error = %e, "arguments not serializable; comparing by value");
                    Signature::Value(args.clone())
                }
            },
        }
    }

    fn lookup(&self, sig: &Signature<A>) -> Lookup<T, E> {
        let mut state = self.inner.lock();
        let now = Instant::now();

        match state.entries.get(sig) {
            Some(entry) if entry.is_live(now) => {
                trace!("memo hit");
                return Lookup::Hit(entry.value.clone());
            }
            Some(_) => {
                trace!("memo entry expired");
                state.entries.shift_remove(sig);
            }
            None => {}
        }

        if self.inner.options.single_flight {
            if let Some(flight) = state.in_flight.get(sig) {
                trace!(flight = flight.id, "joining in-flight call");
                return Lookup::Join(flight.future.clone());
            }
        }

        trace!("memo miss");
        state.next_flight += 1;
        let flight = state.next_flight;
        state.running.insert(flight);
        Lookup::Miss {
            flight,
            epoch: state.epoch,
        }
    }
}

impl<A, T, E> MemoInner<A, T, E>
where
    A: Eq + Hash,
{
    fn lock(&self) -> MutexGuard<'_, MemoState<A, T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, sig: Signature<A>, flight: u64, epoch: u64, result: &Result<T, E>)
    where
        T: Clone,
    {
        let mut state = self.lock();

        if state.in_flight.get(&sig).is_some_and(|f| f.id == flight) {
            state.in_flight.remove(&sig);
        }
        let invalidated = state.stamps.get(&sig).is_some_and(|&stamp| flight <= stamp);
        state.running.remove(&flight);
        if !state.stamps.is_empty() {
            let oldest = state.running.first().copied();
            state.stamps.retain(|_, stamp| oldest.is_some_and(|o| *stamp >= o));
        }

        let Ok(value) = result else {
            trace!("call failed; not cached");
            return;
        };
        if state.epoch != epoch {
            trace!("cache cleared during call; result not stored");
            return;
        }
        if invalidated {
            trace!(flight, "entry invalidated during call; result not stored");
            return;
        }

        let now = Instant::now();
        let expires_at = self.options.ttl.map(|ttl| now + ttl);
        state.entries.shift_remove(&sig);
        state.entries.insert(
            sig,
            Entry {
                value: value.clone(),
                expires_at,
            },
        );

        if let Some(max) = self.options.max_entries {
            if state.entries.len() > max {
                state.entries.retain(|_, entry| entry.is_live(now));
            }
            while state.entries.len() > max {
                state.entries.shift_remove_index(0);
                debug!(max, "evicted oldest memo entry");
            }
        }
    }
}
