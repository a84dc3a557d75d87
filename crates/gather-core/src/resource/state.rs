// ── Resource state and change listeners ──

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Lifecycle of a resource's most recently applied fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResourceStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

impl ResourceStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Success => "success",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a resource.
#[derive(Debug)]
pub struct ResourceState<T, E> {
    pub status: ResourceStatus,
    /// Last successfully fetched value; survives later errors.
    pub value: Option<Arc<T>>,
    /// Error of the last applied fetch, cleared by a later success.
    pub error: Option<E>,
    /// Generation of the most recently issued fetch.
    pub generation: u64,
}

impl<T, E: Clone> Clone for ResourceState<T, E> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            value: self.value.clone(),
            error: self.error.clone(),
            generation: self.generation,
        }
    }
}

impl<T, E> Default for ResourceState<T, E> {
    fn default() -> Self {
        Self {
            status: ResourceStatus::Idle,
            value: None,
            error: None,
            generation: 0,
        }
    }
}

// ── Listeners ────────────────────────────────────────────────────────

type Callback<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// Callbacks invoked synchronously on every change of one piece of state.
pub(crate) struct Listeners<V> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<V>)>>,
}

impl<V: 'static> Listeners<V> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn add(self: &Arc<Self>, callback: Callback<V>) -> Subscription
    where
        V: Send + Sync,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, callback));
        let registry: Weak<dyn Unsubscribe> = Arc::downgrade(self) as Weak<dyn Unsubscribe>;
        Subscription { registry, id }
    }

    /// Invoke every callback with `value`. The list is copied first so a
    /// callback may subscribe or unsubscribe without deadlocking.
    pub(crate) fn notify(&self, value: &V) {
        let callbacks: Vec<Callback<V>> = self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Callback<V>)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: u64);
}

impl<V: Send + Sync + 'static> Unsubscribe for Listeners<V> {
    fn unsubscribe(&self, id: u64) {
        self.lock().retain(|(existing, _)| *existing != id);
    }
}

/// Keeps a callback registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the callback"]
pub struct Subscription {
    registry: Weak<dyn Unsubscribe>,
    id: u64,
}

impl Subscription {
    /// Unsubscribe now. Equivalent to dropping the guard.
    pub fn cancel(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}
