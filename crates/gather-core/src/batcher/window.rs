// ── Coalescing window ──
//
// Pending keys accumulated between the first request and the flush.
// Slots are keyed by `Key::canonical()`, which doubles as the side table
// back to the structured key; insertion order is preserved so chunks
// follow request order.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::oneshot;

use crate::error::FetchError;
use crate::model::Key;

/// Outcome delivered to every caller waiting on one key.
pub type KeyResult<T> = Result<Arc<T>, FetchError>;

/// One distinct key and everyone waiting on it.
pub(crate) struct Slot<T> {
    pub(crate) key: Key,
    waiters: Vec<oneshot::Sender<KeyResult<T>>>,
}

impl<T> Slot<T> {
    /// Deliver `result` to every waiter. Waiters that stopped listening
    /// are skipped.
    pub(crate) fn resolve(self, result: &KeyResult<T>) {
        for tx in self.waiters {
            let _ = tx.send(result.clone());
        }
    }
}

pub(crate) struct Window<T> {
    slots: IndexMap<String, Slot<T>>,
    /// A flush task has been spawned for the current window.
    pub(crate) scheduled: bool,
}

impl<T> Window<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: IndexMap::new(),
            scheduled: false,
        }
    }

    /// Add a waiter for `key`, de-duplicating on the canonical form.
    /// Returns `true` if the key opened the window.
    pub(crate) fn register(&mut self, key: Key, tx: oneshot::Sender<KeyResult<T>>) -> bool {
        let opened = self.slots.is_empty();
        self.slots
            .entry(key.canonical())
            .or_insert_with(|| Slot {
                key,
                waiters: Vec::new(),
            })
            .waiters
            .push(tx);
        opened
    }

    /// Close the window, handing back every slot in request order.
    pub(crate) fn take(&mut self) -> Vec<Slot<T>> {
        self.scheduled = false;
        std::mem::take(&mut self.slots).into_values().collect()
    }

    pub(crate) fn withdraw(&mut self, key: &Key) -> Option<Slot<T>> {
        self.slots.shift_remove(&key.canonical())
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keys_share_a_slot() {
        let mut window: Window<u32> = Window::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        assert!(window.register(Key::path(["a", "b"]), tx1));
        assert!(!window.register(Key::path(["a", "b"]), tx2));
        assert_eq!(window.len(), 1);

        let slots = window.take();
        assert_eq!(slots[0].waiters.len(), 2);
        assert_eq!(window.len(), 0);
    }

    #[test]
    fn take_preserves_request_order() {
        let mut window: Window<u32> = Window::new();
        for id in ["c", "a", "b"] {
            let (tx, _rx) = oneshot::channel();
            window.register(Key::id(id), tx);
        }
        let keys: Vec<Key> = window.take().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec![Key::id("c"), Key::id("a"), Key::id("b")]);
    }

    #[test]
    fn resolve_reaches_every_waiter() {
        let mut window: Window<u32> = Window::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        window.register(Key::id("x"), tx1);
        window.register(Key::id("x"), tx2);

        let slot = window.withdraw(&Key::id("x")).unwrap();
        slot.resolve(&Ok(Arc::new(7)));
        assert_eq!(*rx1.try_recv().unwrap().unwrap(), 7);
        assert_eq!(*rx2.try_recv().unwrap().unwrap(), 7);
    }
}
