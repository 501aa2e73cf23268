use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Integer-keyed table assigning a stable opaque id on insert. Entries are
/// individually lockable via `acquire`, which hands out an exclusive,
/// `Drop`-released hold so a caller never has to remember to release
/// manually, even if it panics mid-use.
pub struct Registry<V> {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Arc<Mutex<V>>>>,
}

/// Exclusive hold on one entry. Released automatically when dropped.
pub struct Guard<V> {
    // Keeps the entry alive even if it's concurrently removed from the
    // table while this guard is outstanding.
    _entry: Arc<Mutex<V>>,
    guard: MutexGuard<'static, V>,
}

impl<V> std::ops::Deref for Guard<V> {
    type Target = V;
    fn deref(&self) -> &V {
        &self.guard
    }
}

impl<V> std::ops::DerefMut for Guard<V> {
    fn deref_mut(&mut self) -> &mut V {
        &mut self.guard
    }
}

impl<V> Registry<V> {
    pub fn new() -> Self {
        Registry {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts `value` and returns the opaque id it was assigned. Ids are
    /// never reused for the lifetime of the registry.
    pub fn insert(&self, value: V) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(id, Arc::new(Mutex::new(value)));
        id
    }

    /// Acquires exclusive access to the entry for `id`, if it exists. The
    /// returned guard holds only the per-entry lock, not the table lock,
    /// so other ids remain reachable while this one is held.
    pub fn acquire(&self, id: u64) -> Option<Guard<V>> {
        let entry = self.entries.lock().get(&id)?.clone();
        // The guard borrows from `entry`, which it also owns via the Arc
        // clone kept alongside it; this is the standard self-referential
        // pattern for an owned lock guard over a reference-counted cell.
        let guard: MutexGuard<'static, V> =
            unsafe { std::mem::transmute(entry.lock()) };
        Some(Guard {
            _entry: entry,
            guard,
        })
    }

    /// Removes the entry for `id`. Fails silently (no-op) if the id is
    /// unknown or currently acquired elsewhere -- callers are expected to
    /// release any guard before calling `remove`.
    pub fn remove(&self, id: u64) -> bool {
        let mut table = self.entries.lock();
        if let Some(entry) = table.get(&id) {
            // Taking the lock here ensures we never remove an entry that
            // some other thread still holds a `Guard` for.
            let _ensure_unlocked = entry.lock();
        } else {
            return false;
        }
        table.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all live ids, safe to iterate without holding the
    /// table lock for the duration of the caller's work.
    pub fn snapshot_keys(&self) -> Vec<u64> {
        self.entries.lock().keys().copied().collect()
    }
}

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_assigns_increasing_ids() {
        let reg: Registry<u32> = Registry::new();
        let a = reg.insert(10);
        let b = reg.insert(20);
        assert!(b > a);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn acquire_unknown_id_is_none() {
        let reg: Registry<u32> = Registry::new();
        assert!(reg.acquire(999).is_none());
    }

    #[test]
    fn acquire_then_mutate_then_release() {
        let reg: Registry<u32> = Registry::new();
        let id = reg.insert(1);
        {
            let mut guard = reg.acquire(id).unwrap();
            *guard += 1;
        }
        let guard = reg.acquire(id).unwrap();
        assert_eq!(*guard, 2);
    }

    #[test]
    fn remove_drops_entry() {
        let reg: Registry<u32> = Registry::new();
        let id = reg.insert(1);
        assert!(reg.remove(id));
        assert!(reg.acquire(id).is_none());
        assert!(!reg.remove(id));
    }

    #[test]
    fn snapshot_keys_reflects_inserts() {
        let reg: Registry<u32> = Registry::new();
        let a = reg.insert(1);
        let b = reg.insert(2);
        let mut keys = reg.snapshot_keys();
        keys.sort_unstable();
        assert_eq!(keys, vec![a, b]);
    }
}
