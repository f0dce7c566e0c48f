//! Per-key exclusive locks with a collective barrier.
//!
//! A [`LockRegistry`] hands out exclusive RAII locks for arbitrary keys
//! (here: user ids) without pre-registering them. [`LockRegistry::acquire_all`]
//! takes a collective barrier that blocks new per-key acquisitions and waits
//! until every outstanding key is released, giving shutdown a point where
//! nothing is held.
//!
//! All waiting happens on one condvar under the one mutex that guards the
//! locked-key set, so a wakeup can never be missed between the check and
//! the wait.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Registry of per-key exclusive locks.
///
/// Cloning is cheap and yields a handle to the same registry.
pub struct LockRegistry<K: Eq + Hash + Clone> {
    shared: Arc<RegistryShared<K>>,
}

impl<K: Eq + Hash + Clone> Clone for LockRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct RegistryShared<K> {
    state: Mutex<RegistryState<K>>,
    cvar: Condvar,
    /// Serializes collective-barrier holders against each other.
    barrier: Mutex<()>,
}

struct RegistryState<K> {
    locked: HashSet<K>,
    barrier_held: bool,
}

impl<K: Eq + Hash + Clone> LockRegistry<K> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                state: Mutex::new(RegistryState {
                    locked: HashSet::new(),
                    barrier_held: false,
                }),
                cvar: Condvar::new(),
                barrier: Mutex::new(()),
            }),
        }
    }

    /// Acquire the exclusive lock for `key`, blocking while it is held
    /// elsewhere or while a collective barrier is up.
    pub fn acquire(&self, key: K) -> ItemLock<K> {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("lock registry mutex poisoned");
        while state.barrier_held || state.locked.contains(&key) {
            state = self
                .shared
                .cvar
                .wait(state)
                .expect("lock registry condvar poisoned");
        }
        state.locked.insert(key.clone());
        drop(state);
        ItemLock {
            shared: Arc::clone(&self.shared),
            key,
        }
    }

    /// Non-blocking variant of [`acquire`](Self::acquire).
    ///
    /// Returns `None` if the key is locked or a collective barrier is up.
    pub fn try_acquire(&self, key: K) -> Option<ItemLock<K>> {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("lock registry mutex poisoned");
        if state.barrier_held || state.locked.contains(&key) {
            return None;
        }
        state.locked.insert(key.clone());
        drop(state);
        Some(ItemLock {
            shared: Arc::clone(&self.shared),
            key,
        })
    }

    /// Acquire the collective barrier: block new per-key acquisitions, then
    /// wait until every outstanding key has been released.
    ///
    /// Only one barrier holder exists at a time; a second caller blocks until
    /// the first guard is dropped.
    pub fn acquire_all(&self) -> QuiesceGuard<'_, K> {
        let exclusive = self
            .shared
            .barrier
            .lock()
            .expect("lock registry barrier mutex poisoned");
        let mut state = self
            .shared
            .state
            .lock()
            .expect("lock registry mutex poisoned");
        // Raise the barrier before draining so a steady stream of new
        // acquisitions cannot starve the wait.
        state.barrier_held = true;
        while !state.locked.is_empty() {
            state = self
                .shared
                .cvar
                .wait(state)
                .expect("lock registry condvar poisoned");
        }
        drop(state);
        QuiesceGuard {
            shared: &self.shared,
            _exclusive: exclusive,
        }
    }
}

impl<K: Eq + Hash + Clone> Default for LockRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive lock on one key. Released on drop.
pub struct ItemLock<K: Eq + Hash + Clone> {
    shared: Arc<RegistryShared<K>>,
    key: K,
}

impl<K: Eq + Hash + Clone> ItemLock<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone> Drop for ItemLock<K> {
    fn drop(&mut self) {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("lock registry mutex poisoned");
        state.locked.remove(&self.key);
        drop(state);
        // A release can unblock waiters on this key, and the barrier waits
        // for the set to drain; wake everyone.
        self.shared.cvar.notify_all();
    }
}

/// Collective barrier over a whole registry. Released on drop.
pub struct QuiesceGuard<'a, K: Eq + Hash + Clone> {
    shared: &'a RegistryShared<K>,
    _exclusive: MutexGuard<'a, ()>,
}

impl<K: Eq + Hash + Clone> Drop for QuiesceGuard<'_, K> {
    fn drop(&mut self) {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("lock registry mutex poisoned");
        state.barrier_held = false;
        drop(state);
        self.shared.cvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_exclusive_per_key() {
        let registry = LockRegistry::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            handles.push(
                thread::Builder::new()
                    .name(format!("locker-{i}"))
                    .spawn(move || {
                        for _ in 0..25 {
                            let _guard = registry.acquire("shared".to_string());
                            if active.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_micros(50));
                            active.fetch_sub(1, Ordering::SeqCst);
                        }
                    })
                    .expect("spawn locker"),
            );
        }
        for handle in handles {
            handle.join().expect("locker panicked");
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_distinct_keys_do_not_block() {
        let registry = LockRegistry::new();
        let _a = registry.acquire("a".to_string());
        // would deadlock here if distinct keys shared one lock
        let _b = registry.acquire("b".to_string());
    }

    #[test]
    fn test_try_acquire() {
        let registry = LockRegistry::new();
        let guard = registry.acquire("key".to_string());

        assert!(registry.try_acquire("key".to_string()).is_none());
        assert!(registry.try_acquire("other".to_string()).is_some());

        drop(guard);
        assert!(registry.try_acquire("key".to_string()).is_some());
    }

    #[test]
    fn test_release_wakes_waiter() {
        let registry = LockRegistry::new();
        let guard = registry.acquire("key".to_string());

        let registry2 = registry.clone();
        let handle = thread::Builder::new()
            .name("waiter".into())
            .spawn(move || {
                let _guard = registry2.acquire("key".to_string());
            })
            .expect("spawn waiter");

        thread::sleep(Duration::from_millis(50));
        drop(guard);
        handle.join().expect("waiter never acquired the lock");
    }

    #[test]
    fn test_barrier_waits_for_held_keys() {
        let registry = LockRegistry::new();
        let guard = registry.acquire("key".to_string());
        let released = Arc::new(AtomicBool::new(false));

        let released2 = Arc::clone(&released);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            released2.store(true, Ordering::SeqCst);
            drop(guard);
        });

        let _quiesce = registry.acquire_all();
        // the barrier must not return before the holder let go
        assert!(released.load(Ordering::SeqCst));
        handle.join().expect("holder panicked");
    }

    #[test]
    fn test_acquire_blocks_while_barrier_held() {
        let registry = LockRegistry::new();
        let quiesce = registry.acquire_all();
        assert!(registry.try_acquire("key".to_string()).is_none());

        let acquired = Arc::new(AtomicBool::new(false));
        let acquired2 = Arc::clone(&acquired);
        let registry2 = registry.clone();
        let handle = thread::spawn(move || {
            let _guard = registry2.acquire("key".to_string());
            acquired2.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(quiesce);
        handle.join().expect("acquirer panicked");
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_barrier_reusable_after_release() {
        let registry: LockRegistry<String> = LockRegistry::new();
        drop(registry.acquire_all());
        drop(registry.acquire_all());
        assert!(registry.try_acquire("key".to_string()).is_some());
    }
}
