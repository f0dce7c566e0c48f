//! LRU-bounded cache of open message logs and live engine sessions.
//!
//! Each cached user has an open [`MessageLog`] and a live session inside the
//! shared engine. At most `capacity` users are cached at once; opening a new
//! one at capacity evicts the least recently used user whose lock can be
//! taken, migrating its live session back to the durable store first.

use crate::engine::SharedEngine;
use crate::lock::LockRegistry;
use crate::store::{MessageLog, SessionStore};
use parley_common::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Pause before rescanning when every eviction candidate is mid-operation.
const BUSY_BACKOFF: Duration = Duration::from_millis(1);

/// LRU cache of per-user conversation state.
///
/// Lock order inside this module: cache map, then (for misses) engine, then
/// sessions store. Victims' user locks are taken only with `try_acquire`, so
/// the cache never blocks on another user's in-flight operation.
pub struct SessionCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    logs_dir: PathBuf,
    engine: SharedEngine,
    sessions: Arc<SessionStore>,
    user_locks: LockRegistry<String>,
}

struct CacheInner {
    entries: HashMap<String, Arc<MessageLog>>,
    /// Recency order, least recently used at the front.
    order: VecDeque<String>,
}

impl SessionCache {
    /// Create a cache holding at most `capacity` open users (minimum 1).
    pub fn new(
        capacity: usize,
        logs_dir: impl Into<PathBuf>,
        engine: SharedEngine,
        sessions: Arc<SessionStore>,
        user_locks: LockRegistry<String>,
    ) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            logs_dir: logs_dir.into(),
            engine,
            sessions,
            user_locks,
        }
    }

    /// Hand back the open log for `user_id`, opening it first if needed.
    ///
    /// The caller must hold the user's item lock and message lock. On a miss
    /// at capacity this evicts the least recently used user whose item lock
    /// is free, persisting that user's live engine session before closing its
    /// log; when every candidate is busy it backs off briefly and rescans.
    pub fn get_or_open(&self, user_id: &str) -> Result<Arc<MessageLog>> {
        loop {
            let mut inner = self.lock_inner()?;

            if let Some(log) = inner.entries.get(user_id) {
                let log = Arc::clone(log);
                promote(&mut inner.order, user_id);
                tracing::debug!(user_id = %user_id, "log cache hit");
                return Ok(log);
            }

            if inner.entries.len() < self.capacity {
                return self.open_into(inner, user_id);
            }

            match pick_victim(&mut inner, &self.user_locks) {
                Some((victim_id, victim_lock, victim_log)) => {
                    drop(inner);
                    self.migrate_out(&victim_id)?;
                    drop(victim_log);
                    drop(victim_lock);
                }
                None => {
                    drop(inner);
                    thread::sleep(BUSY_BACKOFF);
                }
            }
        }
    }

    /// Open the durable log and restore the persisted session into the
    /// engine, holding the map guard so the capacity bound stays exact.
    fn open_into(
        &self,
        mut inner: MutexGuard<'_, CacheInner>,
        user_id: &str,
    ) -> Result<Arc<MessageLog>> {
        let log = Arc::new(MessageLog::open(&self.log_path(user_id))?);
        let snapshot = self.sessions.get(user_id)?.unwrap_or_default();
        {
            let mut engine = self.lock_engine()?;
            engine.set_session_data(user_id, &snapshot)?;
        }

        inner
            .entries
            .insert(user_id.to_string(), Arc::clone(&log));
        inner.order.push_back(user_id.to_string());
        tracing::debug!(user_id = %user_id, open = inner.entries.len(), "opened message log");
        Ok(log)
    }

    /// Persist the user's live engine session to the durable store and
    /// discard it from the engine. The caller holds the user's item lock.
    fn migrate_out(&self, user_id: &str) -> Result<()> {
        let snapshot = {
            let mut engine = self.lock_engine()?;
            engine.get_session_data(user_id)?
        };
        self.sessions.put(user_id, &snapshot)?;
        {
            let mut engine = self.lock_engine()?;
            engine.delete_session(user_id)?;
        }
        tracing::debug!(user_id = %user_id, "session migrated to durable store");
        Ok(())
    }

    /// Migrate every cached user out and close every log.
    ///
    /// Called during shutdown while the collective barriers are held, so no
    /// user is mid-operation.
    pub fn drain(&self) -> Result<()> {
        let mut inner = self.lock_inner()?;
        let drained = inner.order.len();
        while let Some(user_id) = inner.order.pop_front() {
            if let Some(log) = inner.entries.remove(&user_id) {
                self.migrate_out(&user_id)?;
                drop(log);
            }
        }
        tracing::info!(drained, "session cache drained");
        Ok(())
    }

    /// Number of currently open users.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.entries.contains_key(user_id))
            .unwrap_or(false)
    }

    fn log_path(&self, user_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{user_id}.db"))
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, CacheInner>> {
        self.inner
            .lock()
            .map_err(|e| Error::Internal(format!("Lock error: {e}")))
    }

    fn lock_engine(&self) -> Result<MutexGuard<'_, Box<dyn crate::engine::Engine>>> {
        self.engine
            .lock()
            .map_err(|e| Error::Internal(format!("Lock error: {e}")))
    }
}

fn promote(order: &mut VecDeque<String>, user_id: &str) {
    order.retain(|u| u != user_id);
    order.push_back(user_id.to_string());
}

/// Scan from the least recently used end for a user whose item lock is free,
/// and remove that entry from the map. Returns `None` when every cached user
/// is mid-operation.
fn pick_victim(
    inner: &mut CacheInner,
    user_locks: &LockRegistry<String>,
) -> Option<(String, crate::lock::ItemLock<String>, Arc<MessageLog>)> {
    for idx in 0..inner.order.len() {
        let candidate = inner.order[idx].clone();
        if let Some(lock) = user_locks.try_acquire(candidate.clone()) {
            inner.order.remove(idx);
            let log = inner
                .entries
                .remove(&candidate)
                .expect("cache order entry without map entry");
            tracing::info!(user_id = %candidate, "evicting least recently used log");
            return Some((candidate, lock, log));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::types::SessionSnapshot;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecState {
        sessions: HashMap<String, Vec<u8>>,
        installed: Vec<(String, Vec<u8>)>,
        deleted: Vec<String>,
    }

    /// Engine double that records every session operation.
    struct RecordingEngine {
        state: Arc<Mutex<RecState>>,
    }

    impl Engine for RecordingEngine {
        fn respond(&mut self, input: &str, _user_id: &str) -> Result<String> {
            Ok(format!("re: {input}"))
        }

        fn get_session_data(&mut self, user_id: &str) -> Result<SessionSnapshot> {
            let state = self.state.lock().unwrap();
            Ok(SessionSnapshot::from(
                state.sessions.get(user_id).cloned().unwrap_or_default(),
            ))
        }

        fn set_session_data(&mut self, user_id: &str, snapshot: &SessionSnapshot) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state
                .sessions
                .insert(user_id.to_string(), snapshot.as_bytes().to_vec());
            state
                .installed
                .push((user_id.to_string(), snapshot.as_bytes().to_vec()));
            Ok(())
        }

        fn delete_session(&mut self, user_id: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.sessions.remove(user_id);
            state.deleted.push(user_id.to_string());
            Ok(())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        cache: SessionCache,
        user_locks: LockRegistry<String>,
        sessions: Arc<SessionStore>,
        state: Arc<Mutex<RecState>>,
    }

    fn fixture(capacity: usize) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let state = Arc::new(Mutex::new(RecState::default()));
        let engine: SharedEngine = Arc::new(Mutex::new(Box::new(RecordingEngine {
            state: Arc::clone(&state),
        })));
        let sessions = Arc::new(SessionStore::open(&tmp.path().join("sessions.db")).unwrap());
        let user_locks = LockRegistry::new();
        let cache = SessionCache::new(
            capacity,
            tmp.path().join("messages"),
            engine,
            Arc::clone(&sessions),
            user_locks.clone(),
        );
        Fixture {
            _tmp: tmp,
            cache,
            user_locks,
            sessions,
            state,
        }
    }

    #[test]
    fn test_hit_returns_same_log() {
        let fx = fixture(4);
        let first = fx.cache.get_or_open("u1").unwrap();
        let second = fx.cache.get_or_open("u1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fx.cache.len(), 1);
    }

    #[test]
    fn test_open_installs_fresh_session_when_none_persisted() {
        let fx = fixture(4);
        fx.cache.get_or_open("u1").unwrap();

        let state = fx.state.lock().unwrap();
        assert_eq!(state.installed, vec![("u1".to_string(), Vec::new())]);
    }

    #[test]
    fn test_capacity_bound_holds() {
        let fx = fixture(2);
        for uid in ["u1", "u2", "u3", "u4", "u5"] {
            fx.cache.get_or_open(uid).unwrap();
            assert!(fx.cache.len() <= 2);
        }
        assert_eq!(fx.cache.len(), 2);
    }

    #[test]
    fn test_lru_eviction_order() {
        let fx = fixture(2);
        fx.cache.get_or_open("u1").unwrap();
        fx.cache.get_or_open("u2").unwrap();
        // touching u1 makes u2 the least recently used
        fx.cache.get_or_open("u1").unwrap();
        fx.cache.get_or_open("u3").unwrap();

        assert!(fx.cache.contains("u1"));
        assert!(!fx.cache.contains("u2"));
        assert!(fx.cache.contains("u3"));
        assert_eq!(fx.state.lock().unwrap().deleted, vec!["u2"]);
    }

    #[test]
    fn test_busy_victim_is_skipped() {
        let fx = fixture(2);
        fx.cache.get_or_open("u1").unwrap();
        fx.cache.get_or_open("u2").unwrap();

        // u1 is the LRU candidate but mid-operation; u2 must go instead
        let _held = fx.user_locks.acquire("u1".to_string());
        fx.cache.get_or_open("u3").unwrap();

        assert!(fx.cache.contains("u1"));
        assert!(!fx.cache.contains("u2"));
        assert!(fx.cache.contains("u3"));
        assert_eq!(fx.state.lock().unwrap().deleted, vec!["u2"]);
    }

    #[test]
    fn test_eviction_persists_live_session() {
        let fx = fixture(1);
        fx.cache.get_or_open("u1").unwrap();
        fx.state
            .lock()
            .unwrap()
            .sessions
            .insert("u1".to_string(), vec![7, 7]);

        fx.cache.get_or_open("u2").unwrap();

        assert_eq!(
            fx.sessions.get("u1").unwrap().unwrap(),
            SessionSnapshot::from(vec![7, 7])
        );
        assert_eq!(fx.state.lock().unwrap().deleted, vec!["u1"]);
    }

    #[test]
    fn test_reopen_restores_persisted_session() {
        let fx = fixture(1);
        fx.cache.get_or_open("u1").unwrap();
        fx.state
            .lock()
            .unwrap()
            .sessions
            .insert("u1".to_string(), vec![7, 7]);
        fx.cache.get_or_open("u2").unwrap();

        fx.cache.get_or_open("u1").unwrap();

        let state = fx.state.lock().unwrap();
        assert_eq!(
            state.installed.last(),
            Some(&("u1".to_string(), vec![7, 7]))
        );
        assert_eq!(state.sessions.get("u1"), Some(&vec![7, 7]));
    }

    #[test]
    fn test_drain_empties_cache_and_persists() {
        let fx = fixture(4);
        fx.cache.get_or_open("u1").unwrap();
        fx.cache.get_or_open("u2").unwrap();
        fx.state
            .lock()
            .unwrap()
            .sessions
            .insert("u1".to_string(), vec![1]);
        fx.state
            .lock()
            .unwrap()
            .sessions
            .insert("u2".to_string(), vec![2]);

        fx.cache.drain().unwrap();

        assert!(fx.cache.is_empty());
        assert_eq!(
            fx.sessions.get("u1").unwrap().unwrap(),
            SessionSnapshot::from(vec![1])
        );
        assert_eq!(
            fx.sessions.get("u2").unwrap().unwrap(),
            SessionSnapshot::from(vec![2])
        );
        assert!(fx.state.lock().unwrap().sessions.is_empty());
    }
}
