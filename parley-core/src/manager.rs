//! Conversation manager: the single entry point for user and message
//! operations.
//!
//! The manager owns the durable stores, the per-user lock registries, the
//! session cache, and the shared engine. Every operation touching a user
//! takes that user's item lock first, so operations on the same user are
//! serialized while distinct users proceed in parallel.
//!
//! Lock order, outermost first: user lock, message lock, cache map, engine,
//! session store. [`ConversationManager::close`] raises the collective
//! barriers on both registries, drains the cache, and flushes the stores;
//! after that every operation fails with [`Error::Closed`].

use crate::cache::SessionCache;
use crate::engine::{Engine, SharedEngine};
use crate::lock::LockRegistry;
use crate::store::{MessageLog, SessionStore, UserStore};
use crate::types::{Message, Origin, User};
use parley_common::{Error, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Facade over durable storage, locking, the session cache, and the engine.
pub struct ConversationManager {
    users: UserStore,
    sessions: Arc<SessionStore>,
    cache: SessionCache,
    engine: SharedEngine,
    user_locks: LockRegistry<String>,
    message_locks: LockRegistry<String>,
    closed: AtomicBool,
}

impl ConversationManager {
    /// Open (or create) the durable stores under `data_dir` and wire up the
    /// given engine. At most `max_cached_users` users are held open at once.
    pub fn new(
        data_dir: impl AsRef<Path>,
        max_cached_users: usize,
        engine: Box<dyn Engine>,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let users = UserStore::open(&data_dir.join("users.db"))?;
        let sessions = Arc::new(SessionStore::open(&data_dir.join("sessions.db"))?);
        let engine: SharedEngine = Arc::new(Mutex::new(engine));
        let user_locks = LockRegistry::new();
        let cache = SessionCache::new(
            max_cached_users,
            data_dir.join("messages"),
            Arc::clone(&engine),
            Arc::clone(&sessions),
            user_locks.clone(),
        );
        tracing::info!(
            data_dir = %data_dir.display(),
            max_cached_users,
            "conversation manager ready"
        );
        Ok(Self {
            users,
            sessions,
            cache,
            engine,
            user_locks,
            message_locks: LockRegistry::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Ids of all registered users, oldest first.
    pub fn user_ids(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.users.ids()
    }

    /// Register a new user.
    pub fn create_user(&self, id: &str, name: &str) -> Result<()> {
        self.ensure_open()?;
        let _lock = self.user_locks.acquire(id.to_string());
        self.ensure_open()?;
        if self.users.exists(id)? {
            return Err(Error::AlreadyExists(format!("user {id}")));
        }
        self.users.insert(&User {
            id: id.to_string(),
            name: name.to_string(),
        })?;
        tracing::info!(user_id = %id, "user created");
        Ok(())
    }

    /// Look up a user by id.
    pub fn user(&self, id: &str) -> Result<User> {
        self.ensure_open()?;
        let _lock = self.user_locks.acquire(id.to_string());
        self.ensure_open()?;
        self.users
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("user {id}")))
    }

    /// Change a user's display name.
    pub fn rename_user(&self, id: &str, name: &str) -> Result<()> {
        self.ensure_open()?;
        let _lock = self.user_locks.acquire(id.to_string());
        self.ensure_open()?;
        if !self.users.update_name(id, name)? {
            return Err(Error::NotFound(format!("user {id}")));
        }
        tracing::info!(user_id = %id, "user renamed");
        Ok(())
    }

    /// Ids of all messages in the user's log, oldest first.
    pub fn message_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_log(user_id, |log| log.ids())
    }

    /// All messages in the user's log, oldest first.
    pub fn messages(&self, user_id: &str) -> Result<Vec<Message>> {
        self.with_log(user_id, |log| log.messages())
    }

    /// Look up one message in the user's log.
    pub fn message(&self, user_id: &str, message_id: &str) -> Result<Message> {
        self.with_log(user_id, |log| {
            log.get(message_id)?
                .ok_or_else(|| Error::NotFound(format!("message {message_id}")))
        })
    }

    /// Append a client message, ask the engine for a reply, and append the
    /// reply if the engine produced one.
    ///
    /// Returns the client message id and, when the engine had something to
    /// say, the server message id. The engine's session snapshot is persisted
    /// after every exchange so an abrupt exit loses at most the in-flight
    /// message.
    pub fn post_message(&self, user_id: &str, content: &str) -> Result<(String, Option<String>)> {
        self.ensure_open()?;
        let _user_lock = self.user_locks.acquire(user_id.to_string());
        self.ensure_open()?;
        if !self.users.exists(user_id)? {
            return Err(Error::NotFound(format!("user {user_id}")));
        }

        let client_id = {
            let _message_lock = self.message_locks.acquire(user_id.to_string());
            let log = self.cache.get_or_open(user_id)?;
            let message = stamp_unique(&log, Origin::Client, content)?;
            log.append(&message)?;
            message.id
        };

        let (reply, snapshot) = {
            let mut engine = self.lock_engine()?;
            let reply = engine.respond(content, user_id)?;
            let snapshot = engine.get_session_data(user_id)?;
            (reply, snapshot)
        };
        self.sessions.put(user_id, &snapshot)?;

        let response_id = if reply.is_empty() {
            None
        } else {
            let _message_lock = self.message_locks.acquire(user_id.to_string());
            let log = self.cache.get_or_open(user_id)?;
            let message = stamp_unique(&log, Origin::Server, &reply)?;
            log.append(&message)?;
            Some(message.id)
        };

        tracing::debug!(
            user_id = %user_id,
            client_id = %client_id,
            replied = response_id.is_some(),
            "message posted"
        );
        Ok((client_id, response_id))
    }

    /// Quiesce every in-flight operation, persist all live sessions, flush
    /// the stores, and reject further operations.
    ///
    /// Idempotent; a second call returns immediately.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _users_quiesced = self.user_locks.acquire_all();
        let _messages_quiesced = self.message_locks.acquire_all();
        self.cache.drain()?;
        self.users.flush()?;
        self.sessions.flush()?;
        tracing::info!("conversation manager closed");
        Ok(())
    }

    /// Run `op` against the user's open log, under the user and message locks.
    fn with_log<T>(&self, user_id: &str, op: impl FnOnce(&MessageLog) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        let _user_lock = self.user_locks.acquire(user_id.to_string());
        self.ensure_open()?;
        if !self.users.exists(user_id)? {
            return Err(Error::NotFound(format!("user {user_id}")));
        }
        let _message_lock = self.message_locks.acquire(user_id.to_string());
        let log = self.cache.get_or_open(user_id)?;
        op(&log)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn lock_engine(&self) -> Result<MutexGuard<'_, Box<dyn Engine>>> {
        self.engine
            .lock()
            .map_err(|e| Error::Internal(format!("Lock error: {e}")))
    }
}

/// Stamp a fresh message, regenerating until its id is unused in `log`.
///
/// Ids are derived from the creation time, so a collision only happens when
/// two messages land in the same microsecond; one retry loop iteration per
/// collision resolves it.
fn stamp_unique(log: &MessageLog, origin: Origin, content: &str) -> Result<Message> {
    let mut message = Message::new(origin, content);
    while log.contains(&message.id)? {
        message = Message::new(origin, content);
    }
    Ok(message)
}
