//! The shared conversational engine contract.

use crate::types::SessionSnapshot;
use parley_common::Result;
use std::sync::{Arc, Mutex};

/// A stateful conversational engine shared by every user.
///
/// Implementations hold mutable per-user session state and are not safe for
/// concurrent use; callers serialize every invocation through one lock (see
/// [`SharedEngine`]). Session snapshots pass through the core as opaque
/// bytes; their layout belongs to the engine alone.
pub trait Engine: Send {
    /// Produce a reply to `input` for `user_id`, updating that user's live
    /// session. An empty reply means the engine has nothing to say and no
    /// server message is recorded.
    fn respond(&mut self, input: &str, user_id: &str) -> Result<String>;

    /// Export the user's live session as an opaque snapshot.
    fn get_session_data(&mut self, user_id: &str) -> Result<SessionSnapshot>;

    /// Install a snapshot as the user's live session, replacing whatever is
    /// there. An empty snapshot installs a fresh session.
    fn set_session_data(&mut self, user_id: &str, snapshot: &SessionSnapshot) -> Result<()>;

    /// Discard the user's live session entirely.
    fn delete_session(&mut self, user_id: &str) -> Result<()>;
}

/// The engine as shared by the manager and the session cache. The single
/// mutex is the engine lock in the global lock order.
pub type SharedEngine = Arc<Mutex<Box<dyn Engine>>>;
