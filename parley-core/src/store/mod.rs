//! Durable SQLite-backed stores: the user map, the engine-session map, and
//! per-user message logs.

mod log;
mod sessions;
mod users;

pub use log::MessageLog;
pub use sessions::SessionStore;
pub use users::UserStore;
