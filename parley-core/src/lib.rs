//! Parley Core - The concurrent conversation data layer.
//!
//! This crate provides:
//! - A registry of per-key exclusive locks with a collective barrier
//! - An LRU-bounded cache of open per-user message logs and live engine sessions
//! - Durable SQLite-backed stores for users, sessions, and message logs
//! - The `Engine` trait for the shared conversational engine
//! - `ConversationManager`, the facade that ties these together
//!
//! ## Architecture
//!
//! ```text
//! Transport → ConversationManager → LockRegistry (user, message)
//!                    │                     │
//!                    ├→ UserStore          ├→ SessionCache → MessageLog (per user)
//!                    ├→ SessionStore       │        │
//!                    └→ Engine (shared) ←──┴────────┘
//! ```
//!
//! Lock ordering everywhere: user lock → message lock → engine lock →
//! sessions lock. Eviction acquires a victim's user lock only through
//! `try_acquire`, so cross-user acquisitions never block.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod cache;
pub mod engine;
pub mod lock;
pub mod manager;
pub mod store;
pub mod types;

pub use engine::Engine;
pub use lock::{ItemLock, LockRegistry, QuiesceGuard};
pub use manager::ConversationManager;
pub use store::{MessageLog, SessionStore, UserStore};
pub use types::{Message, Origin, SessionSnapshot, User};
