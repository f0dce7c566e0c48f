//! Core data types: users, messages, and engine session snapshots.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A registered user.
///
/// The `id` is unique and immutable; the display `name` can be changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

/// Which side of the conversation produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Submitted by the user
    Client,
    /// Produced by the engine
    Server,
}

impl Origin {
    /// Convert to string representation for database storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "server" => Self::Server,
            _ => Self::Client,
        }
    }

    /// The single-character prefix used in message ids.
    fn id_prefix(self) -> char {
        match self {
            Self::Client => 'c',
            Self::Server => 's',
        }
    }
}

/// A single immutable message in a user's conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique within the owning user's log
    pub id: String,
    pub origin: Origin,
    pub content: String,
    /// UTC creation time, formatted `YYYYMMDDHHMMSS.ffffff`
    pub time: String,
}

impl Message {
    /// Create a message stamped with the current UTC time.
    ///
    /// The id is the origin prefix (`c` or `s`) followed by the hex SHA-256
    /// digest of the timestamp string, so the id and the `time` field always
    /// agree. Two calls in the same microsecond produce the same id; callers
    /// appending to a log must regenerate until the id is unused there.
    pub fn new(origin: Origin, content: impl Into<String>) -> Self {
        let time = chrono::Utc::now().format("%Y%m%d%H%M%S%.6f").to_string();
        let digest = Sha256::digest(time.as_bytes());
        let id = format!("{}{}", origin.id_prefix(), hex::encode(digest));
        Self {
            id,
            origin,
            content: content.into(),
            time,
        }
    }
}

/// Opaque engine-defined session state for one user.
///
/// The core never inspects the bytes; it only moves them between the engine
/// and the durable session store. An empty snapshot denotes a fresh session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot(Vec<u8>);

impl SessionSnapshot {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SessionSnapshot {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}
