//! Error types for the session cache.
//!
//! `put` failures are fatal and must be reported; `get` failures are either a
//! miss (nothing usable cached) or a decryption failure, both of which send the
//! caller back to full re-authentication.

use std::io;
use thiserror::Error;

/// Errors produced by the persistence engine and its collaborators.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cipher service was unavailable or failed while encrypting.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// A filesystem step of `put` failed.
    #[error("Persistence I/O error ({context}): {source}")]
    PersistenceIo {
        context: String,
        #[source]
        source: io::Error,
    },

    /// No locator record, or the locator could not be decrypted.
    #[error("No session cached")]
    NoSessionCached,

    /// The reassembled envelope could not be decrypted.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// An envelope did not carry the expected armor or packet structure.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The agent key/value store or passphrase cache rejected a command.
    #[error("Agent error: {0}")]
    Agent(String),

    /// A required external executable is not installed.
    #[error("Required tool not found: {0}")]
    MissingTool(String),
}

impl CacheError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::PersistenceIo {
            context: context.into(),
            source,
        }
    }

    /// Whether the caller should treat this as "nothing cached" and re-authenticate.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::NoSessionCached | Self::Decryption(_))
    }
}

/// Failures of the optional socket agent. Never surfaced past the engine.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Socket agent unavailable: {0}")]
    Unavailable(#[from] io::Error),

    #[error("Socket agent timed out")]
    Timeout,

    #[error("Socket agent protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
