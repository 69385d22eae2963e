//! Agent passphrase cache and key/value store.
//!
//! gpg-agent does two jobs here: it holds the preset passphrase for each
//! envelope (keyed by the envelope's salt) and it keeps two small named values,
//! the locator record and one share.

pub mod assuan;
mod gpg_agent;

pub use gpg_agent::GpgAgentStore;

use async_trait::async_trait;

use crate::envelope::CacheKey;
use crate::error::Result;

/// Agent value holding the hex-encoded, encrypted share file path.
pub const LOCATOR_KEY: &str = "locator";

/// Agent value holding the middle share.
pub const SHARE_KEY: &str = "share";

#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Cache `passphrase_hex` under the envelope's cache key. Presetting the
    /// same key again replaces the cached passphrase; expiry is the agent's.
    async fn preset_passphrase(&self, key: &CacheKey, passphrase_hex: &str) -> Result<()>;

    /// Read a named value; `None` when it was never set.
    async fn get_value(&self, name: &str) -> Result<Option<String>>;

    /// Store a named value, replacing any previous one.
    async fn put_value(&self, name: &str, value: &str) -> Result<()>;
}
