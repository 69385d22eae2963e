//! # session-split
//!
//! Caches a short-lived vault session token between CLI invocations without
//! ever writing it, or the key protecting it, to disk in the clear.
//!
//! ## Flow
//!
//! ```text
//!   secret ──encrypt(one-time passphrase)──▶ envelope
//!                                              │ passphrase preset in gpg-agent
//!                                              │ under the envelope's S2K salt
//!                                              ▼
//!                        de-armor ─▶ hex ─▶ split(N)
//!                                              │
//!              ┌───────────────────────────────┼───────────────────────┐
//!              ▼                               ▼                       ▼
//!        temp file (0400)              agent value "share"     socket agent slot
//!   path kept encrypted in the                                  (N = 3 only)
//!   agent value "locator"
//! ```
//!
//! `get` reverses this; anything short of a clean reassembly is a miss and
//! the caller re-authenticates.
//!
//! ## Modules
//! - `engine`: `SessionCache::put` / `get` / `load`
//! - `cipher`, `agent`, `socket`: the three collaborators, each behind a trait
//! - `envelope`, `partition`: armor, packet framing and share splitting

pub mod agent;
pub mod cipher;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod partition;
pub mod process;
pub mod secret;
pub mod socket;
pub mod util;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use engine::{SessionCache, StoredSession};
pub use error::CacheError;
pub use secret::SessionSecret;
