//! Symmetric cipher service seam.
//!
//! The engine only needs passphrase-based encryption into an armored envelope
//! and decryption that relies on the agent already holding the passphrase.

mod gpg;

pub use gpg::GpgCipher;

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::secret::Passphrase;

#[async_trait]
pub trait Cipher: Send + Sync {
    /// Encrypt `plaintext` under `passphrase` into an armored envelope.
    ///
    /// Fails with [`CacheError::Encryption`](crate::error::CacheError::Encryption).
    async fn encrypt(&self, plaintext: &[u8], passphrase: &Passphrase) -> Result<Envelope>;

    /// Decrypt an envelope. The passphrase is supplied out of band by the agent.
    ///
    /// Fails with [`CacheError::Decryption`](crate::error::CacheError::Decryption).
    async fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>>;
}
