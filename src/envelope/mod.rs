//! Envelopes: armored symmetric ciphertext and the cache key bound to it.
//!
//! The agent caches symmetric passphrases under `S<salt>`, where the salt is
//! the 8-byte S2K salt of the envelope's session key packet. Because the salt
//! travels inside the envelope, the agent can find the passphrase again at
//! decryption time without the passphrase ever being stored next to it.

pub mod armor;
pub mod packet;

use std::fmt;

use crate::error::{CacheError, Result};

/// ASCII-armored ciphertext of a value.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope(String);

impl Envelope {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Hex of the armored text, the form stored in the agent key/value store.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| CacheError::MalformedEnvelope(format!("invalid hex: {}", e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| CacheError::MalformedEnvelope("envelope is not UTF-8".to_string()))?;
        Ok(Self(text))
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Envelope").field(&self.0.len()).finish()
    }
}

/// Non-secret identifier binding an envelope to its cached passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    salt: [u8; packet::SALT_LEN],
}

/// Prefix the agent uses for salt-addressed symmetric passphrases.
pub const SYMMETRIC_CACHE_PREFIX: &str = "S";

impl CacheKey {
    pub fn from_salt(salt: [u8; packet::SALT_LEN]) -> Self {
        Self { salt }
    }

    /// 16 uppercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.salt)
    }

    /// Cache id as the agent addresses it (`S` + salt hex).
    pub fn agent_cache_id(&self) -> String {
        format!("{}{}", SYMMETRIC_CACHE_PREFIX, self.to_hex())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Read the cache key out of an envelope's session key packet.
pub fn extract_cache_key(envelope: &Envelope) -> Result<CacheKey> {
    let data = armor::unarmor(envelope)?;
    packet::symkey_salt(&data).map(CacheKey::from_salt)
}
