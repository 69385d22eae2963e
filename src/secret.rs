//! In-memory secret values. Both types wipe their buffers on drop and never
//! print their contents through `Debug`.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

/// Entropy of a generated passphrase (256 bits).
pub const PASSPHRASE_ENTROPY_BYTES: usize = 32;

/// The session token being cached. No structure is assumed.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSecret(Zeroizing<Vec<u8>>);

impl SessionSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SessionSecret {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl From<&str> for SessionSecret {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionSecret(<{} bytes>)", self.0.len())
    }
}

/// One-time symmetric passphrase. Generated fresh for every encryption.
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    /// 32 random bytes rendered as unpadded base64url (43 ASCII characters).
    pub fn generate() -> Self {
        let mut bytes = [0u8; PASSPHRASE_ENTROPY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let encoded = URL_SAFE_NO_PAD.encode(bytes);
        bytes.zeroize();
        Self(Zeroizing::new(encoded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex of the passphrase's ASCII bytes, as PRESET_PASSPHRASE expects it.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0.as_bytes()))
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}
