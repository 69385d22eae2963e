//! In-memory stand-ins for gpg, gpg-agent and the socket agent.
//!
//! `FakeCipher` writes real OpenPGP framing (a salted session key packet
//! followed by an encrypted data packet) so cache-key extraction and packet
//! walking run on the same code paths as with gpg. Decryption looks the
//! passphrase up in the shared `MemoryAgent`, the way gpg asks gpg-agent.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::agent::AgentStore;
use crate::cipher::Cipher;
use crate::envelope::{armor, packet, CacheKey, Envelope};
use crate::error::{CacheError, Result, SocketError};
use crate::secret::Passphrase;
use crate::socket::SocketBackend;

const TAG_ENCRYPTED_DATA: u8 = 18;
const TAG_LEN: usize = 32;

#[derive(Default)]
struct AgentState {
    presets: HashMap<String, String>,
    preset_log: Vec<String>,
    values: HashMap<String, String>,
    rejected_values: HashSet<String>,
}

/// Passphrase cache plus named values, shared between clones.
#[derive(Clone, Default)]
pub struct MemoryAgent {
    state: Arc<Mutex<AgentState>>,
}

impl MemoryAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Passphrase cached under `cache_id`, decoded from its hex form.
    pub fn passphrase_for(&self, cache_id: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        let hex_value = state.presets.get(cache_id)?;
        String::from_utf8(hex::decode(hex_value).ok()?).ok()
    }

    /// Every passphrase ever preset, in hex.
    pub fn preset_log(&self) -> Vec<String> {
        self.state.lock().unwrap().preset_log.clone()
    }

    /// Simulate the agent expiring its cached passphrases.
    pub fn evict_passphrases(&self) {
        self.state.lock().unwrap().presets.clear();
    }

    pub fn value(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().values.get(name).cloned()
    }

    pub fn set_value(&self, name: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .values
            .insert(name.to_string(), value.to_string());
    }

    /// Make every later `put_value(name, ..)` fail.
    pub fn reject_value(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected_values
            .insert(name.to_string());
    }

    pub fn values(&self) -> Vec<String> {
        self.state.lock().unwrap().values.values().cloned().collect()
    }
}

#[async_trait]
impl AgentStore for MemoryAgent {
    async fn preset_passphrase(&self, key: &CacheKey, passphrase_hex: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .presets
            .insert(key.agent_cache_id(), passphrase_hex.to_string());
        state.preset_log.push(passphrase_hex.to_string());
        Ok(())
    }

    async fn get_value(&self, name: &str) -> Result<Option<String>> {
        Ok(self.value(name))
    }

    async fn put_value(&self, name: &str, value: &str) -> Result<()> {
        if self.state.lock().unwrap().rejected_values.contains(name) {
            return Err(CacheError::Agent(format!("PUTVAL {} failed", name)));
        }
        self.set_value(name, value);
        Ok(())
    }
}

/// Keyed XOR stream with a SHA-256 integrity tag. Not a real cipher; just
/// enough to fail loudly on wrong passphrases and damaged ciphertext.
pub struct FakeCipher {
    agent: MemoryAgent,
    fail_encrypt: bool,
}

impl FakeCipher {
    pub fn new(agent: MemoryAgent) -> Self {
        Self {
            agent,
            fail_encrypt: false,
        }
    }

    pub fn failing(agent: MemoryAgent) -> Self {
        Self {
            agent,
            fail_encrypt: true,
        }
    }

    fn key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        hasher.update(salt);
        hasher.finalize().into()
    }

    fn xor_stream(key: &[u8; 32], data: &[u8]) -> Vec<u8> {
        data.chunks(32)
            .enumerate()
            .flat_map(|(i, chunk)| {
                let mut hasher = Sha256::new();
                hasher.update(key);
                hasher.update((i as u64).to_be_bytes());
                let block: [u8; 32] = hasher.finalize().into();
                chunk
                    .iter()
                    .zip(block)
                    .map(|(a, b)| a ^ b)
                    .collect::<Vec<u8>>()
            })
            .collect()
    }

    fn tag(key: &[u8; 32], ciphertext: &[u8]) -> [u8; TAG_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(ciphertext);
        hasher.finalize().into()
    }
}

#[async_trait]
impl Cipher for FakeCipher {
    async fn encrypt(&self, plaintext: &[u8], passphrase: &Passphrase) -> Result<Envelope> {
        if self.fail_encrypt {
            return Err(CacheError::Encryption("cipher service unavailable".to_string()));
        }

        let mut salt = [0u8; packet::SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = Self::key(passphrase.as_str(), &salt);

        // v4 session key packet: version, AES256, iterated+salted S2K, SHA256
        let mut session = vec![4, 9, 3, 8];
        session.extend_from_slice(&salt);
        session.push(0xff);

        let ciphertext = Self::xor_stream(&key, plaintext);
        let mut data_body = vec![1];
        data_body.extend_from_slice(&ciphertext);
        data_body.extend_from_slice(&Self::tag(&key, &ciphertext));

        let mut out = packet::new_format_header(packet::TAG_SYMKEY_ESK, session.len());
        out.extend_from_slice(&session);
        let data_header = packet::new_format_header(TAG_ENCRYPTED_DATA, data_body.len());
        out.extend_from_slice(&data_header);
        out.extend_from_slice(&data_body);

        Ok(armor::armor(&out))
    }

    async fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let fail = |msg: &str| CacheError::Decryption(msg.to_string());

        let data = armor::unarmor(envelope).map_err(|e| fail(&e.to_string()))?;
        let packets = packet::walk(&data).map_err(|e| fail(&e.to_string()))?;
        let salt = packet::symkey_salt(&data).map_err(|e| fail(&e.to_string()))?;

        let cache_id = CacheKey::from_salt(salt).agent_cache_id();
        let passphrase = self
            .agent
            .passphrase_for(&cache_id)
            .ok_or_else(|| fail("no cached passphrase"))?;
        let key = Self::key(&passphrase, &salt);

        // like gpg, refuse anything after the encrypted data packet
        let body = match packets.as_slice() {
            [_, data] if data.tag == TAG_ENCRYPTED_DATA => &data.body,
            _ => return Err(fail("unexpected packet sequence")),
        };
        if body.len() < 1 + TAG_LEN || body[0] != 1 {
            return Err(fail("bad encrypted data packet"));
        }
        let (ciphertext, tag) = body[1..].split_at(body.len() - 1 - TAG_LEN);
        if Self::tag(&key, ciphertext) != tag {
            return Err(fail("integrity check failed"));
        }

        Ok(Self::xor_stream(&key, ciphertext))
    }
}

/// One-slot socket agent that can be switched on and off.
#[derive(Clone)]
pub struct MemorySocket {
    available: Arc<AtomicBool>,
    reject_puts: Arc<AtomicBool>,
    fail_gets: Arc<AtomicBool>,
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemorySocket {
    pub fn new(available: bool) -> Self {
        Self {
            available: Arc::new(AtomicBool::new(available)),
            reject_puts: Arc::new(AtomicBool::new(false)),
            fail_gets: Arc::new(AtomicBool::new(false)),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Stay reachable but fail every `put`.
    pub fn reject_puts(&self) {
        self.reject_puts.store(true, Ordering::SeqCst);
    }

    /// Stay reachable but fail every `get`.
    pub fn fail_gets(&self) {
        self.fail_gets.store(true, Ordering::SeqCst);
    }

    pub fn blob(&self) -> Option<Vec<u8>> {
        self.slot.lock().unwrap().clone()
    }

    fn check(&self) -> std::result::Result<(), SocketError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SocketError::Unavailable(std::io::Error::from(
                std::io::ErrorKind::NotFound,
            )))
        }
    }
}

#[async_trait]
impl SocketBackend for MemorySocket {
    async fn probe(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get(&self) -> std::result::Result<Option<Vec<u8>>, SocketError> {
        self.check()?;
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(SocketError::Timeout);
        }
        Ok(self.blob())
    }

    async fn put(&self, blob: &[u8]) -> std::result::Result<(), SocketError> {
        self.check()?;
        if self.reject_puts.load(Ordering::SeqCst) {
            return Err(SocketError::Protocol("PUT refused".to_string()));
        }
        *self.slot.lock().unwrap() = Some(blob.to_vec());
        Ok(())
    }
}

/// Whether `needle` occurs anywhere in `haystack`.
pub fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::extract_cache_key;

    #[tokio::test]
    async fn fake_cipher_round_trips_through_agent() {
        let agent = MemoryAgent::new();
        let cipher = FakeCipher::new(agent.clone());
        let passphrase = Passphrase::generate();

        let envelope = cipher.encrypt(b"sessionABC123", &passphrase).await.unwrap();
        let key = extract_cache_key(&envelope).unwrap();

        assert!(cipher.decrypt(&envelope).await.is_err());
        agent
            .preset_passphrase(&key, &passphrase.to_hex())
            .await
            .unwrap();
        assert_eq!(cipher.decrypt(&envelope).await.unwrap(), b"sessionABC123");
    }
}
