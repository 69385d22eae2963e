//! Persistence engine: caches a session secret split across three stores.
//!
//! `put` encrypts the secret under a one-time passphrase that only the agent
//! keeps, then cuts the hex of the de-armored envelope into contiguous
//! shares:
//!
//! ```text
//! share 0 -> temp file (0400, path kept encrypted as the locator record)
//! share 1 -> agent value "share"
//! share 2 -> socket agent slot (only when the socket agent is reachable)
//! ```
//!
//! `get` reassembles the shares in that fixed order. A reassembly that does
//! not parse as a complete OpenPGP message (availability changed, or a
//! concurrent `put` landed halfway) is rejected before the cipher sees it.

use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::agent::{AgentStore, GpgAgentStore, LOCATOR_KEY, SHARE_KEY};
use crate::cipher::{Cipher, GpgCipher};
use crate::config::Config;
use crate::envelope::{armor, extract_cache_key, packet, Envelope};
use crate::error::{CacheError, Result};
use crate::partition;
use crate::process::ensure_tools;
use crate::secret::{Passphrase, SessionSecret};
use crate::socket::{SocketBackend, UnixSocketAgent};
use crate::util::{create_private_dir, set_mode};

const SHARE_FILE_PREFIX: &str = "session-split-";
const SHARE_FILE_SUFFIX: &str = ".share";

/// What a successful `put` left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    /// 3 when the socket agent took a share, otherwise 2
    pub share_count: usize,
    /// The temp file holding the first share
    pub share_path: PathBuf,
}

/// Share file created during `put`; removed on drop unless committed.
struct ShareFile {
    path: PathBuf,
    committed: bool,
}

impl ShareFile {
    async fn create(dir: &Path) -> Result<(Self, tokio::fs::File)> {
        create_private_dir(dir).map_err(|e| CacheError::io("create share directory", e))?;

        let name = format!("{}{}{}", SHARE_FILE_PREFIX, Uuid::new_v4(), SHARE_FILE_SUFFIX);
        let path = dir.join(name);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
            .await
            .map_err(|e| CacheError::io("create share file", e))?;

        Ok((
            Self {
                path,
                committed: false,
            },
            file,
        ))
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(mut self) -> PathBuf {
        self.committed = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ShareFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// The session cache, wired to its three collaborators.
pub struct SessionCache {
    cipher: Arc<dyn Cipher>,
    agent: Arc<dyn AgentStore>,
    socket: Option<Arc<dyn SocketBackend>>,
    share_dir: PathBuf,
}

impl SessionCache {
    pub fn new(
        cipher: Arc<dyn Cipher>,
        agent: Arc<dyn AgentStore>,
        socket: Option<Arc<dyn SocketBackend>>,
        share_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cipher,
            agent,
            socket,
            share_dir: share_dir.into(),
        }
    }

    /// Build the gpg-backed cache described by `config`.
    ///
    /// Fails with [`CacheError::MissingTool`] if gpg or gpg-connect-agent is
    /// not installed.
    pub fn from_config(config: &Config) -> Result<Self> {
        ensure_tools(config)?;

        let socket: Option<Arc<dyn SocketBackend>> = if config.socket.enabled {
            Some(Arc::new(UnixSocketAgent::new(&config.socket)))
        } else {
            None
        };

        Ok(Self::new(
            Arc::new(GpgCipher::new(config)),
            Arc::new(GpgAgentStore::new(config)),
            socket,
            config.share_dir.clone(),
        ))
    }

    pub fn share_dir(&self) -> &Path {
        &self.share_dir
    }

    /// The socket backend if it answers right now. Probed once per operation.
    async fn resolve_socket(&self) -> Option<&Arc<dyn SocketBackend>> {
        let socket = self.socket.as_ref()?;
        if socket.probe().await {
            debug!("Socket agent is available");
            Some(socket)
        } else {
            debug!("Socket agent is not available");
            None
        }
    }

    /// Encrypt under a fresh passphrase and hand that passphrase to the agent.
    async fn seal(&self, plaintext: &[u8]) -> Result<Envelope> {
        let passphrase = Passphrase::generate();
        let envelope = self
            .cipher
            .encrypt(plaintext, &passphrase)
            .await
            .map_err(into_encryption_error)?;
        let key = extract_cache_key(&envelope).map_err(into_encryption_error)?;
        self.agent
            .preset_passphrase(&key, &passphrase.to_hex())
            .await
            .map_err(into_encryption_error)?;
        debug!("Sealed {} bytes under cache key {}", plaintext.len(), key);
        Ok(envelope)
    }

    /// Cache `secret`, replacing whatever was cached before.
    ///
    /// Every failure is fatal and reported. A share file created before the
    /// failure is removed again; agent values already overwritten are not
    /// restored, so the previous session is gone either way.
    pub async fn put(&self, secret: &SessionSecret) -> Result<StoredSession> {
        let socket = self.resolve_socket().await;

        let envelope = self.seal(secret.as_bytes()).await?;

        let (share_file, mut file) = ShareFile::create(&self.share_dir).await?;
        debug!("Created share file {}", share_file.path().display());

        let locator = self.seal(share_file.path().as_os_str().as_bytes()).await?;
        self.agent.put_value(LOCATOR_KEY, &locator.to_hex()).await?;
        debug!("Stored locator record");

        let raw = armor::unarmor(&envelope).map_err(into_encryption_error)?;
        let share_data = hex::encode(raw);

        let n = if socket.is_some() { 3 } else { 2 };
        let mut shares = partition::split(share_data.as_bytes(), n);
        if let Some(socket) = socket {
            if let Err(e) = socket.put(&shares[2]).await {
                warn!("Socket agent rejected share, keeping two shares: {}", e);
                shares = partition::split(share_data.as_bytes(), 2);
            }
        }
        let share_count = shares.len();

        file.write_all(&shares[0])
            .await
            .map_err(|e| CacheError::io("write share file", e))?;
        file.sync_all()
            .await
            .map_err(|e| CacheError::io("sync share file", e))?;
        drop(file);

        let agent_share = String::from_utf8_lossy(&shares[1]);
        self.agent.put_value(SHARE_KEY, &agent_share).await?;

        set_mode(share_file.path(), 0o400)
            .map_err(|e| CacheError::io("make share file read-only", e))?;
        let share_path = share_file.commit();

        self.remove_stale_share_files(&share_path).await;

        info!("Cached session in {} shares", share_count);
        Ok(StoredSession {
            share_count,
            share_path,
        })
    }

    /// Reassemble and decrypt the cached secret.
    ///
    /// Fails with [`CacheError::NoSessionCached`] when nothing usable is
    /// cached and [`CacheError::Decryption`] when the shares do not decrypt.
    pub async fn get(&self) -> Result<SessionSecret> {
        let socket = self.resolve_socket().await;

        let path = self.locate_share_file().await?;
        let share_file = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Share file {} is unreadable: {}", path.display(), e);
                return Err(CacheError::NoSessionCached);
            }
        };

        let share_agent = self
            .agent
            .get_value(SHARE_KEY)
            .await
            .map_err(|e| CacheError::Decryption(format!("agent share unavailable: {}", e)))?
            .unwrap_or_default();

        let share_socket = match socket {
            Some(socket) => match socket.get().await {
                Ok(blob) => blob.unwrap_or_default(),
                Err(e) => {
                    warn!("Socket agent share unavailable: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let share_data = partition::join(&[
            share_file.as_slice(),
            share_agent.as_bytes(),
            share_socket.as_slice(),
        ]);

        let data = hex::decode(&share_data)
            .map_err(|e| CacheError::Decryption(format!("shares are not hex: {}", e)))?;
        packet::walk(&data).map_err(|e| {
            CacheError::Decryption(format!("shares do not form one message: {}", e))
        })?;

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(&armor::armor(&data))
                .await
                .map_err(into_decryption_error)?,
        );

        info!("Restored cached session");
        Ok(SessionSecret::new(plaintext.to_vec()))
    }

    /// [`get`](Self::get) with every miss collapsed to `None`.
    pub async fn load(&self) -> Result<Option<SessionSecret>> {
        match self.get().await {
            Ok(secret) => Ok(Some(secret)),
            Err(e) if e.is_miss() => {
                debug!("No usable session cached: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Decrypt the locator record into the share file path.
    async fn locate_share_file(&self) -> Result<PathBuf> {
        let record = match self.agent.get_value(LOCATOR_KEY).await {
            Ok(Some(record)) if !record.trim().is_empty() => record,
            Ok(_) => {
                debug!("No locator record in agent");
                return Err(CacheError::NoSessionCached);
            }
            Err(e) => {
                debug!("Locator record unavailable: {}", e);
                return Err(CacheError::NoSessionCached);
            }
        };

        let envelope = Envelope::from_hex(&record).map_err(|e| {
            debug!("Locator record is not an envelope: {}", e);
            CacheError::NoSessionCached
        })?;

        match self.cipher.decrypt(&envelope).await {
            Ok(bytes) if !bytes.is_empty() => Ok(PathBuf::from(OsString::from_vec(bytes))),
            Ok(_) => Err(CacheError::NoSessionCached),
            Err(e @ CacheError::MissingTool(_)) => Err(e),
            Err(e) => {
                debug!("Locator record does not decrypt: {}", e);
                Err(CacheError::NoSessionCached)
            }
        }
    }

    /// Remove share files left by earlier `put`s. Best effort.
    async fn remove_stale_share_files(&self, keep: &Path) {
        let mut entries = match tokio::fs::read_dir(&self.share_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Could not list share directory: {}", e);
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_share =
                name.starts_with(SHARE_FILE_PREFIX) && name.ends_with(SHARE_FILE_SUFFIX);
            if !is_share || path == keep {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed stale share file {}", path.display()),
                Err(e) => {
                    debug!("Could not remove stale share file {}: {}", path.display(), e)
                }
            }
        }
    }
}

fn into_encryption_error(err: CacheError) -> CacheError {
    match err {
        CacheError::Encryption(_) | CacheError::MissingTool(_) => err,
        other => CacheError::Encryption(other.to_string()),
    }
}

fn into_decryption_error(err: CacheError) -> CacheError {
    match err {
        CacheError::Decryption(_) | CacheError::MissingTool(_) => err,
        other => CacheError::Decryption(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{contains_bytes, FakeCipher, MemoryAgent, MemorySocket};
    use std::os::unix::fs::PermissionsExt;

    struct Harness {
        _dir: tempfile::TempDir,
        agent: MemoryAgent,
        socket: MemorySocket,
        cache: SessionCache,
    }

    fn harness(socket_available: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let agent = MemoryAgent::new();
        let socket = MemorySocket::new(socket_available);
        let cache = SessionCache::new(
            Arc::new(FakeCipher::new(agent.clone())),
            Arc::new(agent.clone()),
            Some(Arc::new(socket.clone())),
            dir.path().join("shares"),
        );
        Harness {
            _dir: dir,
            agent,
            socket,
            cache,
        }
    }

    fn share_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| entries.map(|e| e.unwrap().path()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn round_trip_with_socket_agent() {
        let h = harness(true);
        let stored = h.cache.put(&SessionSecret::from("sessionABC123")).await.unwrap();
        assert_eq!(stored.share_count, 3);
        assert!(h.socket.blob().is_some());

        let secret = h.cache.get().await.unwrap();
        assert_eq!(secret.as_bytes(), b"sessionABC123");
    }

    #[tokio::test]
    async fn round_trip_without_socket_agent() {
        let h = harness(false);
        let stored = h.cache.put(&SessionSecret::from("sessionABC123")).await.unwrap();
        assert_eq!(stored.share_count, 2);
        assert!(h.socket.blob().is_none());

        let secret = h.cache.get().await.unwrap();
        assert_eq!(secret.as_bytes(), b"sessionABC123");
    }

    #[tokio::test]
    async fn round_trip_with_socket_backend_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let agent = MemoryAgent::new();
        let cache = SessionCache::new(
            Arc::new(FakeCipher::new(agent.clone())),
            Arc::new(agent.clone()),
            None,
            dir.path(),
        );
        let secret = SessionSecret::new((0u8..=255).collect::<Vec<u8>>());
        assert_eq!(cache.put(&secret).await.unwrap().share_count, 2);
        assert_eq!(cache.get().await.unwrap(), secret);
    }

    #[tokio::test]
    async fn get_without_put_is_a_miss() {
        let h = harness(true);
        assert!(matches!(h.cache.get().await, Err(CacheError::NoSessionCached)));
        assert!(matches!(h.cache.get().await, Err(CacheError::NoSessionCached)));
        assert!(h.cache.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_locator_is_a_miss() {
        let h = harness(false);
        h.agent.set_value(LOCATOR_KEY, "not hex at all");
        assert!(matches!(h.cache.get().await, Err(CacheError::NoSessionCached)));
    }

    #[tokio::test]
    async fn socket_lost_between_put_and_get_fails_cleanly() {
        let h = harness(true);
        h.cache.put(&SessionSecret::from("sessionABC123")).await.unwrap();

        h.socket.set_available(false);
        let err = h.cache.get().await.unwrap_err();
        assert!(matches!(err, CacheError::Decryption(_)), "{err:?}");
        assert!(h.cache.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn socket_gained_between_put_and_get_fails_cleanly() {
        let h = harness(true);
        h.cache.put(&SessionSecret::from("first")).await.unwrap();
        h.socket.set_available(false);
        h.cache.put(&SessionSecret::from("second")).await.unwrap();

        // the slot still holds the first put's share
        h.socket.set_available(true);
        assert!(h.cache.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn evicted_passphrases_read_as_no_session() {
        let h = harness(true);
        h.cache.put(&SessionSecret::from("sessionABC123")).await.unwrap();

        h.agent.evict_passphrases();
        assert!(matches!(h.cache.get().await, Err(CacheError::NoSessionCached)));
    }

    #[tokio::test]
    async fn share_file_is_read_only_after_put() {
        let h = harness(false);
        let stored = h.cache.put(&SessionSecret::from("sessionABC123")).await.unwrap();

        let mode = std::fs::metadata(&stored.share_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o400);
        let dir_mode = std::fs::metadata(h.cache.share_dir()).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn shared_share_dir_is_refused() {
        let h = harness(false);
        std::fs::create_dir_all(h.cache.share_dir()).unwrap();
        set_mode(h.cache.share_dir(), 0o777).unwrap();

        let err = h.cache.put(&SessionSecret::from("sessionABC123")).await.unwrap_err();
        assert!(matches!(err, CacheError::PersistenceIo { .. }), "{err:?}");
        assert!(share_files(h.cache.share_dir()).is_empty());
        assert!(h.agent.value(SHARE_KEY).is_none());
    }

    #[tokio::test]
    async fn artifacts_hold_neither_secret_nor_passphrase() {
        let h = harness(true);
        let stored = h.cache.put(&SessionSecret::from("sessionABC123")).await.unwrap();

        let mut artifacts = vec![std::fs::read(&stored.share_path).unwrap()];
        artifacts.extend(h.agent.values().into_iter().map(String::into_bytes));
        artifacts.push(h.socket.blob().unwrap());

        let passphrases: Vec<Vec<u8>> = h
            .agent
            .preset_log()
            .iter()
            .map(|hex_pass| hex::decode(hex_pass).unwrap())
            .collect();
        assert_eq!(passphrases.len(), 2);

        for artifact in &artifacts {
            assert!(!contains_bytes(artifact, b"sessionABC123"));
            for passphrase in &passphrases {
                assert!(!contains_bytes(artifact, passphrase));
                assert!(!contains_bytes(artifact, hex::encode(passphrase).as_bytes()));
            }
        }
    }

    #[tokio::test]
    async fn mixed_agent_share_is_never_a_wrong_secret() {
        let h = harness(false);
        h.cache.put(&SessionSecret::from("sessionAAAAAA")).await.unwrap();
        let old_share = h.agent.value(SHARE_KEY).unwrap();

        h.cache.put(&SessionSecret::from("sessionBBBBBB")).await.unwrap();
        h.agent.set_value(SHARE_KEY, &old_share);

        let err = h.cache.get().await.unwrap_err();
        assert!(err.is_miss(), "{err:?}");
    }

    #[tokio::test]
    async fn old_locator_after_new_put_is_a_miss() {
        let h = harness(false);
        h.cache.put(&SessionSecret::from("sessionAAAAAA")).await.unwrap();
        let old_locator = h.agent.value(LOCATOR_KEY).unwrap();

        h.cache.put(&SessionSecret::from("sessionBBBBBB")).await.unwrap();
        h.agent.set_value(LOCATOR_KEY, &old_locator);

        // the old share file was cleaned up by the second put
        assert!(matches!(h.cache.get().await, Err(CacheError::NoSessionCached)));
    }

    #[tokio::test]
    async fn later_put_replaces_earlier_one() {
        let h = harness(true);
        let first = h.cache.put(&SessionSecret::from("first")).await.unwrap();
        let second = h.cache.put(&SessionSecret::from("second")).await.unwrap();

        assert!(!first.share_path.exists());
        assert_eq!(share_files(h.cache.share_dir()), vec![second.share_path]);
        assert_eq!(h.cache.get().await.unwrap().as_bytes(), b"second");
    }

    #[tokio::test]
    async fn failed_encryption_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let agent = MemoryAgent::new();
        let cache = SessionCache::new(
            Arc::new(FakeCipher::failing(agent.clone())),
            Arc::new(agent.clone()),
            None,
            dir.path().join("shares"),
        );

        let err = cache.put(&SessionSecret::from("sessionABC123")).await.unwrap_err();
        assert!(matches!(err, CacheError::Encryption(_)));
        assert!(share_files(cache.share_dir()).is_empty());
        assert!(agent.value(LOCATOR_KEY).is_none());
    }

    #[tokio::test]
    async fn failed_share_store_removes_share_file() {
        let h = harness(false);
        h.agent.reject_value(SHARE_KEY);

        let err = h.cache.put(&SessionSecret::from("sessionABC123")).await.unwrap_err();
        assert!(matches!(err, CacheError::Agent(_)));
        assert!(share_files(h.cache.share_dir()).is_empty());
    }

    #[tokio::test]
    async fn rejected_socket_put_falls_back_to_two_shares() {
        let h = harness(true);
        h.socket.reject_puts();

        let stored = h.cache.put(&SessionSecret::from("sessionABC123")).await.unwrap();
        assert_eq!(stored.share_count, 2);

        // the socket stays reachable and empty at get time
        assert_eq!(h.cache.get().await.unwrap().as_bytes(), b"sessionABC123");
    }

    #[tokio::test]
    async fn failing_socket_get_is_an_empty_share() {
        let h = harness(false);
        h.cache.put(&SessionSecret::from("sessionABC123")).await.unwrap();

        h.socket.set_available(true);
        h.socket.fail_gets();
        assert_eq!(h.cache.get().await.unwrap().as_bytes(), b"sessionABC123");
    }

    #[tokio::test]
    async fn failing_socket_get_after_three_shares_is_a_miss() {
        let h = harness(true);
        h.cache.put(&SessionSecret::from("sessionABC123")).await.unwrap();

        h.socket.fail_gets();
        let err = h.cache.get().await.unwrap_err();
        assert!(matches!(err, CacheError::Decryption(_)), "{err:?}");
    }

    #[tokio::test]
    async fn empty_secret_round_trips() {
        let h = harness(true);
        h.cache.put(&SessionSecret::new(Vec::new())).await.unwrap();
        assert!(h.cache.get().await.unwrap().is_empty());
    }

    /// Needs gpg and gpg-connect-agent on PATH.
    #[tokio::test]
    #[ignore = "requires GnuPG with allow-preset-passphrase"]
    async fn round_trip_through_gnupg() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("gnupg");
        create_private_dir(&home).unwrap();
        std::fs::write(home.join("gpg-agent.conf"), "allow-preset-passphrase\n").unwrap();

        let mut config = Config::for_dir(dir.path());
        config.gnupg_home = Some(home);
        config.socket.enabled = false;

        let cache = SessionCache::from_config(&config).unwrap();
        cache.put(&SessionSecret::from("sessionABC123")).await.unwrap();
        assert_eq!(cache.get().await.unwrap().as_bytes(), b"sessionABC123");
    }
}
