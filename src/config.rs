//! Configuration management for session-split.
//!
//! Configuration can be set via environment variables:
//! - `SESSION_SPLIT_GPG` - Optional. gpg executable. Defaults to `gpg`.
//! - `SESSION_SPLIT_AGENT_CLIENT` - Optional. Agent client. Defaults to `gpg-connect-agent`.
//! - `SESSION_SPLIT_GNUPG_HOME` - Optional. Passed as `--homedir` to both tools.
//! - `SESSION_SPLIT_PRESET_TTL` - Optional. Passphrase preset timeout in seconds. Defaults to `-1` (agent default).
//! - `SESSION_SPLIT_INTERACTIVE` - Optional. Allow pinentry prompts on decrypt. Defaults to `true`.
//! - `SESSION_SPLIT_SHARE_DIR` - Optional. Directory for temp-file shares. Defaults to the runtime dir.
//! - `SESSION_SPLIT_SOCKET` - Optional. Socket agent path. Defaults to `<runtime dir>/agent.sock`.
//! - `SESSION_SPLIT_SOCKET_ENABLED` - Optional. Use the socket agent when reachable. Defaults to `true`.
//! - `SESSION_SPLIT_SOCKET_AUTOSTART` - Optional. Start the socket agent before `put`. Defaults to `false`.
//! - `SESSION_SPLIT_SOCKET_TIMEOUT_MS` - Optional. Socket agent timeout. Defaults to `500`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::util::{env_var_bool, runtime_dir};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Socket agent configuration.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Filesystem path of the agent socket
    pub path: PathBuf,

    /// Whether to use the socket agent at all
    pub enabled: bool,

    /// Start `session-split agent` before `put` when the socket is missing
    pub autostart: bool,

    /// Connect/read timeout for one request
    pub timeout: Duration,
}

/// Session cache configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// gpg executable (cipher service)
    pub gpg_program: PathBuf,

    /// gpg-connect-agent executable (passphrase cache and key/value store)
    pub agent_client_program: PathBuf,

    /// GnuPG home directory override
    pub gnupg_home: Option<PathBuf>,

    /// Timeout handed to PRESET_PASSPHRASE; -1 leaves expiry to the agent
    pub preset_ttl: i64,

    /// Whether decryption may fall back to an interactive pinentry prompt
    pub interactive: bool,

    /// Directory holding the temp-file share
    pub share_dir: PathBuf,

    /// Socket agent configuration
    pub socket: SocketConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let runtime = runtime_dir();

        let gpg_program = std::env::var("SESSION_SPLIT_GPG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("gpg"));

        let agent_client_program = std::env::var("SESSION_SPLIT_AGENT_CLIENT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("gpg-connect-agent"));

        let gnupg_home = std::env::var("SESSION_SPLIT_GNUPG_HOME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let preset_ttl = std::env::var("SESSION_SPLIT_PRESET_TTL")
            .unwrap_or_else(|_| "-1".to_string())
            .trim()
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("SESSION_SPLIT_PRESET_TTL".to_string(), format!("{}", e))
            })?;

        let share_dir = std::env::var("SESSION_SPLIT_SHARE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| runtime.clone());

        let timeout_ms: u64 = std::env::var("SESSION_SPLIT_SOCKET_TIMEOUT_MS")
            .unwrap_or_else(|_| "500".to_string())
            .trim()
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue(
                    "SESSION_SPLIT_SOCKET_TIMEOUT_MS".to_string(),
                    format!("{}", e),
                )
            })?;

        let socket = SocketConfig {
            path: std::env::var("SESSION_SPLIT_SOCKET")
                .map(PathBuf::from)
                .unwrap_or_else(|_| runtime.join("agent.sock")),
            enabled: env_var_bool("SESSION_SPLIT_SOCKET_ENABLED", true),
            autostart: env_var_bool("SESSION_SPLIT_SOCKET_AUTOSTART", false),
            timeout: Duration::from_millis(timeout_ms),
        };

        Ok(Self {
            gpg_program,
            agent_client_program,
            gnupg_home,
            preset_ttl,
            interactive: env_var_bool("SESSION_SPLIT_INTERACTIVE", true),
            share_dir,
            socket,
        })
    }

    /// Create a config rooted in `dir` (useful for testing).
    pub fn for_dir(dir: &Path) -> Self {
        Self {
            gpg_program: PathBuf::from("gpg"),
            agent_client_program: PathBuf::from("gpg-connect-agent"),
            gnupg_home: None,
            preset_ttl: -1,
            interactive: false,
            share_dir: dir.join("shares"),
            socket: SocketConfig {
                path: dir.join("agent.sock"),
                enabled: true,
                autostart: false,
                timeout: Duration::from_millis(500),
            },
        }
    }

    /// `--homedir` arguments for the gpg tools, if a home override is set.
    pub fn homedir_args(&self) -> Vec<String> {
        match &self.gnupg_home {
            Some(home) => vec!["--homedir".to_string(), home.to_string_lossy().to_string()],
            None => Vec::new(),
        }
    }
}
