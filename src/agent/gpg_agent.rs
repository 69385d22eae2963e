//! gpg-agent reached through `gpg-connect-agent`.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;
use zeroize::Zeroizing;

use super::assuan::{self, Reply};
use super::AgentStore;
use crate::config::Config;
use crate::envelope::CacheKey;
use crate::error::{CacheError, Result};
use crate::process::{run_with_stdin, spawn_error, stderr_summary};

/// Talks to gpg-agent by piping Assuan commands into `gpg-connect-agent`.
///
/// Commands go over stdin, so the passphrase hex in PRESET_PASSPHRASE is not
/// visible in the process table. PRESET_PASSPHRASE needs
/// `allow-preset-passphrase` in `gpg-agent.conf`.
#[derive(Debug, Clone)]
pub struct GpgAgentStore {
    program: PathBuf,
    homedir_args: Vec<String>,
    preset_ttl: i64,
}

impl GpgAgentStore {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.agent_client_program.clone(),
            homedir_args: config.homedir_args(),
            preset_ttl: config.preset_ttl,
        }
    }

    /// Run `commands` in one agent session and return one reply per command.
    async fn transact(&self, commands: &[&str]) -> Result<Vec<Reply>> {
        let mut script = Zeroizing::new(String::new());
        for command in commands {
            script.push_str(command);
            script.push('\n');
        }
        script.push_str("/bye\n");

        let output = run_with_stdin(&self.program, &self.homedir_args, script.as_bytes())
            .await
            .map_err(|e| spawn_error(&self.program, e, CacheError::Agent))?;

        let transcript = Zeroizing::new(String::from_utf8_lossy(&output.stdout).to_string());
        let replies = assuan::parse_replies(&transcript);
        if replies.len() < commands.len() {
            return Err(CacheError::Agent(format!(
                "agent answered {} of {} commands: {}",
                replies.len(),
                commands.len(),
                stderr_summary(&output)
            )));
        }
        Ok(replies)
    }

    async fn single(&self, command: &str) -> Result<Reply> {
        let mut replies = self.transact(&[command]).await?;
        Ok(replies.remove(0))
    }
}

#[async_trait]
impl AgentStore for GpgAgentStore {
    async fn preset_passphrase(&self, key: &CacheKey, passphrase_hex: &str) -> Result<()> {
        let command = Zeroizing::new(format!(
            "PRESET_PASSPHRASE {} {} {}",
            key.agent_cache_id(),
            self.preset_ttl,
            passphrase_hex
        ));
        match self.single(&command).await? {
            Reply::Ok(_) => {
                debug!("Preset passphrase for cache key {}", key);
                Ok(())
            }
            Reply::Err { code, message } => Err(CacheError::Agent(format!(
                "PRESET_PASSPHRASE failed ({}: {}); is allow-preset-passphrase enabled?",
                code, message
            ))),
        }
    }

    async fn get_value(&self, name: &str) -> Result<Option<String>> {
        let command = format!("GETVAL {}", assuan::escape(name.as_bytes()));
        let reply = self.single(&command).await?;
        if reply.is_no_data() {
            return Ok(None);
        }
        match reply {
            Reply::Ok(data) => String::from_utf8(data)
                .map(Some)
                .map_err(|_| CacheError::Agent(format!("value {} is not UTF-8", name))),
            Reply::Err { code, message } => Err(CacheError::Agent(format!(
                "GETVAL {} failed ({}: {})",
                name, code, message
            ))),
        }
    }

    async fn put_value(&self, name: &str, value: &str) -> Result<()> {
        let command = format!(
            "PUTVAL {} {}",
            assuan::escape(name.as_bytes()),
            assuan::escape(value.as_bytes())
        );
        match self.single(&command).await? {
            Reply::Ok(_) => Ok(()),
            Reply::Err { code, message } => Err(CacheError::Agent(format!(
                "PUTVAL {} failed ({}: {})",
                name, code, message
            ))),
        }
    }
}
