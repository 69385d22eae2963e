//! `gpg` as the cipher service.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use super::Cipher;
use crate::config::Config;
use crate::envelope::Envelope;
use crate::error::{CacheError, Result};
use crate::process::{run_with_stdin, spawn_error, stderr_summary};
use crate::secret::Passphrase;

/// Symmetric encryption through the `gpg` executable.
///
/// The passphrase and plaintext share one stdin pipe: gpg reads the
/// passphrase up to the first newline from `--passphrase-fd 0` and treats the
/// rest as the message.
#[derive(Debug, Clone)]
pub struct GpgCipher {
    program: PathBuf,
    homedir_args: Vec<String>,
    interactive: bool,
}

impl GpgCipher {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.gpg_program.clone(),
            homedir_args: config.homedir_args(),
            interactive: config.interactive,
        }
    }

    fn encrypt_args(&self) -> Vec<String> {
        let mut args = self.homedir_args.clone();
        args.extend(
            [
                "--batch",
                "--quiet",
                "--yes",
                "--no-tty",
                "--armor",
                "--symmetric",
                "--cipher-algo",
                "AES256",
                "--s2k-mode",
                "3",
                "--pinentry-mode",
                "loopback",
                "--passphrase-fd",
                "0",
                "--output",
                "-",
            ]
            .map(String::from),
        );
        args
    }

    fn decrypt_args(&self) -> Vec<String> {
        let mut args = self.homedir_args.clone();
        args.extend(["--batch", "--quiet"].map(String::from));
        if !self.interactive {
            args.extend(["--no-tty", "--pinentry-mode", "cancel"].map(String::from));
        }
        args.extend(["--decrypt", "--output", "-"].map(String::from));
        args
    }
}

#[async_trait]
impl Cipher for GpgCipher {
    async fn encrypt(&self, plaintext: &[u8], passphrase: &Passphrase) -> Result<Envelope> {
        let capacity = passphrase.as_str().len() + 1 + plaintext.len();
        let mut input = Zeroizing::new(Vec::with_capacity(capacity));
        input.extend_from_slice(passphrase.as_str().as_bytes());
        input.push(b'\n');
        input.extend_from_slice(plaintext);

        let output = run_with_stdin(&self.program, self.encrypt_args(), &input)
            .await
            .map_err(|e| spawn_error(&self.program, e, CacheError::Encryption))?;

        if !output.status.success() {
            return Err(CacheError::Encryption(format!(
                "gpg exited with {}: {}",
                output.status,
                stderr_summary(&output)
            )));
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|_| CacheError::Encryption("gpg produced non-ASCII armor".to_string()))?;
        debug!("gpg produced {} bytes of armor", text.len());
        Ok(Envelope::new(text))
    }

    async fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let mut output =
            run_with_stdin(&self.program, self.decrypt_args(), envelope.as_str().as_bytes())
                .await
                .map_err(|e| spawn_error(&self.program, e, CacheError::Decryption))?;

        // gpg streams plaintext before it notices truncation, so stdout is only
        // trusted on a clean exit.
        if !output.status.success() {
            output.stdout.zeroize();
            return Err(CacheError::Decryption(format!(
                "gpg exited with {}: {}",
                output.status,
                stderr_summary(&output)
            )));
        }

        Ok(output.stdout)
    }
}
