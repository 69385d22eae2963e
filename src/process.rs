//! Helpers for driving the external gpg tools.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::Config;
use crate::error::{CacheError, Result};

/// Spawn `program` with `args`, feed `stdin_data` on stdin and collect output.
///
/// Secrets go through stdin so they never show up in the process table.
pub async fn run_with_stdin<I, S>(
    program: &Path,
    args: I,
    stdin_data: &[u8],
) -> std::io::Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        // The child may exit early (bad arguments); its status says more than EPIPE.
        if let Err(e) = stdin.write_all(stdin_data).await {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e);
            }
        }
        drop(stdin);
    }

    child.wait_with_output().await
}

/// Last non-empty stderr line, for error messages.
pub fn stderr_summary(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("no diagnostic output")
        .to_string()
}

/// Resolve `program` the way the shell would: as given if it contains a path
/// separator, otherwise by searching `$PATH`.
pub fn find_in_path(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return is_executable(program).then(|| program.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Fail with [`CacheError::MissingTool`] unless both gpg tools are installed.
pub fn ensure_tools(config: &Config) -> Result<()> {
    for tool in [&config.gpg_program, &config.agent_client_program] {
        if find_in_path(tool).is_none() {
            return Err(CacheError::MissingTool(tool.display().to_string()));
        }
    }
    Ok(())
}

/// Map a spawn failure to `MissingTool` when the executable is absent.
pub fn spawn_error(
    program: &Path,
    err: std::io::Error,
    fallback: fn(String) -> CacheError,
) -> CacheError {
    if err.kind() == std::io::ErrorKind::NotFound {
        CacheError::MissingTool(program.display().to_string())
    } else {
        fallback(format!("failed to run {}: {}", program.display(), err))
    }
}
