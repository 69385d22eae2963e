//! Shared utility functions used across the codebase.

use std::io;
use std::path::{Path, PathBuf};

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// any other value maps to `false`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Effective user id, used to keep per-user runtime paths apart.
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// Per-user runtime directory: `$XDG_RUNTIME_DIR/session-split`, falling
/// back to `<tmp>/session-split-<euid>`.
pub fn runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("session-split"),
        _ => std::env::temp_dir().join(format!("session-split-{}", effective_uid())),
    }
}

/// Create `dir` (and parents) with owner-only permissions if it is missing,
/// then require that it is private to us.
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(dir) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            std::fs::create_dir_all(dir)?;
            set_mode(dir, 0o700)?;
        }
        Err(e) => return Err(e),
    }
    check_private_dir(dir)
}

/// Fail unless `dir` is a real directory (not a symlink) owned by the
/// effective uid with no group or other permission bits.
pub fn check_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::symlink_metadata(dir)?;
    let refuse = |why: String| -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} {}", dir.display(), why),
        ))
    };

    if !meta.file_type().is_dir() {
        return refuse("is not a directory".to_string());
    }
    if meta.uid() != effective_uid() {
        return refuse(format!("is owned by uid {}", meta.uid()));
    }
    if meta.mode() & 0o077 != 0 {
        return refuse(format!(
            "has mode {:o}, expected no group or other access",
            meta.mode() & 0o777
        ));
    }
    Ok(())
}

pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}
