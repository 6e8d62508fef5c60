// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Crash-Safe File I/O Primitives
//!
//! Every persistence component in the plugin writes through these helpers:
//! write to `<path>.tmp.<pid>.<random>`, set the file mode, then rename onto
//! the final path. Rename is atomic on POSIX, so concurrent readers never
//! observe a half-written file. On platforms where rename-over-existing
//! fails, the fallback is unlink-then-rename — a small non-atomic window,
//! accepted as a documented tradeoff.
//!
//! Corrupt files are never deleted: [`backup_corrupt_file`] moves them aside
//! to `<path>.corrupt.<timestamp>-<random>` so operators can inspect the
//! corruption after the fact.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Mode for single-user state/secret files.
pub const FILE_MODE_PRIVATE: u32 = 0o600;

/// Mode for plugin-owned state directories.
pub const DIR_MODE_PRIVATE: u32 = 0o700;

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    path.with_file_name(format!(
        "{file_name}.tmp.{}.{}",
        std::process::id(),
        &suffix[..8]
    ))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    // Best-effort: a filesystem that rejects chmod must not fail the write.
    if let Err(error) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        debug!(path = %path.display(), %error, "chmod failed (ignored)");
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

fn rename_with_fallback(temp: &Path, path: &Path) -> io::Result<()> {
    match std::fs::rename(temp, path) {
        Ok(()) => Ok(()),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::AlreadyExists | io::ErrorKind::PermissionDenied
            ) =>
        {
            // Rename-over-existing is not atomic everywhere. Unlink first and
            // retry, accepting the brief window where the target is absent.
            let _ = std::fs::remove_file(path);
            std::fs::rename(temp, path)
        }
        Err(error) => Err(error),
    }
}

/// Write `content` to `path` atomically with the given file mode.
///
/// The target either keeps its previous content or holds the full new
/// content; readers never see a partial write. The temp file is cleaned up
/// on failure.
pub fn write_file_atomic(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp = temp_path_for(path);
    std::fs::write(&temp, content)?;
    set_mode(&temp, mode);

    if let Err(error) = rename_with_fallback(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(error);
    }
    Ok(())
}

/// Serialize `value` as pretty JSON (with trailing newline) and write it
/// atomically.
pub fn write_json_file_atomic<T: Serialize>(path: &Path, value: &T, mode: u32) -> io::Result<()> {
    let mut json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    json.push(b'\n');
    write_file_atomic(path, &json, mode)
}

/// Async variant of [`write_file_atomic`] for callers off the hot path.
pub async fn write_file_atomic_async(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp = temp_path_for(path);
    tokio::fs::write(&temp, content).await?;
    set_mode(&temp, mode);

    let rename_result = match tokio::fs::rename(&temp, path).await {
        Ok(()) => Ok(()),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::AlreadyExists | io::ErrorKind::PermissionDenied
            ) =>
        {
            let _ = tokio::fs::remove_file(path).await;
            tokio::fs::rename(&temp, path).await
        }
        Err(error) => Err(error),
    };

    if let Err(error) = rename_result {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(error);
    }
    Ok(())
}

/// Async variant of [`write_json_file_atomic`].
pub async fn write_json_file_atomic_async<T: Serialize>(
    path: &Path,
    value: &T,
    mode: u32,
) -> io::Result<()> {
    let mut json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    json.push(b'\n');
    write_file_atomic_async(path, &json, mode).await
}

/// Move a corrupt persisted file aside instead of deleting it.
///
/// Returns the backup path, or `None` when the file disappeared underneath
/// us (nothing to quarantine).
pub fn backup_corrupt_file(path: &Path) -> io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    let backup = path.with_file_name(format!(
        "{file_name}.corrupt.{}-{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..8]
    ));

    std::fs::rename(path, &backup)?;
    warn!(
        original = %path.display(),
        backup = %backup.display(),
        "Quarantined corrupt state file"
    );
    Ok(Some(backup))
}

/// Create `path` (and parents) as a private plugin state directory (0700).
pub fn ensure_private_dir(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)?;
    set_mode(path, DIR_MODE_PRIVATE);
    Ok(())
}
