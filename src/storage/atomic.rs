//! Crash-safe file replacement.
//!
//! Writers never touch the target file in place: data goes to a temp file
//! in the same directory, is fsynced, then renamed over the target. A reader
//! sees either the old file or the new one.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Replaces `path` with `data` atomically.
///
/// The parent directory is created when missing. The temp file is removed
/// if any step before the rename fails.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    // Same directory keeps the rename on one filesystem.
    let mut tmp = tempfile::Builder::new()
        .prefix(".mailsift-")
        .suffix(".tmp")
        .tempfile_in(parent)?;

    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|e| e.error)?;

    sync_directory(parent)
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Whether `name` looks like a temp file left behind by [`atomic_write`].
pub fn is_leftover_temp(name: &str) -> bool {
    name.starts_with(".mailsift-") && name.ends_with(".tmp")
}

/// Removes temp files a crashed writer left next to `path`.
///
/// Returns how many were removed. Failures are logged and skipped.
pub fn sweep_leftovers(path: &Path) -> usize {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !is_leftover_temp(&name.to_string_lossy()) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(file = %entry.path().display(), error = %e, "Could not remove leftover temp file")
            }
        }
    }
    removed
}
