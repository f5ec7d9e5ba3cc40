//! Atomic PID file I/O and stale-file discard.
//!
//! Format: single-line text file containing the child's PID.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::shutdown::kill_pid;

/// Write a PID file atomically using temp file + rename.
///
/// # Atomicity
/// 1. Write to `<path>.tmp`
/// 2. Rename to `<path>` (atomic on Unix/macOS)
pub fn write_pidfile(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("pid.tmp");
    fs::write(&temp_path, format!("{pid}\n"))?;
    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Read the PID recorded in a PID file.
pub fn read_pidfile(path: &Path) -> io::Result<u32> {
    let content = fs::read_to_string(path)?;
    content
        .trim()
        .parse::<u32>()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "missing or invalid PID"))
}

/// Delete a PID file (idempotent - no error if missing).
pub fn delete_pidfile(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Check if a PID exists (without verifying which program it runs).
///
/// Uses `kill` with the null signal, which checks existence without
/// delivering anything.
#[cfg(unix)]
pub fn pid_exists(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true, // exists but we lack permission
    }
}

#[cfg(not(unix))]
pub fn pid_exists(_pid: u32) -> bool {
    false // Not implemented on non-Unix
}

/// Discard a stale PID file left by a previous unclean exit.
///
/// If the recorded PID is still alive it is an orphan from a previous
/// run of this service; kill it before removing the file so no two
/// supervisors ever manage the same logical process.
pub async fn discard_stale(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    match read_pidfile(path) {
        Ok(pid) if pid_exists(pid) => {
            warn!(pid = %pid, path = %path.display(), "Stale PID file with live process, killing orphan");
            if let Err(e) = kill_pid(pid).await {
                warn!(pid = %pid, error = %e, "Failed to kill orphan, removing PID file anyway");
            }
        }
        Ok(pid) => {
            debug!(pid = %pid, path = %path.display(), "Removing stale PID file (process gone)");
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Removing malformed PID file");
        }
    }

    delete_pidfile(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn roundtrip_pidfile() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = dir.path().join("engine.pid");

        write_pidfile(&path, 98765).expect("write failed");
        assert!(path.exists());
        assert_eq!(read_pidfile(&path).expect("read failed"), 98765);

        delete_pidfile(&path).expect("delete failed");
        assert!(!path.exists());

        // Second delete should be idempotent
        delete_pidfile(&path).expect("second delete failed");
    }

    #[test]
    fn write_creates_parent_directories() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = dir.path().join("run").join("warden").join("engine.pid");

        write_pidfile(&path, 1234).expect("write failed");
        assert_eq!(read_pidfile(&path).expect("read failed"), 1234);
    }

    #[test]
    fn read_rejects_garbage() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = dir.path().join("engine.pid");
        fs::write(&path, "not-a-pid\n").expect("write failed");

        let err = read_pidfile(&path).expect_err("should reject");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    #[cfg(unix)]
    fn pid_exists_for_self() {
        assert!(pid_exists(std::process::id()));
        assert!(!pid_exists(999_999));
    }

    #[tokio::test]
    async fn discard_stale_removes_dead_pid() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = dir.path().join("engine.pid");
        write_pidfile(&path, 999_999).expect("write failed");

        discard_stale(&path).await.expect("discard failed");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn discard_stale_is_noop_without_file() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = dir.path().join("missing.pid");
        discard_stale(&path).await.expect("discard failed");
    }
}
