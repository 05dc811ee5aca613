//! PID-file handling.
//!
//! The PID file is written only after the TCP bind succeeds, so a stale
//! file never shadows a daemon that failed to start. Stale files from a
//! crashed predecessor are cleaned up on the next start.

use std::path::Path;

use tracing::warn;

/// Writes the current process id. Called after the listener is bound.
pub fn write(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, format!("{}\n", std::process::id()))
}

/// Reads the recorded pid, if the file exists and parses.
pub fn read(path: &Path) -> Option<u32> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// Removes the PID file, ignoring a missing file.
pub fn remove(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(?path, error = %e, "failed to remove pid file");
        }
    }
}

/// Removes a PID file left behind by a process that no longer runs.
pub fn clean_stale(path: &Path) {
    let Some(pid) = read(path) else { return };
    if !process_alive(pid) {
        warn!(?path, pid, "removing stale pid file");
        remove(path);
    }
}

fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        write(&path).unwrap();
        assert_eq!(read(&path), Some(std::process::id()));

        remove(&path);
        assert_eq!(read(&path), None);

        // Removing again is a no-op.
        remove(&path);
    }

    #[test]
    fn clean_stale_removes_dead_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        // A pid far beyond pid_max never names a live process.
        std::fs::write(&path, "999999999\n").unwrap();
        clean_stale(&path);
        assert!(!path.exists());
    }

    #[test]
    fn clean_stale_keeps_live_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        write(&path).unwrap();
        clean_stale(&path);
        assert!(path.exists());
    }
}
