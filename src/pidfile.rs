//! Supervisor PID file

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::{CrondogError, Result};

pub const PID_FILE_NAME: &str = "crondog.pid";

/// Null-signal check. EPERM still means the process exists.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

/// Holds `<dir>/crondog.pid` for as long as it lives
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(PID_FILE_NAME)
    }

    /// Record this process. Fails if the file names a live process; a stale
    /// file is replaced.
    pub fn acquire(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = Self::path_in(dir);

        if let Ok(existing) = read_pid(&path) {
            if pid_alive(existing) {
                return Err(CrondogError::AlreadyRunning(existing));
            }
            tracing::warn!(path = %path.display(), pid = existing, "Replacing stale PID file");
        }

        std::fs::write(&path, std::process::id().to_string())?;
        tracing::debug!(path = %path.display(), "PID file written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "Failed to remove PID file: {e}");
        }
    }
}

/// PID of the running supervisor recorded in `dir`
pub fn running_pid(dir: &Path) -> Result<i32> {
    let path = PidFile::path_in(dir);
    let pid = read_pid(&path)?;
    if !pid_alive(pid) {
        return Err(CrondogError::NotRunning(format!(
            "stale PID file {} (pid {pid})",
            path.display()
        )));
    }
    Ok(pid)
}

/// Ask the supervisor recorded in `dir` to shut down
pub fn signal_stop(dir: &Path) -> Result<i32> {
    let pid = running_pid(dir)?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from)?;
    tracing::info!(pid, "Sent SIGTERM to supervisor");
    Ok(pid)
}

fn read_pid(path: &Path) -> Result<i32> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| CrondogError::NotRunning(format!("no PID file at {}", path.display())))?;
    text.trim().parse().map_err(|_| {
        CrondogError::NotRunning(format!("unreadable PID file {}", path.display()))
    })
}
