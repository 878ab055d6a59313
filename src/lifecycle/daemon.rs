use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::Signal;

use super::signal::{is_alive, send};
use super::{DaemonController, SupervisorError};

const STOP_POLLS: u32 = 20;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The town daemon, tracked by `<town>/daemon/daemon.pid`.
#[derive(Debug, Clone)]
pub struct PidFileDaemon {
    pid_file: PathBuf,
}

impl PidFileDaemon {
    pub fn new(town_root: &Path) -> Self {
        Self {
            pid_file: town_root.join("daemon").join("daemon.pid"),
        }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    fn read_pid(&self) -> Result<Option<u32>, SupervisorError> {
        match std::fs::read_to_string(&self.pid_file) {
            Ok(content) => content.trim().parse::<u32>().map(Some).map_err(|_| {
                SupervisorError::Command(format!(
                    "invalid PID file {}",
                    self.pid_file.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SupervisorError::Command(format!(
                "failed to read {}: {}",
                self.pid_file.display(),
                e
            ))),
        }
    }

    fn remove_pid_file(&self) {
        if let Err(e) = std::fs::remove_file(&self.pid_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {}", self.pid_file.display(), e);
            }
        }
    }
}

impl DaemonController for PidFileDaemon {
    fn status(&self) -> Result<(bool, u32), SupervisorError> {
        match self.read_pid()? {
            Some(pid) if is_alive(pid) => Ok((true, pid)),
            Some(pid) => {
                tracing::debug!(pid, "Stale daemon PID file");
                Ok((false, pid))
            }
            None => Ok((false, 0)),
        }
    }

    /// SIGTERM, wait up to two seconds, then SIGKILL.
    fn stop(&self) -> Result<(), SupervisorError> {
        let pid = self
            .read_pid()?
            .ok_or_else(|| SupervisorError::NotFound(self.pid_file.display().to_string()))?;

        tracing::info!(pid, "Sending SIGTERM to daemon");
        match send(pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(SupervisorError::NotFound(_)) => {
                self.remove_pid_file();
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        for _ in 0..STOP_POLLS {
            if !is_alive(pid) {
                self.remove_pid_file();
                return Ok(());
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }

        tracing::warn!(pid, "Daemon ignored SIGTERM, sending SIGKILL");
        match send(pid, Signal::SIGKILL) {
            Ok(()) | Err(SupervisorError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.remove_pid_file();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pid_file_means_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = PidFileDaemon::new(dir.path());
        assert_eq!(daemon.status().unwrap(), (false, 0));
    }

    #[test]
    fn garbage_pid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = PidFileDaemon::new(dir.path());
        std::fs::create_dir_all(daemon.pid_file().parent().unwrap()).unwrap();
        std::fs::write(daemon.pid_file(), "not-a-pid").unwrap();

        assert!(matches!(daemon.status(), Err(SupervisorError::Command(_))));
    }

    #[test]
    fn stale_pid_file_reports_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = PidFileDaemon::new(dir.path());
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        std::fs::create_dir_all(daemon.pid_file().parent().unwrap()).unwrap();
        std::fs::write(daemon.pid_file(), pid.to_string()).unwrap();

        assert_eq!(daemon.status().unwrap(), (false, pid));
        daemon.stop().unwrap();
        assert!(!daemon.pid_file().exists());
    }

    #[test]
    fn stop_terminates_a_running_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = PidFileDaemon::new(dir.path());
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::create_dir_all(daemon.pid_file().parent().unwrap()).unwrap();
        std::fs::write(daemon.pid_file(), child.id().to_string()).unwrap();

        assert_eq!(daemon.status().unwrap(), (true, child.id()));
        let reaper = std::thread::spawn(move || child.wait().unwrap());
        daemon.stop().unwrap();

        assert!(!reaper.join().unwrap().success());
        assert!(!daemon.pid_file().exists());
    }

    #[test]
    fn stop_without_pid_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = PidFileDaemon::new(dir.path());
        assert!(matches!(daemon.stop(), Err(SupervisorError::NotFound(_))));
    }
}
