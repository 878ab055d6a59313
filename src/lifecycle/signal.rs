//! Signal delivery for processes found by PID.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use super::SupervisorError;

/// Whether `pid` names a live process. A process we may not signal still
/// exists.
pub(super) fn is_alive(pid: u32) -> bool {
    liveness(kill(pid_of(pid), None))
}

fn liveness(check: nix::Result<()>) -> bool {
    match check {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Deliver `signal`; a process that is already gone is `NotFound`.
pub(super) fn send(pid: u32, signal: Signal) -> Result<(), SupervisorError> {
    match kill(pid_of(pid), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(SupervisorError::NotFound(format!("PID {}", pid))),
        Err(e) => Err(SupervisorError::Command(format!(
            "{} to PID {}: {}",
            signal, pid, e
        ))),
    }
}

fn pid_of(pid: u32) -> Pid {
    Pid::from_raw(pid as i32)
}
