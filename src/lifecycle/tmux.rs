use std::process::{Command, Output};

use super::{SessionSupervisor, SupervisorError};

/// Sessions backed by the local tmux server.
#[derive(Debug, Clone)]
pub struct TmuxSupervisor {
    program: String,
}

impl Default for TmuxSupervisor {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl TmuxSupervisor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output, SupervisorError> {
        tracing::debug!(args = ?args, "Running tmux command");
        Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| SupervisorError::Command(format!("failed to run {}: {}", self.program, e)))
    }

    fn run_checked(&self, target: &str, args: &[&str]) -> Result<(), SupervisorError> {
        let output = self.run(args)?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing(&stderr) {
            return Err(SupervisorError::NotFound(target.to_string()));
        }
        tracing::warn!(args = ?args, stderr = %stderr.trim(), "tmux command failed");
        Err(SupervisorError::Command(format!(
            "tmux {}: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )))
    }
}

/// tmux reports a missing session or server only through stderr.
fn is_missing(stderr: &str) -> bool {
    stderr.contains("can't find session")
        || stderr.contains("session not found")
        || stderr.contains("no server running")
        || stderr.contains("error connecting to")
}

impl SessionSupervisor for TmuxSupervisor {
    fn has_session(&self, name: &str) -> Result<bool, SupervisorError> {
        let target = format!("={}", name);
        match self.run_checked(name, &["has-session", "-t", &target]) {
            Ok(()) => Ok(true),
            Err(SupervisorError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn signal_interrupt(&self, name: &str) -> Result<(), SupervisorError> {
        let target = format!("={}", name);
        self.run_checked(name, &["send-keys", "-t", &target, "C-c"])
    }

    fn destroy(&self, name: &str) -> Result<(), SupervisorError> {
        let target = format!("={}", name);
        self.run_checked(name, &["kill-session", "-t", &target])
    }

    fn destroy_all(&self) -> Result<(), SupervisorError> {
        self.run_checked("tmux server", &["kill-server"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_session_and_server_are_recognised() {
        assert!(is_missing("can't find session: gt-gastown-witness"));
        assert!(is_missing("no server running on /tmp/tmux-1000/default"));
        assert!(!is_missing("unknown command: frobnicate"));
    }

    #[test]
    fn missing_binary_is_a_command_error() {
        let tmux = TmuxSupervisor::new("gt-test-no-such-tmux-binary");
        assert!(matches!(
            tmux.has_session("hq-mayor"),
            Err(SupervisorError::Command(_))
        ));
    }
}
