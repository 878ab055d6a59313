use std::process::Command;

use nix::sys::signal::Signal;

use super::signal::send;
use super::{ResurrectionCounts, ResurrectionLayer, SupervisorError};

const DAEMON_PATTERN: &str = "bd daemon";
const ACTIVITY_PATTERN: &str = "bd activity";

/// `bd daemon` and `bd activity` processes, found by command line.
#[derive(Debug, Clone, Default)]
pub struct BdProcesses;

impl BdProcesses {
    pub fn new() -> Self {
        Self
    }

    fn find(&self, pattern: &str) -> Result<Vec<u32>, SupervisorError> {
        let output = Command::new("pgrep")
            .args(["-f", pattern])
            .output()
            .map_err(|e| SupervisorError::Command(format!("failed to run pgrep: {}", e)))?;

        // pgrep exits 1 when nothing matches.
        match output.status.code() {
            Some(0) => Ok(parse_pids(&String::from_utf8_lossy(&output.stdout))),
            Some(1) => Ok(Vec::new()),
            _ => Err(SupervisorError::Command(format!(
                "pgrep -f '{}': {}",
                pattern,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    fn kill(&self, pids: &[u32], force: bool) -> Result<(), SupervisorError> {
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        for &pid in pids {
            match send(pid, signal) {
                // Exited between pgrep and kill.
                Ok(()) | Err(SupervisorError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn parse_pids(stdout: &str) -> Vec<u32> {
    let own = std::process::id();
    stdout
        .lines()
        .filter_map(|l| l.trim().parse::<u32>().ok())
        .filter(|pid| *pid != own)
        .collect()
}

impl ResurrectionLayer for BdProcesses {
    fn stop_all(&self, dry_run: bool, force: bool) -> Result<ResurrectionCounts, SupervisorError> {
        let daemons = self.find(DAEMON_PATTERN)?;
        let activity = self.find(ACTIVITY_PATTERN)?;

        if !dry_run {
            self.kill(&daemons, force)?;
            self.kill(&activity, force)?;
            tracing::info!(
                daemons = daemons.len(),
                activity = activity.len(),
                force,
                "Stopped bd processes"
            );
        }

        Ok(ResurrectionCounts {
            daemons: daemons.len(),
            activity: activity.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pids_skips_noise_and_self() {
        let own = std::process::id();
        let stdout = format!("123\n\n  456 \nabc\n{}\n", own);
        assert_eq!(parse_pids(&stdout), vec![123, 456]);
    }

    #[test]
    fn kill_tolerates_processes_that_already_exited() {
        let mut gone = Command::new("true").spawn().unwrap();
        let gone_pid = gone.id();
        gone.wait().unwrap();
        let mut sleeper = Command::new("sleep").arg("30").spawn().unwrap();

        BdProcesses::new()
            .kill(&[gone_pid, sleeper.id()], false)
            .unwrap();

        assert!(!sleeper.wait().unwrap().success());
    }
}
