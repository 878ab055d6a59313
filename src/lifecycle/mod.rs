//! Service lifecycle orchestration.
//!
//! A shutdown runs as five ordered phases: the resurrection layer (opt-in),
//! per-rig services, town singletons, the daemon, and the whole supervisor
//! backend (opt-in). Every unit is stopped best-effort. A unit's failure is
//! recorded and the run carries on, so the caller always gets one report per
//! eligible unit.
//!
//! The orchestrator only talks to its collaborators through the traits
//! below. Real adapters live in the submodules.

mod beads;
mod daemon;
mod feed;
mod rigs;
mod signal;
mod tmux;

pub use beads::BdProcesses;
pub use daemon::PidFileDaemon;
pub use feed::FeedLog;
pub use rigs::TownRigs;
pub use tmux::TmuxSupervisor;

use std::time::Duration;

use thiserror::Error;

use crate::models::*;

/// Default pause between the interrupt and the destroy of a session.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(100);

pub const NUKE_WARNING: &str = "\
⚠ WARNING: The --nuke flag kills ALL tmux sessions, not just Gas Town.
This includes vim sessions, running builds, SSH connections, etc.
Set GT_NUKE_ACKNOWLEDGED=1 to suppress this warning.";

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The session (or the whole backend) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Command(String),
}

/// Named long-lived sessions.
pub trait SessionSupervisor {
    fn has_session(&self, name: &str) -> Result<bool, SupervisorError>;
    fn signal_interrupt(&self, name: &str) -> Result<(), SupervisorError>;
    fn destroy(&self, name: &str) -> Result<(), SupervisorError>;
    /// Destroy every session the backend manages.
    fn destroy_all(&self) -> Result<(), SupervisorError>;
}

/// The PID-tracked background daemon.
pub trait DaemonController {
    /// `(running, pid)`. The pid is meaningless when not running.
    fn status(&self) -> Result<(bool, u32), SupervisorError>;
    fn stop(&self) -> Result<(), SupervisorError>;
}

pub trait RigRegistry {
    /// Active rig names in a stable order.
    fn active_rigs(&self) -> anyhow::Result<Vec<String>>;
}

/// Processes counted or stopped in the resurrection layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResurrectionCounts {
    pub daemons: usize,
    pub activity: usize,
}

impl ResurrectionCounts {
    pub fn total(&self) -> usize {
        self.daemons + self.activity
    }
}

/// External processes that would otherwise restart what we stop.
pub trait ResurrectionLayer {
    /// Stop everything, or only count it when `dry_run` is set.
    fn stop_all(&self, dry_run: bool, force: bool) -> Result<ResurrectionCounts, SupervisorError>;
}

/// Receives the completion event of a fully successful shutdown.
pub trait EventSink {
    fn record_halt(&self, units: &[String]) -> anyhow::Result<()>;
}

pub struct Orchestrator<'a> {
    supervisor: &'a dyn SessionSupervisor,
    daemon: &'a dyn DaemonController,
    rigs: &'a dyn RigRegistry,
    resurrection: &'a dyn ResurrectionLayer,
    events: &'a dyn EventSink,
    grace: Duration,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        supervisor: &'a dyn SessionSupervisor,
        daemon: &'a dyn DaemonController,
        rigs: &'a dyn RigRegistry,
        resurrection: &'a dyn ResurrectionLayer,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            supervisor,
            daemon,
            rigs,
            resurrection,
            events,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Build the phase list for `opts`. An unreadable rig registry becomes a
    /// failed unit in the rig phase; the rest of the plan is unaffected.
    pub fn plan(&self, opts: &ShutdownOptions) -> ShutdownPlan {
        let mut phases = Vec::with_capacity(5);

        if opts.all {
            phases.push(Phase {
                kind: PhaseKind::Resurrection,
                units: vec![Unit::resurrection()],
            });
        }

        let rig_units = match self.rigs.active_rigs() {
            Ok(rigs) => ServiceRole::RIG
                .iter()
                .flat_map(|role| rigs.iter().map(move |rig| Unit::session(*role, Some(rig))))
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to read rig registry: {:#}", e);
                vec![Unit::rig_registry(format!("{:#}", e))]
            }
        };
        phases.push(Phase {
            kind: PhaseKind::Rigs,
            units: rig_units,
        });

        phases.push(Phase {
            kind: PhaseKind::Town,
            units: ServiceRole::TOWN
                .iter()
                .map(|role| Unit::session(*role, None))
                .collect(),
        });

        phases.push(Phase {
            kind: PhaseKind::Daemon,
            units: vec![Unit::daemon()],
        });

        if opts.nuke {
            phases.push(Phase {
                kind: PhaseKind::Nuke,
                units: vec![Unit::backend()],
            });
        }

        ShutdownPlan { phases }
    }

    /// Plan and execute a shutdown. `on_unit` sees each report as soon as the
    /// unit finishes.
    pub fn shutdown(
        &self,
        opts: &ShutdownOptions,
        on_unit: &mut dyn FnMut(&UnitReport),
    ) -> ShutdownResult {
        let plan = self.plan(opts);
        self.execute(&plan, opts, on_unit)
    }

    pub fn execute(
        &self,
        plan: &ShutdownPlan,
        opts: &ShutdownOptions,
        on_unit: &mut dyn FnMut(&UnitReport),
    ) -> ShutdownResult {
        let mut reports = Vec::with_capacity(plan.unit_count());
        let mut units = Vec::with_capacity(plan.unit_count());

        for phase in &plan.phases {
            tracing::debug!(
                phase = phase.kind.as_str(),
                units = phase.units.len(),
                dry_run = opts.dry_run,
                "Running shutdown phase"
            );
            for unit in &phase.units {
                let report = self.stop_unit(unit, opts);
                if !report.ok {
                    tracing::warn!(unit = %unit.event_name, error = %report.detail, "Unit failed to stop");
                }
                on_unit(&report);
                units.push(unit.event_name.clone());
                reports.push(report);
            }
        }

        let result = ShutdownResult {
            dry_run: opts.dry_run,
            reports,
            units,
        };

        if !opts.dry_run && result.success() {
            if let Err(e) = self.events.record_halt(&result.units) {
                tracing::warn!("Failed to record halt event: {}", e);
            }
            tracing::info!(units = result.units.len(), "Shutdown complete");
        }

        result
    }

    fn stop_unit(&self, unit: &Unit, opts: &ShutdownOptions) -> UnitReport {
        match &unit.target {
            UnitTarget::Resurrection => self.stop_resurrection(unit, opts),
            UnitTarget::Session { name, .. } => self.stop_session(unit, name, opts),
            UnitTarget::Daemon => self.stop_daemon(unit, opts),
            UnitTarget::Backend => self.stop_backend(unit, opts),
            UnitTarget::RigRegistry { error } => UnitReport::failed(&unit.label, error.clone()),
        }
    }

    fn stop_resurrection(&self, unit: &Unit, opts: &ShutdownOptions) -> UnitReport {
        match self.resurrection.stop_all(opts.dry_run, opts.force) {
            Ok(counts) if counts.total() == 0 => UnitReport::ok(&unit.label, "none running"),
            Ok(counts) if opts.dry_run => UnitReport::ok(
                &unit.label,
                format!(
                    "would stop {} daemon, {} activity",
                    counts.daemons, counts.activity
                ),
            ),
            Ok(counts) => UnitReport::ok(
                &unit.label,
                format!(
                    "{} daemon, {} activity stopped",
                    counts.daemons, counts.activity
                ),
            ),
            Err(e) => UnitReport::failed(&unit.label, e.to_string()),
        }
    }

    /// Query, then (unless dry-run) interrupt, wait and destroy.
    fn stop_session(&self, unit: &Unit, name: &str, opts: &ShutdownOptions) -> UnitReport {
        let running = match self.supervisor.has_session(name) {
            Ok(running) => running,
            Err(e) => return UnitReport::failed(&unit.label, e.to_string()),
        };
        if !running {
            return UnitReport::ok(&unit.label, idle_detail(opts));
        }
        if opts.dry_run {
            return UnitReport::ok(&unit.label, "would stop");
        }

        if !opts.force {
            // Destroy follows regardless; an interrupt that fails is not fatal.
            if let Err(e) = self.supervisor.signal_interrupt(name) {
                tracing::debug!(session = %name, "Interrupt failed: {}", e);
            }
            std::thread::sleep(self.grace);
        }

        match self.supervisor.destroy(name) {
            Ok(()) => {
                tracing::info!(session = %name, force = opts.force, "Stopped session");
                UnitReport::ok(&unit.label, "stopped")
            }
            Err(SupervisorError::NotFound(_)) => {
                tracing::debug!(session = %name, "Session vanished before destroy");
                UnitReport::ok(&unit.label, "already stopped")
            }
            Err(e) => UnitReport::failed(&unit.label, e.to_string()),
        }
    }

    fn stop_daemon(&self, unit: &Unit, opts: &ShutdownOptions) -> UnitReport {
        let pid = match self.daemon.status() {
            Ok((true, pid)) => pid,
            Ok((false, _)) => return UnitReport::ok(&unit.label, idle_detail(opts)),
            Err(e) => return UnitReport::failed(&unit.label, e.to_string()),
        };
        if opts.dry_run {
            return UnitReport::ok(&unit.label, format!("would stop (PID {})", pid));
        }

        match self.daemon.stop() {
            Ok(()) | Err(SupervisorError::NotFound(_)) => {
                tracing::info!(pid, "Stopped daemon");
                UnitReport::ok(&unit.label, format!("stopped (was PID {})", pid))
            }
            Err(e) => UnitReport::failed(&unit.label, e.to_string()),
        }
    }

    fn stop_backend(&self, unit: &Unit, opts: &ShutdownOptions) -> UnitReport {
        if opts.dry_run {
            return UnitReport::ok(&unit.label, "would kill (DESTRUCTIVE)");
        }
        match self.supervisor.destroy_all() {
            Ok(()) | Err(SupervisorError::NotFound(_)) => {
                tracing::warn!("Killed supervisor backend");
                UnitReport::ok(&unit.label, "killed (all tmux sessions destroyed)")
            }
            Err(e) => UnitReport::failed(&unit.label, e.to_string()),
        }
    }
}

/// Detail for a unit with nothing to stop.
fn idle_detail(opts: &ShutdownOptions) -> &'static str {
    if opts.dry_run {
        "none running"
    } else {
        "not running"
    }
}

/// The warning to print before a real nuke, if any.
pub fn nuke_warning(opts: &ShutdownOptions, acknowledged: bool) -> Option<&'static str> {
    (opts.nuke && !opts.dry_run && !acknowledged).then_some(NUKE_WARNING)
}

/// One report line, or `None` for a success under `quiet`.
pub fn render_unit(report: &UnitReport, quiet: bool) -> Option<String> {
    if report.ok {
        (!quiet).then(|| format!("✓ {}: {}", report.name, report.detail))
    } else {
        Some(format!("✗ {}: {}", report.name, report.detail))
    }
}

pub const DRY_RUN_BANNER: &str = "═══ DRY RUN: Preview of shutdown actions ═══";

pub fn render_summary(result: &ShutdownResult) -> String {
    if result.dry_run {
        "═══ DRY RUN COMPLETE (no changes made) ═══".to_string()
    } else if result.success() {
        "✓ All services stopped".to_string()
    } else {
        format!(
            "✗ Some services failed to stop ({} of {})",
            result.failures().count(),
            result.reports.len()
        )
    }
}
