use serde::{Deserialize, Serialize};

use super::service::ServiceRole;

/// Flags controlling a shutdown run. All independent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShutdownOptions {
    /// Also stop the resurrection layer (bd daemons and activity watchers).
    pub all: bool,
    /// Skip the interrupt-then-wait step and destroy immediately.
    pub force: bool,
    /// Destroy every session the supervisor backend manages, not just ours.
    pub nuke: bool,
    /// Query only. Never signal, stop or destroy anything.
    pub dry_run: bool,
    /// Suppress success lines. Failures are always reported.
    pub quiet: bool,
}

/// The phases of a shutdown, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Resurrection,
    Rigs,
    Town,
    Daemon,
    Nuke,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resurrection => "resurrection",
            Self::Rigs => "rigs",
            Self::Town => "town",
            Self::Daemon => "daemon",
            Self::Nuke => "nuke",
        }
    }
}

/// What a unit stops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnitTarget {
    /// bd daemons and activity watchers.
    Resurrection,
    /// A named supervisor session.
    Session {
        name: String,
        role: ServiceRole,
        rig: Option<String>,
    },
    /// The PID-tracked background daemon.
    Daemon,
    /// The whole supervisor backend.
    Backend,
    /// Stand-in for the rig sessions when the rig set could not be read.
    RigRegistry { error: String },
}

/// One independently stoppable thing in a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Unit {
    /// Name shown in per-unit report lines.
    pub label: String,
    /// Name recorded in the completion event.
    pub event_name: String,
    pub target: UnitTarget,
}

impl Unit {
    pub fn session(role: ServiceRole, rig: Option<&str>) -> Self {
        let event_name = match rig {
            Some(rig) if role.is_per_rig() => format!("{}/{}", rig, role.as_str()),
            _ => role.as_str().to_string(),
        };
        Self {
            label: role.display_name(rig),
            event_name,
            target: UnitTarget::Session {
                name: super::service::session_name(role, rig),
                role,
                rig: rig.map(str::to_string),
            },
        }
    }

    pub fn resurrection() -> Self {
        Self {
            label: "bd processes".to_string(),
            event_name: "bd-processes".to_string(),
            target: UnitTarget::Resurrection,
        }
    }

    pub fn daemon() -> Self {
        Self {
            label: "Daemon".to_string(),
            event_name: "daemon".to_string(),
            target: UnitTarget::Daemon,
        }
    }

    pub fn backend() -> Self {
        Self {
            label: "Tmux server".to_string(),
            event_name: "tmux-server".to_string(),
            target: UnitTarget::Backend,
        }
    }

    pub fn rig_registry(error: impl Into<String>) -> Self {
        Self {
            label: "Rig registry".to_string(),
            event_name: "rig-registry".to_string(),
            target: UnitTarget::RigRegistry {
                error: error.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Phase {
    pub kind: PhaseKind,
    pub units: Vec<Unit>,
}

/// Ordered phases. Phases run strictly in order; units within a phase are
/// independent of each other.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShutdownPlan {
    pub phases: Vec<Phase>,
}

impl ShutdownPlan {
    pub fn unit_count(&self) -> usize {
        self.phases.iter().map(|p| p.units.len()).sum()
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.phases.iter().flat_map(|p| p.units.iter())
    }
}

/// Outcome of stopping (or previewing) a single unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitReport {
    pub name: String,
    pub ok: bool,
    /// Detail on success, the error message on failure.
    pub detail: String,
}

impl UnitReport {
    pub fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: false,
            detail: error.into(),
        }
    }
}

/// Aggregate outcome of a shutdown run, in phase order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShutdownResult {
    pub dry_run: bool,
    pub reports: Vec<UnitReport>,
    /// Event names of every executed unit, in execution order.
    pub units: Vec<String>,
}

impl ShutdownResult {
    /// True iff every executed unit succeeded.
    pub fn success(&self) -> bool {
        self.reports.iter().all(|r| r.ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitReport> {
        self.reports.iter().filter(|r| !r.ok)
    }
}
