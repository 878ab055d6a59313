use serde::{Deserialize, Serialize};

/// A long-lived role managed by the lifecycle orchestrator.
///
/// - `Refinery`: Per-rig work processor
/// - `Witness`: Per-rig process manager
/// - `Mayor`: Global work coordinator
/// - `Boot`: The deacon's watchdog
/// - `Deacon`: Health orchestrator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    Refinery,
    Witness,
    Mayor,
    Boot,
    Deacon,
}

impl ServiceRole {
    /// Town-level singletons in the order they are stopped.
    pub const TOWN: [ServiceRole; 3] = [Self::Mayor, Self::Boot, Self::Deacon];

    /// Per-rig roles in the order their phases run.
    pub const RIG: [ServiceRole; 2] = [Self::Refinery, Self::Witness];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refinery => "refinery",
            Self::Witness => "witness",
            Self::Mayor => "mayor",
            Self::Boot => "boot",
            Self::Deacon => "deacon",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "refinery" => Some(Self::Refinery),
            "witness" => Some(Self::Witness),
            "mayor" => Some(Self::Mayor),
            "boot" => Some(Self::Boot),
            "deacon" => Some(Self::Deacon),
            _ => None,
        }
    }

    pub fn is_per_rig(&self) -> bool {
        matches!(self, Self::Refinery | Self::Witness)
    }

    /// Human-facing name, e.g. `Mayor` or `Witness (gastown)`.
    pub fn display_name(&self, rig: Option<&str>) -> String {
        let base = match self {
            Self::Refinery => "Refinery",
            Self::Witness => "Witness",
            Self::Mayor => "Mayor",
            Self::Boot => "Boot",
            Self::Deacon => "Deacon",
        };
        match rig {
            Some(rig) if self.is_per_rig() => format!("{} ({})", base, rig),
            _ => base.to_string(),
        }
    }
}

/// Deterministic session name for a role.
///
/// Per-rig roles are scoped by rig (`gt-<rig>-<role>`); town singletons live
/// under the `hq-` prefix. `rig` is ignored for town roles.
pub fn session_name(role: ServiceRole, rig: Option<&str>) -> String {
    match (role.is_per_rig(), rig) {
        (true, Some(rig)) => format!("gt-{}-{}", rig, role.as_str()),
        _ => format!("hq-{}", role.as_str()),
    }
}
