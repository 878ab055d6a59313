use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Variable bindings supplied at instantiation time.
pub type Bindings = BTreeMap<String, String>;

/// The frozen compilation of a [`Formula`](super::Formula).
///
/// Steps are fully linear and composition-free; placeholders remain as
/// named slots listed in `vars`. A protomolecule may be instantiated any
/// number of times.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Protomolecule {
    pub id: String,
    pub formula: String,
    pub version: u32,
    pub description: Option<String>,
    pub steps: Vec<ProtoStep>,
    /// Every slot referenced by the steps, in order of first appearance.
    pub vars: Vec<VarSlot>,
    pub created_at: DateTime<Utc>,
}

impl Protomolecule {
    /// Protomolecule id for a formula name and version. Changing a formula
    /// means bumping its version, which yields a new protomolecule.
    pub fn id_for(formula: &str, version: u32) -> String {
        format!("proto-{}-v{}", formula, version)
    }

    /// Same compiled content, ignoring when it was cooked.
    pub fn same_content(&self, other: &Protomolecule) -> bool {
        self.id == other.id
            && self.formula == other.formula
            && self.version == other.version
            && self.description == other.description
            && self.steps == other.steps
            && self.vars == other.vars
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtoStep {
    /// Step id from the formula, prefixed by the target for expanded steps.
    pub ref_id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VarSlot {
    pub name: String,
    pub description: Option<String>,
    pub default: Option<String>,
}

/// Durable molecule or ephemeral wisp.
///
/// Wisps are never written to the durable store. They can be squashed like
/// molecules, or burned without leaving a trace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    Molecule,
    Wisp,
}

impl InstanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Molecule => "molecule",
            Self::Wisp => "wisp",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "molecule" => Some(Self::Molecule),
            "wisp" => Some(Self::Wisp),
            _ => None,
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Molecule => "mol-",
            Self::Wisp => "wisp-",
        }
    }

    /// Kind of the instance an instance or step id belongs to.
    pub fn of_id(id: &str) -> Self {
        if id.starts_with(Self::Wisp.id_prefix()) {
            Self::Wisp
        } else {
            Self::Molecule
        }
    }

    /// Fresh instance id carrying this kind's prefix.
    pub fn new_id(&self) -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("{}{}", self.id_prefix(), &hex[..10])
    }
}

/// Lifecycle of an instance.
///
/// - `Active`: At least one step is not closed
/// - `Complete`: Every step is closed
/// - `Squashed`: Collapsed into a digest; accepts no further transitions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Complete,
    Squashed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Complete => "complete",
            Self::Squashed => "squashed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "complete" => Some(Self::Complete),
            "squashed" => Some(Self::Squashed),
            _ => None,
        }
    }
}

/// A poured molecule or wisp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub proto_id: String,
    pub kind: InstanceKind,
    /// Existing task this instance was bonded onto, if any.
    pub parent_id: Option<String>,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The status of a single step.
///
/// - `Pending`: Waiting on earlier steps
/// - `Ready`: Claimable
/// - `InProgress`: Claimed and being worked
/// - `Closed`: Done. Terminal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    InProgress,
    Closed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "in_progress" => Some(Self::InProgress),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// One ordered unit of an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    /// `<instance id>.<ordinal>`
    pub id: String,
    pub instance_id: String,
    /// 1-based position. Fixed at creation.
    pub ordinal: u32,
    pub ref_id: String,
    pub title: String,
    pub description: String,
    pub status: StepStatus,
    /// The sibling that auto-activates when this step closes.
    pub next_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Step {
    pub fn id_for(instance_id: &str, ordinal: u32) -> String {
        format!("{}.{}", instance_id, ordinal)
    }
}

/// How a close treats the following step.
///
/// - `Plain`: Defer to the engine's configured auto-continue policy
/// - `Continue`: Claim the next step (`in_progress`) in the same transaction
/// - `NoAuto`: Leave the next step `ready` but unclaimed
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CloseMode {
    #[default]
    Plain,
    Continue,
    NoAuto,
}

impl CloseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Continue => "continue",
            Self::NoAuto => "no_auto",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "plain" => Some(Self::Plain),
            "continue" => Some(Self::Continue),
            "no_auto" | "no-auto" => Some(Self::NoAuto),
            _ => None,
        }
    }
}

/// Result of closing a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloseOutcome {
    pub closed: Step,
    /// The next step, if it was claimed by this close.
    pub activated: Option<Step>,
    /// The next step, if it was made ready but left unclaimed.
    pub ready: Option<Step>,
    pub instance_complete: bool,
}

/// Instance plus its steps and derived completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub instance: Instance,
    pub steps: Vec<Step>,
    pub closed: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(instance: Instance, steps: Vec<Step>) -> Self {
        let closed = steps
            .iter()
            .filter(|s| s.status == StepStatus::Closed)
            .count();
        let total = steps.len();
        Self {
            instance,
            steps,
            closed,
            total,
        }
    }

    /// `closed / total`. An instance with no steps counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.closed as f64 / self.total as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.closed == self.total
    }

    /// The step an agent should be looking at: the claimed one, else the
    /// first ready one.
    pub fn current_step(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::InProgress)
            .or_else(|| self.steps.iter().find(|s| s.status == StepStatus::Ready))
    }
}

/// Final status of one step, captured in a digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepSnapshot {
    pub id: String,
    pub title: String,
    pub status: StepStatus,
}

/// Immutable summary of a squashed instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Digest {
    pub id: Uuid,
    pub instance_id: String,
    pub kind: InstanceKind,
    pub summary: String,
    pub steps: Vec<StepSnapshot>,
    pub created_at: DateTime<Utc>,
}

impl Digest {
    pub fn closed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Closed)
            .count()
    }
}

/// An agent's working context. Holds the molecule the agent has pinned, so
/// `current` with no id resolves to it. Owned by the caller and passed with
/// every call; several agents may pin the same molecule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentContext {
    pub agent: String,
    pub attached: Option<String>,
}

impl AgentContext {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            attached: None,
        }
    }
}
