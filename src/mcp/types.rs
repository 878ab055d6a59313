//! Request and response types for MCP tools.

use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::{Bindings, CloseOutcome, Progress, Step};
use crate::molecule::render;

// ============================================================
// Request Types
// ============================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CookRequest {
    #[schemars(description = "Name of the formula to compile, e.g. 'shiny'")]
    pub formula: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InstantiateRequest {
    #[schemars(description = "Protomolecule id returned by mol_cook, e.g. 'proto-shiny-v1'")]
    pub proto_id: String,
    #[schemars(description = "Values for the protomolecule's variable slots")]
    #[serde(default)]
    pub vars: Bindings,
    #[schemars(
        description = "Existing task to bond the new molecule onto. Omit to pour a fresh molecule. Ignored for wisps."
    )]
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CurrentRequest {
    #[schemars(description = "Your agent identity, e.g. 'gastown/witness'")]
    pub agent: String,
    #[schemars(
        description = "Molecule or wisp id to inspect. Omit to use the molecule attached to your context."
    )]
    #[serde(default)]
    pub instance_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StepRequest {
    #[schemars(description = "Step id, e.g. 'mol-3f2a9c01b4.2'")]
    pub step_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CloseRequest {
    #[schemars(description = "Step id to close")]
    pub step_id: String,
    #[schemars(
        description = "'continue' claims the next step, 'no_auto' leaves it ready, 'plain' follows the town default"
    )]
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SquashRequest {
    #[schemars(description = "Molecule or wisp id to squash")]
    pub instance_id: String,
    #[schemars(description = "What was accomplished. Stored in the digest.")]
    pub summary: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BurnRequest {
    #[schemars(description = "Wisp id to discard")]
    pub wisp_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AttachRequest {
    #[schemars(description = "Your agent identity")]
    pub agent: String,
    #[schemars(description = "Molecule id to pin to your context")]
    pub molecule_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DetachRequest {
    #[schemars(description = "Your agent identity")]
    pub agent: String,
}

// ============================================================
// Response Types
// ============================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StepInfo {
    pub id: String,
    pub ref_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
}

impl From<&Step> for StepInfo {
    fn from(step: &Step) -> Self {
        Self {
            id: step.id.clone(),
            ref_id: step.ref_id.clone(),
            title: step.title.clone(),
            description: step.description.clone(),
            status: step.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProgressResponse {
    pub instance_id: String,
    pub kind: String,
    pub status: String,
    pub closed: usize,
    pub total: usize,
    pub current_step: Option<StepInfo>,
    pub steps: Vec<StepInfo>,
    /// Tree rendering of the steps.
    pub rendered: String,
}

impl From<&Progress> for ProgressResponse {
    fn from(progress: &Progress) -> Self {
        Self {
            instance_id: progress.instance.id.clone(),
            kind: progress.instance.kind.as_str().to_string(),
            status: progress.instance.status.as_str().to_string(),
            closed: progress.closed,
            total: progress.total,
            current_step: progress.current_step().map(StepInfo::from),
            steps: progress.steps.iter().map(StepInfo::from).collect(),
            rendered: render::render_progress(progress),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CloseResponse {
    pub closed: StepInfo,
    /// The following step, claimed or merely made ready.
    pub next: Option<StepInfo>,
    pub next_claimed: bool,
    pub instance_complete: bool,
}

impl From<&CloseOutcome> for CloseResponse {
    fn from(outcome: &CloseOutcome) -> Self {
        let next = outcome.activated.as_ref().or(outcome.ready.as_ref());
        Self {
            closed: StepInfo::from(&outcome.closed),
            next: next.map(StepInfo::from),
            next_claimed: outcome.activated.is_some(),
            instance_complete: outcome.instance_complete,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AttachmentResponse {
    pub agent: String,
    pub attached: Option<String>,
}
