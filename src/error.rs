//! Error kinds surfaced by the workflow engine and its step store.

use thiserror::Error;

use crate::models::StepStatus;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Workflow engine errors.
///
/// Validation errors (`Template`, `MissingVariable`) abort an operation
/// before anything is written. Transition errors (`AlreadyClosed`,
/// `InstanceClosed`, `StepNotReady`) are definite and recoverable: re-query
/// the instance and decide again.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("missing variable: {0}")]
    MissingVariable(String),

    #[error("step {0} is already closed")]
    AlreadyClosed(String),

    #[error("{0} has been squashed and accepts no further changes")]
    InstanceClosed(String),

    #[error("{0} is a molecule; only wisps can be burned")]
    NotAWisp(String),

    #[error("step {step_id} is {state} and cannot be {action}", state = .status.as_str())]
    StepNotReady {
        step_id: String,
        status: StepStatus,
        action: &'static str,
    },

    #[error("store error: {0}")]
    Transport(#[source] StoreError),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Squashed(id) => Self::InstanceClosed(id),
            e => Self::Transport(e),
        }
    }
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for conditions a caller resolves by re-reading state, as opposed
    /// to bad input or a broken collaborator.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyClosed(_) | Self::InstanceClosed(_) | Self::StepNotReady { .. }
        )
    }
}

/// Errors from a [`StepStore`](crate::molecule::StepStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// A guarded status update found a different prior status.
    #[error("step {step_id} changed concurrently (now {now})", now = .actual.as_str())]
    Conflict { step_id: String, actual: StepStatus },

    /// The instance was squashed; it takes no further writes.
    #[error("instance {0} is squashed")]
    Squashed(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Backend(e.into())
    }
}
