use crate::error::StoreError;
use crate::models::*;

/// A guarded status change: applied only if the step is still `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub step_id: String,
    pub expected: StepStatus,
    pub to: StepStatus,
}

/// A batch of guarded changes against one instance, applied atomically.
///
/// If any change finds a status other than its `expected`, nothing is applied
/// and the store returns [`StoreError::Conflict`] naming that step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub instance_id: String,
    pub changes: Vec<StatusChange>,
    /// Also mark the instance complete.
    pub complete: bool,
}

/// Persistence for protomolecules, instances, steps and digests.
///
/// The store is the single source of truth for step status. Every status
/// change goes through [`StepStore::apply_transition`], a compare-and-set, so
/// two agents racing on the same step produce exactly one winner.
pub trait StepStore {
    /// Insert `proto` unless its id is already stored. Returns the stored
    /// protomolecule, which is never overwritten.
    fn save_protomolecule(&self, proto: &Protomolecule) -> Result<Protomolecule, StoreError>;

    fn get_protomolecule(&self, id: &str) -> Result<Option<Protomolecule>, StoreError>;

    /// Write an instance and all of its steps, or nothing.
    fn create_instance(&self, instance: &Instance, steps: &[Step]) -> Result<(), StoreError>;

    fn get_instance(&self, id: &str) -> Result<Option<Instance>, StoreError>;

    fn get_step(&self, id: &str) -> Result<Option<Step>, StoreError>;

    /// Steps of an instance in ordinal order.
    fn get_steps(&self, instance_id: &str) -> Result<Vec<Step>, StoreError>;

    /// True if `id` names an instance or step this store knows about.
    fn record_exists(&self, id: &str) -> Result<bool, StoreError>;

    fn apply_transition(&self, transition: &Transition) -> Result<(), StoreError>;

    /// Snapshot the instance into a digest and mark it squashed. Step records
    /// are kept as history.
    fn squash(&self, instance_id: &str, summary: &str) -> Result<Digest, StoreError>;

    /// Delete a wisp and its steps.
    fn burn(&self, wisp_id: &str) -> Result<(), StoreError>;
}
