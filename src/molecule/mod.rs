//! Molecule workflow engine.
//!
//! Formulas are cooked into protomolecules, which are poured into durable
//! molecules or ephemeral wisps. Agents walk an instance one step at a time
//! with `start`/`close`, and finished (or abandoned) instances are squashed
//! into digests. Wisps may instead be burned.
//!
//! All state lives in a [`StepStore`]. The engine validates, materialises and
//! decides transitions; the store applies them with compare-and-set.

mod cook;
mod library;
pub mod render;
mod store;

pub use cook::{cook, placeholders, substitute};
pub use library::FormulaLibrary;
pub use store::{StatusChange, StepStore, Transition};

use chrono::Utc;

use crate::error::{Error, Result, StoreError};
use crate::models::*;

/// Engine policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Whether a `plain` close claims the next step, like `continue`.
    pub auto_continue: bool,
}

pub struct MoleculeEngine<S> {
    store: S,
    formulas: FormulaLibrary,
    config: WorkflowConfig,
}

impl<S: StepStore> MoleculeEngine<S> {
    pub fn new(store: S, formulas: FormulaLibrary, config: WorkflowConfig) -> Self {
        Self {
            store,
            formulas,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn formulas(&self) -> &FormulaLibrary {
        &self.formulas
    }

    pub fn config(&self) -> WorkflowConfig {
        self.config
    }

    // ============================================================
    // Compile
    // ============================================================

    /// Compile a formula and store the resulting protomolecule.
    pub fn cook(&self, formula: &str) -> Result<Protomolecule> {
        let cooked = cook::cook(&self.formulas, formula)?;
        let proto = self.store.save_protomolecule(&cooked)?;
        if !proto.same_content(&cooked) {
            return Err(Error::Template(format!(
                "formula '{}' changed since {} was cooked; bump its version",
                formula, proto.id
            )));
        }
        tracing::info!(
            proto = %proto.id,
            steps = proto.steps.len(),
            "Cooked formula {}",
            formula
        );
        Ok(proto)
    }

    pub fn protomolecule(&self, id: &str) -> Result<Protomolecule> {
        self.store
            .get_protomolecule(id)?
            .ok_or_else(|| Error::not_found("protomolecule", id))
    }

    // ============================================================
    // Instantiate
    // ============================================================

    /// Instantiate a durable molecule with a fresh root.
    pub fn pour(&self, proto_id: &str, bindings: &Bindings) -> Result<Progress> {
        self.instantiate(proto_id, bindings, InstanceKind::Molecule, None)
    }

    /// Instantiate an ephemeral wisp.
    pub fn wisp(&self, proto_id: &str, bindings: &Bindings) -> Result<Progress> {
        self.instantiate(proto_id, bindings, InstanceKind::Wisp, None)
    }

    /// Instantiate a durable molecule rooted on an existing task.
    pub fn bond(&self, proto_id: &str, bindings: &Bindings, parent_id: &str) -> Result<Progress> {
        if !self.store.record_exists(parent_id)? {
            return Err(Error::not_found("parent task", parent_id));
        }
        self.instantiate(
            proto_id,
            bindings,
            InstanceKind::Molecule,
            Some(parent_id.to_string()),
        )
    }

    fn instantiate(
        &self,
        proto_id: &str,
        bindings: &Bindings,
        kind: InstanceKind,
        parent_id: Option<String>,
    ) -> Result<Progress> {
        let proto = self.protomolecule(proto_id)?;

        // Every slot must resolve before anything is written.
        let mut values = Bindings::new();
        for slot in &proto.vars {
            match bindings.get(&slot.name).or(slot.default.as_ref()) {
                Some(value) => {
                    values.insert(slot.name.clone(), value.clone());
                }
                None => return Err(Error::MissingVariable(slot.name.clone())),
            }
        }

        let now = Utc::now();
        let instance = Instance {
            id: kind.new_id(),
            proto_id: proto.id.clone(),
            kind,
            parent_id,
            status: if proto.steps.is_empty() {
                InstanceStatus::Complete
            } else {
                InstanceStatus::Active
            },
            created_at: now,
            updated_at: now,
        };

        let total = proto.steps.len() as u32;
        let steps: Vec<Step> = proto
            .steps
            .iter()
            .zip(1..)
            .map(|(proto_step, ordinal)| Step {
                id: Step::id_for(&instance.id, ordinal),
                instance_id: instance.id.clone(),
                ordinal,
                ref_id: proto_step.ref_id.clone(),
                title: substitute(&proto_step.title, &values),
                description: substitute(&proto_step.description, &values),
                status: if ordinal == 1 {
                    StepStatus::Ready
                } else {
                    StepStatus::Pending
                },
                next_id: (ordinal < total).then(|| Step::id_for(&instance.id, ordinal + 1)),
                updated_at: now,
            })
            .collect();

        self.store.create_instance(&instance, &steps)?;
        tracing::info!(
            instance = %instance.id,
            proto = %proto.id,
            kind = kind.as_str(),
            steps = steps.len(),
            "Instantiated protomolecule"
        );

        Ok(Progress::new(instance, steps))
    }

    // ============================================================
    // Step transitions
    // ============================================================

    /// Explicitly claim a ready step.
    pub fn start(&self, step_id: &str) -> Result<Step> {
        let (instance, step) = self.load_step(step_id)?;
        self.ensure_open(&instance)?;

        match step.status {
            StepStatus::Ready => {}
            StepStatus::Closed => return Err(Error::AlreadyClosed(step.id)),
            status => {
                return Err(Error::StepNotReady {
                    step_id: step.id,
                    status,
                    action: "started",
                })
            }
        }

        let transition = Transition {
            instance_id: instance.id.clone(),
            changes: vec![StatusChange {
                step_id: step.id.clone(),
                expected: StepStatus::Ready,
                to: StepStatus::InProgress,
            }],
            complete: false,
        };
        self.apply(&transition, &step.id, "started")?;
        tracing::info!(step = %step.id, "Started step");

        self.load_step(step_id).map(|(_, s)| s)
    }

    /// Close a step and, depending on `mode`, advance the next one.
    ///
    /// Closing an unclaimed `ready` step is allowed. Closing a closed step
    /// fails with [`Error::AlreadyClosed`] so racing closers can tell they
    /// lost.
    pub fn close(&self, step_id: &str, mode: CloseMode) -> Result<CloseOutcome> {
        let (instance, step) = self.load_step(step_id)?;
        self.ensure_open(&instance)?;

        match step.status {
            StepStatus::InProgress | StepStatus::Ready => {}
            StepStatus::Closed => return Err(Error::AlreadyClosed(step.id)),
            status => {
                return Err(Error::StepNotReady {
                    step_id: step.id,
                    status,
                    action: "closed",
                })
            }
        }

        let claim_next = match mode {
            CloseMode::Continue => true,
            CloseMode::NoAuto => false,
            CloseMode::Plain => self.config.auto_continue,
        };

        let steps = self.store.get_steps(&instance.id)?;
        let next = step
            .next_id
            .as_ref()
            .and_then(|id| steps.iter().find(|s| &s.id == id));

        let mut changes = vec![StatusChange {
            step_id: step.id.clone(),
            expected: step.status,
            to: StepStatus::Closed,
        }];

        let mut next_to = None;
        if let Some(next) = next {
            let to = match (next.status, claim_next) {
                (StepStatus::Pending | StepStatus::Ready, true) => Some(StepStatus::InProgress),
                (StepStatus::Pending, false) => Some(StepStatus::Ready),
                _ => None,
            };
            if let Some(to) = to {
                changes.push(StatusChange {
                    step_id: next.id.clone(),
                    expected: next.status,
                    to,
                });
                next_to = Some(to);
            }
        }

        let complete = steps
            .iter()
            .all(|s| s.id == step.id || s.status == StepStatus::Closed);

        let transition = Transition {
            instance_id: instance.id.clone(),
            changes,
            complete,
        };
        self.apply(&transition, &step.id, "closed")?;

        tracing::info!(
            step = %step.id,
            mode = mode.as_str(),
            complete,
            "Closed step"
        );

        let closed = self.load_step(&step.id)?.1;
        let next_step = match (next, next_to) {
            (Some(next), Some(_)) => Some(self.load_step(&next.id)?.1),
            _ => None,
        };
        let (activated, ready) = match next_to {
            Some(StepStatus::InProgress) => (next_step, None),
            Some(_) => (None, next_step),
            None => (None, None),
        };

        Ok(CloseOutcome {
            closed,
            activated,
            ready,
            instance_complete: complete,
        })
    }

    fn apply(&self, transition: &Transition, step_id: &str, action: &'static str) -> Result<()> {
        match self.store.apply_transition(transition) {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict {
                step_id: conflicted,
                actual,
            }) => {
                tracing::warn!(step = %conflicted, "Lost race on step transition");
                if conflicted == step_id && actual == StepStatus::Closed {
                    Err(Error::AlreadyClosed(conflicted))
                } else {
                    Err(Error::StepNotReady {
                        step_id: conflicted,
                        status: actual,
                        action,
                    })
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    // ============================================================
    // Queries
    // ============================================================

    /// Progress of `instance_id`, or of the molecule attached to `ctx` when
    /// no id is given.
    pub fn current(&self, ctx: &AgentContext, instance_id: Option<&str>) -> Result<Progress> {
        let id = match instance_id {
            Some(id) => id,
            None => ctx
                .attached
                .as_deref()
                .ok_or_else(|| Error::not_found("attached molecule for agent", &ctx.agent))?,
        };
        self.progress(id)
    }

    pub fn progress(&self, instance_id: &str) -> Result<Progress> {
        let instance = self.load_instance(instance_id)?;
        let steps = self.store.get_steps(instance_id)?;
        Ok(Progress::new(instance, steps))
    }

    // ============================================================
    // Terminal operations
    // ============================================================

    /// Collapse an instance into a digest. Valid whether or not every step
    /// is closed; the digest records the state as it stands.
    pub fn squash(&self, instance_id: &str, summary: &str) -> Result<Digest> {
        let instance = self.load_instance(instance_id)?;
        self.ensure_open(&instance)?;

        let digest = self.store.squash(instance_id, summary)?;
        tracing::info!(
            instance = %instance_id,
            digest = %digest.id,
            closed = digest.closed_count(),
            total = digest.steps.len(),
            "Squashed instance"
        );
        Ok(digest)
    }

    /// Discard a wisp and its steps. No digest is produced.
    pub fn burn(&self, wisp_id: &str) -> Result<()> {
        let instance = self.load_instance(wisp_id)?;
        if instance.kind != InstanceKind::Wisp {
            return Err(Error::NotAWisp(instance.id));
        }
        self.store.burn(wisp_id)?;
        tracing::info!(instance = %wisp_id, "Burned wisp");
        Ok(())
    }

    // ============================================================
    // Agent pinning
    // ============================================================

    /// Pin an instance to the agent's context.
    pub fn attach(&self, ctx: &mut AgentContext, instance_id: &str) -> Result<()> {
        let instance = self.load_instance(instance_id)?;
        self.ensure_open(&instance)?;
        tracing::debug!(agent = %ctx.agent, instance = %instance_id, "Attached molecule");
        ctx.attached = Some(instance.id);
        Ok(())
    }

    /// Unpin whatever the agent had attached, returning it.
    pub fn detach(&self, ctx: &mut AgentContext) -> Option<String> {
        let previous = ctx.attached.take();
        if let Some(ref id) = previous {
            tracing::debug!(agent = %ctx.agent, instance = %id, "Detached molecule");
        }
        previous
    }

    // ============================================================
    // Helpers
    // ============================================================

    fn load_instance(&self, id: &str) -> Result<Instance> {
        self.store
            .get_instance(id)?
            .ok_or_else(|| Error::not_found("instance", id))
    }

    fn load_step(&self, step_id: &str) -> Result<(Instance, Step)> {
        let step = self
            .store
            .get_step(step_id)?
            .ok_or_else(|| Error::not_found("step", step_id))?;
        let instance = self.load_instance(&step.instance_id)?;
        Ok((instance, step))
    }

    fn ensure_open(&self, instance: &Instance) -> Result<()> {
        if instance.status == InstanceStatus::Squashed {
            return Err(Error::InstanceClosed(instance.id.clone()));
        }
        Ok(())
    }
}
