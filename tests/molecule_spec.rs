use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use gastown::db::Database;
use gastown::error::{Error, StoreError};
use gastown::models::*;
use gastown::molecule::{FormulaLibrary, MoleculeEngine, StepStore, Transition, WorkflowConfig};
use speculate2::speculate;

fn step(id: &str, title: &str) -> StepDef {
    StepDef {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
    }
}

fn formula(name: &str, steps: Vec<StepDef>, compose: Vec<Directive>) -> Formula {
    Formula {
        name: name.to_string(),
        version: 1,
        description: None,
        vars: BTreeMap::new(),
        steps,
        compose,
    }
}

fn library() -> FormulaLibrary {
    let mut library = FormulaLibrary::new();
    library.insert(formula(
        "work",
        vec![
            step("load", "Load context"),
            step("implement", "Implement {{issue}}"),
            step("verify", "Verify"),
        ],
        vec![],
    ));
    let mut patrol = formula(
        "patrol",
        vec![step("scan", "Scan {{rig}}"), step("report", "Report every {{interval}}")],
        vec![],
    );
    patrol.vars.insert(
        "interval".to_string(),
        VarDef {
            description: None,
            default: Some("5m".to_string()),
        },
    );
    library.insert(patrol);
    library.insert(formula(
        "ouroboros",
        vec![step("bite", "Bite tail")],
        vec![Directive::Extends {
            base: "ouroboros".to_string(),
        }],
    ));
    library
}

fn engine_with(config: WorkflowConfig) -> MoleculeEngine<Database> {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    MoleculeEngine::new(db, library(), config)
}

fn vars(pairs: &[(&str, &str)]) -> Bindings {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn statuses(progress: &Progress) -> Vec<StepStatus> {
    progress.steps.iter().map(|s| s.status).collect()
}

/// Delegates to a real database and counts instance writes.
struct CountingStore {
    inner: Database,
    creates: AtomicUsize,
}

impl StepStore for CountingStore {
    fn save_protomolecule(&self, proto: &Protomolecule) -> Result<Protomolecule, StoreError> {
        self.inner.save_protomolecule(proto)
    }
    fn get_protomolecule(&self, id: &str) -> Result<Option<Protomolecule>, StoreError> {
        self.inner.get_protomolecule(id)
    }
    fn create_instance(&self, instance: &Instance, steps: &[Step]) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_instance(instance, steps)
    }
    fn get_instance(&self, id: &str) -> Result<Option<Instance>, StoreError> {
        self.inner.get_instance(id)
    }
    fn get_step(&self, id: &str) -> Result<Option<Step>, StoreError> {
        self.inner.get_step(id)
    }
    fn get_steps(&self, instance_id: &str) -> Result<Vec<Step>, StoreError> {
        self.inner.get_steps(instance_id)
    }
    fn record_exists(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.record_exists(id)
    }
    fn apply_transition(&self, transition: &Transition) -> Result<(), StoreError> {
        self.inner.apply_transition(transition)
    }
    fn squash(&self, instance_id: &str, summary: &str) -> Result<Digest, StoreError> {
        self.inner.squash(instance_id, summary)
    }
    fn burn(&self, wisp_id: &str) -> Result<(), StoreError> {
        self.inner.burn(wisp_id)
    }
}

speculate! {
    before {
        let engine = engine_with(WorkflowConfig::default());
    }

    describe "cook" {
        it "is deterministic" {
            let first = engine.cook("work").unwrap();
            let second = engine.cook("work").unwrap();

            assert_eq!(first.steps, second.steps);
            assert_eq!(first.vars, second.vars);
            assert_eq!(first.id, "proto-work-v1");
        }

        it "rejects a formula that extends itself" {
            assert!(matches!(engine.cook("ouroboros"), Err(Error::Template(_))));
        }

        it "rejects an unknown formula" {
            assert!(matches!(engine.cook("nope"), Err(Error::Template(_))));
        }

        it "refuses to re-cook a changed formula under the same version" {
            let original = engine.cook("work").unwrap();
            let mut edited = library();
            edited.insert(formula("work", vec![step("load", "Load everything")], vec![]));
            let stale = MoleculeEngine::new(engine.store().clone(), edited, WorkflowConfig::default());

            assert!(matches!(stale.cook("work"), Err(Error::Template(_))));
            assert_eq!(engine.protomolecule("proto-work-v1").unwrap().steps, original.steps);
        }

        it "cooks a bumped version alongside the old one" {
            engine.cook("work").unwrap();
            let mut bumped = library();
            let mut work = formula("work", vec![step("load", "Load everything")], vec![]);
            work.version = 2;
            bumped.insert(work);
            let upgraded = MoleculeEngine::new(engine.store().clone(), bumped, WorkflowConfig::default());

            let proto = upgraded.cook("work").unwrap();

            assert_eq!(proto.id, "proto-work-v2");
            assert_eq!(engine.protomolecule("proto-work-v1").unwrap().steps.len(), 3);
        }

        it "stores the protomolecule" {
            engine.cook("patrol").unwrap();
            let proto = engine.protomolecule("proto-patrol-v1").unwrap();
            assert_eq!(proto.vars.len(), 2);
        }
    }

    describe "instantiate" {
        before {
            engine.cook("work").unwrap();
            engine.cook("patrol").unwrap();
        }

        it "materialises steps with the first one ready" {
            let progress = engine.pour("proto-work-v1", &vars(&[("issue", "gt-42")])).unwrap();

            assert_eq!(progress.instance.kind, InstanceKind::Molecule);
            assert_eq!(statuses(&progress), vec![
                StepStatus::Ready,
                StepStatus::Pending,
                StepStatus::Pending,
            ]);
            assert_eq!(progress.steps[1].title, "Implement gt-42");
            assert_eq!(progress.steps[1].id, format!("{}.2", progress.instance.id));
        }

        it "uses declared defaults for unbound slots" {
            let progress = engine.wisp("proto-patrol-v1", &vars(&[("rig", "gastown")])).unwrap();

            assert_eq!(progress.instance.kind, InstanceKind::Wisp);
            assert!(progress.instance.id.starts_with("wisp-"));
            assert_eq!(progress.steps[1].title, "Report every 5m");
        }

        it "names the first missing slot" {
            match engine.wisp("proto-patrol-v1", &Bindings::new()) {
                Err(Error::MissingVariable(name)) => assert_eq!(name, "rig"),
                other => panic!("expected missing variable, got {:?}", other),
            }
        }

        it "fails on an unknown protomolecule" {
            assert!(matches!(
                engine.pour("proto-nope", &Bindings::new()),
                Err(Error::NotFound { .. })
            ));
        }

        it "bonds onto an existing task" {
            let parent = engine.pour("proto-work-v1", &vars(&[("issue", "gt-1")])).unwrap();
            let child = engine
                .bond("proto-work-v1", &vars(&[("issue", "gt-2")]), &parent.steps[1].id)
                .unwrap();

            assert_eq!(child.instance.parent_id.as_deref(), Some(parent.steps[1].id.as_str()));
        }

        it "refuses to bond onto a missing task" {
            assert!(matches!(
                engine.bond("proto-work-v1", &vars(&[("issue", "gt-2")]), "mol-missing"),
                Err(Error::NotFound { .. })
            ));
        }
    }

    describe "close" {
        before {
            engine.cook("work").unwrap();
            let progress = engine.pour("proto-work-v1", &vars(&[("issue", "gt-42")])).unwrap();
            let id = progress.instance.id.clone();
            let load = progress.steps[0].id.clone();
            let implement = progress.steps[1].id.clone();
            let verify = progress.steps[2].id.clone();
        }

        it "walks the whole molecule with continue" {
            let ctx = AgentContext::new("polecat");
            let before = engine.current(&ctx, Some(&id)).unwrap();
            assert_eq!((before.closed, before.total), (0, 3));

            let outcome = engine.close(&load, CloseMode::Continue).unwrap();
            assert_eq!(outcome.activated.as_ref().unwrap().id, implement);
            assert_eq!(outcome.activated.unwrap().status, StepStatus::InProgress);

            engine.close(&implement, CloseMode::Continue).unwrap();
            let last = engine.close(&verify, CloseMode::Continue).unwrap();
            assert!(last.instance_complete);
            assert!(last.activated.is_none());

            let after = engine.current(&ctx, Some(&id)).unwrap();
            assert_eq!((after.closed, after.total), (3, 3));
            assert_eq!(after.instance.status, InstanceStatus::Complete);
            assert_eq!(after.fraction(), 1.0);
        }

        it "leaves the next step ready under no_auto" {
            let outcome = engine.close(&load, CloseMode::NoAuto).unwrap();

            assert!(outcome.activated.is_none());
            assert_eq!(outcome.ready.unwrap().status, StepStatus::Ready);
        }

        it "treats plain as no_auto by default" {
            let outcome = engine.close(&load, CloseMode::Plain).unwrap();
            assert!(outcome.activated.is_none());
            assert_eq!(outcome.ready.unwrap().id, implement);
        }

        it "fails the second close of the last step" {
            engine.close(&load, CloseMode::Continue).unwrap();
            engine.close(&implement, CloseMode::Continue).unwrap();
            engine.close(&verify, CloseMode::Plain).unwrap();

            assert!(matches!(
                engine.close(&verify, CloseMode::Plain),
                Err(Error::AlreadyClosed(_))
            ));
        }

        it "refuses to close a pending step" {
            match engine.close(&verify, CloseMode::Plain) {
                Err(e @ Error::StepNotReady { .. }) => assert!(e.is_conflict()),
                other => panic!("expected not ready, got {:?}", other),
            }
        }

        it "lets exactly one of two racing closers win" {
            let results: Vec<_> = std::thread::scope(|s| {
                let a = s.spawn(|| engine.close(&load, CloseMode::Continue));
                let b = s.spawn(|| engine.close(&load, CloseMode::Continue));
                vec![a.join().unwrap(), b.join().unwrap()]
            });

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results.iter().any(|r| matches!(r, Err(Error::AlreadyClosed(_)))));

            let steps = engine.progress(&id).unwrap().steps;
            let claimed = steps.iter().filter(|s| s.status == StepStatus::InProgress).count();
            assert_eq!(claimed, 1);
        }
    }

    describe "start" {
        before {
            engine.cook("work").unwrap();
            let progress = engine.pour("proto-work-v1", &vars(&[("issue", "gt-7")])).unwrap();
            let load = progress.steps[0].id.clone();
            let implement = progress.steps[1].id.clone();
        }

        it "claims a ready step" {
            let step = engine.start(&load).unwrap();
            assert_eq!(step.status, StepStatus::InProgress);
        }

        it "refuses to claim twice" {
            engine.start(&load).unwrap();
            assert!(matches!(engine.start(&load), Err(Error::StepNotReady { .. })));
        }

        it "refuses to claim a pending step" {
            assert!(matches!(engine.start(&implement), Err(Error::StepNotReady { .. })));
        }
    }

    describe "terminal operations" {
        before {
            engine.cook("work").unwrap();
            engine.cook("patrol").unwrap();
        }

        it "squashes a wisp mid-way into a partial digest" {
            let wisp = engine.wisp("proto-patrol-v1", &vars(&[("rig", "gastown")])).unwrap();
            engine.close(&wisp.steps[0].id, CloseMode::Continue).unwrap();

            let digest = engine.squash(&wisp.instance.id, "Patrol interrupted").unwrap();

            assert_eq!(digest.closed_count(), 1);
            assert_eq!(digest.steps[1].status, StepStatus::InProgress);
            assert_eq!(digest.summary, "Patrol interrupted");
        }

        it "rejects transitions after squash" {
            let molecule = engine.pour("proto-work-v1", &vars(&[("issue", "gt-9")])).unwrap();
            engine.squash(&molecule.instance.id, "Abandoned").unwrap();

            assert!(matches!(
                engine.close(&molecule.steps[0].id, CloseMode::Plain),
                Err(Error::InstanceClosed(_))
            ));
            assert!(matches!(
                engine.squash(&molecule.instance.id, "Again"),
                Err(Error::InstanceClosed(_))
            ));
        }

        it "lets exactly one of two racing squashes write a digest" {
            let molecule = engine.pour("proto-work-v1", &vars(&[("issue", "gt-9")])).unwrap();
            let id = molecule.instance.id.clone();

            let results: Vec<_> = std::thread::scope(|s| {
                let a = s.spawn(|| engine.squash(&id, "From a"));
                let b = s.spawn(|| engine.squash(&id, "From b"));
                vec![a.join().unwrap(), b.join().unwrap()]
            });

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results.iter().any(|r| matches!(r, Err(Error::InstanceClosed(_)))));
            assert_eq!(engine.store().get_digests_for_instance(&id).unwrap().len(), 1);
        }

        it "refuses to burn a molecule" {
            let molecule = engine.pour("proto-work-v1", &vars(&[("issue", "gt-9")])).unwrap();
            assert!(matches!(
                engine.burn(&molecule.instance.id),
                Err(Error::NotAWisp(_))
            ));
        }

        it "burns a wisp without a trace" {
            let wisp = engine.wisp("proto-patrol-v1", &vars(&[("rig", "beads")])).unwrap();
            engine.burn(&wisp.instance.id).unwrap();

            assert!(matches!(
                engine.progress(&wisp.instance.id),
                Err(Error::NotFound { .. })
            ));
            assert!(engine.store().get_digests_for_instance(&wisp.instance.id).unwrap().is_empty());
        }
    }

    describe "attachment" {
        before {
            engine.cook("work").unwrap();
            let molecule = engine.pour("proto-work-v1", &vars(&[("issue", "gt-3")])).unwrap();
            let id = molecule.instance.id.clone();
        }

        it "resolves current through the attached molecule" {
            let mut ctx = AgentContext::new("gastown/crew/max");
            engine.attach(&mut ctx, &id).unwrap();

            let progress = engine.current(&ctx, None).unwrap();
            assert_eq!(progress.instance.id, id);
            assert_eq!(progress.current_step().unwrap().ref_id, "load");
        }

        it "lets several agents attach the same molecule" {
            let mut a = AgentContext::new("a");
            let mut b = AgentContext::new("b");
            engine.attach(&mut a, &id).unwrap();
            engine.attach(&mut b, &id).unwrap();

            assert_eq!(engine.detach(&mut a), Some(id.clone()));
            assert!(a.attached.is_none());
            assert_eq!(b.attached, Some(id.clone()));
        }

        it "fails current with nothing attached" {
            let ctx = AgentContext::new("idle");
            assert!(matches!(engine.current(&ctx, None), Err(Error::NotFound { .. })));
        }

        it "refuses to attach a missing molecule" {
            let mut ctx = AgentContext::new("x");
            assert!(engine.attach(&mut ctx, "mol-missing").is_err());
            assert!(ctx.attached.is_none());
        }
    }
}

#[test]
fn plain_close_claims_next_when_auto_continue_is_on() {
    let engine = engine_with(WorkflowConfig { auto_continue: true });
    engine.cook("work").unwrap();
    let progress = engine
        .pour("proto-work-v1", &vars(&[("issue", "gt-1")]))
        .unwrap();

    let outcome = engine
        .close(&progress.steps[0].id, CloseMode::Plain)
        .unwrap();

    assert_eq!(outcome.activated.unwrap().status, StepStatus::InProgress);
}

#[test]
fn missing_variable_writes_nothing() {
    let inner = Database::open_memory().unwrap();
    inner.migrate().unwrap();
    let store = CountingStore {
        inner,
        creates: AtomicUsize::new(0),
    };
    let engine = MoleculeEngine::new(store, library(), WorkflowConfig::default());
    engine.cook("work").unwrap();

    let result = engine.pour("proto-work-v1", &Bindings::new());

    assert!(matches!(result, Err(Error::MissingVariable(ref name)) if name == "issue"));
    assert_eq!(engine.store().creates.load(Ordering::SeqCst), 0);
    assert!(engine.store().inner.list_instances(None).unwrap().is_empty());
}
