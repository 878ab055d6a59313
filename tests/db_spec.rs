use chrono::Utc;
use gastown::db::Database;
use gastown::error::StoreError;
use gastown::models::*;
use gastown::molecule::{StatusChange, StepStore, Transition};
use speculate2::speculate;

fn make_instance(kind: InstanceKind, statuses: &[StepStatus]) -> (Instance, Vec<Step>) {
    let now = Utc::now();
    let instance = Instance {
        id: kind.new_id(),
        proto_id: "proto-test".to_string(),
        kind,
        parent_id: None,
        status: InstanceStatus::Active,
        created_at: now,
        updated_at: now,
    };
    let total = statuses.len() as u32;
    let steps = statuses
        .iter()
        .zip(1..)
        .map(|(status, ordinal)| Step {
            id: Step::id_for(&instance.id, ordinal),
            instance_id: instance.id.clone(),
            ordinal,
            ref_id: format!("step{}", ordinal),
            title: format!("Step {}", ordinal),
            description: String::new(),
            status: *status,
            next_id: (ordinal < total).then(|| Step::id_for(&instance.id, ordinal + 1)),
            updated_at: now,
        })
        .collect();
    (instance, steps)
}

fn create(db: &Database, kind: InstanceKind, statuses: &[StepStatus]) -> (Instance, Vec<Step>) {
    let (instance, steps) = make_instance(kind, statuses);
    db.create_instance(&instance, &steps)
        .expect("Failed to create instance");
    (instance, steps)
}

fn change(step: &Step, expected: StepStatus, to: StepStatus) -> StatusChange {
    StatusChange {
        step_id: step.id.clone(),
        expected,
        to,
    }
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "protomolecules" {
        it "stores and loads a protomolecule with its steps and slots" {
            let proto = Protomolecule {
                id: "proto-shiny-v2".to_string(),
                formula: "shiny".to_string(),
                version: 2,
                description: Some("Ship a feature".to_string()),
                steps: vec![ProtoStep {
                    ref_id: "implement".to_string(),
                    title: "Implement {{issue}}".to_string(),
                    description: String::new(),
                }],
                vars: vec![VarSlot {
                    name: "issue".to_string(),
                    description: None,
                    default: None,
                }],
                created_at: Utc::now(),
            };

            db.save_protomolecule(&proto).expect("Failed to save");
            let loaded = db.get_protomolecule("proto-shiny-v2").expect("Query failed").unwrap();

            assert_eq!(loaded.steps, proto.steps);
            assert_eq!(loaded.vars, proto.vars);
            assert_eq!(loaded.version, 2);
            assert_eq!(db.list_protomolecules().unwrap().len(), 1);
        }

        it "never overwrites a stored protomolecule" {
            let original = Protomolecule {
                id: "proto-shiny-v1".to_string(),
                formula: "shiny".to_string(),
                version: 1,
                description: None,
                steps: vec![ProtoStep {
                    ref_id: "design".to_string(),
                    title: "Design".to_string(),
                    description: String::new(),
                }],
                vars: vec![],
                created_at: Utc::now(),
            };
            db.save_protomolecule(&original).unwrap();

            let mut edited = original.clone();
            edited.steps[0].title = "Redesign".to_string();
            let stored = db.save_protomolecule(&edited).unwrap();

            assert_eq!(stored.steps, original.steps);
            assert_eq!(
                db.get_protomolecule("proto-shiny-v1").unwrap().unwrap().steps,
                original.steps
            );
        }

        it "returns None for an unknown protomolecule" {
            assert!(db.get_protomolecule("proto-missing").unwrap().is_none());
        }
    }

    describe "instances" {
        it "returns steps in ordinal order" {
            let (instance, _) = create(&db, InstanceKind::Molecule, &[
                StepStatus::Ready,
                StepStatus::Pending,
                StepStatus::Pending,
            ]);

            let steps = db.get_steps(&instance.id).unwrap();
            let ordinals: Vec<u32> = steps.iter().map(|s| s.ordinal).collect();

            assert_eq!(ordinals, vec![1, 2, 3]);
            assert_eq!(steps[0].next_id.as_deref(), Some(steps[1].id.as_str()));
            assert!(steps[2].next_id.is_none());
        }

        it "keeps wisps out of the durable listing" {
            create(&db, InstanceKind::Molecule, &[StepStatus::Ready]);
            let (wisp, _) = create(&db, InstanceKind::Wisp, &[StepStatus::Ready]);

            let molecules = db.list_instances(Some(InstanceKind::Molecule)).unwrap();
            let wisps = db.list_instances(Some(InstanceKind::Wisp)).unwrap();

            assert_eq!(molecules.len(), 1);
            assert_eq!(wisps.len(), 1);
            assert_eq!(wisps[0].id, wisp.id);
            assert_eq!(db.list_instances(None).unwrap().len(), 2);
        }

        it "knows which records exist" {
            let (instance, steps) = create(&db, InstanceKind::Molecule, &[StepStatus::Ready]);

            assert!(db.record_exists(&instance.id).unwrap());
            assert!(db.record_exists(&steps[0].id).unwrap());
            assert!(!db.record_exists("mol-nope").unwrap());
        }
    }

    describe "apply_transition" {
        it "applies every change when expectations hold" {
            let (instance, steps) = create(&db, InstanceKind::Molecule, &[
                StepStatus::InProgress,
                StepStatus::Pending,
            ]);

            db.apply_transition(&Transition {
                instance_id: instance.id.clone(),
                changes: vec![
                    change(&steps[0], StepStatus::InProgress, StepStatus::Closed),
                    change(&steps[1], StepStatus::Pending, StepStatus::InProgress),
                ],
                complete: false,
            }).expect("Transition failed");

            let steps = db.get_steps(&instance.id).unwrap();
            assert_eq!(steps[0].status, StepStatus::Closed);
            assert_eq!(steps[1].status, StepStatus::InProgress);
        }

        it "applies nothing when any expectation fails" {
            let (instance, steps) = create(&db, InstanceKind::Molecule, &[
                StepStatus::InProgress,
                StepStatus::Ready,
            ]);

            let result = db.apply_transition(&Transition {
                instance_id: instance.id.clone(),
                changes: vec![
                    change(&steps[0], StepStatus::InProgress, StepStatus::Closed),
                    change(&steps[1], StepStatus::Pending, StepStatus::InProgress),
                ],
                complete: false,
            });

            match result {
                Err(StoreError::Conflict { step_id, actual }) => {
                    assert_eq!(step_id, steps[1].id);
                    assert_eq!(actual, StepStatus::Ready);
                }
                other => panic!("expected conflict, got {:?}", other),
            }
            let after = db.get_steps(&instance.id).unwrap();
            assert_eq!(after[0].status, StepStatus::InProgress);
        }

        it "marks the instance complete when asked" {
            let (instance, steps) = create(&db, InstanceKind::Wisp, &[StepStatus::Ready]);

            db.apply_transition(&Transition {
                instance_id: instance.id.clone(),
                changes: vec![change(&steps[0], StepStatus::Ready, StepStatus::Closed)],
                complete: true,
            }).unwrap();

            let loaded = db.get_instance(&instance.id).unwrap().unwrap();
            assert_eq!(loaded.status, InstanceStatus::Complete);
        }

        it "reports a missing step as not found" {
            let (instance, _) = create(&db, InstanceKind::Molecule, &[StepStatus::Ready]);

            let result = db.apply_transition(&Transition {
                instance_id: instance.id.clone(),
                changes: vec![StatusChange {
                    step_id: format!("{}.9", instance.id),
                    expected: StepStatus::Ready,
                    to: StepStatus::Closed,
                }],
                complete: false,
            });

            assert!(matches!(result, Err(StoreError::NotFound(_))));
        }

        it "rejects changes to a squashed instance" {
            for kind in [InstanceKind::Molecule, InstanceKind::Wisp] {
                let (instance, steps) = create(&db, kind, &[StepStatus::Ready]);
                db.squash(&instance.id, "Shelved").unwrap();

                let result = db.apply_transition(&Transition {
                    instance_id: instance.id.clone(),
                    changes: vec![change(&steps[0], StepStatus::Ready, StepStatus::Closed)],
                    complete: true,
                });

                assert!(matches!(result, Err(StoreError::Squashed(ref id)) if *id == instance.id));
                assert_eq!(db.get_step(&steps[0].id).unwrap().unwrap().status, StepStatus::Ready);
                assert_eq!(
                    db.get_instance(&instance.id).unwrap().unwrap().status,
                    InstanceStatus::Squashed
                );
            }
        }
    }

    describe "squash" {
        it "stores a durable digest and keeps the steps" {
            let (wisp, _) = create(&db, InstanceKind::Wisp, &[
                StepStatus::Closed,
                StepStatus::InProgress,
            ]);

            let digest = db.squash(&wisp.id, "Patrol cut short").expect("Squash failed");

            assert_eq!(digest.kind, InstanceKind::Wisp);
            assert_eq!(digest.closed_count(), 1);
            assert_eq!(db.get_digest(digest.id).unwrap().unwrap(), digest);
            assert_eq!(db.get_digests_for_instance(&wisp.id).unwrap().len(), 1);

            let loaded = db.get_instance(&wisp.id).unwrap().unwrap();
            assert_eq!(loaded.status, InstanceStatus::Squashed);
            assert_eq!(db.get_steps(&wisp.id).unwrap().len(), 2);
        }

        it "squashes a molecule in one transaction" {
            let (molecule, _) = create(&db, InstanceKind::Molecule, &[StepStatus::Closed]);

            let digest = db.squash(&molecule.id, "Done").unwrap();

            assert_eq!(digest.steps.len(), 1);
            let loaded = db.get_instance(&molecule.id).unwrap().unwrap();
            assert_eq!(loaded.status, InstanceStatus::Squashed);
        }

        it "squashes an instance only once" {
            for kind in [InstanceKind::Molecule, InstanceKind::Wisp] {
                let (instance, _) = create(&db, kind, &[StepStatus::Closed]);
                db.squash(&instance.id, "First").unwrap();

                let second = db.squash(&instance.id, "Second");

                assert!(matches!(second, Err(StoreError::Squashed(_))));
                let digests = db.get_digests_for_instance(&instance.id).unwrap();
                assert_eq!(digests.len(), 1);
                assert_eq!(digests[0].summary, "First");
            }
        }

        it "reports an unknown instance as not found" {
            assert!(matches!(db.squash("wisp-missing", "x"), Err(StoreError::NotFound(_))));
            assert!(matches!(db.squash("mol-missing", "x"), Err(StoreError::NotFound(_))));
        }
    }

    describe "burn" {
        it "removes the wisp and its steps" {
            let (wisp, steps) = create(&db, InstanceKind::Wisp, &[StepStatus::Ready, StepStatus::Pending]);

            db.burn(&wisp.id).expect("Burn failed");

            assert!(db.get_instance(&wisp.id).unwrap().is_none());
            assert!(db.get_step(&steps[0].id).unwrap().is_none());
            assert!(db.get_steps(&wisp.id).unwrap().is_empty());
        }

        it "reports an unknown wisp as not found" {
            assert!(matches!(db.burn("wisp-missing"), Err(StoreError::NotFound(_))));
        }
    }

    describe "agent contexts" {
        it "starts with nothing attached" {
            let ctx = db.load_agent_context("gastown/witness").unwrap();
            assert_eq!(ctx, AgentContext::new("gastown/witness"));
        }

        it "persists and overwrites attachments" {
            let mut ctx = AgentContext::new("mayor");
            ctx.attached = Some("mol-aaaa".to_string());
            db.save_agent_context(&ctx).unwrap();
            assert_eq!(db.load_agent_context("mayor").unwrap().attached.as_deref(), Some("mol-aaaa"));

            ctx.attached = None;
            db.save_agent_context(&ctx).unwrap();
            assert!(db.load_agent_context("mayor").unwrap().attached.is_none());
        }
    }
}

#[test]
fn open_keeps_wisps_in_a_separate_file() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join(".gastown").join("town.db")).unwrap();
    db.migrate().unwrap();

    let (wisp, steps) = make_instance(InstanceKind::Wisp, &[StepStatus::Ready]);
    db.create_instance(&wisp, &steps).unwrap();

    assert!(dir.path().join(".gastown/town.db").exists());
    assert!(dir.path().join(".gastown/wisps.db").exists());
    assert!(db.list_instances(Some(InstanceKind::Molecule)).unwrap().is_empty());

    let reopened = Database::open(dir.path().join(".gastown").join("town.db")).unwrap();
    assert_eq!(reopened.get_instance(&wisp.id).unwrap().unwrap().id, wisp.id);
}
