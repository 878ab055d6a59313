mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::*;
use crate::molecule::{StepStore, Transition};

const INSTANCE_COLUMNS: &str = "id, proto_id, kind, parent_id, status, created_at, updated_at";
const STEP_COLUMNS: &str =
    "id, instance_id, ordinal, ref_id, title, description, status, next_id, updated_at";

/// SQLite-backed step store.
///
/// Durable records (protomolecules, molecules, digests, agent contexts) live
/// in the town database. Wisps live in a sibling `wisps.db` that is never
/// part of the durable store. Ids are routed to the right connection by
/// their `mol-` / `wisp-` prefix.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    wisps: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let wisp_path = parent.join("wisps.db");

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let wisps = Connection::open(&wisp_path)?;
        wisps.pragma_update(None, "journal_mode", "WAL")?;

        tracing::debug!(
            "Opened town database at {} (wisps at {})",
            path.display(),
            wisp_path.display()
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            wisps: Arc::new(Mutex::new(wisps)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "gastown")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("town.db");
        Self::open(db_path)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let wisps = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            wisps: Arc::new(Mutex::new(wisps)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        {
            let conn = self.conn.lock().expect("database lock poisoned");
            schema::run_migrations(&conn)?;
        }
        let wisps = self.wisps.lock().expect("database lock poisoned");
        schema::run_migrations(&wisps)
    }

    /// The connection holding records for an instance or step id.
    fn conn_for(&self, id: &str) -> &Mutex<Connection> {
        match InstanceKind::of_id(id) {
            InstanceKind::Wisp => &self.wisps,
            InstanceKind::Molecule => &self.conn,
        }
    }

    // ============================================================
    // Instance listing
    // ============================================================

    /// Instances of the given kind (or all), newest first.
    pub fn list_instances(&self, kind: Option<InstanceKind>) -> Result<Vec<Instance>> {
        let mut out = Vec::new();
        for k in [InstanceKind::Molecule, InstanceKind::Wisp] {
            if kind.is_some_and(|want| want != k) {
                continue;
            }
            let conn = match k {
                InstanceKind::Molecule => self.conn.lock().expect("database lock poisoned"),
                InstanceKind::Wisp => self.wisps.lock().expect("database lock poisoned"),
            };
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM instances ORDER BY created_at DESC",
                INSTANCE_COLUMNS
            ))?;
            let instances = stmt
                .query_map([], instance_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            out.extend(instances);
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub fn list_protomolecules(&self) -> Result<Vec<Protomolecule>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, formula, version, description, steps, vars, created_at
             FROM protomolecules ORDER BY id",
        )?;
        let protos = stmt
            .query_map([], proto_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(protos)
    }

    // ============================================================
    // Digest operations
    // ============================================================

    pub fn get_digest(&self, id: Uuid) -> Result<Option<Digest>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let digest = conn
            .query_row(
                "SELECT id, instance_id, kind, summary, steps, created_at
                 FROM digests WHERE id = ?",
                [id.to_string()],
                digest_from_row,
            )
            .optional()?;
        Ok(digest)
    }

    pub fn get_digests_for_instance(&self, instance_id: &str) -> Result<Vec<Digest>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, instance_id, kind, summary, steps, created_at
             FROM digests WHERE instance_id = ? ORDER BY created_at DESC",
        )?;
        let digests = stmt
            .query_map([instance_id], digest_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(digests)
    }

    // ============================================================
    // Agent context operations
    // ============================================================

    /// The stored context for `agent`, or an empty one.
    pub fn load_agent_context(&self, agent: &str) -> Result<AgentContext> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let attached: Option<Option<String>> = conn
            .query_row(
                "SELECT molecule_id FROM agent_contexts WHERE agent = ?",
                [agent],
                |row| row.get(0),
            )
            .optional()?;
        Ok(AgentContext {
            agent: agent.to_string(),
            attached: attached.flatten(),
        })
    }

    pub fn save_agent_context(&self, ctx: &AgentContext) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO agent_contexts (agent, molecule_id, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(agent) DO UPDATE SET molecule_id = excluded.molecule_id, updated_at = excluded.updated_at",
            (&ctx.agent, &ctx.attached, Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }
}

impl StepStore for Database {
    fn save_protomolecule(&self, proto: &Protomolecule) -> Result<Protomolecule, StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO protomolecules (id, formula, version, description, steps, vars, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
            (
                &proto.id,
                &proto.formula,
                proto.version,
                &proto.description,
                serde_json::to_string(&proto.steps)?,
                serde_json::to_string(&proto.vars)?,
                proto.created_at.to_rfc3339(),
            ),
        )?;
        let stored = conn.query_row(
            "SELECT id, formula, version, description, steps, vars, created_at
             FROM protomolecules WHERE id = ?",
            [&proto.id],
            proto_from_row,
        )?;
        Ok(stored)
    }

    fn get_protomolecule(&self, id: &str) -> Result<Option<Protomolecule>, StoreError> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let proto = conn
            .query_row(
                "SELECT id, formula, version, description, steps, vars, created_at
                 FROM protomolecules WHERE id = ?",
                [id],
                proto_from_row,
            )
            .optional()?;
        Ok(proto)
    }

    fn create_instance(&self, instance: &Instance, steps: &[Step]) -> Result<(), StoreError> {
        let mut conn = self
            .conn_for(&instance.id)
            .lock()
            .expect("database lock poisoned");
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO instances (id, proto_id, kind, parent_id, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            (
                &instance.id,
                &instance.proto_id,
                instance.kind.as_str(),
                &instance.parent_id,
                instance.status.as_str(),
                instance.created_at.to_rfc3339(),
                instance.updated_at.to_rfc3339(),
            ),
        )?;

        for step in steps {
            tx.execute(
                "INSERT INTO steps (id, instance_id, ordinal, ref_id, title, description, status, next_id, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &step.id,
                    &step.instance_id,
                    step.ordinal,
                    &step.ref_id,
                    &step.title,
                    &step.description,
                    step.status.as_str(),
                    &step.next_id,
                    step.updated_at.to_rfc3339(),
                ),
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn get_instance(&self, id: &str) -> Result<Option<Instance>, StoreError> {
        let conn = self.conn_for(id).lock().expect("database lock poisoned");
        load_instance(&conn, id)
    }

    fn get_step(&self, id: &str) -> Result<Option<Step>, StoreError> {
        let conn = self.conn_for(id).lock().expect("database lock poisoned");
        let step = conn
            .query_row(
                &format!("SELECT {} FROM steps WHERE id = ?", STEP_COLUMNS),
                [id],
                step_from_row,
            )
            .optional()?;
        Ok(step)
    }

    fn get_steps(&self, instance_id: &str) -> Result<Vec<Step>, StoreError> {
        let conn = self
            .conn_for(instance_id)
            .lock()
            .expect("database lock poisoned");
        load_steps(&conn, instance_id)
    }

    fn record_exists(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn_for(id).lock().expect("database lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM instances WHERE id = ?1)
                  + (SELECT COUNT(*) FROM steps WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn apply_transition(&self, transition: &Transition) -> Result<(), StoreError> {
        let mut conn = self
            .conn_for(&transition.instance_id)
            .lock()
            .expect("database lock poisoned");
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        match load_instance(&tx, &transition.instance_id)? {
            None => return Err(StoreError::NotFound(transition.instance_id.clone())),
            Some(instance) if instance.status == InstanceStatus::Squashed => {
                return Err(StoreError::Squashed(instance.id))
            }
            Some(_) => {}
        }

        for change in &transition.changes {
            let rows = tx.execute(
                "UPDATE steps SET status = ?, updated_at = ?
                 WHERE id = ? AND instance_id = ? AND status = ?",
                (
                    change.to.as_str(),
                    &now,
                    &change.step_id,
                    &transition.instance_id,
                    change.expected.as_str(),
                ),
            )?;

            if rows == 0 {
                // Dropping the transaction rolls back earlier changes.
                let actual: Option<String> = tx
                    .query_row(
                        "SELECT status FROM steps WHERE id = ? AND instance_id = ?",
                        (&change.step_id, &transition.instance_id),
                        |row| row.get(0),
                    )
                    .optional()?;
                return Err(match actual {
                    Some(status) => StoreError::Conflict {
                        step_id: change.step_id.clone(),
                        actual: StepStatus::from_str(&status).unwrap_or(StepStatus::Pending),
                    },
                    None => StoreError::NotFound(change.step_id.clone()),
                });
            }
        }

        let status = if transition.complete {
            InstanceStatus::Complete
        } else {
            InstanceStatus::Active
        };
        tx.execute(
            "UPDATE instances SET status = ?, updated_at = ? WHERE id = ? AND status != 'squashed'",
            (status.as_str(), &now, &transition.instance_id),
        )?;

        tx.commit()?;
        Ok(())
    }

    fn squash(&self, instance_id: &str, summary: &str) -> Result<Digest, StoreError> {
        match InstanceKind::of_id(instance_id) {
            InstanceKind::Molecule => {
                let mut conn = self.conn.lock().expect("database lock poisoned");
                let tx = conn.transaction()?;
                let digest = squash_in(&tx, instance_id, summary)?;
                insert_digest(&tx, &digest)?;
                tx.commit()?;
                Ok(digest)
            }
            InstanceKind::Wisp => {
                // Mark first; a failed digest insert rolls the mark back.
                let mut wisps = self.wisps.lock().expect("database lock poisoned");
                let tx = wisps.transaction()?;
                let digest = squash_in(&tx, instance_id, summary)?;
                {
                    let conn = self.conn.lock().expect("database lock poisoned");
                    insert_digest(&conn, &digest)?;
                }
                if let Err(e) = tx.commit() {
                    let conn = self.conn.lock().expect("database lock poisoned");
                    if let Err(undo) =
                        conn.execute("DELETE FROM digests WHERE id = ?", [digest.id.to_string()])
                    {
                        tracing::warn!(digest = %digest.id, "Failed to remove orphaned digest: {}", undo);
                    }
                    return Err(e.into());
                }
                Ok(digest)
            }
        }
    }

    fn burn(&self, wisp_id: &str) -> Result<(), StoreError> {
        let mut wisps = self.wisps.lock().expect("database lock poisoned");
        let tx = wisps.transaction()?;
        tx.execute("DELETE FROM steps WHERE instance_id = ?", [wisp_id])?;
        let rows = tx.execute("DELETE FROM instances WHERE id = ?", [wisp_id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(wisp_id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            wisps: self.wisps.clone(),
        }
    }
}

fn insert_digest(conn: &Connection, digest: &Digest) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO digests (id, instance_id, kind, summary, steps, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            digest.id.to_string(),
            &digest.instance_id,
            digest.kind.as_str(),
            &digest.summary,
            serde_json::to_string(&digest.steps)?,
            digest.created_at.to_rfc3339(),
        ),
    )?;
    Ok(())
}

fn load_instance(conn: &Connection, id: &str) -> Result<Option<Instance>, StoreError> {
    let instance = conn
        .query_row(
            &format!("SELECT {} FROM instances WHERE id = ?", INSTANCE_COLUMNS),
            [id],
            instance_from_row,
        )
        .optional()?;
    Ok(instance)
}

fn load_steps(conn: &Connection, instance_id: &str) -> Result<Vec<Step>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM steps WHERE instance_id = ? ORDER BY ordinal",
        STEP_COLUMNS
    ))?;
    let steps = stmt
        .query_map([instance_id], step_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(steps)
}

/// Snapshot the instance and mark it squashed on `conn`, which must hold the
/// instance. Only the first squash of an instance succeeds.
fn squash_in(conn: &Connection, instance_id: &str, summary: &str) -> Result<Digest, StoreError> {
    let instance = load_instance(conn, instance_id)?
        .ok_or_else(|| StoreError::NotFound(instance_id.to_string()))?;
    let steps = load_steps(conn, instance_id)?;
    let now = Utc::now();

    let rows = conn.execute(
        "UPDATE instances SET status = 'squashed', updated_at = ?
         WHERE id = ? AND status != 'squashed'",
        (now.to_rfc3339(), instance_id),
    )?;
    if rows == 0 {
        return Err(StoreError::Squashed(instance.id));
    }

    Ok(Digest {
        id: Uuid::new_v4(),
        instance_id: instance.id,
        kind: instance.kind,
        summary: summary.to_string(),
        steps: steps
            .into_iter()
            .map(|s| StepSnapshot {
                id: s.id,
                title: s.title,
                status: s.status,
            })
            .collect(),
        created_at: now,
    })
}

fn instance_from_row(row: &Row) -> rusqlite::Result<Instance> {
    Ok(Instance {
        id: row.get(0)?,
        proto_id: row.get(1)?,
        kind: InstanceKind::from_str(&row.get::<_, String>(2)?).unwrap_or(InstanceKind::Molecule),
        parent_id: row.get(3)?,
        status: InstanceStatus::from_str(&row.get::<_, String>(4)?)
            .unwrap_or(InstanceStatus::Active),
        created_at: parse_datetime(row.get::<_, String>(5)?),
        updated_at: parse_datetime(row.get::<_, String>(6)?),
    })
}

fn step_from_row(row: &Row) -> rusqlite::Result<Step> {
    Ok(Step {
        id: row.get(0)?,
        instance_id: row.get(1)?,
        ordinal: row.get(2)?,
        ref_id: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        status: StepStatus::from_str(&row.get::<_, String>(6)?).unwrap_or(StepStatus::Pending),
        next_id: row.get(7)?,
        updated_at: parse_datetime(row.get::<_, String>(8)?),
    })
}

fn proto_from_row(row: &Row) -> rusqlite::Result<Protomolecule> {
    let steps_json: String = row.get(4)?;
    let vars_json: String = row.get(5)?;
    Ok(Protomolecule {
        id: row.get(0)?,
        formula: row.get(1)?,
        version: row.get(2)?,
        description: row.get(3)?,
        steps: serde_json::from_str(&steps_json).map_err(|e| json_error(4, e))?,
        vars: serde_json::from_str(&vars_json).map_err(|e| json_error(5, e))?,
        created_at: parse_datetime(row.get::<_, String>(6)?),
    })
}

fn digest_from_row(row: &Row) -> rusqlite::Result<Digest> {
    let steps_json: String = row.get(4)?;
    Ok(Digest {
        id: parse_uuid(row.get::<_, String>(0)?),
        instance_id: row.get(1)?,
        kind: InstanceKind::from_str(&row.get::<_, String>(2)?).unwrap_or(InstanceKind::Molecule),
        summary: row.get(3)?,
        steps: serde_json::from_str(&steps_json).map_err(|e| json_error(4, e))?,
        created_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

fn json_error(column: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
