//! Machine and diagnosis persistence.
//! `MachineStore` is the seam; an in-memory map serves tests and embedding,
//! SQLite serves the CLI. Machine records are stored as versioned JSON.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{now_unix_ms, DiagnosisResult, GmiaModel, Machine, StoredModel};

pub trait MachineStore: Send + Sync {
    fn get_machine(&self, machine_id: &str) -> Result<Option<Machine>>;
    fn put_machine(&self, machine: &Machine) -> Result<()>;
    fn list_machines(&self) -> Result<Vec<String>>;
    fn record_diagnosis(&self, result: &DiagnosisResult) -> Result<()>;
    fn latest_diagnosis(&self, machine_id: &str) -> Result<Option<DiagnosisResult>>;

    /// Append a trained model to the machine, creating the machine if needed.
    fn add_model(&self, machine_id: &str, model: GmiaModel) -> Result<Machine> {
        let mut machine = self
            .get_machine(machine_id)?
            .unwrap_or_else(|| Machine::new(machine_id));
        machine.models.push(StoredModel::from(model));
        self.put_machine(&machine)?;
        Ok(machine)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    machines: Mutex<HashMap<String, Machine>>,
    diagnoses: Mutex<HashMap<String, Vec<DiagnosisResult>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MachineStore for MemoryStore {
    fn get_machine(&self, machine_id: &str) -> Result<Option<Machine>> {
        Ok(self.machines.lock().get(machine_id).cloned())
    }

    fn put_machine(&self, machine: &Machine) -> Result<()> {
        self.machines
            .lock()
            .insert(machine.id.clone(), machine.clone());
        Ok(())
    }

    fn list_machines(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.machines.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn record_diagnosis(&self, result: &DiagnosisResult) -> Result<()> {
        self.diagnoses
            .lock()
            .entry(result.machine_id.clone())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    fn latest_diagnosis(&self, machine_id: &str) -> Result<Option<DiagnosisResult>> {
        Ok(self
            .diagnoses
            .lock()
            .get(machine_id)
            .and_then(|v| v.iter().max_by_key(|r| r.timestamp).cloned()))
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;
        info!(path = %db_path.display(), "machine store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS machines (
                machine_id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS diagnoses (
                id TEXT PRIMARY KEY,
                machine_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                record TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_diagnoses_machine
                ON diagnoses(machine_id, timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl MachineStore for SqliteStore {
    fn get_machine(&self, machine_id: &str) -> Result<Option<Machine>> {
        let conn = self.conn.lock();
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM machines WHERE machine_id = ?1",
                params![machine_id],
                |row| row.get(0),
            )
            .optional()?;
        record
            .map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    fn put_machine(&self, machine: &Machine) -> Result<()> {
        let json = serde_json::to_string(machine)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO machines (machine_id, record, updated_at)
             VALUES (?1, ?2, ?3)",
            params![machine.id, json, now_unix_ms()],
        )?;
        debug!(machine_id = %machine.id, models = machine.models.len(), "machine saved");
        Ok(())
    }

    fn list_machines(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT machine_id FROM machines ORDER BY machine_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn record_diagnosis(&self, result: &DiagnosisResult) -> Result<()> {
        let json = serde_json::to_string(result)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO diagnoses (id, machine_id, timestamp, record)
             VALUES (?1, ?2, ?3, ?4)",
            params![result.id, result.machine_id, result.timestamp, json],
        )?;
        Ok(())
    }

    fn latest_diagnosis(&self, machine_id: &str) -> Result<Option<DiagnosisResult>> {
        let conn = self.conn.lock();
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM diagnoses WHERE machine_id = ?1
                 ORDER BY timestamp DESC LIMIT 1",
                params![machine_id],
                |row| row.get(0),
            )
            .optional()?;
        record
            .map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }
}

/// Lazily loaded, shared model set for one machine. Loaded at most once
/// per handle; an empty set is not cached so a later training is picked up.
pub struct ModelHandle {
    machine_id: String,
    models: OnceLock<Arc<Vec<GmiaModel>>>,
}

impl ModelHandle {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            models: OnceLock::new(),
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn get_or_load(&self, store: &dyn MachineStore) -> Result<Arc<Vec<GmiaModel>>> {
        if let Some(models) = self.models.get() {
            return Ok(Arc::clone(models));
        }
        let loaded = store
            .get_machine(&self.machine_id)?
            .map(|m| m.current_models())
            .unwrap_or_default();
        if loaded.is_empty() {
            return Ok(Arc::new(loaded));
        }
        debug!(machine_id = %self.machine_id, models = loaded.len(), "models loaded");
        Ok(Arc::clone(self.models.get_or_init(|| Arc::new(loaded))))
    }
}
