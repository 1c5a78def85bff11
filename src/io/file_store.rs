use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;

use crate::editor::sync::StructuralBatch;
use crate::io::lock::FileLock;
use crate::io::store::{InMemoryStore, RemoteStore, Snapshot, StoreError};
use crate::model::step::{
    ActionStepData, BranchKind, FieldValue, GroupKey, ParentId, StepField, StepId, TriggerStep,
};
use crate::model::workflow::WorkflowDefinition;

pub const WORKFLOW_FILE: &str = "workflow.json";

/// Store backed by `workflow.json` in a project directory.
///
/// Every call locks the directory, reads the document, applies the change
/// through an `InMemoryStore` and writes the result back atomically, so a
/// failed or rejected call leaves the file untouched.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    path: PathBuf,
    lock_timeout: Duration,
}

impl JsonFileStore {
    /// Open the store in `dir`; `workflow.json` must exist.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let store = Self::at(dir);
        if !store.path.exists() {
            return Err(StoreError::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", store.path.display()),
            )));
        }
        Ok(store)
    }

    /// Write a fresh empty workflow named `name` to `dir`.
    pub fn create(dir: &Path, name: &str) -> Result<Self, StoreError> {
        let store = Self::at(dir);
        let _lock = FileLock::acquire(dir, store.lock_timeout)?;
        store.write(&Snapshot::new(WorkflowDefinition {
            name: name.to_string(),
            ..Default::default()
        }))?;
        Ok(store)
    }

    fn at(dir: &Path) -> Self {
        JsonFileStore {
            dir: dir.to_path_buf(),
            path: dir.join(WORKFLOW_FILE),
            lock_timeout: Duration::from_secs(5),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Snapshot, StoreError> {
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut json = serde_json::to_string_pretty(snapshot)?;
        json.push('\n');
        atomic_write(&self.path, json.as_bytes())?;
        Ok(())
    }

    fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut InMemoryStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _lock = FileLock::acquire(&self.dir, self.lock_timeout)?;
        let mut memory = InMemoryStore::new(self.read()?);
        let out = f(&mut memory)?;
        self.write(memory.snapshot())?;
        tracing::debug!(path = %self.path.display(), "workflow written");
        Ok(out)
    }
}

impl RemoteStore for JsonFileStore {
    fn load(&mut self) -> Result<Snapshot, StoreError> {
        let _lock = FileLock::acquire(&self.dir, self.lock_timeout)?;
        self.read()
    }

    fn create_step(
        &mut self,
        parent: &ParentId,
        branch: BranchKind,
        position: usize,
        data: &ActionStepData,
    ) -> Result<StepId, StoreError> {
        self.transact(|m| m.create_step(parent, branch, position, data))
    }

    fn update_step_field(
        &mut self,
        step: &StepId,
        field: &StepField,
        value: &FieldValue,
        version: u64,
    ) -> Result<(), StoreError> {
        self.transact(|m| m.update_step_field(step, field, value, version))
    }

    fn delete_step(&mut self, step: &StepId) -> Result<(), StoreError> {
        self.transact(|m| m.delete_step(step))
    }

    fn reorder_group(&mut self, group: &GroupKey, ordered: &[StepId]) -> Result<(), StoreError> {
        self.transact(|m| m.reorder_group(group, ordered))
    }

    fn set_trigger(&mut self, trigger: Option<&TriggerStep>) -> Result<(), StoreError> {
        self.transact(|m| m.set_trigger(trigger))
    }

    fn apply_batch(&mut self, batch: &StructuralBatch) -> Result<(), StoreError> {
        self.transact(|m| m.apply_batch(batch))
    }
}

/// Write `content` to `path` atomically using a temp file + rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
