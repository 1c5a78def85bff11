use serde::{Deserialize, Serialize};

use crate::editor::sync::{PersistRequest, StructuralBatch};
use crate::io::lock::LockError;
use crate::model::step::{
    ActionStepData, ActionStepRef, BranchKind, FieldValue, GroupKey, ParentId, StepField, StepId,
    TriggerStep,
};
use crate::model::workflow::WorkflowDefinition;
use crate::ops::check::check_structure;

/// Error type for persistence calls
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("step not found: {0}")]
    NotFound(StepId),
    #[error("step already exists: {0}")]
    AlreadyExists(StepId),
    #[error("version conflict on {field} of {step}: sent {sent}, store has {current}")]
    VersionConflict {
        step: StepId,
        field: StepField,
        sent: u64,
        current: u64,
    },
    #[error("rejected by store: {0}")]
    Rejected(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("could not parse workflow document: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl StoreError {
    /// Whether retrying the same call might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::IoError(_) | StoreError::Lock(_)
        )
    }
}

/// Last written version of one step field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldVersion {
    pub step: StepId,
    pub field: StepField,
    pub version: u64,
}

/// Everything a store holds for one workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub workflow: WorkflowDefinition,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<FieldVersion>,
}

impl Snapshot {
    pub fn new(workflow: WorkflowDefinition) -> Self {
        Snapshot {
            workflow,
            versions: Vec::new(),
        }
    }

    fn version_of(&self, step: &StepId, field: &StepField) -> u64 {
        self.versions
            .iter()
            .find(|v| &v.step == step && &v.field == field)
            .map_or(0, |v| v.version)
    }

    fn set_version(&mut self, step: &StepId, field: &StepField, version: u64) {
        match self
            .versions
            .iter_mut()
            .find(|v| &v.step == step && &v.field == field)
        {
            Some(v) => v.version = version,
            None => self.versions.push(FieldVersion {
                step: step.clone(),
                field: field.clone(),
                version,
            }),
        }
    }

    fn has_step(&self, id: &StepId) -> bool {
        self.workflow.steps.iter().any(|r| &r.id == id)
    }

    fn id_in_use(&self, id: &StepId) -> bool {
        self.has_step(id) || self.workflow.trigger.as_ref().is_some_and(|t| &t.id == id)
    }

    fn group_len(&self, parent: &ParentId, branch: BranchKind) -> usize {
        self.workflow
            .steps
            .iter()
            .filter(|r| &r.parent == parent && r.branch == branch)
            .count()
    }

    /// Remove a step and everything below it, closing the gap it leaves.
    fn remove_subtree(&mut self, id: &StepId) -> Option<usize> {
        let root = self.workflow.steps.iter().find(|r| &r.id == id)?.clone();
        let mut doomed = vec![id.clone()];
        let mut i = 0;
        while i < doomed.len() {
            let cur = ParentId::Step(doomed[i].clone());
            doomed.extend(
                self.workflow
                    .steps
                    .iter()
                    .filter(|r| r.parent == cur)
                    .map(|r| r.id.clone()),
            );
            i += 1;
        }
        self.workflow.steps.retain(|r| !doomed.contains(&r.id));
        self.workflow.data.retain(|d| !doomed.contains(&d.id));
        self.versions.retain(|v| !doomed.contains(&v.step));
        for r in &mut self.workflow.steps {
            if r.parent == root.parent && r.branch == root.branch && r.position > root.position {
                r.position -= 1;
            }
        }
        Some(doomed.len())
    }

    fn validate(&self) -> Result<(), StoreError> {
        let result = check_structure(&self.workflow.steps, &self.workflow.data);
        match result.errors.first() {
            None => Ok(()),
            Some(e) => Err(StoreError::Rejected(e.to_string())),
        }
    }
}

/// The persistence call contract.
pub trait RemoteStore {
    fn load(&mut self) -> Result<Snapshot, StoreError>;

    fn create_step(
        &mut self,
        parent: &ParentId,
        branch: BranchKind,
        position: usize,
        data: &ActionStepData,
    ) -> Result<StepId, StoreError>;

    /// Accepted only when `version` is newer than the stored one.
    fn update_step_field(
        &mut self,
        step: &StepId,
        field: &StepField,
        value: &FieldValue,
        version: u64,
    ) -> Result<(), StoreError>;

    fn delete_step(&mut self, step: &StepId) -> Result<(), StoreError>;

    fn reorder_group(&mut self, group: &GroupKey, ordered: &[StepId]) -> Result<(), StoreError>;

    fn set_trigger(&mut self, trigger: Option<&TriggerStep>) -> Result<(), StoreError>;

    /// Apply deletes, creates and group listings as one atomic write.
    fn apply_batch(&mut self, batch: &StructuralBatch) -> Result<(), StoreError>;

    fn execute(&mut self, request: &PersistRequest) -> Result<(), StoreError> {
        match request {
            PersistRequest::StructuralBatch(batch) => self.apply_batch(batch),
            PersistRequest::UpdateStepField {
                step,
                field,
                value,
                version,
            } => self.update_step_field(step, field, value, *version),
            PersistRequest::SetTrigger { trigger } => self.set_trigger(trigger.as_ref()),
        }
    }
}

/// Store kept entirely in memory. Every write validates the result and
/// leaves the snapshot untouched on error.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    snapshot: Snapshot,
    fail_next: u32,
    calls: usize,
}

impl InMemoryStore {
    pub fn new(snapshot: Snapshot) -> Self {
        InMemoryStore {
            snapshot,
            fail_next: 0,
            calls: 0,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Make the next `n` write calls fail with `Unavailable`.
    pub fn fail_next(&mut self, n: u32) {
        self.fail_next = n;
    }

    /// Number of write calls received, failed ones included
    pub fn calls(&self) -> usize {
        self.calls
    }

    fn write<T>(
        &mut self,
        f: impl FnOnce(&mut Snapshot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.calls += 1;
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        let mut next = self.snapshot.clone();
        let out = f(&mut next)?;
        next.validate()?;
        self.snapshot = next;
        Ok(out)
    }
}

impl RemoteStore for InMemoryStore {
    fn load(&mut self) -> Result<Snapshot, StoreError> {
        Ok(self.snapshot.clone())
    }

    fn create_step(
        &mut self,
        parent: &ParentId,
        branch: BranchKind,
        position: usize,
        data: &ActionStepData,
    ) -> Result<StepId, StoreError> {
        self.write(|s| {
            if s.id_in_use(&data.id) {
                return Err(StoreError::AlreadyExists(data.id.clone()));
            }
            if let Some(p) = parent.step()
                && !s.has_step(p)
            {
                return Err(StoreError::NotFound(p.clone()));
            }
            let position = position.min(s.group_len(parent, branch));
            for r in &mut s.workflow.steps {
                if &r.parent == parent && r.branch == branch && r.position >= position {
                    r.position += 1;
                }
            }
            s.workflow.steps.push(ActionStepRef {
                id: data.id.clone(),
                parent: parent.clone(),
                branch,
                position,
            });
            s.workflow.data.push(data.clone());
            Ok(data.id.clone())
        })
    }

    fn update_step_field(
        &mut self,
        step: &StepId,
        field: &StepField,
        value: &FieldValue,
        version: u64,
    ) -> Result<(), StoreError> {
        self.write(|s| {
            let current = s.version_of(step, field);
            let data = s
                .workflow
                .data
                .iter_mut()
                .find(|d| &d.id == step)
                .ok_or_else(|| StoreError::NotFound(step.clone()))?;
            if version <= current {
                return Err(StoreError::VersionConflict {
                    step: step.clone(),
                    field: field.clone(),
                    sent: version,
                    current,
                });
            }
            match (field, value) {
                (StepField::Title, FieldValue::Text(t)) => data.title = t.clone(),
                (StepField::Comment, FieldValue::Text(t)) => data.comment = t.clone(),
                (StepField::Config(key), FieldValue::Config(v)) => {
                    data.configuration.values.insert(key.clone(), v.clone());
                }
                (StepField::Config(key), FieldValue::Unset) => {
                    data.configuration.values.shift_remove(key);
                }
                (field, value) => {
                    return Err(StoreError::Rejected(format!(
                        "{} cannot be set to {}",
                        field, value
                    )));
                }
            }
            s.set_version(step, field, version);
            Ok(())
        })
    }

    fn delete_step(&mut self, step: &StepId) -> Result<(), StoreError> {
        self.write(|s| {
            s.remove_subtree(step)
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(step.clone()))
        })
    }

    fn reorder_group(&mut self, group: &GroupKey, ordered: &[StepId]) -> Result<(), StoreError> {
        self.write(|s| relist_group(s, group, ordered))
    }

    fn set_trigger(&mut self, trigger: Option<&TriggerStep>) -> Result<(), StoreError> {
        self.write(|s| {
            if let Some(t) = trigger
                && s.has_step(&t.id)
            {
                return Err(StoreError::AlreadyExists(t.id.clone()));
            }
            s.workflow.trigger = trigger.cloned();
            Ok(())
        })
    }

    fn apply_batch(&mut self, batch: &StructuralBatch) -> Result<(), StoreError> {
        self.write(|s| {
            for id in &batch.deletes {
                // Descendants of an earlier delete are already gone
                s.remove_subtree(id);
            }
            for create in &batch.creates {
                if s.id_in_use(&create.step.id) {
                    return Err(StoreError::AlreadyExists(create.step.id.clone()));
                }
                s.workflow.steps.push(create.step.clone());
                s.workflow.data.push(create.data.clone());
            }
            // A moved step is listed under its new group only, so every
            // listing is assigned before any is checked.
            for listing in &batch.groups {
                assign_listing(s, &listing.group, &listing.steps)?;
            }
            for listing in &batch.groups {
                check_listing(s, &listing.group, &listing.steps)?;
            }
            Ok(())
        })
    }
}

/// Make `ordered` the exact membership and order of `group`.
fn relist_group(s: &mut Snapshot, group: &GroupKey, ordered: &[StepId]) -> Result<(), StoreError> {
    assign_listing(s, group, ordered)?;
    check_listing(s, group, ordered)
}

fn assign_listing(s: &mut Snapshot, group: &GroupKey, ordered: &[StepId]) -> Result<(), StoreError> {
    for (position, id) in ordered.iter().enumerate() {
        let r = s
            .workflow
            .steps
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        r.parent = group.parent.clone();
        r.branch = group.branch;
        r.position = position;
    }
    Ok(())
}

/// Members of `group` left out of its listing are an error.
fn check_listing(s: &Snapshot, group: &GroupKey, ordered: &[StepId]) -> Result<(), StoreError> {
    let stray = s
        .workflow
        .steps
        .iter()
        .find(|r| r.group() == *group && !ordered.contains(&r.id));
    if let Some(r) = stray {
        return Err(StoreError::Rejected(format!(
            "listing for {} omits {}",
            group, r.id
        )));
    }
    Ok(())
}
