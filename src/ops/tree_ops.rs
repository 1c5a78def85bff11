//! Validated structural and content edits over a `StepTree`.
//!
//! Every function takes the current tree by reference and returns a new one;
//! on error the input is untouched. Sibling groups stay contiguous because
//! positions are indices into ordered group lists.

use crate::model::catalog::{DefinitionCatalog, DefinitionKind, SchemaError};
use crate::model::step::{
    ActionStepData, ActionStepRef, BranchKind, DefinitionId, FieldValue, GroupKey, ParentId,
    StepField, StepId, TriggerStep,
};
use crate::model::tree::StepTree;
use crate::model::workflow::Workflow;

/// Error type for tree operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    #[error("cannot move {step} under {target}: it is the step itself or one of its descendants")]
    Cycle { step: StepId, target: StepId },
    #[error("parent step not found: {0}")]
    InvalidParent(StepId),
    #[error("{parent} has no {branch} branch")]
    InvalidBranch { parent: ParentId, branch: BranchKind },
    #[error("step not found: {0}")]
    StepNotFound(StepId),
    #[error("step id already in use: {0}")]
    DuplicateStep(StepId),
    #[error("unknown definition: {0}")]
    UnknownDefinition(DefinitionId),
    #[error("{definition} is not a {expected:?} definition")]
    WrongKind {
        definition: DefinitionId,
        expected: DefinitionKind,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] SchemaError),
    #[error("field {field} cannot be set to {value}")]
    FieldMismatch { field: StepField, value: FieldValue },
}

/// Result of a successful tree edit
#[derive(Debug, Clone)]
pub struct Applied {
    pub tree: StepTree,
    /// Sibling groups whose membership or order changed
    pub affected: Vec<GroupKey>,
    /// Steps removed by the edit, subtree roots first
    pub removed: Vec<StepId>,
}

impl Applied {
    fn content(tree: StepTree) -> Self {
        Applied {
            tree,
            affected: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// A new step and its requested index, for batch inserts
#[derive(Debug, Clone, PartialEq)]
pub struct NewStep {
    pub data: ActionStepData,
    pub position: usize,
}

// ---------------------------------------------------------------------------
// Insert
// ---------------------------------------------------------------------------

/// Insert a new step at `position` in `(parent, branch)`, shifting later
/// siblings down. Positions past the end append.
pub fn insert(
    tree: &StepTree,
    catalog: &dyn DefinitionCatalog,
    data: ActionStepData,
    parent: ParentId,
    branch: BranchKind,
    position: usize,
) -> Result<Applied, TreeError> {
    validate_new_step(tree, catalog, &data)?;
    validate_target(tree, catalog, &parent, branch)?;

    let key = GroupKey::new(parent, branch);
    let index = clamp_position(tree, &key, position);
    let mut next = tree.clone();
    tracing::debug!(step = %data.id, group = %key, index, "insert step");
    next.attach(data, key.clone(), index);

    Ok(Applied {
        tree: next,
        affected: vec![key],
        removed: Vec::new(),
    })
}

/// Insert several steps into one group. Positions refer to the group as it
/// was before the batch; equal positions keep request order.
pub fn insert_batch(
    tree: &StepTree,
    catalog: &dyn DefinitionCatalog,
    steps: Vec<NewStep>,
    parent: ParentId,
    branch: BranchKind,
) -> Result<Applied, TreeError> {
    validate_target(tree, catalog, &parent, branch)?;
    for (i, step) in steps.iter().enumerate() {
        validate_new_step(tree, catalog, &step.data)?;
        if steps[..i].iter().any(|s| s.data.id == step.data.id) {
            return Err(TreeError::DuplicateStep(step.data.id.clone()));
        }
    }

    let key = GroupKey::new(parent, branch);
    let clamped: Vec<usize> = steps
        .iter()
        .map(|s| clamp_position(tree, &key, s.position))
        .collect();

    let mut next = tree.clone();
    for (i, step) in steps.into_iter().enumerate() {
        let ahead = clamped[..i].iter().filter(|p| **p <= clamped[i]).count();
        next.attach(step.data, key.clone(), clamped[i] + ahead);
    }

    Ok(Applied {
        tree: next,
        affected: vec![key],
        removed: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Move
// ---------------------------------------------------------------------------

/// Reparent and/or reorder a step together with its subtree. `position` is
/// the step's index in the target group after the move.
pub fn move_step(
    tree: &StepTree,
    catalog: &dyn DefinitionCatalog,
    step: &StepId,
    parent: ParentId,
    branch: BranchKind,
    position: usize,
) -> Result<Applied, TreeError> {
    let (old_key, old_index) = tree
        .group_of(step)
        .zip(tree.position_of(step))
        .ok_or_else(|| TreeError::StepNotFound(step.clone()))?;

    if let ParentId::Step(target) = &parent
        && (target == step || tree.is_descendant(step, target))
    {
        return Err(TreeError::Cycle {
            step: step.clone(),
            target: target.clone(),
        });
    }
    validate_target(tree, catalog, &parent, branch)?;

    let key = GroupKey::new(parent, branch);
    let mut next = tree.clone();
    next.unlink(step);
    let index = clamp_position(&next, &key, position);

    if key == old_key && index == old_index {
        return Ok(Applied::content(tree.clone()));
    }

    tracing::debug!(step = %step, from = %old_key, to = %key, index, "move step");
    next.link(step, key.clone(), index);

    let mut affected = vec![old_key];
    if !affected.contains(&key) {
        affected.push(key);
    }
    Ok(Applied {
        tree: next,
        affected,
        removed: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Delete / restore
// ---------------------------------------------------------------------------

/// Remove a step and every descendant, closing the gap in its group.
pub fn delete(tree: &StepTree, step: &StepId) -> Result<Applied, TreeError> {
    let key = tree
        .group_of(step)
        .ok_or_else(|| TreeError::StepNotFound(step.clone()))?;
    let mut next = tree.clone();
    let removed: Vec<StepId> = next
        .remove_subtree(step)
        .into_iter()
        .map(|(r, _)| r.id)
        .collect();
    tracing::debug!(step = %step, count = removed.len(), "delete subtree");
    Ok(Applied {
        tree: next,
        affected: vec![key],
        removed,
    })
}

/// Snapshot of a subtree (pre-order refs and data) taken before a delete
pub fn capture_subtree(tree: &StepTree, step: &StepId) -> Vec<(ActionStepRef, ActionStepData)> {
    tree.subtree(step)
        .into_iter()
        .filter_map(|id| Some((tree.get(&id)?, tree.data(&id)?.clone())))
        .collect()
}

/// Put back a subtree captured by `capture_subtree`. The first entry is the
/// subtree root and must fit its recorded group; the rest follow in pre-order.
pub fn restore(
    tree: &StepTree,
    catalog: &dyn DefinitionCatalog,
    entries: &[(ActionStepRef, ActionStepData)],
) -> Result<Applied, TreeError> {
    let Some((root, _)) = entries.first() else {
        return Ok(Applied::content(tree.clone()));
    };
    for (r, d) in entries {
        if tree.contains(&r.id) {
            return Err(TreeError::DuplicateStep(r.id.clone()));
        }
        if r.id != d.id {
            return Err(TreeError::StepNotFound(r.id.clone()));
        }
    }
    validate_target(tree, catalog, &root.parent, root.branch)?;

    let mut next = tree.clone();
    let mut affected = Vec::new();
    for (r, d) in entries {
        let key = r.group();
        if r.id != root.id
            && let Some(p) = r.parent.step()
            && !next.contains(p)
        {
            return Err(TreeError::InvalidParent(p.clone()));
        }
        if !affected.contains(&key) {
            affected.push(key.clone());
        }
        next.attach(d.clone(), key, r.position);
    }

    Ok(Applied {
        tree: next,
        affected,
        removed: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Content edits
// ---------------------------------------------------------------------------

/// Set a title, comment or configuration value. No structural effect.
pub fn edit_field(
    tree: &StepTree,
    catalog: &dyn DefinitionCatalog,
    step: &StepId,
    field: &StepField,
    value: FieldValue,
) -> Result<Applied, TreeError> {
    let data = tree
        .data(step)
        .ok_or_else(|| TreeError::StepNotFound(step.clone()))?;

    if let StepField::Config(key) = field {
        let def = catalog
            .lookup(&data.definition)
            .ok_or_else(|| TreeError::UnknownDefinition(data.definition.clone()))?;
        match &value {
            FieldValue::Config(v) => def.validate_value(key, v)?,
            FieldValue::Unset => {
                if def.field(key).is_some_and(|f| f.required) {
                    return Err(SchemaError::MissingRequired {
                        definition: def.id.clone(),
                        field: key.clone(),
                    }
                    .into());
                }
            }
            FieldValue::Text(_) => {}
        }
    }

    let mut next = tree.clone();
    let Some(data) = next.data_mut(step) else {
        return Err(TreeError::StepNotFound(step.clone()));
    };
    match (field, value) {
        (StepField::Title, FieldValue::Text(s)) => data.title = s,
        (StepField::Comment, FieldValue::Text(s)) => data.comment = s,
        (StepField::Config(key), FieldValue::Config(v)) => {
            data.configuration.values.insert(key.clone(), v);
        }
        (StepField::Config(key), FieldValue::Unset) => {
            data.configuration.values.shift_remove(key);
        }
        (field, value) => {
            return Err(TreeError::FieldMismatch {
                field: field.clone(),
                value,
            });
        }
    }
    Ok(Applied::content(next))
}

/// Choose, replace or clear the workflow's trigger.
pub fn set_trigger(
    workflow: &Workflow,
    catalog: &dyn DefinitionCatalog,
    trigger: Option<TriggerStep>,
) -> Result<Workflow, TreeError> {
    if let Some(t) = &trigger {
        let def = catalog
            .lookup(&t.definition)
            .ok_or_else(|| TreeError::UnknownDefinition(t.definition.clone()))?;
        if def.kind != DefinitionKind::Trigger {
            return Err(TreeError::WrongKind {
                definition: t.definition.clone(),
                expected: DefinitionKind::Trigger,
            });
        }
        if workflow.tree.contains(&t.id) {
            return Err(TreeError::DuplicateStep(t.id.clone()));
        }
    }
    let mut next = workflow.clone();
    next.trigger = trigger;
    Ok(next)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Check that `(parent, branch)` names a group that can hold children.
pub fn validate_target(
    tree: &StepTree,
    catalog: &dyn DefinitionCatalog,
    parent: &ParentId,
    branch: BranchKind,
) -> Result<(), TreeError> {
    match parent {
        ParentId::Root => {
            if branch != BranchKind::Root {
                return Err(TreeError::InvalidBranch {
                    parent: parent.clone(),
                    branch,
                });
            }
        }
        ParentId::Step(id) => {
            let data = tree
                .data(id)
                .ok_or_else(|| TreeError::InvalidParent(id.clone()))?;
            let def = catalog
                .lookup(&data.definition)
                .ok_or_else(|| TreeError::UnknownDefinition(data.definition.clone()))?;
            if !def.allows_branch(branch) {
                return Err(TreeError::InvalidBranch {
                    parent: parent.clone(),
                    branch,
                });
            }
        }
    }
    Ok(())
}

fn validate_new_step(
    tree: &StepTree,
    catalog: &dyn DefinitionCatalog,
    data: &ActionStepData,
) -> Result<(), TreeError> {
    if tree.contains(&data.id) {
        return Err(TreeError::DuplicateStep(data.id.clone()));
    }
    let def = catalog
        .lookup(&data.definition)
        .ok_or_else(|| TreeError::UnknownDefinition(data.definition.clone()))?;
    if def.kind != DefinitionKind::Action {
        return Err(TreeError::WrongKind {
            definition: data.definition.clone(),
            expected: DefinitionKind::Action,
        });
    }
    def.validate(&data.configuration)?;
    Ok(())
}

fn clamp_position(tree: &StepTree, key: &GroupKey, position: usize) -> usize {
    let size = tree.group(key).len();
    if position > size {
        tracing::debug!(group = %key, position, size, "position clamped to end of group");
        size
    } else {
        position
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
