use std::fmt;

use crate::model::catalog::DefinitionCatalog;
use crate::model::step::{
    ActionStepData, ActionStepRef, BranchKind, FieldValue, GroupKey, ParentId, StepField, StepId,
    TriggerStep,
};
use crate::model::tree::StepTree;
use crate::model::workflow::Workflow;
use crate::ops::tree_ops::{self, NewStep, TreeError};

/// A subtree captured before deletion: refs and data in pre-order
pub type Subtree = Vec<(ActionStepRef, ActionStepData)>;

/// One requested change to a workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Insert one or more new steps into a single sibling group
    Insert {
        parent: ParentId,
        branch: BranchKind,
        steps: Vec<NewStep>,
    },
    /// Reparent and/or reorder a step with its subtree
    Move {
        step: StepId,
        parent: ParentId,
        branch: BranchKind,
        position: usize,
    },
    /// Delete steps (each with its subtree), in order
    Delete { steps: Vec<StepId> },
    /// Put back deleted subtrees, in order
    Restore { subtrees: Vec<Subtree> },
    EditField {
        step: StepId,
        field: StepField,
        value: FieldValue,
    },
    SetTrigger { trigger: Option<TriggerStep> },
}

/// What an applied intent changed, used to build the persistence request
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Structural {
        /// Sibling groups whose listing must be persisted
        affected: Vec<GroupKey>,
        /// Steps that must be created, parents first
        created: Vec<StepId>,
        /// Steps that were removed, subtree roots first
        removed: Vec<StepId>,
    },
    Field {
        step: StepId,
        field: StepField,
        value: FieldValue,
    },
    Trigger(Option<TriggerStep>),
}

/// Result of applying an intent
#[derive(Debug, Clone)]
pub struct Effect {
    pub workflow: Workflow,
    pub change: Change,
    /// Intent that reverses this one, computed against the pre-state
    pub inverse: Intent,
}

impl Intent {
    /// Apply against `workflow`, returning the new workflow, what changed and
    /// the inverse intent. The input is never modified.
    pub fn apply(
        &self,
        workflow: &Workflow,
        catalog: &dyn DefinitionCatalog,
    ) -> Result<Effect, TreeError> {
        let tree = &workflow.tree;
        let with_tree = |tree: StepTree| Workflow {
            name: workflow.name.clone(),
            trigger: workflow.trigger.clone(),
            tree,
        };

        match self {
            Intent::Insert {
                parent,
                branch,
                steps,
            } => {
                for s in steps {
                    if workflow.trigger.as_ref().is_some_and(|t| t.id == s.data.id) {
                        return Err(TreeError::DuplicateStep(s.data.id.clone()));
                    }
                }
                let applied = match steps.as_slice() {
                    [one] => tree_ops::insert(
                        tree,
                        catalog,
                        one.data.clone(),
                        parent.clone(),
                        *branch,
                        one.position,
                    )?,
                    _ => tree_ops::insert_batch(
                        tree,
                        catalog,
                        steps.clone(),
                        parent.clone(),
                        *branch,
                    )?,
                };
                let created: Vec<StepId> = steps.iter().map(|s| s.data.id.clone()).collect();
                Ok(Effect {
                    workflow: with_tree(applied.tree),
                    change: Change::Structural {
                        affected: applied.affected,
                        created: created.clone(),
                        removed: Vec::new(),
                    },
                    inverse: Intent::Delete { steps: created },
                })
            }

            Intent::Move {
                step,
                parent,
                branch,
                position,
            } => {
                let old = tree
                    .get(step)
                    .ok_or_else(|| TreeError::StepNotFound(step.clone()))?;
                let applied =
                    tree_ops::move_step(tree, catalog, step, parent.clone(), *branch, *position)?;
                Ok(Effect {
                    workflow: with_tree(applied.tree),
                    change: Change::Structural {
                        affected: applied.affected,
                        created: Vec::new(),
                        removed: Vec::new(),
                    },
                    inverse: Intent::Move {
                        step: step.clone(),
                        parent: old.parent,
                        branch: old.branch,
                        position: old.position,
                    },
                })
            }

            Intent::Delete { steps } => {
                let mut next = tree.clone();
                let mut subtrees = Vec::with_capacity(steps.len());
                let mut affected = Vec::new();
                let mut removed = Vec::new();
                for step in steps {
                    let captured = tree_ops::capture_subtree(&next, step);
                    let applied = tree_ops::delete(&next, step)?;
                    subtrees.push(captured);
                    merge_groups(&mut affected, applied.affected);
                    removed.extend(applied.removed);
                    next = applied.tree;
                }
                subtrees.reverse();
                Ok(Effect {
                    workflow: with_tree(next),
                    change: Change::Structural {
                        affected,
                        created: Vec::new(),
                        removed,
                    },
                    inverse: Intent::Restore { subtrees },
                })
            }

            Intent::Restore { subtrees } => {
                let mut next = tree.clone();
                let mut affected = Vec::new();
                let mut created = Vec::new();
                let mut roots = Vec::with_capacity(subtrees.len());
                for subtree in subtrees {
                    let applied = tree_ops::restore(&next, catalog, subtree)?;
                    if let Some((root, _)) = subtree.first() {
                        roots.push(root.id.clone());
                    }
                    created.extend(subtree.iter().map(|(r, _)| r.id.clone()));
                    merge_groups(&mut affected, applied.affected);
                    next = applied.tree;
                }
                roots.reverse();
                Ok(Effect {
                    workflow: with_tree(next),
                    change: Change::Structural {
                        affected,
                        created,
                        removed: Vec::new(),
                    },
                    inverse: Intent::Delete { steps: roots },
                })
            }

            Intent::EditField { step, field, value } => {
                let old = tree
                    .data(step)
                    .and_then(|d| d.field_value(field))
                    .ok_or_else(|| TreeError::StepNotFound(step.clone()))?;
                let applied = tree_ops::edit_field(tree, catalog, step, field, value.clone())?;
                Ok(Effect {
                    workflow: with_tree(applied.tree),
                    change: Change::Field {
                        step: step.clone(),
                        field: field.clone(),
                        value: value.clone(),
                    },
                    inverse: Intent::EditField {
                        step: step.clone(),
                        field: field.clone(),
                        value: old,
                    },
                })
            }

            Intent::SetTrigger { trigger } => {
                let next = tree_ops::set_trigger(workflow, catalog, trigger.clone())?;
                Ok(Effect {
                    workflow: next,
                    change: Change::Trigger(trigger.clone()),
                    inverse: Intent::SetTrigger {
                        trigger: workflow.trigger.clone(),
                    },
                })
            }
        }
    }
}

fn merge_groups(into: &mut Vec<GroupKey>, groups: Vec<GroupKey>) {
    for g in groups {
        if !into.contains(&g) {
            into.push(g);
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Insert { parent, branch, steps } => match steps.as_slice() {
                [one] => write!(f, "insert {} into {}/{}", one.data.id, parent, branch),
                _ => write!(f, "insert {} steps into {}/{}", steps.len(), parent, branch),
            },
            Intent::Move {
                step,
                parent,
                branch,
                position,
            } => write!(f, "move {} to {}/{} at {}", step, parent, branch, position),
            Intent::Delete { steps } => match steps.as_slice() {
                [one] => write!(f, "delete {}", one),
                _ => write!(f, "delete {} steps", steps.len()),
            },
            Intent::Restore { subtrees } => write!(f, "restore {} subtree(s)", subtrees.len()),
            Intent::EditField { step, field, .. } => write!(f, "edit {} of {}", field, step),
            Intent::SetTrigger { trigger: Some(t) } => write!(f, "set trigger {}", t.definition),
            Intent::SetTrigger { trigger: None } => f.write_str("clear trigger"),
        }
    }
}

/// An accepted mutation: the intent that was applied and the one that undoes it
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub forward: Intent,
    pub inverse: Intent,
}

// ---------------------------------------------------------------------------
// Undo stack
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Command(Command),
    /// History before this point no longer matches the workflow (rollback
    /// or resync); undo stops here.
    SyncMarker,
}

/// Bounded undo/redo history of accepted commands
#[derive(Debug, Clone)]
pub struct UndoStack {
    undo: Vec<Entry>,
    redo: Vec<Command>,
    limit: usize,
}

impl UndoStack {
    pub fn new(limit: usize) -> Self {
        UndoStack {
            undo: Vec::new(),
            redo: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Push a new command. Clears the redo stack.
    pub fn push(&mut self, command: Command) {
        self.push_entry(Entry::Command(command));
        self.redo.clear();
    }

    /// Push a sync marker. Clears the redo stack.
    pub fn push_sync_marker(&mut self) {
        if matches!(self.undo.last(), Some(Entry::SyncMarker)) {
            self.redo.clear();
            return;
        }
        self.push_entry(Entry::SyncMarker);
        self.redo.clear();
    }

    fn push_entry(&mut self, entry: Entry) {
        self.undo.push(entry);
        if self.undo.len() > self.limit {
            self.undo.drain(..self.undo.len() - self.limit);
        }
    }

    /// Take the most recent command to undo. Stops at a sync marker.
    pub fn pop_undo(&mut self) -> Option<Command> {
        match self.undo.pop()? {
            Entry::Command(c) => Some(c),
            Entry::SyncMarker => {
                self.undo.push(Entry::SyncMarker);
                None
            }
        }
    }

    pub fn pop_redo(&mut self) -> Option<Command> {
        self.redo.pop()
    }

    /// Record a command that was just undone so it can be redone
    pub fn push_redo(&mut self, command: Command) {
        self.redo.push(command);
    }

    /// Record a command that was just redone, keeping the redo stack
    pub fn push_redone(&mut self, command: Command) {
        self.push_entry(Entry::Command(command));
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.undo.last(), Some(Entry::Command(_)))
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::catalog::StaticCatalog;
    use crate::model::step::DefinitionId;
    use pretty_assertions::assert_eq;

    fn catalog() -> StaticCatalog {
        StaticCatalog::builtin().unwrap()
    }

    fn new_step(id: &str, def: &str, position: usize) -> NewStep {
        NewStep {
            data: ActionStepData::new(id.into(), DefinitionId::new(def), id.to_uppercase()),
            position,
        }
    }

    fn insert_root(id: &str, def: &str, position: usize) -> Intent {
        Intent::Insert {
            parent: ParentId::Root,
            branch: BranchKind::Root,
            steps: vec![new_step(id, def, position)],
        }
    }

    /// root: a, c(then: c1, c2), b
    fn sample() -> Workflow {
        let cat = catalog();
        let mut wf = Workflow::new("sample");
        for intent in [
            insert_root("a", "log", 0),
            insert_root("c", "if", 1),
            insert_root("b", "log", 2),
            Intent::Insert {
                parent: ParentId::Step("c".into()),
                branch: BranchKind::ConditionalTrue,
                steps: vec![new_step("c1", "log", 0), new_step("c2", "log", 1)],
            },
        ] {
            wf = intent.apply(&wf, &cat).unwrap().workflow;
        }
        wf
    }

    fn assert_inverse_restores(intent: Intent) {
        let cat = catalog();
        let before = sample();
        let effect = intent.apply(&before, &cat).unwrap();
        assert_ne!(effect.workflow, before, "{} changed nothing", intent);
        let undone = effect.inverse.apply(&effect.workflow, &cat).unwrap();
        assert_eq!(undone.workflow, before, "inverse of {} did not restore", intent);
        // Inverse of the inverse is the forward change again
        let redone = undone.inverse.apply(&undone.workflow, &cat).unwrap();
        assert_eq!(redone.workflow, effect.workflow);
    }

    #[test]
    fn insert_inverse() {
        assert_inverse_restores(insert_root("n", "log", 1));
        assert_inverse_restores(Intent::Insert {
            parent: ParentId::Step("c".into()),
            branch: BranchKind::ConditionalFalse,
            steps: vec![new_step("x", "log", 0), new_step("y", "log", 0)],
        });
    }

    #[test]
    fn move_inverse() {
        assert_inverse_restores(Intent::Move {
            step: "a".into(),
            parent: ParentId::Root,
            branch: BranchKind::Root,
            position: 2,
        });
        assert_inverse_restores(Intent::Move {
            step: "c2".into(),
            parent: ParentId::Root,
            branch: BranchKind::Root,
            position: 0,
        });
        assert_inverse_restores(Intent::Move {
            step: "b".into(),
            parent: ParentId::Step("c".into()),
            branch: BranchKind::ConditionalTrue,
            position: 1,
        });
    }

    #[test]
    fn delete_inverse() {
        assert_inverse_restores(Intent::Delete {
            steps: vec!["c".into()],
        });
        assert_inverse_restores(Intent::Delete {
            steps: vec!["a".into(), "c1".into(), "b".into()],
        });
    }

    #[test]
    fn edit_inverse() {
        assert_inverse_restores(Intent::EditField {
            step: "a".into(),
            field: StepField::Title,
            value: FieldValue::Text("Renamed".into()),
        });
        assert_inverse_restores(Intent::EditField {
            step: "c".into(),
            field: StepField::Config("expression".into()),
            value: FieldValue::Config(crate::model::step::ConfigValue::Text("x > 1".into())),
        });
    }

    #[test]
    fn trigger_inverse() {
        assert_inverse_restores(Intent::SetTrigger {
            trigger: Some(TriggerStep {
                id: "trg".into(),
                definition: "schedule".into(),
                title: "Nightly".into(),
            }),
        });
    }

    #[test]
    fn delete_reports_all_removed_ids() {
        let effect = Intent::Delete {
            steps: vec!["c".into()],
        }
        .apply(&sample(), &catalog())
        .unwrap();
        match effect.change {
            Change::Structural {
                affected, removed, ..
            } => {
                assert_eq!(affected, vec![GroupKey::root()]);
                let ids: Vec<&str> = removed.iter().map(|s| s.as_str()).collect();
                assert_eq!(ids, vec!["c", "c1", "c2"]);
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn insert_rejects_trigger_id() {
        let cat = catalog();
        let wf = Intent::SetTrigger {
            trigger: Some(TriggerStep {
                id: "t".into(),
                definition: "webhook".into(),
                title: "Hook".into(),
            }),
        }
        .apply(&sample(), &cat)
        .unwrap()
        .workflow;
        let err = insert_root("t", "log", 0).apply(&wf, &cat).unwrap_err();
        assert_eq!(err, TreeError::DuplicateStep("t".into()));
    }

    #[test]
    fn undo_stack_limits_and_markers() {
        let cmd = |n: usize| Command {
            forward: insert_root(&format!("s{}", n), "log", 0),
            inverse: Intent::Delete {
                steps: vec![StepId::new(format!("s{}", n))],
            },
        };
        let mut stack = UndoStack::new(3);
        for n in 0..5 {
            stack.push(cmd(n));
        }
        assert_eq!(stack.pop_undo(), Some(cmd(4)));
        stack.push_redo(cmd(4));
        assert!(stack.can_redo());
        assert_eq!(stack.pop_undo(), Some(cmd(3)));
        assert_eq!(stack.pop_undo(), Some(cmd(2)));
        assert_eq!(stack.pop_undo(), None);

        stack.push(cmd(7));
        assert!(!stack.can_redo());
        stack.push_sync_marker();
        assert!(!stack.can_undo());
        assert_eq!(stack.pop_undo(), None);
        assert_eq!(stack.pop_undo(), None);
    }
}
