use serde::{Deserialize, Serialize};

use super::step::{ActionStepData, ActionStepRef, StepId, TriggerStep};
use super::tree::{MalformedTree, StepTree};

/// Flat, serializable form of a workflow as the store keeps it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub trigger: Option<TriggerStep>,
    #[serde(default)]
    pub steps: Vec<ActionStepRef>,
    #[serde(default)]
    pub data: Vec<ActionStepData>,
}

/// A workflow as the editor holds it: optional trigger plus the action tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workflow {
    pub name: String,
    pub trigger: Option<TriggerStep>,
    pub tree: StepTree,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Workflow {
            name: name.into(),
            trigger: None,
            tree: StepTree::new(),
        }
    }

    /// Build from the stored form, repairing malformed structure
    pub fn from_definition(def: WorkflowDefinition) -> (Workflow, Vec<MalformedTree>) {
        let (tree, warnings) = StepTree::build(def.steps, def.data);
        (
            Workflow {
                name: def.name,
                trigger: def.trigger,
                tree,
            },
            warnings,
        )
    }

    pub fn to_definition(&self) -> WorkflowDefinition {
        WorkflowDefinition {
            name: self.name.clone(),
            trigger: self.trigger.clone(),
            steps: self.tree.flatten(),
            data: self.tree.data_entries(),
        }
    }

    /// Whether `id` names the trigger or any action step
    pub fn contains_id(&self, id: &StepId) -> bool {
        self.trigger.as_ref().is_some_and(|t| &t.id == id) || self.tree.contains(id)
    }

    /// Every id in use, trigger included
    pub fn all_ids(&self) -> Vec<StepId> {
        let mut ids: Vec<StepId> = self.tree.flatten().into_iter().map(|r| r.id).collect();
        if let Some(t) = &self.trigger {
            ids.push(t.id.clone());
        }
        ids
    }
}
