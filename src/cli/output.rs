use indexmap::IndexMap;
use serde::Serialize;

use crate::editor::session::{Level, Notification};
use crate::model::step::{BranchKind, ConfigValue, DefinitionId, ParentId, StepId, TriggerStep};
use crate::model::tree::StepTree;
use crate::model::workflow::Workflow;

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct WorkflowJson {
    pub name: String,
    pub trigger: Option<TriggerStep>,
    pub steps: Vec<StepJson>,
}

#[derive(Serialize)]
pub struct StepJson {
    pub id: StepId,
    pub definition: DefinitionId,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub config: IndexMap<String, ConfigValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<BranchJson>,
}

#[derive(Serialize)]
pub struct BranchJson {
    pub branch: BranchKind,
    pub steps: Vec<StepJson>,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub fn workflow_to_json(workflow: &Workflow) -> WorkflowJson {
    let tree = &workflow.tree;
    WorkflowJson {
        name: workflow.name.clone(),
        trigger: workflow.trigger.clone(),
        steps: tree
            .children(&ParentId::Root, BranchKind::Root)
            .iter()
            .filter_map(|id| step_to_json(tree, id))
            .collect(),
    }
}

fn step_to_json(tree: &StepTree, id: &StepId) -> Option<StepJson> {
    let data = tree.data(id)?;
    Some(StepJson {
        id: id.clone(),
        definition: data.definition.clone(),
        title: data.title.clone(),
        comment: data.comment.clone(),
        config: data.configuration.values.clone(),
        branches: tree
            .child_groups(id)
            .into_iter()
            .map(|(branch, kids)| BranchJson {
                branch,
                steps: kids.iter().filter_map(|k| step_to_json(tree, k)).collect(),
            })
            .collect(),
    })
}

// ---------------------------------------------------------------------------
// Text output
// ---------------------------------------------------------------------------

/// Indented outline of the whole workflow, one step per line.
pub fn render_outline(workflow: &Workflow) -> String {
    let mut lines = vec![format!("workflow: {}", workflow.name)];
    match &workflow.trigger {
        Some(t) => lines.push(format!("trigger: {} ({}) [{}]", t.title, t.definition, t.id)),
        None => lines.push("trigger: (none)".to_string()),
    }
    let tree = &workflow.tree;
    let roots = tree.children(&ParentId::Root, BranchKind::Root);
    if roots.is_empty() {
        lines.push("(no steps)".to_string());
    }
    for id in roots {
        render_step(tree, id, 0, &mut lines);
    }
    lines.join("\n")
}

fn render_step(tree: &StepTree, id: &StepId, indent: usize, lines: &mut Vec<String>) {
    let pad = "  ".repeat(indent);
    let Some(data) = tree.data(id) else {
        return;
    };
    lines.push(format!("{}- {} ({}) [{}]", pad, data.title, data.definition, id));
    for (branch, kids) in tree.child_groups(id) {
        lines.push(format!("{}  {}:", pad, branch.label()));
        for kid in kids {
            render_step(tree, kid, indent + 2, lines);
        }
    }
}

pub fn level_label(level: Level) -> &'static str {
    match level {
        Level::Info => "info",
        Level::Warning => "warning",
        Level::Error => "error",
    }
}

/// Print queued notifications to stderr.
pub fn print_notifications(notifications: &[Notification]) {
    for n in notifications {
        eprintln!("{}: {}", level_label(n.level), n.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::step::{ActionStepData, ActionStepRef};
    use crate::model::workflow::WorkflowDefinition;

    fn step_ref(id: &str, parent: ParentId, branch: BranchKind, position: usize) -> ActionStepRef {
        ActionStepRef {
            id: id.into(),
            parent,
            branch,
            position,
        }
    }

    fn sample() -> Workflow {
        let cond = ParentId::Step("cond".into());
        let def = WorkflowDefinition {
            name: "Nightly".into(),
            trigger: Some(TriggerStep {
                id: "t".into(),
                definition: DefinitionId::new("schedule"),
                title: "Every night".into(),
            }),
            steps: vec![
                step_ref("fetch", ParentId::Root, BranchKind::Root, 0),
                step_ref("cond", ParentId::Root, BranchKind::Root, 1),
                step_ref("yes", cond.clone(), BranchKind::ConditionalTrue, 0),
                step_ref("no", cond, BranchKind::ConditionalFalse, 0),
            ],
            data: vec![
                ActionStepData::new("fetch".into(), DefinitionId::new("http_request"), "Fetch"),
                ActionStepData::new("cond".into(), DefinitionId::new("if"), "Changed?"),
                ActionStepData::new("yes".into(), DefinitionId::new("log"), "Report"),
                ActionStepData::new("no".into(), DefinitionId::new("delay"), "Wait"),
            ],
        };
        Workflow::from_definition(def).0
    }

    #[test]
    fn outline_nests_branches() {
        insta::assert_snapshot!(render_outline(&sample()), @r"
        workflow: Nightly
        trigger: Every night (schedule) [t]
        - Fetch (http_request) [fetch]
        - Changed? (if) [cond]
          then:
            - Report (log) [yes]
          else:
            - Wait (delay) [no]
        ");
    }

    #[test]
    fn empty_workflow_outline() {
        let outline = render_outline(&Workflow::new("Empty"));
        assert_eq!(outline, "workflow: Empty\ntrigger: (none)\n(no steps)");
    }

    #[test]
    fn json_nests_branches() {
        let json = serde_json::to_value(workflow_to_json(&sample())).unwrap();
        assert_eq!(json["steps"][1]["branches"][0]["branch"], "conditional_true");
        assert_eq!(json["steps"][1]["branches"][1]["steps"][0]["id"], "no");
        assert!(json["steps"][0].get("comment").is_none());
    }
}
