use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::model::catalog::{DefinitionCatalog, DefinitionKind};
use crate::model::step::{ActionStepData, ActionStepRef, BranchKind, GroupKey, ParentId, StepId};
use crate::model::tree::StepTree;
use crate::model::workflow::WorkflowDefinition;

/// Structured result from `flowedit check`, suitable for --json output.
#[derive(Debug, Default, Serialize)]
pub struct CheckResult {
    pub valid: bool,
    pub errors: Vec<CheckError>,
    pub warnings: Vec<CheckWarning>,
}

/// A broken invariant in a stored workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckError {
    /// Two refs share an id
    DuplicateRef { step: StepId },
    /// A ref has no data payload
    RefWithoutData { step: StepId },
    /// A data payload has no ref
    DataWithoutRef { step: StepId },
    /// A ref names a parent that does not exist
    UnknownParent { step: StepId, parent: StepId },
    /// Following parents from this step never reaches the root
    Cycle { step: StepId },
    /// A sibling group's positions are not exactly `0..n-1`
    NonContiguous {
        group: GroupKey,
        positions: Vec<usize>,
    },
    /// The parent's definition does not declare this branch
    InvalidBranch {
        step: StepId,
        parent: ParentId,
        branch: BranchKind,
    },
    /// A step or trigger uses a definition missing from the catalog
    UnknownDefinition { step: StepId, definition: String },
    /// Configuration does not satisfy the definition's fields
    InvalidConfig { step: StepId, message: String },
}

/// A non-critical issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckWarning {
    /// No trigger has been chosen yet
    MissingTrigger,
    /// Step has an empty title
    EmptyTitle { step: StepId },
    /// A branching step has no children in any branch
    EmptyBranches { step: StepId },
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckError::DuplicateRef { step } => write!(f, "{} has more than one ref", step),
            CheckError::RefWithoutData { step } => write!(f, "{} has a ref but no data", step),
            CheckError::DataWithoutRef { step } => write!(f, "{} has data but no ref", step),
            CheckError::UnknownParent { step, parent } => {
                write!(f, "{} points at unknown parent {}", step, parent)
            }
            CheckError::Cycle { step } => write!(f, "{} is part of a parent cycle", step),
            CheckError::NonContiguous { group, positions } => {
                write!(f, "{} has positions {:?}", group, positions)
            }
            CheckError::InvalidBranch {
                step,
                parent,
                branch,
            } => write!(f, "{} sits in branch {} which {} does not have", step, branch, parent),
            CheckError::UnknownDefinition { step, definition } => {
                write!(f, "{} uses unknown definition {}", step, definition)
            }
            CheckError::InvalidConfig { step, message } => write!(f, "{}: {}", step, message),
        }
    }
}

impl fmt::Display for CheckWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckWarning::MissingTrigger => f.write_str("workflow has no trigger"),
            CheckWarning::EmptyTitle { step } => write!(f, "{} has an empty title", step),
            CheckWarning::EmptyBranches { step } => write!(f, "{} has no child steps", step),
        }
    }
}

// ---------------------------------------------------------------------------
// Main check entry points
// ---------------------------------------------------------------------------

/// Validate a stored workflow exhaustively. Read-only.
///
/// Checks performed:
/// 1. Every ref has exactly one data entry and vice versa
/// 2. Every parent chain reaches the root without repeating
/// 3. Every sibling group is numbered `0..n-1`
/// 4. Every branch is declared by the parent's definition
/// 5. Every definition exists and every configuration fits its schema
pub fn check_workflow(def: &WorkflowDefinition, catalog: &dyn DefinitionCatalog) -> CheckResult {
    let mut result = check_parts(&def.steps, &def.data, catalog);

    match &def.trigger {
        None => result.warnings.push(CheckWarning::MissingTrigger),
        Some(t) => {
            let known = catalog
                .lookup(&t.definition)
                .is_some_and(|d| d.kind == DefinitionKind::Trigger);
            if !known {
                result.errors.push(CheckError::UnknownDefinition {
                    step: t.id.clone(),
                    definition: t.definition.to_string(),
                });
            }
        }
    }

    result.valid = result.errors.is_empty();
    result
}

/// Validate a built tree. Used after mutations to confirm invariants hold.
pub fn check_tree(tree: &StepTree, catalog: &dyn DefinitionCatalog) -> CheckResult {
    check_parts(&tree.flatten(), &tree.data_entries(), catalog)
}

/// Structural invariants only (pairing, parent chains, contiguity). Needs no
/// catalog, so stores can run it before committing a write.
pub fn check_structure(refs: &[ActionStepRef], data: &[ActionStepData]) -> CheckResult {
    let mut result = CheckResult::default();
    run_structural(refs, data, &mut result);
    result.valid = result.errors.is_empty();
    result
}

fn check_parts(
    refs: &[ActionStepRef],
    data: &[ActionStepData],
    catalog: &dyn DefinitionCatalog,
) -> CheckResult {
    let mut result = CheckResult::default();
    let data_by_id = run_structural(refs, data, &mut result);
    check_content(refs, &data_by_id, catalog, &mut result);

    result.valid = result.errors.is_empty();
    result
}

fn run_structural<'a>(
    refs: &'a [ActionStepRef],
    data: &'a [ActionStepData],
    result: &mut CheckResult,
) -> HashMap<&'a StepId, &'a ActionStepData> {
    let mut by_id: HashMap<&StepId, &ActionStepRef> = HashMap::new();
    for r in refs {
        if by_id.insert(&r.id, r).is_some() {
            result.errors.push(CheckError::DuplicateRef { step: r.id.clone() });
        }
    }
    let data_by_id: HashMap<&StepId, &ActionStepData> = data.iter().map(|d| (&d.id, d)).collect();

    check_pairing(refs, data, &by_id, &data_by_id, result);
    check_parents(refs, &by_id, result);
    check_groups(refs, result);
    data_by_id
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

fn check_pairing(
    refs: &[ActionStepRef],
    data: &[ActionStepData],
    by_id: &HashMap<&StepId, &ActionStepRef>,
    data_by_id: &HashMap<&StepId, &ActionStepData>,
    result: &mut CheckResult,
) {
    let mut seen = HashSet::new();
    for r in refs {
        if seen.insert(&r.id) && !data_by_id.contains_key(&r.id) {
            result.errors.push(CheckError::RefWithoutData { step: r.id.clone() });
        }
    }
    for d in data {
        if !by_id.contains_key(&d.id) {
            result.errors.push(CheckError::DataWithoutRef { step: d.id.clone() });
        }
    }
}

fn check_parents(
    refs: &[ActionStepRef],
    by_id: &HashMap<&StepId, &ActionStepRef>,
    result: &mut CheckResult,
) {
    // Each step is walked once; a step whose chain is already known good
    // short-circuits the walk.
    let mut reaches_root: HashSet<&StepId> = HashSet::new();
    for r in refs {
        let mut chain: Vec<&StepId> = Vec::new();
        let mut cur = r;
        let ok = loop {
            if reaches_root.contains(&cur.id) {
                break true;
            }
            if chain.contains(&&cur.id) {
                result.errors.push(CheckError::Cycle { step: r.id.clone() });
                break false;
            }
            chain.push(&cur.id);
            match &cur.parent {
                ParentId::Root => break true,
                ParentId::Step(p) => match by_id.get(p) {
                    Some(next) => cur = *next,
                    None => {
                        if cur.id == r.id {
                            result.errors.push(CheckError::UnknownParent {
                                step: r.id.clone(),
                                parent: p.clone(),
                            });
                        }
                        break false;
                    }
                },
            }
        };
        if ok {
            reaches_root.extend(chain);
        }
    }
}

fn check_groups(refs: &[ActionStepRef], result: &mut CheckResult) {
    let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
    for r in refs {
        if r.parent == ParentId::Root && r.branch != BranchKind::Root {
            result.errors.push(CheckError::InvalidBranch {
                step: r.id.clone(),
                parent: r.parent.clone(),
                branch: r.branch,
            });
        }
        groups.entry(r.group()).or_default().push(r.position);
    }
    for (group, mut positions) in groups {
        positions.sort_unstable();
        let contiguous = positions.iter().enumerate().all(|(i, p)| i == *p);
        if !contiguous {
            result
                .errors
                .push(CheckError::NonContiguous { group, positions });
        }
    }
}

fn check_content(
    refs: &[ActionStepRef],
    data_by_id: &HashMap<&StepId, &ActionStepData>,
    catalog: &dyn DefinitionCatalog,
    result: &mut CheckResult,
) {
    let has_children: HashSet<&StepId> = refs.iter().filter_map(|r| r.parent.step()).collect();

    for r in refs {
        if let ParentId::Step(p) = &r.parent {
            let allowed = data_by_id
                .get(p)
                .and_then(|d| catalog.lookup(&d.definition))
                .is_none_or(|def| def.allows_branch(r.branch));
            if !allowed {
                result.errors.push(CheckError::InvalidBranch {
                    step: r.id.clone(),
                    parent: r.parent.clone(),
                    branch: r.branch,
                });
            }
        }

        let Some(data) = data_by_id.get(&r.id) else {
            continue;
        };
        if data.title.trim().is_empty() {
            result
                .warnings
                .push(CheckWarning::EmptyTitle { step: r.id.clone() });
        }
        match catalog.lookup(&data.definition) {
            None => result.errors.push(CheckError::UnknownDefinition {
                step: r.id.clone(),
                definition: data.definition.to_string(),
            }),
            Some(def) => {
                if let Err(e) = def.validate(&data.configuration) {
                    result.errors.push(CheckError::InvalidConfig {
                        step: r.id.clone(),
                        message: e.to_string(),
                    });
                }
                if !def.branches.is_empty() && !has_children.contains(&r.id) {
                    result
                        .warnings
                        .push(CheckWarning::EmptyBranches { step: r.id.clone() });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::catalog::StaticCatalog;
    use crate::model::step::{DefinitionId, TriggerStep};
    use pretty_assertions::assert_eq;

    fn r(id: &str, parent: Option<&str>, branch: BranchKind, position: usize) -> ActionStepRef {
        ActionStepRef {
            id: id.into(),
            parent: parent.map_or(ParentId::Root, |p| ParentId::Step(p.into())),
            branch,
            position,
        }
    }

    fn d(id: &str, def: &str) -> ActionStepData {
        ActionStepData::new(id.into(), DefinitionId::new(def), format!("Step {}", id))
    }

    fn workflow(steps: Vec<ActionStepRef>, data: Vec<ActionStepData>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "test".into(),
            trigger: Some(TriggerStep {
                id: "trg".into(),
                definition: "schedule".into(),
                title: "Nightly".into(),
            }),
            steps,
            data,
        }
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::builtin().unwrap()
    }

    #[test]
    fn clean_workflow_is_valid() {
        let wf = workflow(
            vec![
                r("a", None, BranchKind::Root, 0),
                r("b", None, BranchKind::Root, 1),
                r("b1", Some("b"), BranchKind::ConditionalFalse, 0),
            ],
            vec![d("a", "log"), d("b", "if"), d("b1", "log")],
        );
        let result = check_workflow(&wf, &catalog());
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn gaps_and_duplicates_in_positions() {
        let wf = workflow(
            vec![
                r("a", None, BranchKind::Root, 0),
                r("b", None, BranchKind::Root, 2),
                r("c", None, BranchKind::Root, 2),
            ],
            vec![d("a", "log"), d("b", "log"), d("c", "log")],
        );
        let result = check_workflow(&wf, &catalog());
        assert!(!result.valid);
        assert_eq!(
            result.errors,
            vec![CheckError::NonContiguous {
                group: GroupKey::root(),
                positions: vec![0, 2, 2],
            }]
        );
    }

    #[test]
    fn cycles_and_unknown_parents() {
        let wf = workflow(
            vec![
                r("p", Some("q"), BranchKind::Sequential, 0),
                r("q", Some("p"), BranchKind::Sequential, 0),
                r("x", Some("ghost"), BranchKind::Sequential, 0),
            ],
            vec![d("p", "group"), d("q", "group"), d("x", "log")],
        );
        let result = check_workflow(&wf, &catalog());
        assert!(result.errors.contains(&CheckError::Cycle { step: "p".into() }));
        assert!(result.errors.contains(&CheckError::Cycle { step: "q".into() }));
        assert!(result.errors.contains(&CheckError::UnknownParent {
            step: "x".into(),
            parent: "ghost".into(),
        }));
    }

    #[test]
    fn orphans_are_errors() {
        let wf = workflow(
            vec![r("a", None, BranchKind::Root, 0)],
            vec![d("b", "log")],
        );
        let result = check_workflow(&wf, &catalog());
        assert!(result.errors.contains(&CheckError::RefWithoutData { step: "a".into() }));
        assert!(result.errors.contains(&CheckError::DataWithoutRef { step: "b".into() }));
    }

    #[test]
    fn branch_and_schema_errors() {
        let wf = workflow(
            vec![
                r("a", None, BranchKind::Root, 0),
                r("a1", Some("a"), BranchKind::LoopBody, 0),
                r("h", None, BranchKind::Root, 1),
                r("z", None, BranchKind::Root, 2),
            ],
            vec![d("a", "log"), d("a1", "log"), d("h", "http_request"), d("z", "warp")],
        );
        let result = check_workflow(&wf, &catalog());
        assert!(result.errors.contains(&CheckError::InvalidBranch {
            step: "a1".into(),
            parent: ParentId::Step("a".into()),
            branch: BranchKind::LoopBody,
        }));
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, CheckError::InvalidConfig { step, .. } if step.as_str() == "h")));
        assert!(result.errors.contains(&CheckError::UnknownDefinition {
            step: "z".into(),
            definition: "warp".into(),
        }));
    }

    #[test]
    fn warnings_for_missing_trigger_and_empty_branches() {
        let mut wf = workflow(
            vec![r("c", None, BranchKind::Root, 0)],
            vec![d("c", "if")],
        );
        wf.trigger = None;
        let result = check_workflow(&wf, &catalog());
        assert!(result.valid);
        assert_eq!(
            result.warnings,
            vec![
                CheckWarning::EmptyBranches { step: "c".into() },
                CheckWarning::MissingTrigger,
            ]
        );
    }

    #[test]
    fn json_output_is_tagged() {
        let err = CheckError::Cycle { step: "p".into() };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "cycle");
        assert_eq!(json["step"], "p");
    }
}
