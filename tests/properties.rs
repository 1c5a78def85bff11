//! Property tests for tree mutations and the sync discipline.
//!
//! Trees are grown from random insert plans so every generated tree is one
//! the editor could actually produce.

use std::collections::BTreeMap;
use std::time::Instant;

use flowedit::editor::{Intent, PersistResponse, SyncBridge};
use flowedit::io::store::{InMemoryStore, RemoteStore, Snapshot};
use flowedit::model::catalog::{DefinitionCatalog, StaticCatalog};
use flowedit::model::config::SyncConfig;
use flowedit::model::step::{
    ActionStepData, ActionStepRef, BranchKind, DefinitionId, FieldValue, ParentId, StepField,
    StepId,
};
use flowedit::model::tree::StepTree;
use flowedit::model::workflow::{Workflow, WorkflowDefinition};
use flowedit::ops::tree_ops::{self, TreeError};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

const DEFINITIONS: [&str; 4] = ["log", "group", "if", "loop"];

#[derive(Debug, Clone)]
struct Seeded {
    kind: usize,
    target: usize,
    position: usize,
}

#[derive(Debug, Clone)]
enum Op {
    Insert(Seeded),
    Move { step: usize, target: usize, position: usize },
    Delete { step: usize },
    Rename { step: usize, title: String },
}

fn seeded() -> impl Strategy<Value = Seeded> {
    (0..DEFINITIONS.len(), any::<usize>(), 0usize..8).prop_map(|(kind, target, position)| Seeded {
        kind,
        target,
        position,
    })
}

fn plan() -> impl Strategy<Value = Vec<Seeded>> {
    prop::collection::vec(seeded(), 1..24)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        seeded().prop_map(Op::Insert),
        (any::<usize>(), any::<usize>(), 0usize..8).prop_map(|(step, target, position)| Op::Move {
            step,
            target,
            position
        }),
        any::<usize>().prop_map(|step| Op::Delete { step }),
        (any::<usize>(), "[a-z]{1,8}").prop_map(|(step, title)| Op::Rename { step, title }),
    ]
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn catalog() -> StaticCatalog {
    StaticCatalog::builtin().unwrap()
}

/// Every group a step could be placed into, root first
fn targets(tree: &StepTree, catalog: &StaticCatalog) -> Vec<(ParentId, BranchKind)> {
    let mut out = vec![(ParentId::Root, BranchKind::Root)];
    for r in tree.flatten() {
        let definition = &tree.data(&r.id).unwrap().definition;
        for branch in &catalog.lookup(definition).unwrap().branches {
            out.push((ParentId::Step(r.id.clone()), *branch));
        }
    }
    out
}

fn nth_step(tree: &StepTree, seed: usize) -> Option<StepId> {
    let refs = tree.flatten();
    if refs.is_empty() {
        None
    } else {
        Some(refs[seed % refs.len()].id.clone())
    }
}

fn insert_seeded(tree: &StepTree, catalog: &StaticCatalog, id: usize, s: &Seeded) -> StepTree {
    let options = targets(tree, catalog);
    let (parent, branch) = options[s.target % options.len()].clone();
    let data = ActionStepData::new(
        StepId::new(format!("s{}", id)),
        DefinitionId::new(DEFINITIONS[s.kind]),
        format!("Step {}", id),
    );
    tree_ops::insert(tree, catalog, data, parent, branch, s.position)
        .unwrap()
        .tree
}

fn grow(plan: &[Seeded], catalog: &StaticCatalog) -> StepTree {
    let mut tree = StepTree::new();
    for (i, s) in plan.iter().enumerate() {
        tree = insert_seeded(&tree, catalog, i, s);
    }
    tree
}

/// Check every sibling group, not a sample of them.
fn assert_well_formed(tree: &StepTree) {
    let refs = tree.flatten();
    assert_eq!(refs.len(), tree.len());
    assert_eq!(tree.data_entries().len(), tree.len());

    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for r in &refs {
        if let Some(parent) = r.parent.step() {
            assert!(tree.contains(parent), "{} has a missing parent", r.id);
        }
        groups.entry(r.group().to_string()).or_default().push(r.position);
    }
    for (group, mut positions) in groups {
        positions.sort();
        let expected: Vec<usize> = (0..positions.len()).collect();
        assert_eq!(positions, expected, "group {} is not contiguous", group);
    }

    for (key, members) in tree.groups() {
        for (i, id) in members.iter().enumerate() {
            assert_eq!(tree.group_of(id).as_ref(), Some(key));
            assert_eq!(tree.position_of(id), Some(i));
        }
    }
}

// ---------------------------------------------------------------------------
// Tree properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn flatten_then_build_round_trips(plan in plan()) {
        let catalog = catalog();
        let tree = grow(&plan, &catalog);

        // Order of the flat lists must not matter
        let mut refs: Vec<ActionStepRef> = tree.flatten();
        refs.reverse();
        let (rebuilt, warnings) = StepTree::build(refs, tree.data_entries());
        prop_assert!(warnings.is_empty(), "unexpected repairs: {:?}", warnings);
        prop_assert_eq!(rebuilt, tree);
    }

    #[test]
    fn move_into_own_subtree_fails(plan in plan(), pick in any::<usize>(), inner in any::<usize>()) {
        let catalog = catalog();
        let tree = grow(&plan, &catalog);
        let before = tree.clone();
        let step = nth_step(&tree, pick).unwrap();

        let mut candidates: Vec<StepId> = tree.descendants(&step).into_iter().collect();
        candidates.push(step.clone());
        let target = candidates[inner % candidates.len()].clone();

        for branch in [
            BranchKind::Sequential,
            BranchKind::ConditionalTrue,
            BranchKind::ConditionalFalse,
            BranchKind::LoopBody,
        ] {
            let result = tree_ops::move_step(
                &tree,
                &catalog,
                &step,
                ParentId::Step(target.clone()),
                branch,
                0,
            );
            let is_cycle = matches!(result, Err(TreeError::Cycle { .. }));
            prop_assert!(is_cycle, "expected a cycle error, got {:?}", result.map(|a| a.affected));
        }
        prop_assert_eq!(&tree, &before);
        prop_assert_eq!(
            serde_json::to_string(&tree.flatten()).unwrap(),
            serde_json::to_string(&before.flatten()).unwrap()
        );
    }

    #[test]
    fn groups_stay_contiguous(plan in plan(), ops in prop::collection::vec(op(), 1..40)) {
        let catalog = catalog();
        let mut tree = grow(&plan, &catalog);
        let mut next_id = plan.len();

        for op in ops {
            let result = match op {
                Op::Insert(s) => {
                    next_id += 1;
                    let options = targets(&tree, &catalog);
                    let (parent, branch) = options[s.target % options.len()].clone();
                    let data = ActionStepData::new(
                        StepId::new(format!("s{}", next_id)),
                        DefinitionId::new(DEFINITIONS[s.kind]),
                        "new",
                    );
                    tree_ops::insert(&tree, &catalog, data, parent, branch, s.position)
                }
                Op::Move { step, target, position } => {
                    let Some(step) = nth_step(&tree, step) else { continue };
                    let options = targets(&tree, &catalog);
                    let (parent, branch) = options[target % options.len()].clone();
                    tree_ops::move_step(&tree, &catalog, &step, parent, branch, position)
                }
                Op::Delete { step } => {
                    let Some(step) = nth_step(&tree, step) else { continue };
                    tree_ops::delete(&tree, &step)
                }
                Op::Rename { step, title } => {
                    let Some(step) = nth_step(&tree, step) else { continue };
                    tree_ops::edit_field(&tree, &catalog, &step, &StepField::Title, FieldValue::Text(title))
                }
            };
            match result {
                Ok(applied) => tree = applied.tree,
                // Only moves into a step's own subtree can be refused here
                Err(e) => {
                    prop_assert!(matches!(e, TreeError::Cycle { .. }), "unexpected error: {}", e);
                }
            }
            assert_well_formed(&tree);
        }
    }

    #[test]
    fn delete_removes_exactly_the_subtree(plan in plan(), pick in any::<usize>()) {
        let catalog = catalog();
        let tree = grow(&plan, &catalog);
        let step = nth_step(&tree, pick).unwrap();
        let expected = tree.descendants(&step).len() + 1;

        let applied = tree_ops::delete(&tree, &step).unwrap();
        prop_assert_eq!(applied.removed.len(), expected);
        prop_assert_eq!(applied.removed[0].clone(), step);
        prop_assert_eq!(applied.tree.flatten().len(), tree.flatten().len() - expected);
        prop_assert_eq!(applied.tree.data_entries().len(), tree.data_entries().len() - expected);
        for id in &applied.removed {
            prop_assert!(!applied.tree.contains(id));
            prop_assert!(applied.tree.data(id).is_none());
        }
        assert_well_formed(&applied.tree);
    }
}

// ---------------------------------------------------------------------------
// Sync properties
// ---------------------------------------------------------------------------

fn single_step() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "Edits".into(),
        trigger: None,
        steps: vec![ActionStepRef {
            id: "s".into(),
            parent: ParentId::Root,
            branch: BranchKind::Root,
            position: 0,
        }],
        data: vec![ActionStepData::new("s".into(), DefinitionId::new("log"), "Start")],
    }
}

fn title(workflow: &Workflow) -> String {
    workflow.tree.data(&"s".into()).unwrap().title.clone()
}

/// Edit count plus the order in which the store sees the writes
fn arrival_order() -> impl Strategy<Value = (usize, Vec<usize>)> {
    (2usize..7).prop_flat_map(|n| (Just(n), Just((0..n).collect::<Vec<_>>()).prop_shuffle()))
}

proptest! {
    #[test]
    fn stale_writes_never_show((edits, order) in arrival_order()) {
        let catalog = catalog();
        let def = single_step();
        let mut store = InMemoryStore::new(Snapshot::new(def.clone()));
        let (workflow, _) = Workflow::from_definition(def);
        let mut bridge = SyncBridge::new(workflow, &[], SyncConfig::default());

        for i in 0..edits {
            bridge
                .submit(
                    Intent::EditField {
                        step: "s".into(),
                        field: StepField::Title,
                        value: FieldValue::Text(format!("v{}", i)),
                    },
                    &catalog,
                )
                .unwrap();
        }
        let latest = format!("v{}", edits - 1);
        let outbox = bridge.take_outbox();
        prop_assert_eq!(outbox.len(), edits);

        let now = Instant::now();
        for i in order {
            let result = store.execute(&outbox[i].request);
            bridge.on_response(
                PersistResponse {
                    ticket: outbox[i].ticket,
                    result,
                },
                now,
                &catalog,
            );
            prop_assert_eq!(title(bridge.optimistic()), latest.clone());
        }

        prop_assert!(bridge.is_idle());
        prop_assert!(!bridge.needs_resync());
        prop_assert_eq!(title(bridge.confirmed()), latest.clone());
        prop_assert_eq!(&store.snapshot().workflow.data[0].title, &latest);
    }
}
