use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;

use super::step::{ActionStepData, ActionStepRef, BranchKind, GroupKey, ParentId, StepId};

/// A repair applied while building a tree from remote refs/data.
///
/// None of these are fatal: the offending entries are dropped (or renumbered)
/// so a partially corrupt workflow still renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MalformedTree {
    #[error("step {step} has a ref but no data; dropped")]
    RefWithoutData { step: StepId },
    #[error("step {step} has data but no ref; dropped")]
    DataWithoutRef { step: StepId },
    #[error("duplicate ref for step {step}; later copy dropped")]
    DuplicateRef { step: StepId },
    #[error("duplicate data for step {step}; later copy dropped")]
    DuplicateData { step: StepId },
    #[error("root-level step {step} used branch {branch}; moved to the root branch")]
    RootBranch { step: StepId, branch: BranchKind },
    #[error("step {step} points at unknown parent {parent}; dropped with {dropped} step(s)")]
    UnknownParent {
        step: StepId,
        parent: StepId,
        dropped: usize,
    },
    #[error("steps starting at {step} form a parent cycle; dropped {dropped} step(s)")]
    Cycle { step: StepId, dropped: usize },
    #[error("sibling group {group} had non-contiguous positions; renumbered")]
    Renumbered { group: GroupKey },
}

/// One row of a depth-first walk over the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub id: StepId,
    pub depth: usize,
    pub parent: ParentId,
    pub branch: BranchKind,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    parent: ParentId,
    branch: BranchKind,
}

/// Hierarchical view of a workflow's action steps.
///
/// Positions are not stored: each sibling group is an ordered list, so a
/// step's position is its index in that list and every group is contiguous
/// by construction. Values are read-only outside the crate; structural edits
/// go through `ops::tree_ops`, which clone the tree and return a new one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepTree {
    nodes: BTreeMap<StepId, Node>,
    data: BTreeMap<StepId, ActionStepData>,
    groups: BTreeMap<GroupKey, Vec<StepId>>,
}

impl StepTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from flat refs and data, repairing what can be repaired.
    pub fn build(
        refs: Vec<ActionStepRef>,
        data: Vec<ActionStepData>,
    ) -> (StepTree, Vec<MalformedTree>) {
        let mut warnings = Vec::new();

        let mut ref_map: BTreeMap<StepId, ActionStepRef> = BTreeMap::new();
        for r in refs {
            if ref_map.contains_key(&r.id) {
                warnings.push(MalformedTree::DuplicateRef { step: r.id });
                continue;
            }
            ref_map.insert(r.id.clone(), r);
        }

        let mut data_map: BTreeMap<StepId, ActionStepData> = BTreeMap::new();
        for d in data {
            if data_map.contains_key(&d.id) {
                warnings.push(MalformedTree::DuplicateData { step: d.id });
                continue;
            }
            data_map.insert(d.id.clone(), d);
        }

        // Pair refs with data
        let orphan_refs: Vec<StepId> = ref_map
            .keys()
            .filter(|id| !data_map.contains_key(*id))
            .cloned()
            .collect();
        for id in orphan_refs {
            ref_map.remove(&id);
            warnings.push(MalformedTree::RefWithoutData { step: id });
        }
        let orphan_data: Vec<StepId> = data_map
            .keys()
            .filter(|id| !ref_map.contains_key(*id))
            .cloned()
            .collect();
        for id in orphan_data {
            data_map.remove(&id);
            warnings.push(MalformedTree::DataWithoutRef { step: id });
        }

        for r in ref_map.values_mut() {
            if r.parent == ParentId::Root && r.branch != BranchKind::Root {
                warnings.push(MalformedTree::RootBranch {
                    step: r.id.clone(),
                    branch: r.branch,
                });
                r.branch = BranchKind::Root;
            }
        }

        // Index children by parent so reachability is a single walk from the root
        let mut children: HashMap<ParentId, Vec<StepId>> = HashMap::new();
        for r in ref_map.values() {
            children
                .entry(r.parent.clone())
                .or_default()
                .push(r.id.clone());
        }

        let mut reached: HashSet<StepId> = HashSet::new();
        let mut stack: Vec<ParentId> = vec![ParentId::Root];
        while let Some(parent) = stack.pop() {
            if let Some(kids) = children.get(&parent) {
                for kid in kids {
                    if reached.insert(kid.clone()) {
                        stack.push(ParentId::Step(kid.clone()));
                    }
                }
            }
        }

        let unreached: BTreeSet<StepId> = ref_map
            .keys()
            .filter(|id| !reached.contains(*id))
            .cloned()
            .collect();
        if !unreached.is_empty() {
            warnings.extend(classify_unreached(&unreached, &ref_map, &children));
            for id in &unreached {
                ref_map.remove(id);
                data_map.remove(id);
            }
        }

        // Group, order by stored position (id breaks ties) and renumber
        let mut grouped: BTreeMap<GroupKey, Vec<(usize, StepId)>> = BTreeMap::new();
        for r in ref_map.values() {
            grouped
                .entry(r.group())
                .or_default()
                .push((r.position, r.id.clone()));
        }

        let mut tree = StepTree::new();
        for (key, mut members) in grouped {
            members.sort();
            let contiguous = members.iter().enumerate().all(|(i, (pos, _))| i == *pos);
            if !contiguous {
                warnings.push(MalformedTree::Renumbered { group: key.clone() });
            }
            let ids: Vec<StepId> = members.into_iter().map(|(_, id)| id).collect();
            for id in &ids {
                tree.nodes.insert(
                    id.clone(),
                    Node {
                        parent: key.parent.clone(),
                        branch: key.branch,
                    },
                );
            }
            tree.groups.insert(key, ids);
        }
        tree.data = data_map;

        for w in &warnings {
            tracing::warn!(warning = %w, "repaired malformed workflow tree");
        }

        (tree, warnings)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.nodes.contains_key(id)
    }

    /// The structural ref of a step, with its current position
    pub fn get(&self, id: &StepId) -> Option<ActionStepRef> {
        let node = self.nodes.get(id)?;
        let position = self.position_of(id)?;
        Some(ActionStepRef {
            id: id.clone(),
            parent: node.parent.clone(),
            branch: node.branch,
            position,
        })
    }

    pub fn data(&self, id: &StepId) -> Option<&ActionStepData> {
        self.data.get(id)
    }

    /// The sibling group a step belongs to
    pub fn group_of(&self, id: &StepId) -> Option<GroupKey> {
        self.nodes
            .get(id)
            .map(|n| GroupKey::new(n.parent.clone(), n.branch))
    }

    pub fn position_of(&self, id: &StepId) -> Option<usize> {
        let key = self.group_of(id)?;
        self.groups.get(&key)?.iter().position(|s| s == id)
    }

    /// Ordered children of `parent` in `branch`
    pub fn children(&self, parent: &ParentId, branch: BranchKind) -> &[StepId] {
        self.groups
            .get(&GroupKey::new(parent.clone(), branch))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn group(&self, key: &GroupKey) -> &[StepId] {
        self.groups.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Non-empty child groups of a step, in branch order
    pub fn child_groups(&self, id: &StepId) -> Vec<(BranchKind, &[StepId])> {
        let lo = GroupKey::new(ParentId::Step(id.clone()), BranchKind::Root);
        let hi = GroupKey::new(ParentId::Step(id.clone()), BranchKind::LoopBody);
        self.groups
            .range(lo..=hi)
            .map(|(k, v)| (k.branch, v.as_slice()))
            .collect()
    }

    /// All non-empty sibling groups
    pub fn groups(&self) -> impl Iterator<Item = (&GroupKey, &[StepId])> {
        self.groups.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Every step below `id` (not including `id` itself)
    pub fn descendants(&self, id: &StepId) -> BTreeSet<StepId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![id.clone()];
        while let Some(cur) = stack.pop() {
            for (_, kids) in self.child_groups(&cur) {
                for kid in kids {
                    if out.insert(kid.clone()) {
                        stack.push(kid.clone());
                    }
                }
            }
        }
        out
    }

    /// `id` followed by its descendants in pre-order
    pub fn subtree(&self, id: &StepId) -> Vec<StepId> {
        let mut out = Vec::new();
        if self.contains(id) {
            self.collect_preorder(id, &mut out);
        }
        out
    }

    fn collect_preorder(&self, id: &StepId, out: &mut Vec<StepId>) {
        out.push(id.clone());
        for (_, kids) in self.child_groups(id) {
            for kid in kids {
                self.collect_preorder(kid, out);
            }
        }
    }

    /// True when `candidate` sits somewhere below `ancestor`
    pub fn is_descendant(&self, ancestor: &StepId, candidate: &StepId) -> bool {
        let mut cur = candidate;
        while let Some(node) = self.nodes.get(cur) {
            match &node.parent {
                ParentId::Root => return false,
                ParentId::Step(p) if p == ancestor => return true,
                ParentId::Step(p) => cur = p,
            }
        }
        false
    }

    /// Parent chain of a step, nearest first
    pub fn ancestors(&self, id: &StepId) -> Vec<StepId> {
        let mut out = Vec::new();
        let mut cur = id;
        while let Some(ParentId::Step(p)) = self.nodes.get(cur).map(|n| &n.parent) {
            out.push(p.clone());
            cur = p;
        }
        out
    }

    pub fn depth(&self, id: &StepId) -> usize {
        self.ancestors(id).len()
    }

    /// Depth-first walk from the root, branches in declaration order
    pub fn outline(&self) -> Vec<OutlineEntry> {
        let mut out = Vec::new();
        self.outline_group(&GroupKey::root(), 0, &mut out);
        out
    }

    fn outline_group(&self, key: &GroupKey, depth: usize, out: &mut Vec<OutlineEntry>) {
        for (position, id) in self.group(key).iter().enumerate() {
            out.push(OutlineEntry {
                id: id.clone(),
                depth,
                parent: key.parent.clone(),
                branch: key.branch,
                position,
            });
            for (branch, _) in self.child_groups(id) {
                self.outline_group(&GroupKey::new(ParentId::Step(id.clone()), branch), depth + 1, out);
            }
        }
    }

    /// Structural refs in depth-first order
    pub fn flatten(&self) -> Vec<ActionStepRef> {
        self.outline()
            .into_iter()
            .map(|e| ActionStepRef {
                id: e.id,
                parent: e.parent,
                branch: e.branch,
                position: e.position,
            })
            .collect()
    }

    /// Data payloads in depth-first order
    pub fn data_entries(&self) -> Vec<ActionStepData> {
        self.outline()
            .into_iter()
            .filter_map(|e| self.data.get(&e.id).cloned())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Crate-internal primitives used by tree_ops. Each keeps groups ordered and
    // drops groups that become empty, so equal trees compare equal.
    // -----------------------------------------------------------------------

    /// Insert a new node at `index` (already clamped) in `key`.
    pub(crate) fn attach(&mut self, data: ActionStepData, key: GroupKey, index: usize) {
        let id = data.id.clone();
        self.nodes.insert(
            id.clone(),
            Node {
                parent: key.parent.clone(),
                branch: key.branch,
            },
        );
        self.data.insert(id.clone(), data);
        let group = self.groups.entry(key).or_default();
        let index = index.min(group.len());
        group.insert(index, id);
    }

    /// Take a node out of its sibling group, keeping its node, data and children.
    pub(crate) fn unlink(&mut self, id: &StepId) -> Option<(GroupKey, usize)> {
        let key = self.group_of(id)?;
        let group = self.groups.get_mut(&key)?;
        let index = group.iter().position(|s| s == id)?;
        group.remove(index);
        if group.is_empty() {
            self.groups.remove(&key);
        }
        Some((key, index))
    }

    /// Put an unlinked node back into a group at `index` (clamped).
    pub(crate) fn link(&mut self, id: &StepId, key: GroupKey, index: usize) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = key.parent.clone();
            node.branch = key.branch;
        }
        let group = self.groups.entry(key).or_default();
        let index = index.min(group.len());
        group.insert(index, id.clone());
    }

    /// Remove a step and its whole subtree, returning the removed refs and
    /// data in pre-order (positions as they were before removal).
    pub(crate) fn remove_subtree(
        &mut self,
        id: &StepId,
    ) -> Vec<(ActionStepRef, ActionStepData)> {
        let order = self.subtree(id);
        let refs: Vec<ActionStepRef> = order.iter().filter_map(|s| self.get(s)).collect();
        self.unlink(id);
        let mut removed = Vec::with_capacity(refs.len());
        for r in refs {
            self.nodes.remove(&r.id);
            let lo = GroupKey::new(ParentId::Step(r.id.clone()), BranchKind::Root);
            let hi = GroupKey::new(ParentId::Step(r.id.clone()), BranchKind::LoopBody);
            let owned: Vec<GroupKey> = self.groups.range(lo..=hi).map(|(k, _)| k.clone()).collect();
            for k in owned {
                self.groups.remove(&k);
            }
            if let Some(d) = self.data.remove(&r.id) {
                removed.push((r, d));
            }
        }
        removed
    }

    pub(crate) fn data_mut(&mut self, id: &StepId) -> Option<&mut ActionStepData> {
        self.data.get_mut(id)
    }
}

/// Explain why unreached refs were dropped: either an ancestor points at an
/// unknown parent, or the chain loops back on itself.
fn classify_unreached(
    unreached: &BTreeSet<StepId>,
    refs: &BTreeMap<StepId, ActionStepRef>,
    children: &HashMap<ParentId, Vec<StepId>>,
) -> Vec<MalformedTree> {
    let mut out = Vec::new();
    let mut covered: HashSet<StepId> = HashSet::new();

    let count_below = |start: &StepId, covered: &mut HashSet<StepId>| -> usize {
        let mut n = 0;
        let mut stack = vec![start.clone()];
        while let Some(cur) = stack.pop() {
            if !covered.insert(cur.clone()) {
                continue;
            }
            n += 1;
            if let Some(kids) = children.get(&ParentId::Step(cur)) {
                stack.extend(kids.iter().cloned());
            }
        }
        n
    };

    for id in unreached {
        if let Some(ParentId::Step(parent)) = refs.get(id).map(|r| &r.parent)
            && !refs.contains_key(parent)
        {
            let dropped = count_below(id, &mut covered);
            out.push(MalformedTree::UnknownParent {
                step: id.clone(),
                parent: parent.clone(),
                dropped,
            });
        }
    }

    for id in unreached {
        if covered.contains(id) {
            continue;
        }
        let dropped = count_below(id, &mut covered);
        out.push(MalformedTree::Cycle {
            step: id.clone(),
            dropped,
        });
    }

    out
}
