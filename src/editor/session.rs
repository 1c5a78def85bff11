use std::time::Instant;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::io::store::{RemoteStore, Snapshot, StoreError};
use crate::model::catalog::DefinitionCatalog;
use crate::model::config::EditorConfig;
use crate::model::step::{
    ActionStepData, BranchKind, ConfigValue, DefinitionId, FieldValue, ParentId, StepField,
    StepId, TriggerStep,
};
use crate::model::workflow::Workflow;
use crate::ops::tree_ops::{NewStep, TreeError};

use super::command::{Intent, UndoStack};
use super::drag::{DragCoordinator, DragEffect, DragEvent, DragIntent, DropZone};
use super::selection::{
    DeleteTarget, DialogError, DialogState, Selection, SelectionState, StepKind,
};
use super::sync::{Outgoing, PersistResponse, SyncBridge, SyncEvent, Ticket};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Dialog(#[from] DialogError),
    #[error("workflow has no trigger")]
    NoTrigger,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// A message for the user, queued until the host takes it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub level: Level,
    pub message: String,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Content for a step about to be inserted. The session assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDraft {
    pub definition: DefinitionId,
    pub title: String,
    pub comment: String,
    pub values: IndexMap<String, ConfigValue>,
}

impl StepDraft {
    pub fn new(definition: impl Into<String>, title: impl Into<String>) -> Self {
        StepDraft {
            definition: DefinitionId::new(definition),
            title: title.into(),
            comment: String::new(),
            values: IndexMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    fn into_data(self, id: StepId) -> ActionStepData {
        let mut data = ActionStepData::new(id, self.definition, self.title);
        data.comment = self.comment;
        data.configuration.values = self.values;
        data
    }
}

/// Hands out `<prefix>-<n>` ids that are not already taken.
#[derive(Debug, Clone)]
struct IdAllocator {
    prefix: String,
    next: u64,
}

impl IdAllocator {
    fn new(prefix: &str) -> Self {
        IdAllocator {
            prefix: prefix.to_string(),
            next: 1,
        }
    }

    /// Move past every numbered id already in use.
    fn observe<'a>(&mut self, ids: impl IntoIterator<Item = &'a StepId>) {
        let marker = format!("{}-", self.prefix);
        for id in ids {
            if let Some(n) = id
                .as_str()
                .strip_prefix(&marker)
                .and_then(|n| n.parse::<u64>().ok())
            {
                self.next = self.next.max(n.saturating_add(1));
            }
        }
    }

    fn allocate(&mut self, taken: impl Fn(&StepId) -> bool) -> StepId {
        loop {
            let id = StepId::new(format!("{}-{}", self.prefix, self.next));
            // Past the top of the range, reuse free low numbers
            self.next = self.next.checked_add(1).unwrap_or(1);
            if !taken(&id) {
                return id;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything needed to edit one workflow.
pub struct EditorSession {
    catalog: Box<dyn DefinitionCatalog>,
    config: EditorConfig,
    sync: SyncBridge,
    selection: SelectionState,
    drag: DragCoordinator,
    undo: UndoStack,
    ids: IdAllocator,
    notifications: Vec<Notification>,
}

impl EditorSession {
    /// Open a session on a loaded snapshot. Structural damage in the snapshot
    /// is repaired and reported as warnings.
    pub fn open(
        snapshot: Snapshot,
        catalog: Box<dyn DefinitionCatalog>,
        config: EditorConfig,
    ) -> Self {
        let Snapshot { workflow, versions } = snapshot;
        let (workflow, repairs) = Workflow::from_definition(workflow);
        let mut ids = IdAllocator::new(&config.editor.id_prefix);
        ids.observe(&workflow.all_ids());

        let mut session = EditorSession {
            sync: SyncBridge::new(workflow, &versions, config.sync.clone()),
            undo: UndoStack::new(config.editor.undo_limit),
            catalog,
            config,
            selection: SelectionState::new(),
            drag: DragCoordinator::new(),
            ids,
            notifications: Vec::new(),
        };
        for repair in repairs {
            session.notify(Level::Warning, repair.to_string());
        }
        session
    }

    /// The workflow as the user sees it, pending changes included
    pub fn workflow(&self) -> &Workflow {
        self.sync.optimistic()
    }

    /// The workflow as last confirmed by the store
    pub fn confirmed(&self) -> &Workflow {
        self.sync.confirmed()
    }

    pub fn catalog(&self) -> &dyn DefinitionCatalog {
        self.catalog.as_ref()
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn selected(&self) -> Option<&Selection> {
        self.selection.selected()
    }

    pub fn dialog(&self) -> &DialogState {
        self.selection.dialog()
    }

    pub fn drag(&self) -> &DragCoordinator {
        &self.drag
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    /// Whether every change has been resolved by the store
    pub fn is_settled(&self) -> bool {
        self.sync.is_idle()
    }

    pub fn needs_resync(&self) -> bool {
        self.sync.needs_resync()
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Set (or replace) the trigger and select it.
    pub fn choose_trigger(
        &mut self,
        definition: DefinitionId,
        title: impl Into<String>,
    ) -> Result<StepId, EditorError> {
        let existing = self.workflow().trigger.as_ref().map(|t| t.id.clone());
        let id = match existing {
            Some(id) => id,
            None => self.allocate_id(),
        };
        let trigger = TriggerStep {
            id: id.clone(),
            definition,
            title: title.into(),
        };
        self.commit(Intent::SetTrigger {
            trigger: Some(trigger),
        })?;
        self.selection.select(Selection::Trigger);
        Ok(id)
    }

    pub fn select_trigger(&mut self) -> Result<(), EditorError> {
        if self.workflow().trigger.is_none() {
            return Err(EditorError::NoTrigger);
        }
        self.selection.select(Selection::Trigger);
        Ok(())
    }

    pub fn select_step(&mut self, step: &StepId) -> Result<(), EditorError> {
        if !self.workflow().tree.contains(step) {
            return Err(TreeError::StepNotFound(step.clone()).into());
        }
        self.selection.select(Selection::Action(step.clone()));
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Insert one step and select it. Without a branch, a child of a step
    /// lands in that step's preferred branch.
    pub fn request_insert(
        &mut self,
        parent: ParentId,
        branch: Option<BranchKind>,
        position: usize,
        draft: StepDraft,
    ) -> Result<StepId, EditorError> {
        let branch = self.resolve_branch(&parent, branch)?;
        let id = self.allocate_id();
        self.commit(Intent::Insert {
            parent,
            branch,
            steps: vec![NewStep {
                data: draft.into_data(id.clone()),
                position,
            }],
        })?;
        self.selection.select(Selection::Action(id.clone()));
        Ok(id)
    }

    /// Insert several steps into one sibling group as a single change.
    /// Positions refer to the group as it was before the call.
    pub fn request_insert_many(
        &mut self,
        parent: ParentId,
        branch: Option<BranchKind>,
        drafts: Vec<(usize, StepDraft)>,
    ) -> Result<Vec<StepId>, EditorError> {
        let branch = self.resolve_branch(&parent, branch)?;
        let mut ids = Vec::with_capacity(drafts.len());
        let mut steps = Vec::with_capacity(drafts.len());
        for (position, draft) in drafts {
            let id = self.allocate_id();
            ids.push(id.clone());
            steps.push(NewStep {
                data: draft.into_data(id),
                position,
            });
        }
        self.commit(Intent::Insert {
            parent,
            branch,
            steps,
        })?;
        Ok(ids)
    }

    /// Move a step with its subtree. Returns false when it was already there.
    pub fn request_move(
        &mut self,
        step: StepId,
        parent: ParentId,
        branch: Option<BranchKind>,
        position: usize,
    ) -> Result<bool, EditorError> {
        let branch = self.resolve_branch(&parent, branch)?;
        let ticket = self.commit(Intent::Move {
            step,
            parent,
            branch,
            position,
        })?;
        Ok(ticket.is_some())
    }

    pub fn request_edit(
        &mut self,
        step: StepId,
        field: StepField,
        value: FieldValue,
    ) -> Result<(), EditorError> {
        self.commit(Intent::EditField { step, field, value })?;
        Ok(())
    }

    /// Open the delete confirmation for the trigger or an action step.
    pub fn request_delete(&mut self, selection: Selection) -> Result<(), EditorError> {
        let target = match &selection {
            Selection::Trigger => {
                let trigger = self.workflow().trigger.as_ref().ok_or(EditorError::NoTrigger)?;
                DeleteTarget {
                    kind: StepKind::Trigger,
                    step: Some(trigger.id.clone()),
                    parent: None,
                    branch: None,
                    display_title: trigger.title.clone(),
                }
            }
            Selection::Action(id) => {
                let tree = &self.workflow().tree;
                let (Some(r), Some(data)) = (tree.get(id), tree.data(id)) else {
                    return Err(TreeError::StepNotFound(id.clone()).into());
                };
                DeleteTarget {
                    kind: StepKind::Action,
                    step: Some(id.clone()),
                    parent: Some(r.parent),
                    branch: Some(r.branch),
                    display_title: data.title.clone(),
                }
            }
        };
        self.selection.open_delete_dialog(target)?;
        Ok(())
    }

    /// Perform the delete the open dialog asks about.
    pub fn confirm_dialog(&mut self) -> Result<(), EditorError> {
        let target = self.selection.confirm()?;
        let intent = match (target.kind, target.step) {
            (StepKind::Trigger, _) => Intent::SetTrigger { trigger: None },
            (StepKind::Action, Some(step)) => Intent::Delete { steps: vec![step] },
            (StepKind::Action, None) => return Ok(()),
        };
        self.commit(intent)?;
        Ok(())
    }

    pub fn cancel_dialog(&mut self) -> Result<(), EditorError> {
        self.selection.cancel()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Drag and drop
    // -----------------------------------------------------------------------

    pub fn set_drop_zones(&mut self, zones: Vec<DropZone>) {
        self.drag.set_drop_zones(zones);
    }

    /// Feed one pointer event. A drop is submitted right away; a rejected
    /// drop leaves the workflow untouched and ends the drag cancelled.
    pub fn handle_drag(&mut self, event: DragEvent) -> DragEffect {
        let effect = self.drag.apply_event(event, &self.sync.optimistic().tree);
        let intent = match effect {
            DragEffect::Committed { intent } => intent,
            other => return other,
        };
        let result = match intent {
            DragIntent::Move {
                step,
                parent,
                branch,
                position,
            } => self.commit(Intent::Move {
                step,
                parent,
                branch,
                position,
            }),
            DragIntent::Insert {
                definition,
                parent,
                branch,
                position,
            } => {
                let title = self
                    .catalog
                    .lookup(&definition)
                    .map_or_else(|| definition.to_string(), |d| d.title.clone());
                let id = self.allocate_id();
                self.commit(Intent::Insert {
                    parent,
                    branch,
                    steps: vec![NewStep {
                        data: ActionStepData::new(id, definition, title),
                        position,
                    }],
                })
            }
        };
        match result {
            Ok(_) => self.drag.finish(true),
            Err(e) => {
                self.notify(Level::Warning, format!("drop rejected: {}", e));
                self.drag.finish(false)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Undo
    // -----------------------------------------------------------------------

    /// Undo the most recent command. Returns false when there is none.
    pub fn undo(&mut self) -> Result<bool, EditorError> {
        let Some(command) = self.undo.pop_undo() else {
            return Ok(false);
        };
        match self.sync.submit(command.inverse.clone(), self.catalog.as_ref()) {
            Ok(_) => {
                self.undo.push_redo(command);
                self.after_change();
                Ok(true)
            }
            Err(e) => {
                // Whatever it undid is gone; older history cannot be trusted
                self.undo.push_sync_marker();
                Err(e.into())
            }
        }
    }

    /// Redo the most recently undone command. Returns false when there is none.
    pub fn redo(&mut self) -> Result<bool, EditorError> {
        let Some(command) = self.undo.pop_redo() else {
            return Ok(false);
        };
        match self.sync.submit(command.forward.clone(), self.catalog.as_ref()) {
            Ok(Some(submitted)) => self.undo.push_redone(submitted.command),
            Ok(None) => self.undo.push_redone(command),
            Err(e) => {
                self.undo.push_sync_marker();
                return Err(e.into());
            }
        }
        self.after_change();
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        self.sync.take_outbox()
    }

    pub fn on_response(&mut self, response: PersistResponse, now: Instant) {
        self.sync.on_response(response, now, self.catalog.as_ref());
        self.after_change();
    }

    /// Re-queue retries that are due.
    pub fn poll(&mut self, now: Instant) -> usize {
        self.sync.poll(now)
    }

    /// Drive the outbox against `store` until every change is resolved,
    /// sleeping through retry backoff.
    pub fn pump(&mut self, store: &mut dyn RemoteStore) {
        loop {
            let outgoing = self.take_outbox();
            if outgoing.is_empty() {
                let Some(due) = self.sync.next_retry() else {
                    break;
                };
                let now = Instant::now();
                if due > now {
                    std::thread::sleep(due - now);
                }
                self.poll(Instant::now());
                continue;
            }
            for out in outgoing {
                tracing::debug!(ticket = %out.ticket, attempt = out.attempt, "sending");
                let result = store.execute(&out.request);
                self.on_response(
                    PersistResponse {
                        ticket: out.ticket,
                        result,
                    },
                    Instant::now(),
                );
            }
        }
    }

    /// Reload from the store, dropping pending changes and undo history.
    pub fn resync(&mut self, store: &mut dyn RemoteStore) -> Result<(), EditorError> {
        let Snapshot { workflow, versions } = store.load()?;
        let (workflow, repairs) = Workflow::from_definition(workflow);
        for repair in repairs {
            self.notify(Level::Warning, repair.to_string());
        }
        self.ids.observe(&workflow.all_ids());
        self.sync.resync(workflow, &versions);
        self.undo.push_sync_marker();
        self.after_change();
        self.notify(Level::Info, "reloaded workflow from store");
        Ok(())
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn commit(&mut self, intent: Intent) -> Result<Option<Ticket>, EditorError> {
        let submitted = self.sync.submit(intent, self.catalog.as_ref())?;
        let ticket = submitted.map(|s| {
            self.undo.push(s.command);
            s.ticket
        });
        self.after_change();
        Ok(ticket)
    }

    fn allocate_id(&mut self) -> StepId {
        let workflow = self.sync.optimistic();
        self.ids.allocate(|id| workflow.contains_id(id))
    }

    fn resolve_branch(
        &self,
        parent: &ParentId,
        branch: Option<BranchKind>,
    ) -> Result<BranchKind, EditorError> {
        if let Some(branch) = branch {
            return Ok(branch);
        }
        let ParentId::Step(id) = parent else {
            return Ok(BranchKind::Root);
        };
        let data = self
            .workflow()
            .tree
            .data(id)
            .ok_or_else(|| TreeError::InvalidParent(id.clone()))?;
        let definition = self
            .catalog
            .lookup(&data.definition)
            .ok_or_else(|| TreeError::UnknownDefinition(data.definition.clone()))?;
        match definition.preferred_branch() {
            Some(branch) => Ok(branch),
            None => Err(EditorError::Tree(TreeError::InvalidBranch {
                parent: parent.clone(),
                branch: BranchKind::Sequential,
            })),
        }
    }

    /// Turn sync events into notifications and drop a selection that no
    /// longer points at anything.
    fn after_change(&mut self) {
        for event in self.sync.take_events() {
            match event {
                SyncEvent::Retrying {
                    ticket,
                    attempt,
                    delay,
                } => self.notify(
                    Level::Info,
                    format!(
                        "saving {} failed; attempt {} in {} ms",
                        ticket,
                        attempt,
                        delay.as_millis()
                    ),
                ),
                SyncEvent::RolledBack {
                    command,
                    error,
                    dropped,
                    ..
                } => {
                    self.undo.push_sync_marker();
                    self.notify(
                        Level::Error,
                        format!("could not save \"{}\": {}; change reverted", command, error),
                    );
                    for d in dropped {
                        self.notify(
                            Level::Warning,
                            format!("\"{}\" no longer applies and was discarded", d),
                        );
                    }
                }
                SyncEvent::Conflict { step, field } => self.notify(
                    Level::Warning,
                    format!("{} of {} was changed elsewhere; reload to see it", field, step),
                ),
            }
        }

        let workflow = self.sync.optimistic();
        self.selection.forget_missing(|sel| match sel {
            Selection::Trigger => workflow.trigger.is_some(),
            Selection::Action(id) => workflow.tree.contains(id),
        });
    }

    fn notify(&mut self, level: Level, message: impl Into<String>) {
        self.notifications.push(Notification {
            level,
            message: message.into(),
            at: Utc::now(),
        });
    }
}
