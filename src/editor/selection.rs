use serde::Serialize;

use crate::model::step::{BranchKind, ParentId, StepId};

/// The single selection slot: the trigger or one action step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Selection {
    Trigger,
    Action(StepId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Trigger,
    Action,
}

/// What a pending delete confirmation refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteTarget {
    pub kind: StepKind,
    pub step: Option<StepId>,
    pub parent: Option<ParentId>,
    pub branch: Option<BranchKind>,
    /// Title shown in the confirmation prompt
    pub display_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "target", rename_all = "snake_case")]
pub enum DialogState {
    Idle,
    ConfirmingDelete(DeleteTarget),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DialogError {
    #[error("a confirmation dialog is already open")]
    AlreadyOpen,
    #[error("no confirmation dialog is open")]
    NotOpen,
}

/// Selection plus the modal confirmation dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionState {
    selected: Option<Selection>,
    dialog: DialogState,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionState {
    pub fn new() -> Self {
        SelectionState {
            selected: None,
            dialog: DialogState::Idle,
        }
    }

    pub fn selected(&self) -> Option<&Selection> {
        self.selected.as_ref()
    }

    pub fn dialog(&self) -> &DialogState {
        &self.dialog
    }

    /// Selecting the trigger replaces any selected action, and vice versa.
    pub fn select(&mut self, selection: Selection) {
        self.selected = Some(selection);
    }

    pub fn clear(&mut self) {
        self.selected = None;
    }

    pub fn open_delete_dialog(&mut self, target: DeleteTarget) -> Result<(), DialogError> {
        if let DialogState::ConfirmingDelete(_) = self.dialog {
            return Err(DialogError::AlreadyOpen);
        }
        self.dialog = DialogState::ConfirmingDelete(target);
        Ok(())
    }

    /// Close the dialog and hand back its target for the caller to delete.
    pub fn confirm(&mut self) -> Result<DeleteTarget, DialogError> {
        match std::mem::replace(&mut self.dialog, DialogState::Idle) {
            DialogState::ConfirmingDelete(target) => Ok(target),
            DialogState::Idle => Err(DialogError::NotOpen),
        }
    }

    /// Close the dialog without deleting anything.
    pub fn cancel(&mut self) -> Result<(), DialogError> {
        match std::mem::replace(&mut self.dialog, DialogState::Idle) {
            DialogState::ConfirmingDelete(_) => Ok(()),
            DialogState::Idle => Err(DialogError::NotOpen),
        }
    }

    /// Drop the selection if it points at something that no longer exists.
    pub fn forget_missing(&mut self, exists: impl Fn(&Selection) -> bool) {
        if let Some(sel) = &self.selected
            && !exists(sel)
        {
            self.selected = None;
        }
    }
}
