//! Drag-and-drop restructuring.
//!
//! ```text
//! Idle -> Dragging -> Resolving -> Committed -> Idle
//!            ^            |  \          \
//!            +------------+   \          +--> (rejected) Idle
//!          (left all zones)    +--> (cancel / drop outside) Idle
//! ```
//!
//! Pointer movement only updates the proposed target. Nothing touches the
//! tree until a drop produces a single `DragIntent`; the caller runs it
//! through the mutator and reports back with `finish`.

use serde::Serialize;

use crate::model::step::{BranchKind, DefinitionId, ParentId, StepId};
use crate::model::tree::StepTree;

/// Pointer position in the shell's coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// Half-open: the right and bottom edges belong to the next rect.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.x + self.width && p.y >= self.y && p.y < self.y + self.height
    }
}

/// Where a drop would place the dragged step, in rendered-tree terms
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropTarget {
    pub parent: ParentId,
    pub branch: BranchKind,
    /// Index among the siblings as rendered (source included)
    pub position: usize,
}

/// A rendered drop area
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropZone {
    pub rect: Rect,
    pub target: DropTarget,
}

/// What is being dragged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DragSource {
    /// An existing step (moved with its subtree)
    Step(StepId),
    /// A definition from the palette, not yet placed
    Palette(DefinitionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    EscapeKey,
    PointerCaptureLost,
    /// Released outside every drop zone
    OutsideDropZone,
    /// The mutator refused the resolved intent
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DragEvent {
    PointerDown {
        pointer_id: u32,
        source: DragSource,
        at: Point,
    },
    PointerMove {
        pointer_id: u32,
        at: Point,
    },
    PointerUp {
        pointer_id: u32,
        at: Point,
    },
    Cancel {
        reason: CancelReason,
    },
}

/// The single intent a drop resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DragIntent {
    Move {
        step: StepId,
        parent: ParentId,
        branch: BranchKind,
        position: usize,
    },
    Insert {
        definition: DefinitionId,
        parent: ParentId,
        branch: BranchKind,
        position: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DragState {
    Idle,
    Dragging {
        pointer_id: u32,
        source: DragSource,
        /// Tree as it was when the drag began; used to restore the preview
        origin: StepTree,
    },
    Resolving {
        pointer_id: u32,
        source: DragSource,
        origin: StepTree,
        candidate: DropTarget,
    },
    /// Dropped; waiting for the mutator's verdict
    Committed { intent: DragIntent },
}

/// Why an event was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DragNoopReason {
    IdleWithoutActiveDrag,
    DragAlreadyActive,
    PointerMismatch,
    UnknownSource,
    AwaitingVerdict,
}

/// Outcome of one event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum DragEffect {
    Started { source: DragSource },
    /// Proposed target changed (`None` when the pointer left every zone)
    Previewed { candidate: Option<DropTarget> },
    Committed { intent: DragIntent },
    Accepted,
    Cancelled { reason: CancelReason },
    Noop { reason: DragNoopReason },
}

/// State machine turning pointer events into one resolved intent.
#[derive(Debug, Clone)]
pub struct DragCoordinator {
    state: DragState,
    zones: Vec<DropZone>,
}

impl Default for DragCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl DragCoordinator {
    pub fn new() -> Self {
        DragCoordinator {
            state: DragState::Idle,
            zones: Vec::new(),
        }
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    /// Whether a drag session is in progress (including one awaiting a verdict)
    pub fn is_active(&self) -> bool {
        !matches!(self.state, DragState::Idle)
    }

    /// Proposed target for the visual preview
    pub fn candidate(&self) -> Option<&DropTarget> {
        match &self.state {
            DragState::Resolving { candidate, .. } => Some(candidate),
            _ => None,
        }
    }

    /// Replace the hit-test zones. Later zones sit on top of earlier ones.
    pub fn set_drop_zones(&mut self, zones: Vec<DropZone>) {
        self.zones = zones;
    }

    fn hit_test(&self, at: Point) -> Option<&DropTarget> {
        self.zones
            .iter()
            .rev()
            .find(|z| z.rect.contains(at))
            .map(|z| &z.target)
    }

    /// Apply one pointer event. `tree` is the tree currently rendered.
    pub fn apply_event(&mut self, event: DragEvent, tree: &StepTree) -> DragEffect {
        let state = std::mem::replace(&mut self.state, DragState::Idle);
        let (next, effect) = self.transition(state, event, tree);
        self.state = next;
        if let DragEffect::Cancelled { reason } = &effect {
            tracing::debug!(?reason, "drag cancelled");
        }
        effect
    }

    fn transition(
        &self,
        state: DragState,
        event: DragEvent,
        tree: &StepTree,
    ) -> (DragState, DragEffect) {
        match (state, event) {
            (
                DragState::Idle,
                DragEvent::PointerDown {
                    pointer_id, source, ..
                },
            ) => {
                if let DragSource::Step(id) = &source
                    && !tree.contains(id)
                {
                    return (DragState::Idle, noop(DragNoopReason::UnknownSource));
                }
                (
                    DragState::Dragging {
                        pointer_id,
                        source: source.clone(),
                        origin: tree.clone(),
                    },
                    DragEffect::Started { source },
                )
            }
            (DragState::Idle, _) => (DragState::Idle, noop(DragNoopReason::IdleWithoutActiveDrag)),

            (state @ DragState::Committed { .. }, _) => {
                (state, noop(DragNoopReason::AwaitingVerdict))
            }

            (state, DragEvent::PointerDown { .. }) => {
                (state, noop(DragNoopReason::DragAlreadyActive))
            }

            (_, DragEvent::Cancel { reason }) => (DragState::Idle, DragEffect::Cancelled { reason }),

            (
                DragState::Dragging {
                    pointer_id,
                    source,
                    origin,
                }
                | DragState::Resolving {
                    pointer_id,
                    source,
                    origin,
                    ..
                },
                DragEvent::PointerMove {
                    pointer_id: incoming,
                    at,
                },
            ) if incoming == pointer_id => {
                let candidate = self.hit_test(at).cloned();
                let next = match &candidate {
                    Some(c) => DragState::Resolving {
                        pointer_id,
                        source,
                        origin,
                        candidate: c.clone(),
                    },
                    None => DragState::Dragging {
                        pointer_id,
                        source,
                        origin,
                    },
                };
                (next, DragEffect::Previewed { candidate })
            }

            (
                DragState::Dragging {
                    pointer_id,
                    source,
                    origin,
                }
                | DragState::Resolving {
                    pointer_id,
                    source,
                    origin,
                    ..
                },
                DragEvent::PointerUp {
                    pointer_id: incoming,
                    at,
                },
            ) if incoming == pointer_id => match self.hit_test(at) {
                None => (
                    DragState::Idle,
                    DragEffect::Cancelled {
                        reason: CancelReason::OutsideDropZone,
                    },
                ),
                Some(target) => {
                    let intent = resolve_intent(&source, target, &origin);
                    tracing::debug!(?intent, "drop resolved");
                    (
                        DragState::Committed {
                            intent: intent.clone(),
                        },
                        DragEffect::Committed { intent },
                    )
                }
            },

            (state, _) => (state, noop(DragNoopReason::PointerMismatch)),
        }
    }

    /// Report the mutator's verdict on a committed drop. A rejected intent
    /// leaves the tree untouched and the drag ends cancelled.
    pub fn finish(&mut self, accepted: bool) -> DragEffect {
        match self.state {
            DragState::Committed { .. } => {
                self.state = DragState::Idle;
                if accepted {
                    DragEffect::Accepted
                } else {
                    tracing::debug!("drop rejected by mutator");
                    DragEffect::Cancelled {
                        reason: CancelReason::Rejected,
                    }
                }
            }
            DragState::Idle => noop(DragNoopReason::IdleWithoutActiveDrag),
            _ => noop(DragNoopReason::DragAlreadyActive),
        }
    }
}

fn noop(reason: DragNoopReason) -> DragEffect {
    DragEffect::Noop { reason }
}

/// Translate a rendered drop position into a post-removal index. Zones are
/// laid out around the source, so dropping a step below itself in its own
/// group lands one slot earlier once it has been taken out.
fn resolve_intent(source: &DragSource, target: &DropTarget, origin: &StepTree) -> DragIntent {
    match source {
        DragSource::Palette(definition) => DragIntent::Insert {
            definition: definition.clone(),
            parent: target.parent.clone(),
            branch: target.branch,
            position: target.position,
        },
        DragSource::Step(step) => {
            let same_group = origin
                .get(step)
                .filter(|r| r.parent == target.parent && r.branch == target.branch);
            let position = match same_group {
                Some(r) if r.position < target.position => target.position - 1,
                _ => target.position,
            };
            DragIntent::Move {
                step: step.clone(),
                parent: target.parent.clone(),
                branch: target.branch,
                position,
            }
        }
    }
}
