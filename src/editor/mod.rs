pub mod command;
pub mod drag;
pub mod selection;
pub mod session;
pub mod sync;

pub use command::{Command, Intent, UndoStack};
pub use drag::{DragCoordinator, DragEffect, DragEvent, DragIntent, DropTarget, DropZone};
pub use selection::{DialogState, Selection, SelectionState};
pub use session::{EditorError, EditorSession, Level, Notification, StepDraft};
pub use sync::{Outgoing, PersistRequest, PersistResponse, SyncBridge, Ticket};
