//! Editing core for automation workflows: a trigger followed by a tree of
//! action steps with typed branches.
//!
//! - [`model`]: steps, the [`model::StepTree`], workflows and the definition catalog
//! - [`ops`]: tree mutations and invariant checks
//! - [`editor`]: commands and undo, drag-and-drop, selection and the
//!   optimistic [`editor::SyncBridge`], tied together by [`editor::EditorSession`]
//! - [`io`]: configuration files and the persistence contract
//! - [`cli`]: the `flowedit` command line

pub mod cli;
pub mod editor;
pub mod io;
pub mod model;
pub mod ops;
