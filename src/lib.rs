//! Keeps a hierarchical task tree in sync with a remote task service.
//!
//! Local edits are applied optimistically and rolled back if the server
//! refuses them; Kanban, list, calendar and stats views are derived from
//! the same in-memory tree.

pub mod cli;
pub mod io;
pub mod model;
pub mod ops;
pub mod sync;
pub mod transport;
pub mod util;
