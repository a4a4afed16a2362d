//! notebook-engine - cell store, execution coordinator, and export
//! format for kernel-backed notebooks.
//!
//! The engine owns the lifecycle of executing ordered cells against a
//! remote kernel session (see the `kernel-session` crate): a caller
//! asks to run one cell or all of them, the coordinator validates
//! session readiness, streams output events into the cell store in
//! arrival order, and commits a terminal status plus the
//! kernel-assigned execution sequence. Rendering the typed outputs is
//! left entirely to a presentation layer.

pub mod coordinator;
pub mod export;
pub mod store;

pub use coordinator::{ExecuteError, ExecutionCoordinator, RunOptions, RunSummary};
pub use export::{KernelDescriptor, NotebookDocument, FORMAT_VERSION};
pub use store::{Cell, CellId, CellKind, CellStatus, CellStore, SharedCellStore};
