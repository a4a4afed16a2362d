//! Ordered cell store: the pure, observable state container.
//!
//! Ordering lives solely in the store's sequence; cells never know
//! their own position, and no operation reorders cells as a side
//! effect of anything else. All kernel interaction happens elsewhere
//! (the coordinator); the store only holds state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use kernel_session::Output;

/// Stable cell identifier, assigned at creation and never reused.
pub type CellId = String;

/// Cell kind. Only code cells are executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Code,
    Note,
}

/// Cell execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Idle,
    Running,
    Completed,
    Errored,
}

/// One unit of source text plus its execution state and outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub kind: CellKind,
    pub source: String,
    pub status: CellStatus,
    /// Insertion order equals arrival order; significant.
    pub outputs: Vec<Output>,
    /// Kernel-assigned, monotonically increasing per session. None
    /// until the first successful run or after a session restart.
    pub execution_sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Cell {
    pub(crate) fn new(kind: CellKind) -> Self {
        Cell {
            id: Uuid::new_v4().to_string(),
            kind,
            source: String::new(),
            status: CellStatus::Idle,
            outputs: Vec::new(),
            execution_sequence: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_code(&self) -> bool {
        self.kind == CellKind::Code
    }
}

/// Ordered collection of cells.
#[derive(Debug, Default)]
pub struct CellStore {
    cells: Vec<Cell>,
}

/// Shared store handle: the presentation layer and the coordinator
/// both mutate through this, locking briefly per operation.
pub type SharedCellStore = Arc<StdMutex<CellStore>>;

impl CellStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_cells(cells: Vec<Cell>) -> Self {
        CellStore { cells }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, cell_id: &str) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id == cell_id)
    }

    pub fn index_of(&self, cell_id: &str) -> Option<usize> {
        self.cells.iter().position(|c| c.id == cell_id)
    }

    pub fn get_source(&self, cell_id: &str) -> Option<String> {
        self.get(cell_id).map(|c| c.source.clone())
    }

    /// Ordered ids of every code cell; the "run all" order.
    pub fn code_cell_ids(&self) -> Vec<CellId> {
        self.cells
            .iter()
            .filter(|c| c.is_code())
            .map(|c| c.id.clone())
            .collect()
    }

    /// Insert a new cell at `index` (clamped to the end) and return
    /// its id.
    pub fn insert(&mut self, index: usize, kind: CellKind) -> CellId {
        let cell = Cell::new(kind);
        let id = cell.id.clone();
        let index = index.min(self.cells.len());
        self.cells.insert(index, cell);
        id
    }

    /// Delete a cell. Returns false if the id is unknown.
    pub fn delete(&mut self, cell_id: &str) -> bool {
        match self.index_of(cell_id) {
            Some(idx) => {
                self.cells.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Swap a cell with its predecessor. No-op at the top boundary or
    /// for an unknown id.
    pub fn move_up(&mut self, cell_id: &str) {
        if let Some(idx) = self.index_of(cell_id) {
            if idx > 0 {
                self.cells.swap(idx - 1, idx);
            }
        }
    }

    /// Swap a cell with its successor. No-op at the bottom boundary or
    /// for an unknown id.
    pub fn move_down(&mut self, cell_id: &str) {
        if let Some(idx) = self.index_of(cell_id) {
            if idx + 1 < self.cells.len() {
                self.cells.swap(idx, idx + 1);
            }
        }
    }

    /// Replace a cell's source. Status and outputs are untouched until
    /// the cell is re-run.
    pub fn update_source(&mut self, cell_id: &str, source: &str) {
        if let Some(idx) = self.index_of(cell_id) {
            self.cells[idx].source = source.to_string();
        }
    }

    pub fn update_status(&mut self, cell_id: &str, status: CellStatus) {
        if let Some(idx) = self.index_of(cell_id) {
            self.cells[idx].status = status;
        }
    }

    pub fn append_output(&mut self, cell_id: &str, output: Output) {
        if let Some(idx) = self.index_of(cell_id) {
            self.cells[idx].outputs.push(output);
        }
    }

    pub fn set_execution_sequence(&mut self, cell_id: &str, sequence: u64) {
        if let Some(idx) = self.index_of(cell_id) {
            self.cells[idx].execution_sequence = Some(sequence);
        }
    }

    /// Clear one cell's outputs, returning it to idle. Source is
    /// untouched.
    pub fn clear_cell_outputs(&mut self, cell_id: &str) {
        if let Some(idx) = self.index_of(cell_id) {
            let cell = &mut self.cells[idx];
            cell.outputs.clear();
            cell.status = CellStatus::Idle;
            cell.execution_sequence = None;
        }
    }

    /// Clear every cell's outputs, returning all to idle. Sources are
    /// untouched.
    pub fn clear_all_outputs(&mut self) {
        for cell in &mut self.cells {
            cell.outputs.clear();
            cell.status = CellStatus::Idle;
            cell.execution_sequence = None;
        }
    }

    /// Invalidate every cell's execution sequence after a session
    /// restart. Outputs are preserved; clearing them is a separate,
    /// explicit operation.
    pub fn clear_execution_sequences(&mut self) {
        for cell in &mut self.cells {
            cell.execution_sequence = None;
        }
    }
}
