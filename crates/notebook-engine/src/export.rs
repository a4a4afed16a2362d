//! Notebook export format: an ordered document consumed by external
//! tooling.
//!
//! Source text is stored as an ordered list of lines (each keeping its
//! trailing newline) so diffs stay line-oriented. Export → import
//! reproduces an identical ordered cell sequence with identical
//! source and outputs; execution sequences are preserved as
//! historical record but never re-validated against a live session.
//! Cell status is runtime state, not part of the document: imported
//! cells start idle.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use kernel_session::Output;

use crate::store::{Cell, CellKind, CellStatus, CellStore};

/// Current document format version.
pub const FORMAT_VERSION: u32 = 1;

/// Error type for import operations.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("failed to parse document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Which kernel this notebook targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelDescriptor {
    /// Kernel kind passed to `start_session` (e.g. "python").
    pub kind: String,
    /// Human-readable name for pickers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl KernelDescriptor {
    pub fn new(kind: impl Into<String>) -> Self {
        KernelDescriptor {
            kind: kind.into(),
            display_name: None,
        }
    }
}

/// One cell in the exported document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentCell {
    pub id: String,
    #[serde(rename = "cell_type")]
    pub kind: CellKind,
    /// Source as ordered lines, each with its trailing newline.
    pub source: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// The exported notebook document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookDocument {
    pub format_version: u32,
    pub kernel: KernelDescriptor,
    pub cells: Vec<DocumentCell>,
}

/// Split a source string into lines that keep their newlines, so
/// joining them reproduces the source exactly.
fn source_to_lines(source: &str) -> Vec<String> {
    if source.is_empty() {
        return Vec::new();
    }
    source.split_inclusive('\n').map(|s| s.to_string()).collect()
}

/// Export the store's cells, in order, into a document.
pub fn export(store: &CellStore, kernel: KernelDescriptor) -> NotebookDocument {
    let cells = store
        .cells()
        .iter()
        .map(|cell| DocumentCell {
            id: cell.id.clone(),
            kind: cell.kind,
            source: source_to_lines(&cell.source),
            outputs: cell.outputs.clone(),
            execution_sequence: cell.execution_sequence,
            metadata: cell.metadata.clone(),
        })
        .collect();

    NotebookDocument {
        format_version: FORMAT_VERSION,
        kernel,
        cells,
    }
}

/// Rebuild a cell store from a document. Cell ids are preserved so
/// references stay stable across save/load.
pub fn import(document: &NotebookDocument) -> Result<CellStore, ImportError> {
    if document.format_version > FORMAT_VERSION {
        return Err(ImportError::UnsupportedVersion(document.format_version));
    }

    let cells = document
        .cells
        .iter()
        .map(|doc_cell| Cell {
            id: doc_cell.id.clone(),
            kind: doc_cell.kind,
            source: doc_cell.source.join(""),
            status: CellStatus::Idle,
            outputs: doc_cell.outputs.clone(),
            execution_sequence: doc_cell.execution_sequence,
            metadata: doc_cell.metadata.clone(),
        })
        .collect();

    Ok(CellStore::from_cells(cells))
}

/// Serialize a document to pretty JSON.
pub fn to_json(document: &NotebookDocument) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(document)
}

/// Parse a document from JSON.
pub fn from_json(json: &str) -> Result<NotebookDocument, ImportError> {
    let document: NotebookDocument = serde_json::from_str(json)?;
    if document.format_version > FORMAT_VERSION {
        return Err(ImportError::UnsupportedVersion(document.format_version));
    }
    Ok(document)
}
