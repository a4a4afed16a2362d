//! Execution coordinator: serializes cell executions against the
//! single kernel session and streams partial results into the store.
//!
//! The coordinator is the mutual-exclusion point for execution: its
//! internal execution lock guarantees at most one cell is in flight.
//! Structural edits and source edits of other cells go straight to
//! the shared store and never block on a running execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::Mutex as TokioMutex;

use kernel_session::session::{SessionError, SessionManager, SessionStatus};
use kernel_session::transport::{KernelTransport, TransportError};
use kernel_session::{ExecuteEvent, Output};

use crate::store::{CellId, CellStatus, SharedCellStore};

/// Error type for coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("cell not found: {0}")]
    CellNotFound(String),

    #[error("cell is not executable: {0}")]
    NotExecutable(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Options for a "run all" batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop submitting cells after the first errored cell. Off by
    /// default: the batch keeps going past failures, and stopping is
    /// an explicit, named choice.
    pub stop_on_error: bool,
}

/// Result of a "run all" batch.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Cells actually submitted to the kernel.
    pub submitted: usize,
    /// Cells that reached a terminal errored status.
    pub errored: usize,
    /// First errored cell, if any.
    pub first_error: Option<CellId>,
    /// True if the batch stopped because `cancel_run` was called.
    pub cancelled: bool,
}

/// Orchestrates execution of cells against one `SessionManager`.
pub struct ExecutionCoordinator<T: KernelTransport> {
    session: Arc<TokioMutex<SessionManager<T>>>,
    store: SharedCellStore,
    /// Held for the full duration of one cell execution.
    exec_lock: Arc<TokioMutex<()>>,
    cancel_requested: Arc<AtomicBool>,
}

impl<T: KernelTransport> Clone for ExecutionCoordinator<T> {
    fn clone(&self) -> Self {
        ExecutionCoordinator {
            session: self.session.clone(),
            store: self.store.clone(),
            exec_lock: self.exec_lock.clone(),
            cancel_requested: self.cancel_requested.clone(),
        }
    }
}

impl<T: KernelTransport> ExecutionCoordinator<T> {
    pub fn new(session: SessionManager<T>, store: SharedCellStore) -> Self {
        ExecutionCoordinator {
            session: Arc::new(TokioMutex::new(session)),
            store,
            exec_lock: Arc::new(TokioMutex::new(())),
            cancel_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> SharedCellStore {
        self.store.clone()
    }

    pub async fn session_status(&self) -> SessionStatus {
        self.session.lock().await.status()
    }

    /// Start the kernel session. See `SessionManager::start_session`.
    pub async fn start_session(&self, kind: &str) -> Result<(), ExecuteError> {
        let mut session = self.session.lock().await;
        session.start_session(kind).await?;
        Ok(())
    }

    /// Send an advisory interrupt for the in-flight execution. No-op
    /// when nothing is running.
    pub async fn interrupt(&self) -> Result<(), ExecuteError> {
        let mut session = self.session.lock().await;
        session.interrupt().await?;
        Ok(())
    }

    /// Restart the session and invalidate every cell's execution
    /// sequence. Outputs are preserved; clearing them stays a
    /// separate, explicit store operation.
    pub async fn restart(&self) -> Result<(), ExecuteError> {
        {
            let mut session = self.session.lock().await;
            session.restart().await?;
        }
        self.store
            .lock()
            .unwrap()
            .clear_execution_sequences();
        Ok(())
    }

    /// Release the session. Idempotent.
    pub async fn teardown(&self) {
        self.session.lock().await.teardown().await;
    }

    /// Execute one cell to its terminal status.
    ///
    /// Fails with `NotReady` before any mutation if the session is not
    /// ready. Otherwise the cell is marked running with cleared
    /// outputs, the source is submitted, and every streamed output is
    /// appended in arrival order. The terminal status is errored iff
    /// any error output was emitted (or the run was interrupted or the
    /// transport died); the execution sequence is kernel-assigned,
    /// never computed locally.
    pub async fn execute_cell(&self, cell_id: &str) -> Result<CellStatus, ExecuteError> {
        let _guard = self.exec_lock.lock().await;

        let source = {
            let store = self.store.lock().unwrap();
            let cell = store
                .get(cell_id)
                .ok_or_else(|| ExecuteError::CellNotFound(cell_id.to_string()))?;
            if !cell.is_code() {
                return Err(ExecuteError::NotExecutable(cell_id.to_string()));
            }
            cell.source.clone()
        };

        let (mut rx, epoch) = {
            let mut session = self.session.lock().await;
            if !session.is_ready() {
                // Precondition failure: no mutation.
                return Err(SessionError::NotReady {
                    status: session.status(),
                }
                .into());
            }

            info!("[coordinator] Executing cell {}", cell_id);
            {
                let mut store = self.store.lock().unwrap();
                store.clear_cell_outputs(cell_id);
                store.update_status(cell_id, CellStatus::Running);
            }

            match session.begin_execution(&source).await {
                Ok(rx) => (rx, session.epoch()),
                Err(e) => {
                    warn!("[coordinator] Submit failed for cell {}: {}", cell_id, e);
                    self.store
                        .lock()
                        .unwrap()
                        .update_status(cell_id, CellStatus::Errored);
                    return Err(e.into());
                }
            }
        };

        let mut saw_error = false;
        let mut terminal = None;
        while let Some(event) = rx.recv().await {
            match event {
                ExecuteEvent::Output(output) => {
                    saw_error |= output.is_error();
                    self.store
                        .lock()
                        .unwrap()
                        .append_output(cell_id, output);
                }
                ExecuteEvent::Completed { execution_sequence } => {
                    terminal = Some(execution_sequence);
                    break;
                }
                ExecuteEvent::Interrupted => {
                    let mut session = self.session.lock().await;
                    session.finish_execution();
                    drop(session);

                    info!("[coordinator] Cell {} interrupted", cell_id);
                    let mut store = self.store.lock().unwrap();
                    store.append_output(
                        cell_id,
                        Output::error(
                            "Interrupted",
                            "execution interrupted before completion",
                            Vec::new(),
                        ),
                    );
                    store.update_status(cell_id, CellStatus::Errored);
                    return Ok(CellStatus::Errored);
                }
            }
        }

        match terminal {
            Some(execution_sequence) => {
                let mut session = self.session.lock().await;
                if session.epoch() != epoch {
                    // A restart superseded this execution; its terminal
                    // event belongs to the dead incarnation.
                    drop(session);
                    return Ok(self.finish_superseded(cell_id));
                }
                session.finish_execution();
                if let Some(sequence) = execution_sequence {
                    session.record_execution_sequence(sequence);
                }
                drop(session);

                let status = if saw_error {
                    CellStatus::Errored
                } else {
                    CellStatus::Completed
                };
                let mut store = self.store.lock().unwrap();
                store.update_status(cell_id, status);
                if let Some(sequence) = execution_sequence {
                    store.set_execution_sequence(cell_id, sequence);
                }
                info!(
                    "[coordinator] Cell {} finished: {:?} (seq {:?})",
                    cell_id, status, execution_sequence
                );
                Ok(status)
            }
            None => {
                let mut session = self.session.lock().await;
                if session.epoch() != epoch {
                    // A restart invalidated this stream; the restarted
                    // session is healthy and must stay untouched.
                    drop(session);
                    return Ok(self.finish_superseded(cell_id));
                }
                // The stream closed without a terminal event: the
                // transport died mid-execution. Outputs already
                // appended stay intact.
                warn!(
                    "[coordinator] Output stream for cell {} ended without a terminal event",
                    cell_id
                );
                session.mark_disconnected();
                drop(session);
                self.store
                    .lock()
                    .unwrap()
                    .update_status(cell_id, CellStatus::Errored);
                Err(SessionError::Connection(TransportError::Closed(
                    "output stream ended without a terminal event".to_string(),
                ))
                .into())
            }
        }
    }

    /// Commit the terminal state of an execution that a session restart
    /// invalidated mid-flight. The cell is errored; the restarted
    /// session keeps its own status.
    fn finish_superseded(&self, cell_id: &str) -> CellStatus {
        info!(
            "[coordinator] Cell {} invalidated by session restart",
            cell_id
        );
        let mut store = self.store.lock().unwrap();
        store.append_output(
            cell_id,
            Output::error(
                "Interrupted",
                "session restarted before completion",
                Vec::new(),
            ),
        );
        store.update_status(cell_id, CellStatus::Errored);
        CellStatus::Errored
    }

    /// Execute every code cell in notebook order, strictly
    /// sequentially: the next cell is not submitted until the previous
    /// one reaches a terminal status.
    ///
    /// By default the batch continues past errored cells; set
    /// `RunOptions::stop_on_error` to halt at the first failure.
    /// Connection errors always abort the batch. Cells deleted while
    /// the batch is in progress are skipped.
    pub async fn run_all(&self, options: RunOptions) -> Result<RunSummary, ExecuteError> {
        self.cancel_requested.store(false, Ordering::SeqCst);

        let cell_ids = {
            self.store
                .lock()
                .unwrap()
                .code_cell_ids()
        };
        info!("[coordinator] Running all: {} code cells", cell_ids.len());

        let mut summary = RunSummary::default();
        for cell_id in cell_ids {
            if self.cancel_requested.load(Ordering::SeqCst) {
                info!("[coordinator] Run all cancelled");
                summary.cancelled = true;
                break;
            }

            match self.execute_cell(&cell_id).await {
                Ok(status) => {
                    summary.submitted += 1;
                    if status == CellStatus::Errored {
                        summary.errored += 1;
                        if summary.first_error.is_none() {
                            summary.first_error = Some(cell_id.clone());
                        }
                        if options.stop_on_error {
                            break;
                        }
                    }
                }
                // Cell deleted while the batch was in progress.
                Err(ExecuteError::CellNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }

    /// Stop a "run all" batch before its next submission. Cells
    /// already completed are untouched, and the in-flight execution
    /// runs to its terminal status (pair with `interrupt` to cut it
    /// short).
    pub fn cancel_run(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }
}
