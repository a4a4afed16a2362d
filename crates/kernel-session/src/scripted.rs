//! Scripted in-memory transport for tests and embedders.
//!
//! Each call to `execute` consumes the next planned response: a fully
//! scripted stream of outputs with a terminal outcome, a manual stream
//! the caller drives through `live_sender`, or a submission failure.
//! The transport is cheaply cloneable; clones share state, so a test
//! can keep a handle for inspection while the session manager owns
//! the other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{ExecuteEvent, Output};
use crate::transport::{KernelTransport, SessionConfig, SessionId, TransportError};

/// Terminal outcome of one scripted execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The kernel counted the run: `Completed` with the next sequence value.
    Success,
    /// The kernel finished without counting the run; the scripted
    /// error outputs carry the failure.
    Failure,
    /// An interrupt won the race: terminal `Interrupted` event.
    Interrupted,
    /// The transport dies mid-stream: the channel closes without a
    /// terminal event.
    Dropped,
}

/// One scripted execution: outputs streamed in order, then the outcome.
#[derive(Debug, Clone)]
pub struct Script {
    pub outputs: Vec<Output>,
    pub outcome: Outcome,
}

impl Script {
    pub fn success(outputs: Vec<Output>) -> Self {
        Script {
            outputs,
            outcome: Outcome::Success,
        }
    }

    pub fn failure(outputs: Vec<Output>) -> Self {
        Script {
            outputs,
            outcome: Outcome::Failure,
        }
    }

    pub fn interrupted(outputs: Vec<Output>) -> Self {
        Script {
            outputs,
            outcome: Outcome::Interrupted,
        }
    }

    pub fn dropped(outputs: Vec<Output>) -> Self {
        Script {
            outputs,
            outcome: Outcome::Dropped,
        }
    }
}

#[derive(Debug)]
enum Planned {
    Scripted(Script),
    /// Hand the sender to the inspection handle; the test drives the stream.
    Manual,
    /// Fail the `execute` call itself.
    FailSubmit(TransportError),
}

#[derive(Default)]
struct Inner {
    planned: VecDeque<Planned>,
    /// Submitted sources, in submission order.
    executions: Vec<String>,
    interrupts: usize,
    restarts: usize,
    shutdowns: usize,
    /// Kernel-owned execution counter; reset by restart.
    execution_counter: u64,
    /// Sender for the current manual stream.
    live: Option<mpsc::Sender<ExecuteEvent>>,
    fail_start: Option<TransportError>,
    fail_interrupt: Option<TransportError>,
    fail_restart: Option<TransportError>,
    hang_interrupt: bool,
    hang_restart: bool,
}

/// In-memory `KernelTransport` backed by a script queue.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<StdMutex<Inner>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scripted response for the next `execute` call.
    pub fn enqueue(&self, script: Script) {
        self.inner
            .lock()
            .unwrap()
            .planned
            .push_back(Planned::Scripted(script));
    }

    /// Queue a manual stream: the test sends events via `live_sender`.
    pub fn enqueue_manual(&self) {
        self.inner.lock().unwrap().planned.push_back(Planned::Manual);
    }

    /// Queue a submission failure for the next `execute` call.
    pub fn enqueue_submit_failure(&self, err: TransportError) {
        self.inner
            .lock()
            .unwrap()
            .planned
            .push_back(Planned::FailSubmit(err));
    }

    /// Fail the next `start` call.
    pub fn fail_next_start(&self, err: TransportError) {
        self.inner.lock().unwrap().fail_start = Some(err);
    }

    /// Fail the next `interrupt` call.
    pub fn fail_next_interrupt(&self, err: TransportError) {
        self.inner.lock().unwrap().fail_interrupt = Some(err);
    }

    /// Fail the next `restart` call.
    pub fn fail_next_restart(&self, err: TransportError) {
        self.inner.lock().unwrap().fail_restart = Some(err);
    }

    /// Make the next `interrupt` call never resolve, for exercising
    /// acknowledgement timeouts.
    pub fn hang_next_interrupt(&self) {
        self.inner.lock().unwrap().hang_interrupt = true;
    }

    /// Make the next `restart` call never resolve.
    pub fn hang_next_restart(&self) {
        self.inner.lock().unwrap().hang_restart = true;
    }

    /// Sender for the current manual stream, if one is live.
    pub fn live_sender(&self) -> Option<mpsc::Sender<ExecuteEvent>> {
        self.inner.lock().unwrap().live.clone()
    }

    /// Close the current manual stream without a terminal event.
    pub fn drop_live_stream(&self) {
        self.inner.lock().unwrap().live = None;
    }

    /// Sources submitted so far, in order.
    pub fn executions(&self) -> Vec<String> {
        self.inner.lock().unwrap().executions.clone()
    }

    pub fn interrupts(&self) -> usize {
        self.inner.lock().unwrap().interrupts
    }

    pub fn restarts(&self) -> usize {
        self.inner.lock().unwrap().restarts
    }

    pub fn shutdowns(&self) -> usize {
        self.inner.lock().unwrap().shutdowns
    }
}

#[async_trait]
impl KernelTransport for ScriptedTransport {
    async fn start(
        &mut self,
        _kind: &str,
        _config: &SessionConfig,
    ) -> Result<SessionId, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.fail_start.take() {
            return Err(err);
        }
        Ok(format!("scripted-{}", Uuid::new_v4()))
    }

    async fn execute(
        &mut self,
        _session_id: &SessionId,
        source: &str,
    ) -> Result<mpsc::Receiver<ExecuteEvent>, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Unscripted executions complete cleanly with no outputs.
        let planned = inner
            .planned
            .pop_front()
            .unwrap_or(Planned::Scripted(Script::success(Vec::new())));

        match planned {
            Planned::FailSubmit(err) => Err(err),
            Planned::Scripted(script) => {
                inner.executions.push(source.to_string());
                // Capacity covers every event plus the terminal, so the
                // whole stream is buffered without awaiting.
                let (tx, rx) = mpsc::channel(script.outputs.len() + 1);
                for output in script.outputs {
                    let _ = tx.try_send(ExecuteEvent::Output(output));
                }
                match script.outcome {
                    Outcome::Success => {
                        inner.execution_counter += 1;
                        let _ = tx.try_send(ExecuteEvent::Completed {
                            execution_sequence: Some(inner.execution_counter),
                        });
                    }
                    Outcome::Failure => {
                        let _ = tx.try_send(ExecuteEvent::Completed {
                            execution_sequence: None,
                        });
                    }
                    Outcome::Interrupted => {
                        let _ = tx.try_send(ExecuteEvent::Interrupted);
                    }
                    Outcome::Dropped => {}
                }
                Ok(rx)
            }
            Planned::Manual => {
                inner.executions.push(source.to_string());
                let (tx, rx) = mpsc::channel(64);
                inner.live = Some(tx);
                Ok(rx)
            }
        }
    }

    async fn interrupt(&mut self, _session_id: &SessionId) -> Result<(), TransportError> {
        let hang = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(err) = inner.fail_interrupt.take() {
                return Err(err);
            }
            std::mem::take(&mut inner.hang_interrupt)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        self.inner.lock().unwrap().interrupts += 1;
        Ok(())
    }

    async fn restart(&mut self, _session_id: &SessionId) -> Result<(), TransportError> {
        let hang = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(err) = inner.fail_restart.take() {
                return Err(err);
            }
            std::mem::take(&mut inner.hang_restart)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.restarts += 1;
        inner.execution_counter = 0;
        // Restart invalidates any in-flight stream.
        inner.live = None;
        Ok(())
    }

    async fn shutdown(&mut self, _session_id: &SessionId) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.shutdowns += 1;
        inner.live = None;
        Ok(())
    }
}
