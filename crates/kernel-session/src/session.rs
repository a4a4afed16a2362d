//! Session lifecycle against the remote execution kernel.
//!
//! `SessionManager` owns exactly one logical session and translates
//! transport events into a small state machine:
//!
//! ```text
//! disconnected → connecting → idle ⇄ busy
//! ```
//!
//! `restarting` is reachable from any connected state and returns to
//! idle; `disconnected` is reachable from any state on fatal transport
//! failure. Transport failures are never retried here; retry policy
//! belongs to the caller.

use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::protocol::ExecuteEvent;
use crate::transport::{KernelTransport, SessionConfig, SessionId, TransportError};

/// How long to wait for an interrupt or restart acknowledgement before
/// treating the request as failed.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session, or the last one died.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected and ready for an execution.
    Idle,
    /// Connected with an execution in flight.
    Busy,
    /// Tearing down and re-establishing the underlying session.
    Restarting,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Disconnected => write!(f, "disconnected"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Busy => write!(f, "busy"),
            SessionStatus::Restarting => write!(f, "restarting"),
        }
    }
}

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport or authentication failure. Fatal to the session:
    /// status is forced to disconnected and recovery requires an
    /// explicit `start_session` or `restart`.
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    /// `start_session` was called while a session is active.
    #[error("a session is already active")]
    AlreadyActive,

    /// Local precondition violation; recoverable. Callers should
    /// retry after observing idle.
    #[error("session is not ready (status: {status})")]
    NotReady { status: SessionStatus },

    /// The kernel did not acknowledge an interrupt within the bounded
    /// wait. Advisory; callers decide whether to escalate to restart.
    #[error("timed out waiting for interrupt acknowledgement")]
    InterruptTimeout,
}

/// Owns the single logical session with the remote kernel.
pub struct SessionManager<T: KernelTransport> {
    transport: T,
    config: SessionConfig,
    session_id: Option<SessionId>,
    status: SessionStatus,
    /// Last kernel-assigned execution sequence observed this session.
    last_execution_sequence: Option<u64>,
    /// Bumped every time the underlying session is (re)established.
    /// Lets callers detect that a restart invalidated their in-flight
    /// execution stream.
    epoch: u64,
    ack_timeout: Duration,
}

impl<T: KernelTransport> SessionManager<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        SessionManager {
            transport,
            config,
            session_id: None,
            status: SessionStatus::Disconnected,
            last_execution_sequence: None,
            epoch: 0,
            ack_timeout: ACK_TIMEOUT,
        }
    }

    /// Override the bounded wait applied to interrupt/restart
    /// acknowledgements.
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn last_execution_sequence(&self) -> Option<u64> {
        self.last_execution_sequence
    }

    /// Incarnation of the underlying session. An execution stream
    /// obtained under an older epoch was invalidated by a restart; its
    /// closure is not a transport failure.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Pure readiness predicate: true only in idle or busy. Used as a
    /// precondition gate by the execution coordinator.
    pub fn is_ready(&self) -> bool {
        matches!(self.status, SessionStatus::Idle | SessionStatus::Busy)
    }

    /// Start a session for the given kernel kind.
    ///
    /// Fails with `AlreadyActive` if a session is live. On transport
    /// failure the status is forced to disconnected and the underlying
    /// cause (timeout, auth rejection, refusal) is surfaced.
    pub async fn start_session(&mut self, kind: &str) -> Result<(), SessionError> {
        if self.session_id.is_some() && self.status != SessionStatus::Disconnected {
            return Err(SessionError::AlreadyActive);
        }

        self.status = SessionStatus::Connecting;
        info!("[session] Starting {} session", kind);

        match self.transport.start(kind, &self.config).await {
            Ok(session_id) => {
                info!("[session] Session started: {}", session_id);
                self.session_id = Some(session_id);
                self.status = SessionStatus::Idle;
                self.last_execution_sequence = None;
                self.epoch += 1;
                Ok(())
            }
            Err(e) => {
                warn!("[session] Failed to start session: {}", e);
                self.session_id = None;
                self.status = SessionStatus::Disconnected;
                Err(SessionError::Connection(e))
            }
        }
    }

    /// Submit source for execution and transition to busy.
    ///
    /// The returned receiver yields the execution's output events in
    /// arrival order. The caller must drain it to a terminal event and
    /// then call `finish_execution`.
    pub async fn begin_execution(
        &mut self,
        source: &str,
    ) -> Result<mpsc::Receiver<ExecuteEvent>, SessionError> {
        if self.status != SessionStatus::Idle {
            return Err(SessionError::NotReady {
                status: self.status,
            });
        }
        let session_id = match &self.session_id {
            Some(id) => id.clone(),
            None => {
                return Err(SessionError::NotReady {
                    status: self.status,
                })
            }
        };

        match self.transport.execute(&session_id, source).await {
            Ok(rx) => {
                self.status = SessionStatus::Busy;
                Ok(rx)
            }
            Err(e) => {
                warn!("[session] Submit failed: {}", e);
                self.status = SessionStatus::Disconnected;
                Err(SessionError::Connection(e))
            }
        }
    }

    /// Mark the in-flight execution as finished, returning to idle.
    pub fn finish_execution(&mut self) {
        if self.status == SessionStatus::Busy {
            self.status = SessionStatus::Idle;
        }
    }

    /// Record the kernel-assigned sequence from a completed execution.
    pub fn record_execution_sequence(&mut self, sequence: u64) {
        self.last_execution_sequence = Some(sequence);
    }

    /// Force the session into disconnected after a mid-stream
    /// transport failure observed by the caller.
    pub fn mark_disconnected(&mut self) {
        if self.status != SessionStatus::Disconnected {
            warn!("[session] Marking session disconnected");
            self.status = SessionStatus::Disconnected;
        }
    }

    /// Send an out-of-band interrupt for the in-flight execution.
    ///
    /// A no-op unless the session is busy. Best effort and
    /// asynchronous: an acknowledged interrupt does not mean the
    /// execution stopped; the caller must still wait for the
    /// execution's terminal event.
    pub async fn interrupt(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Busy {
            return Ok(());
        }
        let session_id = match &self.session_id {
            Some(id) => id.clone(),
            None => return Ok(()),
        };

        info!("[session] Sending interrupt");
        match timeout(self.ack_timeout, self.transport.interrupt(&session_id)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("[session] Interrupt failed: {}", e);
                self.status = SessionStatus::Disconnected;
                Err(SessionError::Connection(e))
            }
            Err(_) => Err(SessionError::InterruptTimeout),
        }
    }

    /// Tear down and re-establish the underlying session.
    ///
    /// Valid from any connected state. Resets the kernel-owned
    /// execution counter tracking; callers decide separately whether
    /// to clear cell outputs. Fails closed: if the teardown/reconnect
    /// sequence fails, status is forced to disconnected rather than
    /// left ambiguous.
    pub async fn restart(&mut self) -> Result<(), SessionError> {
        if !matches!(
            self.status,
            SessionStatus::Idle | SessionStatus::Busy | SessionStatus::Restarting
        ) {
            return Err(SessionError::NotReady {
                status: self.status,
            });
        }
        let session_id = match &self.session_id {
            Some(id) => id.clone(),
            None => {
                return Err(SessionError::NotReady {
                    status: self.status,
                })
            }
        };

        self.status = SessionStatus::Restarting;
        info!("[session] Restarting session {}", session_id);

        match timeout(self.ack_timeout, self.transport.restart(&session_id)).await {
            Ok(Ok(())) => {
                self.status = SessionStatus::Idle;
                self.last_execution_sequence = None;
                self.epoch += 1;
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("[session] Restart failed: {}", e);
                self.status = SessionStatus::Disconnected;
                Err(SessionError::Connection(e))
            }
            Err(_) => {
                warn!("[session] Restart acknowledgement timed out");
                self.status = SessionStatus::Disconnected;
                Err(SessionError::Connection(TransportError::Timeout))
            }
        }
    }

    /// Release the session. Idempotent; shutdown failures are logged,
    /// not surfaced, since the session is gone either way.
    pub async fn teardown(&mut self) {
        if let Some(session_id) = self.session_id.take() {
            info!("[session] Tearing down session {}", session_id);
            if let Err(e) = self.transport.shutdown(&session_id).await {
                warn!("[session] Shutdown failed: {}", e);
            }
        }
        self.status = SessionStatus::Disconnected;
        self.last_execution_sequence = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Output;
    use crate::scripted::{Script, ScriptedTransport};

    fn manager() -> (SessionManager<ScriptedTransport>, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let handle = transport.clone();
        let manager = SessionManager::new(transport, SessionConfig::new("local"));
        (manager, handle)
    }

    #[tokio::test]
    async fn test_start_session_transitions_to_idle() {
        let (mut manager, _) = manager();
        assert_eq!(manager.status(), SessionStatus::Disconnected);
        assert!(!manager.is_ready());

        manager.start_session("python").await.unwrap();

        assert_eq!(manager.status(), SessionStatus::Idle);
        assert!(manager.is_ready());
        assert!(manager.session_id().is_some());
    }

    #[tokio::test]
    async fn test_start_session_twice_fails() {
        let (mut manager, _) = manager();
        manager.start_session("python").await.unwrap();

        let result = manager.start_session("python").await;
        assert!(matches!(result, Err(SessionError::AlreadyActive)));
        // The live session is untouched
        assert_eq!(manager.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_start_session_failure_disconnects_with_cause() {
        let (mut manager, handle) = manager();
        handle.fail_next_start(TransportError::AuthRejected);

        let result = manager.start_session("python").await;

        assert!(matches!(
            result,
            Err(SessionError::Connection(TransportError::AuthRejected))
        ));
        assert_eq!(manager.status(), SessionStatus::Disconnected);
        assert!(manager.session_id().is_none());
    }

    #[tokio::test]
    async fn test_begin_execution_requires_idle() {
        let (mut manager, handle) = manager();

        let result = manager.begin_execution("x = 1").await;
        assert!(matches!(result, Err(SessionError::NotReady { .. })));
        assert!(handle.executions().is_empty());
    }

    #[tokio::test]
    async fn test_begin_and_finish_execution_toggle_busy() {
        let (mut manager, handle) = manager();
        manager.start_session("python").await.unwrap();
        handle.enqueue(Script::success(vec![Output::stdout("hi")]));

        let mut rx = manager.begin_execution("print('hi')").await.unwrap();
        assert_eq!(manager.status(), SessionStatus::Busy);
        assert!(manager.is_ready());

        while rx.recv().await.is_some() {}
        manager.finish_execution();
        assert_eq!(manager.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_begin_execution_while_busy_is_refused() {
        let (mut manager, handle) = manager();
        manager.start_session("python").await.unwrap();
        handle.enqueue_manual();
        let _rx = manager.begin_execution("first").await.unwrap();

        let result = manager.begin_execution("second").await;
        assert!(matches!(result, Err(SessionError::NotReady { .. })));
        assert_eq!(handle.executions(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_submit_failure_disconnects() {
        let (mut manager, handle) = manager();
        manager.start_session("python").await.unwrap();
        handle.enqueue_submit_failure(TransportError::Closed("gone".to_string()));

        let result = manager.begin_execution("x").await;

        assert!(matches!(result, Err(SessionError::Connection(_))));
        assert_eq!(manager.status(), SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_interrupt_when_not_busy_is_noop() {
        let (mut manager, handle) = manager();
        manager.start_session("python").await.unwrap();

        manager.interrupt().await.unwrap();

        assert_eq!(handle.interrupts(), 0);
        assert_eq!(manager.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_interrupt_while_busy_sends_signal() {
        let (mut manager, handle) = manager();
        manager.start_session("python").await.unwrap();
        handle.enqueue_manual();
        let _rx = manager.begin_execution("while True: pass").await.unwrap();

        manager.interrupt().await.unwrap();

        assert_eq!(handle.interrupts(), 1);
        // Interrupt is advisory; the session stays busy until the
        // execution's terminal event arrives.
        assert_eq!(manager.status(), SessionStatus::Busy);
    }

    #[tokio::test]
    async fn test_interrupt_transport_failure_disconnects() {
        let (mut manager, handle) = manager();
        manager.start_session("python").await.unwrap();
        handle.enqueue_manual();
        let _rx = manager.begin_execution("x").await.unwrap();
        handle.fail_next_interrupt(TransportError::Closed("gone".to_string()));

        let result = manager.interrupt().await;

        assert!(matches!(result, Err(SessionError::Connection(_))));
        assert_eq!(manager.status(), SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_interrupt_ack_timeout_is_surfaced() {
        let (manager, handle) = manager();
        let mut manager = manager.with_ack_timeout(Duration::from_millis(20));
        manager.start_session("python").await.unwrap();
        handle.enqueue_manual();
        let _rx = manager.begin_execution("while True: pass").await.unwrap();
        handle.hang_next_interrupt();

        let result = manager.interrupt().await;

        assert!(matches!(result, Err(SessionError::InterruptTimeout)));
        // The timeout is advisory: the execution is still in flight
        // and the session is not torn down.
        assert_eq!(manager.status(), SessionStatus::Busy);
        assert_eq!(handle.interrupts(), 0);
    }

    #[tokio::test]
    async fn test_restart_ack_timeout_fails_closed() {
        let (manager, handle) = manager();
        let mut manager = manager.with_ack_timeout(Duration::from_millis(20));
        manager.start_session("python").await.unwrap();
        handle.hang_next_restart();

        let result = manager.restart().await;

        assert!(matches!(
            result,
            Err(SessionError::Connection(TransportError::Timeout))
        ));
        assert_eq!(manager.status(), SessionStatus::Disconnected);
        assert_eq!(handle.restarts(), 0);
    }

    #[tokio::test]
    async fn test_restart_resets_sequence_tracking() {
        let (mut manager, handle) = manager();
        manager.start_session("python").await.unwrap();
        manager.record_execution_sequence(5);
        assert_eq!(manager.last_execution_sequence(), Some(5));

        manager.restart().await.unwrap();

        assert_eq!(manager.status(), SessionStatus::Idle);
        assert_eq!(manager.last_execution_sequence(), None);
        assert_eq!(handle.restarts(), 1);
    }

    #[tokio::test]
    async fn test_restart_bumps_epoch() {
        let (mut manager, _) = manager();
        manager.start_session("python").await.unwrap();
        let before = manager.epoch();

        manager.restart().await.unwrap();

        // Streams obtained under the old epoch are now invalidated
        assert!(manager.epoch() > before);
    }

    #[tokio::test]
    async fn test_restart_requires_connected_state() {
        let (mut manager, handle) = manager();

        let result = manager.restart().await;

        assert!(matches!(result, Err(SessionError::NotReady { .. })));
        assert_eq!(handle.restarts(), 0);
    }

    #[tokio::test]
    async fn test_restart_fails_closed() {
        let (mut manager, handle) = manager();
        manager.start_session("python").await.unwrap();
        handle.fail_next_restart(TransportError::Refused("kernel died".to_string()));

        let result = manager.restart().await;

        assert!(matches!(result, Err(SessionError::Connection(_))));
        assert_eq!(manager.status(), SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (mut manager, handle) = manager();
        manager.start_session("python").await.unwrap();

        manager.teardown().await;
        manager.teardown().await;

        assert_eq!(handle.shutdowns(), 1);
        assert_eq!(manager.status(), SessionStatus::Disconnected);
        assert!(manager.session_id().is_none());
    }

    #[tokio::test]
    async fn test_mark_disconnected_invalidates_readiness() {
        let (mut manager, _) = manager();
        manager.start_session("python").await.unwrap();

        manager.mark_disconnected();

        assert!(!manager.is_ready());
        assert_eq!(manager.status(), SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_restart_after_disconnect_requires_start_session() {
        let (mut manager, _) = manager();
        manager.start_session("python").await.unwrap();
        manager.mark_disconnected();

        assert!(matches!(
            manager.restart().await,
            Err(SessionError::NotReady { .. })
        ));

        // start_session is the recovery path after a fatal failure
        manager.start_session("python").await.unwrap();
        assert_eq!(manager.status(), SessionStatus::Idle);
    }
}
