//! Transport seam between the session manager and a kernel service.
//!
//! A `KernelTransport` hides how requests reach the kernel (socket,
//! HTTP, in-process). Execution output comes back as a single ordered
//! channel of tagged events; the channel closing after a terminal
//! event signals completion.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::ExecuteEvent;

/// Identifier of a live kernel session, assigned by the service.
pub type SessionId = String;

/// Connection settings supplied by the embedding layer.
///
/// The credential token is forwarded to the connection attempt and
/// never persisted or logged by this crate; `Debug` redacts it.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Connection target (host, URL, or socket path depending on the
    /// transport implementation).
    pub target: String,
    /// Optional credential token.
    pub token: Option<String>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("target", &self.target)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SessionConfig {
    pub fn new(target: impl Into<String>) -> Self {
        SessionConfig {
            target: target.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Transport-level failure. Fatal to the session; the session manager
/// transitions to disconnected and surfaces the cause unretried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("authentication rejected")]
    AuthRejected,

    #[error("connection timed out")]
    Timeout,

    #[error("transport closed: {0}")]
    Closed(String),
}

/// Low-level connection to the kernel service.
///
/// Implementations translate the four wire operations of the protocol
/// into whatever carrier they use. All errors are transport-level;
/// per-cell execution errors travel as `Output::Error` events on the
/// execute stream, never through these results.
#[async_trait]
pub trait KernelTransport: Send {
    /// Open a session for the given kernel kind. Returns the
    /// service-assigned session id.
    async fn start(
        &mut self,
        kind: &str,
        config: &SessionConfig,
    ) -> Result<SessionId, TransportError>;

    /// Submit source for execution. The receiver yields output events
    /// in kernel order and closes after a terminal event. A close
    /// without a terminal event means the transport died mid-stream.
    async fn execute(
        &mut self,
        session_id: &SessionId,
        source: &str,
    ) -> Result<mpsc::Receiver<ExecuteEvent>, TransportError>;

    /// Send an out-of-band interrupt. Advisory: resolving when the
    /// service acknowledges, not when the execution stops.
    async fn interrupt(&mut self, session_id: &SessionId) -> Result<(), TransportError>;

    /// Tear down and re-establish the underlying session, resetting
    /// the kernel-owned execution counter.
    async fn restart(&mut self, session_id: &SessionId) -> Result<(), TransportError>;

    /// Release the session.
    async fn shutdown(&mut self, session_id: &SessionId) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let config = SessionConfig::new("kernel.example.com").with_token("s3cret");
        let rendered = format!("{:?}", config);

        assert!(rendered.contains("kernel.example.com"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn test_debug_shows_absent_token_as_none() {
        let rendered = format!("{:?}", SessionConfig::new("local"));
        assert!(rendered.contains("None"));
    }
}
