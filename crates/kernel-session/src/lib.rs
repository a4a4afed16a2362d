//! kernel-session - lifecycle of a connection to a remote, stateful
//! code-execution kernel.
//!
//! This crate owns the wire protocol types, the `KernelTransport`
//! seam, and the `SessionManager` state machine. It knows nothing
//! about cells or notebooks; the `notebook-engine` crate layers the
//! cell store and execution coordinator on top.
//!
//! There is no ambient global session: embedders construct a
//! `SessionManager` around a transport and pass it to whoever
//! coordinates executions.

pub mod protocol;
pub mod scripted;
pub mod session;
pub mod transport;

pub use protocol::{ExecuteEvent, Output, StreamChannel};
pub use session::{SessionError, SessionManager, SessionStatus};
pub use transport::{KernelTransport, SessionConfig, SessionId, TransportError};
