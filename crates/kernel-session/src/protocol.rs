//! Wire protocol types for the kernel service.
//!
//! The boundary towards the remote kernel is a request/stream protocol:
//! requests are sent as tagged JSON (`Request`/`Response`), and each
//! execution streams back a sequence of `ExecuteEvent`s. A stream is
//! finished when its channel closes after a terminal event; a channel
//! that closes *without* a terminal event means the transport died
//! mid-execution.

use std::collections::HashMap;

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stream channel for line-oriented output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChannel {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamChannel::Stdout => write!(f, "stdout"),
            StreamChannel::Stderr => write!(f, "stderr"),
        }
    }
}

/// One emitted result from executing a cell.
///
/// This is a closed tagged variant, resolved once at ingestion. The
/// `result` payload carries a content-type → value mapping so a
/// presentation layer can pick its preferred representation without
/// the engine knowing any rendering rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    /// Accumulated stdout/stderr text.
    Stream { name: StreamChannel, text: String },
    /// A display or final expression value, keyed by content type
    /// (e.g. "text/plain", "text/html", "image/png").
    Result {
        data: HashMap<String, Value>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        metadata: HashMap<String, Value>,
    },
    /// An exception raised by the executed code.
    Error {
        /// Exception class name
        ename: String,
        /// Exception value/message
        evalue: String,
        /// Ordered trace lines
        traceback: Vec<String>,
    },
}

impl Output {
    /// Stream output on stdout.
    pub fn stdout(text: impl Into<String>) -> Self {
        Output::Stream {
            name: StreamChannel::Stdout,
            text: text.into(),
        }
    }

    /// Stream output on stderr.
    pub fn stderr(text: impl Into<String>) -> Self {
        Output::Stream {
            name: StreamChannel::Stderr,
            text: text.into(),
        }
    }

    /// A plain-text result payload.
    pub fn text_result(text: impl Into<String>) -> Self {
        let mut data = HashMap::new();
        data.insert("text/plain".to_string(), Value::String(text.into()));
        Output::Result {
            data,
            metadata: HashMap::new(),
        }
    }

    /// A binary result payload, base64-encoded under the given content type.
    pub fn binary_result(content_type: &str, bytes: Bytes) -> Self {
        let mut data = HashMap::new();
        data.insert(
            content_type.to_string(),
            Value::String(BASE64_STANDARD.encode(&bytes)),
        );
        Output::Result {
            data,
            metadata: HashMap::new(),
        }
    }

    /// An error output.
    pub fn error(
        ename: impl Into<String>,
        evalue: impl Into<String>,
        traceback: Vec<String>,
    ) -> Self {
        Output::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback,
        }
    }

    /// True for `Output::Error`. Used by the coordinator to decide the
    /// terminal cell status.
    pub fn is_error(&self) -> bool {
        matches!(self, Output::Error { .. })
    }
}

/// One event on an execution stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecuteEvent {
    /// Incremental output, appended to the cell in arrival order.
    Output(Output),
    /// Terminal event: the kernel finished this execution. The
    /// execution sequence is kernel-assigned and only present for
    /// runs the kernel counted (successful completions).
    Completed {
        execution_sequence: Option<u64>,
    },
    /// Terminal event: the execution was torn down by an interrupt
    /// before the kernel produced its own terminal output.
    Interrupted,
}

/// Requests that clients send to the kernel service.
///
/// `Request` and `Response` are the on-the-wire contract for
/// `KernelTransport` implementations that talk to a real service; the
/// in-memory transport bypasses them, so nothing in this workspace
/// constructs them outside their serde tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Start a new session for the given kernel kind (e.g. "python").
    Start { kind: String },
    /// Submit source for execution; the reply is an event stream.
    Execute { session_id: String, source: String },
    /// Advisory, out-of-band interrupt of the in-flight execution.
    Interrupt { session_id: String },
    /// Tear down and re-establish the session, resetting the
    /// kernel-owned execution counter.
    Restart { session_id: String },
    /// Release the session.
    Shutdown { session_id: String },
}

/// Responses from the kernel service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Session started successfully.
    Started { session_id: String },
    /// Interrupt/restart/shutdown acknowledged.
    Ack,
    /// The request failed.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_output_serialization() {
        let output = Output::stdout("4\n");
        let json = serde_json::to_value(&output).unwrap();

        assert_eq!(json["output_type"], "stream");
        assert_eq!(json["name"], "stdout");
        assert_eq!(json["text"], "4\n");
    }

    #[test]
    fn test_error_output_serialization() {
        let output = Output::error(
            "ValueError",
            "boom",
            vec!["Traceback (most recent call last):".to_string()],
        );
        let json = serde_json::to_value(&output).unwrap();

        assert_eq!(json["output_type"], "error");
        assert_eq!(json["ename"], "ValueError");
        assert_eq!(json["evalue"], "boom");
        assert_eq!(json["traceback"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_result_output_omits_empty_metadata() {
        let output = Output::text_result("42");
        let json = serde_json::to_value(&output).unwrap();

        assert_eq!(json["output_type"], "result");
        assert_eq!(json["data"]["text/plain"], "42");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_binary_result_is_base64() {
        let output = Output::binary_result("image/png", Bytes::from_static(b"\x89PNG"));
        let json = serde_json::to_value(&output).unwrap();

        let encoded = json["data"]["image/png"].as_str().unwrap();
        assert_eq!(BASE64_STANDARD.decode(encoded).unwrap(), b"\x89PNG");
    }

    #[test]
    fn test_output_roundtrip() {
        let outputs = vec![
            Output::stdout("hello\n"),
            Output::stderr("warning\n"),
            Output::text_result("42"),
            Output::error("TypeError", "bad", vec!["line 1".to_string()]),
        ];

        for output in outputs {
            let json = serde_json::to_string(&output).unwrap();
            let back: Output = serde_json::from_str(&json).unwrap();
            assert_eq!(back, output);
        }
    }

    #[test]
    fn test_is_error() {
        assert!(Output::error("E", "v", vec![]).is_error());
        assert!(!Output::stdout("x").is_error());
        assert!(!Output::text_result("x").is_error());
    }

    #[test]
    fn test_execute_event_completed_serialization() {
        let event = ExecuteEvent::Completed {
            execution_sequence: Some(3),
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "completed");
        assert_eq!(json["execution_sequence"], 3);
    }

    #[test]
    fn test_execute_event_output_roundtrip() {
        let event = ExecuteEvent::Output(Output::stdout("x"));
        let json = serde_json::to_string(&event).unwrap();
        let back: ExecuteEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_request_serialization() {
        let req = Request::Execute {
            session_id: "s-1".to_string(),
            source: "x = 1".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"execute\""));
        assert!(json.contains("s-1"));
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = Response::Started {
            session_id: "s-1".to_string(),
        };
        let bytes = serde_json::to_vec(&resp).unwrap();
        match serde_json::from_slice(&bytes).unwrap() {
            Response::Started { session_id } => assert_eq!(session_id, "s-1"),
            _ => panic!("unexpected response type"),
        }
    }

    #[test]
    fn test_stream_channel_display() {
        assert_eq!(StreamChannel::Stdout.to_string(), "stdout");
        assert_eq!(StreamChannel::Stderr.to_string(), "stderr");
    }
}
