//! # Frames
//!
//! The two messages that ever cross the boundary.
//!
//! - `Call`: "run operation `op` with these keyword arguments; answer to `call_id`".
//! - `Reply`: "here is the outcome for `call_id`".
//!
//! The call id stands in for the one-shot completion callback: whoever
//! issued the call keeps the id, and the peer echoes it back exactly once.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::error::Result;
use crate::error::WireError;

/// Correlates a `Reply` with the `Call` that caused it.
///
/// Generated from 128 random bits, so collisions between outstanding calls
/// are treated as impossible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Describes a failure that happened on the other side of the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub name: String,
    pub message: String,
    /// Best-effort backtrace text; empty when none is available.
    #[serde(default, alias = "stack")]
    pub trace: String,
}

impl ErrorDescriptor {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            trace: String::new(),
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// The completion payload: `{result, error}`.
///
/// `error` is null on success. On failure `result` is null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub result: Value,
    pub error: Option<ErrorDescriptor>,
}

impl Outcome {
    pub fn ok(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            error: None,
        }
    }

    pub fn err(error: ErrorDescriptor) -> Self {
        Self {
            result: Value::Null,
            error: Some(error),
        }
    }

    /// A failure whose details were withheld: `(null, null)`.
    pub fn suppressed() -> Self {
        Self {
            result: Value::Null,
            error: None,
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }

    /// Settles the outcome one way: the error wins when present.
    pub fn into_result(self) -> std::result::Result<Value, ErrorDescriptor> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    pub call_id: CallId,
    pub op: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub call_id: CallId,
    pub outcome: Outcome,
}

/// A message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Call(CallFrame),
    Reply(ReplyFrame),
}

impl Frame {
    pub fn call(call_id: CallId, op: impl Into<String>, args: Map<String, Value>) -> Self {
        Frame::Call(CallFrame {
            call_id,
            op: op.into(),
            args,
        })
    }

    pub fn reply(call_id: CallId, outcome: Outcome) -> Self {
        Frame::Reply(ReplyFrame { call_id, outcome })
    }

    pub fn call_id(&self) -> &CallId {
        match self {
            Frame::Call(c) => &c.call_id,
            Frame::Reply(r) => &r.call_id,
        }
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.call_id().as_str().is_empty() {
            return Err(WireError::ProtocolViolation("empty call id".into()));
        }
        if let Frame::Call(call) = self {
            if call.op.is_empty() {
                return Err(WireError::ProtocolViolation("empty operation name".into()));
            }
        }
        Ok(())
    }
}
