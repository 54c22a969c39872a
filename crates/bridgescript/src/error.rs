//! # Script Errors
//!
//! Every failure raised while compiling or running script code. The `name`
//! doubles as the error class reported across the bridge boundary.

use std::fmt;

pub const SYNTAX_ERROR: &str = "SyntaxError";
pub const REFERENCE_ERROR: &str = "ReferenceError";
pub const TYPE_ERROR: &str = "TypeError";
pub const RANGE_ERROR: &str = "RangeError";
pub const ERROR: &str = "Error";

/// A failure raised by script code or by the interpreter on its behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    /// Error class, e.g. `TypeError`, or the `name` of a thrown object.
    pub name: String,
    pub message: String,
    /// Function frames the error unwound through, innermost first.
    pub trace: Vec<String>,
}

impl ScriptError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(SYNTAX_ERROR, message)
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(REFERENCE_ERROR, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(TYPE_ERROR, message)
    }

    pub fn range(message: impl Into<String>) -> Self {
        Self::new(RANGE_ERROR, message)
    }

    /// Records one more frame the error passed through.
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.trace.push(frame.into());
        self
    }

    /// Renders the trace one frame per line, the way it is shipped to a peer.
    pub fn trace_string(&self) -> String {
        self.trace
            .iter()
            .map(|frame| format!("    at {}", frame))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ScriptError {}

pub type Result<T> = std::result::Result<T, ScriptError>;
