//! # Dispatch Table
//!
//! Maps operation names to the code that serves them.
//!
//! ## Invariants
//!
//! - The table is filled once, through `DispatchBuilder`, and immutable after.
//!   Registering a name twice is an error, not an overwrite.
//! - Every dispatched call is answered exactly once. The answer is posted by
//!   consuming its `Completion`; a completion dropped unanswered (including
//!   by a panicking operation) posts an error reply instead.
//! - The table's `ErrorReporting` covers every failure reply it produces:
//!   unknown operations, panics and abandoned completions as well as the
//!   registry operations that apply it through `guard`.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bridgewire::CallFrame;
use bridgewire::CallId;
use bridgewire::ErrorDescriptor;
use bridgewire::Frame;
use bridgewire::Outcome;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::registry;

/// Keyword arguments of a call.
pub type Args = serde_json::Map<String, serde_json::Value>;

pub type Operation = Arc<dyn Fn(Args, Completion) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    DuplicateOperation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateOperation(name) => write!(f, "Operation '{}' is already registered", name),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// What a failing operation tells the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorReporting {
    /// Send `{name, message, trace}` in the reply.
    #[default]
    Forward,
    /// Send `error: null` and log the failure locally.
    Suppress,
}

impl ErrorReporting {
    /// The outcome for a failed operation.
    pub fn outcome(self, op: &str, error: &registry::Error) -> Outcome {
        self.report(op, ErrorDescriptor::new(error.name(), error.message()).with_trace(error.trace()))
    }

    /// Forwards `error` or withholds it, logging either way.
    pub fn report(self, op: &str, error: ErrorDescriptor) -> Outcome {
        match self {
            Self::Forward => {
                debug!(op, error = %error, "operation failed");
                Outcome::err(error)
            }
            Self::Suppress => {
                warn!(op, error = %error, "operation failed; error suppressed");
                Outcome::suppressed()
            }
        }
    }

    /// Converts an operation's result into its outcome.
    pub fn guard(self, op: &str, result: registry::Result<serde_json::Value>) -> Outcome {
        match result {
            Ok(value) => Outcome::ok(value),
            Err(e) => self.outcome(op, &e),
        }
    }
}

/// The one-shot answer to a dispatched call.
pub struct Completion {
    call_id: CallId,
    op: String,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    reporting: ErrorReporting,
}

impl Completion {
    pub(crate) fn new(call_id: CallId, op: impl Into<String>, outbound: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            call_id,
            op: op.into(),
            outbound: Some(outbound),
            reporting: ErrorReporting::default(),
        }
    }

    /// A completion whose reply lands on the returned receiver instead of a
    /// transport. For driving operations directly.
    pub fn detached(call_id: CallId, op: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(call_id, op, tx), rx)
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    /// Posts the reply.
    pub fn complete(mut self, outcome: Outcome) {
        if let Some(outbound) = self.outbound.take() {
            Self::post(&outbound, self.call_id.clone(), outcome);
        }
    }

    fn post(outbound: &mpsc::UnboundedSender<Frame>, call_id: CallId, outcome: Outcome) {
        if outbound.send(Frame::reply(call_id.clone(), outcome)).is_err() {
            debug!(%call_id, "reply dropped: bridge is shut down");
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let Some(outbound) = self.outbound.take() else {
            return;
        };
        let (name, message) = if std::thread::panicking() {
            ("Panic", format!("operation '{}' panicked", self.op))
        } else {
            ("Abandoned", format!("operation '{}' finished without answering", self.op))
        };
        warn!(call_id = %self.call_id, op = %self.op, "{}", message);
        let outcome = self.reporting.report(&self.op, ErrorDescriptor::new(name, message));
        Self::post(&outbound, self.call_id.clone(), outcome);
    }
}

/// Immutable name → operation table. Clones share the table.
#[derive(Clone, Default)]
pub struct DispatchTable {
    operations: Arc<HashMap<String, Operation>>,
    reporting: ErrorReporting,
}

impl DispatchTable {
    pub fn builder() -> DispatchBuilder {
        DispatchBuilder::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Runs the operation named by `call`. Unknown names and panics are
    /// answered with an error; they never escape.
    pub fn dispatch(&self, call: CallFrame, mut completion: Completion) {
        completion.reporting = self.reporting;
        let Some(operation) = self.operations.get(&call.op) else {
            warn!(op = %call.op, "unknown operation");
            let message = format!("No operation named '{}'", call.op);
            let outcome = self.reporting.report(&call.op, ErrorDescriptor::new("UnknownOperation", message));
            completion.complete(outcome);
            return;
        };

        debug!(call_id = %call.call_id, op = %call.op, "dispatch");
        let operation = operation.clone();
        let args = call.args;
        if std::panic::catch_unwind(AssertUnwindSafe(move || operation(args, completion))).is_err() {
            warn!(op = %call.op, "operation panicked");
        }
    }
}

#[derive(Default)]
pub struct DispatchBuilder {
    operations: HashMap<String, Operation>,
    reporting: ErrorReporting,
}

impl DispatchBuilder {
    /// How failures the table itself answers are reported.
    pub fn reporting(mut self, reporting: ErrorReporting) -> Self {
        self.reporting = reporting;
        self
    }

    pub fn operation<F>(mut self, name: impl Into<String>, op: F) -> Result<Self>
    where
        F: Fn(Args, Completion) + Send + Sync + 'static,
    {
        let name = name.into();
        if self.operations.contains_key(&name) {
            return Err(Error::DuplicateOperation(name));
        }
        self.operations.insert(name, Arc::new(op));
        Ok(self)
    }

    /// Registers an operation that answers synchronously.
    pub fn sync_operation<F>(self, name: impl Into<String>, op: F) -> Result<Self>
    where
        F: Fn(Args) -> Outcome + Send + Sync + 'static,
    {
        self.operation(name, move |args, done| done.complete(op(args)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn build(self) -> DispatchTable {
        DispatchTable {
            operations: Arc::new(self.operations),
            reporting: self.reporting,
        }
    }
}
