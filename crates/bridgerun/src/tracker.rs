//! # Async Call Tracker
//!
//! Bookkeeping for calls this runtime has issued to its peer.
//!
//! ## Invariants
//!
//! - A pending entry exists from `prepare` until its reply arrives, its
//!   caller times out, or the connection dies. Whichever comes first removes
//!   it, so each call settles exactly once.
//! - A reply whose call id is not pending (unknown, or already answered) is a
//!   protocol violation. It is logged and refused, never delivered.

use std::fmt;
use std::time::Duration;

use bridgewire::CallId;
use bridgewire::ErrorDescriptor;
use bridgewire::Frame;
use bridgewire::Outcome;
use bridgewire::WireError;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;
use tracing::trace;

use crate::dispatch::Args;
use crate::transport;

/// A failure raised by the peer, rebuilt on this side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    pub trace: String,
}

impl From<ErrorDescriptor> for RemoteError {
    fn from(e: ErrorDescriptor) -> Self {
        Self {
            name: e.name,
            message: e.message,
            trace: e.trace,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}

#[derive(Debug, Clone)]
pub enum Error {
    Transport(transport::Error),
    Wire(WireError),
    Remote(RemoteError),
    ProtocolViolation(String),
    Timeout,
    ChannelClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Wire(e) => write!(f, "Wire error: {}", e),
            Self::Remote(e) => write!(f, "Remote failure: {}", e),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            Self::Timeout => write!(f, "Request timed out"),
            Self::ChannelClosed => write!(f, "Response channel closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

type Settlement = Result<serde_json::Value>;

/// Pending calls of one bridge, plus the outbound queue calls are posted on.
pub struct Tracker {
    bridge_name: String,
    pending: DashMap<CallId, oneshot::Sender<Settlement>>,
    outbound: mpsc::UnboundedSender<Frame>,
    call_timeout: Option<Duration>,
}

impl Tracker {
    pub(crate) fn new(
        bridge_name: impl Into<String>,
        outbound: mpsc::UnboundedSender<Frame>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            bridge_name: bridge_name.into(),
            pending: DashMap::new(),
            outbound,
            call_timeout,
        }
    }

    /// Registers a pending call and returns its id and the receiver it will
    /// settle on.
    pub fn prepare(&self) -> (CallId, oneshot::Receiver<Settlement>) {
        let call_id = CallId::generate();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(call_id.clone(), tx);
        (call_id, rx)
    }

    /// Posts `op(args)` to the peer and waits for its outcome.
    pub async fn issue(&self, op: &str, args: Args) -> Result<serde_json::Value> {
        let (call_id, rx) = self.prepare();
        trace!(bridge = %self.bridge_name, %call_id, op, "issue");
        let frame = Frame::call(call_id.clone(), op, args);
        if self.outbound.send(frame).is_err() {
            self.pending.remove(&call_id);
            return Err(Error::ChannelClosed);
        }
        self.await_settlement(call_id, rx).await
    }

    async fn await_settlement(&self, call_id: CallId, rx: oneshot::Receiver<Settlement>) -> Result<serde_json::Value> {
        let received = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.remove(&call_id);
                    debug!(bridge = %self.bridge_name, %call_id, "call timed out");
                    return Err(Error::Timeout);
                }
            },
            None => rx.await,
        };
        match received {
            Ok(settlement) => settlement,
            Err(_) => {
                self.pending.remove(&call_id);
                Err(Error::ChannelClosed)
            }
        }
    }

    /// Settles the pending call `call_id` with `outcome`.
    pub fn complete(&self, call_id: &CallId, outcome: Outcome) -> Result<()> {
        let Some((_, tx)) = self.pending.remove(call_id) else {
            let message = format!("reply for unknown or settled call {}", call_id);
            error!(bridge = %self.bridge_name, "{}", message);
            return Err(Error::ProtocolViolation(message));
        };

        let settlement = outcome
            .into_result()
            .map_err(|e| Error::Remote(RemoteError::from(e)));
        if tx.send(settlement).is_err() {
            debug!(bridge = %self.bridge_name, %call_id, "caller went away before its reply");
        }
        Ok(())
    }

    /// Fails the pending call `call_id` with a local error.
    pub(crate) fn fail(&self, call_id: &CallId, error: Error) {
        if let Some((_, tx)) = self.pending.remove(call_id) {
            let _ = tx.send(Err(error));
        }
    }

    /// Fails every pending call with `error`.
    pub fn fail_all(&self, error: Error) {
        let keys: Vec<CallId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, tx)) = self.pending.remove(&key) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn bridge_name(&self) -> &str {
        &self.bridge_name
    }
}
