//! # Bridge
//!
//! One side of a connection: a transport plus everything needed to serve
//! the peer (registry, dispatch table) and to call it (tracker).
//!
//! ## Architecture
//!
//! `build` spawns two tasks:
//!
//! - the **pump** reads frames off the transport in arrival order. A `Call`
//!   goes to the dispatch table with a fresh `Completion`; a `Reply` settles
//!   the matching pending call. When the transport closes, every pending
//!   call fails.
//! - the **writer** drains the outbound queue that both completions and the
//!   tracker post to, so frames leave in the order they were posted.
//!
//! Dropping the `Bridge` aborts both tasks and releases the transport.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bridgewire::ErrorDescriptor;
use bridgewire::Frame;
use bridgewire::Outcome;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::trace;

use crate::dispatch;
use crate::dispatch::Args;
use crate::dispatch::Completion;
use crate::dispatch::DispatchBuilder;
use crate::dispatch::DispatchTable;
use crate::dispatch::ErrorReporting;
use crate::handle::Handle;
use crate::operations;
use crate::proxy::RemoteObject;
use crate::registry::Registry;
use crate::scope::Scope;
use crate::teardown::Teardown;
use crate::tracker;
use crate::tracker::Tracker;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Dispatch(dispatch::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch(e) => write!(f, "Dispatch error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<dispatch::Error> for Error {
    fn from(e: dispatch::Error) -> Self {
        Self::Dispatch(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Used in logs only.
    pub name: String,
    pub error_reporting: ErrorReporting,
    /// How long an issued call may stay unanswered. `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "bridge".into(),
            error_reporting: ErrorReporting::default(),
            call_timeout: None,
        }
    }
}

/// Fluent builder for a `Bridge`.
pub struct BridgeBuilder {
    config: BridgeConfig,
    registry: Registry,
    registry_operations: bool,
    operations: Vec<(String, dispatch::Operation)>,
}

impl BridgeBuilder {
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            registry: Registry::new(),
            registry_operations: true,
            operations: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn error_reporting(mut self, reporting: ErrorReporting) -> Self {
        self.config.error_reporting = reporting;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Serves this registry instead of a fresh one.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Leaves the standard registry operations out of the dispatch table.
    pub fn without_registry_operations(mut self) -> Self {
        self.registry_operations = false;
        self
    }

    /// Adds an operation the peer may call.
    pub fn operation<F>(mut self, name: impl Into<String>, op: F) -> Self
    where
        F: Fn(Args, Completion) + Send + Sync + 'static,
    {
        self.operations.push((name.into(), Arc::new(op)));
        self
    }

    /// Wires everything up and starts the pump. Must be called inside a
    /// tokio runtime. Fails if two operations share a name.
    pub fn build(self, transport: impl Transport) -> Result<Bridge> {
        let mut table = DispatchBuilder::default().reporting(self.config.error_reporting);
        if self.registry_operations {
            table = operations::install(table, &self.registry, self.config.error_reporting)?;
        }
        for (name, op) in self.operations {
            table = table.operation(name, move |args, done| op(args, done))?;
        }
        let dispatch = table.build();

        let transport: Arc<dyn Transport> = Arc::new(transport);
        let (outbound, queue) = mpsc::unbounded_channel();
        let tracker = Arc::new(Tracker::new(self.config.name.clone(), outbound.clone(), self.config.call_timeout));

        debug!(bridge = %self.config.name, operations = ?dispatch.names(), "bridge starting");
        let pump = tokio::spawn(pump(
            self.config.name.clone(),
            transport.clone(),
            tracker.clone(),
            dispatch.clone(),
            outbound,
        ));
        let writer = tokio::spawn(write(self.config.name.clone(), transport, tracker.clone(), queue));

        Ok(Bridge {
            config: self.config,
            registry: self.registry,
            tracker,
            dispatch,
            teardown: Teardown::new(),
            tasks: [pump, writer],
        })
    }
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Bridge {
    config: BridgeConfig,
    registry: Registry,
    tracker: Arc<Tracker>,
    dispatch: DispatchTable,
    teardown: Teardown,
    tasks: [JoinHandle<()>; 2],
}

impl Bridge {
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The objects this side serves to its peer.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn teardown(&self) -> &Teardown {
        &self.teardown
    }

    /// Calls `op` on the peer.
    pub async fn issue(&self, op: &str, args: Args) -> tracker::Result<serde_json::Value> {
        self.tracker.issue(op, args).await
    }

    /// A proxy for `handle` in the peer's registry.
    pub fn remote(&self, handle: Handle) -> RemoteObject {
        RemoteObject::new(handle, self.tracker.clone())
    }

    /// An uncreated scope. Call `create` on it before use.
    pub fn scope(&self, id: Option<&str>, allow_new: bool) -> Scope {
        Scope::new(
            self.tracker.clone(),
            self.registry.clone(),
            self.teardown.clone(),
            id.map(str::to_string),
            allow_new,
        )
    }

    /// Runs the teardown hooks while the connection is still up.
    pub async fn close(&self) {
        self.teardown.run().await;
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn pump(
    name: String,
    transport: Arc<dyn Transport>,
    tracker: Arc<Tracker>,
    dispatch: DispatchTable,
    outbound: mpsc::UnboundedSender<Frame>,
) {
    let error = loop {
        match transport.recv().await {
            Ok(Some(bytes)) => handle_message(&name, &bytes, &tracker, &dispatch, &outbound),
            Ok(None) => {
                debug!(bridge = %name, "transport closed");
                break tracker::Error::ChannelClosed;
            }
            Err(e) => {
                error!(bridge = %name, error = %e, "transport error in pump");
                break tracker::Error::Transport(e);
            }
        }
    };

    tracker.fail_all(error);
}

fn handle_message(
    name: &str,
    bytes: &[u8],
    tracker: &Tracker,
    dispatch: &DispatchTable,
    outbound: &mpsc::UnboundedSender<Frame>,
) {
    match Frame::decode(bytes) {
        Ok(Frame::Call(call)) => {
            trace!(bridge = %name, call_id = %call.call_id, op = %call.op, "inbound call");
            let completion = Completion::new(call.call_id.clone(), call.op.clone(), outbound.clone());
            dispatch.dispatch(call, completion);
        }
        Ok(Frame::Reply(reply)) => {
            trace!(bridge = %name, call_id = %reply.call_id, "inbound reply");
            // Refused replies are logged by the tracker.
            let _ = tracker.complete(&reply.call_id, reply.outcome);
        }
        Err(e) => match Frame::salvage_reply_id(bytes) {
            Some(call_id) => {
                error!(bridge = %name, call_id = %call_id, error = %e, "malformed reply");
                tracker.fail(&call_id, tracker::Error::ProtocolViolation(e.to_string()));
            }
            None => error!(bridge = %name, error = %e, "dropping undecodable frame"),
        },
    }
}

async fn write(
    name: String,
    transport: Arc<dyn Transport>,
    tracker: Arc<Tracker>,
    mut queue: mpsc::UnboundedReceiver<Frame>,
) {
    while let Some(frame) = queue.recv().await {
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(bridge = %name, call_id = %frame.call_id(), error = %e, "refusing to send frame");
                match frame {
                    Frame::Call(call) => tracker.fail(&call.call_id, tracker::Error::Wire(e)),
                    Frame::Reply(reply) => {
                        let outcome = Outcome::err(ErrorDescriptor::new("ProtocolViolation", e.to_string()));
                        if let Ok(bytes) = Frame::reply(reply.call_id, outcome).encode() {
                            let _ = transport.send(&bytes).await;
                        }
                    }
                }
                continue;
            }
        };

        if let Err(e) = transport.send(&bytes).await {
            error!(bridge = %name, error = %e, "transport error in writer");
            tracker.fail_all(tracker::Error::Transport(e));
            break;
        }
    }
}
