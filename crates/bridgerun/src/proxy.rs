//! # Remote Object Proxy
//!
//! A `RemoteObject` is a local stand-in for an object living in the peer's
//! registry. Every method is one round trip; results that are objects come
//! back as new proxies, never as copies. Only `value()` copies data out.

use std::fmt;
use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::dispatch::Args;
use crate::handle::Handle;
use crate::operations;
use crate::tracker;
use crate::tracker::Tracker;

#[derive(Debug, Clone)]
pub enum Error {
    Call(tracker::Error),
    UnexpectedResponse(serde_json::Value),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call(e) => write!(f, "{}", e),
            Self::UnexpectedResponse(v) => write!(f, "Unexpected response: {}", v),
        }
    }
}

impl std::error::Error for Error {}

impl From<tracker::Error> for Error {
    fn from(e: tracker::Error) -> Self {
        Self::Call(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone)]
pub struct RemoteObject {
    handle: Handle,
    tracker: Arc<Tracker>,
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteObject").field(&self.handle).finish()
    }
}

impl RemoteObject {
    pub fn new(handle: Handle, tracker: Arc<Tracker>) -> Self {
        Self { handle, tracker }
    }

    /// Copies `value` into the peer's registry.
    pub async fn create(tracker: &Arc<Tracker>, value: serde_json::Value) -> Result<Self> {
        let handle = Self::expect_handle(tracker.issue(operations::ADD, args(json!({"value": value}))).await?)?;
        Ok(Self::new(handle, tracker.clone()))
    }

    /// Runs `code` in the peer and keeps its result there.
    pub async fn construct(tracker: &Arc<Tracker>, code: &str, extra: Args) -> Result<Self> {
        let request = args(json!({"code": code, "args": extra}));
        let handle = Self::expect_handle(tracker.issue(operations::CONSTRUCT, request).await?)?;
        Ok(Self::new(handle, tracker.clone()))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The `{"$handle": ..}` marker naming this object to its owner.
    pub fn marker(&self) -> serde_json::Value {
        self.handle.marker()
    }

    pub async fn value(&self) -> Result<serde_json::Value> {
        Ok(self.issue(operations::VALUE, json!({"handle": self.handle})).await?)
    }

    pub async fn get_attr(&self, name: &str) -> Result<RemoteObject> {
        self.object(operations::GET_ATTR, json!({"handle": self.handle, "name": name})).await
    }

    /// Assigns `value` by handle: the peer stores the very object, not a copy.
    pub async fn set_attr(&self, name: &str, value: &RemoteObject) -> Result<()> {
        let request = json!({"handle": self.handle, "name": name, "value": value.handle});
        self.issue(operations::SET_ATTR, request).await?;
        Ok(())
    }

    pub async fn has_attr(&self, name: &str) -> Result<bool> {
        match self.issue(operations::HAS_ATTR, json!({"handle": self.handle, "name": name})).await? {
            serde_json::Value::Bool(b) => Ok(b),
            other => Err(Error::UnexpectedResponse(other)),
        }
    }

    pub async fn del_attr(&self, name: &str) -> Result<()> {
        self.issue(operations::DEL_ATTR, json!({"handle": self.handle, "name": name})).await?;
        Ok(())
    }

    /// Calls this object with the remote list `args`.
    pub async fn call(&self, args: &RemoteObject) -> Result<RemoteObject> {
        self.object(operations::CALL, json!({"handle": self.handle, "args": args.handle})).await
    }

    /// Ships `args` over as a new remote list, then calls with it.
    pub async fn call_with(&self, args: Vec<serde_json::Value>) -> Result<RemoteObject> {
        let list = Self::create(&self.tracker, serde_json::Value::Array(args)).await?;
        let result = self.call(&list).await;
        list.release_quietly().await;
        result
    }

    pub async fn call_method(&self, name: &str, args: &RemoteObject) -> Result<RemoteObject> {
        let request = json!({"handle": self.handle, "name": name, "args": args.handle});
        self.object(operations::CALL_METHOD, request).await
    }

    pub async fn call_method_with(&self, name: &str, args: Vec<serde_json::Value>) -> Result<RemoteObject> {
        let list = Self::create(&self.tracker, serde_json::Value::Array(args)).await?;
        let result = self.call_method(name, &list).await;
        list.release_quietly().await;
        result
    }

    /// Runs `code` in the peer with this object bound to `receiver`.
    pub async fn access(&self, code: &str, extra: Args, receiver: &str) -> Result<RemoteObject> {
        let request = json!({"handle": self.handle, "code": code, "args": extra, "receiver": receiver});
        self.object(operations::ACCESS, request).await
    }

    /// Tells the peer to forget this object.
    pub async fn release(self) -> Result<()> {
        self.issue(operations::REMOVE, json!({"handle": self.handle})).await?;
        Ok(())
    }

    /// Releases a temporary, logging a failure rather than returning it.
    async fn release_quietly(self) {
        let handle = self.handle;
        if let Err(e) = self.release().await {
            warn!(%handle, error = %e, "failed to release temporary argument list");
        }
    }

    async fn issue(&self, op: &str, request: serde_json::Value) -> tracker::Result<serde_json::Value> {
        self.tracker.issue(op, args(request)).await
    }

    async fn object(&self, op: &str, request: serde_json::Value) -> Result<RemoteObject> {
        let handle = Self::expect_handle(self.issue(op, request).await?)?;
        Ok(Self::new(handle, self.tracker.clone()))
    }

    fn expect_handle(response: serde_json::Value) -> Result<Handle> {
        response
            .as_str()
            .and_then(|s| Handle::parse(s).ok())
            .ok_or(Error::UnexpectedResponse(response))
    }
}

fn args(request: serde_json::Value) -> Args {
    match request {
        serde_json::Value::Object(map) => map,
        _ => Args::new(),
    }
}
