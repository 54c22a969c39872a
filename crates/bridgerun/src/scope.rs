//! # Scope
//!
//! A named execution context living in the peer. The peer owns the
//! namespace; this side only holds its name and drives it by operation.
//!
//! ## Lifecycle
//!
//! ```text
//! Uncreated --create--> Creating --> Attached   (the name already existed)
//!                                  --> OwnedNew   (the peer made it for us)
//!                                  --> Uncreated  (the peer refused)
//! Attached | OwnedNew --destroy--> Detached
//! ```
//!
//! An `OwnedNew` scope created with `responsible = true` registers a
//! teardown hook that destroys it. Every operation other than `create`
//! needs an Attached or OwnedNew scope and fails with `Error::Detached`
//! locally otherwise. A second `create` while one is in flight fails with
//! `Error::Creating` and never reaches the peer.
//!
//! ## Wrapped variants
//!
//! `w_*` operations pass their parameters by handle: each value is stored
//! in the local registry and the peer receives `{"$handle": ..}` markers it
//! can resolve back to the live objects. `aw_*` variants also ask the peer
//! to copy primitive values instead of keeping proxies.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use bridgescript::Value;
use serde_json::json;
use tracing::debug;
use tracing::warn;

use crate::dispatch::Args;
use crate::registry::Registry;
use crate::teardown::Teardown;
use crate::tracker;
use crate::tracker::Tracker;

pub const CREATE: &str = "create";
pub const DESTROY: &str = "destroy";
pub const EXEC: &str = "exec";
pub const W_EXEC: &str = "w_exec";
pub const DO_FUNC: &str = "do_func";
pub const W_DO_FUNC: &str = "w_do_func";
pub const MAKE_FUNC: &str = "make_func";
pub const GET_VAR: &str = "get_var";
pub const HAS_VAR: &str = "has_var";
pub const DEL_VAR: &str = "del_var";
pub const SET_VAR: &str = "set_var";
pub const CALL: &str = "call";
pub const W_CALL: &str = "w_call";

#[derive(Debug, Clone)]
pub enum Error {
    Call(tracker::Error),
    /// The scope was never created, or has been destroyed.
    Detached,
    AlreadyCreated,
    /// Another `create` on this scope has not finished yet.
    Creating,
    UnexpectedResponse(serde_json::Value),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call(e) => write!(f, "{}", e),
            Self::Detached => write!(f, "Scope is not attached"),
            Self::AlreadyCreated => write!(f, "Scope was already created"),
            Self::Creating => write!(f, "Scope is already being created"),
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uncreated,
    Creating,
    Attached,
    OwnedNew,
    Detached,
}

struct State {
    id: Option<String>,
    allow_new: bool,
    is_new: Option<bool>,
    lifecycle: Lifecycle,
}

struct Inner {
    tracker: Arc<Tracker>,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn attached_id(&self) -> Result<String> {
        let state = self.state();
        match state.lifecycle {
            Lifecycle::Attached | Lifecycle::OwnedNew => state.id.clone().ok_or(Error::Detached),
            Lifecycle::Uncreated | Lifecycle::Creating | Lifecycle::Detached => Err(Error::Detached),
        }
    }

    async fn destroy(&self) -> Result<()> {
        let id = self.attached_id()?;
        let response = self.tracker.issue(DESTROY, args(json!({"id": id}))).await?;
        let next = match response {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => return Err(Error::UnexpectedResponse(other)),
        };

        let mut state = self.state();
        debug!(scope = %id, "scope destroyed");
        state.id = next;
        state.lifecycle = Lifecycle::Detached;
        Ok(())
    }
}

/// Puts an in-flight `create` back to `Uncreated` unless it committed.
struct CreateGuard<'a> {
    inner: &'a Inner,
}

impl Drop for CreateGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state();
        if state.lifecycle == Lifecycle::Creating {
            state.lifecycle = Lifecycle::Uncreated;
        }
    }
}

/// Handle on a peer scope. Clones refer to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<Inner>,
    registry: Registry,
    teardown: Teardown,
}

impl Scope {
    pub(crate) fn new(
        tracker: Arc<Tracker>,
        registry: Registry,
        teardown: Teardown,
        id: Option<String>,
        allow_new: bool,
    ) -> Self {
        let state = State {
            id,
            allow_new,
            is_new: None,
            lifecycle: Lifecycle::Uncreated,
        };
        Self {
            inner: Arc::new(Inner {
                tracker,
                state: Mutex::new(state),
            }),
            registry,
            teardown,
        }
    }

    /// The scope name: as requested before `create`, as granted after.
    pub fn id(&self) -> Option<String> {
        self.inner.state().id.clone()
    }

    pub fn is_new(&self) -> Option<bool> {
        self.inner.state().is_new
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state().lifecycle
    }

    /// Asks the peer for the scope. With `responsible`, a scope the peer
    /// made fresh is destroyed again on teardown.
    pub async fn create(&self, responsible: bool) -> Result<()> {
        let (id, allow_new) = {
            let mut state = self.inner.state();
            match state.lifecycle {
                Lifecycle::Uncreated => state.lifecycle = Lifecycle::Creating,
                Lifecycle::Creating => return Err(Error::Creating),
                Lifecycle::Detached => return Err(Error::Detached),
                Lifecycle::Attached | Lifecycle::OwnedNew => return Err(Error::AlreadyCreated),
            }
            (state.id.clone(), state.allow_new)
        };
        let _guard = CreateGuard { inner: &self.inner };

        let response = self
            .inner
            .tracker
            .issue(CREATE, args(json!({"id": id, "allow_new": allow_new})))
            .await?;
        let name = response.get("name").and_then(|v| v.as_str()).map(str::to_string);
        let is_new = response.get("is_new").and_then(|v| v.as_bool());
        let (Some(name), Some(is_new)) = (name, is_new) else {
            return Err(Error::UnexpectedResponse(response));
        };

        {
            let mut state = self.inner.state();
            state.id = Some(name.clone());
            state.is_new = Some(is_new);
            state.lifecycle = if is_new { Lifecycle::OwnedNew } else { Lifecycle::Attached };
        }
        debug!(scope = %name, is_new, "scope created");

        if is_new && responsible {
            let inner = self.inner.clone();
            self.teardown.register(move || async move {
                if inner.attached_id().is_err() {
                    return;
                }
                if let Err(e) = inner.destroy().await {
                    warn!(error = %e, "failed to destroy scope on teardown");
                }
            });
        }
        Ok(())
    }

    /// Destroys the scope in the peer. Its reply becomes the new id.
    pub async fn destroy(&self) -> Result<()> {
        self.inner.destroy().await
    }

    /// Runs `code` in the scope with `params` bound, returning the variable
    /// `ret_name` (or the code's own return value when `None`).
    pub async fn exec(&self, code: &str, params: Args, ret_name: Option<&str>) -> Result<serde_json::Value> {
        let id = self.inner.attached_id()?;
        self.issue(EXEC, json!({"id": id, "code": code, "ret_name": ret_name, "params": params}))
            .await
    }

    pub async fn w_exec(&self, code: &str, params: Vec<(String, Value)>, ret_name: Option<&str>) -> Result<serde_json::Value> {
        self.wrapped_exec(code, params, ret_name, false).await
    }

    pub async fn aw_exec(&self, code: &str, params: Vec<(String, Value)>, ret_name: Option<&str>) -> Result<serde_json::Value> {
        self.wrapped_exec(code, params, ret_name, true).await
    }

    async fn wrapped_exec(
        &self,
        code: &str,
        params: Vec<(String, Value)>,
        ret_name: Option<&str>,
        auto_convert: bool,
    ) -> Result<serde_json::Value> {
        let id = self.inner.attached_id()?;
        let params = self.make_handles(params);
        let request = json!({
            "id": id,
            "code": code,
            "ret_name": ret_name,
            "params": params,
            "do_auto_convert": auto_convert,
        });
        self.issue(W_EXEC, request).await
    }

    /// Runs `code` as a function body over `params` and returns its result.
    pub async fn do_func(&self, code: &str, params: Args) -> Result<serde_json::Value> {
        let id = self.inner.attached_id()?;
        self.issue(DO_FUNC, json!({"id": id, "code": code, "params": params})).await
    }

    pub async fn w_do_func(&self, code: &str, params: Vec<(String, Value)>) -> Result<serde_json::Value> {
        self.wrapped_do_func(code, params, false).await
    }

    pub async fn aw_do_func(&self, code: &str, params: Vec<(String, Value)>) -> Result<serde_json::Value> {
        self.wrapped_do_func(code, params, true).await
    }

    async fn wrapped_do_func(&self, code: &str, params: Vec<(String, Value)>, auto_convert: bool) -> Result<serde_json::Value> {
        let id = self.inner.attached_id()?;
        let params = self.make_handles(params);
        let request = json!({"id": id, "code": code, "params": params, "do_auto_convert": auto_convert});
        self.issue(W_DO_FUNC, request).await
    }

    /// Defines function `name` in the scope and returns the peer's reference to it.
    pub async fn make_func(&self, name: &str, code: &str, params: &[&str]) -> Result<serde_json::Value> {
        let id = self.inner.attached_id()?;
        self.issue(MAKE_FUNC, json!({"id": id, "name": name, "code": code, "params": params}))
            .await
    }

    pub async fn get_var(&self, name: &str) -> Result<serde_json::Value> {
        let id = self.inner.attached_id()?;
        self.issue(GET_VAR, json!({"id": id, "name": name})).await
    }

    pub async fn has_var(&self, name: &str) -> Result<bool> {
        let id = self.inner.attached_id()?;
        match self.issue(HAS_VAR, json!({"id": id, "name": name})).await? {
            serde_json::Value::Bool(b) => Ok(b),
            other => Err(Error::UnexpectedResponse(other)),
        }
    }

    pub async fn del_var(&self, name: &str) -> Result<()> {
        let id = self.inner.attached_id()?;
        self.issue(DEL_VAR, json!({"id": id, "name": name})).await?;
        Ok(())
    }

    pub async fn set_var(&self, name: &str, value: serde_json::Value) -> Result<()> {
        let id = self.inner.attached_id()?;
        self.issue(SET_VAR, json!({"id": id, "name": name, "value": value})).await?;
        Ok(())
    }

    pub async fn call(&self, name: &str, args: Vec<serde_json::Value>) -> Result<serde_json::Value> {
        self.call_kw(name, args, Args::new()).await
    }

    pub async fn call_kw(&self, name: &str, args: Vec<serde_json::Value>, kwargs: Args) -> Result<serde_json::Value> {
        let id = self.inner.attached_id()?;
        self.issue(CALL, json!({"id": id, "name": name, "args": args, "kwargs": kwargs}))
            .await
    }

    /// `call_kw` with every argument passed by handle.
    pub async fn w_call_kw(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        auto_convert: bool,
    ) -> Result<serde_json::Value> {
        let id = self.inner.attached_id()?;
        let args: Vec<serde_json::Value> = args.into_iter().map(|v| self.make_handle(v)).collect();
        let kwargs = self.make_handles(kwargs);
        let request = json!({
            "id": id,
            "name": name,
            "args": args,
            "kwargs": kwargs,
            "auto_convert": auto_convert,
        });
        self.issue(W_CALL, request).await
    }

    /// Stores `value` in the local registry and returns its marker.
    pub fn make_handle(&self, value: Value) -> serde_json::Value {
        self.registry.insert(value).marker()
    }

    fn make_handles(&self, params: Vec<(String, Value)>) -> Args {
        params
            .into_iter()
            .map(|(name, value)| (name, self.make_handle(value)))
            .collect()
    }

    async fn issue(&self, op: &str, request: serde_json::Value) -> Result<serde_json::Value> {
        Ok(self.inner.tracker.issue(op, args(request)).await?)
    }
}

fn args(request: serde_json::Value) -> Args {
    match request {
        serde_json::Value::Object(map) => map,
        _ => Args::new(),
    }
}
