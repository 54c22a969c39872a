//! # Handle Registry
//!
//! The table of live objects this runtime has handed out by handle.
//!
//! ## Invariants
//!
//! - Every handle a peer has been given resolves here until it is removed.
//! - Each operation is atomic with respect to the map. Values are cloned out
//!   of the map before any script runs, so script code may re-enter the
//!   registry (through `get`) without deadlocking.
//! - The registry never removes entries on its own. Lifetime is the peer's
//!   business, through `remove`.

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;

use bridgescript::Function;
use bridgescript::ScriptError;
use bridgescript::Value;
use dashmap::DashMap;
use tracing::trace;

use crate::handle::Handle;
use crate::handle::InvalidHandle;

/// Name under which evaluated code sees the handle accessor.
pub const ACCESSOR_PARAM: &str = "get";

#[derive(Debug, Clone)]
pub enum Error {
    HandleNotFound(Handle),
    InvalidHandle(String),
    Evaluation(ScriptError),
    NotCallable(Handle),
    NotAList(Handle),
    BadArguments(String),
}

impl Error {
    /// The error name reported to the peer.
    pub fn name(&self) -> &str {
        match self {
            Self::HandleNotFound(_) => "HandleNotFound",
            Self::InvalidHandle(_) => "InvalidHandle",
            Self::Evaluation(e) => &e.name,
            Self::NotCallable(_) => "NotCallable",
            Self::NotAList(_) => "NotAList",
            Self::BadArguments(_) => "BadArguments",
        }
    }

    /// Message without the name prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Evaluation(e) => e.message.clone(),
            other => other.to_string(),
        }
    }

    pub fn trace(&self) -> String {
        match self {
            Self::Evaluation(e) => e.trace_string(),
            _ => String::new(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandleNotFound(h) => write!(f, "No object is registered under handle {}", h),
            Self::InvalidHandle(s) => write!(f, "'{}' is not a handle", s),
            Self::Evaluation(e) => write!(f, "{}", e),
            Self::NotCallable(h) => write!(f, "Object {} is not callable", h),
            Self::NotAList(h) => write!(f, "Arguments object {} is not a list", h),
            Self::BadArguments(msg) => write!(f, "Bad arguments: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<ScriptError> for Error {
    fn from(e: ScriptError) -> Self {
        Self::Evaluation(e)
    }
}

impl From<InvalidHandle> for Error {
    fn from(e: InvalidHandle) -> Self {
        Self::InvalidHandle(e.0)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handle → value table. Clones share the same table.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<DashMap<Handle, Value>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `handle`; a later add for the same handle wins.
    pub fn add(&self, handle: Handle, value: Value) {
        trace!(%handle, kind = value.type_name(), "registry add");
        self.entries.insert(handle, value);
    }

    /// Mints a fresh handle for `value`.
    pub fn insert(&self, value: Value) -> Handle {
        let handle = Handle::mint();
        self.add(handle, value);
        handle
    }

    /// Forgets `handle`. Removing an unknown handle is not an error.
    pub fn remove(&self, handle: &Handle) {
        if self.entries.remove(handle).is_some() {
            trace!(%handle, "registry remove");
        }
    }

    pub fn get(&self, handle: &Handle) -> Result<Value> {
        self.entries
            .get(handle)
            .map(|entry| entry.value().clone())
            .ok_or(Error::HandleNotFound(*handle))
    }

    /// All or nothing: the first missing handle fails the whole lookup.
    pub fn get_many(&self, handles: &[Handle]) -> Result<Vec<Value>> {
        handles.iter().map(|h| self.get(h)).collect()
    }

    pub fn get_pairs(&self, pairs: &[(Handle, Handle)]) -> Result<Vec<(Value, Value)>> {
        pairs
            .iter()
            .map(|(a, b)| Ok((self.get(a)?, self.get(b)?)))
            .collect()
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.entries.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_attribute(&self, handle: &Handle, name: &str) -> Result<Value> {
        Ok(self.get(handle)?.get_member(name)?)
    }

    /// Assigns the object stored under `value` (not a copy of it).
    pub fn set_attribute(&self, handle: &Handle, name: &str, value: &Handle) -> Result<()> {
        let (target, value) = (self.get(handle)?, self.get(value)?);
        Ok(target.set_member(name, value)?)
    }

    pub fn has_attribute(&self, handle: &Handle, name: &str) -> Result<bool> {
        Ok(self.get(handle)?.has_member(name))
    }

    pub fn delete_attribute(&self, handle: &Handle, name: &str) -> Result<()> {
        Ok(self.get(handle)?.delete_member(name)?)
    }

    /// Calls the stored function with the stored list under `args`.
    pub fn invoke(&self, handle: &Handle, args: &Handle) -> Result<Value> {
        let target = self.get(handle)?;
        let Some(func) = target.as_function() else {
            return Err(Error::NotCallable(*handle));
        };
        let args = self.arguments(args)?;
        Ok(func.call(Value::Null, args)?)
    }

    /// Calls method `name` with the stored object as receiver.
    pub fn invoke_method(&self, handle: &Handle, name: &str, args: &Handle) -> Result<Value> {
        let target = self.get(handle)?;
        let args = self.arguments(args)?;
        Ok(target.call_method(name, args)?)
    }

    /// Compiles `code` as a function body and runs it immediately.
    ///
    /// Parameters, in order: the accessor `get`, the stored object under
    /// `receiver_param`, then every extra argument in the order given.
    pub fn evaluate(
        &self,
        handle: &Handle,
        code: &str,
        extra_args: Vec<(String, Value)>,
        receiver_param: &str,
    ) -> Result<Value> {
        let receiver = self.get(handle)?;
        let mut params = vec![ACCESSOR_PARAM.to_string(), receiver_param.to_string()];
        let mut args = vec![Value::Function(self.accessor()), receiver];
        for (name, value) in extra_args {
            params.push(name);
            args.push(value);
        }
        let func = bridgescript::compile(&params, code)?;
        Ok(func.call(Value::Null, args)?)
    }

    /// Runs `code` like `evaluate` without a receiver and registers the result.
    pub fn construct_and_add(&self, code: &str, extra_args: Vec<(String, Value)>) -> Result<Handle> {
        let mut params = vec![ACCESSOR_PARAM.to_string()];
        let mut args = vec![Value::Function(self.accessor())];
        for (name, value) in extra_args {
            params.push(name);
            args.push(value);
        }
        let func = bridgescript::compile(&params, code)?;
        let value = func.call(Value::Null, args)?;
        Ok(self.insert(value))
    }

    fn arguments(&self, handle: &Handle) -> Result<Vec<Value>> {
        match self.get(handle)? {
            Value::List(list) => Ok(list.to_vec()),
            _ => Err(Error::NotAList(*handle)),
        }
    }

    /// `get(handle)` for script code. Accepts the handle text or a
    /// `{"$handle": ..}` marker object.
    ///
    /// Holds the table weakly, since the accessor may itself end up stored in it.
    fn accessor(&self) -> Function {
        let entries: Weak<DashMap<Handle, Value>> = Arc::downgrade(&self.entries);
        Function::native(ACCESSOR_PARAM, move |_, args| {
            let id = match args.first() {
                Some(Value::Str(s)) => s.clone(),
                Some(Value::Object(marker)) => match marker.get(bridgewire::HANDLE_KEY) {
                    Some(Value::Str(s)) => s,
                    _ => return Err(ScriptError::type_error("get() expects a handle")),
                },
                _ => return Err(ScriptError::type_error("get() expects a handle")),
            };
            let handle = Handle::parse(&id).map_err(|e| ScriptError::type_error(e.to_string()))?;
            let entries = entries
                .upgrade()
                .ok_or_else(|| ScriptError::reference("registry is gone"))?;
            let value = entries.get(&handle).map(|entry| entry.value().clone());
            value.ok_or_else(|| {
                ScriptError::new("HandleNotFound", format!("No object is registered under handle {}", handle))
            })
        })
    }
}
