//! # Registry Operations
//!
//! The standard operations through which a peer drives this runtime's
//! registry. Every result that is an object goes back as a fresh handle;
//! only `value` and `has_attr` return data.

use bridgescript::Value;
use bridgewire::Outcome;

use crate::dispatch;
use crate::dispatch::Args;
use crate::dispatch::DispatchBuilder;
use crate::dispatch::ErrorReporting;
use crate::handle::Handle;
use crate::marshal;
use crate::registry::Error;
use crate::registry::Registry;
use crate::registry::Result;

pub const ADD: &str = "add";
pub const CONSTRUCT: &str = "construct";
pub const REMOVE: &str = "remove";
pub const VALUE: &str = "value";
pub const GET_ATTR: &str = "get_attr";
pub const SET_ATTR: &str = "set_attr";
pub const HAS_ATTR: &str = "has_attr";
pub const DEL_ATTR: &str = "del_attr";
pub const CALL: &str = "call";
pub const CALL_METHOD: &str = "call_method";
pub const ACCESS: &str = "access";

/// Receiver parameter name used by `access` when the caller names none.
pub const DEFAULT_RECEIVER: &str = "obj";

type Handler = fn(&Registry, &Args) -> Result<serde_json::Value>;

const HANDLERS: &[(&str, Handler)] = &[
    (ADD, add),
    (CONSTRUCT, construct),
    (REMOVE, remove),
    (VALUE, value),
    (GET_ATTR, get_attr),
    (SET_ATTR, set_attr),
    (HAS_ATTR, has_attr),
    (DEL_ATTR, del_attr),
    (CALL, call),
    (CALL_METHOD, call_method),
    (ACCESS, access),
];

/// Registers the standard operations against `registry`.
pub fn install(
    mut builder: DispatchBuilder,
    registry: &Registry,
    reporting: ErrorReporting,
) -> dispatch::Result<DispatchBuilder> {
    for (name, handler) in HANDLERS {
        let registry = registry.clone();
        let handler = *handler;
        builder = builder.sync_operation(*name, move |args| -> Outcome {
            reporting.guard(name, handler(&registry, &args))
        })?;
    }
    Ok(builder)
}

fn new_handle(handle: Handle) -> serde_json::Value {
    serde_json::Value::String(handle.to_string())
}

fn add(registry: &Registry, args: &Args) -> Result<serde_json::Value> {
    let value = marshal::from_wire(arg(args, "value")?, registry)?;
    Ok(new_handle(registry.insert(value)))
}

fn construct(registry: &Registry, args: &Args) -> Result<serde_json::Value> {
    let code = str_arg(args, "code")?;
    let extra = extra_args(registry, args)?;
    Ok(new_handle(registry.construct_and_add(code, extra)?))
}

fn remove(registry: &Registry, args: &Args) -> Result<serde_json::Value> {
    registry.remove(&handle_arg(args, "handle")?);
    Ok(serde_json::Value::Null)
}

fn value(registry: &Registry, args: &Args) -> Result<serde_json::Value> {
    let value = registry.get(&handle_arg(args, "handle")?)?;
    Ok(marshal::to_wire(&value, registry))
}

fn get_attr(registry: &Registry, args: &Args) -> Result<serde_json::Value> {
    let value = registry.get_attribute(&handle_arg(args, "handle")?, str_arg(args, "name")?)?;
    Ok(new_handle(registry.insert(value)))
}

fn set_attr(registry: &Registry, args: &Args) -> Result<serde_json::Value> {
    let (handle, name, value) = (handle_arg(args, "handle")?, str_arg(args, "name")?, handle_arg(args, "value")?);
    registry.set_attribute(&handle, name, &value)?;
    Ok(serde_json::Value::Null)
}

fn has_attr(registry: &Registry, args: &Args) -> Result<serde_json::Value> {
    let present = registry.has_attribute(&handle_arg(args, "handle")?, str_arg(args, "name")?)?;
    Ok(serde_json::Value::Bool(present))
}

fn del_attr(registry: &Registry, args: &Args) -> Result<serde_json::Value> {
    registry.delete_attribute(&handle_arg(args, "handle")?, str_arg(args, "name")?)?;
    Ok(serde_json::Value::Null)
}

fn call(registry: &Registry, args: &Args) -> Result<serde_json::Value> {
    let value = registry.invoke(&handle_arg(args, "handle")?, &handle_arg(args, "args")?)?;
    Ok(new_handle(registry.insert(value)))
}

fn call_method(registry: &Registry, args: &Args) -> Result<serde_json::Value> {
    let (handle, name, call_args) = (handle_arg(args, "handle")?, str_arg(args, "name")?, handle_arg(args, "args")?);
    let value = registry.invoke_method(&handle, name, &call_args)?;
    Ok(new_handle(registry.insert(value)))
}

fn access(registry: &Registry, args: &Args) -> Result<serde_json::Value> {
    let handle = handle_arg(args, "handle")?;
    let code = str_arg(args, "code")?;
    let receiver = match args.get("receiver") {
        None | Some(serde_json::Value::Null) => DEFAULT_RECEIVER,
        Some(serde_json::Value::String(s)) => s.as_str(),
        Some(_) => return Err(Error::BadArguments("'receiver' must be a string".into())),
    };
    let extra = extra_args(registry, args)?;
    let value = registry.evaluate(&handle, code, extra, receiver)?;
    Ok(new_handle(registry.insert(value)))
}

fn arg<'a>(args: &'a Args, key: &str) -> Result<&'a serde_json::Value> {
    args.get(key)
        .ok_or_else(|| Error::BadArguments(format!("missing '{}'", key)))
}

fn str_arg<'a>(args: &'a Args, key: &str) -> Result<&'a str> {
    arg(args, key)?
        .as_str()
        .ok_or_else(|| Error::BadArguments(format!("'{}' must be a string", key)))
}

/// A handle argument, given either as handle text or as a marker.
fn handle_arg(args: &Args, key: &str) -> Result<Handle> {
    let value = arg(args, key)?;
    let id = bridgewire::as_handle_marker(value)
        .or_else(|| value.as_str())
        .ok_or_else(|| Error::BadArguments(format!("'{}' must be a handle", key)))?;
    Ok(Handle::parse(id)?)
}

/// The optional `args` object of `construct` and `access`, in key order.
fn extra_args(registry: &Registry, args: &Args) -> Result<Vec<(String, Value)>> {
    match args.get("args") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), marshal::from_wire(v, registry)?)))
            .collect(),
        Some(_) => Err(Error::BadArguments("'args' must be an object".into())),
    }
}
