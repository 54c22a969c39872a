//! A scope host for tests.
//!
//! Serves the scope operations over a bridge, with one script `Env` per
//! scope name. Not part of the public API.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use bridgescript::Env;
use bridgescript::Object;
use bridgescript::ScriptError;
use bridgescript::Value;
use bridgewire::ErrorDescriptor;
use bridgewire::Outcome;
use serde_json::json;

use crate::bridge::Bridge;
use crate::dispatch::Args;
use crate::marshal;
use crate::operations;
use crate::registry::Registry;
use crate::scope;
use crate::tracker::Tracker;
use crate::transport::Transport;

type HostResult<T> = std::result::Result<T, ScriptError>;

const OPS: &[&str] = &[
    scope::CREATE,
    scope::DESTROY,
    scope::EXEC,
    scope::W_EXEC,
    scope::DO_FUNC,
    scope::W_DO_FUNC,
    scope::MAKE_FUNC,
    scope::GET_VAR,
    scope::HAS_VAR,
    scope::DEL_VAR,
    scope::SET_VAR,
    scope::CALL,
    scope::W_CALL,
    operations::ADD,
    operations::VALUE,
    operations::REMOVE,
];

pub(crate) struct ScopeHost {
    namespaces: Mutex<HashMap<String, Env>>,
    created: AtomicUsize,
    registry: Registry,
    peer: OnceLock<Arc<Tracker>>,
}

impl ScopeHost {
    /// Starts a host bridge on `transport`. Of the registry operations only
    /// `add`, `value` and `remove` are served, since `call` means the scope call here.
    pub fn serve(transport: impl Transport) -> (Bridge, Arc<ScopeHost>) {
        let host = Arc::new(ScopeHost {
            namespaces: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
            registry: Registry::new(),
            peer: OnceLock::new(),
        });

        let mut builder = Bridge::builder()
            .name("scope-host")
            .registry(host.registry.clone())
            .without_registry_operations();
        for op in OPS {
            builder = builder.operation(*op, Self::spawn_op(host.clone(), *op));
        }

        let bridge = builder.build(transport).expect("scope host operations are distinct");
        let _ = host.peer.set(bridge.tracker().clone());
        (bridge, host)
    }

    fn spawn_op(host: Arc<ScopeHost>, op: &'static str) -> impl Fn(Args, crate::Completion) + Send + Sync + 'static {
        move |args, done| {
            let host = host.clone();
            tokio::spawn(async move {
                let outcome = match host.handle(op, args).await {
                    Ok(value) => Outcome::ok(value),
                    Err(e) => Outcome::err(ErrorDescriptor::new(&e.name, &e.message).with_trace(e.trace_string())),
                };
                done.complete(outcome);
            });
        }
    }

    pub fn has_scope(&self, id: &str) -> bool {
        self.namespaces.lock().unwrap().contains_key(id)
    }

    pub fn scope_count(&self) -> usize {
        self.namespaces.lock().unwrap().len()
    }

    async fn handle(&self, op: &str, args: Args) -> HostResult<serde_json::Value> {
        match op {
            scope::CREATE => self.create(&args),
            scope::DESTROY => {
                let id = text(&args, "id")?;
                let removed = self.namespaces.lock().unwrap().remove(id);
                match removed {
                    Some(_) => Ok(serde_json::Value::Null),
                    None => Err(ScriptError::new("KeyError", format!("'{}'", id))),
                }
            }
            scope::EXEC => {
                let params = self.copied(&args, "params")?;
                self.exec(&args, params)
            }
            scope::W_EXEC => {
                let params = self.unwrapped(&args, "params", flag(&args, "do_auto_convert")).await?;
                self.exec(&args, params)
            }
            scope::DO_FUNC => {
                let params = self.copied(&args, "params")?;
                self.do_func(&args, params)
            }
            scope::W_DO_FUNC => {
                let params = self.unwrapped(&args, "params", flag(&args, "do_auto_convert")).await?;
                self.do_func(&args, params)
            }
            scope::MAKE_FUNC => {
                let env = self.namespace(&args)?;
                let name = text(&args, "name")?;
                let params: Vec<String> = args
                    .get("params")
                    .and_then(|p| p.as_array())
                    .map(|p| p.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                let func = bridgescript::compile_in(&env, Some(name), &params, text(&args, "code")?)?;
                env.define(name, Value::Function(func.clone()));
                Ok(marshal::to_wire(&Value::Function(func), &self.registry))
            }
            scope::GET_VAR => {
                let env = self.namespace(&args)?;
                let name = text(&args, "name")?;
                let value = env.lookup(name).ok_or_else(|| undefined(name))?;
                Ok(marshal::to_wire(&value, &self.registry))
            }
            scope::HAS_VAR => {
                let env = self.namespace(&args)?;
                Ok(json!(env.contains_local(text(&args, "name")?)))
            }
            scope::DEL_VAR => {
                let env = self.namespace(&args)?;
                let name = text(&args, "name")?;
                env.remove_local(name).ok_or_else(|| undefined(name))?;
                Ok(serde_json::Value::Null)
            }
            scope::SET_VAR => {
                let env = self.namespace(&args)?;
                let value = args.get("value").cloned().unwrap_or_default();
                env.define(text(&args, "name")?, self.from_wire(&value)?);
                Ok(serde_json::Value::Null)
            }
            scope::CALL => {
                let positional = self.copied_list(&args, "args")?;
                let keywords = self.copied(&args, "kwargs")?;
                self.call(&args, positional, keywords)
            }
            scope::W_CALL => {
                let auto_convert = flag(&args, "auto_convert");
                let mut positional = Vec::new();
                for marker in args.get("args").and_then(|a| a.as_array()).into_iter().flatten() {
                    positional.push(self.unwrap_marker(marker, auto_convert).await?);
                }
                let keywords = self.unwrapped(&args, "kwargs", auto_convert).await?;
                self.call(&args, positional, keywords)
            }
            operations::ADD => {
                let value = self.from_wire(args.get("value").unwrap_or(&serde_json::Value::Null))?;
                Ok(json!(self.registry.insert(value)))
            }
            operations::VALUE => {
                let handle = self.handle_arg(&args)?;
                let value = self.registry.get(&handle).map_err(registry_error)?;
                Ok(marshal::to_wire(&value, &self.registry))
            }
            operations::REMOVE => {
                self.registry.remove(&self.handle_arg(&args)?);
                Ok(serde_json::Value::Null)
            }
            other => Err(ScriptError::new("UnknownOperation", other)),
        }
    }

    fn create(&self, args: &Args) -> HostResult<serde_json::Value> {
        let allow_new = flag(args, "allow_new");
        let requested = args.get("id").and_then(|v| v.as_str());
        let mut namespaces = self.namespaces.lock().unwrap();

        let (name, is_new) = match (requested, allow_new) {
            (Some(id), false) => match namespaces.contains_key(id) {
                true => (id.to_string(), false),
                false => return Err(ScriptError::new("KeyError", format!("'{}'", id))),
            },
            (None, false) => return Err(ScriptError::new("KeyError", "no scope named")),
            (Some(id), true) => (id.to_string(), !namespaces.contains_key(id)),
            (None, true) => {
                let n = self.created.fetch_add(1, Ordering::Relaxed);
                (format!("n-py{}", n), true)
            }
        };
        if is_new {
            namespaces.insert(name.clone(), Env::new());
        }
        Ok(json!({"name": name, "is_new": is_new}))
    }

    fn exec(&self, args: &Args, params: Vec<(String, Value)>) -> HostResult<serde_json::Value> {
        let env = self.namespace(args)?;
        for (name, value) in params {
            env.define(name, value);
        }
        let returned = bridgescript::run(text(args, "code")?, &env)?;
        let value = match args.get("ret_name").and_then(|v| v.as_str()) {
            Some(name) => env.lookup(name).ok_or_else(|| undefined(name))?,
            None => returned,
        };
        Ok(marshal::to_wire(&value, &self.registry))
    }

    fn do_func(&self, args: &Args, params: Vec<(String, Value)>) -> HostResult<serde_json::Value> {
        let env = self.namespace(args)?;
        let (names, values): (Vec<String>, Vec<Value>) = params.into_iter().unzip();
        let func = bridgescript::compile_in(&env, None, &names, text(args, "code")?)?;
        let value = func.call(Value::Null, values)?;
        Ok(marshal::to_wire(&value, &self.registry))
    }

    /// Binds keyword arguments to parameters by name, after the positional ones.
    fn call(
        &self,
        args: &Args,
        mut positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> HostResult<serde_json::Value> {
        let env = self.namespace(args)?;
        let name = text(args, "name")?;
        let target = env.lookup(name).ok_or_else(|| undefined(name))?;
        let Some(func) = target.as_function() else {
            return Err(ScriptError::type_error(format!("'{}' is not a function", name)));
        };

        let mut keywords: HashMap<String, Value> = keywords.into_iter().collect();
        for param in func.params().iter().skip(positional.len()) {
            positional.push(keywords.remove(param).unwrap_or_default());
        }
        if let Some(extra) = keywords.keys().next() {
            return Err(ScriptError::type_error(format!("unexpected keyword argument '{}'", extra)));
        }
        let value = func.call(Value::Null, positional)?;
        Ok(marshal::to_wire(&value, &self.registry))
    }

    fn namespace(&self, args: &Args) -> HostResult<Env> {
        let id = text(args, "id")?;
        self.namespaces
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ScriptError::new("KeyError", format!("'{}'", id)))
    }

    fn from_wire(&self, value: &serde_json::Value) -> HostResult<Value> {
        marshal::from_wire(value, &self.registry).map_err(registry_error)
    }

    fn copied(&self, args: &Args, key: &str) -> HostResult<Vec<(String, Value)>> {
        let Some(map) = args.get(key).and_then(|v| v.as_object()) else {
            return Ok(Vec::new());
        };
        map.iter()
            .map(|(k, v)| Ok((k.clone(), self.from_wire(v)?)))
            .collect()
    }

    fn copied_list(&self, args: &Args, key: &str) -> HostResult<Vec<Value>> {
        args.get(key)
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .map(|v| self.from_wire(v))
            .collect()
    }

    async fn unwrapped(&self, args: &Args, key: &str, auto_convert: bool) -> HostResult<Vec<(String, Value)>> {
        let Some(map) = args.get(key).and_then(|v| v.as_object()) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(map.len());
        for (name, marker) in map {
            out.push((name.clone(), self.unwrap_marker(marker, auto_convert).await?));
        }
        Ok(out)
    }

    /// A peer handle becomes a `{"$handle": ..}` proxy object, or, with
    /// `auto_convert`, the primitive it names.
    async fn unwrap_marker(&self, marker: &serde_json::Value, auto_convert: bool) -> HostResult<Value> {
        let Some(id) = bridgewire::as_handle_marker(marker) else {
            return Err(ScriptError::type_error(format!("expected a handle marker, got {}", marker)));
        };
        if auto_convert {
            let peer = self
                .peer
                .get()
                .ok_or_else(|| ScriptError::new("Error", "host is not connected"))?;
            let value = peer
                .issue(operations::VALUE, json!({"handle": id}).as_object().cloned().unwrap_or_default())
                .await
                .map_err(|e| ScriptError::new("Error", e.to_string()))?;
            match value {
                serde_json::Value::Bool(_) | serde_json::Value::Number(_) | serde_json::Value::String(_) => {
                    return self.from_wire(&value);
                }
                _ => {}
            }
        }
        let proxy = Object::new();
        proxy.set(bridgewire::HANDLE_KEY, Value::from(id));
        Ok(Value::Object(proxy))
    }

    fn handle_arg(&self, args: &Args) -> HostResult<crate::Handle> {
        crate::Handle::parse(text(args, "handle")?).map_err(|e| ScriptError::type_error(e.to_string()))
    }
}

fn text<'a>(args: &'a Args, key: &str) -> HostResult<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ScriptError::type_error(format!("'{}' must be a string", key)))
}

fn flag(args: &Args, key: &str) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn undefined(name: &str) -> ScriptError {
    ScriptError::reference(format!("{} is not defined", name))
}

fn registry_error(e: crate::registry::Error) -> ScriptError {
    ScriptError::new(e.name(), e.message())
}
