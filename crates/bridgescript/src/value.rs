//! # Live Values
//!
//! The objects a runtime keeps alive on behalf of its peer.
//!
//! Lists and objects are reference types: cloning a `Value` clones the
//! reference, so every holder observes the same mutations. Scalars are
//! copied. Equality between reference types is identity.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use crate::ast::FunctionDef;
use crate::error::Result;
use crate::error::ScriptError;
use crate::interp;
use crate::interp::Env;

/// How deep `Display` descends into nested lists before eliding.
const DISPLAY_DEPTH: usize = 8;

/// Largest length a list may grow to by writing past its end.
pub const MAX_LIST_LEN: usize = 1 << 20;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(List),
    Object(Object),
    Function(Function),
}

impl Value {
    /// A fresh, empty object.
    pub fn object() -> Self {
        Value::Object(Object::new())
    }

    /// A fresh list holding `items`.
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(List::new(items))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(_) | Value::Object(_) | Value::Function(_) => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Loose equality: scalars by value, reference types by identity.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Reads a named member. Missing object attributes read as `null`.
    pub fn get_member(&self, name: &str) -> Result<Value> {
        match self {
            Value::Object(o) => Ok(o.get(name).unwrap_or_default()),
            Value::List(l) if name == "length" => Ok(Value::Number(l.len() as f64)),
            Value::Str(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Function(f) if name == "name" => {
                Ok(f.name().map(Value::from).unwrap_or_default())
            }
            Value::Null => Err(ScriptError::type_error(format!(
                "cannot read property '{}' of null",
                name
            ))),
            _ => Ok(Value::Null),
        }
    }

    pub fn set_member(&self, name: &str, value: Value) -> Result<()> {
        match self {
            Value::Object(o) => {
                o.set(name, value);
                Ok(())
            }
            other => Err(ScriptError::type_error(format!(
                "cannot set property '{}' on {}",
                name,
                other.type_name()
            ))),
        }
    }

    pub fn has_member(&self, name: &str) -> bool {
        match self {
            Value::Object(o) => o.contains(name),
            Value::List(_) | Value::Str(_) => name == "length",
            _ => false,
        }
    }

    /// Removes a named member. Removing an absent attribute is not an error;
    /// values without attributes refuse the deletion.
    pub fn delete_member(&self, name: &str) -> Result<()> {
        match self {
            Value::Object(o) => {
                o.remove(name);
                Ok(())
            }
            other => Err(ScriptError::type_error(format!(
                "cannot delete property '{}' of {}",
                name,
                other.type_name()
            ))),
        }
    }

    pub fn get_index(&self, index: &Value) -> Result<Value> {
        match (self, index) {
            (Value::List(l), Value::Number(n)) => Ok(list_slot(*n).and_then(|i| l.get(i)).unwrap_or_default()),
            (Value::Str(s), Value::Number(n)) => Ok(list_slot(*n)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::Str(c.to_string()))
                .unwrap_or_default()),
            (_, Value::Str(name)) => self.get_member(name),
            (base, index) => Err(ScriptError::type_error(format!(
                "cannot index {} with {}",
                base.type_name(),
                index.type_name()
            ))),
        }
    }

    pub fn set_index(&self, index: &Value, value: Value) -> Result<()> {
        match (self, index) {
            (Value::List(l), Value::Number(n)) => {
                let slot = list_slot(*n)
                    .ok_or_else(|| ScriptError::range(format!("invalid list index {}", n)))?;
                l.set(slot, value)
            }
            (_, Value::Str(name)) => self.set_member(name, value),
            (base, index) => Err(ScriptError::type_error(format!(
                "cannot index {} with {}",
                base.type_name(),
                index.type_name()
            ))),
        }
    }

    /// Calls the value with `receiver` bound as `this`.
    pub fn call(&self, receiver: Value, args: Vec<Value>) -> Result<Value> {
        match self {
            Value::Function(f) => f.call(receiver, args),
            other => Err(ScriptError::type_error(format!(
                "{} is not a function",
                other.type_name()
            ))),
        }
    }

    /// Looks up `name` on the value and calls it with the value as receiver.
    pub fn call_method(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        if let Value::List(list) = self {
            match name {
                "push" => {
                    for arg in args {
                        list.push(arg);
                    }
                    return Ok(Value::Number(list.len() as f64));
                }
                "pop" => return Ok(list.pop().unwrap_or_default()),
                _ => {}
            }
        }

        let member = self.get_member(name)?;
        match member {
            Value::Function(f) => f.call(self.clone(), args),
            other => Err(ScriptError::type_error(format!(
                "'{}' is not a function (found {})",
                name,
                other.type_name()
            ))),
        }
    }

    fn fmt_depth(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(l) => {
                if depth >= DISPLAY_DEPTH {
                    return write!(f, "[...]");
                }
                for (i, item) in l.to_vec().iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    item.fmt_depth(f, depth + 1)?;
                }
                Ok(())
            }
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function(func) => match func.name() {
                Some(name) => write!(f, "[function {}]", name),
                None => write!(f, "[function]"),
            },
        }
    }
}

fn list_slot(n: f64) -> Option<usize> {
    if n >= 0.0 && n.fract() == 0.0 {
        Some(n as usize)
    } else {
        None
    }
}

/// Integral numbers print without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_depth(f, 0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(_) => write!(f, "[{}]", self),
            Value::Object(o) => write!(f, "{{{}}}", o.keys().join(", ")),
            other => write!(f, "{}", other),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

/// Shared, mutable, ordered sequence.
#[derive(Clone, Default)]
pub struct List(Arc<Mutex<Vec<Value>>>);

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        Self(Arc::new(Mutex::new(items)))
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        lock(&self.0).get(index).cloned()
    }

    /// Writes a slot, growing the list with nulls when writing past the end.
    /// Growth stops at `MAX_LIST_LEN`.
    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        let mut items = lock(&self.0);
        if index >= items.len() {
            if index >= MAX_LIST_LEN {
                return Err(ScriptError::range(format!(
                    "list index {} exceeds the maximum length {}",
                    index, MAX_LIST_LEN
                )));
            }
            items.resize(index + 1, Value::Null);
        }
        items[index] = value;
        Ok(())
    }

    pub fn push(&self, value: Value) {
        lock(&self.0).push(value);
    }

    pub fn pop(&self) -> Option<Value> {
        lock(&self.0).pop()
    }

    /// Snapshot of the current items.
    pub fn to_vec(&self) -> Vec<Value> {
        lock(&self.0).clone()
    }

    pub fn ptr_eq(&self, other: &List) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Shared, mutable attribute map.
#[derive(Clone, Default)]
pub struct Object(Arc<Mutex<BTreeMap<String, Value>>>);

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        lock(&self.0).get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        lock(&self.0).insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        lock(&self.0).remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.0).contains_key(name)
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.0).keys().cloned().collect()
    }

    /// Snapshot of the current attributes.
    pub fn entries(&self) -> Vec<(String, Value)> {
        lock(&self.0)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl FromIterator<(String, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(Arc::new(Mutex::new(iter.into_iter().collect())))
    }
}

pub type NativeFn = dyn Fn(Value, Vec<Value>) -> Result<Value> + Send + Sync;

enum Callable {
    Native {
        name: String,
        func: Box<NativeFn>,
    },
    Script {
        name: Option<String>,
        def: Arc<FunctionDef>,
        env: Env,
    },
}

/// A callable value: either Rust code or a compiled script function.
#[derive(Clone)]
pub struct Function(Arc<Callable>);

impl Function {
    /// Wraps a Rust closure. The closure receives the receiver and the arguments.
    pub fn native<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(Callable::Native {
            name: name.into(),
            func: Box::new(func),
        }))
    }

    pub(crate) fn script(name: Option<String>, def: Arc<FunctionDef>, env: Env) -> Self {
        Self(Arc::new(Callable::Script { name, def, env }))
    }

    pub fn name(&self) -> Option<&str> {
        match self.0.as_ref() {
            Callable::Native { name, .. } => Some(name),
            Callable::Script { name, .. } => name.as_deref(),
        }
    }

    /// Parameter names of a script function; native functions report none.
    pub fn params(&self) -> &[String] {
        match self.0.as_ref() {
            Callable::Native { .. } => &[],
            Callable::Script { def, .. } => &def.params,
        }
    }

    pub fn call(&self, receiver: Value, args: Vec<Value>) -> Result<Value> {
        let frame = self.name().unwrap_or("<anonymous>");
        let result = match self.0.as_ref() {
            Callable::Native { func, .. } => func(receiver, args),
            Callable::Script { def, env, .. } => interp::call_script(def, env, receiver, args),
        };
        result.map_err(|e| e.with_frame(frame))
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Function").field(&self.name()).finish()
    }
}
