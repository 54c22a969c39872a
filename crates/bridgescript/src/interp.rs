//! # Interpreter
//!
//! A tree-walking evaluator over `ast`. Environments are chains of frames;
//! closures capture the frame they were created in.
//!
//! No lock is held while a sub-expression is evaluated or a function runs,
//! so script code may freely re-enter shared objects and native functions.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::ast::AssignOp;
use crate::ast::BinaryOp;
use crate::ast::Expr;
use crate::ast::FunctionDef;
use crate::ast::Literal;
use crate::ast::Stmt;
use crate::ast::UnaryOp;
use crate::error;
use crate::error::Result;
use crate::error::ScriptError;
use crate::parser;
use crate::value::Function;
use crate::value::Object;
use crate::value::Value;
use crate::value::lock;

const MAX_CALL_DEPTH: usize = 32;

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct Frame {
    vars: Mutex<HashMap<String, Value>>,
    parent: Option<Env>,
}

/// A variable environment: one frame plus the chain of enclosing frames.
#[derive(Clone)]
pub struct Env(Arc<Frame>);

impl Env {
    /// A new root environment with no bindings.
    pub fn new() -> Self {
        Self(Arc::new(Frame {
            vars: Mutex::new(HashMap::new()),
            parent: None,
        }))
    }

    /// A new frame nested inside this one.
    pub fn child(&self) -> Self {
        Self(Arc::new(Frame {
            vars: Mutex::new(HashMap::new()),
            parent: Some(self.clone()),
        }))
    }

    /// Binds `name` in this frame, shadowing any outer binding.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        lock(&self.0.vars).insert(name.into(), value);
    }

    /// Resolves `name` through the frame chain.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut env = self;
        loop {
            if let Some(v) = lock(&env.0.vars).get(name) {
                return Some(v.clone());
            }
            env = env.0.parent.as_ref()?;
        }
    }

    /// True when `name` is bound in this frame (outer frames are not consulted).
    pub fn contains_local(&self, name: &str) -> bool {
        lock(&self.0.vars).contains_key(name)
    }

    /// Unbinds `name` from this frame, returning the old value.
    pub fn remove_local(&self, name: &str) -> Option<Value> {
        lock(&self.0.vars).remove(name)
    }

    /// Names bound in this frame.
    pub fn local_names(&self) -> Vec<String> {
        lock(&self.0.vars).keys().cloned().collect()
    }

    /// Rebinds the nearest existing `name`; unknown names land in the root frame.
    fn assign(&self, name: &str, value: Value) {
        let mut env = self;
        loop {
            {
                let mut vars = lock(&env.0.vars);
                if let Some(slot) = vars.get_mut(name) {
                    *slot = value;
                    return;
                }
            }
            match env.0.parent.as_ref() {
                Some(parent) => env = parent,
                None => {
                    env.define(name, value);
                    return;
                }
            }
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

enum Flow {
    Next,
    Return(Value),
}

/// Compiles `body` into an anonymous function over `params` with a fresh environment.
pub fn compile(params: &[String], body: &str) -> Result<Function> {
    compile_in(&Env::new(), None, params, body)
}

/// Compiles `body` into a function that closes over `env`.
pub fn compile_in(env: &Env, name: Option<&str>, params: &[String], body: &str) -> Result<Function> {
    let def = parser::parse_function(params, body)?;
    Ok(Function::script(name.map(str::to_string), Arc::new(def), env.clone()))
}

/// Runs a program directly in `env`. Returns the value of a top-level
/// `return`, or `null` when the program runs off the end.
pub fn run(source: &str, env: &Env) -> Result<Value> {
    let stmts = parser::parse_program(source)?;
    match exec_block(&stmts, env)? {
        Flow::Return(v) => Ok(v),
        Flow::Next => Ok(Value::Null),
    }
}

pub(crate) fn call_script(def: &FunctionDef, env: &Env, receiver: Value, args: Vec<Value>) -> Result<Value> {
    let depth = CALL_DEPTH.with(|d| d.get());
    if depth >= MAX_CALL_DEPTH {
        return Err(ScriptError::range("maximum call depth exceeded"));
    }

    let frame = env.child();
    frame.define("this", receiver);
    let mut args = args.into_iter();
    for param in &def.params {
        frame.define(param.clone(), args.next().unwrap_or_default());
    }

    CALL_DEPTH.with(|d| d.set(depth + 1));
    let result = exec_block(&def.body, &frame);
    CALL_DEPTH.with(|d| d.set(depth));

    match result? {
        Flow::Return(v) => Ok(v),
        Flow::Next => Ok(Value::Null),
    }
}

fn exec_block(stmts: &[Stmt], env: &Env) -> Result<Flow> {
    for stmt in stmts {
        if let Flow::Return(v) = exec_stmt(stmt, env)? {
            return Ok(Flow::Return(v));
        }
    }
    Ok(Flow::Next)
}

fn exec_stmt(stmt: &Stmt, env: &Env) -> Result<Flow> {
    match stmt {
        Stmt::Let(name, init) => {
            let value = match init {
                Some(expr) => eval(expr, env)?,
                None => Value::Null,
            };
            env.define(name.clone(), value);
        }
        Stmt::Assign(target, op, expr) => {
            let value = eval(expr, env)?;
            let value = match op {
                AssignOp::Set => value,
                AssignOp::Add => binary(BinaryOp::Add, eval(target, env)?, value)?,
                AssignOp::Sub => binary(BinaryOp::Sub, eval(target, env)?, value)?,
            };
            assign(target, value, env)?;
        }
        Stmt::Return(expr) => {
            let value = match expr {
                Some(expr) => eval(expr, env)?,
                None => Value::Null,
            };
            return Ok(Flow::Return(value));
        }
        Stmt::If(cond, then, otherwise) => {
            if eval(cond, env)?.truthy() {
                return exec_block(then, &env.child());
            } else if let Some(otherwise) = otherwise {
                return exec_block(otherwise, &env.child());
            }
        }
        Stmt::While(cond, body) => {
            while eval(cond, env)?.truthy() {
                if let Flow::Return(v) = exec_block(body, &env.child())? {
                    return Ok(Flow::Return(v));
                }
            }
        }
        Stmt::Throw(expr) => return Err(thrown(eval(expr, env)?)),
        Stmt::Block(stmts) => return exec_block(stmts, &env.child()),
        Stmt::Expr(expr) => {
            eval(expr, env)?;
        }
    }
    Ok(Flow::Next)
}

/// Thrown objects contribute their `name` and `message` attributes.
fn thrown(value: Value) -> ScriptError {
    match &value {
        Value::Object(o) => {
            let name = o.get("name").map(|v| v.to_string()).unwrap_or_else(|| error::ERROR.to_string());
            let message = o.get("message").map(|v| v.to_string()).unwrap_or_default();
            ScriptError::new(name, message)
        }
        other => ScriptError::new(error::ERROR, other.to_string()),
    }
}

fn assign(target: &Expr, value: Value, env: &Env) -> Result<()> {
    match target {
        Expr::Ident(name) => {
            env.assign(name, value);
            Ok(())
        }
        Expr::Member(base, name) => eval(base, env)?.set_member(name, value),
        Expr::Index(base, index) => {
            let base = eval(base, env)?;
            let index = eval(index, env)?;
            base.set_index(&index, value)
        }
        _ => Err(ScriptError::syntax("invalid assignment target")),
    }
}

fn eval(expr: &Expr, env: &Env) -> Result<Value> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => Value::Number(*n),
            Literal::Str(s) => Value::Str(s.clone()),
        }),
        Expr::Ident(name) => env
            .lookup(name)
            .ok_or_else(|| ScriptError::reference(format!("{} is not defined", name))),
        Expr::List(items) => {
            let items = items.iter().map(|e| eval(e, env)).collect::<Result<Vec<_>>>()?;
            Ok(Value::list(items))
        }
        Expr::Object(props) => {
            let object = Object::new();
            for (key, expr) in props {
                object.set(key.clone(), eval(expr, env)?);
            }
            Ok(Value::Object(object))
        }
        Expr::Function(def) => Ok(Value::Function(Function::script(None, def.clone(), env.clone()))),
        Expr::Unary(op, rhs) => {
            let rhs = eval(rhs, env)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!rhs.truthy())),
                UnaryOp::Neg => match rhs {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    other => Err(ScriptError::type_error(format!("cannot negate {}", other.type_name()))),
                },
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let lhs = eval(lhs, env)?;
            if lhs.truthy() { eval(rhs, env) } else { Ok(lhs) }
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let lhs = eval(lhs, env)?;
            if lhs.truthy() { Ok(lhs) } else { eval(rhs, env) }
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, env)?;
            let rhs = eval(rhs, env)?;
            binary(*op, lhs, rhs)
        }
        Expr::Member(base, name) => eval(base, env)?.get_member(name),
        Expr::Index(base, index) => {
            let base = eval(base, env)?;
            let index = eval(index, env)?;
            base.get_index(&index)
        }
        Expr::Call(callee, args) => {
            let args_of = |env: &Env| args.iter().map(|e| eval(e, env)).collect::<Result<Vec<_>>>();
            match callee.as_ref() {
                Expr::Member(base, name) => {
                    let receiver = eval(base, env)?;
                    receiver.call_method(name, args_of(env)?)
                }
                other => {
                    let func = eval(other, env)?;
                    func.call(Value::Null, args_of(env)?)
                }
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    use crate::value::Value::Number as N;

    match (op, &lhs, &rhs) {
        (BinaryOp::Eq, _, _) => Ok(Value::Bool(lhs.same(&rhs))),
        (BinaryOp::Ne, _, _) => Ok(Value::Bool(!lhs.same(&rhs))),

        (BinaryOp::Add, N(a), N(b)) => Ok(N(a + b)),
        (BinaryOp::Add, Value::Str(_), _) | (BinaryOp::Add, _, Value::Str(_)) => {
            Ok(Value::Str(format!("{}{}", lhs, rhs)))
        }
        (BinaryOp::Sub, N(a), N(b)) => Ok(N(a - b)),
        (BinaryOp::Mul, N(a), N(b)) => Ok(N(a * b)),
        (BinaryOp::Div, N(a), N(b)) => Ok(N(a / b)),
        (BinaryOp::Rem, N(a), N(b)) => Ok(N(a % b)),

        (BinaryOp::Lt, N(a), N(b)) => Ok(Value::Bool(a < b)),
        (BinaryOp::Le, N(a), N(b)) => Ok(Value::Bool(a <= b)),
        (BinaryOp::Gt, N(a), N(b)) => Ok(Value::Bool(a > b)),
        (BinaryOp::Ge, N(a), N(b)) => Ok(Value::Bool(a >= b)),
        (BinaryOp::Lt, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a < b)),
        (BinaryOp::Le, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a <= b)),
        (BinaryOp::Gt, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a > b)),
        (BinaryOp::Ge, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a >= b)),

        _ => Err(ScriptError::type_error(format!(
            "unsupported operand types for {:?}: {} and {}",
            op,
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}
