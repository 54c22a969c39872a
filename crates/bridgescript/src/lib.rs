//! # bridgescript
//!
//! The live value model shared by both ends of a bridge, plus a small
//! JavaScript-flavoured expression language.
//!
//! The language exists for one job: letting a peer express an arbitrary
//! computation against a stored object without a fixed vocabulary of
//! operations. Code is compiled as a function body over named parameters
//! and invoked immediately:
//!
//! ```
//! use bridgescript::{compile, Object, Value};
//!
//! let obj = Object::new();
//! obj.set("x", Value::from(10));
//!
//! let params = ["self".to_string(), "extra".to_string()];
//! let func = compile(&params, "return self.x + extra").unwrap();
//! let out = func.call(Value::Null, vec![Value::Object(obj), Value::from(5)]).unwrap();
//! assert_eq!(out.as_number(), Some(15.0));
//! ```

pub mod ast;
pub mod error;
pub mod interp;
pub mod parser;
pub mod value;

pub use error::Result;
pub use error::ScriptError;
pub use interp::Env;
pub use interp::compile;
pub use interp::compile_in;
pub use interp::run;
pub use parser::is_identifier;
pub use value::Function;
pub use value::List;
pub use value::Object;
pub use value::Value;

#[cfg(test)]
mod tests;
