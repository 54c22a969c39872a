//! Tests for the interpreter and the live value model.

use crate::*;

fn params(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn eval(source: &str) -> Value {
    run(source, &Env::new()).expect("program failed")
}

fn eval_err(source: &str) -> ScriptError {
    run(source, &Env::new()).expect_err("program should fail")
}

// ============================================================================
//  EXPRESSIONS
// ============================================================================

#[test]
fn test_arithmetic_and_precedence() {
    assert_eq!(eval("return 1 + 2 * 3").as_number(), Some(7.0));
    assert_eq!(eval("return (1 + 2) * 3").as_number(), Some(9.0));
    assert_eq!(eval("return 7 % 4 - -1").as_number(), Some(4.0));
}

#[test]
fn test_string_concatenation() {
    assert_eq!(eval("return 'n=' + 3").as_str(), Some("n=3"));
    assert_eq!(eval("return 1.5 + 'x'").as_str(), Some("1.5x"));
}

#[test]
fn test_comparison_and_logic() {
    assert_eq!(eval("return 1 < 2 && 'a' < 'b'").as_bool(), Some(true));
    assert_eq!(eval("return null || 'fallback'").as_str(), Some("fallback"));
    assert_eq!(eval("return 0 && unreachable").as_number(), Some(0.0));
    assert_eq!(eval("return !''").as_bool(), Some(true));
}

#[test]
fn test_equality_is_identity_for_objects() {
    assert_eq!(eval("let a = {}; let b = a; return a == b").as_bool(), Some(true));
    assert_eq!(eval("return {} == {}").as_bool(), Some(false));
    assert_eq!(eval("return 'x' == 'x'").as_bool(), Some(true));
}

#[test]
fn test_type_error_on_bad_operands() {
    let err = eval_err("return {} - 1");
    assert_eq!(err.name, "TypeError");
}

#[test]
fn test_reference_error() {
    let err = eval_err("return missing + 1");
    assert_eq!(err.name, "ReferenceError");
    assert!(err.message.contains("missing"));
}

// ============================================================================
//  STATEMENTS
// ============================================================================

#[test]
fn test_while_and_compound_assignment() {
    let out = eval("let i = 0; let total = 0; while (i < 5) { total += i; i += 1 } return total");
    assert_eq!(out.as_number(), Some(10.0));
}

#[test]
fn test_if_else_chain() {
    let src = "let x = 5; if (x < 3) { return 'low' } else if (x < 10) { return 'mid' } else { return 'high' }";
    assert_eq!(eval(src).as_str(), Some("mid"));
}

#[test]
fn test_undeclared_assignment_lands_in_root() {
    let env = Env::new();
    run("function () { leaked = 42 }()", &env).unwrap();
    assert_eq!(env.lookup("leaked").and_then(|v| v.as_number()), Some(42.0));
}

#[test]
fn test_throw_object_keeps_name_and_message() {
    let err = eval_err("throw {name: 'ValueError', message: 'bad input'}");
    assert_eq!(err.name, "ValueError");
    assert_eq!(err.message, "bad input");
}

#[test]
fn test_throw_scalar() {
    let err = eval_err("throw 'boom'");
    assert_eq!(err.name, "Error");
    assert_eq!(err.message, "boom");
}

// ============================================================================
//  FUNCTIONS
// ============================================================================

#[test]
fn test_compile_binds_params_in_order() {
    let func = compile(&params(&["a", "b"]), "return a - b").unwrap();
    let out = func.call(Value::Null, vec![Value::from(10), Value::from(4)]).unwrap();
    assert_eq!(out.as_number(), Some(6.0));
}

#[test]
fn test_missing_args_are_null() {
    let func = compile(&params(&["a"]), "return a == null").unwrap();
    assert_eq!(func.call(Value::Null, vec![]).unwrap().as_bool(), Some(true));
}

#[test]
fn test_compile_rejects_bad_param_names() {
    let err = compile(&params(&["not valid"]), "return 1").unwrap_err();
    assert_eq!(err.name, "SyntaxError");
}

#[test]
fn test_closures_capture_environment() {
    let src = "
        let make = function (start) {
            let count = start;
            return function () { count += 1; return count; };
        };
        let next = make(10);
        next();
        return next();
    ";
    assert_eq!(eval(src).as_number(), Some(12.0));
}

#[test]
fn test_method_call_binds_this() {
    let src = "
        let counter = {n: 1};
        counter.bump = function (by) { this.n = this.n + by; return this.n; };
        return counter.bump(2);
    ";
    assert_eq!(eval(src).as_number(), Some(3.0));
}

#[test]
fn test_native_function_receives_receiver() {
    let env = Env::new();
    let obj = Object::new();
    obj.set("label", Value::from("widget"));
    obj.set(
        "describe",
        Value::Function(Function::native("describe", |this, args| {
            let label = this.get_member("label")?;
            Ok(Value::from(format!("{}:{}", label, args.len())))
        })),
    );
    env.define("obj", Value::Object(obj));

    let out = run("return obj.describe(1, 2)", &env).unwrap();
    assert_eq!(out.as_str(), Some("widget:2"));
}

#[test]
fn test_error_trace_records_frames() {
    let env = Env::new();
    let inner = compile_in(&env, Some("inner"), &[], "throw 'deep'").unwrap();
    env.define("inner", Value::Function(inner));
    let outer = compile_in(&env, Some("outer"), &[], "inner()").unwrap();

    let err = outer.call(Value::Null, vec![]).unwrap_err();
    assert_eq!(err.trace, vec!["inner".to_string(), "outer".to_string()]);
    assert!(err.trace_string().contains("at inner"));
}

#[test]
fn test_runaway_recursion_is_a_range_error() {
    let src = "let f = function () { return f() }; return f()";
    let err = eval_err(src);
    assert_eq!(err.name, "RangeError");
}

#[test]
fn test_calling_non_function() {
    let err = eval_err("let x = 3; x()");
    assert_eq!(err.name, "TypeError");
}

// ============================================================================
//  VALUES
// ============================================================================

#[test]
fn test_lists_are_shared_references() {
    let list = List::new(vec![Value::from(1)]);
    let env = Env::new();
    env.define("items", Value::List(list.clone()));

    run("items.push(2, 3); items[5] = 'end'", &env).unwrap();

    assert_eq!(list.len(), 6);
    assert!(list.get(3).unwrap().is_null());
    assert_eq!(list.get(5).unwrap().as_str(), Some("end"));
}

#[test]
fn test_length_and_indexing() {
    assert_eq!(eval("return [1, 2, 3].length").as_number(), Some(3.0));
    assert_eq!(eval("return 'hey'.length").as_number(), Some(3.0));
    assert_eq!(eval("return 'hey'[1]").as_str(), Some("e"));
    assert!(eval("return [1][9]").is_null());
}

#[test]
fn test_writing_far_past_the_end_is_a_range_error() {
    let err = eval_err("let a = []; a[1e15] = 1; return a");
    assert_eq!(err.name, "RangeError");

    let list = eval("let a = [1]; a[3] = 4; return a");
    assert_eq!(list.as_list().unwrap().len(), 4);
}

#[test]
fn test_member_access_on_null_fails() {
    let err = eval_err("let x = null; return x.y");
    assert_eq!(err.name, "TypeError");
}

#[test]
fn test_delete_member_semantics() {
    let obj = Value::object();
    obj.set_member("a", Value::from(1)).unwrap();
    obj.delete_member("a").unwrap();
    obj.delete_member("never-there").unwrap();
    assert!(!obj.has_member("a"));

    assert!(Value::from(3).delete_member("a").is_err());
}

#[test]
fn test_display_numbers() {
    assert_eq!(Value::from(15).to_string(), "15");
    assert_eq!(Value::from(0.25).to_string(), "0.25");
    assert_eq!(Value::list(vec![Value::from(1), Value::from("a")]).to_string(), "1,a");
}
