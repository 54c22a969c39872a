//! # Parser
//!
//! Turns source text into the syntax tree in `ast`. The grammar lives in
//! `grammar.pest`; operator precedence is resolved with pest's Pratt parser.

use std::sync::Arc;
use std::sync::LazyLock;

use pest::Parser;
use pest::iterators::Pair;
use pest::iterators::Pairs;
use pest::pratt_parser::Assoc;
use pest::pratt_parser::Op;
use pest::pratt_parser::PrattParser;
use pest_derive::Parser;

use crate::ast::AssignOp;
use crate::ast::BinaryOp;
use crate::ast::Expr;
use crate::ast::FunctionDef;
use crate::ast::Literal;
use crate::ast::Stmt;
use crate::ast::UnaryOp;
use crate::error::Result;
use crate::error::ScriptError;

#[derive(Parser)]
#[grammar = "grammar.pest"] // relative to src
struct ScriptParser;

static PRATT: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or, Assoc::Left))
        .op(Op::infix(Rule::and, Assoc::Left))
        .op(Op::infix(Rule::eq, Assoc::Left) | Op::infix(Rule::ne, Assoc::Left))
        .op(Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left))
        .op(Op::prefix(Rule::neg) | Op::prefix(Rule::not))
        .op(Op::postfix(Rule::call) | Op::postfix(Rule::member) | Op::postfix(Rule::index))
});

/// Parses a whole program (a sequence of statements).
pub fn parse_program(source: &str) -> Result<Vec<Stmt>> {
    let mut pairs = ScriptParser::parse(Rule::program, source)
        .map_err(|e| ScriptError::syntax(e.to_string()))?;

    let program = pairs
        .next()
        .ok_or_else(|| ScriptError::syntax("empty parse tree"))?;

    build_stmts(program.into_inner())
}

/// Parses `body` as the body of a function taking `params`.
pub fn parse_function(params: &[String], body: &str) -> Result<FunctionDef> {
    for param in params {
        if !is_identifier(param) {
            return Err(ScriptError::syntax(format!("invalid parameter name '{}'", param)));
        }
    }

    Ok(FunctionDef {
        params: params.to_vec(),
        body: parse_program(body)?,
    })
}

/// True when `name` can be bound as a variable or parameter.
pub fn is_identifier(name: &str) -> bool {
    ScriptParser::parse(Rule::ident, name)
        .map(|pairs| pairs.as_str() == name)
        .unwrap_or(false)
}

fn build_stmts(pairs: Pairs<Rule>) -> Result<Vec<Stmt>> {
    pairs
        .filter(|p| p.as_rule() != Rule::EOI)
        .map(build_stmt)
        .collect()
}

fn build_stmt(pair: Pair<Rule>) -> Result<Stmt> {
    let rule = pair.as_rule();
    let mut inner = pair.into_inner();

    match rule {
        Rule::let_stmt => {
            skip_keyword(&mut inner);
            let name = next(&mut inner)?.as_str().to_string();
            let init = inner.next().map(build_expr).transpose()?;
            Ok(Stmt::Let(name, init))
        }
        Rule::return_stmt => {
            skip_keyword(&mut inner);
            let value = inner.next().map(build_expr).transpose()?;
            Ok(Stmt::Return(value))
        }
        Rule::if_stmt => build_if(inner),
        Rule::while_stmt => {
            skip_keyword(&mut inner);
            let cond = build_expr(next(&mut inner)?)?;
            let body = build_stmts(next(&mut inner)?.into_inner())?;
            Ok(Stmt::While(cond, body))
        }
        Rule::throw_stmt => {
            skip_keyword(&mut inner);
            Ok(Stmt::Throw(build_expr(next(&mut inner)?)?))
        }
        Rule::block => Ok(Stmt::Block(build_stmts(inner)?)),
        Rule::assign_stmt => {
            let target = build_expr(next(&mut inner)?)?;
            let op = match next(&mut inner)?.as_str() {
                "+=" => AssignOp::Add,
                "-=" => AssignOp::Sub,
                _ => AssignOp::Set,
            };
            let value = build_expr(next(&mut inner)?)?;

            match target {
                Expr::Ident(_) | Expr::Member(..) | Expr::Index(..) => {}
                _ => return Err(ScriptError::syntax("invalid assignment target")),
            }
            Ok(Stmt::Assign(target, op, value))
        }
        Rule::expr_stmt => Ok(Stmt::Expr(build_expr(next(&mut inner)?)?)),
        other => Err(ScriptError::syntax(format!("unexpected {:?}", other))),
    }
}

fn build_if(mut inner: Pairs<Rule>) -> Result<Stmt> {
    skip_keyword(&mut inner);
    let cond = build_expr(next(&mut inner)?)?;
    let then = build_stmts(next(&mut inner)?.into_inner())?;

    let otherwise = match inner.next() {
        None => None,
        Some(_else_kw) => {
            let branch = next(&mut inner)?;
            match branch.as_rule() {
                Rule::if_stmt => Some(vec![build_if(branch.into_inner())?]),
                _ => Some(build_stmts(branch.into_inner())?),
            }
        }
    };

    Ok(Stmt::If(cond, then, otherwise))
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr> {
    PRATT
        .map_primary(build_primary)
        .map_prefix(|op, rhs| {
            let op = match op.as_rule() {
                Rule::neg => UnaryOp::Neg,
                _ => UnaryOp::Not,
            };
            Ok(Expr::Unary(op, Box::new(rhs?)))
        })
        .map_postfix(|lhs, op| {
            let lhs = Box::new(lhs?);
            match op.as_rule() {
                Rule::call => {
                    let args = op.into_inner().map(build_expr).collect::<Result<Vec<_>>>()?;
                    Ok(Expr::Call(lhs, args))
                }
                Rule::member => {
                    let name = op.into_inner().as_str().to_string();
                    Ok(Expr::Member(lhs, name))
                }
                _ => {
                    let index = build_expr(next(&mut op.into_inner())?)?;
                    Ok(Expr::Index(lhs, Box::new(index)))
                }
            }
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::or => BinaryOp::Or,
                Rule::and => BinaryOp::And,
                Rule::eq => BinaryOp::Eq,
                Rule::ne => BinaryOp::Ne,
                Rule::lt => BinaryOp::Lt,
                Rule::le => BinaryOp::Le,
                Rule::gt => BinaryOp::Gt,
                Rule::ge => BinaryOp::Ge,
                Rule::add => BinaryOp::Add,
                Rule::sub => BinaryOp::Sub,
                Rule::mul => BinaryOp::Mul,
                Rule::div => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            Ok(Expr::Binary(op, Box::new(lhs?), Box::new(rhs?)))
        })
        .parse(pair.into_inner())
}

fn build_primary(pair: Pair<Rule>) -> Result<Expr> {
    match pair.as_rule() {
        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .map(|n| Expr::Literal(Literal::Number(n)))
            .map_err(|e| ScriptError::syntax(format!("bad number '{}': {}", pair.as_str(), e))),
        Rule::string => Ok(Expr::Literal(Literal::Str(unescape(pair)?))),
        Rule::boolean => Ok(Expr::Literal(Literal::Bool(pair.as_str() == "true"))),
        Rule::null_lit => Ok(Expr::Literal(Literal::Null)),
        Rule::ident => Ok(Expr::Ident(pair.as_str().to_string())),
        Rule::expr => build_expr(pair),
        Rule::list_lit => {
            let items = pair.into_inner().map(build_expr).collect::<Result<Vec<_>>>()?;
            Ok(Expr::List(items))
        }
        Rule::object_lit => {
            let mut props = Vec::new();
            for prop in pair.into_inner() {
                let mut parts = prop.into_inner();
                let key = next(&mut parts)?;
                let key = match key.as_rule() {
                    Rule::string => unescape(key)?,
                    _ => key.as_str().to_string(),
                };
                props.push((key, build_expr(next(&mut parts)?)?));
            }
            Ok(Expr::Object(props))
        }
        Rule::function_lit => {
            let mut inner = pair.into_inner();
            skip_keyword(&mut inner);
            let params = next(&mut inner)?
                .into_inner()
                .map(|p| p.as_str().to_string())
                .collect();
            let body = build_stmts(next(&mut inner)?.into_inner())?;
            Ok(Expr::Function(Arc::new(FunctionDef { params, body })))
        }
        other => Err(ScriptError::syntax(format!("unexpected {:?}", other))),
    }
}

fn unescape(pair: Pair<Rule>) -> Result<String> {
    let raw = pair.into_inner().as_str();
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => return Err(ScriptError::syntax("dangling escape in string literal")),
        }
    }

    Ok(out)
}

fn skip_keyword(pairs: &mut Pairs<Rule>) {
    pairs.next();
}

fn next<'a>(pairs: &mut Pairs<'a, Rule>) -> Result<Pair<'a, Rule>> {
    pairs
        .next()
        .ok_or_else(|| ScriptError::syntax("truncated parse tree"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let stmts = parse_program("1 + 2 * 3").unwrap();
        let Stmt::Expr(Expr::Binary(BinaryOp::Add, _, rhs)) = &stmts[0] else {
            panic!("expected addition at the root, got {:?}", stmts);
        };
        assert!(matches!(**rhs, Expr::Binary(BinaryOp::Mul, _, _)));
    }

    #[test]
    fn test_method_call_shape() {
        let stmts = parse_program("obj.greet('hi');").unwrap();
        let Stmt::Expr(Expr::Call(callee, args)) = &stmts[0] else {
            panic!("expected a call, got {:?}", stmts);
        };
        assert!(matches!(**callee, Expr::Member(_, ref name) if name == "greet"));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_keyword_prefixed_identifiers() {
        let stmts = parse_program("let letter = 1; returned = letter").unwrap();
        assert!(matches!(&stmts[0], Stmt::Let(name, Some(_)) if name == "letter"));
        assert!(matches!(&stmts[1], Stmt::Assign(Expr::Ident(name), AssignOp::Set, _) if name == "returned"));
    }

    #[test]
    fn test_object_literal_statement() {
        let stmts = parse_program("return {x: 1, 'y z': [1, 2]}").unwrap();
        let Stmt::Return(Some(Expr::Object(props))) = &stmts[0] else {
            panic!("expected an object literal, got {:?}", stmts);
        };
        assert_eq!(props[0].0, "x");
        assert_eq!(props[1].0, "y z");
    }

    #[test]
    fn test_compound_assignment() {
        let stmts = parse_program("total += 2; total -= 1").unwrap();
        assert!(matches!(&stmts[0], Stmt::Assign(_, AssignOp::Add, _)));
        assert!(matches!(&stmts[1], Stmt::Assign(_, AssignOp::Sub, _)));
    }

    #[test]
    fn test_else_if_chain() {
        let stmts = parse_program("if (a) { b } else if (c) { d } else { e }").unwrap();
        let Stmt::If(_, _, Some(otherwise)) = &stmts[0] else {
            panic!("expected if/else, got {:?}", stmts);
        };
        assert!(matches!(&otherwise[0], Stmt::If(_, _, Some(_))));
    }

    #[test]
    fn test_string_escapes() {
        let stmts = parse_program(r#"return "a\"b\n""#).unwrap();
        let Stmt::Return(Some(Expr::Literal(Literal::Str(s)))) = &stmts[0] else {
            panic!("expected a string literal, got {:?}", stmts);
        };
        assert_eq!(s, "a\"b\n");
    }

    #[test]
    fn test_syntax_error() {
        let err = parse_program("return (1 +").unwrap_err();
        assert_eq!(err.name, "SyntaxError");
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_program("1 = 2").unwrap_err();
        assert_eq!(err.name, "SyntaxError");
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("self"));
        assert!(is_identifier("$handle"));
        assert!(!is_identifier("return"));
        assert!(!is_identifier("two words"));
        assert!(!is_identifier("9lives"));
    }
}
