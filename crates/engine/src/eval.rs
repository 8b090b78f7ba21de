use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use fancy_regex::Regex;
use qwery_parser::ast::{BinaryOp, CompareOp, Condition, Expression, Literal};

use crate::compile;
use crate::errors::{EngineError, Result};
use crate::scope::{Scope, VariableType};
use crate::values::Value;

/// Evaluate a value expression in a scope. Pure given the scope's row and
/// variables; aggregates are handled by the select operator and are illegal
/// here.
pub fn eval_expression(expr: &Expression, scope: &Scope) -> Result<Value> {
    match expr {
        Expression::Literal(literal) => Ok(literal_value(literal)),
        Expression::FieldRef(name) => field_value(name, scope),
        Expression::Qualified { table, column } => {
            let qualified = format!("{table}.{column}");
            match scope.field(&qualified) {
                Some(value) => Ok(value),
                None => field_value(column, scope),
            }
        }
        Expression::Wildcard => Err(EngineError::eval("'*' is only legal in projections")),
        Expression::Variable(name) => scope
            .variable(name)
            .ok_or_else(|| EngineError::eval(format!("Variable '@{name}' is not defined"))),
        Expression::Function { name, args } => call_function(name, args, scope),
        Expression::Aggregate { .. } => Err(EngineError::eval(
            "Aggregate functions require a grouped context",
        )),
        Expression::Binary { op, lhs, rhs } => {
            let lhs = eval_expression(lhs, scope)?;
            let rhs = eval_expression(rhs, scope)?;
            arithmetic_values(*op, lhs, rhs)
        }
        Expression::Neg(inner) => match eval_expression(inner, scope)? {
            Value::Null => Ok(Value::Null),
            Value::Int(v) => Ok(Value::Int(-v)),
            Value::Float(v) => Ok(Value::Float(-v)),
            other => Err(EngineError::eval(format!(
                "Cannot negate {}",
                other.type_name()
            ))),
        },
        Expression::Cast { expr, to } => {
            let value = eval_expression(expr, scope)?;
            cast_value(value, to)
        }
        Expression::Case {
            branches,
            otherwise,
        } => {
            for (cond, result) in branches {
                if eval_condition(cond, scope)? == Some(true) {
                    return eval_expression(result, scope);
                }
            }
            match otherwise {
                Some(result) => eval_expression(result, scope),
                None => Ok(Value::Null),
            }
        }
        Expression::Subquery(stmt) => {
            let registry = scope.registry();
            let exec = compile::compile_statement(stmt, &registry)?;
            let mut results = exec.execute(&scope.child())?;
            let first = results.next_row()?;
            results.close()?;
            Ok(first
                .and_then(|row| row.values().next().cloned())
                .unwrap_or(Value::Null))
        }
    }
}

/// Evaluate a condition with three-valued logic: `None` is UNKNOWN, and
/// only `Some(true)` passes a WHERE clause.
pub fn eval_condition(cond: &Condition, scope: &Scope) -> Result<Option<bool>> {
    match cond {
        Condition::And(lhs, rhs) => {
            let lhs = eval_condition(lhs, scope)?;
            if lhs == Some(false) {
                return Ok(Some(false));
            }
            let rhs = eval_condition(rhs, scope)?;
            Ok(match (lhs, rhs) {
                (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            })
        }
        Condition::Or(lhs, rhs) => {
            let lhs = eval_condition(lhs, scope)?;
            if lhs == Some(true) {
                return Ok(Some(true));
            }
            let rhs = eval_condition(rhs, scope)?;
            Ok(match (lhs, rhs) {
                (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            })
        }
        Condition::Not(inner) => Ok(eval_condition(inner, scope)?.map(|b| !b)),
        Condition::Compare { op, lhs, rhs } => {
            let lhs = eval_expression(lhs, scope)?;
            let rhs = eval_expression(rhs, scope)?;
            Ok(lhs.compare(&rhs).map(|ordering| match op {
                CompareOp::Eq => ordering.is_eq(),
                CompareOp::Ne => ordering.is_ne(),
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
            }))
        }
        Condition::Like { expr, pattern } => regex_test(expr, pattern, scope, true),
        Condition::RLike { expr, pattern } => regex_test(expr, pattern, scope, false),
        Condition::IsNull(expr) => Ok(Some(eval_expression(expr, scope)?.is_null())),
        Condition::IsNotNull(expr) => Ok(Some(!eval_expression(expr, scope)?.is_null())),
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(v) => Value::Bool(*v),
        Literal::Int(v) => Value::Int(*v),
        Literal::Float(v) => Value::Float(*v),
        Literal::Str(v) => Value::Str(v.clone()),
    }
}

/// Unknown fields surface as semantic errors at first evaluation rather
/// than silently reading NULL.
fn field_value(name: &str, scope: &Scope) -> Result<Value> {
    match scope.field(name) {
        Some(value) => Ok(value),
        None if !scope.has_current_row() => Err(EngineError::semantic(format!(
            "Field '{name}' referenced outside a row context"
        ))),
        None => Err(EngineError::semantic(format!("Unknown field '{name}'"))),
    }
}

fn regex_test(
    expr: &Expression,
    pattern: &Expression,
    scope: &Scope,
    like: bool,
) -> Result<Option<bool>> {
    let value = eval_expression(expr, scope)?;
    let pattern = eval_expression(pattern, scope)?;
    if value.is_null() || pattern.is_null() {
        return Ok(None);
    }
    let Value::Str(pattern) = pattern else {
        return Err(EngineError::eval(format!(
            "{} pattern must be a string",
            if like { "LIKE" } else { "RLIKE" },
        )));
    };
    let source = if like {
        like_to_regex(&pattern)
    } else {
        pattern.clone()
    };
    let regex = Regex::new(&source)
        .map_err(|e| EngineError::eval(format!("Invalid pattern '{pattern}': {e}")))?;
    let matched = regex
        .is_match(&value.to_string())
        .map_err(|e| EngineError::eval(format!("Pattern match failed: {e}")))?;
    Ok(Some(matched))
}

/// `%` matches any run, `_` a single character; everything else literally.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c if ".^$*+?()[]{}|\\".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    out
}

pub(crate) fn arithmetic_values(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    if op == BinaryOp::Concat {
        return Ok(Value::Str(format!("{lhs}{rhs}")));
    }

    if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
        let (a, b) = (*a, *b);
        return match op {
            BinaryOp::Add => Ok(Value::Int(a + b)),
            BinaryOp::Sub => Ok(Value::Int(a - b)),
            BinaryOp::Mul => Ok(Value::Int(a * b)),
            BinaryOp::Div => {
                if b == 0 {
                    Err(EngineError::eval("Division by zero"))
                } else if a % b == 0 {
                    Ok(Value::Int(a / b))
                } else {
                    Ok(Value::Float(a as f64 / b as f64))
                }
            }
            BinaryOp::Mod => {
                if b == 0 {
                    Err(EngineError::eval("Division by zero"))
                } else {
                    Ok(Value::Int(a % b))
                }
            }
            BinaryOp::Concat => unreachable!(),
        };
    }

    let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EngineError::eval(format!(
                "Cannot apply '{}' to {} and {}",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            )));
        }
    };
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div => {
            if b == 0.0 {
                Err(EngineError::eval("Division by zero"))
            } else {
                Ok(Value::Float(a / b))
            }
        }
        BinaryOp::Mod => Ok(Value::Float(a % b)),
        BinaryOp::Concat => unreachable!(),
    }
}

/// Cast to a declared type; failures are eval errors, never silent
/// coercions.
pub(crate) fn cast_value(value: Value, to: &str) -> Result<Value> {
    let target = VariableType::from_str(to)
        .map_err(|_| EngineError::eval(format!("Unknown cast type '{to}'")))?;
    if value.is_null() {
        return Ok(Value::Null);
    }
    let cast_error = |value: &Value| {
        EngineError::eval(format!(
            "Cannot cast {} '{value}' to {}",
            value.type_name(),
            target.as_ref()
        ))
    };
    match target {
        VariableType::String => Ok(Value::Str(value.to_string())),
        VariableType::Integer | VariableType::Long => match &value {
            Value::Int(v) => Ok(Value::Int(*v)),
            Value::Float(v) => Ok(Value::Int(*v as i64)),
            Value::Bool(v) => Ok(Value::Int(i64::from(*v))),
            Value::Str(v) => v
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .or_else(|_| v.trim().parse::<f64>().map(|f| Value::Int(f as i64)))
                .map_err(|_| cast_error(&value)),
            _ => Err(cast_error(&value)),
        },
        VariableType::Double => match &value {
            Value::Int(v) => Ok(Value::Float(*v as f64)),
            Value::Float(v) => Ok(Value::Float(*v)),
            Value::Str(v) => v
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| cast_error(&value)),
            _ => Err(cast_error(&value)),
        },
        VariableType::Boolean => match &value {
            Value::Bool(v) => Ok(Value::Bool(*v)),
            Value::Int(v) => Ok(Value::Bool(*v != 0)),
            Value::Str(v) if v.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::Str(v) if v.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(cast_error(&value)),
        },
        VariableType::Date => match &value {
            Value::Date(v) => Ok(Value::Date(*v)),
            Value::Str(v) => parse_date(v).ok_or_else(|| cast_error(&value)),
            _ => Err(cast_error(&value)),
        },
        VariableType::Binary => match value {
            Value::Bytes(v) => Ok(Value::Bytes(v)),
            Value::Str(v) => Ok(Value::Bytes(v.into_bytes())),
            other => Err(cast_error(&other)),
        },
    }
}

fn parse_date(text: &str) -> Option<Value> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(Value::Date(parsed.with_timezone(&Utc)));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Value::Date(DateTime::from_naive_utc_and_offset(
        midnight, Utc,
    )))
}

fn call_function(name: &str, args: &[Expression], scope: &Scope) -> Result<Value> {
    let values: Vec<Value> = args
        .iter()
        .map(|arg| eval_expression(arg, scope))
        .collect::<Result<_>>()?;

    let arity = |n: usize| {
        if values.len() == n {
            Ok(())
        } else {
            Err(EngineError::eval(format!(
                "{} expects {n} argument(s), got {}",
                name.to_uppercase(),
                values.len()
            )))
        }
    };
    let string_arg = |value: &Value| match value {
        Value::Null => Ok(None),
        Value::Str(v) => Ok(Some(v.clone())),
        other => Err(EngineError::eval(format!(
            "{} expects a string, got {}",
            name.to_uppercase(),
            other.type_name()
        ))),
    };

    match name.to_uppercase().as_str() {
        "UPPER" => {
            arity(1)?;
            Ok(string_arg(&values[0])?
                .map(|s| Value::Str(s.to_uppercase()))
                .unwrap_or(Value::Null))
        }
        "LOWER" => {
            arity(1)?;
            Ok(string_arg(&values[0])?
                .map(|s| Value::Str(s.to_lowercase()))
                .unwrap_or(Value::Null))
        }
        "TRIM" => {
            arity(1)?;
            Ok(string_arg(&values[0])?
                .map(|s| Value::Str(s.trim().to_string()))
                .unwrap_or(Value::Null))
        }
        "LEN" | "LENGTH" => {
            arity(1)?;
            Ok(string_arg(&values[0])?
                .map(|s| Value::Int(s.chars().count() as i64))
                .unwrap_or(Value::Null))
        }
        "SUBSTRING" => {
            if values.len() != 2 && values.len() != 3 {
                return Err(EngineError::eval("SUBSTRING expects 2 or 3 arguments"));
            }
            let Some(text) = string_arg(&values[0])? else {
                return Ok(Value::Null);
            };
            let start = values[1]
                .as_int()
                .ok_or_else(|| EngineError::eval("SUBSTRING start must be an integer"))?;
            let skip = (start.max(1) - 1) as usize;
            let chars = text.chars().skip(skip);
            let result: String = match values.get(2) {
                Some(len) => {
                    let len = len
                        .as_int()
                        .ok_or_else(|| EngineError::eval("SUBSTRING length must be an integer"))?;
                    chars.take(len.max(0) as usize).collect()
                }
                None => chars.collect(),
            };
            Ok(Value::Str(result))
        }
        "CONCAT" => {
            if values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            Ok(Value::Str(values.iter().map(Value::to_string).collect()))
        }
        "COALESCE" => Ok(values
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null)),
        "ABS" => {
            arity(1)?;
            match &values[0] {
                Value::Null => Ok(Value::Null),
                Value::Int(v) => Ok(Value::Int(v.abs())),
                Value::Float(v) => Ok(Value::Float(v.abs())),
                other => Err(EngineError::eval(format!(
                    "ABS expects a number, got {}",
                    other.type_name()
                ))),
            }
        }
        "ROUND" => {
            if values.len() != 1 && values.len() != 2 {
                return Err(EngineError::eval("ROUND expects 1 or 2 arguments"));
            }
            let Some(number) = values[0].as_f64() else {
                return if values[0].is_null() {
                    Ok(Value::Null)
                } else {
                    Err(EngineError::eval("ROUND expects a number"))
                };
            };
            let digits = match values.get(1) {
                Some(d) => d
                    .as_int()
                    .ok_or_else(|| EngineError::eval("ROUND digits must be an integer"))?,
                None => 0,
            };
            let factor = 10f64.powi(digits as i32);
            Ok(Value::Float((number * factor).round() / factor))
        }
        "NOW" => {
            arity(0)?;
            Ok(Value::Date(Utc::now()))
        }
        other => Err(EngineError::eval(format!("Unknown function '{other}'"))),
    }
}
