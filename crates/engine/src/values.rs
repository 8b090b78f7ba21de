use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use smol_str::SmolStr;

/// The runtime value model. A closed sum type with a canonical type name,
/// used everywhere a cell, variable or literal is held.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(Vec<(SmolStr, Value)>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Double",
            Value::Str(_) => "String",
            Value::Bytes(_) => "Binary",
            Value::Date(_) => "Date",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view: integers widen to doubles.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Sniff a textual cell: integer, then double, then boolean, else
    /// string. Empty text reads as NULL.
    pub fn from_text(text: &str) -> Value {
        if text.is_empty() {
            return Value::Null;
        }
        if let Ok(value) = text.parse::<i64>() {
            return Value::Int(value);
        }
        if let Ok(value) = text.parse::<f64>() {
            return Value::Float(value);
        }
        if text.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if text.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
        Value::Str(text.to_string())
    }

    /// Comparison for conditions: `None` when either side is NULL or the
    /// kinds are not comparable. Numerics compare across Int/Float, and a
    /// numeric string compares against a number.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (a, b) if a.is_numeric() || b.is_numeric() => {
                let a = a.as_f64().or_else(|| a.as_str()?.trim().parse().ok())?;
                let b = b.as_f64().or_else(|| b.as_str()?.trim().parse().ok())?;
                a.partial_cmp(&b)
            }
            _ => None,
        }
    }

    /// Total order for sorting: NULL first, then booleans, numbers, dates,
    /// strings, and everything else by its rendering. Deterministic for any
    /// mix of kinds so ORDER BY never depends on input arrangement.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn rank(value: &Value) -> u8 {
            match value {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::Date(_) => 3,
                Value::Str(_) => 4,
                Value::Bytes(_) => 5,
                Value::Array(_) => 6,
                Value::Object(_) => 7,
            }
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (a, b) if rank(a) == 2 && rank(b) == 2 => {
                let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            (a, b) if rank(a) == rank(b) => a.to_string().cmp(&b.to_string()),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// One-line rendering used by DESCRIBE samples.
    pub fn sample_string(&self) -> String {
        let text = self.to_string();
        if text.contains('\n') {
            text.replace('\n', "\\n")
        } else {
            text
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Bytes(v) => write!(f, "0x{}", hex(v)),
            Value::Date(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Array(items) => {
                write!(f, "[{}]", items.iter().format(", "))
            }
            Value::Object(pairs) => {
                let rendered = pairs
                    .iter()
                    .format_with(", ", |(name, value), f| f(&format_args!("{name}: {value}")));
                write!(f, "{{{rendered}}}")
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn text_sniffing() {
        assert_eq!(Value::from_text("42"), Value::Int(42));
        assert_eq!(Value::from_text("4.5"), Value::Float(4.5));
        assert_eq!(Value::from_text("TRUE"), Value::Bool(true));
        assert_eq!(Value::from_text("XOM"), Value::Str("XOM".into()));
        assert_eq!(Value::from_text(""), Value::Null);
    }

    #[test]
    fn null_never_compares() {
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::Int(1).compare(&Value::Null), None);
    }

    #[test]
    fn numerics_compare_across_kinds() {
        assert_eq!(
            Value::Int(2).compare(&Value::Float(2.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Str("10".into()).compare(&Value::Int(9)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn sort_puts_null_first() {
        let mut values = vec![Value::Int(2), Value::Null, Value::Int(1)];
        values.sort_by(Value::sort_cmp);
        assert_eq!(values, vec![Value::Null, Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn type_names_are_canonical() {
        assert_eq!(Value::Float(1.0).type_name(), "Double");
        assert_eq!(Value::Str("x".into()).type_name(), "String");
        assert_eq!(Value::Null.type_name(), "Null");
    }
}
