use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Data type of a literal, parameter or catalog column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueType {
    Boolean,
    Integer,
    Float,
    Text,
    Date,
    Timestamp,
    #[default]
    Unknown,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Integer => "int",
            ValueType::Float => "float",
            ValueType::Text => "text",
            ValueType::Date => "date",
            ValueType::Timestamp => "timestamp",
            ValueType::Unknown => "unknown",
        }
    }

    /// Whether a value of this type may be stored in a slot of type `self`.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (ValueType::Unknown, _) => true,
            (ValueType::Boolean, Value::Bool(_)) => true,
            (ValueType::Integer, Value::Int(_)) => true,
            (ValueType::Float, Value::Float(_) | Value::Int(_)) => true,
            (ValueType::Text, Value::Text(_)) => true,
            (ValueType::Date, Value::Date(_)) => true,
            (ValueType::Timestamp, Value::Timestamp(_) | Value::Date(_)) => true,
            (ty, Value::List(items)) => items.iter().all(|v| ty.accepts(v)),
            _ => false,
        }
    }

    /// Parse a textual value into this type. Unknown keeps the text as-is.
    pub fn parse_value(&self, text: &str) -> Option<Value> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("null") {
            return Some(Value::Null);
        }
        match self {
            ValueType::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "f" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            ValueType::Integer => text.parse().ok().map(Value::Int),
            ValueType::Float => text.parse().ok().map(Value::Float),
            ValueType::Text | ValueType::Unknown => Some(Value::Text(text.to_string())),
            ValueType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(Value::Date),
            ValueType::Timestamp => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
                .ok()
                .map(Value::Timestamp),
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => ValueType::Boolean,
            "int" | "integer" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "serial" => {
                ValueType::Integer
            }
            "float" | "float4" | "float8" | "real" | "double" | "numeric" | "decimal" => {
                ValueType::Float
            }
            "text" | "varchar" | "char" | "string" | "character varying" => ValueType::Text,
            "date" => ValueType::Date,
            "timestamp" | "datetime" | "timestamptz" => ValueType::Timestamp,
            "unknown" | "" => ValueType::Unknown,
            other => return Err(format!("unknown data type '{}'", other)),
        };
        Ok(ty)
    }
}

impl TryFrom<String> for ValueType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ValueType> for String {
    fn from(ty: ValueType) -> Self {
        ty.name().to_string()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A concrete SQL value held by a literal field or supplied for a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// Right-hand side of `IN`.
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Unknown,
            Value::Bool(_) => ValueType::Boolean,
            Value::Int(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::Date(_) => ValueType::Date,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::List(items) => items
                .iter()
                .map(Value::value_type)
                .find(|t| *t != ValueType::Unknown)
                .unwrap_or_default(),
        }
    }

    /// Render as an SQL literal, escaping embedded quotes.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{:.1}", n)
                } else {
                    n.to_string()
                }
            }
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            Value::Timestamp(t) => format!("'{}'", t.format("%Y-%m-%d %H:%M:%S")),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_sql_literal).collect();
                format!("({})", parts.join(", "))
            }
        }
    }

    /// Plain textual form, used in persisted trees and CLI output.
    pub fn to_text(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Timestamp(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
            other => other.to_sql_literal(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_literal())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_literal_escaping() {
        assert_eq!(Value::from("O'Brien").to_sql_literal(), "'O''Brien'");
        assert_eq!(Value::Null.to_sql_literal(), "NULL");
        assert_eq!(Value::Float(2.0).to_sql_literal(), "2.0");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Int(2)]).to_sql_literal(),
            "(1, 2)"
        );
    }

    #[test]
    fn test_type_names_are_lenient() {
        assert_eq!("int4".parse::<ValueType>().unwrap(), ValueType::Integer);
        assert_eq!("VARCHAR".parse::<ValueType>().unwrap(), ValueType::Text);
        assert!("blob".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_accepts() {
        assert!(ValueType::Integer.accepts(&Value::Int(3)));
        assert!(ValueType::Integer.accepts(&Value::Null));
        assert!(!ValueType::Integer.accepts(&Value::from("3")));
        assert!(ValueType::Float.accepts(&Value::Int(3)));
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(ValueType::Integer.parse_value("42"), Some(Value::Int(42)));
        assert_eq!(ValueType::Boolean.parse_value("yes"), Some(Value::Bool(true)));
        assert_eq!(
            ValueType::Date.parse_value("2024-02-29"),
            NaiveDate::from_ymd_opt(2024, 2, 29).map(Value::Date)
        );
        assert_eq!(ValueType::Integer.parse_value("x"), None);
    }
}
