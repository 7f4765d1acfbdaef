//! Statement parameters and the values supplied for them at render time.

use crate::ast::{FieldId, QueryId, Value, ValueType};
use crate::error::{Result, SqlGraphError};
use std::collections::BTreeMap;

/// A value the caller must (or may) supply before a statement renders.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Declared name, or the field's stable id (`QU1:QF2`) when unnamed.
    pub name: String,
    pub query: QueryId,
    pub field: FieldId,
    pub value_type: ValueType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl Parameter {
    /// Whether rendering can proceed without a value in the context.
    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Value(Value),
    /// Render the SQL `DEFAULT` keyword.
    Default,
}

/// Values bound to parameter names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamContext {
    values: BTreeMap<String, ParamValue>,
}

impl ParamContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values
            .insert(name.to_string(), ParamValue::Value(value.into()));
    }

    pub fn set_default(&mut self, name: &str) {
        self.values.insert(name.to_string(), ParamValue::Default);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse `name=value` pairs, typing each value by its parameter.
    pub fn parse_assignments<'a>(
        params: &[Parameter],
        pairs: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let mut ctx = Self::new();
        for pair in pairs {
            let (name, raw) = pair.split_once('=').ok_or_else(|| {
                SqlGraphError::render(format!("Expected name=value, got '{}'", pair))
            })?;
            let value_type = params
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.value_type)
                .unwrap_or_default();
            if raw.eq_ignore_ascii_case("default") {
                ctx.set_default(name);
                continue;
            }
            let value = value_type
                .parse_value(raw)
                .ok_or_else(|| SqlGraphError::render(format!("Invalid parameter '{}'", name)))?;
            ctx.set(name, value);
        }
        Ok(ctx)
    }

    /// The value to render for `param`: supplied value, else its default.
    pub fn resolve(&self, param: &Parameter) -> Result<ParamValue> {
        match self.values.get(&param.name) {
            Some(ParamValue::Default) => Ok(ParamValue::Default),
            Some(ParamValue::Value(v)) => {
                if v.is_null() {
                    if !param.nullable {
                        return Err(invalid(param));
                    }
                } else if !param.value_type.accepts(v) {
                    return Err(invalid(param));
                }
                Ok(ParamValue::Value(v.clone()))
            }
            None => param
                .default
                .clone()
                .map(ParamValue::Value)
                .ok_or_else(|| {
                    SqlGraphError::render(format!("Missing parameter '{}'", param.name))
                }),
        }
    }

    /// Check every parameter without rendering.
    pub fn check(&self, params: &[Parameter]) -> Result<()> {
        for p in params {
            self.resolve(p)?;
        }
        Ok(())
    }
}

fn invalid(param: &Parameter) -> SqlGraphError {
    SqlGraphError::render(format!("Invalid parameter '{}'", param.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn param(name: &str, value_type: ValueType) -> Parameter {
        Parameter {
            name: name.to_string(),
            query: QueryId::next(),
            field: FieldId(1),
            value_type,
            nullable: true,
            default: None,
            description: None,
        }
    }

    #[test]
    fn test_missing_parameter() {
        let err = ParamContext::new()
            .check(&[param("age", ValueType::Integer)])
            .unwrap_err();
        assert_eq!(err.to_string(), "Render error: Missing parameter 'age'");
    }

    #[test]
    fn test_default_fills_missing() {
        let mut p = param("age", ValueType::Integer);
        p.default = Some(Value::Int(18));
        assert_eq!(
            ParamContext::new().resolve(&p).unwrap(),
            ParamValue::Value(Value::Int(18))
        );
    }

    #[test]
    fn test_wrong_type_is_invalid() {
        let ctx = ParamContext::new().with("age", "old");
        assert!(ctx.check(&[param("age", ValueType::Integer)]).is_err());
    }

    #[test]
    fn test_null_for_not_null() {
        let mut p = param("age", ValueType::Integer);
        p.nullable = false;
        let ctx = ParamContext::new().with("age", Value::Null);
        assert!(ctx.check(&[p]).is_err());
    }

    #[test]
    fn test_parse_assignments_types_values() {
        let params = [param("age", ValueType::Integer), param("name", ValueType::Text)];
        let ctx = ParamContext::parse_assignments(&params, ["age=42", "name=bob"]).unwrap();
        assert_eq!(ctx.get("age"), Some(&ParamValue::Value(Value::Int(42))));
        assert_eq!(ctx.get("name"), Some(&ParamValue::Value(Value::Text("bob".into()))));
    }
}
