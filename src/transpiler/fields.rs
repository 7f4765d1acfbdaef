//! Field (expression) rendering.

use super::Renderer;
use crate::ast::{DeferredRef, FieldId, FieldKind, Handle, Literal, Query, QueryKind};
use crate::error::{Result, SqlGraphError};
use crate::params::ParamValue;

/// Whether DEFAULT is reported as [`SqlGraphError::DefaultValue`] instead of rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DefaultMode {
    Render,
    Report,
}

impl Renderer<'_> {
    pub(crate) fn field(&mut self, q: &Query, id: FieldId) -> Result<String> {
        self.field_in_mode(q, id, DefaultMode::Render)
    }

    pub(crate) fn field_in_mode(&mut self, q: &Query, id: FieldId, mode: DefaultMode) -> Result<String> {
        let field = q
            .field(id)
            .ok_or_else(|| SqlGraphError::not_active(format!("field {}", id)))?;
        match field.kind() {
            FieldKind::Column { target, column, .. } => {
                let name = self.ident(&column_name(q, column));
                if q.kind().is_modify() {
                    Ok(name)
                } else {
                    Ok(format!("{}.{}", self.target_alias(q, target)?, name))
                }
            }
            FieldKind::Wildcard { target } => Ok(format!("{}.*", self.target_alias(q, target)?)),
            FieldKind::Literal(lit) => self.literal(q, id, lit, mode),
            FieldKind::Call { function, args } => {
                let name = routine_name(q, function);
                let mut parts = Vec::with_capacity(args.len());
                for arg in args {
                    parts.push(self.field_ref(q, arg)?);
                }
                Ok(format!("{}({})", name, parts.join(", ")))
            }
            FieldKind::Aggregate { aggregate, arg } => {
                let name = routine_name(q, aggregate);
                let inner = match arg {
                    Some(r) => self.field_ref(q, r)?,
                    None => "*".to_string(),
                };
                Ok(format!("{}({})", name, inner))
            }
        }
    }

    /// A projection entry: the expression, then `AS alias` when set.
    pub(crate) fn projected(&mut self, q: &Query, id: FieldId) -> Result<String> {
        let sql = self.field(q, id)?;
        match q.field(id).and_then(|f| f.alias()) {
            Some(alias) => Ok(format!("{} AS {}", sql, self.ident(alias))),
            None => Ok(sql),
        }
    }

    fn field_ref(&mut self, q: &Query, r: &DeferredRef) -> Result<String> {
        match r.target() {
            Some(Handle::Field(owner, f)) if *owner == q.id() => self.field(q, *f),
            _ => Err(SqlGraphError::not_active(format!("field '{}'", r.key()))),
        }
    }

    fn target_alias(&self, q: &Query, r: &DeferredRef) -> Result<String> {
        match r.target() {
            Some(Handle::Target(owner, t)) if *owner == q.id() => q
                .target(*t)
                .map(|t| self.ident(&t.alias()))
                .ok_or_else(|| SqlGraphError::not_active(format!("target {}", t))),
            _ => Err(SqlGraphError::not_active(format!("target '{}'", r.key()))),
        }
    }

    fn literal(&mut self, q: &Query, id: FieldId, lit: &Literal, mode: DefaultMode) -> Result<String> {
        let value = if lit.is_parameter {
            let param = q
                .field_parameters(id)
                .into_iter()
                .next()
                .ok_or_else(|| SqlGraphError::not_active(format!("parameter {}", id)))?;
            match self.params.resolve(&param)? {
                ParamValue::Value(v) => return Ok(self.bind(v)),
                ParamValue::Default => None,
            }
        } else if lit.use_default {
            None
        } else {
            Some(lit.value.clone().unwrap_or(crate::ast::Value::Null))
        };
        match value {
            Some(v) => Ok(v.to_sql_literal()),
            None if mode == DefaultMode::Report => Err(SqlGraphError::DefaultValue),
            None if q.kind() == QueryKind::Select => Err(SqlGraphError::render(
                "DEFAULT can only be used in INSERT or UPDATE values",
            )),
            None => Ok("DEFAULT".to_string()),
        }
    }
}

/// Column name from the catalog, the sub-query's output name, or the lookup key.
pub(crate) fn column_name(q: &Query, column: &DeferredRef) -> String {
    match column.target() {
        Some(Handle::Column(c)) => q
            .catalog()
            .column(c)
            .map(|info| info.name)
            .unwrap_or_else(|| column.key().to_string()),
        Some(Handle::Field(sub, f)) => q
            .find_query(*sub)
            .and_then(|s| s.field(*f))
            .and_then(|f| f.alias().or(f.name()).map(str::to_string))
            .unwrap_or_else(|| column.key().to_string()),
        _ => column.key().to_string(),
    }
}

fn routine_name(q: &Query, r: &DeferredRef) -> String {
    match r.target() {
        Some(Handle::Function(f)) => q.catalog().function(f).map(|i| i.name),
        Some(Handle::Aggregate(a)) => q.catalog().aggregate(a).map(|i| i.name),
        _ => None,
    }
    .unwrap_or_else(|| r.key().to_string())
}
