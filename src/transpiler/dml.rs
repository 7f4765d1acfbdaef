//! INSERT, UPDATE and DELETE generation.

use super::Renderer;
use super::fields::{DefaultMode, column_name};
use crate::ast::{FieldKind, Query};
use crate::error::{Result, SqlGraphError};

impl Renderer<'_> {
    fn modified_table(&self, q: &Query) -> Result<String> {
        let target = q
            .targets()
            .first()
            .ok_or_else(|| SqlGraphError::render(format!("{} without a target", q.kind().name())))?;
        let name = target
            .table()
            .and_then(|t| q.catalog().table(t))
            .map(|t| t.name)
            .unwrap_or_else(|| target.entity_name().to_string());
        Ok(self.ident(&name))
    }

    fn where_clause(&mut self, q: &Query, sql: &mut String) -> Result<()> {
        if let Some(root) = q.where_condition() {
            let cond = self.condition(q, root)?;
            sql.push_str(self.sep());
            sql.push_str("WHERE ");
            sql.push_str(&cond);
        }
        Ok(())
    }

    /// Visible column fields of a modification query, in order.
    fn assigned_columns<'q>(&self, q: &'q Query) -> Vec<&'q crate::ast::Field> {
        q.visible_fields()
            .filter(|f| matches!(f.kind(), FieldKind::Column { .. }))
            .collect()
    }

    pub(crate) fn insert(&mut self, q: &Query) -> Result<String> {
        let table = self.modified_table(q)?;
        let columns = self.assigned_columns(q);

        if let [sub] = q.sub_queries() {
            let names: Vec<String> = columns
                .iter()
                .map(|f| match f.kind() {
                    FieldKind::Column { column, .. } => self.ident(&column_name(q, column)),
                    _ => String::new(),
                })
                .collect();
            let select = self.statement(sub)?;
            let cols = if names.is_empty() {
                String::new()
            } else {
                format!(" ({})", names.join(", "))
            };
            return Ok(format!("INSERT INTO {}{}{}{}", table, cols, self.sep(), select));
        }

        let mut names = Vec::new();
        let mut values = Vec::new();
        for field in columns {
            let FieldKind::Column { column, .. } = field.kind() else { continue };
            let provider = field.value_provider().ok_or_else(|| {
                SqlGraphError::render(format!(
                    "Insert: column '{}' has no value",
                    column_name(q, column)
                ))
            })?;
            match self.field_in_mode(q, provider, DefaultMode::Report) {
                Ok(value) => {
                    names.push(self.ident(&column_name(q, column)));
                    values.push(value);
                }
                Err(SqlGraphError::DefaultValue) => continue,
                Err(e) => return Err(e),
            }
        }
        if names.is_empty() {
            return Ok(format!("INSERT INTO {} DEFAULT VALUES", table));
        }
        Ok(format!(
            "INSERT INTO {} ({}){}VALUES ({})",
            table,
            names.join(", "),
            self.sep(),
            values.join(", ")
        ))
    }

    pub(crate) fn update(&mut self, q: &Query) -> Result<String> {
        let table = self.modified_table(q)?;
        let mut sets = Vec::new();
        for field in self.assigned_columns(q) {
            let FieldKind::Column { column, .. } = field.kind() else { continue };
            let provider = field.value_provider().ok_or_else(|| {
                SqlGraphError::render(format!(
                    "Update: column '{}' has no value",
                    column_name(q, column)
                ))
            })?;
            let value = self.field(q, provider)?;
            sets.push(format!("{} = {}", self.ident(&column_name(q, column)), value));
        }
        if sets.is_empty() {
            return Err(SqlGraphError::render("Update: no column to set"));
        }
        let mut sql = format!("UPDATE {}{}SET {}", table, self.sep(), sets.join(", "));
        self.where_clause(q, &mut sql)?;
        Ok(sql)
    }

    pub(crate) fn delete(&mut self, q: &Query) -> Result<String> {
        let mut sql = format!("DELETE FROM {}", self.modified_table(q)?);
        self.where_clause(q, &mut sql)?;
        Ok(sql)
    }
}
