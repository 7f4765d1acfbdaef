//! SQL renderer for statement graphs.
//!
//! Converts a [`Query`] into SQL text after checking that it is well formed.

pub mod conditions;
pub mod dml;
pub mod fields;
pub mod select;
pub mod set_ops;
pub mod validate;


use crate::ast::{CondId, FieldId, Query, QueryKind, Value};
use crate::error::Result;
use crate::params::ParamContext;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How parameter values reach the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placeholders {
    /// Substitute values as SQL literals.
    #[default]
    Inline,
    /// Emit `$1, $2, ...` and collect the values in order.
    Positional,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOptions {
    pub placeholders: Placeholders,
    /// Quote every identifier, not only those that need it.
    pub quote_all: bool,
    /// Start each clause on its own line.
    pub pretty: bool,
}

impl RenderOptions {
    pub fn positional() -> Self {
        Self {
            placeholders: Placeholders::Positional,
            ..Self::default()
        }
    }
}

/// Trait for converting statement graphs to SQL.
pub trait ToSql {
    /// Render with default options.
    fn to_sql(&self, params: &ParamContext) -> Result<String> {
        self.to_sql_with_options(params, &RenderOptions::default())
    }

    fn to_sql_with_options(&self, params: &ParamContext, options: &RenderOptions)
    -> Result<String>;
}

impl ToSql for Query {
    fn to_sql_with_options(
        &self,
        params: &ParamContext,
        options: &RenderOptions,
    ) -> Result<String> {
        render(self, params, options)
    }
}

/// Validate `query` and render it to SQL.
pub fn render(query: &Query, params: &ParamContext, options: &RenderOptions) -> Result<String> {
    render_with_binds(query, params, options).map(|(sql, _)| sql)
}

/// Like [`render`], also returning the values bound to positional placeholders.
pub fn render_with_binds(
    query: &Query,
    params: &ParamContext,
    options: &RenderOptions,
) -> Result<(String, Vec<Value>)> {
    validate::check(query, params)?;
    let mut renderer = Renderer::new(params, options);
    let sql = renderer.statement(query)?;
    debug!(query = %query.id(), binds = renderer.binds.len(), "rendered statement");
    Ok((sql, renderer.binds))
}

/// Render one field as it appears inside an expression. The statement is not validated.
pub fn render_field(
    query: &Query,
    field: FieldId,
    params: &ParamContext,
    options: &RenderOptions,
) -> Result<String> {
    Renderer::new(params, options).field(query, field)
}

/// Render one condition subtree. The statement is not validated.
pub fn render_condition(
    query: &Query,
    cond: CondId,
    params: &ParamContext,
    options: &RenderOptions,
) -> Result<String> {
    Renderer::new(params, options).condition(query, cond)
}

/// Quote an identifier with double quotes when it needs it.
///
/// Plain lowercase names (`[a-z_][a-z0-9_]*`) stay bare unless `quote_all` is set.
pub fn quote_ident(name: &str, quote_all: bool) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain && !quote_all {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Rendering state shared by one statement and its sub-queries.
pub(crate) struct Renderer<'a> {
    pub(crate) params: &'a ParamContext,
    pub(crate) options: &'a RenderOptions,
    pub(crate) binds: Vec<Value>,
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(params: &'a ParamContext, options: &'a RenderOptions) -> Self {
        Self {
            params,
            options,
            binds: Vec::new(),
        }
    }

    pub(crate) fn ident(&self, name: &str) -> String {
        quote_ident(name, self.options.quote_all)
    }

    /// Clause separator: a space, or a newline in pretty mode.
    pub(crate) fn sep(&self) -> &'static str {
        if self.options.pretty { "\n" } else { " " }
    }

    pub(crate) fn bind(&mut self, value: Value) -> String {
        match self.options.placeholders {
            Placeholders::Inline => value.to_sql_literal(),
            Placeholders::Positional => {
                self.binds.push(value);
                format!("${}", self.binds.len())
            }
        }
    }

    pub(crate) fn statement(&mut self, query: &Query) -> Result<String> {
        match query.kind() {
            QueryKind::Select => self.select(query),
            QueryKind::Insert => self.insert(query),
            QueryKind::Update => self.update(query),
            QueryKind::Delete => self.delete(query),
            QueryKind::Union | QueryKind::Intersect | QueryKind::Except => self.compound(query),
            QueryKind::RawText => self.raw(query),
        }
    }
}
