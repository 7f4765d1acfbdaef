//! UNION / INTERSECT / EXCEPT and raw text.

use super::Renderer;
use crate::ast::Query;
use crate::error::{Result, SqlGraphError};

impl Renderer<'_> {
    pub(crate) fn compound(&mut self, q: &Query) -> Result<String> {
        let mut parts = Vec::with_capacity(q.sub_queries().len());
        for sub in q.sub_queries() {
            parts.push(format!("({})", self.statement(sub)?));
        }
        let joiner = format!("{}{}{}", self.sep(), q.kind().name(), self.sep());
        Ok(parts.join(&joiner))
    }

    /// Stored text with each placeholder span replaced by its field's value.
    pub(crate) fn raw(&mut self, q: &Query) -> Result<String> {
        let raw = q
            .raw_text()
            .ok_or_else(|| SqlGraphError::render("Raw query without SQL text"))?;
        let mut placeholders: Vec<_> = raw.placeholders.iter().collect();
        placeholders.sort_by_key(|p| p.span.start);

        let mut out = String::with_capacity(raw.sql.len());
        let mut cursor = 0;
        for p in placeholders {
            let Some(before) = raw.sql.get(cursor..p.span.start) else {
                return Err(SqlGraphError::render("Overlapping raw text placeholders"));
            };
            out.push_str(before);
            out.push_str(&self.field(q, p.field)?);
            cursor = p.span.end;
        }
        out.push_str(raw.sql.get(cursor..).unwrap_or_default());
        Ok(out)
    }
}
