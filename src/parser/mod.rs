//! SQL parser using nom.
//!
//! Parses the SELECT / INSERT / UPDATE / DELETE subset the importer maps onto
//! a [`Query`](crate::ast::Query) graph, plus UNION / INTERSECT / EXCEPT.
//!
//! ```text
//! SELECT c.name, count(*) FROM customers c JOIN orders o ON o.customer_id = c.id
//! ─┬──── ───────┬──────── ─┬── ─────┬──── ──────────────┬──────────────────────
//!  │            │          │        │                   └── Join with ON
//!  │            │          │        └── Target with alias
//!  │            │          └── FROM list
//!  │            └── Projected fields
//!  └── Statement kind
//! ```
//!
//! Text the grammar rejects can still be kept verbatim; [`delimiter::scan`]
//! finds the `:name:type:` placeholders in it.

pub mod delimiter;
pub mod grammar;
pub mod tree;

#[cfg(test)]
mod tests;

pub use tree::*;

use crate::error::{Result, SqlGraphError};
use nom::Err as NomErr;

/// Parse one complete SQL statement. A trailing `;` is allowed.
pub fn parse(sql: &str) -> Result<Statement> {
    let lead = sql.len() - sql.trim_start().len();
    let trimmed = sql.trim();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    if trimmed.is_empty() {
        return Err(SqlGraphError::parse(lead, "Unexpected end of input"));
    }

    match grammar::statement(trimmed) {
        Ok((rest, stmt)) => {
            let rest_trimmed = rest.trim_start();
            if rest_trimmed.is_empty() {
                Ok(stmt)
            } else {
                Err(SqlGraphError::parse(
                    lead + trimmed.len() - rest_trimmed.len(),
                    format!("Unexpected trailing input: '{}'", rest_trimmed),
                ))
            }
        }
        Err(NomErr::Error(e)) | Err(NomErr::Failure(e)) => {
            if e.input.trim().is_empty() {
                Err(SqlGraphError::parse(lead + trimmed.len(), "Unexpected end of input"))
            } else {
                Err(SqlGraphError::parse(
                    lead + trimmed.len() - e.input.len(),
                    "Syntax error",
                ))
            }
        }
        Err(NomErr::Incomplete(_)) => Err(SqlGraphError::parse(
            lead + trimmed.len(),
            "Unexpected end of input",
        )),
    }
}
