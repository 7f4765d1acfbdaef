//! # sqlgraph
//!
//! A mutable object model of SQL statements. A [`Query`](ast::Query) owns
//! targets, joins, fields and condition trees that refer to each other and to
//! an external [`Catalog`](catalog::Catalog) through deferred references. The
//! graph renders to SQL and can be rebuilt from SQL text.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use sqlgraph::prelude::*;
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(Dictionary::new().with_table("tbl", &["x", "y"]));
//! let query = sqlgraph::parse("SELECT t.x, t.y FROM tbl t WHERE t.x = 3", catalog)?;
//!
//! let sql = query.to_sql(&ParamContext::new())?;
//! // => "SELECT t.x, t.y FROM tbl AS t WHERE t.x = 3"
//! ```
//!
//! ## Layers
//!
//! | Module       | Role                                        |
//! |--------------|---------------------------------------------|
//! | `ast`        | statement graph, batching, GC, cloning      |
//! | `transpiler` | graph to SQL                                |
//! | `parser`     | SQL text to statement tree                  |
//! | `importer`   | statement tree to graph                     |
//! | `persist`    | JSON element tree                           |
//! | `engine`     | execution over sqlx                         |

pub mod ast;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod importer;
pub mod params;
pub mod parser;
pub mod persist;
pub mod transpiler;

use std::sync::Arc;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::catalog::{Catalog, Dictionary, Lookup};
    pub use crate::config::Config;
    pub use crate::engine::Connection;
    pub use crate::error::*;
    pub use crate::params::{ParamContext, ParamValue, Parameter};
    pub use crate::transpiler::{Placeholders, RenderOptions, ToSql};
}

/// Parse `sql` and import it into a fresh query over `catalog`.
///
/// Unlike [`Query::set_raw_text`](ast::Query::set_raw_text), text that fails
/// to parse or to import is an error here rather than a raw-text statement.
pub fn parse(
    sql: &str,
    catalog: Arc<dyn catalog::Catalog>,
) -> Result<ast::Query, error::SqlGraphError> {
    let stmt = parser::parse(sql)?;
    let mut query = ast::Query::new(catalog);
    importer::import(&mut query, &stmt)?;
    query.take_events();
    Ok(query)
}
