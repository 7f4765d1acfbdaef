//! `sqlgraph.toml` loading.
//!
//! ```toml
//! [database]
//! url = "postgres://localhost/shop"
//!
//! [render]
//! placeholders = "positional"
//!
//! [[tables]]
//! name = "customers"
//! columns = [{ name = "id", type = "int", nullable = false }, { name = "name", type = "text" }]
//!
//! [[tables]]
//! name = "orders"
//! columns = [{ name = "id", type = "int" }, { name = "customer_id", type = "int" }]
//! foreign_keys = [{ columns = ["customer_id"], references = "customers", ref_columns = ["id"] }]
//!
//! [[aggregates]]
//! name = "count"
//! returns = "int"
//! ```

use crate::catalog::{Dictionary, RoutineSpec, TableSpec};
use crate::error::{Result, SqlGraphError};
use crate::transpiler::{Placeholders, RenderOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const FILE_NAME: &str = "sqlgraph.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub render: RenderConfig,
    pub tables: Vec<TableSpec>,
    pub functions: Vec<RoutineSpec>,
    pub aggregates: Vec<RoutineSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub placeholders: Placeholders,
    pub quote_all: bool,
}

impl Config {
    /// Load from `path`, or search the working directory and then the user
    /// config directory. No file at all gives the default config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let found = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(SqlGraphError::Config(format!(
                        "config file not found: {}",
                        p.display()
                    )));
                }
                Some(p.to_path_buf())
            }
            None => search_paths().into_iter().find(|p| p.exists()),
        };

        match found {
            Some(p) => {
                debug!(path = %p.display(), "loading config");
                let content = std::fs::read_to_string(&p)?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SqlGraphError::Config(e.to_string()))
    }

    /// The in-memory catalog described by `[[tables]]`, `[[functions]]` and `[[aggregates]]`.
    pub fn catalog(&self) -> Dictionary {
        Dictionary::from_specs(
            self.tables.clone(),
            self.functions.clone(),
            self.aggregates.clone(),
        )
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            placeholders: self.render.placeholders,
            quote_all: self.render.quote_all,
            ..RenderOptions::default()
        }
    }
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("sqlgraph").join(FILE_NAME));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ValueType;
    use crate::catalog::{Catalog, Lookup};
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
[database]
url = "sqlite::memory:"

[render]
placeholders = "positional"
quote_all = true

[[tables]]
name = "customers"
columns = [{ name = "id", type = "integer", nullable = false }, { name = "name", type = "text" }]

[[tables]]
name = "orders"
columns = [{ name = "id", type = "int" }, { name = "customer_id", type = "int" }]
foreign_keys = [{ columns = ["customer_id"], references = "customers", ref_columns = ["id"] }]

[[aggregates]]
name = "count"
returns = "int"
"#;

    #[test]
    fn test_parse_sections() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.tables.len(), 2);
        assert_eq!(config.tables[0].columns[0].data_type, ValueType::Integer);
        assert!(!config.tables[0].columns[0].nullable);
        assert!(config.tables[0].columns[1].nullable);

        let options = config.render_options();
        assert_eq!(options.placeholders, Placeholders::Positional);
        assert!(options.quote_all);
    }

    #[test]
    fn test_catalog_from_config() {
        let catalog = Config::from_toml(SAMPLE).unwrap().catalog();
        let Lookup::One(orders) = catalog.table_by_name("ORDERS") else {
            panic!("orders not found");
        };
        let Lookup::One(customers) = catalog.table_by_name("customers") else {
            panic!("customers not found");
        };
        assert_eq!(catalog.foreign_keys(&orders, &customers).len(), 1);
        assert!(!catalog.aggregates_by_name("count").is_none());
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let explicit = Config::load(Some(Path::new("/nonexistent/sqlgraph.toml")));
        assert!(matches!(explicit, Err(SqlGraphError::Config(_))));
    }

    #[test]
    fn test_malformed_file() {
        let err = Config::from_toml("[[tables]]\nname = 3").unwrap_err();
        assert!(matches!(err, SqlGraphError::Config(_)));
    }
}
