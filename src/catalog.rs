//! Schema catalog consulted by references, the renderer and the importer.
//!
//! The graph never owns schema objects. It keeps typed ids (`TV1`, `TV1:FI2`,
//! `PR1`, `AG1`) and asks a [`Catalog`] whenever it needs a name, a column list
//! or the foreign keys between two tables.

use crate::ast::ValueType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! catalog_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

catalog_id!(
    /// Stable table id, `TV<n>`.
    TableId
);
catalog_id!(
    /// Stable column id, `TV<n>:FI<m>`.
    ColumnId
);
catalog_id!(
    /// Stable function id, `PR<n>`.
    FunctionId
);
catalog_id!(
    /// Stable aggregate id, `AG<n>`.
    AggregateId
);

/// Outcome of a name lookup. Several algorithms branch on "ambiguous" versus "none".
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    None,
    One(T),
    Ambiguous(usize),
}

impl<T> Lookup<T> {
    pub fn from_vec(mut items: Vec<T>) -> Self {
        match items.len() {
            0 => Lookup::None,
            1 => items.pop().map_or(Lookup::None, Lookup::One),
            n => Lookup::Ambiguous(n),
        }
    }

    pub fn one(self) -> Option<T> {
        match self {
            Lookup::One(item) => Some(item),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Lookup::None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub id: ColumnId,
    pub table: TableId,
    pub name: String,
    pub data_type: ValueType,
    pub nullable: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub id: FunctionId,
    pub name: String,
    pub args: Vec<ValueType>,
    pub returns: ValueType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateInfo {
    pub id: AggregateId,
    pub name: String,
    pub arg: ValueType,
    pub returns: ValueType,
}

/// A foreign key from `table` to `references`, one pair per column.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub table: TableId,
    pub references: TableId,
    pub pairs: Vec<(ColumnId, ColumnId)>,
}

/// Read-only schema metadata.
pub trait Catalog: Send + Sync + fmt::Debug {
    fn table(&self, id: &TableId) -> Option<TableInfo>;
    fn table_by_name(&self, name: &str) -> Lookup<TableId>;
    fn columns(&self, table: &TableId) -> Vec<ColumnInfo>;
    fn column(&self, id: &ColumnId) -> Option<ColumnInfo>;
    fn column_by_name(&self, table: &TableId, name: &str) -> Lookup<ColumnId>;
    fn function(&self, id: &FunctionId) -> Option<FunctionInfo>;
    fn functions_by_name(&self, name: &str) -> Lookup<FunctionId>;
    fn aggregate(&self, id: &AggregateId) -> Option<AggregateInfo>;
    fn aggregates_by_name(&self, name: &str) -> Lookup<AggregateId>;
    /// Every foreign key linking the two tables, in either direction.
    fn foreign_keys(&self, a: &TableId, b: &TableId) -> Vec<ForeignKey>;
}

/// The single foreign key between two tables, if there is exactly one.
pub fn foreign_key_between(catalog: &dyn Catalog, a: &TableId, b: &TableId) -> Lookup<ForeignKey> {
    Lookup::from_vec(catalog.foreign_keys(a, b))
}

// ---------------------------------------------------------------------------
// In-memory dictionary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: ValueType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    pub columns: Vec<String>,
    pub references: String,
    pub ref_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeySpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineSpec {
    pub name: String,
    #[serde(default)]
    pub args: Vec<ValueType>,
    #[serde(default)]
    pub returns: ValueType,
}

/// In-memory [`Catalog`], built in code or deserialized from `sqlgraph.toml`.
///
/// Ids are allocated once and never reused, so removing a table leaves the
/// ids of the others untouched.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    tables: BTreeMap<u32, TableSpec>,
    functions: BTreeMap<u32, RoutineSpec>,
    aggregates: BTreeMap<u32, RoutineSpec>,
    next_serial: u32,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(
        tables: Vec<TableSpec>,
        functions: Vec<RoutineSpec>,
        aggregates: Vec<RoutineSpec>,
    ) -> Self {
        let mut dict = Self::new();
        for table in tables {
            dict.add_table(table);
        }
        for func in functions {
            dict.next_serial += 1;
            dict.functions.insert(dict.next_serial, func);
        }
        for agg in aggregates {
            dict.next_serial += 1;
            dict.aggregates.insert(dict.next_serial, agg);
        }
        dict
    }

    pub fn add_table(&mut self, table: TableSpec) -> TableId {
        self.next_serial += 1;
        self.tables.insert(self.next_serial, table);
        table_id(self.next_serial)
    }

    /// Remove a table by name. Returns whether it existed.
    pub fn remove_table(&mut self, name: &str) -> bool {
        let found = self
            .tables
            .iter()
            .find(|(_, t)| t.name.eq_ignore_ascii_case(name))
            .map(|(serial, _)| *serial);
        match found {
            Some(serial) => self.tables.remove(&serial).is_some(),
            None => false,
        }
    }

    /// Builder: a table whose columns have unknown types and are nullable.
    pub fn with_table(mut self, name: &str, columns: &[&str]) -> Self {
        self.add_table(TableSpec {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|c| ColumnSpec {
                    name: c.to_string(),
                    data_type: ValueType::Unknown,
                    nullable: true,
                    default: None,
                })
                .collect(),
            foreign_keys: Vec::new(),
        });
        self
    }

    /// Builder: set the type of an existing column.
    pub fn with_column_type(mut self, table: &str, column: &str, data_type: ValueType) -> Self {
        if let Some(col) = self
            .tables
            .values_mut()
            .filter(|t| t.name.eq_ignore_ascii_case(table))
            .flat_map(|t| t.columns.iter_mut())
            .find(|c| c.name.eq_ignore_ascii_case(column))
        {
            col.data_type = data_type;
        }
        self
    }

    /// Builder: foreign key `table(columns) REFERENCES references(ref_columns)`.
    pub fn with_foreign_key(
        mut self,
        table: &str,
        columns: &[&str],
        references: &str,
        ref_columns: &[&str],
    ) -> Self {
        if let Some(spec) = self
            .tables
            .values_mut()
            .find(|t| t.name.eq_ignore_ascii_case(table))
        {
            spec.foreign_keys.push(ForeignKeySpec {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                references: references.to_string(),
                ref_columns: ref_columns.iter().map(|c| c.to_string()).collect(),
            });
        }
        self
    }

    pub fn with_function(mut self, name: &str, args: &[ValueType], returns: ValueType) -> Self {
        self.next_serial += 1;
        self.functions.insert(
            self.next_serial,
            RoutineSpec {
                name: name.to_string(),
                args: args.to_vec(),
                returns,
            },
        );
        self
    }

    pub fn with_aggregate(mut self, name: &str, arg: ValueType, returns: ValueType) -> Self {
        self.next_serial += 1;
        self.aggregates.insert(
            self.next_serial,
            RoutineSpec {
                name: name.to_string(),
                args: vec![arg],
                returns,
            },
        );
        self
    }

    fn table_serial(&self, id: &TableId) -> Option<u32> {
        id.0.strip_prefix("TV")?.parse().ok()
    }

    fn column_serials(&self, id: &ColumnId) -> Option<(u32, usize)> {
        let (table, column) = id.0.split_once(':')?;
        let table = table.strip_prefix("TV")?.parse().ok()?;
        let column: usize = column.strip_prefix("FI")?.parse().ok()?;
        Some((table, column.checked_sub(1)?))
    }

    fn serial_by_name(&self, name: &str) -> Lookup<u32> {
        Lookup::from_vec(
            self.tables
                .iter()
                .filter(|(_, t)| t.name.eq_ignore_ascii_case(name))
                .map(|(serial, _)| *serial)
                .collect(),
        )
    }

    fn column_info(&self, serial: u32, index: usize) -> Option<ColumnInfo> {
        let spec = self.tables.get(&serial)?.columns.get(index)?;
        Some(ColumnInfo {
            id: column_id(serial, index),
            table: table_id(serial),
            name: spec.name.clone(),
            data_type: spec.data_type,
            nullable: spec.nullable,
            default: spec.default.clone(),
        })
    }

    fn column_index(&self, serial: u32, name: &str) -> Option<usize> {
        self.tables
            .get(&serial)?
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Resolve the foreign keys declared on `serial` that point at `target`.
    fn declared_keys(&self, serial: u32, target: u32) -> Vec<ForeignKey> {
        let Some(spec) = self.tables.get(&serial) else {
            return Vec::new();
        };
        let Some(target_spec) = self.tables.get(&target) else {
            return Vec::new();
        };
        spec.foreign_keys
            .iter()
            .filter(|fk| fk.references.eq_ignore_ascii_case(&target_spec.name))
            .filter_map(|fk| {
                if fk.columns.len() != fk.ref_columns.len() || fk.columns.is_empty() {
                    return None;
                }
                let pairs = fk
                    .columns
                    .iter()
                    .zip(&fk.ref_columns)
                    .map(|(from, to)| {
                        let from = self.column_index(serial, from)?;
                        let to = self.column_index(target, to)?;
                        Some((column_id(serial, from), column_id(target, to)))
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(ForeignKey {
                    table: table_id(serial),
                    references: table_id(target),
                    pairs,
                })
            })
            .collect()
    }
}

fn table_id(serial: u32) -> TableId {
    TableId(format!("TV{}", serial))
}

fn column_id(serial: u32, index: usize) -> ColumnId {
    ColumnId(format!("TV{}:FI{}", serial, index + 1))
}

fn routine_serial(id: &str, prefix: &str) -> Option<u32> {
    id.strip_prefix(prefix)?.parse().ok()
}

impl Catalog for Dictionary {
    fn table(&self, id: &TableId) -> Option<TableInfo> {
        let serial = self.table_serial(id)?;
        self.tables.get(&serial).map(|t| TableInfo {
            id: id.clone(),
            name: t.name.clone(),
        })
    }

    fn table_by_name(&self, name: &str) -> Lookup<TableId> {
        match self.serial_by_name(name) {
            Lookup::One(serial) => Lookup::One(table_id(serial)),
            Lookup::Ambiguous(n) => Lookup::Ambiguous(n),
            Lookup::None => Lookup::None,
        }
    }

    fn columns(&self, table: &TableId) -> Vec<ColumnInfo> {
        let Some(serial) = self.table_serial(table) else {
            return Vec::new();
        };
        let count = self.tables.get(&serial).map_or(0, |t| t.columns.len());
        (0..count)
            .filter_map(|i| self.column_info(serial, i))
            .collect()
    }

    fn column(&self, id: &ColumnId) -> Option<ColumnInfo> {
        let (serial, index) = self.column_serials(id)?;
        self.column_info(serial, index)
    }

    fn column_by_name(&self, table: &TableId, name: &str) -> Lookup<ColumnId> {
        let Some(serial) = self.table_serial(table) else {
            return Lookup::None;
        };
        Lookup::from_vec(
            self.tables
                .get(&serial)
                .map(|t| {
                    t.columns
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| c.name.eq_ignore_ascii_case(name))
                        .map(|(i, _)| column_id(serial, i))
                        .collect()
                })
                .unwrap_or_default(),
        )
    }

    fn function(&self, id: &FunctionId) -> Option<FunctionInfo> {
        let serial = routine_serial(&id.0, "PR")?;
        self.functions.get(&serial).map(|f| FunctionInfo {
            id: id.clone(),
            name: f.name.clone(),
            args: f.args.clone(),
            returns: f.returns,
        })
    }

    fn functions_by_name(&self, name: &str) -> Lookup<FunctionId> {
        Lookup::from_vec(
            self.functions
                .iter()
                .filter(|(_, f)| f.name.eq_ignore_ascii_case(name))
                .map(|(serial, _)| FunctionId(format!("PR{}", serial)))
                .collect(),
        )
    }

    fn aggregate(&self, id: &AggregateId) -> Option<AggregateInfo> {
        let serial = routine_serial(&id.0, "AG")?;
        self.aggregates.get(&serial).map(|a| AggregateInfo {
            id: id.clone(),
            name: a.name.clone(),
            arg: a.args.first().copied().unwrap_or_default(),
            returns: a.returns,
        })
    }

    fn aggregates_by_name(&self, name: &str) -> Lookup<AggregateId> {
        Lookup::from_vec(
            self.aggregates
                .iter()
                .filter(|(_, a)| a.name.eq_ignore_ascii_case(name))
                .map(|(serial, _)| AggregateId(format!("AG{}", serial)))
                .collect(),
        )
    }

    fn foreign_keys(&self, a: &TableId, b: &TableId) -> Vec<ForeignKey> {
        let (Some(sa), Some(sb)) = (self.table_serial(a), self.table_serial(b)) else {
            return Vec::new();
        };
        let mut keys = self.declared_keys(sa, sb);
        if sa != sb {
            keys.extend(self.declared_keys(sb, sa));
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn shop() -> Dictionary {
        Dictionary::new()
            .with_table("customers", &["id", "name"])
            .with_table("orders", &["id", "customer_id", "total"])
            .with_foreign_key("orders", &["customer_id"], "customers", &["id"])
    }

    #[test]
    fn test_stable_ids() {
        let dict = shop();
        let orders = dict.table_by_name("ORDERS").one().unwrap();
        assert_eq!(orders, TableId("TV2".into()));
        let col = dict.column_by_name(&orders, "total").one().unwrap();
        assert_eq!(col.as_str(), "TV2:FI3");
        assert_eq!(dict.column(&col).unwrap().name, "total");
    }

    #[test]
    fn test_foreign_keys_either_direction() {
        let dict = shop();
        let orders = TableId("TV2".into());
        let customers = TableId("TV1".into());
        let fk = foreign_key_between(&dict, &customers, &orders).one().unwrap();
        assert_eq!(fk.table, orders);
        assert_eq!(
            fk.pairs,
            vec![(ColumnId("TV2:FI2".into()), ColumnId("TV1:FI1".into()))]
        );
    }

    #[test]
    fn test_ambiguous_foreign_keys() {
        let dict = shop().with_foreign_key("orders", &["id"], "customers", &["id"]);
        let lookup = foreign_key_between(&dict, &TableId("TV2".into()), &TableId("TV1".into()));
        assert_eq!(lookup, Lookup::Ambiguous(2));
    }

    #[test]
    fn test_removed_table_keeps_other_ids() {
        let mut dict = shop();
        assert!(dict.remove_table("customers"));
        assert!(dict.table(&TableId("TV1".into())).is_none());
        assert_eq!(dict.table_by_name("orders").one().unwrap().as_str(), "TV2");
    }

    #[test]
    fn test_overloaded_functions_are_ambiguous() {
        let dict = Dictionary::new()
            .with_function("lower", &[ValueType::Text], ValueType::Text)
            .with_function("lower", &[ValueType::Unknown], ValueType::Text);
        assert_eq!(dict.functions_by_name("lower"), Lookup::Ambiguous(2));
    }
}
