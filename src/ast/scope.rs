//! Snapshot of a query tree used to resolve deferred references.
//!
//! Refs live inside the query they resolve against, so activation works on an
//! owned index of names and ids rather than on a borrow of the query itself.

use super::deferred::{RefKind, RefMode, Resolver};
use super::ids::{CondId, FieldId, Handle, JoinId, QueryId, TargetId, split_compound};
use super::query::Query;
use crate::catalog::{AggregateId, Catalog, ColumnId, FunctionId, Lookup, TableId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

struct TargetEntry {
    id: TargetId,
    alias: Option<String>,
    auto_alias: String,
    entity_name: String,
}

struct FieldEntry {
    id: FieldId,
    name: Option<String>,
    alias: Option<String>,
    visible: bool,
}

#[derive(Default)]
struct QueryIndex {
    name: Option<String>,
    targets: Vec<TargetEntry>,
    fields: Vec<FieldEntry>,
    joins: HashSet<JoinId>,
    conds: HashSet<CondId>,
    subs: Vec<QueryId>,
}

pub(crate) struct Scope {
    catalog: Arc<dyn Catalog>,
    queries: HashMap<QueryId, QueryIndex>,
}

impl Scope {
    pub(crate) fn of(query: &Query) -> Self {
        let mut scope = Scope {
            catalog: Arc::clone(query.catalog()),
            queries: HashMap::new(),
        };
        scope.index(query);
        scope
    }

    fn index(&mut self, query: &Query) {
        let idx = QueryIndex {
            name: query.name().map(str::to_lowercase),
            targets: query
                .targets()
                .iter()
                .map(|t| TargetEntry {
                    id: t.id,
                    alias: t.explicit_alias().map(str::to_lowercase),
                    auto_alias: t.alias().to_lowercase(),
                    entity_name: t.entity_name().to_lowercase(),
                })
                .collect(),
            fields: query
                .fields()
                .iter()
                .map(|f| FieldEntry {
                    id: f.id,
                    name: f.name().map(str::to_lowercase),
                    alias: f.alias().map(str::to_lowercase),
                    visible: f.is_visible(),
                })
                .collect(),
            joins: query.joins().iter().map(|j| j.id).collect(),
            conds: query.conditions().map(|c| c.id).collect(),
            subs: query.sub_queries().iter().map(Query::id).collect(),
        };
        self.queries.insert(query.id(), idx);
        for sub in query.sub_queries().iter().chain(query.param_sources()) {
            self.index(sub);
        }
    }

    fn helper_query(helper: Option<&Handle>) -> Option<QueryId> {
        match helper {
            Some(Handle::Query(q)) => Some(*q),
            Some(h) => h.query(),
            None => None,
        }
    }

    fn target_by_name(&self, query: QueryId, name: &str) -> Option<Handle> {
        let idx = self.queries.get(&query)?;
        let name = name.to_lowercase();
        if let Some(t) = idx
            .targets
            .iter()
            .find(|t| t.alias.as_deref() == Some(name.as_str()) || t.auto_alias == name)
        {
            return Some(Handle::Target(query, t.id));
        }
        let by_entity: Vec<TargetId> = idx
            .targets
            .iter()
            .filter(|t| t.entity_name == name)
            .map(|t| t.id)
            .collect();
        Lookup::from_vec(by_entity)
            .one()
            .map(|t| Handle::Target(query, t))
    }

    fn field_by_name(&self, query: QueryId, name: &str) -> Option<Handle> {
        let idx = self.queries.get(&query)?;
        let name = name.to_lowercase();
        let visible = || idx.fields.iter().filter(|f| f.visible);
        let by_alias: Vec<FieldId> = visible()
            .filter(|f| f.alias.as_deref() == Some(name.as_str()))
            .map(|f| f.id)
            .collect();
        let found = match Lookup::from_vec(by_alias) {
            Lookup::One(f) => Some(f),
            Lookup::Ambiguous(_) => None,
            Lookup::None => Lookup::from_vec(
                visible()
                    .filter(|f| f.alias.is_none() && f.name.as_deref() == Some(name.as_str()))
                    .map(|f| f.id)
                    .collect(),
            )
            .one(),
        };
        found.map(|f| Handle::Field(query, f))
    }

    fn query_by_name(&self, parent: Option<QueryId>, name: &str) -> Option<Handle> {
        let name = name.to_lowercase();
        let candidates: Vec<QueryId> = match parent.and_then(|p| self.queries.get(&p)) {
            Some(idx) => idx
                .subs
                .iter()
                .filter(|q| {
                    self.queries
                        .get(q)
                        .and_then(|i| i.name.as_deref())
                        .is_some_and(|n| n == name)
                })
                .copied()
                .collect(),
            None => self
                .queries
                .iter()
                .filter(|(_, i)| i.name.as_deref() == Some(name.as_str()))
                .map(|(q, _)| *q)
                .collect(),
        };
        Lookup::from_vec(candidates).one().map(Handle::Query)
    }
}

impl Resolver for Scope {
    fn resolve(
        &self,
        kind: RefKind,
        mode: RefMode,
        key: &str,
        helper: Option<&Handle>,
    ) -> Option<Handle> {
        let catalog = self.catalog.as_ref();
        let found = match (kind, mode) {
            (RefKind::Table, RefMode::ById) => catalog
                .table(&TableId(key.to_string()))
                .map(|t| Handle::Table(t.id)),
            (RefKind::Table, RefMode::ByName) => catalog.table_by_name(key).one().map(Handle::Table),
            (RefKind::Column, RefMode::ById) => catalog
                .column(&ColumnId(key.to_string()))
                .map(|c| Handle::Column(c.id)),
            (RefKind::Column, RefMode::ByName) => match helper {
                Some(Handle::Table(t)) => catalog.column_by_name(t, key).one().map(Handle::Column),
                _ => None,
            },
            (RefKind::Function, RefMode::ById) => catalog
                .function(&FunctionId(key.to_string()))
                .map(|f| Handle::Function(f.id)),
            (RefKind::Function, RefMode::ByName) => {
                catalog.functions_by_name(key).one().map(Handle::Function)
            }
            (RefKind::Aggregate, RefMode::ById) => catalog
                .aggregate(&AggregateId(key.to_string()))
                .map(|a| Handle::Aggregate(a.id)),
            (RefKind::Aggregate, RefMode::ByName) => {
                catalog.aggregates_by_name(key).one().map(Handle::Aggregate)
            }
            (RefKind::Query, RefMode::ById) => key
                .parse::<QueryId>()
                .ok()
                .filter(|q| self.queries.contains_key(q))
                .map(Handle::Query),
            (RefKind::Query, RefMode::ByName) => {
                self.query_by_name(Self::helper_query(helper), key)
            }
            (RefKind::Target, RefMode::ById) => {
                split_compound::<TargetId>(key, Self::helper_query(helper))
                    .map(|(q, t)| Handle::Target(q, t))
                    .filter(|h| self.exists(h))
            }
            (RefKind::Target, RefMode::ByName) => {
                Self::helper_query(helper).and_then(|q| self.target_by_name(q, key))
            }
            (RefKind::Field, RefMode::ById) => {
                split_compound::<FieldId>(key, Self::helper_query(helper))
                    .map(|(q, f)| Handle::Field(q, f))
                    .filter(|h| self.exists(h))
            }
            (RefKind::Field, RefMode::ByName) => {
                Self::helper_query(helper).and_then(|q| self.field_by_name(q, key))
            }
        };
        trace!(kind = kind.name(), key, resolved = found.is_some(), "activate reference");
        found
    }

    fn exists(&self, handle: &Handle) -> bool {
        let catalog = self.catalog.as_ref();
        match handle {
            Handle::Table(t) => catalog.table(t).is_some(),
            Handle::Column(c) => catalog.column(c).is_some(),
            Handle::Function(f) => catalog.function(f).is_some(),
            Handle::Aggregate(a) => catalog.aggregate(a).is_some(),
            Handle::Query(q) => self.queries.contains_key(q),
            Handle::Target(q, t) => self
                .queries
                .get(q)
                .is_some_and(|i| i.targets.iter().any(|e| e.id == *t)),
            Handle::Field(q, f) => self
                .queries
                .get(q)
                .is_some_and(|i| i.fields.iter().any(|e| e.id == *f)),
            Handle::Join(q, j) => self.queries.get(q).is_some_and(|i| i.joins.contains(j)),
            Handle::Condition(q, c) => self.queries.get(q).is_some_and(|i| i.conds.contains(c)),
        }
    }
}
