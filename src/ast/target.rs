use super::deferred::DeferredRef;
use super::ids::{Handle, QueryId, TargetId};
use crate::catalog::TableId;

/// What a new target represents.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    /// Table or view looked up by name; may not exist in the catalog yet.
    Table(String),
    TableId(TableId),
    /// A sub-query owned by the same query.
    SubQuery(QueryId),
}

impl Entity {
    pub fn table(name: &str) -> Self {
        Entity::Table(name.to_string())
    }
}

/// One use of a table or sub-query inside a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub(crate) id: TargetId,
    pub(crate) alias: Option<String>,
    pub(crate) entity: DeferredRef,
    /// Table name, kept for rendering while the entity does not resolve.
    pub(crate) entity_name: String,
}

impl Target {
    pub fn id(&self) -> TargetId {
        self.id
    }

    /// Explicit alias, or `t<n>` when none was set.
    pub fn alias(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("t{}", self.id.serial()))
    }

    pub fn explicit_alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn set_alias(&mut self, alias: Option<&str>) {
        self.alias = alias.filter(|a| !a.is_empty()).map(str::to_string);
    }

    pub fn represented_entity(&self) -> Option<&Handle> {
        self.entity.target()
    }

    pub fn entity_ref(&self) -> &DeferredRef {
        &self.entity
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn table(&self) -> Option<&TableId> {
        match self.entity.target() {
            Some(Handle::Table(t)) => Some(t),
            _ => None,
        }
    }

    pub fn sub_query(&self) -> Option<QueryId> {
        match self.entity.target() {
            Some(Handle::Query(q)) => Some(*q),
            _ => None,
        }
    }
}
