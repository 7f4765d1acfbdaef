//! The top-level statement node and its structural mutators.

use super::condition::Condition;
use super::deferred::{DeferredRef, LossPolicy, RefKind, RefMode, Resolver};
use super::events::{QueryEvent, RefOwner};
use super::field::{Field, FieldKind, parameter_key};
use super::ids::{CondId, FieldId, Handle, QueryId, TargetId};
use super::join::Join;
use super::scope::Scope;
use super::target::{Entity, Target};
use crate::catalog::Catalog;
use crate::error::{Result, SqlGraphError};
use crate::params::Parameter;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryKind {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
    Union,
    Intersect,
    Except,
    RawText,
}

impl QueryKind {
    pub fn name(&self) -> &'static str {
        match self {
            QueryKind::Select => "SELECT",
            QueryKind::Insert => "INSERT",
            QueryKind::Update => "UPDATE",
            QueryKind::Delete => "DELETE",
            QueryKind::Union => "UNION",
            QueryKind::Intersect => "INTERSECT",
            QueryKind::Except => "EXCEPT",
            QueryKind::RawText => "RAW",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "SELECT" => QueryKind::Select,
            "INSERT" => QueryKind::Insert,
            "UPDATE" => QueryKind::Update,
            "DELETE" => QueryKind::Delete,
            "UNION" => QueryKind::Union,
            "INTERSECT" => QueryKind::Intersect,
            "EXCEPT" => QueryKind::Except,
            "RAW" => QueryKind::RawText,
            _ => return None,
        })
    }

    /// INSERT, UPDATE or DELETE.
    pub fn is_modify(&self) -> bool {
        matches!(self, QueryKind::Insert | QueryKind::Update | QueryKind::Delete)
    }

    /// UNION, INTERSECT or EXCEPT.
    pub fn is_compound(&self) -> bool {
        matches!(self, QueryKind::Union | QueryKind::Intersect | QueryKind::Except)
    }

    pub fn allows_joins(&self) -> bool {
        matches!(self, QueryKind::Select)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: FieldId,
    pub ascending: bool,
}

/// Where raw SQL text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOrigin {
    /// Set explicitly; the query may go back to structured editing.
    Assigned,
    /// Input the importer could not understand; structural edits are refused.
    Unparsed,
}

/// A `:name:type:` placeholder found in raw text, bound to a hidden value field.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPlaceholder {
    pub span: Range<usize>,
    pub field: FieldId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawText {
    pub sql: String,
    pub origin: RawOrigin,
    pub placeholders: Vec<RawPlaceholder>,
}

/// A SQL statement as a graph of targets, joins, fields and conditions.
#[derive(Debug)]
pub struct Query {
    pub(crate) id: QueryId,
    pub(crate) name: Option<String>,
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) kind: QueryKind,
    pub(crate) distinct: bool,
    pub(crate) targets: Vec<Target>,
    pub(crate) joins: Vec<Join>,
    pub(crate) fields: Vec<Field>,
    pub(crate) conds: BTreeMap<CondId, Condition>,
    pub(crate) where_cond: Option<CondId>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) sub_queries: Vec<Query>,
    pub(crate) param_sources: Vec<Query>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) raw: Option<RawText>,
    pub(crate) serial: u32,
    pub(crate) batch_depth: u32,
    pub(crate) auto_clean: bool,
    dirty: bool,
    sweeping: bool,
    events: Vec<QueryEvent>,
}

impl Query {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self::with_id(QueryId::next(), catalog)
    }

    pub fn with_kind(catalog: Arc<dyn Catalog>, kind: QueryKind) -> Self {
        let mut q = Self::new(catalog);
        q.kind = kind;
        q
    }

    pub(crate) fn with_id(id: QueryId, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            id,
            name: None,
            catalog,
            kind: QueryKind::Select,
            distinct: false,
            targets: Vec::new(),
            joins: Vec::new(),
            fields: Vec::new(),
            conds: BTreeMap::new(),
            where_cond: None,
            order_by: Vec::new(),
            sub_queries: Vec::new(),
            param_sources: Vec::new(),
            limit: None,
            offset: None,
            raw: None,
            serial: 0,
            batch_depth: 0,
            auto_clean: true,
            dirty: false,
            sweeping: false,
            events: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<&str>) {
        self.name = name.map(str::to_string);
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn set_distinct(&mut self, distinct: bool) {
        self.distinct = distinct;
        self.notify(QueryEvent::Changed);
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn set_limit(&mut self, limit: Option<u64>, offset: Option<u64>) {
        self.limit = limit;
        self.offset = offset;
        self.notify(QueryEvent::Changed);
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn target(&self, id: TargetId) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn visible_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.visible)
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn where_condition(&self) -> Option<CondId> {
        self.where_cond
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn sub_queries(&self) -> &[Query] {
        &self.sub_queries
    }

    pub fn sub_query(&self, id: QueryId) -> Option<&Query> {
        self.sub_queries.iter().find(|q| q.id == id)
    }

    pub fn sub_query_mut(&mut self, id: QueryId) -> Option<&mut Query> {
        self.sub_queries.iter_mut().find(|q| q.id == id)
    }

    /// This query or any query nested below it.
    pub fn find_query(&self, id: QueryId) -> Option<&Query> {
        if self.id == id {
            return Some(self);
        }
        self.sub_queries
            .iter()
            .chain(&self.param_sources)
            .find_map(|q| q.find_query(id))
    }

    pub fn param_sources(&self) -> &[Query] {
        &self.param_sources
    }

    pub fn raw_text(&self) -> Option<&RawText> {
        self.raw.as_ref()
    }

    pub(crate) fn next_serial(&mut self) -> u32 {
        self.serial += 1;
        self.serial
    }

    /// Keep local id allocation ahead of an id adopted from elsewhere.
    pub(crate) fn bump_serial(&mut self, used: u32) {
        self.serial = self.serial.max(used);
    }

    // ------------------------------------------------------------------
    // events and batching
    // ------------------------------------------------------------------

    pub(crate) fn notify(&mut self, event: QueryEvent) {
        self.dirty = true;
        if self.batch_depth == 0 || self.sweeping {
            self.events.push(event);
        }
    }

    /// Drain the events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<QueryEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn in_batch(&self) -> bool {
        self.batch_depth > 0
    }

    /// Suspend notifications and garbage collection until the matching [`end_batch`](Self::end_batch).
    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Leave a batch. Only the outermost exit sweeps and records one `Changed`.
    pub fn end_batch(&mut self) {
        if self.batch_depth == 0 {
            return;
        }
        self.batch_depth -= 1;
        if self.batch_depth == 0 && self.dirty {
            self.settle(false);
        }
    }

    /// Run `f` inside a batch.
    pub fn batch<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.begin_batch();
        let out = f(self);
        self.end_batch();
        out
    }

    /// Enable or disable the automatic junk sweep after structural edits.
    pub fn set_auto_clean(&mut self, auto_clean: bool) {
        self.auto_clean = auto_clean;
    }

    pub(crate) fn after_change(&mut self) {
        if self.batch_depth > 0 {
            self.dirty = true;
            return;
        }
        self.settle(true);
    }

    fn settle(&mut self, detailed: bool) {
        self.batch_depth += 1;
        let saved = self.sweeping;
        self.sweeping = detailed;
        self.purge();
        if self.auto_clean {
            self.sweep_junk();
        }
        self.sweeping = saved;
        self.batch_depth -= 1;
        self.events.push(QueryEvent::Changed);
        self.dirty = false;
    }

    // ------------------------------------------------------------------
    // raw text
    // ------------------------------------------------------------------

    /// Store SQL verbatim without parsing it. The query becomes RawText but
    /// may return to structured editing later.
    pub fn assign_raw_text(&mut self, sql: &str) {
        self.batch(|q| {
            q.clear_structure();
            q.kind = QueryKind::RawText;
            q.raw = Some(RawText {
                sql: sql.to_string(),
                origin: RawOrigin::Assigned,
                placeholders: Vec::new(),
            });
            q.notify(QueryEvent::Changed);
        });
    }

    /// Leave RawText mode. Fails when the text came from unparseable input.
    pub fn forget_raw_text(&mut self) -> Result<()> {
        match self.raw.as_ref().map(|r| r.origin) {
            Some(RawOrigin::Unparsed) => Err(SqlGraphError::structure(
                "Can't modify the structure of a non-parsed SQL query",
            )),
            Some(RawOrigin::Assigned) => {
                self.raw = None;
                self.kind = QueryKind::Select;
                self.notify(QueryEvent::Changed);
                Ok(())
            }
            None => {
                if self.kind == QueryKind::RawText {
                    self.kind = QueryKind::Select;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn ensure_structural(&mut self) -> Result<()> {
        if self.kind == QueryKind::RawText {
            self.forget_raw_text()?;
        }
        Ok(())
    }

    /// Drop every structural node, keeping identity, catalog and name.
    pub(crate) fn clear_structure(&mut self) {
        let targets: Vec<TargetId> = self.targets.iter().map(|t| t.id).collect();
        let fields: Vec<FieldId> = self.fields.iter().map(|f| f.id).collect();
        let joins: Vec<_> = self.joins.iter().map(|j| j.id).collect();
        let subs: Vec<QueryId> = self.sub_queries.iter().map(|q| q.id).collect();
        self.targets.clear();
        self.joins.clear();
        self.fields.clear();
        self.conds.clear();
        self.where_cond = None;
        self.order_by.clear();
        self.sub_queries.clear();
        self.raw = None;
        self.distinct = false;
        self.limit = None;
        self.offset = None;
        for t in targets {
            self.notify(QueryEvent::TargetRemoved(t));
        }
        for f in fields {
            self.notify(QueryEvent::FieldRemoved(f));
        }
        for j in joins {
            self.notify(QueryEvent::JoinRemoved(j));
        }
        for s in subs {
            self.notify(QueryEvent::SubQueryRemoved(s));
        }
    }

    // ------------------------------------------------------------------
    // statement kind
    // ------------------------------------------------------------------

    /// Change the statement kind, refusing kinds whose invariants the
    /// current structure would break.
    pub fn set_kind(&mut self, kind: QueryKind) -> Result<()> {
        if kind == QueryKind::RawText {
            return Err(SqlGraphError::structure(
                "Use assign_raw_text to turn a query into raw SQL",
            ));
        }
        self.ensure_structural()?;
        if kind.is_modify() {
            if self.targets.len() > 1 {
                return Err(SqlGraphError::structure(
                    "More than one target for a modification query",
                ));
            }
            if !self.joins.is_empty() {
                return Err(SqlGraphError::structure(
                    "Modification queries can't have joins",
                ));
            }
        }
        if kind.is_compound() && (!self.targets.is_empty() || self.where_cond.is_some()) {
            return Err(SqlGraphError::structure(
                "Compound queries can't have targets or a condition",
            ));
        }
        self.kind = kind;
        self.notify(QueryEvent::Changed);
        self.after_change();
        Ok(())
    }

    // ------------------------------------------------------------------
    // targets
    // ------------------------------------------------------------------

    pub fn add_target(&mut self, entity: Entity, alias: Option<&str>) -> Result<TargetId> {
        self.ensure_structural()?;
        if self.kind.is_compound() {
            return Err(SqlGraphError::structure(format!(
                "A {} query can't have targets",
                self.kind.name()
            )));
        }
        if self.kind.is_modify() && !self.targets.is_empty() {
            return Err(SqlGraphError::structure(
                "More than one target for a modification query",
            ));
        }
        let (entity_ref, entity_name) = match entity {
            Entity::Table(name) => (
                DeferredRef::by_name(RefKind::Table, name.clone(), LossPolicy::Revert),
                name,
            ),
            Entity::TableId(id) => {
                let name = self
                    .catalog
                    .table(&id)
                    .map(|t| t.name)
                    .unwrap_or_else(|| id.to_string());
                (
                    DeferredRef::by_id(RefKind::Table, id.to_string(), LossPolicy::Revert),
                    name,
                )
            }
            Entity::SubQuery(sub) => {
                let Some(q) = self.sub_query(sub) else {
                    return Err(SqlGraphError::structure(format!(
                        "Query {} is not a sub-query of {}",
                        sub, self.id
                    )));
                };
                let name = q.name().map(str::to_string).unwrap_or_else(|| sub.to_string());
                (
                    DeferredRef::resolved(
                        RefKind::Query,
                        Handle::Query(sub),
                        LossPolicy::DestroyOwner,
                    ),
                    name,
                )
            }
        };
        let id = TargetId(self.next_serial());
        let mut target = Target {
            id,
            alias: None,
            entity: entity_ref,
            entity_name,
        };
        target.set_alias(alias);
        let scope = Scope::of(self);
        target.entity.activate(&scope);
        self.targets.push(target);
        self.notify(QueryEvent::TargetAdded(id));
        self.after_change();
        Ok(id)
    }

    pub fn remove_target(&mut self, id: TargetId) -> Result<()> {
        self.ensure_structural()?;
        if self.target(id).is_none() {
            return Err(SqlGraphError::not_active(format!("target {}", id)));
        }
        self.remove_target_inner(id);
        self.after_change();
        Ok(())
    }

    pub(crate) fn remove_target_inner(&mut self, id: TargetId) {
        self.targets.retain(|t| t.id != id);
        self.notify(QueryEvent::TargetRemoved(id));
    }

    pub fn set_target_alias(&mut self, id: TargetId, alias: Option<&str>) -> Result<()> {
        let target = self
            .targets
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| SqlGraphError::not_active(format!("target {}", id)))?;
        target.set_alias(alias);
        self.notify(QueryEvent::Changed);
        Ok(())
    }

    // ------------------------------------------------------------------
    // fields
    // ------------------------------------------------------------------

    /// Append a field. Its references are resolved against this query.
    pub fn add_field(&mut self, field: Field) -> Result<FieldId> {
        let position = self.fields.len();
        self.add_field_at(field, position)
    }

    pub fn add_field_at(&mut self, mut field: Field, position: usize) -> Result<FieldId> {
        self.ensure_structural()?;
        let scope = Scope::of(self);
        for r in field.refs_mut() {
            let intra = matches!(r.kind(), RefKind::Target)
                || (r.kind() == RefKind::Field && r.helper().is_none());
            if !r.activate(&scope) && intra {
                return Err(SqlGraphError::not_active(format!(
                    "{} '{}'",
                    r.kind().name(),
                    r.key()
                )));
            }
        }
        field.id = FieldId(self.next_serial());
        let id = field.id;
        let position = position.min(self.fields.len());
        self.fields.insert(position, field);
        self.notify(QueryEvent::FieldAdded(id));
        self.after_change();
        Ok(id)
    }

    pub fn remove_field(&mut self, id: FieldId) -> Result<()> {
        self.ensure_structural()?;
        if self.field(id).is_none() {
            return Err(SqlGraphError::not_active(format!("field {}", id)));
        }
        self.remove_field_inner(id);
        self.after_change();
        Ok(())
    }

    pub(crate) fn remove_field_inner(&mut self, id: FieldId) {
        self.fields.retain(|f| f.id != id);
        self.order_by.retain(|o| o.field != id);
        if let Some(raw) = &mut self.raw {
            raw.placeholders.retain(|p| p.field != id);
        }
        self.notify(QueryEvent::FieldRemoved(id));
    }

    /// Edit plain attributes of a field (visibility, alias, literal value...).
    pub fn update_field(&mut self, id: FieldId, f: impl FnOnce(&mut Field)) -> Result<()> {
        let field = self
            .fields
            .iter_mut()
            .find(|x| x.id == id)
            .ok_or_else(|| SqlGraphError::not_active(format!("field {}", id)))?;
        f(field);
        self.notify(QueryEvent::FieldChanged(id));
        self.after_change();
        Ok(())
    }

    /// Attach the expression assigned to a column field (INSERT values, UPDATE SET).
    pub fn set_value_provider(&mut self, field: FieldId, value: Option<FieldId>) -> Result<()> {
        if let Some(v) = value {
            if self.field(v).is_none() {
                return Err(SqlGraphError::not_active(format!("field {}", v)));
            }
        }
        let query = self.id;
        let target = self
            .fields
            .iter_mut()
            .find(|x| x.id == field)
            .ok_or_else(|| SqlGraphError::not_active(format!("field {}", field)))?;
        let FieldKind::Column { value: provider, .. } = &mut target.kind else {
            return Err(SqlGraphError::structure(format!(
                "Field {} is not a column reference",
                field
            )));
        };
        *provider = value.map(|v| {
            DeferredRef::resolved(RefKind::Field, Handle::Field(query, v), LossPolicy::Revert)
        });
        self.notify(QueryEvent::FieldChanged(field));
        self.after_change();
        Ok(())
    }

    /// Position of a field among the visible ones.
    pub fn visible_position(&self, id: FieldId) -> Option<usize> {
        self.visible_fields().position(|f| f.id == id)
    }

    /// Targets a field reads from, following call and aggregate arguments.
    pub fn field_targets(&self, id: FieldId) -> BTreeSet<TargetId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![id];
        let mut seen = BTreeSet::new();
        while let Some(f) = stack.pop() {
            if !seen.insert(f) {
                continue;
            }
            let Some(field) = self.field(f) else { continue };
            match &field.kind {
                FieldKind::Column { .. } | FieldKind::Wildcard { .. } => {
                    out.extend(field.target());
                }
                FieldKind::Call { .. } | FieldKind::Aggregate { .. } => {
                    stack.extend(field.referenced_fields(self.id));
                }
                FieldKind::Literal(_) => {}
            }
        }
        out
    }

    /// Structural equality ignoring names and aliases.
    pub fn fields_equal(&self, a: FieldId, b: FieldId) -> bool {
        if a == b {
            return self.field(a).is_some();
        }
        let (Some(fa), Some(fb)) = (self.field(a), self.field(b)) else {
            return false;
        };
        let same_ref = |x: &DeferredRef, y: &DeferredRef| match (x.target(), y.target()) {
            (Some(hx), Some(hy)) => hx == hy,
            (None, None) => x.key().eq_ignore_ascii_case(y.key()),
            _ => false,
        };
        let same_field = |x: &DeferredRef, y: &DeferredRef| match (x.target(), y.target()) {
            (Some(Handle::Field(_, fx)), Some(Handle::Field(_, fy))) => self.fields_equal(*fx, *fy),
            _ => false,
        };
        match (&fa.kind, &fb.kind) {
            (
                FieldKind::Column {
                    target: ta,
                    column: ca,
                    ..
                },
                FieldKind::Column {
                    target: tb,
                    column: cb,
                    ..
                },
            ) => same_ref(ta, tb) && same_ref(ca, cb),
            (FieldKind::Literal(la), FieldKind::Literal(lb)) => {
                la.value_type == lb.value_type
                    && la.value == lb.value
                    && la.is_parameter == lb.is_parameter
                    && la.default == lb.default
                    && la.use_default == lb.use_default
                    && (!la.is_parameter || fa.name == fb.name)
            }
            (
                FieldKind::Call {
                    function: fna,
                    args: aa,
                },
                FieldKind::Call {
                    function: fnb,
                    args: ab,
                },
            ) => {
                same_ref(fna, fnb)
                    && aa.len() == ab.len()
                    && aa.iter().zip(ab).all(|(x, y)| same_field(x, y))
            }
            (
                FieldKind::Aggregate {
                    aggregate: ga,
                    arg: xa,
                },
                FieldKind::Aggregate {
                    aggregate: gb,
                    arg: xb,
                },
            ) => {
                same_ref(ga, gb)
                    && match (xa, xb) {
                        (Some(x), Some(y)) => same_field(x, y),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (FieldKind::Wildcard { target: ta }, FieldKind::Wildcard { target: tb }) => {
                same_ref(ta, tb)
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // parameters
    // ------------------------------------------------------------------

    /// Parameters needed by one field, following call and aggregate arguments.
    pub fn field_parameters(&self, id: FieldId) -> Vec<Parameter> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        let mut seen = BTreeSet::new();
        while let Some(f) = stack.pop() {
            if !seen.insert(f) {
                continue;
            }
            let Some(field) = self.field(f) else { continue };
            match &field.kind {
                FieldKind::Literal(lit) if lit.is_parameter => out.push(Parameter {
                    name: parameter_key(self, field),
                    query: self.id,
                    field: field.id,
                    value_type: lit.value_type,
                    nullable: lit.nullable,
                    default: lit.default.clone(),
                    description: lit.description.clone(),
                }),
                FieldKind::Call { .. } | FieldKind::Aggregate { .. } => {
                    stack.extend(field.referenced_fields(self.id).into_iter().rev());
                }
                _ => {}
            }
        }
        out
    }

    /// Every parameter of this query and its sub-queries, once per name.
    pub fn parameters(&self) -> Vec<Parameter> {
        let mut out: Vec<Parameter> = Vec::new();
        let own = self.fields.iter().flat_map(|f| self.field_parameters(f.id));
        let nested = self.sub_queries.iter().flat_map(Query::parameters);
        for p in own.chain(nested) {
            if !out.iter().any(|x| x.name == p.name) {
                out.push(p);
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // condition, sub-queries, order
    // ------------------------------------------------------------------

    /// Use a detached condition as the WHERE clause; `None` removes it.
    pub fn set_condition(&mut self, cond: Option<CondId>) -> Result<()> {
        self.ensure_structural()?;
        if let Some(c) = cond {
            if self.kind.is_compound() {
                return Err(SqlGraphError::structure(
                    "Compound queries can't have a condition",
                ));
            }
            let node = self
                .conds
                .get(&c)
                .ok_or_else(|| SqlGraphError::not_active(format!("condition {}", c)))?;
            if node.parent.is_some() || node.join.is_some() {
                return Err(SqlGraphError::structure(format!(
                    "Condition {} already belongs to another node",
                    c
                )));
            }
        }
        if self.where_cond == cond {
            return Ok(());
        }
        if let Some(old) = self.where_cond.take() {
            self.destroy_condition(old);
        }
        self.where_cond = cond;
        self.notify(QueryEvent::ConditionChanged);
        self.after_change();
        Ok(())
    }

    /// Take ownership of `sub`. Unused sub-queries of a SELECT are swept on
    /// the next structural change, so add the target in the same batch.
    pub fn add_sub_query(&mut self, sub: Query) -> Result<QueryId> {
        self.ensure_structural()?;
        if self.find_query(sub.id).is_some() {
            return Err(SqlGraphError::structure(format!(
                "Query {} is already part of this query",
                sub.id
            )));
        }
        let id = sub.id;
        self.sub_queries.push(sub);
        self.notify(QueryEvent::SubQueryAdded(id));
        self.after_change();
        Ok(id)
    }

    pub fn remove_sub_query(&mut self, id: QueryId) -> Result<Query> {
        self.ensure_structural()?;
        let pos = self
            .sub_queries
            .iter()
            .position(|q| q.id == id)
            .ok_or_else(|| SqlGraphError::not_active(format!("sub-query {}", id)))?;
        let sub = self.sub_queries.remove(pos);
        self.notify(QueryEvent::SubQueryRemoved(id));
        self.after_change();
        Ok(sub)
    }

    /// Attach a query whose rows provide allowed values for parameters.
    pub fn add_param_source(&mut self, source: Query) -> QueryId {
        let id = source.id;
        self.param_sources.push(source);
        self.notify(QueryEvent::Changed);
        id
    }

    pub fn remove_param_source(&mut self, id: QueryId) -> Option<Query> {
        let pos = self.param_sources.iter().position(|q| q.id == id)?;
        self.notify(QueryEvent::Changed);
        Some(self.param_sources.remove(pos))
    }

    /// Add or move a field in ORDER BY. `position` past the end appends.
    pub fn set_order_by_field(
        &mut self,
        field: FieldId,
        position: Option<usize>,
        ascending: bool,
    ) -> Result<()> {
        self.ensure_structural()?;
        if self.field(field).is_none() {
            return Err(SqlGraphError::not_active(format!("field {}", field)));
        }
        self.order_by.retain(|o| o.field != field);
        let at = position.unwrap_or(self.order_by.len()).min(self.order_by.len());
        self.order_by.insert(at, OrderBy { field, ascending });
        self.notify(QueryEvent::Changed);
        self.after_change();
        Ok(())
    }

    pub fn unset_order_by_field(&mut self, field: FieldId) {
        let before = self.order_by.len();
        self.order_by.retain(|o| o.field != field);
        if self.order_by.len() != before {
            self.notify(QueryEvent::Changed);
            self.after_change();
        }
    }

    // ------------------------------------------------------------------
    // reference maintenance
    // ------------------------------------------------------------------

    pub(crate) fn for_each_ref_mut(&mut self, mut f: impl FnMut(RefOwner, &mut DeferredRef)) {
        for t in &mut self.targets {
            f(RefOwner::Target(t.id), &mut t.entity);
        }
        for j in &mut self.joins {
            let id = j.id;
            for r in j.refs_mut() {
                f(RefOwner::Join(id), r);
            }
        }
        for field in &mut self.fields {
            let id = field.id;
            for r in field.refs_mut() {
                f(RefOwner::Field(id), r);
            }
        }
        for cond in self.conds.values_mut() {
            let id = cond.id;
            for r in cond.refs_mut() {
                f(RefOwner::Condition(id), r);
            }
        }
    }

    pub(crate) fn for_each_ref(&self, mut f: impl FnMut(RefOwner, &DeferredRef)) {
        for t in &self.targets {
            f(RefOwner::Target(t.id), &t.entity);
        }
        for j in &self.joins {
            for r in j.refs() {
                f(RefOwner::Join(j.id), r);
            }
        }
        for field in &self.fields {
            for r in field.refs() {
                f(RefOwner::Field(field.id), r);
            }
        }
        for cond in self.conds.values() {
            for r in cond.refs() {
                f(RefOwner::Condition(cond.id), r);
            }
        }
    }

    /// Deactivate refs whose node vanished and apply their loss policy,
    /// repeating until nothing else is lost.
    pub(crate) fn purge(&mut self) {
        for sub in &mut self.sub_queries {
            sub.purge();
        }
        loop {
            let scope = Scope::of(self);
            let mut lost: Vec<(RefOwner, Handle, LossPolicy)> = Vec::new();
            self.for_each_ref_mut(|owner, r| {
                if let Some(h) = r.target() {
                    if !scope.exists(h) {
                        let policy = r.policy();
                        if let Some(h) = r.deactivate() {
                            lost.push((owner, h, policy));
                        }
                    }
                }
            });
            if lost.is_empty() {
                break;
            }
            for (owner, node, policy) in lost {
                trace!(?owner, %node, "reference lost");
                self.notify(QueryEvent::RefLost { owner, node });
                if policy == LossPolicy::DestroyOwner {
                    self.destroy_owner(owner);
                }
            }
        }
        let fields: BTreeSet<FieldId> = self.fields.iter().map(|f| f.id).collect();
        self.order_by.retain(|o| fields.contains(&o.field));
    }

    fn destroy_owner(&mut self, owner: RefOwner) {
        match owner {
            RefOwner::Target(t) if self.target(t).is_some() => self.remove_target_inner(t),
            RefOwner::Join(j) if self.join(j).is_some() => self.remove_join_inner(j),
            RefOwner::Field(f) if self.field(f).is_some() => self.remove_field_inner(f),
            RefOwner::Condition(c) if self.conds.contains_key(&c) => self.destroy_condition(c),
            _ => {}
        }
    }

    /// Point column refs at whatever their target currently represents.
    fn refresh_column_helpers(&mut self) {
        let entities: BTreeMap<TargetId, Option<Handle>> = self
            .targets
            .iter()
            .map(|t| (t.id, t.entity.target().cloned()))
            .collect();
        for field in &mut self.fields {
            let target = field.target();
            if let FieldKind::Column { column, .. } = &mut field.kind {
                if column.mode() != RefMode::ByName {
                    continue;
                }
                let helper = target.and_then(|t| entities.get(&t).cloned().flatten());
                if column.helper() != helper.as_ref() {
                    let kind = match helper {
                        Some(Handle::Query(_)) => RefKind::Field,
                        _ => RefKind::Column,
                    };
                    let key = column.key().to_string();
                    column.set_key(kind, RefMode::ByName, key);
                    column.set_helper(helper);
                }
            }
        }
    }

    fn activate_pass(&mut self) -> bool {
        let scope = Scope::of(self);
        let mut found = Vec::new();
        let mut all = true;
        self.for_each_ref_mut(|owner, r| {
            if r.is_active() {
                return;
            }
            if r.activate(&scope) {
                if let Some(h) = r.target() {
                    found.push((owner, h.clone()));
                }
            } else {
                all = false;
            }
        });
        for (owner, node) in found {
            self.notify(QueryEvent::RefFound { owner, node });
        }
        all
    }

    /// Resolve every inactive reference in this query and its sub-queries.
    /// Returns whether everything is active afterwards.
    pub fn activate_all(&mut self) -> bool {
        let mut all = true;
        for sub in &mut self.sub_queries {
            all &= sub.activate_all();
        }
        self.purge();
        self.activate_pass();
        self.refresh_column_helpers();
        all &= self.activate_pass();
        all
    }

    /// Swap the catalog and re-resolve every catalog reference against it.
    pub fn set_catalog(&mut self, catalog: Arc<dyn Catalog>) {
        self.catalog = Arc::clone(&catalog);
        for sub in self.sub_queries.iter_mut().chain(&mut self.param_sources) {
            sub.set_catalog(Arc::clone(&catalog));
        }
        let scope = Scope::of(self);
        let mut lost = Vec::new();
        self.for_each_ref_mut(|owner, r| {
            let Some(old) = r.target().cloned() else { return };
            if !old.is_catalog() {
                return;
            }
            if r.mode() == RefMode::ByName || !scope.exists(&old) {
                r.deactivate();
                if !r.activate(&scope) || r.target() != Some(&old) {
                    lost.push((owner, old));
                }
            }
        });
        for (owner, node) in lost {
            self.notify(QueryEvent::RefLost { owner, node });
        }
        self.activate_all();
        self.after_change();
    }

    /// Whether any reference in this query is unresolved.
    pub fn has_inactive_refs(&self) -> bool {
        let mut inactive = false;
        self.for_each_ref(|_, r| inactive |= !r.is_active());
        inactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CondKind, LeafOp, NodeOp, Value};
    use crate::catalog::Dictionary;
    use pretty_assertions::assert_eq;

    fn catalog() -> Arc<dyn Catalog> {
        Arc::new(
            Dictionary::new()
                .with_table("tbl", &["id", "x", "y"])
                .with_table("other", &["id"]),
        )
    }

    #[test]
    fn test_modify_query_single_target() {
        let mut q = Query::with_kind(catalog(), QueryKind::Update);
        q.add_target(Entity::table("tbl"), None).unwrap();
        let err = q.add_target(Entity::table("other"), None).unwrap_err();
        assert!(matches!(err, SqlGraphError::Structure(_)));
    }

    #[test]
    fn test_compound_query_refuses_targets() {
        let mut q = Query::with_kind(catalog(), QueryKind::Union);
        assert!(q.add_target(Entity::table("tbl"), None).is_err());
    }

    #[test]
    fn test_default_alias() {
        let mut q = Query::new(catalog());
        let t = q.add_target(Entity::table("tbl"), None).unwrap();
        assert_eq!(q.target(t).unwrap().alias(), format!("t{}", t.serial()));
    }

    #[test]
    fn test_unknown_table_target_stays_inactive() {
        let mut q = Query::new(catalog());
        let t = q.add_target(Entity::table("nowhere"), Some("n")).unwrap();
        assert!(q.target(t).unwrap().represented_entity().is_none());
        assert!(q.has_inactive_refs());
    }

    #[test]
    fn test_unparsed_raw_text_blocks_structural_edits() {
        let mut q = Query::new(catalog());
        q.raw = Some(RawText {
            sql: "VACUUM".into(),
            origin: RawOrigin::Unparsed,
            placeholders: Vec::new(),
        });
        q.kind = QueryKind::RawText;
        let err = q.add_target(Entity::table("tbl"), None).unwrap_err();
        assert!(matches!(err, SqlGraphError::Structure(_)));
    }

    #[test]
    fn test_assigned_raw_text_is_forgotten_on_edit() {
        let mut q = Query::new(catalog());
        q.assign_raw_text("SELECT 1");
        assert_eq!(q.kind(), QueryKind::RawText);
        q.add_target(Entity::table("tbl"), None).unwrap();
        assert_eq!(q.kind(), QueryKind::Select);
        assert!(q.raw_text().is_none());
    }

    #[test]
    fn test_batch_emits_single_changed() {
        let mut q = Query::new(catalog());
        q.take_events();
        q.batch(|q| {
            let t = q.add_target(Entity::table("tbl"), None).unwrap();
            q.add_field(Field::column(q, t, "x")).unwrap();
            q.add_field(Field::column(q, t, "y")).unwrap();
        });
        assert_eq!(q.take_events(), vec![QueryEvent::Changed]);
    }

    #[test]
    fn test_nested_batch_defers_gc_to_outermost() {
        let mut q = Query::new(catalog());
        q.begin_batch();
        q.begin_batch();
        q.add_field(Field::value(Value::Int(1)).hidden()).unwrap();
        q.end_batch();
        assert_eq!(q.fields().len(), 1);
        q.end_batch();
        assert_eq!(q.fields().len(), 0);
    }

    #[test]
    fn test_removing_field_destroys_dependent_condition() {
        let mut q = Query::new(catalog());
        let t = q.add_target(Entity::table("tbl"), None).unwrap();
        let x = q.add_field(Field::column(&q, t, "x")).unwrap();
        let cond = q.batch(|q| {
            let three = q.add_field(Field::value(Value::Int(3)).hidden()).unwrap();
            let leaf = q.new_leaf(LeafOp::Equal, &[x, three]).unwrap();
            q.set_condition(Some(leaf)).unwrap();
            leaf
        });
        assert_eq!(q.fields().len(), 2);
        q.remove_field(x).unwrap();
        assert!(q.condition(cond).is_none());
        assert_eq!(q.where_condition(), None);
        // the literal lost its only user
        assert!(q.fields().is_empty());
    }

    #[test]
    fn test_removing_where_child_keeps_parent() {
        let mut q = Query::new(catalog());
        let t = q.add_target(Entity::table("tbl"), None).unwrap();
        let x = q.add_field(Field::column(&q, t, "x")).unwrap();
        let y = q.add_field(Field::column(&q, t, "y")).unwrap();
        let (and, a) = q.batch(|q| {
            let and = q.new_condition(CondKind::Node(NodeOp::And));
            let a = q.new_leaf(LeafOp::Equal, &[x, y]).unwrap();
            let b = q.new_leaf(LeafOp::Diff, &[x, y]).unwrap();
            q.add_child(and, a).unwrap();
            q.add_child(and, b).unwrap();
            q.set_condition(Some(and)).unwrap();
            (and, a)
        });
        q.remove_child(and, a).unwrap();
        assert_eq!(q.condition(and).unwrap().children().len(), 1);
        assert!(q.condition(a).is_none());
    }

    #[test]
    fn test_set_catalog_loses_vanished_table() {
        let mut dict = Dictionary::new().with_table("tbl", &["id", "x"]);
        let mut q = Query::new(Arc::new(dict.clone()));
        let t = q.add_target(Entity::table("tbl"), None).unwrap();
        q.add_field(Field::column(&q, t, "x")).unwrap();
        assert!(!q.has_inactive_refs());
        q.take_events();

        dict.remove_table("tbl");
        q.set_catalog(Arc::new(dict));
        assert!(q.target(t).unwrap().represented_entity().is_none());
        assert!(
            q.take_events()
                .iter()
                .any(|e| matches!(e, QueryEvent::RefLost { owner: RefOwner::Target(_), .. }))
        );
        // catalog refs revert instead of destroying their owner
        assert_eq!(q.fields().len(), 1);
    }

    #[test]
    fn test_late_table_is_found() {
        let mut q = Query::new(Arc::new(Dictionary::new()));
        let t = q.add_target(Entity::table("late"), None).unwrap();
        q.add_field(Field::column(&q, t, "v")).unwrap();
        assert!(q.has_inactive_refs());
        q.set_catalog(Arc::new(Dictionary::new().with_table("late", &["v"])));
        assert!(!q.has_inactive_refs());
    }

    #[test]
    fn test_parameters_follow_call_args() {
        let dict = Dictionary::new()
            .with_table("tbl", &["id"])
            .with_function("lower", &[crate::ast::ValueType::Text], crate::ast::ValueType::Text);
        let mut q = Query::new(Arc::new(dict));
        let call = q.batch(|q| {
            let p = q
                .add_field(Field::parameter("who", crate::ast::ValueType::Text).hidden())
                .unwrap();
            q.add_field(Field::call(q, "lower", &[p])).unwrap()
        });
        let params = q.field_parameters(call);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "who");
        assert_eq!(q.parameters().len(), 1);
    }

    #[test]
    fn test_fields_equal_ignores_alias() {
        let mut q = Query::new(catalog());
        let t = q.add_target(Entity::table("tbl"), None).unwrap();
        let a = q.add_field(Field::column(&q, t, "x")).unwrap();
        let b = q.add_field(Field::column(&q, t, "x").with_alias("other")).unwrap();
        let c = q.add_field(Field::column(&q, t, "y")).unwrap();
        assert!(q.fields_equal(a, b));
        assert!(!q.fields_equal(a, c));
    }
}
