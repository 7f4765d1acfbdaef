//! Statement tree to query graph.
//!
//! Importing into a query that already has structure reuses what it can:
//! targets are matched by alias and then by entity name, fields by shape.
//! Anything the new statement no longer mentions is removed at the end, so
//! conditions and fields hanging off surviving targets keep their ids across
//! a re-parse of edited SQL.

use crate::ast::{
    CondId, CondKind, Entity, Field, FieldId, FieldKind, Join, JoinKind, LeafOp, NodeOp, Query,
    QueryEvent, QueryId, QueryKind, RawOrigin, RawPlaceholder, RawText, TargetId, Value,
};
use crate::catalog::{Lookup, foreign_key_between};
use crate::error::{Result, SqlGraphError};
use crate::parser::{
    self, Expr, FromItem, Insert, InsertSource, JoinClause, OrderKey, Select, SelectItem,
    Statement, TableRef, Update, delimiter,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Rebuild `query` from `stmt` inside a single batch.
pub fn import(query: &mut Query, stmt: &Statement) -> Result<()> {
    query.batch(|q| Importer::new(q).run(stmt))
}

impl Query {
    /// Parse `sql` and import it. Text that fails to parse or to import is
    /// kept verbatim as RawText; its `:name:type:` placeholders become hidden
    /// parameters.
    pub fn set_raw_text(&mut self, sql: &str) -> Result<()> {
        match parser::parse(sql) {
            Ok(stmt) => self.batch(|q| match Importer::new(q).run(&stmt) {
                Ok(()) => Ok(()),
                Err(err) => {
                    warn!(query = %q.id(), error = %err, "import failed, keeping SQL as raw text");
                    q.keep_unparsed(sql)
                }
            }),
            Err(err) => {
                warn!(query = %self.id(), error = %err, "keeping SQL as raw text");
                self.batch(|q| q.keep_unparsed(sql))
            }
        }
    }

    fn keep_unparsed(&mut self, sql: &str) -> Result<()> {
        self.clear_structure();
        self.kind = QueryKind::Select;
        let mut placeholders = Vec::new();
        for p in delimiter::scan(sql) {
            let existing = self
                .fields
                .iter()
                .find(|f| f.is_parameter() && f.name() == Some(p.name.as_str()))
                .map(Field::id);
            let field = match existing {
                Some(f) => f,
                None => {
                    let mut field = Field::parameter(&p.name, p.value_type).hidden();
                    if let Some(descr) = &p.description {
                        field = field.described(descr);
                    }
                    if !p.nullable {
                        field = field.not_null();
                    }
                    if let Some(default) =
                        p.default.as_deref().and_then(|d| p.value_type.parse_value(d))
                    {
                        field = field.with_default(default);
                    }
                    self.add_field(field)?
                }
            };
            placeholders.push(RawPlaceholder {
                span: p.span,
                field,
            });
        }
        self.kind = QueryKind::RawText;
        self.raw = Some(RawText {
            sql: sql.to_string(),
            origin: RawOrigin::Unparsed,
            placeholders,
        });
        self.notify(QueryEvent::Changed);
        Ok(())
    }
}

/// Walks one statement into one query. Sub-queries get their own importer.
struct Importer<'a> {
    q: &'a mut Query,
    old_targets: Vec<TargetId>,
    old_fields: BTreeSet<FieldId>,
    old_subs: Vec<QueryId>,
    /// Lowercased alias, or entity name when unique, of targets present before the import.
    reusable: HashMap<String, TargetId>,
    targets: Vec<TargetId>,
    fields: BTreeSet<FieldId>,
    subs: BTreeSet<QueryId>,
}

impl<'a> Importer<'a> {
    fn new(q: &'a mut Query) -> Self {
        let old_targets: Vec<TargetId> = q.targets().iter().map(|t| t.id()).collect();
        let mut reusable = HashMap::new();
        for t in q.targets() {
            if let Some(alias) = t.explicit_alias() {
                reusable.insert(alias.to_lowercase(), t.id());
            }
        }
        for t in q.targets() {
            let name = t.entity_name().to_lowercase();
            let unique = q
                .targets()
                .iter()
                .filter(|o| o.entity_name().eq_ignore_ascii_case(&name))
                .count()
                == 1;
            if unique {
                reusable.entry(name).or_insert(t.id());
            }
        }
        Self {
            old_targets,
            old_fields: q.fields().iter().map(Field::id).collect(),
            old_subs: q.sub_queries().iter().map(Query::id).collect(),
            reusable,
            targets: Vec::new(),
            fields: BTreeSet::new(),
            subs: BTreeSet::new(),
            q,
        }
    }

    fn run(mut self, stmt: &Statement) -> Result<()> {
        self.reset(stmt.kind());
        match stmt {
            Statement::Select(s) => self.select(s)?,
            Statement::Insert(i) => self.insert(i)?,
            Statement::Update(u) => self.update(u)?,
            Statement::Delete(d) => {
                self.single_target(&d.table, d.alias.as_deref())?;
                self.selection(d.selection.as_ref())?;
            }
            Statement::Compound(c) => {
                for (i, operand) in c.operands.iter().enumerate() {
                    self.sub_query(operand, self.old_subs.get(i).copied())?;
                }
            }
        }
        self.drop_leftovers();
        Ok(())
    }

    /// Clear what is always rebuilt: joins, WHERE, ORDER BY and the plain flags.
    fn reset(&mut self, kind: QueryKind) {
        let joins: Vec<_> = self.q.joins().iter().map(|j| j.id()).collect();
        for j in joins {
            self.q.remove_join_inner(j);
        }
        if let Some(root) = self.q.where_cond.take() {
            self.q.destroy_condition(root);
        }
        self.q.order_by.clear();
        self.q.raw = None;
        self.q.distinct = false;
        self.q.limit = None;
        self.q.offset = None;
        if kind.is_compound() {
            for t in self.old_targets.clone() {
                self.q.remove_target_inner(t);
            }
            self.reusable.clear();
        }
        self.q.kind = kind;
        self.q.notify(QueryEvent::Changed);
    }

    fn drop_leftovers(&mut self) {
        for t in self.old_targets.clone() {
            if !self.targets.contains(&t) && self.q.target(t).is_some() {
                debug!(query = %self.q.id(), target = %t, "dropping target not in statement");
                self.q.remove_target_inner(t);
            }
        }
        for f in self.old_fields.clone() {
            if !self.fields.contains(&f) && self.q.field(f).is_some() {
                self.q.remove_field_inner(f);
            }
        }
        for s in self.old_subs.clone() {
            if !self.subs.contains(&s) {
                self.q.sub_queries.retain(|q| q.id() != s);
                self.q.notify(QueryEvent::SubQueryRemoved(s));
            }
        }
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn select(&mut self, s: &Select) -> Result<()> {
        self.q.distinct = s.distinct;
        for item in &s.from {
            self.from_item(item)?;
        }
        for item in &s.items {
            match item {
                SelectItem::Wildcard => {
                    for t in self.targets.clone() {
                        self.wildcard(t)?;
                    }
                }
                SelectItem::QualifiedWildcard(name) => {
                    let t = self.resolve_target(name)?;
                    self.wildcard(t)?;
                }
                SelectItem::Expr { expr, alias } => {
                    let f = self.field(expr, true)?;
                    self.q
                        .update_field(f, |field| field.set_alias(alias.as_deref()))?;
                }
            }
        }
        self.selection(s.selection.as_ref())?;
        for item in &s.order_by {
            let field = match &item.key {
                OrderKey::Position(n) => n
                    .checked_sub(1)
                    .and_then(|i| self.q.visible_fields().nth(i))
                    .map(Field::id)
                    .ok_or_else(|| {
                        SqlGraphError::import(format!("ORDER BY position {} out of range", n))
                    })?,
                OrderKey::Expr(expr) => match self.projected_alias(expr) {
                    Some(f) => f,
                    None => self.field(expr, false)?,
                },
            };
            self.q.set_order_by_field(field, None, item.ascending)?;
        }
        self.q.limit = s.limit;
        self.q.offset = s.offset;
        Ok(())
    }

    fn insert(&mut self, i: &Insert) -> Result<()> {
        let target = self.single_target(&i.table, None)?;
        match &i.source {
            InsertSource::DefaultValues => {}
            InsertSource::Values(values) => {
                let columns = if i.columns.is_empty() {
                    self.table_columns(target)?
                } else {
                    i.columns.clone()
                };
                if columns.len() != values.len() {
                    return Err(SqlGraphError::import(
                        "Insert: mismatched number of columns and values",
                    ));
                }
                for (column, value) in columns.iter().zip(values) {
                    self.assignment(target, column, value)?;
                }
            }
            InsertSource::Query(stmt) => {
                let sub = self.sub_query(stmt, self.old_subs.first().copied())?;
                let produced = self
                    .q
                    .sub_query(sub)
                    .map(|s| s.visible_fields().count())
                    .unwrap_or_default();
                if !i.columns.is_empty() && i.columns.len() != produced {
                    return Err(SqlGraphError::import(
                        "Insert: mismatched number of columns and values",
                    ));
                }
                for column in &i.columns {
                    self.column_field(target, column, true)?;
                }
            }
        }
        Ok(())
    }

    fn update(&mut self, u: &Update) -> Result<()> {
        let target = self.single_target(&u.table, u.alias.as_deref())?;
        for (column, value) in &u.assignments {
            self.assignment(target, column, value)?;
        }
        self.selection(u.selection.as_ref())
    }

    /// A visible column whose value provider is the hidden expression.
    fn assignment(&mut self, target: TargetId, column: &str, value: &Expr) -> Result<()> {
        let field = self.column_field(target, column, true)?;
        let provider = self.field(value, false)?;
        self.q.set_value_provider(field, Some(provider))
    }

    fn table_columns(&self, target: TargetId) -> Result<Vec<String>> {
        let table = self
            .q
            .target(target)
            .and_then(|t| t.table().cloned())
            .ok_or_else(|| SqlGraphError::import("Insert: column list required"))?;
        Ok(self
            .q
            .catalog()
            .columns(&table)
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    fn selection(&mut self, expr: Option<&Expr>) -> Result<()> {
        if let Some(expr) = expr {
            let root = self.condition(expr)?;
            self.q.set_condition(Some(root))?;
        }
        Ok(())
    }

    /// Import `stmt` into an owned sub-query, reusing `existing` when given.
    fn sub_query(&mut self, stmt: &Statement, existing: Option<QueryId>) -> Result<QueryId> {
        if let Some(id) = existing.filter(|id| !self.subs.contains(id)) {
            if let Some(sub) = self.q.sub_query_mut(id) {
                import(sub, stmt)?;
                self.subs.insert(id);
                return Ok(id);
            }
        }
        let mut sub = Query::new(Arc::clone(self.q.catalog()));
        import(&mut sub, stmt)?;
        let id = self.q.add_sub_query(sub)?;
        self.subs.insert(id);
        Ok(id)
    }

    // ------------------------------------------------------------------
    // targets and joins
    // ------------------------------------------------------------------

    /// The only target of a modification; every other old target goes first
    /// since a second one would be refused.
    fn single_target(&mut self, table: &str, alias: Option<&str>) -> Result<TargetId> {
        let keep = self.reusable_target(table, alias);
        let others: Vec<TargetId> = self
            .q
            .targets()
            .iter()
            .map(|t| t.id())
            .filter(|t| Some(*t) != keep)
            .collect();
        for t in others {
            self.q.remove_target_inner(t);
        }
        self.table_target(table, alias)
    }

    fn from_item(&mut self, item: &FromItem) -> Result<()> {
        let mut previous = self.target(&item.source)?;
        for clause in &item.joins {
            let placed = self.targets.clone();
            let next = self.target(&clause.table)?;
            self.join(clause, &placed, previous, next)?;
            previous = next;
        }
        Ok(())
    }

    fn target(&mut self, table: &TableRef) -> Result<TargetId> {
        match table {
            TableRef::Table { name, alias } => self.table_target(name, alias.as_deref()),
            TableRef::SubQuery { query, alias } => {
                let reused = alias
                    .as_deref()
                    .and_then(|a| self.reusable.get(&a.to_lowercase()).copied())
                    .filter(|t| !self.targets.contains(t))
                    .and_then(|t| Some((t, self.q.target(t)?.sub_query()?)));
                if let Some((t, sub)) = reused {
                    self.sub_query(query, Some(sub))?;
                    debug!(query = %self.q.id(), target = %t, "reusing sub-query target");
                    self.targets.push(t);
                    return Ok(t);
                }
                let sub = self.sub_query(query, None)?;
                let t = self.q.add_target(Entity::SubQuery(sub), alias.as_deref())?;
                self.targets.push(t);
                Ok(t)
            }
        }
    }

    fn table_target(&mut self, name: &str, alias: Option<&str>) -> Result<TargetId> {
        let t = match self.reusable_target(name, alias) {
            Some(t) => {
                debug!(query = %self.q.id(), target = %t, entity = name, "reusing target");
                self.q.set_target_alias(t, alias)?;
                t
            }
            None => self.q.add_target(Entity::table(name), alias)?,
        };
        self.targets.push(t);
        Ok(t)
    }

    fn reusable_target(&self, name: &str, alias: Option<&str>) -> Option<TargetId> {
        let key = alias.unwrap_or(name).to_lowercase();
        self.reusable
            .get(&key)
            .copied()
            .filter(|t| !self.targets.contains(t))
            .filter(|t| {
                self.q
                    .target(*t)
                    .is_some_and(|x| x.entity_name().eq_ignore_ascii_case(name))
            })
    }

    fn join(
        &mut self,
        clause: &JoinClause,
        placed: &[TargetId],
        previous: TargetId,
        next: TargetId,
    ) -> Result<()> {
        if clause.kind == JoinKind::Cross {
            let join = Join::new(self.q, previous, next).with_kind(JoinKind::Cross);
            self.q.add_join(join)?;
            return Ok(());
        }
        match &clause.on {
            Some(on) => {
                let cond = self.condition(on)?;
                let others: BTreeSet<TargetId> = self
                    .q
                    .condition_fields(cond)
                    .into_iter()
                    .flat_map(|f| self.q.field_targets(f))
                    .filter(|t| *t != next)
                    .collect();
                let partner = match others.len() {
                    0 => previous,
                    1 => others.into_iter().next().unwrap_or(previous),
                    _ => {
                        self.q.destroy_condition(cond);
                        return Err(SqlGraphError::import(
                            "Join condition references more than two targets",
                        ));
                    }
                };
                let join = Join::new(self.q, partner, next).with_kind(clause.kind);
                let id = self.q.add_join(join)?;
                if !self.q.set_join_condition(id, Some(cond)) {
                    self.q.destroy_condition(cond);
                    return Err(SqlGraphError::import(
                        "Join condition does not link the joined targets",
                    ));
                }
            }
            None => {
                let partner = self.join_partner(placed, previous, next)?;
                debug!(query = %self.q.id(), %partner, %next, "join partner inferred");
                let join = Join::new(self.q, partner, next).with_kind(clause.kind);
                self.q.add_join(join)?;
            }
        }
        Ok(())
    }

    /// The single placed target sharing exactly one foreign key with `next`.
    fn join_partner(
        &self,
        placed: &[TargetId],
        previous: TargetId,
        next: TargetId,
    ) -> Result<TargetId> {
        let Some(table) = self.q.target(next).and_then(|t| t.table().cloned()) else {
            return Ok(previous);
        };
        let mut found = Vec::new();
        for t in placed {
            let Some(other) = self.q.target(*t).and_then(|x| x.table().cloned()) else {
                return Ok(*t);
            };
            match foreign_key_between(self.q.catalog().as_ref(), &table, &other) {
                Lookup::One(_) => found.push(*t),
                Lookup::Ambiguous(_) => {
                    return Err(SqlGraphError::import(
                        "Ambiguous join: multiple possible foreign key constraints",
                    ));
                }
                Lookup::None => {}
            }
        }
        match found.as_slice() {
            [one] => Ok(*one),
            [] => Err(SqlGraphError::import(
                "Ambiguous join: no target to join with",
            )),
            _ => Err(SqlGraphError::import(
                "Ambiguous join: multiple possible targets to join with",
            )),
        }
    }

    /// Target named `name` among those imported so far: alias first, then
    /// entity name of an unaliased target.
    fn resolve_target(&self, name: &str) -> Result<TargetId> {
        let by_alias = self.targets.iter().copied().find(|t| {
            self.q
                .target(*t)
                .is_some_and(|x| x.alias().eq_ignore_ascii_case(name))
        });
        let by_entity = || {
            let matching: Vec<TargetId> = self
                .targets
                .iter()
                .copied()
                .filter(|t| {
                    self.q
                        .target(*t)
                        .is_some_and(|x| x.entity_name().eq_ignore_ascii_case(name))
                })
                .collect();
            match matching.as_slice() {
                [one] => Some(*one),
                _ => None,
            }
        };
        by_alias
            .or_else(by_entity)
            .ok_or_else(|| SqlGraphError::import(format!("Non-declared target '{}'", name)))
    }

    /// Target providing a bare column name.
    fn column_owner(&self, column: &str) -> Result<TargetId> {
        let mut having = Vec::new();
        let mut unknown = Vec::new();
        for t in &self.targets {
            match self.target_has_column(*t, column) {
                Some(true) => having.push(*t),
                Some(false) => {}
                None => unknown.push(*t),
            }
        }
        match (having.as_slice(), unknown.as_slice()) {
            ([one], _) => Ok(*one),
            ([_, _, ..], _) => Err(SqlGraphError::import(format!(
                "Ambiguous column '{}'",
                column
            ))),
            ([], [one]) => Ok(*one),
            _ if self.targets.len() == 1 => Ok(self.targets[0]),
            _ => Err(SqlGraphError::import(format!(
                "Can't find a target for column '{}'",
                column
            ))),
        }
    }

    /// `None` when the target's columns are not known.
    fn target_has_column(&self, target: TargetId, column: &str) -> Option<bool> {
        let t = self.q.target(target)?;
        if let Some(table) = t.table() {
            return Some(!self.q.catalog().column_by_name(table, column).is_none());
        }
        let sub = self.q.sub_query(t.sub_query()?)?;
        Some(sub.visible_fields().any(|f| {
            f.alias()
                .or(f.name())
                .is_some_and(|n| n.eq_ignore_ascii_case(column))
        }))
    }

    // ------------------------------------------------------------------
    // fields
    // ------------------------------------------------------------------

    /// A visible field whose alias is a bare column name in ORDER BY.
    fn projected_alias(&self, expr: &Expr) -> Option<FieldId> {
        let Expr::Column { table: None, name } = expr else {
            return None;
        };
        self.q
            .visible_fields()
            .find(|f| f.alias().is_some_and(|a| a.eq_ignore_ascii_case(name)))
            .map(Field::id)
    }

    fn field(&mut self, expr: &Expr, visible: bool) -> Result<FieldId> {
        match expr {
            Expr::Literal(v) => self.new_field(Field::value(v.clone()), visible),
            Expr::Default => self.new_field(Field::default_keyword(), visible),
            Expr::Param { name, value_type } => {
                let existing = self.reusable_field(visible, |f| {
                    f.is_parameter() && f.name() == Some(name.as_str())
                });
                match existing {
                    Some(f) => self.claim(f, visible),
                    None => self.new_field(
                        Field::parameter(name, value_type.unwrap_or_default()),
                        visible,
                    ),
                }
            }
            Expr::Column { table, name } => {
                let target = match table {
                    Some(t) => self.resolve_target(t)?,
                    None => self.column_owner(name)?,
                };
                self.column_field(target, name, visible)
            }
            Expr::Call { name, args } => self.call(name, args, visible),
            Expr::Star => Err(SqlGraphError::import("'*' is only allowed in count(*)")),
            _ => Err(SqlGraphError::import(
                "A condition can't be used as a value",
            )),
        }
    }

    fn column_field(&mut self, target: TargetId, column: &str, visible: bool) -> Result<FieldId> {
        let existing = self.reusable_field(visible, |f| {
            matches!(f.kind(), FieldKind::Column { .. })
                && f.target() == Some(target)
                && f.name().is_some_and(|n| n.eq_ignore_ascii_case(column))
        });
        match existing {
            Some(f) => self.claim(f, visible),
            None => {
                let field = Field::column(self.q, target, column);
                self.new_field(field, visible)
            }
        }
    }

    fn wildcard(&mut self, target: TargetId) -> Result<FieldId> {
        let existing = self.reusable_field(true, |f| {
            matches!(f.kind(), FieldKind::Wildcard { .. }) && f.target() == Some(target)
        });
        match existing {
            Some(f) => self.claim(f, true),
            None => {
                let field = Field::wildcard(self.q, target);
                self.new_field(field, true)
            }
        }
    }

    fn call(&mut self, name: &str, args: &[Expr], visible: bool) -> Result<FieldId> {
        let query = self.q.id();
        let aggregate = !self.q.catalog().aggregates_by_name(name).is_none();
        if aggregate {
            let arg = match args {
                [] | [Expr::Star] => None,
                [one] => Some(self.field(one, false)?),
                _ => {
                    return Err(SqlGraphError::import(format!(
                        "Aggregate '{}' takes one argument",
                        name
                    )));
                }
            };
            let existing = self.reusable_field(visible, |f| {
                matches!(f.kind(), FieldKind::Aggregate { aggregate, .. }
                    if aggregate.key().eq_ignore_ascii_case(name))
                    && f.referenced_fields(query) == arg.into_iter().collect::<Vec<_>>()
            });
            return match existing {
                Some(f) => self.claim(f, visible),
                None => {
                    let field = Field::aggregate(self.q, name, arg);
                    self.new_field(field, visible)
                }
            };
        }
        let mut ids = Vec::with_capacity(args.len());
        for arg in args {
            ids.push(self.field(arg, false)?);
        }
        let existing = self.reusable_field(visible, |f| {
            matches!(f.kind(), FieldKind::Call { function, .. }
                if function.key().eq_ignore_ascii_case(name))
                && f.referenced_fields(query) == ids
        });
        match existing {
            Some(f) => self.claim(f, visible),
            None => {
                let field = Field::call(self.q, name, &ids);
                self.new_field(field, visible)
            }
        }
    }

    /// A field matching `pred` that this import may take over.
    ///
    /// Projection items only take fields predating the import and not yet
    /// claimed; hidden operands may also share fields already imported.
    fn reusable_field(&self, visible: bool, pred: impl Fn(&Field) -> bool) -> Option<FieldId> {
        let fresh = |f: &&Field| self.old_fields.contains(&f.id()) && !self.fields.contains(&f.id());
        let unclaimed = self.q.fields().iter().filter(fresh).find(|f| pred(*f));
        if visible {
            return unclaimed.map(Field::id);
        }
        self.q
            .fields()
            .iter()
            .find(|f| self.fields.contains(&f.id()) && pred(*f))
            .or(unclaimed)
            .map(Field::id)
    }

    fn claim(&mut self, id: FieldId, visible: bool) -> Result<FieldId> {
        let first_claim = self.fields.insert(id);
        if first_claim {
            debug!(query = %self.q.id(), field = %id, "reusing field");
            self.q.update_field(id, |f| {
                f.set_visible(visible);
                if !visible {
                    f.set_alias(None);
                }
            })?;
        }
        Ok(id)
    }

    fn new_field(&mut self, field: Field, visible: bool) -> Result<FieldId> {
        let field = if visible { field } else { field.hidden() };
        let id = self.q.add_field(field)?;
        self.fields.insert(id);
        Ok(id)
    }

    // ------------------------------------------------------------------
    // conditions
    // ------------------------------------------------------------------

    fn condition(&mut self, expr: &Expr) -> Result<CondId> {
        match expr {
            Expr::And(parts) | Expr::Or(parts) => {
                let op = if matches!(expr, Expr::And(_)) {
                    NodeOp::And
                } else {
                    NodeOp::Or
                };
                let node = self.q.new_condition(CondKind::Node(op));
                for part in parts {
                    let child = self.condition(part)?;
                    self.q.add_child(node, child)?;
                }
                Ok(node)
            }
            Expr::Not(inner) => {
                let node = self.q.new_condition(CondKind::Node(NodeOp::Not));
                let child = self.condition(inner)?;
                self.q.add_child(node, child)?;
                Ok(node)
            }
            Expr::Compare { op, left, right } => {
                let l = self.field(left, false)?;
                let r = self.field(right, false)?;
                self.q.new_leaf(*op, &[l, r])
            }
            Expr::Between { expr, low, high } => {
                let e = self.field(expr, false)?;
                let lo = self.field(low, false)?;
                let hi = self.field(high, false)?;
                self.q.new_leaf(LeafOp::Between, &[e, lo, hi])
            }
            Expr::InList { expr, list } => {
                let e = self.field(expr, false)?;
                let values = match list.as_slice() {
                    [single] => self.field(single, false)?,
                    _ => {
                        let items = list
                            .iter()
                            .map(|item| match item {
                                Expr::Literal(v) => Ok(v.clone()),
                                _ => Err(SqlGraphError::import(
                                    "IN lists may only hold literal values",
                                )),
                            })
                            .collect::<Result<Vec<Value>>>()?;
                        self.new_field(Field::value(Value::List(items)), false)?
                    }
                };
                self.q.new_leaf(LeafOp::In, &[e, values])
            }
            Expr::IsNull { expr, negated } => {
                let e = self.field(expr, false)?;
                let null = self.new_field(Field::value(Value::Null), false)?;
                let op = if *negated { LeafOp::Diff } else { LeafOp::Equal };
                self.q.new_leaf(op, &[e, null])
            }
            _ => Err(SqlGraphError::import("Expected a condition")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CondBody, Slot};
    use crate::catalog::{Catalog, Dictionary};
    use crate::params::ParamContext;
    use crate::transpiler::ToSql;
    use pretty_assertions::assert_eq;

    fn catalog() -> Arc<dyn Catalog> {
        Arc::new(
            Dictionary::new()
                .with_table("tbl", &["id", "x", "y"])
                .with_table("customers", &["id", "name"])
                .with_table("orders", &["id", "customer_id", "total"])
                .with_table("items", &["id", "order_id", "sku"])
                .with_foreign_key("orders", &["customer_id"], "customers", &["id"])
                .with_foreign_key("items", &["order_id"], "orders", &["id"])
                .with_aggregate("count", crate::ast::ValueType::Unknown, crate::ast::ValueType::Integer),
        )
    }

    fn imported(sql: &str) -> Query {
        let mut q = Query::new(catalog());
        q.set_raw_text(sql).unwrap();
        q
    }

    fn import_error(sql: &str) -> SqlGraphError {
        let mut q = Query::new(catalog());
        let stmt = parser::parse(sql).unwrap();
        import(&mut q, &stmt).unwrap_err()
    }

    fn sql(q: &Query) -> String {
        q.to_sql(&ParamContext::new()).unwrap()
    }

    #[test]
    fn test_select_with_condition() {
        let q = imported("SELECT t.x, t.y FROM tbl t WHERE t.x = 3");
        assert_eq!(q.targets().len(), 1);
        assert_eq!(q.targets()[0].alias(), "t");
        assert_eq!(q.visible_fields().count(), 2);

        let root = q.where_condition().unwrap();
        let CondBody::Leaf { op, .. } = q.condition(root).unwrap().body() else {
            panic!("expected a leaf");
        };
        assert_eq!(*op, LeafOp::Equal);
        let left = q.operand(root, Slot::Left).unwrap();
        assert_eq!(q.field(left).unwrap().name(), Some("x"));
        let right = q.operand(root, Slot::Right).unwrap();
        assert_eq!(q.field(right).unwrap().literal().unwrap().value, Some(Value::Int(3)));

        assert_eq!(sql(&q), "SELECT t.x, t.y FROM tbl AS t WHERE t.x = 3");
    }

    #[test]
    fn test_update_single_target() {
        let mut q = imported("UPDATE tbl SET x = 1 WHERE id = 5");
        assert_eq!(q.kind(), QueryKind::Update);
        assert_eq!(q.targets().len(), 1);
        let visible: Vec<&Field> = q.visible_fields().collect();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name(), Some("x"));
        let provider = visible[0].value_provider().unwrap();
        assert_eq!(
            q.field(provider).unwrap().literal().unwrap().value,
            Some(Value::Int(1))
        );
        assert!(q.where_condition().is_some());

        let err = q.add_target(Entity::table("customers"), None).unwrap_err();
        assert!(matches!(err, SqlGraphError::Structure(_)));
        assert_eq!(sql(&q), "UPDATE tbl SET x = 1 WHERE id = 5");
    }

    #[test]
    fn test_reimport_keeps_target_and_field_ids() {
        let mut q = imported("SELECT c.name FROM customers c WHERE c.id = 1");
        let target = q.targets()[0].id();
        let field = q.visible_fields().next().unwrap().id();

        q.set_raw_text("SELECT c.name, c.id FROM customers c").unwrap();
        assert_eq!(q.targets()[0].id(), target);
        assert_eq!(q.visible_fields().next().unwrap().id(), field);
        assert_eq!(q.visible_fields().count(), 2);
        assert!(q.where_condition().is_none());
    }

    #[test]
    fn test_implicit_join_partner() {
        let q = imported("SELECT i.sku FROM orders o JOIN customers c JOIN items i");
        assert_eq!(q.joins().len(), 2);
        assert!(q.joins().iter().all(|j| j.condition().is_none()));
        let text = sql(&q);
        assert!(text.contains("INNER JOIN customers AS c ON (o.customer_id = c.id)"), "{}", text);
        assert!(text.contains("INNER JOIN items AS i ON (i.order_id = o.id)"), "{}", text);
    }

    #[test]
    fn test_implicit_join_without_partner() {
        let err = import_error("SELECT * FROM customers c JOIN items i");
        assert_eq!(
            err.to_string(),
            "Parse error at position 0: Ambiguous join: no target to join with"
        );
    }

    #[test]
    fn test_bare_column_ambiguity() {
        let err = import_error("SELECT id FROM customers c, orders o");
        assert!(err.to_string().contains("Ambiguous column 'id'"));

        let q = imported("SELECT name, total FROM customers c, orders o");
        let targets: Vec<_> = q
            .visible_fields()
            .map(|f| f.target().unwrap())
            .collect();
        assert_eq!(targets, vec![q.targets()[0].id(), q.targets()[1].id()]);
    }

    #[test]
    fn test_undeclared_target() {
        let err = import_error("SELECT z.* FROM customers c");
        assert!(err.to_string().contains("Non-declared target 'z'"));
    }

    #[test]
    fn test_star_expands_per_target() {
        let q = imported("SELECT * FROM customers c, tbl");
        assert_eq!(q.visible_fields().count(), 2);
        assert!(q
            .visible_fields()
            .all(|f| matches!(f.kind(), FieldKind::Wildcard { .. })));
    }

    #[test]
    fn test_insert_values_and_mismatch() {
        let q = imported("INSERT INTO customers (name) VALUES ('Ann')");
        assert_eq!(sql(&q), "INSERT INTO customers (name) VALUES ('Ann')");

        let err = import_error("INSERT INTO customers (id, name) VALUES (1)");
        assert!(err.to_string().contains("Insert: mismatched number of columns and values"));
    }

    #[test]
    fn test_order_by_position_and_alias() {
        let q = imported("SELECT c.name AS who, c.id FROM customers c ORDER BY who DESC, 2");
        let order = q.order_by();
        assert_eq!(order.len(), 2);
        assert_eq!(q.visible_position(order[0].field), Some(0));
        assert!(!order[0].ascending);
        assert_eq!(q.visible_position(order[1].field), Some(1));
    }

    #[test]
    fn test_is_null_becomes_equal_null() {
        let q = imported("SELECT c.id FROM customers c WHERE c.name IS NOT NULL");
        let root = q.where_condition().unwrap();
        assert_eq!(q.cond_kind(root), Some(CondKind::Leaf(LeafOp::Diff)));
        assert_eq!(
            sql(&q),
            "SELECT c.id FROM customers AS c WHERE c.name IS NOT NULL"
        );
    }

    #[test]
    fn test_unparseable_text_kept_raw() {
        let mut q = Query::new(catalog());
        q.set_raw_text("VACUUM tbl WHERE x > :lim:int:descr=Lower bound:")
            .unwrap();
        assert_eq!(q.kind(), QueryKind::RawText);
        let params = q.parameters();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "lim");
        assert_eq!(params[0].description.as_deref(), Some("Lower bound"));

        let ctx = ParamContext::new().with("lim", Value::Int(7));
        assert_eq!(q.to_sql(&ctx).unwrap(), "VACUUM tbl WHERE x > 7");

        assert!(q.add_target(Entity::table("tbl"), None).is_err());
        q.set_raw_text("SELECT x FROM tbl").unwrap();
        assert_eq!(q.kind(), QueryKind::Select);
    }

    #[test]
    fn test_import_failure_kept_raw() {
        let mut q = imported("SELECT c.name FROM customers c WHERE c.id = :id::int");
        let text = "SELECT id FROM customers c, orders o";
        q.set_raw_text(text).unwrap();

        assert_eq!(q.kind(), QueryKind::RawText);
        assert!(q.targets().is_empty());
        assert!(q.fields().is_empty());
        assert!(q.where_condition().is_none());
        assert_eq!(q.raw_text().map(|r| r.sql.as_str()), Some(text));
        assert_eq!(sql(&q), text);
    }

    #[test]
    fn test_compound_imports_sub_queries() {
        let q = imported("SELECT id FROM customers UNION SELECT id FROM orders");
        assert_eq!(q.kind(), QueryKind::Union);
        assert_eq!(q.sub_queries().len(), 2);
    }
}
