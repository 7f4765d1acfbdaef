//! SELECT generation and join packing.

use super::Renderer;
use crate::ast::{Join, JoinKind, Query, TargetId};
use crate::catalog::{Lookup, foreign_key_between};
use crate::error::{Result, SqlGraphError};

/// Joins connected through shared targets, kept in join order.
#[derive(Debug, Default)]
pub(crate) struct JoinPack {
    pub(crate) targets: Vec<TargetId>,
    pub(crate) joins: Vec<usize>,
}

/// Partition the joins of `q` into connected components.
pub(crate) fn join_packs(q: &Query) -> Vec<JoinPack> {
    let mut packs: Vec<JoinPack> = Vec::new();
    for (index, join) in q.joins().iter().enumerate() {
        let Some((t1, t2)) = join.targets() else { continue };
        let found: Vec<usize> = packs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.targets.contains(&t1) || p.targets.contains(&t2))
            .map(|(i, _)| i)
            .collect();
        let mut pack = match found.first() {
            Some(&first) => {
                let mut merged = std::mem::take(&mut packs[first]);
                for &other in found.iter().skip(1) {
                    let other = std::mem::take(&mut packs[other]);
                    merged.targets.extend(other.targets);
                    merged.joins.extend(other.joins);
                }
                merged
            }
            None => JoinPack::default(),
        };
        for t in [t1, t2] {
            if !pack.targets.contains(&t) {
                pack.targets.push(t);
            }
        }
        pack.joins.push(index);
        pack.joins.sort_unstable();
        packs.retain(|p| !p.joins.is_empty());
        packs.push(pack);
    }
    // first-appearance order of their earliest join
    packs.sort_by_key(|p| p.joins.first().copied());
    packs
}

impl Renderer<'_> {
    pub(crate) fn select(&mut self, q: &Query) -> Result<String> {
        let sep = self.sep();
        let mut sql = String::from("SELECT ");
        if q.is_distinct() {
            sql.push_str("DISTINCT ");
        }

        let visible: Vec<_> = q.visible_fields().map(|f| f.id()).collect();
        if visible.is_empty() {
            sql.push('*');
        } else {
            let mut cols = Vec::with_capacity(visible.len());
            for id in visible {
                cols.push(self.projected(q, id)?);
            }
            sql.push_str(&cols.join(", "));
        }

        let mut extra_where = Vec::new();
        if !q.targets().is_empty() {
            sql.push_str(sep);
            sql.push_str("FROM ");
            let from = self.from_clause(q, &mut extra_where)?;
            sql.push_str(&from);
        }

        let mut where_parts = Vec::new();
        if let Some(root) = q.where_condition() {
            where_parts.push(self.condition(q, root)?);
        }
        where_parts.extend(extra_where);
        if !where_parts.is_empty() {
            sql.push_str(sep);
            sql.push_str("WHERE ");
            if where_parts.len() > 1 {
                let wrapped: Vec<String> = where_parts.iter().map(|w| format!("({})", w)).collect();
                sql.push_str(&wrapped.join(" AND "));
            } else {
                sql.push_str(&where_parts[0]);
            }
        }

        if !q.order_by().is_empty() {
            let mut parts = Vec::with_capacity(q.order_by().len());
            for order in q.order_by() {
                let expr = match q.visible_position(order.field) {
                    Some(pos) => (pos + 1).to_string(),
                    None => self.field(q, order.field)?,
                };
                parts.push(if order.ascending {
                    expr
                } else {
                    format!("{} DESC", expr)
                });
            }
            sql.push_str(sep);
            sql.push_str("ORDER BY ");
            sql.push_str(&parts.join(", "));
        }

        if let Some(limit) = q.limit() {
            sql.push_str(&format!("{}LIMIT {}", sep, limit));
        }
        if let Some(offset) = q.offset() {
            sql.push_str(&format!("{}OFFSET {}", sep, offset));
        }
        Ok(sql)
    }

    /// `FROM` items: each join pack as a left-deep chain, then lone targets.
    /// Joins closing a cycle inside a pack contribute their condition to `extra_where`.
    fn from_clause(&mut self, q: &Query, extra_where: &mut Vec<String>) -> Result<String> {
        let packs = join_packs(q);
        let mut items = Vec::new();
        let mut placed_any: Vec<TargetId> = Vec::new();

        for pack in &packs {
            let first = q.joins()[pack.joins[0]]
                .target1()
                .ok_or_else(|| SqlGraphError::not_active("join target"))?;
            let mut placed = vec![first];
            let mut chain = self.target(q, first)?;
            let mut pending: Vec<usize> = pack.joins.clone();
            while !pending.is_empty() {
                let next = pending.iter().position(|&j| {
                    q.joins()[j]
                        .targets()
                        .is_some_and(|(a, b)| placed.contains(&a) || placed.contains(&b))
                });
                let Some(pos) = next else {
                    return Err(SqlGraphError::render("Join pack is not connected"));
                };
                let join = &q.joins()[pending.remove(pos)];
                let Some((a, b)) = join.targets() else { continue };
                match (placed.contains(&a), placed.contains(&b)) {
                    (true, true) => {
                        if let Some(on) = self.join_on(q, join)? {
                            extra_where.push(on);
                        }
                    }
                    (a_placed, _) => {
                        let (new, kind) = if a_placed {
                            (b, join.kind())
                        } else {
                            (a, join.kind().mirrored())
                        };
                        chain.push_str(self.sep());
                        chain.push_str(kind.sql());
                        chain.push(' ');
                        chain.push_str(&self.target(q, new)?);
                        if kind != JoinKind::Cross {
                            let on = self.join_on(q, join)?.ok_or_else(|| {
                                SqlGraphError::render("Join has no condition")
                            })?;
                            chain.push_str(&format!(" ON ({})", on));
                        }
                        placed.push(new);
                    }
                }
            }
            placed_any.extend(placed);
            items.push(chain);
        }

        for target in q.targets() {
            if !placed_any.contains(&target.id()) {
                items.push(self.target(q, target.id())?);
            }
        }
        Ok(items.join(", "))
    }

    /// `entity AS alias`; sub-queries render in parentheses.
    fn target(&mut self, q: &Query, id: TargetId) -> Result<String> {
        let target = q
            .target(id)
            .ok_or_else(|| SqlGraphError::not_active(format!("target {}", id)))?;
        let entity = match (target.sub_query(), target.table()) {
            (Some(sub), _) => {
                let sub = q
                    .sub_query(sub)
                    .ok_or_else(|| SqlGraphError::not_active(format!("sub-query {}", sub)))?;
                format!("({})", self.statement(sub)?)
            }
            (None, Some(table)) => {
                let name = q
                    .catalog()
                    .table(table)
                    .map(|t| t.name)
                    .unwrap_or_else(|| target.entity_name().to_string());
                self.ident(&name)
            }
            (None, None) => self.ident(target.entity_name()),
        };
        Ok(format!("{} AS {}", entity, self.ident(&target.alias())))
    }

    /// The ON expression: the join's own condition, or one derived from the
    /// single foreign key between two tables. `None` only for condition-less CROSS joins.
    fn join_on(&mut self, q: &Query, join: &Join) -> Result<Option<String>> {
        if let Some(cond) = join.condition() {
            return self.condition(q, cond).map(Some);
        }
        if join.kind() == JoinKind::Cross {
            return Ok(None);
        }
        let (t1, t2) = join
            .targets()
            .ok_or_else(|| SqlGraphError::not_active("join target"))?;
        let (Some(target1), Some(target2)) = (q.target(t1), q.target(t2)) else {
            return Err(SqlGraphError::not_active("join target"));
        };
        let (Some(table1), Some(table2)) = (target1.table(), target2.table()) else {
            return Err(SqlGraphError::render(format!(
                "Join between '{}' and '{}' has no condition",
                target1.alias(),
                target2.alias()
            )));
        };
        let fk = match foreign_key_between(q.catalog().as_ref(), table1, table2) {
            Lookup::One(fk) => fk,
            Lookup::None => {
                return Err(SqlGraphError::render(format!(
                    "No foreign key between '{}' and '{}' to join on",
                    target1.entity_name(),
                    target2.entity_name()
                )));
            }
            Lookup::Ambiguous(n) => {
                return Err(SqlGraphError::render(format!(
                    "Ambiguous join: {} foreign keys between '{}' and '{}'",
                    n,
                    target1.entity_name(),
                    target2.entity_name()
                )));
            }
        };
        let (from, to) = if &fk.table == table1 {
            (target1, target2)
        } else {
            (target2, target1)
        };
        let catalog = q.catalog();
        let mut parts = Vec::with_capacity(fk.pairs.len());
        for (fk_col, ref_col) in &fk.pairs {
            let (Some(a), Some(b)) = (catalog.column(fk_col), catalog.column(ref_col)) else {
                return Err(SqlGraphError::not_active("foreign key column"));
            };
            parts.push(format!(
                "{}.{} = {}.{}",
                self.ident(&from.alias()),
                self.ident(&a.name),
                self.ident(&to.alias()),
                self.ident(&b.name)
            ));
        }
        Ok(Some(parts.join(" AND ")))
    }
}
