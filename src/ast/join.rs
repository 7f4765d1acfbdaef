//! Joins between two targets of the same query.

use super::condition::{CondKind, LeafOp, NodeOp};
use super::deferred::{DeferredRef, LossPolicy, RefKind, RefMode};
use super::events::QueryEvent;
use super::field::Field;
use super::ids::{CondId, FieldId, Handle, JoinId, TargetId};
use super::query::Query;
use super::scope::Scope;
use crate::catalog::{Lookup, foreign_key_between};
use crate::error::{Result, SqlGraphError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinKind {
    pub fn sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Full => "FULL",
            JoinKind::Cross => "CROSS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "INNER" => JoinKind::Inner,
            "LEFT" => JoinKind::Left,
            "RIGHT" => JoinKind::Right,
            "FULL" => JoinKind::Full,
            "CROSS" => JoinKind::Cross,
            _ => return None,
        })
    }

    /// The kind seen from the other side.
    pub fn mirrored(&self) -> Self {
        match self {
            JoinKind::Left => JoinKind::Right,
            JoinKind::Right => JoinKind::Left,
            other => *other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub(crate) id: JoinId,
    pub(crate) target1: DeferredRef,
    pub(crate) target2: DeferredRef,
    pub(crate) kind: JoinKind,
    pub(crate) condition: Option<CondId>,
}

impl Join {
    /// A join between two targets of `query`, resolved against it right away.
    pub fn new(query: &Query, target1: TargetId, target2: TargetId) -> Self {
        let scope = Scope::of(query);
        let mut make = |t: TargetId| {
            let mut r = DeferredRef::new(RefKind::Target, LossPolicy::DestroyOwner);
            r.set_key(
                RefKind::Target,
                RefMode::ById,
                Handle::Target(query.id(), t).to_string(),
            );
            r.activate(&scope);
            r
        };
        Self {
            id: JoinId(0),
            target1: make(target1),
            target2: make(target2),
            kind: JoinKind::Inner,
            condition: None,
        }
    }

    pub fn with_kind(mut self, kind: JoinKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn id(&self) -> JoinId {
        self.id
    }

    pub fn kind(&self) -> JoinKind {
        self.kind
    }

    pub fn condition(&self) -> Option<CondId> {
        self.condition
    }

    pub fn is_active(&self) -> bool {
        self.target1.is_active() && self.target2.is_active()
    }

    pub fn target1(&self) -> Option<TargetId> {
        target_of(&self.target1)
    }

    pub fn target2(&self) -> Option<TargetId> {
        target_of(&self.target2)
    }

    pub fn targets(&self) -> Option<(TargetId, TargetId)> {
        Some((self.target1()?, self.target2()?))
    }

    pub fn connects(&self, a: TargetId, b: TargetId) -> bool {
        matches!(self.targets(), Some((x, y)) if (x == a && y == b) || (x == b && y == a))
    }

    /// Exchange the two targets; LEFT and RIGHT follow.
    pub fn swap_targets(&mut self) {
        std::mem::swap(&mut self.target1, &mut self.target2);
        self.kind = self.kind.mirrored();
    }

    pub(crate) fn refs_mut(&mut self) -> [&mut DeferredRef; 2] {
        [&mut self.target1, &mut self.target2]
    }

    pub(crate) fn refs(&self) -> [&DeferredRef; 2] {
        [&self.target1, &self.target2]
    }
}

fn target_of(r: &DeferredRef) -> Option<TargetId> {
    match r.target() {
        Some(Handle::Target(_, t)) => Some(*t),
        _ => None,
    }
}

impl Query {
    pub fn join(&self, id: JoinId) -> Option<&Join> {
        self.joins.iter().find(|j| j.id == id)
    }

    pub fn join_between(&self, a: TargetId, b: TargetId) -> Option<&Join> {
        self.joins.iter().find(|j| j.connects(a, b))
    }

    /// Add a join built with [`Join::new`].
    pub fn add_join(&mut self, mut join: Join) -> Result<JoinId> {
        self.ensure_structural()?;
        if !self.kind().allows_joins() {
            return Err(SqlGraphError::structure(format!(
                "Joins are not allowed in a {} query",
                self.kind().name()
            )));
        }
        if !join.is_active() {
            return Err(SqlGraphError::not_active("join targets"));
        }
        let own = |r: &DeferredRef| r.target().and_then(Handle::query) == Some(self.id());
        if !own(&join.target1) || !own(&join.target2) {
            return Err(SqlGraphError::structure(
                "Join targets must belong to the query",
            ));
        }
        let Some((t1, t2)) = join.targets() else {
            return Err(SqlGraphError::not_active("join targets"));
        };
        if t1 == t2 {
            return Err(SqlGraphError::structure("A join needs two distinct targets"));
        }
        if self.join_between(t1, t2).is_some() {
            return Err(SqlGraphError::structure(format!(
                "Targets {} and {} are already joined",
                t1, t2
            )));
        }
        join.id = JoinId(self.next_serial());
        join.condition = None;
        let id = join.id;
        self.joins.push(join);
        self.notify(QueryEvent::JoinAdded(id));
        self.after_change();
        Ok(id)
    }

    pub fn remove_join(&mut self, id: JoinId) -> Result<()> {
        self.ensure_structural()?;
        if self.join(id).is_none() {
            return Err(SqlGraphError::not_active(format!("join {}", id)));
        }
        self.remove_join_inner(id);
        self.after_change();
        Ok(())
    }

    pub(crate) fn remove_join_inner(&mut self, id: JoinId) {
        if let Some(cond) = self.join(id).and_then(|j| j.condition) {
            self.destroy_condition(cond);
        }
        self.joins.retain(|j| j.id != id);
        self.notify(QueryEvent::JoinRemoved(id));
    }

    pub fn set_join_kind(&mut self, id: JoinId, kind: JoinKind) -> Result<()> {
        let join = self
            .joins
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| SqlGraphError::not_active(format!("join {}", id)))?;
        join.kind = kind;
        self.notify(QueryEvent::Changed);
        Ok(())
    }

    pub fn swap_join_targets(&mut self, id: JoinId) -> Result<()> {
        let join = self
            .joins
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| SqlGraphError::not_active(format!("join {}", id)))?;
        join.swap_targets();
        self.notify(QueryEvent::Changed);
        Ok(())
    }

    /// Use `cond` as the ON condition. Rejected unless the condition links
    /// exactly the join's two targets. `None` clears the condition.
    pub fn set_join_condition(&mut self, id: JoinId, cond: Option<CondId>) -> bool {
        let Some(join) = self.join(id) else {
            return false;
        };
        let old = join.condition;
        let Some(targets) = join.targets() else {
            return false;
        };
        if let Some(c) = cond {
            if old == Some(c) {
                return true;
            }
            let Some(shape) = self.represents_join(c, true, false) else {
                return false;
            };
            let (t1, t2) = targets;
            if !(shape.targets.contains(&t1) && shape.targets.contains(&t2)) {
                return false;
            }
            if self.condition(c).is_some_and(|x| x.parent.is_some()) {
                return false;
            }
            self.detach_condition(c);
        }
        if let Some(old) = old {
            self.destroy_condition(old);
        }
        if let Some(join) = self.joins.iter_mut().find(|j| j.id == id) {
            join.condition = cond;
        }
        if let Some(c) = cond {
            self.set_subtree_join(c, Some(id));
        }
        self.notify(QueryEvent::ConditionChanged);
        self.after_change();
        true
    }

    /// Build the ON condition from the single foreign key linking the two
    /// tables: one EQUAL per column pair, AND-ed when there are several.
    pub fn infer_join_condition(&mut self, id: JoinId) -> Result<()> {
        let join = self
            .join(id)
            .ok_or_else(|| SqlGraphError::not_active(format!("join {}", id)))?;
        let (t1, t2) = join
            .targets()
            .ok_or_else(|| SqlGraphError::not_active("join targets"))?;
        let tables = (
            self.target(t1).and_then(|t| t.table().cloned()),
            self.target(t2).and_then(|t| t.table().cloned()),
        );
        let (Some(table1), Some(table2)) = tables else {
            return Err(SqlGraphError::render(
                "Join targets must both represent tables to use a foreign key",
            ));
        };
        let fk = match foreign_key_between(self.catalog().as_ref(), &table1, &table2) {
            Lookup::One(fk) => fk,
            Lookup::None => {
                return Err(SqlGraphError::render(format!(
                    "No foreign key between '{}' and '{}'",
                    self.target_entity_name(t1),
                    self.target_entity_name(t2)
                )));
            }
            Lookup::Ambiguous(n) => {
                return Err(SqlGraphError::render(format!(
                    "{} foreign keys between '{}' and '{}'",
                    n,
                    self.target_entity_name(t1),
                    self.target_entity_name(t2)
                )));
            }
        };
        debug!(join = %id, pairs = fk.pairs.len(), "join condition from foreign key");

        let (fk_target, ref_target) = if fk.table == table1 { (t1, t2) } else { (t2, t1) };
        let catalog = std::sync::Arc::clone(self.catalog());
        self.batch(|q| {
            let mut leaves = Vec::new();
            for (from, to) in &fk.pairs {
                let from_name = catalog.column(from).map(|c| c.name).unwrap_or_default();
                let to_name = catalog.column(to).map(|c| c.name).unwrap_or_default();
                let left = q.hidden_column_field(fk_target, &from_name)?;
                let right = q.hidden_column_field(ref_target, &to_name)?;
                leaves.push(q.new_leaf(LeafOp::Equal, &[left, right])?);
            }
            let root = match leaves.as_slice() {
                [single] => *single,
                _ => {
                    let and = q.new_condition(CondKind::Node(NodeOp::And));
                    for leaf in &leaves {
                        q.add_child(and, *leaf)?;
                    }
                    and
                }
            };
            if q.set_join_condition(id, Some(root)) {
                Ok(())
            } else {
                q.destroy_condition(root);
                Err(SqlGraphError::structure(
                    "Foreign key condition does not link the join's targets",
                ))
            }
        })
    }

    /// An existing column field on `target`, or a new hidden one.
    pub(crate) fn hidden_column_field(&mut self, target: TargetId, column: &str) -> Result<FieldId> {
        let existing = self.fields.iter().find(|f| {
            f.target() == Some(target)
                && matches!(f.kind(), super::FieldKind::Column { .. })
                && f.name().is_some_and(|n| n.eq_ignore_ascii_case(column))
        });
        if let Some(f) = existing {
            return Ok(f.id);
        }
        let field = Field::column(self, target, column).hidden();
        self.add_field(field)
    }

    pub(crate) fn target_entity_name(&self, id: TargetId) -> String {
        self.target(id)
            .map(|t| t.entity_name().to_string())
            .unwrap_or_else(|| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Entity;
    use crate::catalog::Dictionary;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn shop(extra_fk: bool) -> Query {
        let mut dict = Dictionary::new()
            .with_table("customers", &["id", "name"])
            .with_table("orders", &["id", "customer_id", "total"])
            .with_foreign_key("orders", &["customer_id"], "customers", &["id"]);
        if extra_fk {
            dict = dict.with_foreign_key("orders", &["id"], "customers", &["id"]);
        }
        Query::new(Arc::new(dict))
    }

    #[test]
    fn test_swap_maps_left_right() {
        let mut q = shop(false);
        let o = q.add_target(Entity::table("orders"), Some("o")).unwrap();
        let c = q.add_target(Entity::table("customers"), Some("c")).unwrap();
        let j = q.add_join(Join::new(&q, o, c).with_kind(JoinKind::Left)).unwrap();
        q.swap_join_targets(j).unwrap();
        let join = q.join(j).unwrap();
        assert_eq!(join.kind(), JoinKind::Right);
        assert_eq!(join.targets(), Some((c, o)));
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let mut q = shop(false);
        let o = q.add_target(Entity::table("orders"), None).unwrap();
        let c = q.add_target(Entity::table("customers"), None).unwrap();
        q.add_join(Join::new(&q, o, c)).unwrap();
        let err = q.add_join(Join::new(&q, c, o)).unwrap_err();
        assert!(matches!(err, SqlGraphError::Structure(_)));
    }

    #[test]
    fn test_inactive_join_rejected() {
        let mut q = shop(false);
        let o = q.add_target(Entity::table("orders"), None).unwrap();
        let join = Join::new(&q, o, TargetId(99));
        assert!(matches!(q.add_join(join), Err(SqlGraphError::NotActive { .. })));
    }

    #[test]
    fn test_infer_condition_from_single_fk() {
        let mut q = shop(false);
        let o = q.add_target(Entity::table("orders"), Some("o")).unwrap();
        let c = q.add_target(Entity::table("customers"), Some("c")).unwrap();
        let j = q.add_join(Join::new(&q, o, c)).unwrap();
        q.infer_join_condition(j).unwrap();

        let cond = q.join(j).unwrap().condition().unwrap();
        assert_eq!(q.cond_kind(cond), Some(CondKind::Leaf(LeafOp::Equal)));
        let shape = q.represents_join(cond, true, true).unwrap();
        assert!(shape.equi);
        // hidden operands survive garbage collection because the join uses them
        assert_eq!(q.fields().len(), 2);
        assert!(q.fields().iter().all(|f| !f.is_visible()));
    }

    #[test]
    fn test_infer_condition_ambiguous() {
        let mut q = shop(true);
        let o = q.add_target(Entity::table("orders"), None).unwrap();
        let c = q.add_target(Entity::table("customers"), None).unwrap();
        let j = q.add_join(Join::new(&q, o, c)).unwrap();
        assert!(matches!(q.infer_join_condition(j), Err(SqlGraphError::Render(_))));
        assert!(q.join(j).unwrap().condition().is_none());
    }

    #[test]
    fn test_removing_target_destroys_join() {
        let mut q = shop(false);
        let o = q.add_target(Entity::table("orders"), None).unwrap();
        let c = q.add_target(Entity::table("customers"), None).unwrap();
        q.add_join(Join::new(&q, o, c)).unwrap();
        q.remove_target(c).unwrap();
        assert!(q.joins().is_empty());
    }
}
