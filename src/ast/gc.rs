//! Junk cleanup: detached conditions, and hidden fields and sub-queries
//! nothing uses any more.

use super::events::QueryEvent;
use super::ids::{CondId, FieldId, Handle, QueryId};
use super::query::{Query, QueryKind};
use std::collections::BTreeSet;
use tracing::debug;

impl Query {
    /// Remove detached conditions, unused hidden fields and unreferenced
    /// sub-queries now.
    /// Does nothing inside a batch. Returns the number of removed nodes.
    pub fn collect_garbage(&mut self) -> usize {
        if self.in_batch() {
            return 0;
        }
        self.batch_depth += 1;
        self.purge();
        let removed = self.sweep_junk();
        self.batch_depth -= 1;
        removed
    }

    /// Hidden fields in use: by the WHERE tree, join conditions, other
    /// fields, ORDER BY, sub-queries and raw text placeholders.
    fn used_fields(&self) -> BTreeSet<FieldId> {
        let mut used = BTreeSet::new();
        if let Some(root) = self.where_cond {
            used.extend(self.condition_fields(root));
        }
        for join in &self.joins {
            if let Some(c) = join.condition {
                used.extend(self.condition_fields(c));
            }
        }
        for field in &self.fields {
            used.extend(
                field
                    .referenced_fields(self.id)
                    .into_iter()
                    .filter(|f| *f != field.id),
            );
        }
        used.extend(self.order_by.iter().map(|o| o.field));
        for sub in &self.sub_queries {
            sub.collect_outer_fields(self.id, &mut used);
        }
        if let Some(raw) = &self.raw {
            used.extend(raw.placeholders.iter().map(|p| p.field));
        }
        used
    }

    fn collect_outer_fields(&self, outer: QueryId, used: &mut BTreeSet<FieldId>) {
        self.for_each_ref(|_, r| {
            if let Some(Handle::Field(q, f)) = r.target() {
                if *q == outer {
                    used.insert(*f);
                }
            }
        });
        for sub in &self.sub_queries {
            sub.collect_outer_fields(outer, used);
        }
    }

    pub(crate) fn sweep_junk(&mut self) -> usize {
        if self.kind == QueryKind::RawText {
            return 0;
        }
        let mut removed = 0;
        for sub in &mut self.sub_queries {
            removed += sub.collect_garbage();
        }
        removed += self.sweep_detached_conditions();
        loop {
            let used = self.used_fields();
            let junk: Vec<FieldId> = self
                .fields
                .iter()
                .filter(|f| !f.visible && !used.contains(&f.id))
                .map(|f| f.id)
                .collect();
            if junk.is_empty() {
                break;
            }
            for f in junk {
                debug!(query = %self.id, field = %f, "removing unused hidden field");
                self.remove_field_inner(f);
                removed += 1;
            }
            self.purge();
        }

        if self.kind == QueryKind::Select {
            let referenced: BTreeSet<QueryId> =
                self.targets.iter().filter_map(|t| t.sub_query()).collect();
            let unused: Vec<QueryId> = self
                .sub_queries
                .iter()
                .map(Query::id)
                .filter(|q| !referenced.contains(q))
                .collect();
            if !unused.is_empty() {
                self.sub_queries.retain(|q| referenced.contains(&q.id));
                for q in unused {
                    debug!(query = %self.id, sub = %q, "removing unused sub-query");
                    self.notify(QueryEvent::SubQueryRemoved(q));
                    removed += 1;
                }
                self.purge();
            }
        }
        removed
    }

    /// Conditions outside the WHERE tree and every join's ON tree.
    fn sweep_detached_conditions(&mut self) -> usize {
        let attached: BTreeSet<CondId> = self
            .where_cond
            .into_iter()
            .chain(self.joins.iter().filter_map(|j| j.condition))
            .flat_map(|root| self.subtree(root))
            .collect();
        let detached: Vec<CondId> = self
            .conds
            .keys()
            .copied()
            .filter(|c| !attached.contains(c))
            .collect();
        if detached.is_empty() {
            return 0;
        }
        for c in &detached {
            self.conds.remove(c);
        }
        debug!(query = %self.id, count = detached.len(), "removing detached conditions");
        self.notify(QueryEvent::ConditionChanged);
        detached.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{CondKind, Entity, Field, LeafOp, NodeOp, Query, Value};
    use crate::catalog::Dictionary;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn query() -> Query {
        Query::new(Arc::new(Dictionary::new().with_table("tbl", &["id", "x"])))
    }

    #[test]
    fn test_gc_idempotent() {
        let mut q = query();
        q.set_auto_clean(false);
        let t = q.add_target(Entity::table("tbl"), None).unwrap();
        q.add_field(Field::column(&q, t, "x")).unwrap();
        q.add_field(Field::value(Value::Int(1)).hidden()).unwrap();
        q.add_field(Field::value(Value::Int(2)).hidden()).unwrap();
        assert_eq!(q.fields().len(), 3);
        assert_eq!(q.collect_garbage(), 2);
        assert_eq!(q.collect_garbage(), 0);
        assert_eq!(q.fields().len(), 1);
    }

    #[test]
    fn test_gc_keeps_condition_operands() {
        let mut q = query();
        let t = q.add_target(Entity::table("tbl"), None).unwrap();
        q.batch(|q| {
            let x = q.add_field(Field::column(q, t, "x").hidden()).unwrap();
            let one = q.add_field(Field::value(Value::Int(1)).hidden()).unwrap();
            let c = q.new_leaf(LeafOp::Equal, &[x, one]).unwrap();
            q.set_condition(Some(c)).unwrap();
        });
        assert_eq!(q.fields().len(), 2);
        q.set_condition(None).unwrap();
        assert!(q.fields().is_empty());
    }

    #[test]
    fn test_gc_cascades_through_call_args() {
        let dict = Dictionary::new()
            .with_table("tbl", &["x"])
            .with_function("abs", &[crate::ast::ValueType::Integer], crate::ast::ValueType::Integer);
        let mut q = Query::new(Arc::new(dict));
        let t = q.add_target(Entity::table("tbl"), None).unwrap();
        q.set_auto_clean(false);
        let x = q.add_field(Field::column(&q, t, "x").hidden()).unwrap();
        let call = q.add_field(Field::call(&q, "abs", &[x]).hidden()).unwrap();
        q.set_order_by_field(call, None, true).unwrap();
        assert_eq!(q.collect_garbage(), 0);
        q.unset_order_by_field(call);
        assert_eq!(q.collect_garbage(), 2);
    }

    #[test]
    fn test_gc_drops_detached_conditions() {
        let mut q = query();
        q.set_auto_clean(false);
        let t = q.add_target(Entity::table("tbl"), None).unwrap();
        let x = q.add_field(Field::column(&q, t, "x")).unwrap();
        let one = q.add_field(Field::value(Value::Int(1)).hidden()).unwrap();
        let kept = q.new_leaf(LeafOp::Equal, &[x, one]).unwrap();
        q.set_condition(Some(kept)).unwrap();
        let empty = q.new_condition(CondKind::Node(NodeOp::And));
        let or = q.new_condition(CondKind::Node(NodeOp::Or));
        let inner = q.new_condition(CondKind::Node(NodeOp::Not));
        q.add_child(or, inner).unwrap();

        assert_eq!(q.collect_garbage(), 3);
        assert!(q.condition(empty).is_none());
        assert!(q.condition(or).is_none());
        assert!(q.condition(inner).is_none());
        assert!(q.condition(kept).is_some());
        assert_eq!(q.collect_garbage(), 0);
    }

    #[test]
    fn test_gc_drops_unreferenced_sub_query() {
        let mut q = query();
        let sub = Query::new(Arc::clone(q.catalog()));
        let kept = Query::new(Arc::clone(q.catalog()));
        let kept_id = q.batch(|q| {
            q.add_sub_query(sub).unwrap();
            let id = q.add_sub_query(kept).unwrap();
            q.add_target(Entity::SubQuery(id), Some("s")).unwrap();
            id
        });
        assert_eq!(q.sub_queries().len(), 1);
        assert_eq!(q.sub_queries()[0].id(), kept_id);
    }
}
