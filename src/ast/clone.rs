//! Deep copy with node remapping.

use super::deferred::RemapTable;
use super::ids::{Handle, QueryId};
use super::query::Query;
use std::sync::Arc;

impl Query {
    /// Deep-copy this query and everything it owns.
    ///
    /// Every query in the copy gets a fresh [`QueryId`]; local node ids are
    /// kept. The returned table maps each original node to its copy, and every
    /// reference in the copy that pointed into the original is repointed
    /// through it.
    pub fn clone_with_remap(&self) -> (Query, RemapTable) {
        let mut remap = RemapTable::new();
        let mut copy = self.copy_nodes(&mut remap);
        copy.apply_remap(&remap);
        (copy, remap)
    }

    fn copy_nodes(&self, remap: &mut RemapTable) -> Query {
        let mut q = Query::with_id(QueryId::next(), Arc::clone(&self.catalog));
        let (old, new) = (self.id, q.id);
        remap.insert(Handle::Query(old), Handle::Query(new));

        q.sub_queries = self.sub_queries.iter().map(|s| s.copy_nodes(remap)).collect();
        q.param_sources = self.param_sources.iter().map(|s| s.copy_nodes(remap)).collect();

        q.targets = self.targets.clone();
        for t in &self.targets {
            remap.insert(Handle::Target(old, t.id), Handle::Target(new, t.id));
        }
        q.fields = self.fields.clone();
        for f in &self.fields {
            remap.insert(Handle::Field(old, f.id), Handle::Field(new, f.id));
        }
        q.joins = self.joins.clone();
        for j in &self.joins {
            remap.insert(Handle::Join(old, j.id), Handle::Join(new, j.id));
        }
        q.conds = self.conds.clone();
        q.where_cond = self.where_cond;
        for c in self.conds.keys() {
            remap.insert(Handle::Condition(old, *c), Handle::Condition(new, *c));
        }
        q.order_by = self.order_by.clone();

        q.name = self.name.clone();
        q.kind = self.kind;
        q.distinct = self.distinct;
        q.limit = self.limit;
        q.offset = self.offset;
        q.raw = self.raw.clone();
        q.serial = self.serial;
        q.auto_clean = self.auto_clean;
        q
    }

    fn apply_remap(&mut self, remap: &RemapTable) {
        for sub in self.sub_queries.iter_mut().chain(&mut self.param_sources) {
            sub.apply_remap(remap);
        }
        self.for_each_ref_mut(|_, r| {
            r.replace_target_if_mapped(remap);
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Entity, Field, Handle, JoinKind, LeafOp, Query, Value};
    use crate::catalog::Dictionary;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn refs_stay_inside(q: &Query) {
        let ids: Vec<_> = std::iter::once(q.id())
            .chain(q.sub_queries().iter().map(Query::id))
            .collect();
        q.for_each_ref(|_, r| {
            if let Some(query) = r.target().and_then(Handle::query) {
                assert!(ids.contains(&query), "{} escapes the copy", r.key());
            }
        });
    }

    #[test]
    fn test_clone_is_isomorphic() {
        let dict = Dictionary::new()
            .with_table("a", &["id", "x"])
            .with_table("b", &["id", "a_id"]);
        let mut q = Query::new(Arc::new(dict));
        q.batch(|q| {
            let a = q.add_target(Entity::table("a"), None).unwrap();
            let b = q.add_target(Entity::table("b"), None).unwrap();
            let x = q.add_field(Field::column(q, a, "x")).unwrap();
            q.add_field(Field::column(q, b, "id")).unwrap();
            let j = q.add_join(crate::ast::Join::new(q, a, b).with_kind(JoinKind::Left)).unwrap();
            let a_id = q.add_field(Field::column(q, a, "id").hidden()).unwrap();
            let b_aid = q.add_field(Field::column(q, b, "a_id").hidden()).unwrap();
            let on = q.new_leaf(LeafOp::Equal, &[a_id, b_aid]).unwrap();
            assert!(q.set_join_condition(j, Some(on)));
            let v = q.add_field(Field::value(Value::Int(5)).hidden()).unwrap();
            let w = q.new_leaf(LeafOp::Sup, &[x, v]).unwrap();
            q.set_condition(Some(w)).unwrap();
            q.set_order_by_field(x, None, false).unwrap();
        });

        let (copy, remap) = q.clone_with_remap();
        assert_ne!(copy.id(), q.id());
        assert_eq!(copy.targets().len(), q.targets().len());
        assert_eq!(copy.fields().len(), q.fields().len());
        assert_eq!(copy.joins().len(), 1);
        assert_eq!(copy.conditions().count(), q.conditions().count());
        assert_eq!(copy.joins()[0].kind(), JoinKind::Left);
        assert_eq!(copy.order_by(), q.order_by());
        assert_eq!(
            remap.get(&Handle::Query(q.id())),
            Some(&Handle::Query(copy.id()))
        );
        refs_stay_inside(&copy);
    }

    #[test]
    fn test_clone_remaps_sub_query_targets() {
        let dict = Arc::new(Dictionary::new().with_table("t", &["v"]));
        let mut sub = Query::new(dict.clone());
        sub.set_name(Some("s"));
        let st = sub.add_target(Entity::table("t"), None).unwrap();
        sub.add_field(Field::column(&sub, st, "v")).unwrap();

        let mut q = Query::new(dict);
        q.batch(|q| {
            let sid = q.add_sub_query(sub).unwrap();
            let t = q.add_target(Entity::SubQuery(sid), Some("s")).unwrap();
            q.add_field(Field::column(q, t, "v")).unwrap();
        });
        assert!(!q.has_inactive_refs());

        let (copy, _) = q.clone_with_remap();
        let sub_copy = copy.sub_queries()[0].id();
        assert_eq!(copy.targets()[0].sub_query(), Some(sub_copy));
        refs_stay_inside(&copy);
    }
}
