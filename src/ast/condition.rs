//! Boolean condition trees used by WHERE and ON clauses.

use super::deferred::{DeferredRef, LossPolicy, RefKind};
use super::events::QueryEvent;
use super::ids::{CondId, FieldId, Handle, JoinId, TargetId};
use super::query::Query;
use crate::error::{Result, SqlGraphError};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafOp {
    Equal,
    Diff,
    Sup,
    SupEqual,
    Inf,
    InfEqual,
    Like,
    Similar,
    Regex,
    RegexNoCase,
    NotRegex,
    NotRegexNoCase,
    In,
    Between,
}

impl LeafOp {
    /// Number of operands the operator renders.
    pub fn arity(&self) -> usize {
        match self {
            LeafOp::Between => 3,
            _ => 2,
        }
    }
}

/// Either category of condition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondKind {
    Node(NodeOp),
    Leaf(LeafOp),
}

impl CondKind {
    pub fn code(&self) -> &'static str {
        match self {
            CondKind::Node(NodeOp::And) => "AND",
            CondKind::Node(NodeOp::Or) => "OR",
            CondKind::Node(NodeOp::Not) => "NOT",
            CondKind::Leaf(LeafOp::Equal) => "EQ",
            CondKind::Leaf(LeafOp::Diff) => "NE",
            CondKind::Leaf(LeafOp::Sup) => "SUP",
            CondKind::Leaf(LeafOp::SupEqual) => "ESUP",
            CondKind::Leaf(LeafOp::Inf) => "INF",
            CondKind::Leaf(LeafOp::InfEqual) => "EINF",
            CondKind::Leaf(LeafOp::Like) => "LIKE",
            CondKind::Leaf(LeafOp::Similar) => "SIMI",
            CondKind::Leaf(LeafOp::Regex) => "REG",
            CondKind::Leaf(LeafOp::RegexNoCase) => "CREG",
            CondKind::Leaf(LeafOp::NotRegex) => "NREG",
            CondKind::Leaf(LeafOp::NotRegexNoCase) => "CNREG",
            CondKind::Leaf(LeafOp::In) => "IN",
            CondKind::Leaf(LeafOp::Between) => "BTW",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "AND" => CondKind::Node(NodeOp::And),
            "OR" => CondKind::Node(NodeOp::Or),
            "NOT" => CondKind::Node(NodeOp::Not),
            "EQ" => CondKind::Leaf(LeafOp::Equal),
            "NE" => CondKind::Leaf(LeafOp::Diff),
            "SUP" => CondKind::Leaf(LeafOp::Sup),
            "ESUP" => CondKind::Leaf(LeafOp::SupEqual),
            "INF" => CondKind::Leaf(LeafOp::Inf),
            "EINF" => CondKind::Leaf(LeafOp::InfEqual),
            "LIKE" => CondKind::Leaf(LeafOp::Like),
            "SIMI" => CondKind::Leaf(LeafOp::Similar),
            "REG" => CondKind::Leaf(LeafOp::Regex),
            "CREG" => CondKind::Leaf(LeafOp::RegexNoCase),
            "NREG" => CondKind::Leaf(LeafOp::NotRegex),
            "CNREG" => CondKind::Leaf(LeafOp::NotRegexNoCase),
            "IN" => CondKind::Leaf(LeafOp::In),
            "BTW" => CondKind::Leaf(LeafOp::Between),
            _ => return None,
        })
    }
}

/// Operand slot of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Left = 0,
    Right = 1,
    Right2 = 2,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Left, Slot::Right, Slot::Right2];
}

#[derive(Debug, Clone, PartialEq)]
pub enum CondBody {
    Node {
        op: NodeOp,
        children: Vec<CondId>,
    },
    Leaf {
        op: LeafOp,
        operands: [Option<DeferredRef>; 3],
    },
}

/// One condition node. Parent and join are back-references by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub(crate) id: CondId,
    pub(crate) body: CondBody,
    pub(crate) parent: Option<CondId>,
    pub(crate) join: Option<JoinId>,
}

impl Condition {
    pub(crate) fn new(id: CondId, kind: CondKind) -> Self {
        let body = match kind {
            CondKind::Node(op) => CondBody::Node {
                op,
                children: Vec::new(),
            },
            CondKind::Leaf(op) => CondBody::Leaf {
                op,
                operands: [None, None, None],
            },
        };
        Self {
            id,
            body,
            parent: None,
            join: None,
        }
    }

    pub fn id(&self) -> CondId {
        self.id
    }

    pub fn kind(&self) -> CondKind {
        match &self.body {
            CondBody::Node { op, .. } => CondKind::Node(*op),
            CondBody::Leaf { op, .. } => CondKind::Leaf(*op),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.body, CondBody::Leaf { .. })
    }

    pub fn body(&self) -> &CondBody {
        &self.body
    }

    pub fn parent(&self) -> Option<CondId> {
        self.parent
    }

    pub fn join(&self) -> Option<JoinId> {
        self.join
    }

    pub fn children(&self) -> &[CondId] {
        match &self.body {
            CondBody::Node { children, .. } => children,
            CondBody::Leaf { .. } => &[],
        }
    }

    /// The field in `slot`, if the operand is set and active.
    pub fn operand(&self, slot: Slot) -> Option<FieldId> {
        match &self.body {
            CondBody::Leaf { operands, .. } => match operands[slot as usize].as_ref()?.target() {
                Some(Handle::Field(_, f)) => Some(*f),
                _ => None,
            },
            CondBody::Node { .. } => None,
        }
    }

    pub fn operand_ref(&self, slot: Slot) -> Option<&DeferredRef> {
        match &self.body {
            CondBody::Leaf { operands, .. } => operands[slot as usize].as_ref(),
            CondBody::Node { .. } => None,
        }
    }

    pub(crate) fn refs_mut(&mut self) -> impl Iterator<Item = &mut DeferredRef> {
        let operands: Option<&mut [Option<DeferredRef>; 3]> = match &mut self.body {
            CondBody::Leaf { operands, .. } => Some(operands),
            CondBody::Node { .. } => None,
        };
        operands.into_iter().flat_map(|ops| ops.iter_mut().flatten())
    }

    pub(crate) fn refs(&self) -> impl Iterator<Item = &DeferredRef> {
        let operands: Option<&[Option<DeferredRef>; 3]> = match &self.body {
            CondBody::Leaf { operands, .. } => Some(operands),
            CondBody::Node { .. } => None,
        };
        operands.into_iter().flat_map(|ops| ops.iter().flatten())
    }
}

/// Result of [`Query::represents_join`].
#[derive(Debug, Clone, PartialEq)]
pub struct JoinShape {
    pub targets: Vec<TargetId>,
    /// Every leaf is a plain EQUAL and only AND nodes connect them.
    pub equi: bool,
}

fn merge_targets(acc: &mut Vec<TargetId>, found: impl IntoIterator<Item = TargetId>) -> bool {
    for t in found {
        if !acc.contains(&t) {
            if acc.len() == 2 {
                return false;
            }
            acc.push(t);
        }
    }
    true
}

impl Query {
    /// Create a detached condition owned by this query.
    pub fn new_condition(&mut self, kind: CondKind) -> CondId {
        let id = CondId(self.next_serial());
        self.conds.insert(id, Condition::new(id, kind));
        id
    }

    pub fn condition(&self, id: CondId) -> Option<&Condition> {
        self.conds.get(&id)
    }

    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conds.values()
    }

    pub fn cond_kind(&self, id: CondId) -> Option<CondKind> {
        self.conds.get(&id).map(Condition::kind)
    }

    /// Change the operator within the same category. Switching between leaf
    /// and node is not implemented and reported as such.
    pub fn set_cond_kind(&mut self, id: CondId, kind: CondKind) -> Result<()> {
        let cond = self
            .conds
            .get_mut(&id)
            .ok_or_else(|| SqlGraphError::not_active(format!("condition {}", id)))?;
        match (&mut cond.body, kind) {
            (CondBody::Node { op, children }, CondKind::Node(new_op)) => {
                if new_op == NodeOp::Not && children.len() > 1 {
                    return Err(SqlGraphError::structure(
                        "A NOT node can only have one child",
                    ));
                }
                *op = new_op;
            }
            (CondBody::Leaf { op, .. }, CondKind::Leaf(new_op)) => *op = new_op,
            _ => {
                return Err(SqlGraphError::Unsupported(format!(
                    "changing condition {} between node and leaf",
                    id
                )));
            }
        }
        self.condition_changed(id);
        Ok(())
    }

    pub fn is_leaf(&self, id: CondId) -> bool {
        self.conds.get(&id).is_some_and(Condition::is_leaf)
    }

    /// Whether `candidate` is `id` itself or one of its ancestors.
    pub fn ancestors_contain(&self, id: CondId, candidate: CondId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if c == candidate {
                return true;
            }
            current = self.conds.get(&c).and_then(|cond| cond.parent);
        }
        false
    }

    /// Attach `child` under `parent`, moving it away from any previous owner.
    pub fn add_child(&mut self, parent: CondId, child: CondId) -> Result<()> {
        let p = self
            .conds
            .get(&parent)
            .ok_or_else(|| SqlGraphError::not_active(format!("condition {}", parent)))?;
        if !self.conds.contains_key(&child) {
            return Err(SqlGraphError::not_active(format!("condition {}", child)));
        }
        let CondBody::Node { op, children } = &p.body else {
            return Err(SqlGraphError::structure(format!(
                "Condition {} is a leaf and cannot have children",
                parent
            )));
        };
        if children.contains(&child) {
            return Ok(());
        }
        if *op == NodeOp::Not && !children.is_empty() {
            return Err(SqlGraphError::structure("A NOT node can only have one child"));
        }
        if self.ancestors_contain(parent, child) {
            return Err(SqlGraphError::structure("Conditions hierarchy error"));
        }

        self.detach_condition(child);
        if let Some(CondBody::Node { children, .. }) =
            self.conds.get_mut(&parent).map(|c| &mut c.body)
        {
            children.push(child);
        }
        let join = self.conds.get(&parent).and_then(|c| c.join);
        if let Some(c) = self.conds.get_mut(&child) {
            c.parent = Some(parent);
        }
        self.set_subtree_join(child, join);
        self.condition_changed(parent);
        Ok(())
    }

    /// Remove and destroy `child` with its subtree.
    pub fn remove_child(&mut self, parent: CondId, child: CondId) -> Result<()> {
        let is_child = self
            .conds
            .get(&parent)
            .is_some_and(|p| p.children().contains(&child));
        if !is_child {
            return Err(SqlGraphError::structure(format!(
                "Condition {} is not a child of {}",
                child, parent
            )));
        }
        self.destroy_condition(child);
        self.after_change();
        Ok(())
    }

    /// Set or clear a leaf operand.
    pub fn set_operand(&mut self, id: CondId, slot: Slot, field: Option<FieldId>) -> Result<()> {
        if let Some(f) = field {
            if self.field(f).is_none() {
                return Err(SqlGraphError::not_active(format!("field {}", f)));
            }
        }
        let query = self.id();
        let cond = self
            .conds
            .get_mut(&id)
            .ok_or_else(|| SqlGraphError::not_active(format!("condition {}", id)))?;
        let CondBody::Leaf { operands, .. } = &mut cond.body else {
            return Err(SqlGraphError::structure(format!(
                "Condition {} is not a leaf",
                id
            )));
        };
        operands[slot as usize] = field.map(|f| {
            DeferredRef::resolved(RefKind::Field, Handle::Field(query, f), LossPolicy::DestroyOwner)
        });
        self.condition_changed(id);
        Ok(())
    }

    pub fn operand(&self, id: CondId, slot: Slot) -> Option<FieldId> {
        self.conds.get(&id)?.operand(slot)
    }

    /// Convenience: a leaf with its operands set.
    pub fn new_leaf(&mut self, op: LeafOp, operands: &[FieldId]) -> Result<CondId> {
        let id = self.new_condition(CondKind::Leaf(op));
        for (slot, field) in Slot::ALL.iter().zip(operands) {
            if let Err(e) = self.set_operand(id, *slot, Some(*field)) {
                self.conds.remove(&id);
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Every condition id in the subtree rooted at `id`, root first.
    pub fn subtree(&self, id: CondId) -> Vec<CondId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(c) = stack.pop() {
            if let Some(cond) = self.conds.get(&c) {
                out.push(c);
                stack.extend(cond.children().iter().rev());
            }
        }
        out
    }

    /// Fields referenced anywhere in the subtree.
    pub fn condition_fields(&self, id: CondId) -> BTreeSet<FieldId> {
        self.subtree(id)
            .into_iter()
            .filter_map(|c| self.conds.get(&c))
            .flat_map(|c| Slot::ALL.into_iter().filter_map(move |s| c.operand(s)))
            .collect()
    }

    /// Check whether the condition links at most two targets.
    ///
    /// Leaves contribute the targets their operands go through; AND nodes merge
    /// their children under the same limit; OR and NOT nodes are never equi.
    /// With `require_two_targets` exactly two distinct targets must be found.
    /// With `strict` every leaf must be an EQUAL between two column operands.
    pub fn represents_join(
        &self,
        id: CondId,
        require_two_targets: bool,
        strict: bool,
    ) -> Option<JoinShape> {
        let shape = self.join_shape(id, strict)?;
        if require_two_targets && shape.targets.len() != 2 {
            return None;
        }
        if strict && shape.targets.len() < 2 {
            return None;
        }
        Some(shape)
    }

    fn join_shape(&self, id: CondId, strict: bool) -> Option<JoinShape> {
        let cond = self.conds.get(&id)?;
        match &cond.body {
            CondBody::Leaf { op, .. } => {
                let mut targets = Vec::new();
                let slots: &[Slot] = if *op == LeafOp::Between {
                    if strict {
                        return None;
                    }
                    &Slot::ALL
                } else {
                    &Slot::ALL[..2]
                };
                for slot in slots {
                    let used = cond
                        .operand(*slot)
                        .map(|f| self.field_targets(f))
                        .unwrap_or_default();
                    if used.len() > 1 || (strict && used.is_empty()) {
                        return None;
                    }
                    if !merge_targets(&mut targets, used) {
                        return None;
                    }
                }
                let equi = *op == LeafOp::Equal;
                if strict && !equi {
                    return None;
                }
                Some(JoinShape { targets, equi })
            }
            CondBody::Node { op, children } => {
                let mut targets = Vec::new();
                let mut equi = true;
                for child in children {
                    let shape = self.join_shape(*child, strict)?;
                    if !merge_targets(&mut targets, shape.targets) {
                        return None;
                    }
                    equi &= shape.equi;
                }
                Some(JoinShape {
                    targets,
                    equi: equi && *op == NodeOp::And,
                })
            }
        }
    }

    /// Destroy a condition and its subtree, unhooking it from its owner.
    pub fn destroy_condition(&mut self, id: CondId) {
        self.detach_condition(id);
        for c in self.subtree(id) {
            self.conds.remove(&c);
        }
        self.notify(QueryEvent::ConditionChanged);
    }

    /// Unhook `id` from its parent, the WHERE slot or its join, keeping it in the arena.
    pub(crate) fn detach_condition(&mut self, id: CondId) {
        let Some(cond) = self.conds.get(&id) else {
            return;
        };
        let parent = cond.parent;
        let join = cond.join;
        if let Some(parent) = parent {
            if let Some(CondBody::Node { children, .. }) =
                self.conds.get_mut(&parent).map(|c| &mut c.body)
            {
                children.retain(|c| *c != id);
            }
        } else {
            if self.where_cond == Some(id) {
                self.where_cond = None;
            }
            if let Some(j) = join {
                if let Some(join) = self.joins.iter_mut().find(|x| x.id == j) {
                    if join.condition == Some(id) {
                        join.condition = None;
                    }
                }
            }
        }
        if let Some(c) = self.conds.get_mut(&id) {
            c.parent = None;
        }
        self.set_subtree_join(id, None);
    }

    pub(crate) fn set_subtree_join(&mut self, id: CondId, join: Option<JoinId>) {
        for c in self.subtree(id) {
            if let Some(cond) = self.conds.get_mut(&c) {
                cond.join = join;
            }
        }
    }

    /// Edits to a tree not yet hooked into WHERE or a join do not change the
    /// statement, so they leave the junk sweep alone.
    fn condition_changed(&mut self, id: CondId) {
        self.notify(QueryEvent::ConditionChanged);
        if self.is_attached(id) {
            self.after_change();
        }
    }

    /// Whether the tree holding `id` is the WHERE tree or a join's ON tree.
    pub fn is_attached(&self, id: CondId) -> bool {
        let mut root = id;
        while let Some(parent) = self.conds.get(&root).and_then(|c| c.parent) {
            root = parent;
        }
        self.where_cond == Some(root) || self.conds.get(&root).is_some_and(|c| c.join.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Entity, Field, Value};
    use crate::catalog::Dictionary;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn query() -> Query {
        let dict = Dictionary::new()
            .with_table("a", &["id", "x"])
            .with_table("b", &["id", "a_id"])
            .with_table("c", &["id"]);
        Query::new(Arc::new(dict))
    }

    #[test]
    fn test_cycle_rejected_on_nth_call() {
        let mut q = query();
        let chain: Vec<CondId> = (0..5)
            .map(|_| q.new_condition(CondKind::Node(NodeOp::And)))
            .collect();
        for pair in chain.windows(2) {
            q.add_child(pair[0], pair[1]).unwrap();
        }
        let err = q.add_child(chain[4], chain[0]).unwrap_err();
        assert!(matches!(err, SqlGraphError::Structure(_)));
        assert!(q.ancestors_contain(chain[4], chain[0]));
        assert!(!q.ancestors_contain(chain[0], chain[4]));
    }

    #[test]
    fn test_detached_tree_survives_until_attached() {
        let mut q = query();
        let t = q.add_target(Entity::table("a"), None).unwrap();
        let x = q.add_field(Field::column(&q, t, "x")).unwrap();
        let id = q.add_field(Field::column(&q, t, "id")).unwrap();
        let and = q.new_condition(CondKind::Node(NodeOp::And));
        let eq = q.new_leaf(LeafOp::Equal, &[x, id]).unwrap();
        let ne = q.new_leaf(LeafOp::Diff, &[id, x]).unwrap();
        q.add_child(and, eq).unwrap();
        q.add_child(and, ne).unwrap();
        assert!(!q.is_attached(eq));
        assert_eq!(q.conditions().count(), 3);

        q.set_condition(Some(and)).unwrap();
        assert!(q.is_attached(ne));
        assert_eq!(q.conditions().count(), 3);

        let stray = q.new_condition(CondKind::Node(NodeOp::Or));
        q.remove_child(and, ne).unwrap();
        assert!(q.condition(stray).is_none());
        assert_eq!(q.conditions().count(), 2);
    }

    #[test]
    fn test_self_child_rejected() {
        let mut q = query();
        let and = q.new_condition(CondKind::Node(NodeOp::And));
        assert!(q.add_child(and, and).is_err());
    }

    #[test]
    fn test_leaf_cannot_have_children() {
        let mut q = query();
        let leaf = q.new_condition(CondKind::Leaf(LeafOp::Equal));
        let other = q.new_condition(CondKind::Leaf(LeafOp::Equal));
        assert!(matches!(
            q.add_child(leaf, other),
            Err(SqlGraphError::Structure(_))
        ));
    }

    #[test]
    fn test_not_accepts_single_child() {
        let mut q = query();
        let not = q.new_condition(CondKind::Node(NodeOp::Not));
        let a = q.new_condition(CondKind::Leaf(LeafOp::Equal));
        let b = q.new_condition(CondKind::Leaf(LeafOp::Equal));
        q.add_child(not, a).unwrap();
        assert!(q.add_child(not, b).is_err());
    }

    #[test]
    fn test_add_child_reparents() {
        let mut q = query();
        let first = q.new_condition(CondKind::Node(NodeOp::And));
        let second = q.new_condition(CondKind::Node(NodeOp::Or));
        let leaf = q.new_condition(CondKind::Leaf(LeafOp::Like));
        q.add_child(first, leaf).unwrap();
        q.add_child(second, leaf).unwrap();
        assert_eq!(q.condition(first).unwrap().children(), &[] as &[CondId]);
        assert_eq!(q.condition(second).unwrap().children(), &[leaf]);
        assert_eq!(q.condition(leaf).unwrap().parent(), Some(second));
    }

    #[test]
    fn test_set_kind_across_categories_unsupported() {
        let mut q = query();
        let leaf = q.new_condition(CondKind::Leaf(LeafOp::Equal));
        q.set_cond_kind(leaf, CondKind::Leaf(LeafOp::Diff)).unwrap();
        assert_eq!(q.cond_kind(leaf), Some(CondKind::Leaf(LeafOp::Diff)));
        assert!(matches!(
            q.set_cond_kind(leaf, CondKind::Node(NodeOp::And)),
            Err(SqlGraphError::Unsupported(_))
        ));
    }

    #[test]
    fn test_represents_join() {
        let mut q = query();
        let ta = q.add_target(Entity::table("a"), None).unwrap();
        let tb = q.add_target(Entity::table("b"), None).unwrap();
        let tc = q.add_target(Entity::table("c"), None).unwrap();
        q.begin_batch();
        let a_id = q.add_field(Field::column(&q, ta, "id").hidden()).unwrap();
        let b_aid = q.add_field(Field::column(&q, tb, "a_id").hidden()).unwrap();
        let c_id = q.add_field(Field::column(&q, tc, "id").hidden()).unwrap();
        let three = q.add_field(Field::value(Value::Int(3)).hidden()).unwrap();

        let eq = q.new_leaf(LeafOp::Equal, &[a_id, b_aid]).unwrap();
        let shape = q.represents_join(eq, true, true).unwrap();
        assert_eq!(shape.targets, vec![ta, tb]);
        assert!(shape.equi);

        let lit = q.new_leaf(LeafOp::Sup, &[a_id, three]).unwrap();
        assert!(q.represents_join(lit, true, false).is_none());
        assert_eq!(q.represents_join(lit, false, false).unwrap().targets, vec![ta]);

        let and = q.new_condition(CondKind::Node(NodeOp::And));
        q.add_child(and, eq).unwrap();
        q.add_child(and, lit).unwrap();
        let shape = q.represents_join(and, true, false).unwrap();
        assert!(!shape.equi);

        let third = q.new_leaf(LeafOp::Equal, &[b_aid, c_id]).unwrap();
        q.add_child(and, third).unwrap();
        assert!(q.represents_join(and, false, false).is_none());
        q.end_batch();
    }
}
