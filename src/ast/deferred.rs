//! Deferred references.
//!
//! A [`DeferredRef`] stores a lookup key and, once resolved, the [`Handle`] of
//! the node it designates. Resolution goes through a [`Resolver`], which is
//! either a query scope or a test double. A ref never dangles: when its node
//! disappears the owning query notices on its next sweep, reverts the ref to
//! inactive and applies the ref's [`LossPolicy`].

use super::ids::Handle;
use std::collections::HashMap;

/// Type of node a reference designates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Table,
    Column,
    Function,
    Aggregate,
    Query,
    Target,
    Field,
}

impl RefKind {
    pub fn name(&self) -> &'static str {
        match self {
            RefKind::Table => "table",
            RefKind::Column => "column",
            RefKind::Function => "function",
            RefKind::Aggregate => "aggregate",
            RefKind::Query => "query",
            RefKind::Target => "target",
            RefKind::Field => "field",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "table" => RefKind::Table,
            "column" => RefKind::Column,
            "function" => RefKind::Function,
            "aggregate" => RefKind::Aggregate,
            "query" => RefKind::Query,
            "target" => RefKind::Target,
            "field" => RefKind::Field,
            _ => return None,
        })
    }

    pub fn matches(&self, handle: &Handle) -> bool {
        matches!(
            (self, handle),
            (RefKind::Table, Handle::Table(_))
                | (RefKind::Column, Handle::Column(_))
                | (RefKind::Function, Handle::Function(_))
                | (RefKind::Aggregate, Handle::Aggregate(_))
                | (RefKind::Query, Handle::Query(_))
                | (RefKind::Target, Handle::Target(..))
                | (RefKind::Field, Handle::Field(..))
        )
    }
}

/// How the key string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefMode {
    /// Stable id: `TV1`, `TV1:FI2`, `QU1:QF3`, or a bare local id with a helper query.
    ById,
    /// Name, optionally scoped by the helper (table for columns, query for targets and fields).
    ByName,
}

/// What the owner of a ref does when the referenced node goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossPolicy {
    DestroyOwner,
    Revert,
}

/// Old node to new node, filled during a deep copy.
pub type RemapTable = HashMap<Handle, Handle>;

/// Lookup service used by [`DeferredRef::activate`].
pub trait Resolver {
    fn resolve(&self, kind: RefKind, mode: RefMode, key: &str, helper: Option<&Handle>)
    -> Option<Handle>;

    /// Whether `handle` still designates a live node.
    fn exists(&self, handle: &Handle) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeferredRef {
    kind: RefKind,
    mode: RefMode,
    key: String,
    helper: Option<Handle>,
    target: Option<Handle>,
    policy: LossPolicy,
}

impl DeferredRef {
    pub fn new(kind: RefKind, policy: LossPolicy) -> Self {
        Self {
            kind,
            mode: RefMode::ByName,
            key: String::new(),
            helper: None,
            target: None,
            policy,
        }
    }

    pub fn by_name(kind: RefKind, name: impl Into<String>, policy: LossPolicy) -> Self {
        let mut r = Self::new(kind, policy);
        r.set_key(kind, RefMode::ByName, name);
        r
    }

    pub fn by_id(kind: RefKind, id: impl Into<String>, policy: LossPolicy) -> Self {
        let mut r = Self::new(kind, policy);
        r.set_key(kind, RefMode::ById, id);
        r
    }

    /// An already-active ref to `handle`.
    pub fn resolved(kind: RefKind, handle: Handle, policy: LossPolicy) -> Self {
        let mut r = Self::new(kind, policy);
        r.set_target(handle);
        r
    }

    pub fn with_helper(mut self, helper: Option<Handle>) -> Self {
        self.helper = helper;
        self
    }

    /// Replace the lookup key. The ref becomes inactive.
    pub fn set_key(&mut self, kind: RefKind, mode: RefMode, key: impl Into<String>) {
        self.kind = kind;
        self.mode = mode;
        self.key = key.into();
        self.target = None;
    }

    /// Point directly at `handle`; the key becomes its stable id.
    pub fn set_target(&mut self, handle: Handle) {
        if let Some(kind) = kind_of(&handle) {
            self.kind = kind;
        }
        self.mode = RefMode::ById;
        self.key = handle.to_string();
        self.target = Some(handle);
    }

    pub fn set_helper(&mut self, helper: Option<Handle>) {
        self.helper = helper;
    }

    /// Try to resolve the key. Returns whether the ref is active afterwards.
    pub fn activate(&mut self, resolver: &dyn Resolver) -> bool {
        if let Some(target) = &self.target {
            if resolver.exists(target) {
                return true;
            }
            self.target = None;
        }
        if self.key.is_empty() {
            return false;
        }
        self.target = resolver
            .resolve(self.kind, self.mode, &self.key, self.helper.as_ref())
            .filter(|h| self.kind.matches(h));
        self.target.is_some()
    }

    /// Drop the resolved node, keeping the key. Returns the node that was held.
    pub fn deactivate(&mut self) -> Option<Handle> {
        self.target.take()
    }

    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<&Handle> {
        self.target.as_ref()
    }

    /// Repoint to the mapped node without going through a loss.
    pub fn replace_target_if_mapped(&mut self, remap: &RemapTable) -> bool {
        let mut changed = false;
        if let Some(helper) = &self.helper {
            if let Some(mapped) = remap.get(helper) {
                self.helper = Some(mapped.clone());
                changed = true;
            }
        }
        let mapped = self.target.as_ref().and_then(|t| remap.get(t)).cloned();
        if let Some(mapped) = mapped {
            self.set_target(mapped);
            return true;
        }
        if self.target.is_none() && self.mode == RefMode::ById {
            let key_match = remap
                .iter()
                .find(|(old, _)| old.to_string() == self.key)
                .map(|(_, new)| new.to_string());
            if let Some(key) = key_match {
                self.key = key;
                changed = true;
            }
        }
        changed
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    pub fn mode(&self) -> RefMode {
        self.mode
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn helper(&self) -> Option<&Handle> {
        self.helper.as_ref()
    }

    pub fn policy(&self) -> LossPolicy {
        self.policy
    }
}

fn kind_of(handle: &Handle) -> Option<RefKind> {
    Some(match handle {
        Handle::Table(_) => RefKind::Table,
        Handle::Column(_) => RefKind::Column,
        Handle::Function(_) => RefKind::Function,
        Handle::Aggregate(_) => RefKind::Aggregate,
        Handle::Query(_) => RefKind::Query,
        Handle::Target(..) => RefKind::Target,
        Handle::Field(..) => RefKind::Field,
        Handle::Join(..) | Handle::Condition(..) => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ids::{FieldId, QueryId};
    use crate::catalog::TableId;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Fixed {
        live: HashSet<Handle>,
        names: HashMap<String, Handle>,
    }

    impl Resolver for Fixed {
        fn resolve(&self, _: RefKind, mode: RefMode, key: &str, _: Option<&Handle>) -> Option<Handle> {
            match mode {
                RefMode::ByName => self.names.get(key).cloned(),
                RefMode::ById => self.live.iter().find(|h| h.to_string() == key).cloned(),
            }
        }

        fn exists(&self, handle: &Handle) -> bool {
            self.live.contains(handle)
        }
    }

    #[test]
    fn test_inactive_until_resolvable() {
        let table = Handle::Table(TableId("TV1".into()));
        let mut r = DeferredRef::by_name(RefKind::Table, "orders", LossPolicy::Revert);
        let mut scope = Fixed::default();
        assert!(!r.activate(&scope));

        scope.live.insert(table.clone());
        scope.names.insert("orders".into(), table.clone());
        assert!(r.activate(&scope));
        assert_eq!(r.target(), Some(&table));

        scope.live.clear();
        scope.names.clear();
        assert!(!r.activate(&scope));
        assert_eq!(r.key(), "orders");
    }

    #[test]
    fn test_wrong_kind_never_resolves() {
        let q = QueryId::reserve(50);
        let mut scope = Fixed::default();
        scope.names.insert("x".into(), Handle::Field(q, FieldId(1)));
        let mut r = DeferredRef::by_name(RefKind::Target, "x", LossPolicy::Revert);
        assert!(!r.activate(&scope));
    }

    #[test]
    fn test_replace_target_if_mapped() {
        let (old_q, new_q) = (QueryId::reserve(60), QueryId::reserve(61));
        let old = Handle::Field(old_q, FieldId(2));
        let new = Handle::Field(new_q, FieldId(2));
        let mut r = DeferredRef::resolved(RefKind::Field, old.clone(), LossPolicy::DestroyOwner);
        let mut remap = RemapTable::new();
        assert!(!r.replace_target_if_mapped(&remap));

        remap.insert(old, new.clone());
        assert!(r.replace_target_if_mapped(&remap));
        assert_eq!(r.target(), Some(&new));
        assert_eq!(r.key(), "QU61:QF2");
    }
}
