use super::deferred::{DeferredRef, LossPolicy, RefKind};
use super::ids::{FieldId, Handle, QueryId, TargetId};
use super::query::Query;
use super::values::{Value, ValueType};

/// A literal or parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub value_type: ValueType,
    pub value: Option<Value>,
    pub is_parameter: bool,
    pub default: Option<Value>,
    pub nullable: bool,
    pub description: Option<String>,
    /// The SQL `DEFAULT` keyword.
    pub use_default: bool,
}

impl Literal {
    fn new(value_type: ValueType, value: Option<Value>, is_parameter: bool) -> Self {
        Self {
            value_type,
            value,
            is_parameter,
            default: None,
            nullable: true,
            description: None,
            use_default: false,
        }
    }

    /// A non-parameter literal that currently holds SQL NULL.
    pub fn holds_null(&self) -> bool {
        !self.is_parameter && matches!(self.value, Some(Value::Null))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// `target.column`. For INSERT/UPDATE the optional value provider holds the assigned expression.
    Column {
        target: DeferredRef,
        column: DeferredRef,
        value: Option<DeferredRef>,
    },
    Literal(Literal),
    Call {
        function: DeferredRef,
        args: Vec<DeferredRef>,
    },
    /// `None` argument renders as `agg(*)`.
    Aggregate {
        aggregate: DeferredRef,
        arg: Option<DeferredRef>,
    },
    Wildcard {
        target: DeferredRef,
    },
}

impl FieldKind {
    pub fn tag(&self) -> &'static str {
        match self {
            FieldKind::Column { .. } => "column",
            FieldKind::Literal(_) => "value",
            FieldKind::Call { .. } => "call",
            FieldKind::Aggregate { .. } => "aggregate",
            FieldKind::Wildcard { .. } => "all",
        }
    }
}

/// An expression node owned by a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub(crate) id: FieldId,
    pub(crate) name: Option<String>,
    pub(crate) alias: Option<String>,
    pub(crate) visible: bool,
    pub(crate) internal: bool,
    pub(crate) kind: FieldKind,
}

impl Field {
    fn with_kind(kind: FieldKind, name: Option<String>) -> Self {
        Self {
            id: FieldId(0),
            name,
            alias: None,
            visible: true,
            internal: false,
            kind,
        }
    }

    /// `target.column`. The column is looked up by name in whatever the target
    /// represents: a catalog table, or the visible fields of a sub-query.
    pub fn column(query: &Query, target: TargetId, column: &str) -> Self {
        let helper = query.target(target).and_then(|t| t.entity.target().cloned());
        let column_kind = match helper {
            Some(Handle::Query(_)) => RefKind::Field,
            _ => RefKind::Column,
        };
        Self::with_kind(
            FieldKind::Column {
                target: DeferredRef::resolved(
                    RefKind::Target,
                    Handle::Target(query.id(), target),
                    LossPolicy::DestroyOwner,
                ),
                column: DeferredRef::by_name(column_kind, column, LossPolicy::Revert)
                    .with_helper(helper),
                value: None,
            },
            Some(column.to_string()),
        )
    }

    pub fn value(value: Value) -> Self {
        let value_type = value.value_type();
        Self::with_kind(FieldKind::Literal(Literal::new(value_type, Some(value), false)), None)
    }

    /// A value supplied at render time through a [`ParamContext`](crate::params::ParamContext).
    pub fn parameter(name: &str, value_type: ValueType) -> Self {
        Self::with_kind(
            FieldKind::Literal(Literal::new(value_type, None, true)),
            Some(name.to_string()),
        )
    }

    /// The `DEFAULT` keyword.
    pub fn default_keyword() -> Self {
        let mut lit = Literal::new(ValueType::Unknown, None, false);
        lit.use_default = true;
        Self::with_kind(FieldKind::Literal(lit), None)
    }

    pub fn call(query: &Query, function: &str, args: &[FieldId]) -> Self {
        Self::with_kind(
            FieldKind::Call {
                function: DeferredRef::by_name(RefKind::Function, function, LossPolicy::Revert),
                args: args
                    .iter()
                    .map(|a| field_ref(query, *a, LossPolicy::DestroyOwner))
                    .collect(),
            },
            Some(function.to_string()),
        )
    }

    pub fn aggregate(query: &Query, aggregate: &str, arg: Option<FieldId>) -> Self {
        Self::with_kind(
            FieldKind::Aggregate {
                aggregate: DeferredRef::by_name(RefKind::Aggregate, aggregate, LossPolicy::Revert),
                arg: arg.map(|a| field_ref(query, a, LossPolicy::DestroyOwner)),
            },
            Some(aggregate.to_string()),
        )
    }

    pub fn wildcard(query: &Query, target: TargetId) -> Self {
        Self::with_kind(
            FieldKind::Wildcard {
                target: DeferredRef::resolved(
                    RefKind::Target,
                    Handle::Target(query.id(), target),
                    LossPolicy::DestroyOwner,
                ),
            },
            None,
        )
    }

    // builder helpers

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        if let FieldKind::Literal(lit) = &mut self.kind {
            lit.default = Some(default);
        }
        self
    }

    pub fn not_null(mut self) -> Self {
        if let FieldKind::Literal(lit) = &mut self.kind {
            lit.nullable = false;
        }
        self
    }

    pub fn described(mut self, description: &str) -> Self {
        if let FieldKind::Literal(lit) = &mut self.kind {
            lit.description = Some(description.to_string());
        }
        self
    }

    // accessors

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn set_alias(&mut self, alias: Option<&str>) {
        self.alias = alias.map(str::to_string);
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn set_internal(&mut self, internal: bool) {
        self.internal = internal;
    }

    pub fn literal(&self) -> Option<&Literal> {
        match &self.kind {
            FieldKind::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    pub fn is_parameter(&self) -> bool {
        self.literal().is_some_and(|l| l.is_parameter)
    }

    /// The target of a column or wildcard field.
    pub fn target(&self) -> Option<TargetId> {
        match &self.kind {
            FieldKind::Column { target, .. } | FieldKind::Wildcard { target } => {
                match target.target() {
                    Some(Handle::Target(_, t)) => Some(*t),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// The value provider of a column field (INSERT/UPDATE assignments).
    pub fn value_provider(&self) -> Option<FieldId> {
        match &self.kind {
            FieldKind::Column { value: Some(v), .. } => match v.target() {
                Some(Handle::Field(_, f)) => Some(*f),
                _ => None,
            },
            _ => None,
        }
    }

    /// Every reference this field holds, active or not.
    pub fn refs(&self) -> Vec<&DeferredRef> {
        match &self.kind {
            FieldKind::Column {
                target,
                column,
                value,
            } => {
                let mut refs = vec![target, column];
                refs.extend(value.iter());
                refs
            }
            FieldKind::Literal(_) => Vec::new(),
            FieldKind::Call { function, args } => {
                let mut refs = vec![function];
                refs.extend(args.iter());
                refs
            }
            FieldKind::Aggregate { aggregate, arg } => {
                let mut refs = vec![aggregate];
                refs.extend(arg.iter());
                refs
            }
            FieldKind::Wildcard { target } => vec![target],
        }
    }

    pub(crate) fn refs_mut(&mut self) -> Vec<&mut DeferredRef> {
        match &mut self.kind {
            FieldKind::Column {
                target,
                column,
                value,
            } => {
                let mut refs = vec![target, column];
                refs.extend(value.iter_mut());
                refs
            }
            FieldKind::Literal(_) => Vec::new(),
            FieldKind::Call { function, args } => {
                let mut refs = vec![function];
                refs.extend(args.iter_mut());
                refs
            }
            FieldKind::Aggregate { aggregate, arg } => {
                let mut refs = vec![aggregate];
                refs.extend(arg.iter_mut());
                refs
            }
            FieldKind::Wildcard { target } => vec![target],
        }
    }

    /// Nodes this field points at directly. Arguments are not followed.
    pub fn referenced_nodes(&self) -> Vec<Handle> {
        self.refs()
            .into_iter()
            .filter_map(|r| r.target().cloned())
            .collect()
    }

    /// Fields of `query` referenced directly.
    pub(crate) fn referenced_fields(&self, query: QueryId) -> Vec<FieldId> {
        self.referenced_nodes()
            .into_iter()
            .filter_map(|h| match h {
                Handle::Field(q, f) if q == query => Some(f),
                _ => None,
            })
            .collect()
    }
}

pub(crate) fn field_ref(query: &Query, field: FieldId, policy: LossPolicy) -> DeferredRef {
    DeferredRef::resolved(RefKind::Field, Handle::Field(query.id(), field), policy)
}

/// Parameter keys fall back to the field's stable id when unnamed.
pub(crate) fn parameter_key(query: &Query, field: &Field) -> String {
    field
        .name
        .clone()
        .unwrap_or_else(|| Handle::Field(query.id(), field.id).to_string())
}
