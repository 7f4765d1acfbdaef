use super::ids::{CondId, FieldId, Handle, JoinId, QueryId, TargetId};

/// Node that owns a [`DeferredRef`](super::DeferredRef).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefOwner {
    Target(TargetId),
    Join(JoinId),
    Field(FieldId),
    Condition(CondId),
}

/// What changed in a query. Drained with [`Query::take_events`](super::Query::take_events).
///
/// Inside a batch nothing is recorded; closing the outermost batch records a
/// single `Changed`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    Changed,
    TargetAdded(TargetId),
    TargetRemoved(TargetId),
    FieldAdded(FieldId),
    FieldRemoved(FieldId),
    FieldChanged(FieldId),
    JoinAdded(JoinId),
    JoinRemoved(JoinId),
    ConditionChanged,
    SubQueryAdded(QueryId),
    SubQueryRemoved(QueryId),
    RefFound { owner: RefOwner, node: Handle },
    RefLost { owner: RefOwner, node: Handle },
}
