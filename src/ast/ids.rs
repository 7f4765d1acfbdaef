use crate::catalog::{AggregateId, ColumnId, FunctionId, TableId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_QUERY_ID: AtomicU32 = AtomicU32::new(1);

/// Process-wide query id, rendered `QU<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(u32);

impl QueryId {
    pub(crate) fn next() -> Self {
        QueryId(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Adopt an id read back from a persisted tree, keeping the allocator ahead of it.
    pub(crate) fn reserve(serial: u32) -> Self {
        NEXT_QUERY_ID.fetch_max(serial.saturating_add(1), Ordering::Relaxed);
        QueryId(serial)
    }

    pub fn serial(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QU{}", self.0)
    }
}

impl FromStr for QueryId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("QU")
            .and_then(|n| n.parse().ok())
            .filter(|n| *n > 0)
            .map(QueryId)
            .ok_or_else(|| format!("invalid query id '{}'", s))
    }
}

macro_rules! local_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn serial(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.strip_prefix($prefix)
                    .and_then(|n| n.parse().ok())
                    .filter(|n| *n > 0)
                    .map($name)
                    .ok_or_else(|| format!(concat!("invalid ", $prefix, " id '{}'"), s))
            }
        }
    };
}

local_id!(
    /// Target id, unique within its query.
    TargetId,
    "T"
);
local_id!(
    /// Field id, unique within its query.
    FieldId,
    "QF"
);
local_id!(JoinId, "J");
local_id!(CondId, "C");

/// A resolved node, either a schema object or a node of some query graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Handle {
    Table(TableId),
    Column(ColumnId),
    Function(FunctionId),
    Aggregate(AggregateId),
    Query(QueryId),
    Target(QueryId, TargetId),
    Field(QueryId, FieldId),
    Join(QueryId, JoinId),
    Condition(QueryId, CondId),
}

impl Handle {
    /// The query a graph node belongs to; `None` for schema objects.
    pub fn query(&self) -> Option<QueryId> {
        match self {
            Handle::Query(q)
            | Handle::Target(q, _)
            | Handle::Field(q, _)
            | Handle::Join(q, _)
            | Handle::Condition(q, _) => Some(*q),
            _ => None,
        }
    }

    pub fn is_catalog(&self) -> bool {
        self.query().is_none()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Table(id) => write!(f, "{}", id),
            Handle::Column(id) => write!(f, "{}", id),
            Handle::Function(id) => write!(f, "{}", id),
            Handle::Aggregate(id) => write!(f, "{}", id),
            Handle::Query(q) => write!(f, "{}", q),
            Handle::Target(q, t) => write!(f, "{}:{}", q, t),
            Handle::Field(q, fi) => write!(f, "{}:{}", q, fi),
            Handle::Join(q, j) => write!(f, "{}:{}", q, j),
            Handle::Condition(q, c) => write!(f, "{}:{}", q, c),
        }
    }
}

/// Split a compound id such as `QU3:QF7` into the query id and the local part.
/// A bare local id (`QF7`) uses `default_query`.
pub(crate) fn split_compound<T: FromStr>(
    key: &str,
    default_query: Option<QueryId>,
) -> Option<(QueryId, T)> {
    match key.split_once(':') {
        Some((q, local)) => Some((q.parse().ok()?, local.parse().ok()?)),
        None => Some((default_query?, key.parse().ok()?)),
    }
}
