pub mod condition;
pub mod deferred;
pub mod events;
pub mod field;
pub mod ids;
pub mod join;
pub mod query;
pub mod target;
pub mod values;

mod clone;
mod gc;
pub(crate) mod scope;

pub use self::condition::{CondBody, CondKind, Condition, JoinShape, LeafOp, NodeOp, Slot};
pub use self::deferred::{DeferredRef, LossPolicy, RefKind, RefMode, RemapTable, Resolver};
pub use self::events::{QueryEvent, RefOwner};
pub use self::field::{Field, FieldKind, Literal};
pub use self::ids::{CondId, FieldId, Handle, JoinId, QueryId, TargetId};
pub use self::join::{Join, JoinKind};
pub use self::query::{OrderBy, Query, QueryKind, RawOrigin, RawPlaceholder, RawText};
pub use self::target::{Entity, Target};
pub use self::values::{Value, ValueType};
