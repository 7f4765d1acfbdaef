//! Statement tree produced by the SQL parser and consumed by the importer.

use crate::ast::{JoinKind, LeafOp, QueryKind, Value, ValueType};

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Compound(Compound),
}

impl Statement {
    pub fn kind(&self) -> QueryKind {
        match self {
            Statement::Select(_) => QueryKind::Select,
            Statement::Insert(_) => QueryKind::Insert,
            Statement::Update(_) => QueryKind::Update,
            Statement::Delete(_) => QueryKind::Delete,
            Statement::Compound(c) => c.op,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub from: Vec<FromItem>,
    pub selection: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `t.*`
    QualifiedWildcard(String),
    Expr { expr: Expr, alias: Option<String> },
}

/// A comma-separated FROM entry with the joins chained onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct FromItem {
    pub source: TableRef,
    pub joins: Vec<JoinClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    Table { name: String, alias: Option<String> },
    SubQuery { query: Box<Statement>, alias: Option<String> },
}

impl TableRef {
    pub fn alias(&self) -> Option<&str> {
        match self {
            TableRef::Table { alias, .. } | TableRef::SubQuery { alias, .. } => alias.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderKey {
    /// 1-based position in the projection.
    Position(usize),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub key: OrderKey,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub source: InsertSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Expr>),
    Query(Box<Statement>),
    DefaultValues,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub alias: Option<String>,
    pub assignments: Vec<(String, Expr)>,
    pub selection: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub alias: Option<String>,
    pub selection: Option<Expr>,
}

/// UNION / INTERSECT / EXCEPT over two or more operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Compound {
    pub op: QueryKind,
    pub operands: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// The `DEFAULT` keyword.
    Default,
    Param { name: String, value_type: Option<ValueType> },
    Column { table: Option<String>, name: String },
    Call { name: String, args: Vec<Expr> },
    /// `*` inside `count(*)`.
    Star,
    Compare { op: LeafOp, left: Box<Expr>, right: Box<Expr> },
    Between { expr: Box<Expr>, low: Box<Expr>, high: Box<Expr> },
    InList { expr: Box<Expr>, list: Vec<Expr> },
    IsNull { expr: Box<Expr>, negated: bool },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Whether this is a boolean expression rather than a value.
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            Expr::Compare { .. }
                | Expr::Between { .. }
                | Expr::InList { .. }
                | Expr::IsNull { .. }
                | Expr::And(_)
                | Expr::Or(_)
                | Expr::Not(_)
        )
    }
}
