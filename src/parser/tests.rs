use super::*;
use crate::ast::{JoinKind, LeafOp, QueryKind, Value, ValueType};
use crate::error::SqlGraphError;
use pretty_assertions::assert_eq;

fn col(table: Option<&str>, name: &str) -> Expr {
    Expr::Column {
        table: table.map(str::to_string),
        name: name.to_string(),
    }
}

fn select_of(sql: &str) -> Select {
    match parse(sql).unwrap() {
        Statement::Select(s) => s,
        other => panic!("expected SELECT, got {:?}", other),
    }
}

#[test]
fn test_simple_select() {
    let s = select_of("SELECT id, name AS who FROM Customers c");
    assert_eq!(s.items.len(), 2);
    assert_eq!(
        s.items[1],
        SelectItem::Expr {
            expr: col(None, "name"),
            alias: Some("who".to_string()),
        }
    );
    assert_eq!(
        s.from[0].source,
        TableRef::Table {
            name: "customers".to_string(),
            alias: Some("c".to_string()),
        }
    );
}

#[test]
fn test_quoted_identifier_keeps_case() {
    let s = select_of("select \"Name\" from \"My Table\"");
    assert_eq!(
        s.items[0],
        SelectItem::Expr {
            expr: col(None, "Name"),
            alias: None,
        }
    );
    assert_eq!(
        s.from[0].source,
        TableRef::Table {
            name: "My Table".to_string(),
            alias: None,
        }
    );
}

#[test]
fn test_joins_and_where() {
    let s = select_of(
        "SELECT * FROM orders o LEFT OUTER JOIN customers c ON o.customer_id = c.id \
         JOIN items i WHERE o.total >= 10 AND (c.name LIKE 'A%' OR c.name IS NULL)",
    );
    assert_eq!(s.items, vec![SelectItem::Wildcard]);
    let joins = &s.from[0].joins;
    assert_eq!(joins.len(), 2);
    assert_eq!(joins[0].kind, JoinKind::Left);
    assert!(joins[0].on.is_some());
    assert_eq!(joins[1].kind, JoinKind::Inner);
    assert!(joins[1].on.is_none());

    match s.selection {
        Some(Expr::And(parts)) => {
            assert_eq!(parts.len(), 2);
            assert!(matches!(&parts[0], Expr::Compare { op: LeafOp::SupEqual, .. }));
            assert!(matches!(&parts[1], Expr::Or(alts) if alts.len() == 2));
        }
        other => panic!("unexpected selection {:?}", other),
    }
}

#[test]
fn test_between_in_and_not() {
    let s = select_of("SELECT a FROM t WHERE NOT a BETWEEN 1 AND 5 AND b IN (1, 2, 3)");
    match s.selection {
        Some(Expr::And(parts)) => {
            assert!(matches!(&parts[0], Expr::Not(inner) if matches!(**inner, Expr::Between { .. })));
            assert!(matches!(&parts[1], Expr::InList { list, .. } if list.len() == 3));
        }
        other => panic!("unexpected selection {:?}", other),
    }
}

#[test]
fn test_parameters() {
    let s = select_of("SELECT a FROM t WHERE a = :min::int AND b = ##who");
    match s.selection {
        Some(Expr::And(parts)) => {
            assert_eq!(
                parts[0],
                Expr::Compare {
                    op: LeafOp::Equal,
                    left: Box::new(col(None, "a")),
                    right: Box::new(Expr::Param {
                        name: "min".to_string(),
                        value_type: Some(ValueType::Integer),
                    }),
                }
            );
            assert!(matches!(&parts[1], Expr::Compare { right, .. }
                if **right == Expr::Param { name: "who".to_string(), value_type: None }));
        }
        other => panic!("unexpected selection {:?}", other),
    }
}

#[test]
fn test_order_limit_offset() {
    let s = select_of("SELECT a, b FROM t ORDER BY 2 DESC, a LIMIT 10 OFFSET 20;");
    assert_eq!(s.order_by.len(), 2);
    assert_eq!(s.order_by[0].key, OrderKey::Position(2));
    assert!(!s.order_by[0].ascending);
    assert_eq!(s.order_by[1].key, OrderKey::Expr(col(None, "a")));
    assert_eq!(s.limit, Some(10));
    assert_eq!(s.offset, Some(20));
}

#[test]
fn test_count_star_and_sub_query() {
    let s = select_of("SELECT count(*) FROM (SELECT id FROM t) AS sub");
    assert_eq!(
        s.items[0],
        SelectItem::Expr {
            expr: Expr::Call {
                name: "count".to_string(),
                args: vec![Expr::Star],
            },
            alias: None,
        }
    );
    assert!(matches!(&s.from[0].source, TableRef::SubQuery { alias: Some(a), .. } if a == "sub"));
}

#[test]
fn test_insert_forms() {
    match parse("INSERT INTO t (a, b) VALUES (1, 'x')").unwrap() {
        Statement::Insert(i) => {
            assert_eq!(i.columns, vec!["a".to_string(), "b".to_string()]);
            assert_eq!(
                i.source,
                InsertSource::Values(vec![
                    Expr::Literal(Value::Int(1)),
                    Expr::Literal(Value::Text("x".to_string())),
                ])
            );
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        parse("INSERT INTO t DEFAULT VALUES").unwrap(),
        Statement::Insert(Insert { source: InsertSource::DefaultValues, .. })
    ));
    assert!(matches!(
        parse("INSERT INTO t (a) SELECT a FROM u").unwrap(),
        Statement::Insert(Insert { source: InsertSource::Query(_), .. })
    ));
}

#[test]
fn test_update_and_delete() {
    match parse("UPDATE t SET a = 1, t.b = DEFAULT WHERE id = 3").unwrap() {
        Statement::Update(u) => {
            assert_eq!(u.assignments[0].0, "a");
            assert_eq!(u.assignments[1], ("b".to_string(), Expr::Default));
            assert!(u.selection.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(parse("DELETE FROM t").unwrap().kind(), QueryKind::Delete);
}

#[test]
fn test_compound_flattening() {
    match parse("SELECT a FROM t UNION SELECT a FROM u UNION SELECT a FROM v").unwrap() {
        Statement::Compound(c) => {
            assert_eq!(c.op, QueryKind::Union);
            assert_eq!(c.operands.len(), 3);
        }
        other => panic!("unexpected {:?}", other),
    }
    match parse("SELECT a FROM t EXCEPT SELECT a FROM u EXCEPT SELECT a FROM v").unwrap() {
        Statement::Compound(c) => {
            assert_eq!(c.op, QueryKind::Except);
            assert_eq!(c.operands.len(), 2);
            assert!(matches!(&c.operands[0], Statement::Compound(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_errors_carry_position() {
    match parse("SELECT a FROM t garbage here") {
        Err(SqlGraphError::Parse { position, message }) => {
            assert_eq!(position, 24);
            assert_eq!(message, "Unexpected trailing input: 'here'");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(parse("   "), Err(SqlGraphError::Parse { .. })));
    assert!(matches!(parse("VACUUM"), Err(SqlGraphError::Parse { .. })));
}
