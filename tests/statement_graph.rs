use pretty_assertions::assert_eq;
use sqlgraph::prelude::*;
use sqlgraph::{parse, persist};
use std::sync::Arc;

fn shop() -> Dictionary {
    Dictionary::new()
        .with_table("tbl", &["id", "x", "y"])
        .with_table("customers", &["id", "name"])
        .with_table("orders", &["id", "customer_id", "total"])
        .with_table("items", &["id", "order_id", "sku"])
        .with_foreign_key("orders", &["customer_id"], "customers", &["id"])
        .with_foreign_key("items", &["order_id"], "orders", &["id"])
        .with_aggregate("count", ValueType::Unknown, ValueType::Integer)
}

fn catalog() -> Arc<dyn Catalog> {
    Arc::new(shop())
}

fn sql(q: &Query) -> String {
    q.to_sql(&ParamContext::new()).unwrap()
}

#[test]
fn select_with_condition_round_trips() {
    let q = parse("SELECT t.x, t.y FROM tbl t WHERE t.x = 3", catalog()).unwrap();
    assert_eq!(q.targets().len(), 1);
    assert_eq!(q.visible_fields().count(), 2);
    let root = q.where_condition().unwrap();
    assert_eq!(q.cond_kind(root), Some(CondKind::Leaf(LeafOp::Equal)));
    assert_eq!(sql(&q), "SELECT t.x, t.y FROM tbl AS t WHERE t.x = 3");
}

#[test]
fn update_accepts_a_single_target() {
    let mut q = parse("UPDATE tbl SET x = 1 WHERE id = 5", catalog()).unwrap();
    assert_eq!(q.kind(), QueryKind::Update);
    let x = q.visible_fields().next().unwrap();
    assert_eq!(x.name(), Some("x"));
    assert!(x.value_provider().is_some());

    let err = q.add_target(Entity::table("orders"), None).unwrap_err();
    assert!(matches!(err, SqlGraphError::Structure(_)));
    assert_eq!(sql(&q), "UPDATE tbl SET x = 1 WHERE id = 5");
}

fn join_orders_customers(dict: Dictionary) -> Query {
    let mut q = Query::new(Arc::new(dict));
    q.batch(|q| {
        let o = q.add_target(Entity::table("orders"), Some("o")).unwrap();
        let c = q.add_target(Entity::table("customers"), Some("c")).unwrap();
        q.add_field(Field::column(q, o, "id")).unwrap();
        q.add_join(Join::new(q, o, c)).unwrap();
    });
    q
}

#[test]
fn implicit_join_needs_exactly_one_foreign_key() {
    let q = join_orders_customers(shop());
    assert_eq!(
        sql(&q),
        "SELECT o.id FROM orders AS o INNER JOIN customers AS c ON (o.customer_id = c.id)"
    );

    let none = Dictionary::new()
        .with_table("orders", &["id", "customer_id"])
        .with_table("customers", &["id"]);
    let err = join_orders_customers(none)
        .to_sql(&ParamContext::new())
        .unwrap_err();
    assert!(matches!(err, SqlGraphError::Render(_)));

    let two = Dictionary::new()
        .with_table("orders", &["id", "customer_id", "payer_id"])
        .with_table("customers", &["id"])
        .with_foreign_key("orders", &["customer_id"], "customers", &["id"])
        .with_foreign_key("orders", &["payer_id"], "customers", &["id"]);
    let err = join_orders_customers(two)
        .to_sql(&ParamContext::new())
        .unwrap_err();
    assert!(matches!(err, SqlGraphError::Render(_)));
}

#[test]
fn inner_then_left_join_pack() {
    let q = parse(
        "SELECT a.name FROM customers a JOIN orders b LEFT JOIN items c",
        catalog(),
    )
    .unwrap();
    assert_eq!(
        sql(&q),
        "SELECT a.name FROM customers AS a INNER JOIN orders AS b ON (b.customer_id = a.id) \
         LEFT JOIN items AS c ON (c.order_id = b.id)"
    );
}

#[test]
fn rendering_is_a_fixpoint_of_import() {
    let statements = [
        "SELECT o.id, c.name FROM orders o LEFT JOIN customers c ON o.customer_id = c.id \
         WHERE o.total > 10 ORDER BY 2 DESC LIMIT 5",
        "SELECT c.id FROM customers c WHERE c.name IS NOT NULL AND (c.id = 1 OR c.id = 2)",
        "SELECT DISTINCT count(*) AS n FROM orders o WHERE o.total BETWEEN 1 AND 9",
        "SELECT id FROM customers UNION SELECT id FROM orders",
        "INSERT INTO customers (name) VALUES ('Ann')",
        "UPDATE tbl SET x = 1, y = 'two' WHERE id IN (1, 2, 3)",
        "DELETE FROM tbl WHERE NOT (x = 4)",
    ];
    for text in statements {
        let first = sql(&parse(text, catalog()).unwrap());
        let second = sql(&parse(&first, catalog()).unwrap());
        assert_eq!(first, second, "re-importing {:?}", text);
    }
}

#[test]
fn parameters_bind_positionally() {
    let q = parse(
        "SELECT o.id FROM orders o WHERE o.total > :min::int AND o.customer_id = :who::int",
        catalog(),
    )
    .unwrap();
    let names: Vec<String> = q.parameters().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["min".to_string(), "who".to_string()]);

    let ctx = ParamContext::new().with("min", 10).with("who", 3);
    let (text, binds) =
        sqlgraph::transpiler::render_with_binds(&q, &ctx, &RenderOptions::positional()).unwrap();
    assert_eq!(
        text,
        "SELECT o.id FROM orders AS o WHERE o.total > $1 AND o.customer_id = $2"
    );
    assert_eq!(binds, vec![Value::Int(10), Value::Int(3)]);

    let err = q.to_sql(&ParamContext::new().with("min", 10)).unwrap_err();
    assert_eq!(err.to_string(), "Render error: Missing parameter 'who'");
}

#[test]
fn clone_renders_identically() {
    let q = parse(
        "SELECT o.id, c.name FROM orders o JOIN customers c WHERE o.total > 5 ORDER BY 1",
        catalog(),
    )
    .unwrap();
    let (copy, _) = q.clone_with_remap();
    assert_ne!(copy.id(), q.id());
    assert_eq!(copy.fields().len(), q.fields().len());
    assert_eq!(sql(&copy), sql(&q));
}

#[test]
fn garbage_collection_is_idempotent() {
    let mut q = parse("SELECT t.x FROM tbl t", catalog()).unwrap();
    q.set_auto_clean(false);
    q.add_field(Field::value(Value::Int(1)).hidden()).unwrap();
    q.add_field(Field::value(Value::Int(2)).hidden()).unwrap();
    assert_eq!(q.collect_garbage(), 2);
    assert_eq!(q.collect_garbage(), 0);
    assert_eq!(sql(&q), "SELECT t.x FROM tbl AS t");
}

#[test]
fn persisted_json_reloads() {
    let q = parse(
        "SELECT c.name FROM customers c LEFT JOIN orders o WHERE o.total >= 100",
        catalog(),
    )
    .unwrap();
    let json = persist::to_json(&q).unwrap();
    let loaded = persist::from_json(&json, catalog()).unwrap();
    assert_eq!(sql(&loaded), sql(&q));
}

#[test]
fn syntax_errors_report_position() {
    let err = parse("SELECT a FROM", catalog()).unwrap_err();
    assert!(matches!(err, SqlGraphError::Parse { .. }), "{}", err);
}

#[test]
fn import_failure_falls_back_to_raw_text() {
    let mut q = parse("SELECT c.name FROM customers c", catalog()).unwrap();
    let text = "SELECT id FROM customers c, orders o WHERE id = 4";
    q.set_raw_text(text).unwrap();
    assert_eq!(q.kind(), QueryKind::RawText);
    assert!(q.targets().is_empty());
    assert!(q.fields().is_empty());
    assert_eq!(q.raw_text().map(|r| r.sql.as_str()), Some(text));
    assert_eq!(sql(&q), text);

    let err = parse(text, catalog()).unwrap_err();
    assert!(err.to_string().contains("Ambiguous column 'id'"), "{}", err);
}
