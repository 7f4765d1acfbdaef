//! Persisted form of a query graph.
//!
//! A query becomes a tree of [`Element`]s: `query` at the root, with
//! `target`, `field`, `join`, `cond`, `order`, `where` and `placeholder`
//! children, and nested `query` elements for sub-queries and parameter
//! sources. References are stored as their lookup key and resolved in one
//! pass once the whole tree is rebuilt, so forward references are fine.

use crate::ast::{
    CondBody, CondId, CondKind, Condition, DeferredRef, Field, FieldId, FieldKind, Join, JoinId,
    JoinKind, Literal, LossPolicy, OrderBy, Query, QueryId, QueryKind, RawOrigin, RawPlaceholder,
    RawText, RefKind, RefMode, Target, TargetId, Value, ValueType,
};
use crate::catalog::Catalog;
use crate::error::{Result, SqlGraphError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

/// One node of the persisted tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    fn set(&mut self, name: &str, value: impl ToString) -> &mut Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.attr(name).ok_or_else(|| {
            SqlGraphError::serialization(format!(
                "<{}> is missing the '{}' attribute",
                self.tag, name
            ))
        })
    }

    fn parsed<T: FromStr>(&self, name: &str) -> Result<T> {
        let raw = self.required(name)?;
        raw.parse().map_err(|_| {
            SqlGraphError::serialization(format!(
                "<{}> has a malformed '{}' attribute: '{}'",
                self.tag, name, raw
            ))
        })
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        self.attr(name).map_or(default, |v| v == "true")
    }
}

pub fn to_json(query: &Query) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_element(query))?)
}

pub fn from_json(json: &str, catalog: Arc<dyn Catalog>) -> Result<Query> {
    let element: Element = serde_json::from_str(json)?;
    from_element(&element, catalog)
}

// ---------------------------------------------------------------------------
// writing
// ---------------------------------------------------------------------------

pub fn to_element(q: &Query) -> Element {
    let mut el = Element::new("query");
    el.set("id", q.id()).set("kind", q.kind().name());
    if let Some(name) = q.name() {
        el.set("name", name);
    }
    if q.is_distinct() {
        el.set("distinct", true);
    }
    if let Some(limit) = q.limit() {
        el.set("limit", limit);
    }
    if let Some(offset) = q.offset() {
        el.set("offset", offset);
    }
    if let Some(raw) = q.raw_text() {
        el.set("raw", &raw.sql);
        el.set(
            "raw_origin",
            match raw.origin {
                RawOrigin::Assigned => "assigned",
                RawOrigin::Unparsed => "unparsed",
            },
        );
        for p in &raw.placeholders {
            let mut child = Element::new("placeholder");
            child
                .set("start", p.span.start)
                .set("end", p.span.end)
                .set("field", p.field);
            el.children.push(child);
        }
    }

    for sub in q.sub_queries() {
        el.children.push(to_element(sub));
    }
    for source in q.param_sources() {
        let mut child = to_element(source);
        child.set("role", "param_source");
        el.children.push(child);
    }
    for t in q.targets() {
        el.children.push(target_element(t));
    }
    for f in q.fields() {
        el.children.push(field_element(f));
    }
    for c in q.conditions().filter(|c| c.parent().is_none()) {
        el.children.push(cond_element(q, c));
    }
    for j in q.joins() {
        let mut child = Element::new("join");
        child.set("id", j.id()).set("kind", j.kind().name());
        put_ref(&mut child, "target1", &j.target1);
        put_ref(&mut child, "target2", &j.target2);
        if let Some(c) = j.condition() {
            child.set("cond", c);
        }
        el.children.push(child);
    }
    if let Some(root) = q.where_condition() {
        let mut child = Element::new("where");
        child.set("cond", root);
        el.children.push(child);
    }
    for o in q.order_by() {
        let mut child = Element::new("order");
        child.set("field", o.field).set("asc", o.ascending);
        el.children.push(child);
    }
    el
}

/// A reference as `name` (key), `name_kind` and `name_mode` attributes.
fn put_ref(el: &mut Element, name: &str, r: &DeferredRef) {
    el.set(name, r.key())
        .set(&format!("{}_kind", name), r.kind().name())
        .set(
            &format!("{}_mode", name),
            match r.mode() {
                RefMode::ById => "id",
                RefMode::ByName => "name",
            },
        );
}

fn target_element(t: &Target) -> Element {
    let mut el = Element::new("target");
    el.set("id", t.id()).set("entity", t.entity_name());
    if let Some(alias) = t.explicit_alias() {
        el.set("alias", alias);
    }
    put_ref(&mut el, "entity_ref", t.entity_ref());
    el
}

fn field_element(f: &Field) -> Element {
    let mut el = Element::new("field");
    el.set("id", f.id())
        .set("kind", f.kind().tag())
        .set("visible", f.is_visible())
        .set("internal", f.is_internal());
    if let Some(name) = f.name() {
        el.set("name", name);
    }
    if let Some(alias) = f.alias() {
        el.set("alias", alias);
    }
    match f.kind() {
        FieldKind::Column {
            target,
            column,
            value,
        } => {
            put_ref(&mut el, "target", target);
            put_ref(&mut el, "column", column);
            if let Some(value) = value {
                put_ref(&mut el, "value", value);
            }
        }
        FieldKind::Literal(lit) => {
            el.set("type", lit.value_type.name())
                .set("parameter", lit.is_parameter)
                .set("nullable", lit.nullable)
                .set("use_default", lit.use_default);
            if let Some(v) = &lit.value {
                el.set("value", json_value(v));
            }
            if let Some(v) = &lit.default {
                el.set("default", json_value(v));
            }
            if let Some(d) = &lit.description {
                el.set("descr", d);
            }
        }
        FieldKind::Call { function, args } => {
            put_ref(&mut el, "function", function);
            for arg in args {
                let mut child = Element::new("arg");
                put_ref(&mut child, "field", arg);
                el.children.push(child);
            }
        }
        FieldKind::Aggregate { aggregate, arg } => {
            put_ref(&mut el, "aggregate", aggregate);
            if let Some(arg) = arg {
                put_ref(&mut el, "arg", arg);
            }
        }
        FieldKind::Wildcard { target } => put_ref(&mut el, "target", target),
    }
    el
}

fn json_value(v: &Value) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "\"Null\"".to_string())
}

fn cond_element(q: &Query, c: &Condition) -> Element {
    let mut el = Element::new("cond");
    el.set("id", c.id()).set("kind", c.kind().code());
    match c.body() {
        CondBody::Node { children, .. } => {
            for child in children {
                if let Some(node) = q.condition(*child) {
                    el.children.push(cond_element(q, node));
                }
            }
        }
        CondBody::Leaf { operands, .. } => {
            for (i, operand) in operands.iter().enumerate() {
                if let Some(r) = operand {
                    put_ref(&mut el, &format!("op{}", i), r);
                }
            }
        }
    }
    el
}

// ---------------------------------------------------------------------------
// reading
// ---------------------------------------------------------------------------

/// Rebuild a query from its persisted tree and resolve every reference.
///
/// The tree is resolved under its stored ids, then every query in it is
/// moved to a fresh [`QueryId`], so loading one document twice gives two
/// independent graphs.
pub fn from_element(el: &Element, catalog: Arc<dyn Catalog>) -> Result<Query> {
    let mut stored = load_query(el, catalog)?;
    stored.activate_all();
    let (mut q, _) = stored.clone_with_remap();
    q.take_events();
    Ok(q)
}

fn load_query(el: &Element, catalog: Arc<dyn Catalog>) -> Result<Query> {
    if el.tag != "query" {
        return Err(SqlGraphError::serialization(format!(
            "Expected a <query> element, found <{}>",
            el.tag
        )));
    }
    let id: QueryId = el.parsed("id")?;
    let mut q = Query::with_id(QueryId::reserve(id.serial()), Arc::clone(&catalog));
    q.kind = match el.attr("kind") {
        Some(kind) => QueryKind::from_name(kind).ok_or_else(|| {
            SqlGraphError::serialization(format!("Unknown query kind '{}'", kind))
        })?,
        None => QueryKind::Select,
    };
    q.name = el.attr("name").map(str::to_string);
    q.distinct = el.flag("distinct", false);
    q.limit = el.attr("limit").map(|_| el.parsed("limit")).transpose()?;
    q.offset = el.attr("offset").map(|_| el.parsed("offset")).transpose()?;
    if let Some(sql) = el.attr("raw") {
        q.raw = Some(RawText {
            sql: sql.to_string(),
            origin: match el.attr("raw_origin") {
                Some("unparsed") => RawOrigin::Unparsed,
                _ => RawOrigin::Assigned,
            },
            placeholders: Vec::new(),
        });
    }

    let mut join_conds = Vec::new();
    for child in &el.children {
        match child.tag.as_str() {
            "query" => {
                let sub = load_query(child, Arc::clone(&catalog))?;
                if child.attr("role") == Some("param_source") {
                    q.param_sources.push(sub);
                } else {
                    q.sub_queries.push(sub);
                }
            }
            "target" => {
                let id: TargetId = child.parsed("id")?;
                q.bump_serial(id.serial());
                let entity = get_ref(child, "entity_ref", RefKind::Table, policy_of_entity(child))?
                    .ok_or_else(|| SqlGraphError::serialization("<target> without entity_ref"))?;
                let mut target = Target {
                    id,
                    alias: None,
                    entity,
                    entity_name: child.attr("entity").unwrap_or_default().to_string(),
                };
                target.set_alias(child.attr("alias"));
                q.targets.push(target);
            }
            "field" => {
                let field = load_field(child)?;
                q.bump_serial(field.id.serial());
                q.fields.push(field);
            }
            "cond" => load_cond(&mut q, child, None)?,
            "join" => {
                let id: JoinId = child.parsed("id")?;
                q.bump_serial(id.serial());
                let target = |name: &str| {
                    get_ref(child, name, RefKind::Target, LossPolicy::DestroyOwner)?.ok_or_else(
                        || SqlGraphError::serialization(format!("<join> without {}", name)),
                    )
                };
                let kind = child.required("kind")?;
                let condition: Option<CondId> =
                    child.attr("cond").map(|_| child.parsed("cond")).transpose()?;
                if let Some(c) = condition {
                    join_conds.push((id, c));
                }
                q.joins.push(Join {
                    id,
                    target1: target("target1")?,
                    target2: target("target2")?,
                    kind: JoinKind::from_name(kind).ok_or_else(|| {
                        SqlGraphError::serialization(format!("Unknown join kind '{}'", kind))
                    })?,
                    condition,
                });
            }
            "where" => q.where_cond = Some(child.parsed("cond")?),
            "order" => q.order_by.push(OrderBy {
                field: child.parsed("field")?,
                ascending: child.flag("asc", true),
            }),
            "placeholder" => {
                let span: std::ops::Range<usize> = child.parsed("start")?..child.parsed("end")?;
                let field: FieldId = child.parsed("field")?;
                if let Some(raw) = &mut q.raw {
                    raw.placeholders.push(RawPlaceholder { span, field });
                }
            }
            other => {
                return Err(SqlGraphError::serialization(format!(
                    "Unexpected <{}> inside <query>",
                    other
                )));
            }
        }
    }

    for (join, cond) in join_conds {
        if !q.conds.contains_key(&cond) {
            return Err(SqlGraphError::serialization(format!(
                "Join {} uses unknown condition {}",
                join, cond
            )));
        }
        q.set_subtree_join(cond, Some(join));
    }
    if let Some(root) = q.where_cond {
        if !q.conds.contains_key(&root) {
            return Err(SqlGraphError::serialization(format!(
                "WHERE uses unknown condition {}",
                root
            )));
        }
    }
    Ok(q)
}

fn policy_of_entity(el: &Element) -> LossPolicy {
    match el.attr("entity_ref_kind") {
        Some("query") => LossPolicy::DestroyOwner,
        _ => LossPolicy::Revert,
    }
}

/// Rebuild the reference stored under `name`; it stays inactive until the
/// whole tree is loaded.
fn get_ref(
    el: &Element,
    name: &str,
    default_kind: RefKind,
    policy: LossPolicy,
) -> Result<Option<DeferredRef>> {
    let Some(key) = el.attr(name) else {
        return Ok(None);
    };
    let kind = match el.attr(&format!("{}_kind", name)) {
        Some(k) => RefKind::from_name(k).ok_or_else(|| {
            SqlGraphError::serialization(format!("Unknown reference kind '{}'", k))
        })?,
        None => default_kind,
    };
    let mode = match el.attr(&format!("{}_mode", name)) {
        Some("name") => RefMode::ByName,
        _ => RefMode::ById,
    };
    let mut r = DeferredRef::new(kind, policy);
    r.set_key(kind, mode, key);
    Ok(Some(r))
}

fn load_field(el: &Element) -> Result<Field> {
    let id: FieldId = el.parsed("id")?;
    let kind = match el.required("kind")? {
        "column" => FieldKind::Column {
            target: get_ref(el, "target", RefKind::Target, LossPolicy::DestroyOwner)?
                .ok_or_else(|| SqlGraphError::serialization("column field without target"))?,
            column: get_ref(el, "column", RefKind::Column, LossPolicy::Revert)?
                .ok_or_else(|| SqlGraphError::serialization("column field without column"))?,
            value: get_ref(el, "value", RefKind::Field, LossPolicy::Revert)?,
        },
        "value" => {
            let value_type: ValueType = el.attr("type").unwrap_or_default().parse().map_err(
                |e: String| SqlGraphError::serialization(e),
            )?;
            FieldKind::Literal(Literal {
                value_type,
                value: el.attr("value").map(serde_json::from_str).transpose()?,
                is_parameter: el.flag("parameter", false),
                default: el.attr("default").map(serde_json::from_str).transpose()?,
                nullable: el.flag("nullable", true),
                description: el.attr("descr").map(str::to_string),
                use_default: el.flag("use_default", false),
            })
        }
        "call" => {
            let mut args = Vec::new();
            for child in el.children.iter().filter(|c| c.tag == "arg") {
                args.push(
                    get_ref(child, "field", RefKind::Field, LossPolicy::DestroyOwner)?
                        .ok_or_else(|| SqlGraphError::serialization("<arg> without field"))?,
                );
            }
            FieldKind::Call {
                function: get_ref(el, "function", RefKind::Function, LossPolicy::Revert)?
                    .ok_or_else(|| SqlGraphError::serialization("call field without function"))?,
                args,
            }
        }
        "aggregate" => FieldKind::Aggregate {
            aggregate: get_ref(el, "aggregate", RefKind::Aggregate, LossPolicy::Revert)?
                .ok_or_else(|| SqlGraphError::serialization("aggregate field without name"))?,
            arg: get_ref(el, "arg", RefKind::Field, LossPolicy::DestroyOwner)?,
        },
        "all" => FieldKind::Wildcard {
            target: get_ref(el, "target", RefKind::Target, LossPolicy::DestroyOwner)?
                .ok_or_else(|| SqlGraphError::serialization("wildcard field without target"))?,
        },
        other => {
            return Err(SqlGraphError::serialization(format!(
                "Unknown field kind '{}'",
                other
            )));
        }
    };
    Ok(Field {
        id,
        name: el.attr("name").map(str::to_string),
        alias: el.attr("alias").map(str::to_string),
        visible: el.flag("visible", true),
        internal: el.flag("internal", false),
        kind,
    })
}

fn load_cond(q: &mut Query, el: &Element, parent: Option<CondId>) -> Result<()> {
    if el.tag != "cond" {
        return Err(SqlGraphError::serialization(format!(
            "Unexpected <{}> inside <cond>",
            el.tag
        )));
    }
    let id: CondId = el.parsed("id")?;
    let code = el.required("kind")?;
    let kind = CondKind::from_code(code)
        .ok_or_else(|| SqlGraphError::serialization(format!("Unknown condition kind '{}'", code)))?;
    q.bump_serial(id.serial());

    let mut cond = Condition::new(id, kind);
    cond.parent = parent;
    if let CondBody::Leaf { operands, .. } = &mut cond.body {
        for (i, slot) in operands.iter_mut().enumerate() {
            *slot = get_ref(el, &format!("op{}", i), RefKind::Field, LossPolicy::DestroyOwner)?;
        }
    }
    let mut children = Vec::new();
    for child in &el.children {
        load_cond(q, child, Some(id))?;
        children.push(child.parsed("id")?);
    }
    if let CondBody::Node { children: slot, .. } = &mut cond.body {
        *slot = children;
    }
    q.conds.insert(id, cond);
    Ok(())
}
