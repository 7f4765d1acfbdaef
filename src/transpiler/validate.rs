//! Well-formedness checks run before rendering.

use crate::ast::{Query, QueryKind, RefKind};
use crate::error::{Result, SqlGraphError};
use crate::params::ParamContext;

/// Check `query` and everything it owns. Read-only.
pub fn check(query: &Query, params: &ParamContext) -> Result<()> {
    check_structure(query)?;
    params.check(&query.parameters())?;
    Ok(())
}

fn check_structure(q: &Query) -> Result<()> {
    match q.kind() {
        QueryKind::Select => {
            for target in q.targets() {
                if let Some(sub) = target.sub_query() {
                    let sub = q
                        .sub_query(sub)
                        .ok_or_else(|| SqlGraphError::not_active(format!("sub-query {}", sub)))?;
                    require_select(sub)?;
                    check_structure(sub)?;
                }
            }
        }
        QueryKind::Insert | QueryKind::Update | QueryKind::Delete => {
            if q.targets().len() != 1 {
                return Err(SqlGraphError::structure(format!(
                    "{} needs exactly one target, found {}",
                    q.kind().name(),
                    q.targets().len()
                )));
            }
            if q.kind() == QueryKind::Delete && q.visible_fields().next().is_some() {
                return Err(SqlGraphError::render("Delete queries can't have visible fields"));
            }
            if q.kind() == QueryKind::Insert {
                match q.sub_queries() {
                    [] => {}
                    [sub] => {
                        require_select(sub)?;
                        check_structure(sub)?;
                        let cols = q.visible_fields().count();
                        let produced = sub.visible_fields().count();
                        if cols != 0 && cols != produced {
                            return Err(SqlGraphError::render(format!(
                                "Insert: {} columns but the sub-query returns {} fields",
                                cols, produced
                            )));
                        }
                    }
                    _ => {
                        return Err(SqlGraphError::render(
                            "Insert can use at most one sub-query",
                        ));
                    }
                }
            }
        }
        QueryKind::Union | QueryKind::Intersect | QueryKind::Except => {
            let subs = q.sub_queries();
            if subs.len() < 2 {
                return Err(SqlGraphError::render(format!(
                    "{} needs at least 2 sub-queries, found {}",
                    q.kind().name(),
                    subs.len()
                )));
            }
            if q.kind() == QueryKind::Except && subs.len() != 2 {
                return Err(SqlGraphError::render(format!(
                    "EXCEPT needs exactly 2 sub-queries, found {}",
                    subs.len()
                )));
            }
            let width = subs[0].visible_fields().count();
            for sub in subs {
                require_select(sub)?;
                check_structure(sub)?;
                if sub.visible_fields().count() != width {
                    return Err(SqlGraphError::render(format!(
                        "{}: sub-queries return different numbers of fields",
                        q.kind().name()
                    )));
                }
            }
        }
        QueryKind::RawText => return Ok(()),
    }
    check_refs(q)
}

fn require_select(sub: &Query) -> Result<()> {
    if sub.kind() == QueryKind::Select || sub.kind().is_compound() {
        Ok(())
    } else {
        Err(SqlGraphError::render(format!(
            "Sub-query {} is a {}, not a SELECT",
            sub.id(),
            sub.kind().name()
        )))
    }
}

/// References between nodes of the graph must resolve. Catalog references
/// may stay unresolved; their lookup key is rendered instead.
fn check_refs(q: &Query) -> Result<()> {
    let mut missing = None;
    q.for_each_ref(|owner, r| {
        let internal = matches!(r.kind(), RefKind::Target | RefKind::Query)
            || (r.kind() == RefKind::Field && r.helper().is_none());
        if internal && !r.is_active() && missing.is_none() {
            missing = Some(format!("{} '{}' of {:?}", r.kind().name(), r.key(), owner));
        }
    });
    match missing {
        Some(what) => Err(SqlGraphError::not_active(what)),
        None => Ok(()),
    }
}
