//! WHERE / ON condition rendering.

use super::Renderer;
use crate::ast::{CondBody, CondId, FieldId, LeafOp, NodeOp, Query, Slot};
use crate::error::{Result, SqlGraphError};
use crate::params::ParamValue;

impl LeafOp {
    /// Operator text between the left and right operand.
    pub fn sql(&self) -> &'static str {
        match self {
            LeafOp::Equal => " = ",
            LeafOp::Diff => " != ",
            LeafOp::Sup => " > ",
            LeafOp::SupEqual => " >= ",
            LeafOp::Inf => " < ",
            LeafOp::InfEqual => " <= ",
            LeafOp::Like => " LIKE ",
            LeafOp::Similar => " SIMILAR TO ",
            LeafOp::Regex => " ~ ",
            LeafOp::RegexNoCase => " ~* ",
            LeafOp::NotRegex => " !~ ",
            LeafOp::NotRegexNoCase => " !~* ",
            LeafOp::In => " IN ",
            LeafOp::Between => " BETWEEN ",
        }
    }
}

impl Renderer<'_> {
    pub(crate) fn condition(&mut self, q: &Query, id: CondId) -> Result<String> {
        let cond = q
            .condition(id)
            .ok_or_else(|| SqlGraphError::not_active(format!("condition {}", id)))?;
        match cond.body() {
            CondBody::Node { op, children } => {
                if children.is_empty() {
                    return Err(SqlGraphError::render(format!(
                        "Condition {} has no children",
                        id
                    )));
                }
                match op {
                    NodeOp::Not => Ok(format!("NOT ({})", self.condition(q, children[0])?)),
                    NodeOp::And | NodeOp::Or => {
                        let joiner = if *op == NodeOp::And { " AND " } else { " OR " };
                        let mut parts = Vec::with_capacity(children.len());
                        for child in children {
                            let sql = self.condition(q, *child)?;
                            let nested_or = *op == NodeOp::And
                                && matches!(
                                    q.condition(*child).map(|c| c.body()),
                                    Some(CondBody::Node { op: NodeOp::Or, children }) if children.len() > 1
                                );
                            parts.push(if nested_or { format!("({})", sql) } else { sql });
                        }
                        Ok(parts.join(joiner))
                    }
                }
            }
            CondBody::Leaf { op, .. } => self.leaf(q, id, *op),
        }
    }

    fn leaf(&mut self, q: &Query, id: CondId, op: LeafOp) -> Result<String> {
        let operand = |slot: Slot| {
            q.operand(id, slot).ok_or_else(|| {
                SqlGraphError::not_active(format!("operand {} of condition {}", slot as usize, id))
            })
        };
        let left = self.field(q, operand(Slot::Left)?)?;
        let right_id = operand(Slot::Right)?;
        let right_is_null = self.is_null_value(q, right_id)?;
        match op {
            LeafOp::Equal if right_is_null => Ok(format!("{} IS NULL", left)),
            LeafOp::Diff if right_is_null => Ok(format!("{} IS NOT NULL", left)),
            LeafOp::Between => {
                let low = self.field(q, right_id)?;
                let high = self.field(q, operand(Slot::Right2)?)?;
                Ok(format!("{} BETWEEN {} AND {}", left, low, high))
            }
            LeafOp::In => {
                let right = self.field(q, right_id)?;
                let right = if right.starts_with('(') {
                    right
                } else {
                    format!("({})", right)
                };
                Ok(format!("{}{}{}", left, op.sql(), right))
            }
            _ => Ok(format!("{}{}{}", left, op.sql(), self.field(q, right_id)?)),
        }
    }

    /// Whether `field` stands for SQL NULL: a NULL literal, or a parameter
    /// whose context value is NULL.
    fn is_null_value(&self, q: &Query, field: FieldId) -> Result<bool> {
        let Some(lit) = q.field(field).and_then(|f| f.literal()) else {
            return Ok(false);
        };
        if !lit.is_parameter {
            return Ok(lit.holds_null());
        }
        let Some(param) = q.field_parameters(field).into_iter().next() else {
            return Ok(false);
        };
        Ok(matches!(self.params.resolve(&param)?, ParamValue::Value(v) if v.is_null()))
    }
}
