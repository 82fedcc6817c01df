//! Condition trees.
//!
//! Conditions are authored as JSON:
//!
//! ```json
//! {"$and": [
//!   {"$gt": ["Player.hp", 0]},
//!   {"$any": ["Inventory", {"$eq": ["@.kind", "key"]}]},
//!   {"$after": 5}
//! ]}
//! ```
//!
//! Each JSON node is decoded once into a [`Condition`]. Scalars stay
//! literals, strings become references, arrays become sequences, and objects
//! must carry exactly one operator key. Objects with no operator key are kept
//! as [`Condition::Unhandled`] and evaluate to false; objects with more than
//! one are rejected as ambiguous.

use crate::error::CoreError;
use serde_json::Value;

/// Recognised condition operator keys.
pub const OPERATORS: [&str; 14] = [
    "$eq",
    "$not",
    "$and",
    "$or",
    "$gt",
    "$ge",
    "$lt",
    "$le",
    "$inarray",
    "$any",
    "$all",
    "$after",
    "$pushunique",
    "$contains",
];

/// Binary ordering operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    pub fn key(&self) -> &'static str {
        match self {
            Comparison::Gt => "$gt",
            Comparison::Ge => "$ge",
            Comparison::Lt => "$lt",
            Comparison::Le => "$le",
        }
    }
}

/// Array-quantified operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOp {
    /// Some element satisfies the condition.
    InArray,
    /// Some element satisfies the condition.
    Any,
    /// Every element satisfies the condition.
    All,
}

impl ArrayOp {
    pub fn key(&self) -> &'static str {
        match self {
            ArrayOp::InArray => "$inarray",
            ArrayOp::Any => "$any",
            ArrayOp::All => "$all",
        }
    }
}

/// A decoded condition node.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Number, boolean or null.
    Literal(Value),
    /// String resolved through the variable resolver.
    Reference(String),
    /// Array of sub-expressions.
    Sequence(Vec<Condition>),
    Eq(Vec<Condition>),
    Not(Box<Condition>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Compare(Comparison, Vec<Condition>),
    Contains(Vec<Condition>),
    Array(ArrayOp, Vec<Condition>),
    /// Duration in seconds.
    After(Box<Condition>),
    PushUnique(Vec<Condition>),
    /// Object without a recognised operator key.
    Unhandled(Value),
}

impl Condition {
    /// Decodes a JSON condition tree.
    pub fn decode(value: &Value) -> Result<Self, CoreError> {
        Self::decode_at(value, "")
    }

    /// Decodes a JSON condition tree rooted at `path` (used in error messages).
    pub fn decode_at(value: &Value, path: &str) -> Result<Self, CoreError> {
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) => Ok(Condition::Literal(value.clone())),
            Value::String(s) => Ok(Condition::Reference(s.clone())),
            Value::Array(items) => Ok(Condition::Sequence(decode_items(items, path)?)),
            Value::Object(map) => {
                let keys: Vec<&str> = map
                    .keys()
                    .map(String::as_str)
                    .filter(|k| OPERATORS.contains(k))
                    .collect();

                let key = match keys.as_slice() {
                    [] => return Ok(Condition::Unhandled(value.clone())),
                    [key] => *key,
                    _ => {
                        return Err(CoreError::InvalidCondition {
                            path: path.to_string(),
                            reason: format!("ambiguous node with operators {}", keys.join(", ")),
                        })
                    }
                };

                let operand = &map[key];
                let op_path = join(path, key);
                let list = || decode_operands(operand, &op_path);
                let single = || Self::decode_at(operand, &op_path).map(Box::new);

                Ok(match key {
                    "$eq" => Condition::Eq(list()?),
                    "$not" => Condition::Not(single()?),
                    "$and" => Condition::And(list()?),
                    "$or" => Condition::Or(list()?),
                    "$gt" => Condition::Compare(Comparison::Gt, list()?),
                    "$ge" => Condition::Compare(Comparison::Ge, list()?),
                    "$lt" => Condition::Compare(Comparison::Lt, list()?),
                    "$le" => Condition::Compare(Comparison::Le, list()?),
                    "$contains" => Condition::Contains(list()?),
                    "$inarray" => Condition::Array(ArrayOp::InArray, list()?),
                    "$any" => Condition::Array(ArrayOp::Any, list()?),
                    "$all" => Condition::Array(ArrayOp::All, list()?),
                    "$after" => Condition::After(single()?),
                    "$pushunique" => Condition::PushUnique(list()?),
                    _ => unreachable!("operator list and decoder out of sync"),
                })
            }
        }
    }

    /// Returns the operator key, if this is an operator node.
    pub fn operator(&self) -> Option<&'static str> {
        match self {
            Condition::Eq(_) => Some("$eq"),
            Condition::Not(_) => Some("$not"),
            Condition::And(_) => Some("$and"),
            Condition::Or(_) => Some("$or"),
            Condition::Compare(op, _) => Some(op.key()),
            Condition::Contains(_) => Some("$contains"),
            Condition::Array(op, _) => Some(op.key()),
            Condition::After(_) => Some("$after"),
            Condition::PushUnique(_) => Some("$pushunique"),
            Condition::Literal(_)
            | Condition::Reference(_)
            | Condition::Sequence(_)
            | Condition::Unhandled(_) => None,
        }
    }

    /// Short description used in visit log entries.
    pub fn label(&self) -> &'static str {
        match self {
            Condition::Literal(_) => "literal",
            Condition::Reference(_) => "reference",
            Condition::Sequence(_) => "sequence",
            Condition::Unhandled(_) => "unhandled",
            _ => self.operator().unwrap_or("operator"),
        }
    }

    /// Returns true if the tree contains an `$after` gate anywhere.
    pub fn has_timer(&self) -> bool {
        match self {
            Condition::After(_) => true,
            Condition::Not(inner) => inner.has_timer(),
            Condition::Sequence(items)
            | Condition::Eq(items)
            | Condition::And(items)
            | Condition::Or(items)
            | Condition::Compare(_, items)
            | Condition::Contains(items)
            | Condition::Array(_, items)
            | Condition::PushUnique(items) => items.iter().any(Condition::has_timer),
            Condition::Literal(_) | Condition::Reference(_) | Condition::Unhandled(_) => false,
        }
    }
}

/// Operator operands are normally an array; a lone value counts as one operand.
fn decode_operands(operand: &Value, path: &str) -> Result<Vec<Condition>, CoreError> {
    match operand {
        Value::Array(items) => decode_items(items, path),
        other => Ok(vec![Condition::decode_at(other, &join(path, "0"))?]),
    }
}

fn decode_items(items: &[Value], path: &str) -> Result<Vec<Condition>, CoreError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| Condition::decode_at(item, &join(path, &i.to_string())))
        .collect()
}

/// Extends a dotted tree path with one label.
pub fn join(parent: &str, label: &str) -> String {
    if parent.is_empty() {
        label.to_string()
    } else {
        format!("{}.{}", parent, label)
    }
}
