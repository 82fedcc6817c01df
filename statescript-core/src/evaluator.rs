//! Condition evaluation.
//!
//! Evaluation is a synchronous pre-order walk of a decoded [`Condition`].
//! Malformed operands never abort the walk: the offending node evaluates to
//! false (or undefined) and a `validation` entry is logged. Only missing
//! top-level inputs are reported as errors.

use crate::array::evaluate_array_op;
use crate::condition::{join, Comparison, Condition};
use crate::error::CoreError;
use crate::logger::{EvalLogger, LogCategory};
use crate::resolver::{Scope, VariableResolver};
use crate::timer::{evaluate_after, TimerRegistry};
use crate::value::{compare, describe, is_truthy, to_display_string, values_equal};
use serde_json::Value;
use std::cmp::Ordering;

/// Callback deciding whether a `$pushunique` condition succeeds.
pub type PushUniqueFn<'a> = &'a dyn Fn(&str, &Value) -> bool;

/// Everything an evaluation needs besides the node and its scope.
pub struct EvalOptions<'a> {
    /// Resolves string leaves.
    pub resolver: &'a dyn VariableResolver,
    /// Observability sink.
    pub logger: &'a dyn EvalLogger,
    /// Open `$after` windows, owned by the caller's session.
    pub timers: &'a mut TimerRegistry,
    /// Timestamp of the event being dispatched, in seconds.
    pub event_timestamp: Option<f64>,
    /// Consumer policy for the `$pushunique` condition.
    pub push_unique: Option<PushUniqueFn<'a>>,
    /// Number of enclosing array operators.
    pub loop_depth: usize,
    /// Tree path of the root node.
    pub path: String,
}

impl<'a> EvalOptions<'a> {
    pub fn new(
        resolver: &'a dyn VariableResolver,
        logger: &'a dyn EvalLogger,
        timers: &'a mut TimerRegistry,
    ) -> Self {
        Self {
            resolver,
            logger,
            timers,
            event_timestamp: None,
            push_unique: None,
            loop_depth: 0,
            path: String::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: Option<f64>) -> Self {
        self.event_timestamp = timestamp;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_push_unique(mut self, callback: Option<PushUniqueFn<'a>>) -> Self {
        self.push_unique = callback;
        self
    }

    pub(crate) fn log(&self, category: LogCategory, path: &str, message: impl FnOnce() -> String) {
        if self.logger.enabled(category) {
            self.logger.log(category, path, &message());
        }
    }

    fn resolve(&self, reference: &str, scope: &Scope<'_>) -> Option<Value> {
        self.resolver
            .resolve(reference, scope, self.loop_depth, false)
    }
}

/// Evaluates a decoded condition.
///
/// `Ok(None)` is an undefined result. Fails when the scope has no context.
pub fn evaluate(
    node: &Condition,
    scope: &mut Scope<'_>,
    opts: &mut EvalOptions<'_>,
) -> Result<Option<Value>, CoreError> {
    if scope.context.is_null() {
        return Err(CoreError::MissingContext);
    }

    let root = opts.path.clone();
    Ok(eval_node(node, scope, opts, &root))
}

/// Decodes and evaluates a JSON condition.
pub fn evaluate_json(
    node: Option<&Value>,
    scope: &mut Scope<'_>,
    opts: &mut EvalOptions<'_>,
) -> Result<Option<Value>, CoreError> {
    let node = node.ok_or(CoreError::MissingCondition)?;
    let condition = Condition::decode_at(node, &opts.path)?;
    evaluate(&condition, scope, opts)
}

pub(crate) fn eval_node(
    node: &Condition,
    scope: &mut Scope<'_>,
    opts: &mut EvalOptions<'_>,
    path: &str,
) -> Option<Value> {
    opts.log(LogCategory::Visit, path, || node.label().to_string());

    let result = match node {
        Condition::Literal(value) => Some(value.clone()),
        Condition::Reference(reference) => opts.resolve(reference, scope),
        Condition::Sequence(items) => Some(Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    eval_node(item, scope, opts, &join(path, &i.to_string()))
                        .unwrap_or(Value::Null)
                })
                .collect(),
        )),
        Condition::Eq(operands) => Some(Value::Bool(eval_eq(operands, scope, opts, path))),
        Condition::Not(inner) => {
            let value = eval_node(inner, scope, opts, &join(path, "$not"));
            Some(Value::Bool(!is_truthy(value.as_ref())))
        }
        Condition::And(operands) => {
            let op_path = join(path, "$and");
            Some(Value::Bool(operands.iter().enumerate().all(|(i, op)| {
                is_truthy(eval_node(op, scope, opts, &join(&op_path, &i.to_string())).as_ref())
            })))
        }
        Condition::Or(operands) => {
            let op_path = join(path, "$or");
            Some(Value::Bool(operands.iter().enumerate().any(|(i, op)| {
                is_truthy(eval_node(op, scope, opts, &join(&op_path, &i.to_string())).as_ref())
            })))
        }
        Condition::Compare(op, operands) => Some(Value::Bool(eval_compare(
            *op, operands, scope, opts, path,
        ))),
        Condition::Contains(operands) => {
            Some(Value::Bool(eval_contains(operands, scope, opts, path)))
        }
        Condition::Array(op, operands) => Some(Value::Bool(evaluate_array_op(
            *op, operands, scope, opts, path,
        ))),
        Condition::After(duration) => Some(Value::Bool(evaluate_after(duration, scope, opts, path))),
        Condition::PushUnique(operands) => eval_push_unique(operands, scope, opts, path),
        Condition::Unhandled(value) => {
            opts.log(LogCategory::Unhandled, path, || {
                format!("no operator in {}", value)
            });
            Some(Value::Bool(false))
        }
    };

    opts.log(LogCategory::Trace, path, || describe(result.as_ref()));
    result
}

fn eval_eq(
    operands: &[Condition],
    scope: &mut Scope<'_>,
    opts: &mut EvalOptions<'_>,
    path: &str,
) -> bool {
    let op_path = join(path, "$eq");

    if operands.iter().any(|op| matches!(op, Condition::Sequence(_))) {
        opts.log(LogCategory::Validation, &op_path, || {
            "sequences are not comparable".to_string()
        });
        return false;
    }

    let Some((first, rest)) = operands.split_first() else {
        return false;
    };

    let reference = eval_node(first, scope, opts, &join(&op_path, "0"));
    let Some(reference) = reference.filter(|v| !v.is_null()) else {
        return false;
    };

    rest.iter().enumerate().all(|(i, op)| {
        eval_node(op, scope, opts, &join(&op_path, &(i + 1).to_string()))
            .map(|v| values_equal(&reference, &v))
            .unwrap_or(false)
    })
}

fn eval_compare(
    op: Comparison,
    operands: &[Condition],
    scope: &mut Scope<'_>,
    opts: &mut EvalOptions<'_>,
    path: &str,
) -> bool {
    let op_path = join(path, op.key());
    if operands.len() != 2 {
        opts.log(LogCategory::Validation, &op_path, || {
            format!("expected 2 operands, got {}", operands.len())
        });
    }

    let left = operands
        .first()
        .and_then(|n| eval_node(n, scope, opts, &join(&op_path, "0")));
    let right = operands
        .get(1)
        .and_then(|n| eval_node(n, scope, opts, &join(&op_path, "1")));

    let ordering = compare(left.as_ref(), right.as_ref());
    match op {
        Comparison::Gt => ordering == Some(Ordering::Greater),
        Comparison::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        Comparison::Lt => ordering == Some(Ordering::Less),
        Comparison::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
    }
}

fn eval_contains(
    operands: &[Condition],
    scope: &mut Scope<'_>,
    opts: &mut EvalOptions<'_>,
    path: &str,
) -> bool {
    let op_path = join(path, "$contains");

    let haystack = operands
        .first()
        .and_then(|n| eval_node(n, scope, opts, &join(&op_path, "0")));
    let Some(Value::String(haystack)) = haystack else {
        opts.log(LogCategory::Validation, &op_path, || {
            format!("$contains needs a string, got {}", describe(haystack.as_ref()))
        });
        return false;
    };

    let needle = operands
        .get(1)
        .and_then(|n| eval_node(n, scope, opts, &join(&op_path, "1")));
    haystack.contains(&to_display_string(needle.as_ref()))
}

fn eval_push_unique(
    operands: &[Condition],
    scope: &mut Scope<'_>,
    opts: &mut EvalOptions<'_>,
    path: &str,
) -> Option<Value> {
    let op_path = join(path, "$pushunique");

    let Some(Condition::Reference(reference)) = operands.first() else {
        opts.log(LogCategory::Validation, &op_path, || {
            "$pushunique needs a reference as its first operand".to_string()
        });
        return Some(Value::Bool(false));
    };

    let value = operands
        .get(1)
        .and_then(|n| eval_node(n, scope, opts, &join(&op_path, "1")))
        .unwrap_or(Value::Null);

    let callback = opts.push_unique?;
    Some(Value::Bool(callback(reference, &value)))
}
