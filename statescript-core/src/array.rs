//! Array-quantified operators: `$inarray`, `$any`, `$all`.
//!
//! Operands are `[arrayRef, elementCondition]`. Each element is bound as the
//! current iterated element (one loop level deeper) while the condition runs.

use crate::condition::{join, ArrayOp, Condition};
use crate::evaluator::{eval_node, EvalOptions};
use crate::logger::LogCategory;
use crate::resolver::Scope;
use crate::value::{describe, is_truthy};
use serde_json::Value;

pub(crate) fn evaluate_array_op(
    op: ArrayOp,
    operands: &[Condition],
    scope: &mut Scope<'_>,
    opts: &mut EvalOptions<'_>,
    path: &str,
) -> bool {
    let op_path = join(path, op.key());

    let (Some(source), Some(condition)) = (operands.first(), operands.get(1)) else {
        opts.log(LogCategory::Validation, &op_path, || {
            format!("{} needs [array, condition]", op.key())
        });
        return false;
    };

    let items = match eval_node(source, scope, opts, &join(&op_path, "0")) {
        Some(Value::Array(items)) => items,
        other => {
            opts.log(LogCategory::Validation, &op_path, || {
                format!("{} source is not an array: {}", op.key(), describe(other.as_ref()))
            });
            return false;
        }
    };

    let condition_path = join(&op_path, "1");
    let enclosing = opts.loop_depth;
    opts.loop_depth = enclosing + 1;

    let mut matched = op == ArrayOp::All;
    for item in items {
        scope.push_item(item);
        let hit = is_truthy(eval_node(condition, scope, opts, &condition_path).as_ref());
        scope.pop_item();

        if hit != (op == ArrayOp::All) {
            matched = hit;
            break;
        }
    }

    opts.loop_depth = enclosing;
    matched
}
