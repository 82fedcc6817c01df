//! Context mutation actions.
//!
//! An action bag is an object of mutation operators applied in document
//! order:
//!
//! ```json
//! {"$inc": ["Gold", 5], "$push": ["Log", "looted"], "$set": ["Mood", "happy"]}
//! ```
//!
//! Later operators see the effects of earlier ones. Arrays are cloned before
//! they are edited and written back whole, so a value read before the call
//! never changes underneath its holder. Malformed operands skip the operator
//! and log a `validation` entry.

use crate::condition::{join, Condition, OPERATORS};
use crate::error::CoreError;
use crate::evaluator::{evaluate, EvalOptions};
use crate::logger::{EvalLogger, LogCategory};
use crate::resolver::{Scope, VariableResolver};
use crate::timer::TimerRegistry;
use crate::value::{as_number, describe, number_value, values_equal};
use serde_json::Value;

/// Mutation operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOp {
    Inc,
    Dec,
    Mul,
    Set,
    Push,
    PushUnique,
    Remove,
    Reset,
}

impl ActionOp {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "$inc" => Some(ActionOp::Inc),
            "$dec" => Some(ActionOp::Dec),
            "$mul" => Some(ActionOp::Mul),
            "$set" => Some(ActionOp::Set),
            "$push" => Some(ActionOp::Push),
            "$pushunique" => Some(ActionOp::PushUnique),
            "$remove" => Some(ActionOp::Remove),
            "$reset" => Some(ActionOp::Reset),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            ActionOp::Inc => "$inc",
            ActionOp::Dec => "$dec",
            ActionOp::Mul => "$mul",
            ActionOp::Set => "$set",
            ActionOp::Push => "$push",
            ActionOp::PushUnique => "$pushunique",
            ActionOp::Remove => "$remove",
            ActionOp::Reset => "$reset",
        }
    }
}

/// One operator with its raw operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub op: ActionOp,
    pub operand: Value,
}

/// Ordered operators from one action object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionBag {
    actions: Vec<Action>,
}

impl ActionBag {
    /// Decodes one action object. Unknown keys are dropped.
    pub fn decode(value: &Value) -> Self {
        let Value::Object(map) = value else {
            tracing::warn!("ignoring action bag that is not an object: {}", value);
            return Self::default();
        };

        let actions = map
            .iter()
            .filter_map(|(key, operand)| match ActionOp::from_key(key) {
                Some(op) => Some(Action {
                    op,
                    operand: operand.clone(),
                }),
                None => {
                    tracing::debug!("ignoring unknown action key '{}'", key);
                    None
                }
            })
            .collect();

        Self { actions }
    }

    /// Decodes either a single action object or a list of them.
    pub fn decode_list(value: &Value) -> Vec<Self> {
        match value {
            Value::Array(bags) => bags.iter().map(Self::decode).collect(),
            other => vec![Self::decode(other)],
        }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Applies action bags to a context.
pub struct ActionExecutor<'a> {
    resolver: &'a dyn VariableResolver,
    logger: &'a dyn EvalLogger,
    constants: &'a Value,
    original: Option<&'a Value>,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(
        resolver: &'a dyn VariableResolver,
        logger: &'a dyn EvalLogger,
        constants: &'a Value,
    ) -> Self {
        Self {
            resolver,
            logger,
            constants,
            original: None,
        }
    }

    /// Sets the snapshot `$reset` restores values from.
    pub fn with_original(mut self, original: Option<&'a Value>) -> Self {
        self.original = original;
        self
    }

    /// Decodes and applies a JSON action bag or list of bags.
    pub fn apply_json(&self, actions: &Value, context: &mut Value) -> Result<(), CoreError> {
        self.apply_all(&ActionBag::decode_list(actions), context, "Actions")
    }

    /// Applies bags in order.
    pub fn apply_all(
        &self,
        bags: &[ActionBag],
        context: &mut Value,
        path: &str,
    ) -> Result<(), CoreError> {
        self.check_original(bags)?;
        for (i, bag) in bags.iter().enumerate() {
            self.apply(bag, context, &join(path, &i.to_string()))?;
        }
        Ok(())
    }

    /// Applies one bag, operator by operator.
    pub fn apply(&self, bag: &ActionBag, context: &mut Value, path: &str) -> Result<(), CoreError> {
        if context.is_null() {
            return Err(CoreError::MissingContext);
        }
        self.check_original(std::slice::from_ref(bag))?;

        for action in bag.actions() {
            let op_path = join(path, action.op.key());
            let operand = &action.operand;
            match action.op {
                ActionOp::Inc => self.add(operand, 1.0, context, &op_path),
                ActionOp::Dec => self.add(operand, -1.0, context, &op_path),
                ActionOp::Mul => self.mul(operand, context, &op_path),
                ActionOp::Set => self.set(operand, context, &op_path),
                ActionOp::Push => self.edit_array(operand, context, &op_path, ArrayEdit::Push),
                ActionOp::PushUnique => {
                    self.edit_array(operand, context, &op_path, ArrayEdit::PushUnique)
                }
                ActionOp::Remove => self.edit_array(operand, context, &op_path, ArrayEdit::Remove),
                ActionOp::Reset => self.reset(operand, context, &op_path)?,
            }
        }
        Ok(())
    }

    /// Fails before any mutation when a `$reset` has nothing to restore from.
    fn check_original(&self, bags: &[ActionBag]) -> Result<(), CoreError> {
        let resets = bags
            .iter()
            .flat_map(ActionBag::actions)
            .any(|action| action.op == ActionOp::Reset);
        if resets && self.original.is_none() {
            return Err(CoreError::MissingOriginalContext);
        }
        Ok(())
    }

    fn add(&self, operand: &Value, sign: f64, context: &mut Value, path: &str) {
        let (reference, amount) = match operand {
            Value::String(reference) => (reference.as_str(), Some(Value::from(1))),
            Value::Array(items) => match items.as_slice() {
                [Value::String(reference)] => (reference.as_str(), Some(Value::from(1))),
                [Value::String(reference), amount] => {
                    (reference.as_str(), self.value_of(amount, context, path))
                }
                _ => return self.skip(path, "expected ref or [ref, amount]"),
            },
            _ => return self.skip(path, "expected ref or [ref, amount]"),
        };

        let Some(current) = self.current(reference, context).as_ref().and_then(as_number) else {
            return self.skip(path, &format!("'{}' is not numeric", reference));
        };
        let Some(amount) = amount.as_ref().and_then(as_number) else {
            return self.skip(path, &format!("amount is not numeric: {}", describe(amount.as_ref())));
        };

        self.write(context, reference, number_value(current + sign * amount), path);
    }

    fn mul(&self, operand: &Value, context: &mut Value, path: &str) {
        let (a, b, target) = match operand.as_array().map(Vec::as_slice) {
            Some([a, b]) => (a, b, a),
            Some([a, b, target]) => (a, b, target),
            _ => return self.skip(path, "expected [a, b] or [a, b, target]"),
        };
        let Value::String(target) = target else {
            return self.skip(path, "product target is not a reference");
        };

        let left = self.value_of(a, context, path);
        let right = self.value_of(b, context, path);
        match (left.as_ref().and_then(as_number), right.as_ref().and_then(as_number)) {
            (Some(x), Some(y)) => self.write(context, target, number_value(x * y), path),
            _ => self.skip(
                path,
                &format!(
                    "operands are not numeric: {} * {}",
                    describe(left.as_ref()),
                    describe(right.as_ref())
                ),
            ),
        }
    }

    fn set(&self, operand: &Value, context: &mut Value, path: &str) {
        let Some([Value::String(reference), value]) = operand.as_array().map(Vec::as_slice) else {
            return self.skip(path, "expected [ref, value]");
        };

        let value = self.value_of(value, context, path).unwrap_or(Value::Null);
        self.write(context, reference, value, path);
    }

    fn edit_array(&self, operand: &Value, context: &mut Value, path: &str, edit: ArrayEdit) {
        let Some([Value::String(reference), value]) = operand.as_array().map(Vec::as_slice) else {
            return self.skip(path, "expected [ref, value]");
        };

        // The resolver hands back an owned copy; the original array is untouched.
        let mut items = match self.current(reference, context) {
            Some(Value::Array(items)) => items,
            other => {
                return self.skip(
                    path,
                    &format!("'{}' is not an array: {}", reference, describe(other.as_ref())),
                )
            }
        };
        let value = self.value_of(value, context, path).unwrap_or(Value::Null);

        match edit {
            ArrayEdit::Push => items.push(value),
            ArrayEdit::PushUnique => {
                if items.iter().any(|item| values_equal(item, &value)) {
                    self.log(LogCategory::Action, path, || {
                        format!("{} already present in '{}'", value, reference)
                    });
                    return;
                }
                items.push(value);
            }
            ArrayEdit::Remove => items.retain(|item| !values_equal(item, &value)),
        }

        self.write(context, reference, Value::Array(items), path);
    }

    fn reset(&self, operand: &Value, context: &mut Value, path: &str) -> Result<(), CoreError> {
        let original = self.original.ok_or(CoreError::MissingOriginalContext)?;

        let references: Vec<&str> = match operand {
            Value::String(reference) => vec![reference.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if references.is_empty() {
            self.skip(path, "expected ref or [ref, ...]");
            return Ok(());
        }

        let scope = Scope::new(original, self.constants);
        for reference in references {
            match self.resolver.resolve(reference, &scope, 0, true) {
                Some(value) => self.write(context, reference, value, path),
                None => self.skip(path, &format!("'{}' has no original value", reference)),
            }
        }
        Ok(())
    }

    /// Evaluates an operand expression against the current context.
    ///
    /// Objects without an operator key are record literals and pass through.
    fn value_of(&self, operand: &Value, context: &Value, path: &str) -> Option<Value> {
        if let Value::Object(map) = operand {
            if !map.keys().any(|k| OPERATORS.contains(&k.as_str())) {
                return Some(operand.clone());
            }
        }

        let condition = match Condition::decode_at(operand, path) {
            Ok(condition) => condition,
            Err(e) => {
                self.skip(path, &e.to_string());
                return None;
            }
        };

        let mut timers = TimerRegistry::new();
        let mut scope = Scope::new(context, self.constants);
        let mut opts = EvalOptions::new(self.resolver, self.logger, &mut timers).with_path(path);
        evaluate(&condition, &mut scope, &mut opts).ok().flatten()
    }

    /// Reads the current value of a mutation target.
    fn current(&self, reference: &str, context: &Value) -> Option<Value> {
        let scope = Scope::new(context, self.constants);
        self.resolver.resolve(reference, &scope, 0, true)
    }

    fn write(&self, context: &mut Value, reference: &str, value: Value, path: &str) {
        let rendered = if self.logger.enabled(LogCategory::Action) {
            Some(value.to_string())
        } else {
            None
        };

        if self.resolver.write_back(context, reference, value) {
            if let Some(rendered) = rendered {
                self.logger
                    .log(LogCategory::Action, path, &format!("{} = {}", reference, rendered));
            }
        } else {
            self.skip(path, &format!("cannot write '{}'", reference));
        }
    }

    fn skip(&self, path: &str, reason: &str) {
        self.log(LogCategory::Validation, path, || reason.to_string());
    }

    fn log(&self, category: LogCategory, path: &str, message: impl FnOnce() -> String) {
        if self.logger.enabled(category) {
            self.logger.log(category, path, &message());
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ArrayEdit {
    Push,
    PushUnique,
    Remove,
}
