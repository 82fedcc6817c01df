//! Event dispatch - ties definitions, conditions, actions and timers together.

use crate::action::{ActionBag, ActionExecutor};
use crate::condition::Condition;
use crate::definition::StateMachineDefinition;
use crate::error::CoreError;
use crate::evaluator::{evaluate, EvalOptions};
use crate::logger::{EvalLogger, TracingLogger};
use crate::resolver::{PathResolver, Scope, VariableResolver};
use crate::timer::TimerRegistry;
use crate::value::is_truthy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Consumer policy for the `$pushunique` condition.
pub type PushUniqueCallback = Box<dyn Fn(&str, &Value) -> bool>;

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    /// State after the dispatch.
    pub state: String,
    /// Context after the dispatch.
    pub context: Value,
    /// Index of the handler that fired, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<usize>,
    /// Event key the handler was found under (the event or `"-"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Whether the fired handler carried a transition.
    pub transitioned: bool,
}

impl DispatchOutcome {
    fn unchanged(state: &str, context: Value) -> Self {
        Self {
            state: state.to_string(),
            context,
            handler: None,
            event: None,
            transitioned: false,
        }
    }

    /// Returns true if some handler fired.
    pub fn matched(&self) -> bool {
        self.handler.is_some()
    }
}

/// The interpreter: collaborators plus dispatch.
pub struct Interpreter {
    resolver: Box<dyn VariableResolver>,
    logger: Box<dyn EvalLogger>,
    push_unique: Option<PushUniqueCallback>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Creates an interpreter with the path resolver and tracing logger.
    pub fn new() -> Self {
        Self {
            resolver: Box::new(PathResolver::default()),
            logger: Box::new(TracingLogger),
            push_unique: None,
        }
    }

    pub fn with_resolver(mut self, resolver: impl VariableResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn with_logger(mut self, logger: impl EvalLogger + 'static) -> Self {
        self.logger = Box::new(logger);
        self
    }

    pub fn with_push_unique(mut self, callback: impl Fn(&str, &Value) -> bool + 'static) -> Self {
        self.push_unique = Some(Box::new(callback));
        self
    }

    pub fn resolver(&self) -> &dyn VariableResolver {
        self.resolver.as_ref()
    }

    pub fn logger(&self) -> &dyn EvalLogger {
        self.logger.as_ref()
    }

    /// Evaluates a condition against a context.
    pub fn evaluate(
        &self,
        condition: &Condition,
        context: &Value,
        constants: &Value,
        timers: &mut TimerRegistry,
        timestamp: Option<f64>,
        path: &str,
    ) -> Result<Option<Value>, CoreError> {
        let mut scope = Scope::new(context, constants);
        let mut opts = EvalOptions::new(self.resolver(), self.logger(), timers)
            .with_timestamp(timestamp)
            .with_path(path)
            .with_push_unique(self.push_unique.as_deref());
        evaluate(condition, &mut scope, &mut opts)
    }

    /// Applies action bags to a context.
    ///
    /// `original` is the snapshot `$reset` copies from.
    pub fn apply_actions(
        &self,
        bags: &[ActionBag],
        context: &mut Value,
        constants: &Value,
        original: Option<&Value>,
        path: &str,
    ) -> Result<(), CoreError> {
        ActionExecutor::new(self.resolver(), self.logger(), constants)
            .with_original(original)
            .apply_all(bags, context, path)
    }

    /// Dispatches an event.
    ///
    /// The first handler whose condition passes applies its actions and
    /// transition; later handlers are not evaluated. With no match the state
    /// and context come back unchanged.
    pub fn dispatch(
        &self,
        definition: &StateMachineDefinition,
        state: &str,
        event: &str,
        mut context: Value,
        timers: &mut TimerRegistry,
        timestamp: Option<f64>,
    ) -> Result<DispatchOutcome, CoreError> {
        if context.is_null() {
            return Err(CoreError::MissingContext);
        }

        let Some((matched_event, handlers)) = definition.handlers(state, event)? else {
            tracing::debug!("no handlers for '{}' in state '{}'", event, state);
            return Ok(DispatchOutcome::unchanged(state, context));
        };

        for (index, handler) in handlers.iter().enumerate() {
            let passed = match &handler.condition {
                Some(condition) => {
                    let value = self.evaluate(
                        condition,
                        &context,
                        definition.constants(),
                        timers,
                        timestamp,
                        &handler.condition_path(),
                    )?;
                    is_truthy(value.as_ref())
                }
                None => true,
            };
            if !passed {
                continue;
            }

            self.apply_actions(
                &handler.actions,
                &mut context,
                definition.constants(),
                Some(definition.context()),
                &handler.actions_path(),
            )?;

            let next = handler.transition.as_deref().unwrap_or(state);
            tracing::info!(
                "'{}' in '{}' fired {} -> '{}'",
                event,
                state,
                handler.path,
                next
            );

            return Ok(DispatchOutcome {
                state: next.to_string(),
                context,
                handler: Some(index),
                event: Some(matched_event.to_string()),
                transitioned: handler.transition.is_some(),
            });
        }

        tracing::debug!("no handler passed for '{}' in state '{}'", event, state);
        Ok(DispatchOutcome::unchanged(state, context))
    }
}
