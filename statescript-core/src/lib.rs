//! # statescript-core
//!
//! Interpreter for the statescript state machine language.
//!
//! This crate provides:
//! - Machine definition parsing and validation
//! - Condition tree decoding and evaluation
//! - Action execution against a session context
//! - Event dispatch, including `$after` timer windows
//! - Session state that callers persist between dispatches

pub mod action;
mod array;
pub mod condition;
pub mod definition;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod logger;
pub mod resolver;
pub mod session;
pub mod timer;
pub mod value;

pub use action::{Action, ActionBag, ActionExecutor, ActionOp};
pub use condition::{ArrayOp, Comparison, Condition};
pub use definition::{EventHandler, StateMachineDefinition, FALLBACK_EVENT, TIMER_EVENT};
pub use dispatcher::{DispatchOutcome, Interpreter, PushUniqueCallback};
pub use error::CoreError;
pub use evaluator::{evaluate, evaluate_json, EvalOptions};
pub use logger::{EvalLogger, LogCategory, LogEntry, RecordingLogger, TracingLogger};
pub use resolver::{PathResolver, ResolverOptions, Scope, VariableResolver};
pub use session::Session;
pub use timer::{TimerEntry, TimerRegistry};
