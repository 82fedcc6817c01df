//! Evaluation logging.
//!
//! The evaluator reports what it visits and why nodes fail through an
//! [`EvalLogger`]. Each recursive node produces one `visit` entry before it is
//! evaluated and one `trace` entry carrying the result afterwards, in
//! pre-order, keyed by the node's dotted tree path.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Log entry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    /// A node is about to be evaluated.
    Visit,
    /// A node finished evaluating; the message is its value.
    Trace,
    /// Malformed operands that were recovered locally.
    Validation,
    /// Unrecognised operator objects.
    Unhandled,
    /// `$after` window bookkeeping.
    Timer,
    /// Applied context mutations.
    Action,
}

impl LogCategory {
    pub const ALL: [LogCategory; 6] = [
        LogCategory::Visit,
        LogCategory::Trace,
        LogCategory::Validation,
        LogCategory::Unhandled,
        LogCategory::Timer,
        LogCategory::Action,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Visit => "visit",
            LogCategory::Trace => "trace",
            LogCategory::Validation => "validation",
            LogCategory::Unhandled => "unhandled",
            LogCategory::Timer => "timer",
            LogCategory::Action => "action",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown log category: '{}'", s))
    }
}

/// Observability sink for evaluation.
pub trait EvalLogger {
    /// Records one entry.
    fn log(&self, category: LogCategory, path: &str, message: &str);

    /// Returns whether entries of this category are wanted at all.
    ///
    /// Callers skip building messages for disabled categories.
    fn enabled(&self, _category: LogCategory) -> bool {
        true
    }
}

impl<T: EvalLogger + ?Sized> EvalLogger for Rc<T> {
    fn log(&self, category: LogCategory, path: &str, message: &str) {
        (**self).log(category, path, message)
    }

    fn enabled(&self, category: LogCategory) -> bool {
        (**self).enabled(category)
    }
}

impl<T: EvalLogger + ?Sized> EvalLogger for &T {
    fn log(&self, category: LogCategory, path: &str, message: &str) {
        (**self).log(category, path, message)
    }

    fn enabled(&self, category: LogCategory) -> bool {
        (**self).enabled(category)
    }
}

/// Forwards entries to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl EvalLogger for TracingLogger {
    fn log(&self, category: LogCategory, path: &str, message: &str) {
        match category {
            LogCategory::Visit | LogCategory::Trace => {
                tracing::trace!(category = category.as_str(), path, "{}", message)
            }
            LogCategory::Timer | LogCategory::Action => {
                tracing::debug!(category = category.as_str(), path, "{}", message)
            }
            LogCategory::Validation | LogCategory::Unhandled => {
                tracing::warn!(category = category.as_str(), path, "{}", message)
            }
        }
    }

    fn enabled(&self, category: LogCategory) -> bool {
        match category {
            LogCategory::Visit | LogCategory::Trace => tracing::enabled!(tracing::Level::TRACE),
            LogCategory::Timer | LogCategory::Action => tracing::enabled!(tracing::Level::DEBUG),
            LogCategory::Validation | LogCategory::Unhandled => true,
        }
    }
}

/// A recorded log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub category: LogCategory,
    pub path: String,
    pub message: String,
}

/// Collects entries in memory.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: RefCell<Vec<LogEntry>>,
    categories: Option<Vec<LogCategory>>,
}

impl RecordingLogger {
    /// Records every category.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records only the given categories.
    pub fn with_categories(categories: impl IntoIterator<Item = LogCategory>) -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            categories: Some(categories.into_iter().collect()),
        }
    }

    /// Returns a copy of the recorded entries.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.borrow().clone()
    }

    /// Removes and returns the recorded entries.
    pub fn drain(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    /// Returns the recorded entries of one category.
    pub fn of(&self, category: LogCategory) -> Vec<LogEntry> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.category == category)
            .cloned()
            .collect()
    }
}

impl EvalLogger for RecordingLogger {
    fn log(&self, category: LogCategory, path: &str, message: &str) {
        if !self.enabled(category) {
            return;
        }
        self.entries.borrow_mut().push(LogEntry {
            category,
            path: path.to_string(),
            message: message.to_string(),
        });
    }

    fn enabled(&self, category: LogCategory) -> bool {
        self.categories
            .as_ref()
            .map(|c| c.contains(&category))
            .unwrap_or(true)
    }
}
