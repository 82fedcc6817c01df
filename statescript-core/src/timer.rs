//! `$after` timer windows.
//!
//! A window is keyed by the tree path of its `$after` node. The first
//! evaluation with an event timestamp opens it; the first evaluation at or
//! past its end fires it once and removes it, so re-entering the state later
//! opens a fresh window. The registry belongs to the caller's session and
//! must be kept between dispatches.

use crate::condition::{join, Condition};
use crate::evaluator::{eval_node, EvalOptions};
use crate::logger::LogCategory;
use crate::resolver::Scope;
use crate::value::to_number;
use serde::{Deserialize, Serialize};

/// An open `$after` window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerEntry {
    /// Tree path of the `$after` node.
    pub path: String,
    /// Event timestamp that opened the window (seconds).
    pub start_time: f64,
    /// Timestamp at which the gate fires (seconds).
    pub end_time: f64,
}

impl TimerEntry {
    pub fn new(path: impl Into<String>, start_time: f64, end_time: f64) -> Self {
        Self {
            path: path.into(),
            start_time,
            end_time,
        }
    }

    /// Returns whether the window has elapsed at `now`.
    pub fn is_elapsed(&self, now: f64) -> bool {
        now >= self.end_time
    }

    /// Seconds left before the window elapses, never negative.
    pub fn remaining(&self, now: f64) -> f64 {
        (self.end_time - now).max(0.0)
    }
}

/// Ordered list of open windows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerRegistry {
    entries: Vec<TimerEntry>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TimerEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimerEntry> {
        self.entries.iter()
    }

    /// Looks up the window for a node path.
    pub fn get(&self, path: &str) -> Option<&TimerEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Appends a window.
    pub fn insert(&mut self, entry: TimerEntry) {
        self.entries.push(entry);
    }

    /// Removes the window for a node path.
    pub fn remove(&mut self, path: &str) -> Option<TimerEntry> {
        let index = self.entries.iter().position(|e| e.path == path)?;
        Some(self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Earliest end time among open windows.
    pub fn next_deadline(&self) -> Option<f64> {
        self.entries
            .iter()
            .map(|e| e.end_time)
            .fold(None, |acc, t| Some(acc.map_or(t, |a: f64| a.min(t))))
    }
}

impl<'a> IntoIterator for &'a TimerRegistry {
    type Item = &'a TimerEntry;
    type IntoIter = std::slice::Iter<'a, TimerEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Evaluates an `$after` gate at `path`.
pub(crate) fn evaluate_after(
    duration: &Condition,
    scope: &mut Scope<'_>,
    opts: &mut EvalOptions<'_>,
    path: &str,
) -> bool {
    let Some(now) = opts.event_timestamp else {
        opts.log(LogCategory::Validation, path, || {
            "$after needs an event timestamp".to_string()
        });
        return false;
    };

    if opts.timers.get(path).is_none() {
        let value = eval_node(duration, scope, opts, &join(path, "$after"));
        let seconds = match &value {
            Some(v) => to_number(Some(v)),
            None => f64::NAN,
        };
        if !seconds.is_finite() {
            opts.log(LogCategory::Validation, path, || {
                format!("$after duration is not a number: {:?}", value)
            });
            return false;
        }

        opts.timers.insert(TimerEntry::new(path, now, now + seconds));
        opts.log(LogCategory::Timer, path, || {
            format!("window opened at {} for {}s", now, seconds)
        });
    }

    let elapsed = opts
        .timers
        .get(path)
        .map(|e| e.is_elapsed(now))
        .unwrap_or(false);

    if elapsed {
        opts.timers.remove(path);
        opts.log(LogCategory::Timer, path, || format!("window fired at {}", now));
        true
    } else {
        opts.log(LogCategory::Timer, path, || format!("window pending at {}", now));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_insert_remove() {
        let mut timers = TimerRegistry::new();
        timers.insert(TimerEntry::new("a", 0.0, 5.0));
        timers.insert(TimerEntry::new("b", 1.0, 3.0));

        assert_eq!(timers.len(), 2);
        assert_eq!(timers.get("b").unwrap().end_time, 3.0);
        assert_eq!(timers.next_deadline(), Some(3.0));

        let removed = timers.remove("a").unwrap();
        assert_eq!(removed.start_time, 0.0);
        assert!(timers.remove("a").is_none());
        assert_eq!(timers.entries()[0].path, "b");
    }

    #[test]
    fn test_entry_timing() {
        let entry = TimerEntry::new("p", 100.0, 110.0);
        assert!(!entry.is_elapsed(109.9));
        assert!(entry.is_elapsed(110.0));
        assert_eq!(entry.remaining(104.0), 6.0);
        assert_eq!(entry.remaining(200.0), 0.0);
    }

    #[test]
    fn test_serialized_layout() {
        let mut timers = TimerRegistry::new();
        timers.insert(TimerEntry::new("p", 100.0, 110.0));
        let json = serde_json::to_value(&timers).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"path": "p", "startTime": 100.0, "endTime": 110.0}])
        );
    }
}
