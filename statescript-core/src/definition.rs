//! State machine definition types.
//!
//! Machines are authored as JSON (or YAML) with PascalCase keys:
//!
//! ```json
//! {
//!   "Context": {"Hp": 3, "Loot": []},
//!   "Constants": {"MaxHp": 3},
//!   "States": {
//!     "Idle": {
//!       "Hit": [
//!         {"Condition": {"$le": ["Hp", 1]}, "Transition": "Dead"},
//!         {"Actions": {"$dec": "Hp"}}
//!       ],
//!       "$timer": {"Condition": {"$after": 30}, "Transition": "Asleep"}
//!     },
//!     "Asleep": {"-": {"Transition": "Idle"}},
//!     "Dead": {}
//!   }
//! }
//! ```
//!
//! `"-"` handles any event the state does not list. `"$timer"` is the event a
//! caller dispatches on its clock tick.

use crate::action::ActionBag;
use crate::condition::{join, Condition};
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Event name matching any event a state does not list.
pub const FALLBACK_EVENT: &str = "-";

/// Event name of the caller-driven timer tick.
pub const TIMER_EVENT: &str = "$timer";

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Raw machine definition as authored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateMachineDefinitionRaw {
    /// Initial mutable session state.
    #[serde(default = "empty_object")]
    pub context: Value,

    /// Read-only values visible to conditions and actions.
    #[serde(default = "empty_object")]
    pub constants: Value,

    /// Preserved for the host; not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_listeners: Option<Value>,

    /// Preserved for the host; not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Value>,

    /// Initial state. Defaults to the first state listed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,

    /// State name -> event name -> handler or handler list.
    pub states: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EventHandlerRaw {
    #[serde(default)]
    condition: Option<Value>,
    #[serde(default)]
    actions: Option<Value>,
    #[serde(default)]
    transition: Option<String>,
}

/// A decoded event handler.
#[derive(Debug, Clone, PartialEq)]
pub struct EventHandler {
    /// Tree path of the handler, `States.<state>.<event>.<index>`.
    pub path: String,
    /// Gate; `None` always passes.
    pub condition: Option<Condition>,
    /// Bags applied in order when the gate passes.
    pub actions: Vec<ActionBag>,
    /// Next state; `None` stays.
    pub transition: Option<String>,
}

impl EventHandler {
    pub fn condition_path(&self) -> String {
        join(&self.path, "Condition")
    }

    pub fn actions_path(&self) -> String {
        join(&self.path, "Actions")
    }
}

/// Validated and indexed machine definition.
#[derive(Debug, Clone)]
pub struct StateMachineDefinition {
    /// State names in document order.
    states: Vec<String>,

    /// Initial state for new sessions.
    initial: String,

    /// Handlers indexed by (state, event).
    handlers: HashMap<(String, String), Vec<EventHandler>>,

    /// Original raw definition.
    pub raw: StateMachineDefinitionRaw,

    /// crc32c of the canonical JSON encoding.
    pub checksum: String,
}

impl StateMachineDefinition {
    /// Parses and validates a definition from JSON.
    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        let raw: StateMachineDefinitionRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(raw)
    }

    /// Parses and validates a definition from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, CoreError> {
        let raw: StateMachineDefinitionRaw = serde_json::from_str(text)?;
        Self::from_raw(raw)
    }

    /// Parses and validates a definition from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, CoreError> {
        let raw: StateMachineDefinitionRaw = serde_yaml::from_str(text)?;
        Self::from_raw(raw)
    }

    /// Validates and indexes a raw definition.
    pub fn from_raw(raw: StateMachineDefinitionRaw) -> Result<Self, CoreError> {
        if !raw.context.is_object() {
            return Err(invalid("Context must be an object".to_string()));
        }
        if !(raw.constants.is_object() || raw.constants.is_null()) {
            return Err(invalid("Constants must be an object".to_string()));
        }

        let states: Vec<String> = raw.states.keys().cloned().collect();
        if states.is_empty() {
            return Err(invalid("States must list at least one state".to_string()));
        }
        if states.iter().any(String::is_empty) {
            return Err(invalid("state names must be non-empty".to_string()));
        }

        let initial = match &raw.initial {
            Some(initial) if states.contains(initial) => initial.clone(),
            Some(initial) => {
                return Err(invalid(format!("initial state '{}' not in States", initial)))
            }
            None => states[0].clone(),
        };

        let mut handlers = HashMap::new();
        for (state, events) in &raw.states {
            let Value::Object(events) = events else {
                return Err(invalid(format!("state '{}' must map events to handlers", state)));
            };

            for (event, value) in events {
                if event.is_empty() {
                    return Err(invalid(format!("state '{}' has an empty event name", state)));
                }

                let event_path = join(&join("States", state), event);
                let list = decode_handlers(value, &event_path)?;

                for handler in &list {
                    if let Some(target) = &handler.transition {
                        if !states.contains(target) {
                            return Err(invalid(format!(
                                "transition target '{}' at {} not in States",
                                target, handler.path
                            )));
                        }
                    }
                }

                handlers.insert((state.clone(), event.clone()), list);
            }
        }

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            states,
            initial,
            handlers,
            raw,
            checksum,
        })
    }

    /// Looks up the handlers for an event in a state.
    ///
    /// Falls back to the `"-"` handlers when the state does not list the
    /// event. Returns the event key that matched.
    pub fn handlers<'a>(
        &'a self,
        state: &str,
        event: &'a str,
    ) -> Result<Option<(&'a str, &'a [EventHandler])>, CoreError> {
        if !self.has_state(state) {
            return Err(CoreError::UnknownState {
                state: state.to_string(),
            });
        }

        for key in [event, FALLBACK_EVENT] {
            if let Some(list) = self.handlers.get(&(state.to_string(), key.to_string())) {
                return Ok(Some((key, list.as_slice())));
            }
        }
        Ok(None)
    }

    /// Returns true if the given state exists.
    pub fn has_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    /// Returns the event names listed by a state, in document order.
    pub fn events_from(&self, state: &str) -> Vec<&str> {
        match self.raw.states.get(state) {
            Some(Value::Object(events)) => events.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn state_names(&self) -> &[String] {
        &self.states
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    /// Initial context, also the `$reset` snapshot.
    pub fn context(&self) -> &Value {
        &self.raw.context
    }

    pub fn constants(&self) -> &Value {
        &self.raw.constants
    }

    /// Returns true if any handler in the state is gated by `$after`.
    pub fn has_timers(&self, state: &str) -> bool {
        self.handlers
            .iter()
            .filter(|((s, _), _)| s == state)
            .flat_map(|(_, list)| list.iter())
            .any(|h| h.condition.as_ref().is_some_and(Condition::has_timer))
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(&self.raw)?)
    }
}

fn invalid(reason: String) -> CoreError {
    CoreError::InvalidDefinition { reason }
}

fn decode_handlers(value: &Value, event_path: &str) -> Result<Vec<EventHandler>, CoreError> {
    let items: Vec<&Value> = match value {
        Value::Object(_) => vec![value],
        Value::Array(items) => items.iter().collect(),
        _ => {
            return Err(invalid(format!(
                "{} must be a handler object or a list of handlers",
                event_path
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let path = join(event_path, &index.to_string());
            if !item.is_object() {
                return Err(invalid(format!("{} must be a handler object", path)));
            }

            let raw: EventHandlerRaw = serde_json::from_value(item.clone())?;
            let condition = raw
                .condition
                .as_ref()
                .map(|c| Condition::decode_at(c, &join(&path, "Condition")))
                .transpose()?;
            let actions = raw
                .actions
                .as_ref()
                .map(ActionBag::decode_list)
                .unwrap_or_default();

            Ok(EventHandler {
                path,
                condition,
                actions,
                transition: raw.transition,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "Context": {"Hp": 3},
            "Constants": {"MaxHp": 3},
            "ContextListeners": ["ui"],
            "States": {
                "Idle": {
                    "Hit": [
                        {"Condition": {"$le": ["Hp", 1]}, "Transition": "Dead"},
                        {"Actions": {"$dec": "Hp"}}
                    ],
                    "$timer": {"Condition": {"$after": 30}, "Transition": "Asleep"}
                },
                "Asleep": {"-": {"Transition": "Idle"}},
                "Dead": {}
            }
        })
    }

    #[test]
    fn test_parse_definition() {
        let def = StateMachineDefinition::from_json(&sample()).unwrap();

        assert_eq!(def.initial(), "Idle");
        assert_eq!(def.state_names().to_vec(), vec!["Idle", "Asleep", "Dead"]);
        assert_eq!(def.context(), &json!({"Hp": 3}));
        assert_eq!(def.raw.context_listeners, Some(json!(["ui"])));
        assert_eq!(def.events_from("Idle"), vec!["Hit", "$timer"]);
        assert!(def.events_from("Dead").is_empty());
        assert_eq!(def.checksum.len(), 8);
    }

    #[test]
    fn test_handler_lookup() {
        let def = StateMachineDefinition::from_json(&sample()).unwrap();

        let (event, handlers) = def.handlers("Idle", "Hit").unwrap().unwrap();
        assert_eq!(event, "Hit");
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].path, "States.Idle.Hit.0");
        assert_eq!(handlers[0].condition_path(), "States.Idle.Hit.0.Condition");
        assert_eq!(handlers[0].transition.as_deref(), Some("Dead"));
        assert!(handlers[1].condition.is_none());
        assert_eq!(handlers[1].actions.len(), 1);

        let (event, _) = def.handlers("Asleep", "Anything").unwrap().unwrap();
        assert_eq!(event, FALLBACK_EVENT);
        let (event, _) = def.handlers("Asleep", TIMER_EVENT).unwrap().unwrap();
        assert_eq!(event, FALLBACK_EVENT);

        assert!(def.handlers("Idle", "Poke").unwrap().is_none());

        // The matched key borrows from the caller's event name.
        let event = String::from("Hit");
        let (key, _) = def.handlers("Idle", &event).unwrap().unwrap();
        assert_eq!(key, "Hit");
        assert!(matches!(
            def.handlers("Lobby", "Hit"),
            Err(CoreError::UnknownState { .. })
        ));
    }

    #[test]
    fn test_explicit_initial() {
        let mut json = sample();
        json["Initial"] = json!("Asleep");
        let def = StateMachineDefinition::from_json(&json).unwrap();
        assert_eq!(def.initial(), "Asleep");

        json["Initial"] = json!("Lobby");
        assert!(StateMachineDefinition::from_json(&json).is_err());
    }

    #[test]
    fn test_invalid_transition_target() {
        let json = json!({
            "Context": {},
            "States": {"Idle": {"Go": {"Transition": "Nowhere"}}}
        });
        let err = StateMachineDefinition::from_json(&json).unwrap_err();
        assert!(matches!(err, CoreError::InvalidDefinition { .. }));
        assert!(err.to_string().contains("Nowhere"));
    }

    #[test]
    fn test_invalid_shapes() {
        let cases = [
            json!({"Context": {}, "States": {}}),
            json!({"Context": [], "States": {"A": {}}}),
            json!({"Context": {}, "States": {"A": 3}}),
            json!({"Context": {}, "States": {"A": {"Go": "B"}}}),
            json!({"Context": {}, "States": {"A": {"Go": [1]}}}),
            json!({"Context": {}, "States": {"": {}}}),
            json!({"Context": {}, "States": {"A": {"": {}}}}),
        ];
        for case in cases {
            assert!(
                StateMachineDefinition::from_json(&case).unwrap_err().is_definition_error(),
                "{} should be rejected",
                case
            );
        }
    }

    #[test]
    fn test_ambiguous_condition_rejected() {
        let json = json!({
            "Context": {},
            "States": {"A": {"Go": {"Condition": {"$and": [], "$or": []}}}}
        });
        match StateMachineDefinition::from_json(&json).unwrap_err() {
            CoreError::InvalidCondition { path, .. } => {
                assert_eq!(path, "States.A.Go.0.Condition")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_null_condition_is_omitted() {
        let json = json!({
            "Context": {},
            "States": {"A": {"Go": {"Condition": null, "Note": "ignored"}}}
        });
        let def = StateMachineDefinition::from_json(&json).unwrap();
        let (_, handlers) = def.handlers("A", "Go").unwrap().unwrap();
        assert!(handlers[0].condition.is_none());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
Context:
  Count: 0
States:
  Counting:
    Tick:
      Actions:
        $inc: Count
"#;
        let def = StateMachineDefinition::from_yaml(yaml).unwrap();
        assert_eq!(def.initial(), "Counting");
        assert_eq!(def.context(), &json!({"Count": 0}));
        assert!(!def.has_timers("Counting"));
    }

    #[test]
    fn test_has_timers() {
        let def = StateMachineDefinition::from_json(&sample()).unwrap();
        assert!(def.has_timers("Idle"));
        assert!(!def.has_timers("Asleep"));
    }

    #[test]
    fn test_checksum_is_stable() {
        let a = StateMachineDefinition::from_json(&sample()).unwrap();
        let b = StateMachineDefinition::from_json_str(&sample().to_string()).unwrap();
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.to_json().unwrap()["Constants"], json!({"MaxHp": 3}));
    }
}
