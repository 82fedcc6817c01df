//! One running machine: current state, context and open timer windows.

use crate::definition::{StateMachineDefinition, TIMER_EVENT};
use crate::dispatcher::{DispatchOutcome, Interpreter};
use crate::error::CoreError;
use crate::timer::TimerRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session state a caller persists between dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub state: String,
    pub context: Value,
    #[serde(default)]
    pub timers: TimerRegistry,
}

impl Session {
    /// Starts a session at the definition's initial state and context.
    pub fn new(definition: &StateMachineDefinition) -> Self {
        Self {
            state: definition.initial().to_string(),
            context: definition.context().clone(),
            timers: TimerRegistry::new(),
        }
    }

    /// Dispatches an event and commits the outcome.
    ///
    /// On error the session is left as it was.
    pub fn dispatch(
        &mut self,
        interpreter: &Interpreter,
        definition: &StateMachineDefinition,
        event: &str,
        timestamp: Option<f64>,
    ) -> Result<DispatchOutcome, CoreError> {
        let mut timers = self.timers.clone();
        let outcome = interpreter.dispatch(
            definition,
            &self.state,
            event,
            self.context.clone(),
            &mut timers,
            timestamp,
        )?;

        self.state = outcome.state.clone();
        self.context = outcome.context.clone();
        self.timers = timers;
        Ok(outcome)
    }

    /// Dispatches the timer tick event.
    pub fn tick(
        &mut self,
        interpreter: &Interpreter,
        definition: &StateMachineDefinition,
        timestamp: f64,
    ) -> Result<DispatchOutcome, CoreError> {
        self.dispatch(interpreter, definition, TIMER_EVENT, Some(timestamp))
    }

    /// Returns to the initial state and context, dropping all windows.
    pub fn reset(&mut self, definition: &StateMachineDefinition) {
        *self = Self::new(definition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn machine() -> StateMachineDefinition {
        StateMachineDefinition::from_json(&json!({
            "Context": {"Count": 0},
            "States": {
                "Waiting": {
                    "Bump": {"Actions": {"$inc": "Count"}},
                    "$timer": [
                        {"Condition": {"$and": [{"$ge": ["Count", 2]}, {"$after": 5}]}, "Transition": "Done"}
                    ]
                },
                "Done": {"Reset": {"Actions": {"$reset": "Count"}, "Transition": "Waiting"}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_session_flow() {
        let interp = Interpreter::new();
        let def = machine();
        let mut session = Session::new(&def);
        assert_eq!(session.state, "Waiting");

        session.dispatch(&interp, &def, "Bump", None).unwrap();
        session.tick(&interp, &def, 0.0).unwrap();
        // $and short-circuits before the gate while Count < 2.
        assert!(session.timers.is_empty());

        session.dispatch(&interp, &def, "Bump", None).unwrap();
        session.tick(&interp, &def, 10.0).unwrap();
        assert_eq!(session.timers.len(), 1);
        assert_eq!(session.state, "Waiting");

        let out = session.tick(&interp, &def, 15.0).unwrap();
        assert!(out.transitioned);
        assert_eq!(session.state, "Done");
        assert_eq!(session.context, json!({"Count": 2}));

        session.dispatch(&interp, &def, "Reset", None).unwrap();
        assert_eq!(session.state, "Waiting");
        assert_eq!(session.context, json!({"Count": 0}));
    }

    #[test]
    fn test_error_leaves_session() {
        let interp = Interpreter::new();
        let def = machine();
        let mut session = Session::new(&def);
        session.state = "Gone".to_string();

        assert!(session.dispatch(&interp, &def, "Bump", None).is_err());
        assert_eq!(session.state, "Gone");
        assert_eq!(session.context, json!({"Count": 0}));
    }

    #[test]
    fn test_serde_roundtrip() {
        let interp = Interpreter::new();
        let def = machine();
        let mut session = Session::new(&def);
        session.dispatch(&interp, &def, "Bump", None).unwrap();
        session.dispatch(&interp, &def, "Bump", None).unwrap();
        session.tick(&interp, &def, 1.0).unwrap();

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["timers"][0]["endTime"], json!(6.0));

        let mut restored: Session = serde_json::from_value(json).unwrap();
        assert_eq!(restored, session);

        restored.tick(&interp, &def, 6.0).unwrap();
        assert_eq!(restored.state, "Done");

        restored.reset(&def);
        assert_eq!(restored, Session::new(&def));
    }
}
