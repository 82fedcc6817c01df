//! Command execution.

use crate::config::{ClockConfig, Config};
use crate::Commands;
use colored::Colorize;
use serde_json::{json, Value};
use statescript_core::{
    ActionBag, Condition, DispatchOutcome, Interpreter, PathResolver, RecordingLogger, Session,
    StateMachineDefinition, TimerRegistry,
};
use std::path::Path;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Interpreter plus the runner-level settings commands share.
pub struct Runner {
    interpreter: Interpreter,
    recorder: Option<Rc<RecordingLogger>>,
    clock: ClockConfig,
}

impl Runner {
    pub fn new(config: &Config, trace: bool) -> Self {
        let interpreter =
            Interpreter::new().with_resolver(PathResolver::new(config.resolver.clone()));

        let (interpreter, recorder) = if trace || config.trace.enabled {
            let recorder = Rc::new(RecordingLogger::with_categories(
                config.trace.categories.iter().copied(),
            ));
            (interpreter.with_logger(Rc::clone(&recorder)), Some(recorder))
        } else {
            (interpreter, None)
        };

        Self {
            interpreter,
            recorder,
            clock: config.clock.clone(),
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Picks the event timestamp: the explicit one, else the scaled wall clock.
    pub fn timestamp(&self, explicit: Option<f64>) -> Option<f64> {
        explicit.or_else(|| {
            if !self.clock.wall_clock {
                return None;
            }
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .ok()
                .map(|d| d.as_secs_f64() * self.clock.scale)
        })
    }

    /// Drains recorded log entries into display lines.
    pub fn take_trace(&self) -> Option<String> {
        let entries = self.recorder.as_ref()?.drain();
        if entries.is_empty() {
            return None;
        }

        let lines: Vec<String> = entries
            .iter()
            .map(|e| {
                format!(
                    "{:>10} {} {}",
                    e.category.as_str().dimmed(),
                    e.path.cyan(),
                    e.message
                )
            })
            .collect();
        Some(lines.join("\n"))
    }
}

/// Executes a one-shot command and returns the formatted output.
pub fn execute(runner: &Runner, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    let interp = runner.interpreter();

    match cmd {
        Commands::Repl { .. } => Err("repl is interactive and has no one-shot output".into()),

        Commands::Check { definition } => {
            let def = load_definition(&definition)?;
            let mut output = format!(
                "{} {} states, initial {} (checksum: {})",
                "Valid".green(),
                def.state_names().len(),
                def.initial().cyan(),
                def.checksum
            );
            for state in def.state_names() {
                let events = def.events_from(state);
                let events = if events.is_empty() {
                    "(terminal)".dimmed().to_string()
                } else {
                    events.join(", ")
                };
                output.push_str(&format!("\n  {}: {}", state.cyan(), events));
            }
            Ok(output)
        }

        Commands::Eval {
            condition,
            context,
            constants,
            timers,
            at,
        } => {
            let node = parse_json_arg(&condition)?;
            let context = parse_optional(context.as_deref(), json!({}))?;
            let constants = parse_optional(constants.as_deref(), json!({}))?;
            let mut timers: TimerRegistry =
                serde_json::from_value(parse_optional(timers.as_deref(), json!([]))?)?;

            let condition = Condition::decode_at(&node, "Condition")?;
            let result = interp.evaluate(
                &condition,
                &context,
                &constants,
                &mut timers,
                runner.timestamp(at),
                "Condition",
            )?;

            let mut output = match result {
                Some(value) => format_json(&value),
                None => "undefined".yellow().to_string(),
            };
            if !timers.is_empty() {
                output.push_str(&format!(
                    "\n{}\n{}",
                    "Timers".bold(),
                    format_json(&serde_json::to_value(&timers)?)
                ));
            }
            Ok(output)
        }

        Commands::Apply {
            actions,
            context,
            constants,
            original,
        } => {
            let bags = ActionBag::decode_list(&parse_json_arg(&actions)?);
            let mut context = parse_json_arg(&context)?;
            let constants = parse_optional(constants.as_deref(), json!({}))?;
            let original = original.as_deref().map(parse_json_arg).transpose()?;

            interp.apply_actions(&bags, &mut context, &constants, original.as_ref(), "Actions")?;
            Ok(format_json(&context))
        }

        Commands::Dispatch {
            definition,
            event,
            session,
            state,
            context,
            at,
        } => {
            let def = load_definition(&definition)?;
            let mut session = load_session(&def, session.as_deref())?;
            if let Some(state) = state {
                session.state = state;
            }
            if let Some(context) = context {
                session.context = parse_json_arg(&context)?;
            }

            let from = session.state.clone();
            let outcome = session.dispatch(interp, &def, &event, runner.timestamp(at))?;
            Ok(format!(
                "{}\n{}",
                format_outcome(&event, &from, &outcome),
                format_json(&serde_json::to_value(&session)?)
            ))
        }

        Commands::Replay {
            definition,
            events,
            session,
        } => {
            let def = load_definition(&definition)?;
            let mut session = load_session(&def, session.as_deref())?;

            let mut lines = Vec::new();
            for (i, spec) in events.iter().enumerate() {
                let (event, at) = parse_event_spec(spec);
                let from = session.state.clone();
                let outcome = session.dispatch(interp, &def, event, runner.timestamp(at))?;
                lines.push(format!("{:>3}. {}", i + 1, format_outcome(event, &from, &outcome)));
            }
            lines.push(format_json(&serde_json::to_value(&session)?));
            Ok(lines.join("\n"))
        }
    }
}

/// Loads a definition from a file path (`@` prefix optional) or inline JSON.
///
/// Files ending in `.yaml` or `.yml` are read as YAML, anything else as JSON.
pub fn load_definition(arg: &str) -> Result<StateMachineDefinition, Box<dyn std::error::Error>> {
    if arg.trim_start().starts_with('{') {
        return Ok(StateMachineDefinition::from_json_str(arg)?);
    }

    let path = Path::new(arg.strip_prefix('@').unwrap_or(arg));
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;

    let def = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => StateMachineDefinition::from_yaml(&content)?,
        _ => StateMachineDefinition::from_json_str(&content)?,
    };
    tracing::debug!("loaded {} (checksum {})", path.display(), def.checksum);
    Ok(def)
}

fn load_session(
    def: &StateMachineDefinition,
    arg: Option<&str>,
) -> Result<Session, Box<dyn std::error::Error>> {
    match arg {
        Some(arg) => Ok(serde_json::from_value(parse_json_arg(arg)?)?),
        None => Ok(Session::new(def)),
    }
}

/// Splits `Event@12.5` into the event name and its timestamp.
pub fn parse_event_spec(spec: &str) -> (&str, Option<f64>) {
    match spec.rsplit_once('@') {
        Some((event, at)) if !event.is_empty() => match at.parse::<f64>() {
            Ok(at) => (event, Some(at)),
            Err(_) => (spec, None),
        },
        _ => (spec, None),
    }
}

/// One-line summary of a dispatch.
pub fn format_outcome(event: &str, from: &str, outcome: &DispatchOutcome) -> String {
    match (outcome.handler, outcome.event.as_deref()) {
        (Some(index), Some(key)) if outcome.transitioned => format!(
            "{} {} -> {} ({}[{}])",
            event.cyan(),
            from,
            outcome.state.green(),
            key,
            index
        ),
        (Some(index), Some(key)) => {
            format!("{} {} ({}[{}])", event.cyan(), from, key, index)
        }
        _ => format!("{} {} {}", event.cyan(), from, "(no match)".dimmed()),
    }
}

/// Parses a JSON argument (supports @file syntax).
pub fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

fn parse_optional(arg: Option<&str>, default: Value) -> Result<Value, Box<dyn std::error::Error>> {
    match arg {
        Some(arg) => parse_json_arg(arg),
        None => Ok(default),
    }
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MACHINE: &str = r#"{
        "Context": {"Hp": 2},
        "States": {
            "Alive": {
                "Hit": [
                    {"Condition": {"$le": ["Hp", 1]}, "Actions": {"$set": ["Hp", 0]}, "Transition": "Dead"},
                    {"Actions": {"$dec": "Hp"}}
                ],
                "$timer": {"Condition": {"$after": 10}, "Actions": {"$inc": "Hp"}}
            },
            "Dead": {}
        }
    }"#;

    fn runner() -> Runner {
        let mut config = Config::default();
        config.clock.wall_clock = false;
        Runner::new(&config, false)
    }

    /// The trailing pretty-printed JSON of a command's output.
    fn trailing_json(output: &str) -> Value {
        let start = output.find('{').unwrap();
        serde_json::from_str(&output[start..]).unwrap()
    }

    #[test]
    fn test_parse_event_spec() {
        assert_eq!(parse_event_spec("Hit"), ("Hit", None));
        assert_eq!(parse_event_spec("$timer@12.5"), ("$timer", Some(12.5)));
        assert_eq!(parse_event_spec("mail@home"), ("mail@home", None));
        assert_eq!(parse_event_spec("@5"), ("@5", None));
    }

    #[test]
    fn test_load_definition_sources() {
        assert_eq!(load_definition(MACHINE).unwrap().initial(), "Alive");

        let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        json_file.write_all(MACHINE.as_bytes()).unwrap();
        let path = json_file.path().to_str().unwrap().to_string();
        assert_eq!(load_definition(&path).unwrap().initial(), "Alive");
        assert_eq!(load_definition(&format!("@{}", path)).unwrap().initial(), "Alive");

        let mut yaml_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(yaml_file, "Context: {{}}\nStates:\n  Only: {{}}").unwrap();
        let def = load_definition(yaml_file.path().to_str().unwrap()).unwrap();
        assert_eq!(def.initial(), "Only");

        assert!(load_definition("/definitely/not/here.json").is_err());
    }

    #[test]
    fn test_apply_command() {
        let output = execute(
            &runner(),
            Commands::Apply {
                actions: r#"[{"$inc": ["Gold", 5]}, {"$push": ["Log", "paid"]}]"#.to_string(),
                context: r#"{"Gold": 1, "Log": []}"#.to_string(),
                constants: None,
                original: None,
            },
        )
        .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&output).unwrap(),
            json!({"Gold": 6, "Log": ["paid"]})
        );
    }

    #[test]
    fn test_repl_has_no_one_shot_form() {
        let result = execute(
            &runner(),
            Commands::Repl {
                definition: MACHINE.to_string(),
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_eval_command() {
        let output = execute(
            &runner(),
            Commands::Eval {
                condition: r##"{"$gt": ["Hp", "#Min"]}"##.to_string(),
                context: Some(r#"{"Hp": 4}"#.to_string()),
                constants: Some(r#"{"Min": 3}"#.to_string()),
                timers: None,
                at: None,
            },
        )
        .unwrap();
        assert_eq!(output, "true");
    }

    #[test]
    fn test_dispatch_command_chains_sessions() {
        let run = |session: Option<String>, at: f64| {
            let output = execute(
                &runner(),
                Commands::Dispatch {
                    definition: MACHINE.to_string(),
                    event: "$timer".to_string(),
                    session,
                    state: None,
                    context: None,
                    at: Some(at),
                },
            )
            .unwrap();
            trailing_json(&output)
        };

        let first = run(None, 100.0);
        assert_eq!(first["state"], json!("Alive"));
        assert_eq!(first["timers"][0]["endTime"], json!(110.0));

        let second = run(Some(first.to_string()), 110.0);
        assert_eq!(second["context"], json!({"Hp": 3}));
        assert_eq!(second["timers"], json!([]));
    }

    #[test]
    fn test_replay_command() {
        let output = execute(
            &runner(),
            Commands::Replay {
                definition: MACHINE.to_string(),
                events: vec!["Hit".to_string(), "Hit".to_string(), "Hit".to_string()],
                session: None,
            },
        )
        .unwrap();

        let session = trailing_json(&output);
        assert_eq!(session["state"], json!("Dead"));
        assert_eq!(session["context"], json!({"Hp": 0}));
        assert!(output.lines().count() > 3);
    }

    #[test]
    fn test_unknown_state_is_an_error() {
        let err = execute(
            &runner(),
            Commands::Dispatch {
                definition: MACHINE.to_string(),
                event: "Hit".to_string(),
                session: None,
                state: Some("Limbo".to_string()),
                context: None,
                at: None,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("Limbo"));
    }
}
