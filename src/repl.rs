//! Interactive session.

use crate::commands::{format_json, format_outcome, parse_json_arg, Runner};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use statescript_core::{Condition, Session, StateMachineDefinition, TIMER_EVENT};
use std::path::Path;

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help

  <event>                       Dispatch an event in the current state
  send <event>                  Same, for event names that clash with commands
  tick                          Dispatch the timer event
  events                        List events the current state handles

  state                         Show the current state
  ctx                           Show the context
  timers                        Show open $after windows
  session                       Show the whole session as JSON

  at <seconds>                  Pin the clock (events use this timestamp)
  advance <seconds>             Move the pinned clock forward
  clock                         Unpin the clock and use the configured source

  eval <condition_json>         Evaluate a condition against the context
  reset                         Back to the initial state and context

  quit, exit                    Exit the REPL
"#;

struct ReplState<'a> {
    runner: &'a Runner,
    definition: &'a StateMachineDefinition,
    session: Session,
    pinned: Option<f64>,
}

pub fn run(
    runner: &Runner,
    definition: &StateMachineDefinition,
    history_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "statescript".bold().cyan());
    println!(
        "{} states, starting in {} (checksum {})",
        definition.state_names().len(),
        definition.initial().cyan(),
        definition.checksum
    );

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;
    let _ = rl.load_history(history_path);

    println!("Type 'help' for available commands.\n");

    let mut state = ReplState {
        runner,
        definition,
        session: Session::new(definition),
        pinned: None,
    };

    loop {
        let prompt = format!("{} ", format!("{}>", state.session.state).cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let result = execute_repl_command(&mut state, line);
                if let Some(trace) = runner.take_trace() {
                    println!("{}", trace);
                }
                match result {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(history_path);
    Ok(())
}

fn execute_repl_command(
    state: &mut ReplState<'_>,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let (cmd, rest) = line
        .split_once(char::is_whitespace)
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((line, ""));

    match cmd {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "state" => Ok(Some(state.session.state.cyan().to_string())),

        "ctx" | "context" => Ok(Some(format_json(&state.session.context))),

        "session" => Ok(Some(format_json(&serde_json::to_value(&state.session)?))),

        "events" => {
            let events = state.definition.events_from(&state.session.state);
            if events.is_empty() {
                Ok(Some("No events in this state".yellow().to_string()))
            } else {
                Ok(Some(events.join(", ")))
            }
        }

        "timers" => {
            if state.session.timers.is_empty() {
                return Ok(Some("No open timers".yellow().to_string()));
            }
            let now = state.now();
            let mut output = String::new();
            for entry in &state.session.timers {
                let remaining = match now {
                    Some(now) => format!("{:.1}s left", entry.remaining(now)),
                    None => "no clock".dimmed().to_string(),
                };
                output.push_str(&format!(
                    "{} ends at {} ({})\n",
                    entry.path.cyan(),
                    entry.end_time,
                    remaining
                ));
            }
            if let Some(deadline) = state.session.timers.next_deadline() {
                output.push_str(&format!("next deadline: {}", deadline));
            }
            Ok(Some(output))
        }

        "at" => {
            let Ok(at) = rest.parse::<f64>() else {
                return Ok(Some("Usage: at <seconds>".to_string()));
            };
            state.pinned = Some(at);
            Ok(Some(format!("Clock pinned at {}", at)))
        }

        "advance" => {
            let Ok(delta) = rest.parse::<f64>() else {
                return Ok(Some("Usage: advance <seconds>".to_string()));
            };
            let base = state.pinned.or_else(|| state.runner.timestamp(None)).unwrap_or(0.0);
            state.pinned = Some(base + delta);
            Ok(Some(format!("Clock pinned at {}", base + delta)))
        }

        "clock" => {
            state.pinned = None;
            Ok(Some("Clock unpinned".to_string()))
        }

        "reset" => {
            state.session.reset(state.definition);
            Ok(Some(format!("Reset to {}", state.session.state.cyan())))
        }

        "eval" => {
            if rest.is_empty() {
                return Ok(Some("Usage: eval <condition_json>".to_string()));
            }
            let condition = Condition::decode_at(&parse_json_arg(rest)?, "Condition")?;
            // Scratch windows; probing a condition must not arm the session's timers.
            let mut timers = state.session.timers.clone();
            let result = state.runner.interpreter().evaluate(
                &condition,
                &state.session.context,
                state.definition.constants(),
                &mut timers,
                state.now(),
                "Condition",
            )?;
            Ok(Some(match result {
                Some(value) => format_json(&value),
                None => "undefined".yellow().to_string(),
            }))
        }

        "tick" => state.dispatch(TIMER_EVENT).map(Some),

        "send" => {
            if rest.is_empty() {
                return Ok(Some("Usage: send <event>".to_string()));
            }
            state.dispatch(rest).map(Some)
        }

        event => state.dispatch(event).map(Some),
    }
}

impl ReplState<'_> {
    fn now(&self) -> Option<f64> {
        self.runner.timestamp(self.pinned)
    }

    fn dispatch(&mut self, event: &str) -> Result<String, Box<dyn std::error::Error>> {
        let from = self.session.state.clone();
        let now = self.now();
        let outcome =
            self.session
                .dispatch(self.runner.interpreter(), self.definition, event, now)?;
        Ok(format_outcome(event, &from, &outcome))
    }
}
