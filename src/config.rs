//! Runner configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via STATESCRIPT_CONFIG or --config)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use statescript_core::{LogCategory, ResolverOptions};
use std::path::{Path, PathBuf};

/// Runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reference syntax.
    pub resolver: ResolverOptions,
    /// Evaluation trace output.
    pub trace: TraceConfig,
    /// Event timestamps.
    pub clock: ClockConfig,
    /// Interactive session.
    pub repl: ReplConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    ///
    /// An explicit `path` wins over `STATESCRIPT_CONFIG`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("STATESCRIPT_CONFIG") {
                Ok(path) => Self::from_file(path)?,
                Err(_) => Self::default(),
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `STATESCRIPT_*` overrides from a variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("STATESCRIPT_LITERAL_FALLBACK") {
            self.resolver.literal_fallback = parse_bool(&v);
        }
        if let Some(c) = lookup("STATESCRIPT_CONTEXT_MARKER").and_then(|v| single_char(&v)) {
            self.resolver.context_marker = c;
        }
        if let Some(c) = lookup("STATESCRIPT_CONSTANTS_MARKER").and_then(|v| single_char(&v)) {
            self.resolver.constants_marker = c;
        }
        if let Some(c) = lookup("STATESCRIPT_ITEM_MARKER").and_then(|v| single_char(&v)) {
            self.resolver.item_marker = c;
        }

        if let Some(v) = lookup("STATESCRIPT_TRACE") {
            self.trace.enabled = parse_bool(&v);
        }
        if let Some(v) = lookup("STATESCRIPT_TRACE_CATEGORIES") {
            let categories: Vec<LogCategory> = v
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .filter_map(|s| s.parse().ok())
                .collect();
            if !categories.is_empty() {
                self.trace.categories = categories;
            }
        }

        if let Some(v) = lookup("STATESCRIPT_WALL_CLOCK") {
            self.clock.wall_clock = parse_bool(&v);
        }
        if let Some(scale) = lookup("STATESCRIPT_TIME_SCALE").and_then(|v| v.parse().ok()) {
            self.clock.scale = scale;
        }

        if let Some(path) = lookup("STATESCRIPT_HISTORY") {
            self.repl.history_file = Some(PathBuf::from(path));
        }
    }

    /// Rejects settings the interpreter cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.resolver;
        if r.context_marker == r.constants_marker
            || r.context_marker == r.item_marker
            || r.constants_marker == r.item_marker
        {
            return Err(ConfigError::ValidationError(
                "resolver markers must be distinct".to_string(),
            ));
        }
        if !(self.clock.scale.is_finite() && self.clock.scale > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "clock.scale must be positive, got {}",
                self.clock.scale
            )));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn single_char(value: &str) -> Option<char> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

/// Evaluation trace configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Print recorded log entries after each command.
    pub enabled: bool,
    /// Categories to record.
    pub categories: Vec<LogCategory>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            categories: vec![
                LogCategory::Validation,
                LogCategory::Unhandled,
                LogCategory::Timer,
                LogCategory::Action,
            ],
        }
    }
}

/// Event timestamp configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Stamp events with the wall clock when no timestamp is given.
    pub wall_clock: bool,
    /// Script seconds per wall-clock second.
    pub scale: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            wall_clock: true,
            scale: 1.0,
        }
    }
}

/// Interactive session configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    /// History file; defaults to `~/.statescript_history`.
    pub history_file: Option<PathBuf>,
}

impl ReplConfig {
    pub fn history_path(&self) -> PathBuf {
        self.history_file.clone().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|h| PathBuf::from(h).join(".statescript_history"))
                .unwrap_or_else(|_| ".statescript_history".into())
        })
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.resolver.context_marker, '$');
        assert!(config.resolver.literal_fallback);
        assert!(!config.trace.enabled);
        assert!(config.clock.wall_clock);
        assert_eq!(config.clock.scale, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "resolver:\n  literal_fallback: false\ntrace:\n  enabled: true\n  categories: [visit, trace]\nclock:\n  wall_clock: false"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(!config.resolver.literal_fallback);
        assert_eq!(config.resolver.item_marker, '@');
        assert!(config.trace.enabled);
        assert_eq!(
            config.trace.categories,
            vec![LogCategory::Visit, LogCategory::Trace]
        );
        assert!(!config.clock.wall_clock);
        assert_eq!(config.clock.scale, 1.0);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STATESCRIPT_LITERAL_FALLBACK", "0"),
            ("STATESCRIPT_ITEM_MARKER", "%"),
            ("STATESCRIPT_CONTEXT_MARKER", "too-long"),
            ("STATESCRIPT_TRACE", "true"),
            ("STATESCRIPT_TRACE_CATEGORIES", "timer, action,bogus"),
            ("STATESCRIPT_TIME_SCALE", "60"),
            ("STATESCRIPT_HISTORY", "/tmp/h"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert!(!config.resolver.literal_fallback);
        assert_eq!(config.resolver.item_marker, '%');
        assert_eq!(config.resolver.context_marker, '$');
        assert!(config.trace.enabled);
        assert_eq!(
            config.trace.categories,
            vec![LogCategory::Timer, LogCategory::Action]
        );
        assert_eq!(config.clock.scale, 60.0);
        assert_eq!(config.repl.history_path(), PathBuf::from("/tmp/h"));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.resolver.item_marker = '$';
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.clock.scale = 0.0;
        assert!(config.validate().is_err());
    }
}
