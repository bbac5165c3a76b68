//! Bridge configuration.
//!
//! Defaults can be overridden from the environment:
//!
//! | Variable                    | Field                     |
//! |-----------------------------|---------------------------|
//! | `GAMEMODE_PIPE`             | `pipe_name`               |
//! | `GAMEMODE_LOG`              | `log.level`               |
//! | `LOG_FORMAT`                | `log.format` (`json`)     |
//! | `GAMEMODE_REDIRECT_CONSOLE` | `redirect_console_output` |
//! | `GAMEMODE_EXIT`             | `exit_behaviour`          |

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bridge::codec::DEFAULT_MAX_FRAME_LENGTH;

/// Channel the server plugin listens on unless `GAMEMODE_PIPE` or
/// [`GameModeBuilder::use_pipe`](crate::GameModeBuilder::use_pipe) says
/// otherwise. Plugins built for another name need one of those overrides.
pub const DEFAULT_PIPE_NAME: &str = "gamemode-bridge";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

/// What the session does when the server unloads the game mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitBehaviour {
    /// End the session.
    #[default]
    ShutDown,
    /// Invalidate outstanding waits and keep running until the next
    /// `Initialized`.
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub pipe_name: String,
    pub max_frame_length: usize,
    pub exit_behaviour: ExitBehaviour,
    /// Forward INFO-and-above log lines to the server console.
    pub redirect_console_output: bool,
    pub log: LogConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            exit_behaviour: ExitBehaviour::default(),
            redirect_console_output: false,
            log: LogConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unknown values keep the
    /// default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(pipe) = lookup("GAMEMODE_PIPE").filter(|pipe| !pipe.trim().is_empty()) {
            config.pipe_name = pipe.trim().to_string();
        }
        if let Some(level) = lookup("GAMEMODE_LOG").and_then(|level| level.parse().ok()) {
            config.log.level = level;
        }
        if lookup("LOG_FORMAT").as_deref() == Some("json") {
            config.log.format = LogFormat::Json;
        }
        if let Some(redirect) = lookup("GAMEMODE_REDIRECT_CONSOLE") {
            config.redirect_console_output = matches!(
                redirect.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        match lookup("GAMEMODE_EXIT").as_deref().map(str::trim) {
            Some("restart") => config.exit_behaviour = ExitBehaviour::Restart,
            Some("shutdown") => config.exit_behaviour = ExitBehaviour::ShutDown,
            _ => {}
        }

        config
    }
}
