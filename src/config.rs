//! Engine configuration.
//!
//! Constants shared by the engine plus [`EngineConfig`], the runtime knobs a
//! transport adapter passes to every session.

use std::env;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::session::SessionRecordLevel;

/// Line terminator used when joining response lines.
pub const DEFAULT_NEWLINE: &str = "\r\n";

/// Environment variable that enables command-table hot reload.
pub const RELOAD_ENV: &str = "NOSIM_RELOAD_COMMANDS";

/// Base identity used when the caller does not supply one.
pub const DEFAULT_BASE_PROMPT: &str = "MA5800-X7";

/// Response for lines that match no command when the table does not set one.
pub const DEFAULT_UNKNOWN_COMMAND: &str = "Unknown command";

/// Placeholder replaced with the session's base identity in every response.
pub const BASE_PROMPT_PLACEHOLDER: &str = "{base_prompt}";

/// Runtime configuration for sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    /// Separator used when a response spans several lines.
    pub newline: String,
    /// Re-check the command table on disk before each line.
    pub reload_commands: bool,
    /// Banner written by transports on connect.
    pub intro: String,
    /// Granularity of session transcripts.
    pub record_level: SessionRecordLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            newline: DEFAULT_NEWLINE.to_string(),
            reload_commands: false,
            intro: String::new(),
            record_level: SessionRecordLevel::Off,
        }
    }
}

impl EngineConfig {
    /// Defaults, with `reload_commands` taken from [`RELOAD_ENV`].
    ///
    /// Any value other than empty, `0`, `false` or `no` enables reload.
    pub fn from_env() -> Self {
        let reload_commands = env::var(RELOAD_ENV)
            .map(|value| is_truthy(&value))
            .unwrap_or(false);
        Self {
            reload_commands,
            ..Self::default()
        }
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no"
    )
}
