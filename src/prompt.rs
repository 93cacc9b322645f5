//! Prompt state machine.
//!
//! A prompt level is a named template such as `{base_prompt}(config)#` with an
//! optional parent. A [`PromptState`] is a level instantiated with the
//! session's base identity and any parameters captured by the command that
//! entered it. The instantiated text doubles as the state identity.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::BASE_PROMPT_PLACEHOLDER;
use crate::error::EngineError;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(re) => re,
        Err(err) => panic!("invalid PLACEHOLDER regex: {err}"),
    });

/// A level of the CLI hierarchy as declared in a command table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PromptLevel {
    pub name: String,
    pub template: String,
    /// Level reached by `quit`. `None` means `quit` ends the session.
    #[serde(default)]
    pub parent: Option<String>,
    /// Commands at this level operate on a staged copy of device state.
    #[serde(default)]
    pub edit_context: bool,
}

impl PromptLevel {
    pub fn new(name: &str, template: &str, parent: Option<&str>, edit_context: bool) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
            parent: parent.map(str::to_string),
            edit_context,
        }
    }

    /// Placeholder names in the template, excluding `base_prompt`.
    pub fn parameters(&self) -> Vec<String> {
        PLACEHOLDER
            .captures_iter(&self.template)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .filter(|name| name != "base_prompt")
            .collect()
    }
}

/// The prompt a session is currently at.
#[derive(Debug, Clone, Eq)]
pub struct PromptState {
    level: String,
    params: BTreeMap<String, String>,
    text: String,
}

impl PromptState {
    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Instantiated prompt string, e.g. `MA5800(config)#`.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl PartialEq for PromptState {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl std::fmt::Display for PromptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Outcome of moving a session one level up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentStep {
    Level(PromptState),
    Terminate,
}

/// Validated set of prompt levels.
#[derive(Debug, Clone)]
pub struct PromptMachine {
    levels: Vec<PromptLevel>,
    index: HashMap<String, usize>,
    initial: String,
}

impl PromptMachine {
    /// Builds the machine, rejecting duplicate names, dangling parents and
    /// parent cycles.
    pub fn new(levels: Vec<PromptLevel>, initial: &str) -> Result<Self, EngineError> {
        let mut index = HashMap::new();
        for (idx, level) in levels.iter().enumerate() {
            if index.insert(level.name.clone(), idx).is_some() {
                return Err(EngineError::InvalidCommandTable(format!(
                    "duplicate prompt level '{}'",
                    level.name
                )));
            }
        }
        if !index.contains_key(initial) {
            return Err(EngineError::InvalidCommandTable(format!(
                "initial prompt level '{initial}' is not declared"
            )));
        }
        for level in &levels {
            let mut seen = HashSet::new();
            let mut cursor = Some(level);
            while let Some(current) = cursor {
                if !seen.insert(current.name.as_str()) {
                    return Err(EngineError::InvalidCommandTable(format!(
                        "prompt level '{}' has a parent cycle",
                        level.name
                    )));
                }
                cursor = match &current.parent {
                    Some(parent) => match index.get(parent) {
                        Some(idx) => levels.get(*idx),
                        None => {
                            return Err(EngineError::InvalidCommandTable(format!(
                                "prompt level '{}' has unknown parent '{parent}'",
                                current.name
                            )));
                        }
                    },
                    None => None,
                };
            }
        }
        Ok(Self {
            levels,
            index,
            initial: initial.to_string(),
        })
    }

    pub fn levels(&self) -> &[PromptLevel] {
        &self.levels
    }

    pub fn level(&self, name: &str) -> Option<&PromptLevel> {
        self.index.get(name).and_then(|idx| self.levels.get(*idx))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn initial_level(&self) -> &str {
        &self.initial
    }

    pub fn is_edit_context(&self, name: &str) -> bool {
        self.level(name).is_some_and(|level| level.edit_context)
    }

    /// State a new session starts in.
    pub fn initial_state(&self, base_prompt: &str) -> Result<PromptState, EngineError> {
        self.instantiate(&self.initial, base_prompt, &BTreeMap::new())
    }

    /// Instantiates `level` with `base_prompt` and `params`.
    ///
    /// Every placeholder in the template must be supplied; extra parameters
    /// are dropped.
    pub fn instantiate(
        &self,
        level: &str,
        base_prompt: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<PromptState, EngineError> {
        let spec = self.level(level).ok_or_else(|| {
            EngineError::PromptContract(format!("unknown prompt level '{level}'"))
        })?;
        let mut kept = BTreeMap::new();
        for name in spec.parameters() {
            let value = params.get(&name).ok_or_else(|| {
                EngineError::PromptContract(format!(
                    "prompt level '{level}' requires parameter '{name}'"
                ))
            })?;
            kept.insert(name, value.clone());
        }
        let text = PLACEHOLDER
            .replace_all(&spec.template, |caps: &regex::Captures<'_>| {
                let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                if name == "base_prompt" {
                    base_prompt.to_string()
                } else {
                    kept.get(name).cloned().unwrap_or_default()
                }
            })
            .into_owned();
        trace!("instantiated prompt level '{level}' as '{text}'");
        Ok(PromptState {
            level: level.to_string(),
            params: kept,
            text,
        })
    }

    /// Resolves the `quit` target of `state`.
    ///
    /// A state whose level is not declared is a contract violation.
    pub fn parent(&self, state: &PromptState, base_prompt: &str) -> Result<ParentStep, EngineError> {
        let spec = self.level(state.level()).ok_or_else(|| {
            EngineError::PromptContract(format!(
                "quit from unrecognised prompt '{}' (level '{}')",
                state.text(),
                state.level()
            ))
        })?;
        match &spec.parent {
            Some(parent) => Ok(ParentStep::Level(self.instantiate(
                parent,
                base_prompt,
                state.params(),
            )?)),
            None => Ok(ParentStep::Terminate),
        }
    }
}

/// Replaces `{base_prompt}` in response text.
pub fn substitute_base_prompt(text: &str, base_prompt: &str) -> String {
    if text.contains(BASE_PROMPT_PLACEHOLDER) {
        text.replace(BASE_PROMPT_PLACEHOLDER, base_prompt)
    } else {
        text.to_string()
    }
}
