//! Declarative command grammar.
//!
//! A [`CommandTable`] is the serialisable description of a device CLI: its
//! prompt levels and an ordered list of [`CommandSpec`] entries. Loading it
//! produces a [`Grammar`], which compiles every abbreviation pattern once,
//! resolves aliases and handler names, and answers "which command does this
//! line mean at this prompt".
//!
//! Resolution order is registration order: the first entry whose pattern
//! fully matches the line and whose prompt filter admits the current level
//! wins. Entries with no pattern are matched by exact key.

mod matcher;
mod registry;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use log::{debug, trace};
use regex::RegexSet;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_UNKNOWN_COMMAND;
use crate::error::EngineError;
use crate::handlers::{self, HandlerFn};
use crate::prompt::{PromptLevel, PromptMachine};

pub use matcher::{ARGS_TOKEN, CommandPattern, PatternWord};
pub use registry::{GrammarRegistry, GrammarSource};

/// How a command interacts with device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum EditMode {
    /// Read-only or navigation.
    #[default]
    None,
    /// Mutates canonical state immediately, or the open staged copy.
    Direct,
    /// Mutates the staged copy; rejected when none is open.
    Staged,
    /// Opens a staged edit before running and enters an edit context.
    Open,
}

/// One entry of a command table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandSpec {
    /// Canonical command key, also used for exact matching.
    pub key: String,
    /// Abbreviation pattern such as `di(splay) b(oard) \S+`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Prompt levels the command is valid in. `None` admits every level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Vec<String>>,
    /// Registered handler name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Static response text for handler-less entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Static target level for handler-less entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_prompt: Option<String>,
    #[serde(default)]
    pub edit: EditMode,
    #[serde(default)]
    pub help: String,
    /// Key of the entry whose action and help this entry reuses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl CommandSpec {
    /// Entry with a handler and pattern, the common case for builtin tables.
    pub fn handled(
        key: &str,
        pattern: Option<&str>,
        prompt: Option<&[&str]>,
        handler: &str,
        edit: EditMode,
        help: &str,
    ) -> Self {
        Self {
            key: key.to_string(),
            pattern: pattern.map(str::to_string),
            prompt: prompt.map(|levels| levels.iter().map(|l| l.to_string()).collect()),
            handler: Some(handler.to_string()),
            output: None,
            new_prompt: None,
            edit,
            help: help.to_string(),
            alias: None,
        }
    }

    /// Handler-less entry that prints `output` and/or moves to `new_prompt`.
    pub fn fixed(
        key: &str,
        pattern: Option<&str>,
        prompt: Option<&[&str]>,
        output: Option<&str>,
        new_prompt: Option<&str>,
        help: &str,
    ) -> Self {
        Self {
            key: key.to_string(),
            pattern: pattern.map(str::to_string),
            prompt: prompt.map(|levels| levels.iter().map(|l| l.to_string()).collect()),
            handler: None,
            output: output.map(str::to_string),
            new_prompt: new_prompt.map(str::to_string),
            edit: EditMode::None,
            help: help.to_string(),
            alias: None,
        }
    }

    /// Entry that reuses `target`'s action under its own pattern and filter.
    pub fn alias_of(key: &str, pattern: Option<&str>, prompt: Option<&[&str]>, target: &str) -> Self {
        Self {
            key: key.to_string(),
            pattern: pattern.map(str::to_string),
            prompt: prompt.map(|levels| levels.iter().map(|l| l.to_string()).collect()),
            handler: None,
            output: None,
            new_prompt: None,
            edit: EditMode::None,
            help: String::new(),
            alias: Some(target.to_string()),
        }
    }
}

/// Serialisable command table for one device type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandTable {
    pub device_type: String,
    pub initial_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown_command: Option<String>,
    pub prompts: Vec<PromptLevel>,
    pub commands: Vec<CommandSpec>,
}

impl CommandTable {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// JSON schema of the table format.
    pub fn json_schema() -> Result<String, EngineError> {
        let schema = schemars::schema_for!(CommandTable);
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

/// What running a command does.
#[derive(Clone)]
pub enum Action {
    Handler { name: String, func: HandlerFn },
    Static {
        output: Option<String>,
        new_prompt: Option<String>,
    },
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Handler { name, .. } => f.debug_struct("Handler").field("name", name).finish(),
            Action::Static { output, new_prompt } => f
                .debug_struct("Static")
                .field("output", output)
                .field("new_prompt", new_prompt)
                .finish(),
        }
    }
}

/// A loaded command with alias and handler already resolved.
#[derive(Debug, Clone)]
pub struct CompiledCommand {
    pub key: String,
    pub help: String,
    pub prompts: Option<Vec<String>>,
    pub edit: EditMode,
    pub action: Action,
    /// Final non-alias key this entry delegates to.
    pub alias_of: Option<String>,
    pub pattern: Option<CommandPattern>,
}

impl CompiledCommand {
    pub fn admits(&self, level: &str) -> bool {
        match &self.prompts {
            Some(levels) => levels.iter().any(|l| l == level),
            None => true,
        }
    }

    /// Key of the entry that actually runs.
    pub fn target_key(&self) -> &str {
        self.alias_of.as_deref().unwrap_or(&self.key)
    }
}

/// Result of resolving one input line.
#[derive(Debug)]
pub enum Resolution<'g> {
    Matched {
        command: &'g CompiledCommand,
        args: String,
    },
    /// The line names commands, none of which is valid at this level.
    FilteredOut { keys: Vec<String> },
    Unknown,
}

/// Diagnostics summary for a loaded grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GrammarDiagnostics {
    pub device_type: String,
    pub total_commands: usize,
    pub total_levels: usize,
    /// Entries that delegate to another entry.
    pub alias_commands: Vec<String>,
    /// Entries whose full spelling resolves to an earlier entry at every
    /// level they admit.
    pub shadowed_commands: Vec<String>,
    /// Levels no command is valid in.
    pub idle_levels: Vec<String>,
    /// Levels unreachable from the initial level through static or declared
    /// transitions and parents.
    pub unreachable_levels: Vec<String>,
}

impl GrammarDiagnostics {
    pub fn has_issues(&self) -> bool {
        !self.shadowed_commands.is_empty()
            || !self.idle_levels.is_empty()
            || !self.unreachable_levels.is_empty()
    }
}

/// Compiled, immutable grammar.
#[derive(Debug, Clone)]
pub struct Grammar {
    device_type: String,
    prompts: PromptMachine,
    commands: Vec<CompiledCommand>,
    patterns: RegexSet,
    /// Maps a `patterns` index to a `commands` index.
    pattern_index: Vec<usize>,
    unknown_command: String,
}

impl Grammar {
    /// Compiles `table`.
    ///
    /// Fails when a pattern is malformed, a filter names an undeclared level,
    /// keys repeat, an alias is dangling or cyclic, or a non-alias entry has
    /// neither a registered handler nor a static action. `exit` and `help`
    /// entries are appended when the table does not define them.
    pub fn load(table: &CommandTable) -> Result<Self, EngineError> {
        let prompts = PromptMachine::new(table.prompts.clone(), &table.initial_prompt)?;

        let mut specs = table.commands.clone();
        for builtin in builtin_commands() {
            if !specs.iter().any(|spec| spec.key == builtin.key) {
                specs.push(builtin);
            }
        }

        let mut by_key: HashMap<&str, &CommandSpec> = HashMap::new();
        for spec in &specs {
            if spec.key.trim().is_empty() {
                return Err(EngineError::InvalidCommandTable(
                    "command key must not be empty".to_string(),
                ));
            }
            if by_key.insert(spec.key.as_str(), spec).is_some() {
                return Err(EngineError::InvalidCommandTable(format!(
                    "duplicate command key '{}'",
                    spec.key
                )));
            }
            for level in spec.prompt.iter().flatten() {
                if !prompts.contains(level) {
                    return Err(EngineError::InvalidCommandTable(format!(
                        "command '{}' is filtered to undeclared prompt level '{level}'",
                        spec.key
                    )));
                }
            }
            if let Some(level) = &spec.new_prompt
                && !prompts.contains(level)
            {
                return Err(EngineError::InvalidCommandTable(format!(
                    "command '{}' moves to undeclared prompt level '{level}'",
                    spec.key
                )));
            }
        }

        let mut commands = Vec::with_capacity(specs.len());
        let mut regexes = Vec::new();
        let mut pattern_index = Vec::new();
        for spec in &specs {
            let target = resolve_alias(spec, &by_key)?;
            let action = build_action(target)?;
            let pattern = match &spec.pattern {
                Some(source) => Some(CommandPattern::compile(source).map_err(|reason| {
                    EngineError::InvalidPattern {
                        key: spec.key.clone(),
                        reason,
                    }
                })?),
                None => None,
            };
            if let Some(pattern) = &pattern {
                regexes.push(pattern.as_regex().to_string());
                pattern_index.push(commands.len());
            }
            let help = if spec.help.is_empty() {
                target.help.clone()
            } else {
                spec.help.clone()
            };
            commands.push(CompiledCommand {
                key: spec.key.clone(),
                help,
                prompts: spec.prompt.clone(),
                edit: target.edit,
                action,
                alias_of: spec.alias.as_ref().map(|_| target.key.clone()),
                pattern,
            });
        }

        let patterns = RegexSet::new(&regexes)?;
        debug!(
            "loaded grammar '{}' with {} commands ({} patterns)",
            table.device_type,
            commands.len(),
            regexes.len()
        );

        Ok(Self {
            device_type: table.device_type.clone(),
            prompts,
            commands,
            patterns,
            pattern_index,
            unknown_command: table
                .unknown_command
                .clone()
                .unwrap_or_else(|| DEFAULT_UNKNOWN_COMMAND.to_string()),
        })
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn prompts(&self) -> &PromptMachine {
        &self.prompts
    }

    pub fn commands(&self) -> &[CompiledCommand] {
        &self.commands
    }

    pub fn command(&self, key: &str) -> Option<&CompiledCommand> {
        self.commands.iter().find(|command| command.key == key)
    }

    /// Response text for lines that resolve to nothing.
    pub fn unknown_command(&self) -> &str {
        &self.unknown_command
    }

    /// Commands valid at `level`, in registration order.
    pub fn commands_for<'a>(&'a self, level: &'a str) -> impl Iterator<Item = &'a CompiledCommand> {
        self.commands.iter().filter(move |command| command.admits(level))
    }

    /// Resolves `line` at prompt `level`.
    pub fn resolve(&self, line: &str, level: &str) -> Resolution<'_> {
        let mut rejected = Vec::new();

        for set_idx in self.patterns.matches(line).into_iter() {
            let Some(command) = self
                .pattern_index
                .get(set_idx)
                .and_then(|idx| self.commands.get(*idx))
            else {
                continue;
            };
            if !command.admits(level) {
                rejected.push(command.key.clone());
                continue;
            }
            if let Some(args) = command.pattern.as_ref().and_then(|p| p.match_line(line)) {
                trace!("line '{line}' matched pattern of '{}'", command.key);
                return Resolution::Matched { command, args };
            }
        }

        let exact = line.trim();
        for command in self.commands.iter().filter(|c| c.key == exact) {
            if command.admits(level) {
                trace!("line '{line}' matched key '{}'", command.key);
                return Resolution::Matched {
                    command,
                    args: String::new(),
                };
            }
            if !rejected.contains(&command.key) {
                rejected.push(command.key.clone());
            }
        }

        if rejected.is_empty() {
            Resolution::Unknown
        } else {
            Resolution::FilteredOut { keys: rejected }
        }
    }

    /// Inspects the grammar for shadowed entries and dead levels.
    pub fn diagnose(&self) -> GrammarDiagnostics {
        let alias_commands = self
            .commands
            .iter()
            .filter(|c| c.alias_of.is_some())
            .map(|c| c.key.clone())
            .collect::<Vec<_>>();

        let mut shadowed_commands = Vec::new();
        for command in &self.commands {
            let line = match &command.pattern {
                Some(pattern) if pattern.takes_args() => format!("{} 0", pattern.longest()),
                Some(pattern) => pattern.longest(),
                None => command.key.clone(),
            };
            let levels = match &command.prompts {
                Some(levels) => levels.clone(),
                None => self.prompts.levels().iter().map(|l| l.name.clone()).collect(),
            };
            let shadowed = !levels.is_empty()
                && levels.iter().all(|level| match self.resolve(&line, level) {
                    Resolution::Matched { command: hit, .. } => hit.key != command.key,
                    _ => true,
                });
            if shadowed {
                shadowed_commands.push(command.key.clone());
            }
        }

        let mut idle_levels = self
            .prompts
            .levels()
            .iter()
            .filter(|level| self.commands_for(&level.name).next().is_none())
            .map(|level| level.name.clone())
            .collect::<Vec<_>>();
        idle_levels.sort();

        let mut entered: HashSet<String> = HashSet::new();
        entered.insert(self.prompts.initial_level().to_string());
        for command in &self.commands {
            match &command.action {
                Action::Static {
                    new_prompt: Some(level),
                    ..
                } => {
                    entered.insert(level.clone());
                }
                Action::Handler { name, .. } => {
                    for level in handlers::declared_targets(name) {
                        entered.insert((*level).to_string());
                    }
                }
                _ => {}
            }
        }
        let mut unreachable_levels = self
            .prompts
            .levels()
            .iter()
            .filter(|level| !entered.contains(&level.name))
            .map(|level| level.name.clone())
            .collect::<Vec<_>>();
        unreachable_levels.sort();

        GrammarDiagnostics {
            device_type: self.device_type.clone(),
            total_commands: self.commands.len(),
            total_levels: self.prompts.levels().len(),
            alias_commands,
            shadowed_commands,
            idle_levels,
            unreachable_levels,
        }
    }
}

fn builtin_commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::handled(
            "help",
            None,
            None,
            handlers::ENGINE_HELP,
            EditMode::None,
            "List the commands available at this prompt",
        ),
        CommandSpec::handled(
            "exit",
            None,
            None,
            handlers::ENGINE_EXIT,
            EditMode::None,
            "Close the session",
        ),
    ]
}

fn resolve_alias<'a>(
    spec: &'a CommandSpec,
    by_key: &HashMap<&str, &'a CommandSpec>,
) -> Result<&'a CommandSpec, EngineError> {
    let mut seen = HashSet::new();
    let mut current = spec;
    while let Some(target) = &current.alias {
        if !seen.insert(current.key.as_str()) {
            return Err(EngineError::InvalidCommandTable(format!(
                "alias cycle through '{}'",
                spec.key
            )));
        }
        current = by_key.get(target.as_str()).copied().ok_or_else(|| {
            EngineError::InvalidCommandTable(format!(
                "alias '{}' refers to unknown command '{target}'",
                current.key
            ))
        })?;
    }
    Ok(current)
}

fn build_action(spec: &CommandSpec) -> Result<Action, EngineError> {
    if let Some(name) = &spec.handler {
        let func = handlers::lookup(name).ok_or_else(|| EngineError::UnknownHandler {
            key: spec.key.clone(),
            handler: name.clone(),
        })?;
        return Ok(Action::Handler {
            name: name.clone(),
            func,
        });
    }
    if spec.output.is_none() && spec.new_prompt.is_none() {
        return Err(EngineError::InvalidCommandTable(format!(
            "command '{}' has no handler, output or new_prompt",
            spec.key
        )));
    }
    Ok(Action::Static {
        output: spec.output.clone(),
        new_prompt: spec.new_prompt.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CommandTable {
        CommandTable {
            device_type: "test".to_string(),
            initial_prompt: "initial".to_string(),
            unknown_command: Some("% Unknown".to_string()),
            prompts: vec![
                PromptLevel::new("initial", "{base_prompt}>", None, false),
                PromptLevel::new("enable", "{base_prompt}#", Some("initial"), false),
            ],
            commands: vec![
                CommandSpec::fixed(
                    "enable",
                    Some("en(able)"),
                    Some(&["initial"]),
                    None,
                    Some("enable"),
                    "enter privileged mode",
                ),
                CommandSpec::fixed(
                    "display clock",
                    Some(r"di(splay) c(lock) \S+"),
                    Some(&["enable"]),
                    Some("12:00"),
                    None,
                    "show time",
                ),
                CommandSpec::alias_of("show clock", Some("sh(ow) c(lock)"), Some(&["initial"]), "display clock"),
                CommandSpec::handled(
                    "quit",
                    Some("q(uit)"),
                    None,
                    handlers::ENGINE_QUIT,
                    EditMode::None,
                    "leave level",
                ),
            ],
        }
    }

    fn matched_key(grammar: &Grammar, line: &str, level: &str) -> Option<String> {
        match grammar.resolve(line, level) {
            Resolution::Matched { command, .. } => Some(command.key.clone()),
            _ => None,
        }
    }

    #[test]
    fn load_appends_help_and_exit() {
        let grammar = Grammar::load(&table()).expect("load");
        assert!(grammar.command("help").is_some());
        assert!(grammar.command("exit").is_some());
        assert_eq!(grammar.unknown_command(), "% Unknown");
    }

    #[test]
    fn resolve_respects_prompt_filter() {
        let grammar = Grammar::load(&table()).expect("load");
        assert_eq!(matched_key(&grammar, "di c", "enable").as_deref(), Some("display clock"));
        assert!(matches!(
            grammar.resolve("di c", "initial"),
            Resolution::FilteredOut { .. }
        ));
        assert!(matches!(grammar.resolve("reboot", "initial"), Resolution::Unknown));
    }

    #[test]
    fn alias_keeps_own_filter_and_borrows_action() {
        let grammar = Grammar::load(&table()).expect("load");
        let alias = grammar.command("show clock").expect("alias");
        assert_eq!(alias.alias_of.as_deref(), Some("display clock"));
        assert_eq!(alias.help, "show time");
        assert!(matches!(
            &alias.action,
            Action::Static { output: Some(text), .. } if text == "12:00"
        ));
        assert_eq!(matched_key(&grammar, "sh c", "initial").as_deref(), Some("show clock"));
        assert!(matched_key(&grammar, "sh c", "enable").is_none());
    }

    #[test]
    fn exact_key_fallback_for_patternless_entries() {
        let grammar = Grammar::load(&table()).expect("load");
        assert_eq!(matched_key(&grammar, "  help ", "enable").as_deref(), Some("help"));
    }

    #[test]
    fn load_rejects_unknown_handler() {
        let mut table = table();
        table.commands.push(CommandSpec::handled(
            "bogus",
            None,
            None,
            "vendor.missing",
            EditMode::None,
            "",
        ));
        let err = match Grammar::load(&table) {
            Ok(_) => panic!("unknown handler should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, EngineError::UnknownHandler { .. }));
    }

    #[test]
    fn load_rejects_alias_cycles_and_dangling_aliases() {
        let mut cyclic = table();
        cyclic.commands.push(CommandSpec::alias_of("a", None, None, "b"));
        cyclic.commands.push(CommandSpec::alias_of("b", None, None, "a"));
        assert!(matches!(
            Grammar::load(&cyclic),
            Err(EngineError::InvalidCommandTable(_))
        ));

        let mut dangling = table();
        dangling.commands.push(CommandSpec::alias_of("a", None, None, "nowhere"));
        assert!(matches!(
            Grammar::load(&dangling),
            Err(EngineError::InvalidCommandTable(_))
        ));
    }

    #[test]
    fn load_rejects_actionless_entries_and_bad_patterns() {
        let mut actionless = table();
        actionless
            .commands
            .push(CommandSpec::fixed("noop", None, None, None, None, ""));
        assert!(matches!(
            Grammar::load(&actionless),
            Err(EngineError::InvalidCommandTable(_))
        ));

        let mut bad = table();
        bad.commands.push(CommandSpec::fixed(
            "bad",
            Some(r"\S+ x"),
            None,
            Some("x"),
            None,
            "",
        ));
        assert!(matches!(
            Grammar::load(&bad),
            Err(EngineError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn registration_order_breaks_ties() {
        let mut table = table();
        table.commands.insert(
            0,
            CommandSpec::fixed("display", Some(r"di(splay) \S+"), Some(&["enable"]), Some("first"), None, ""),
        );
        let grammar = Grammar::load(&table).expect("load");
        assert_eq!(matched_key(&grammar, "display clock", "enable").as_deref(), Some("display"));
        let report = grammar.diagnose();
        assert!(report.shadowed_commands.contains(&"display clock".to_string()));
    }

    #[test]
    fn diagnose_clean_table() {
        let grammar = Grammar::load(&table()).expect("load");
        let report = grammar.diagnose();
        assert_eq!(report.total_levels, 2);
        assert_eq!(report.alias_commands, vec!["show clock".to_string()]);
        assert!(!report.has_issues(), "{report:?}");
    }

    #[test]
    fn table_json_roundtrip_preserves_entries() {
        let json = table().to_json_pretty().expect("encode");
        let parsed = CommandTable::from_json(&json).expect("decode");
        assert_eq!(parsed, table());
    }
}
