//! Command handlers.
//!
//! A handler is a plain function from a [`CommandContext`] to a [`Reply`].
//! It reads device state through the context and mutates it only through
//! [`CommandContext::mutate`], which routes the change to the session's
//! staged copy or to a direct commit according to the command's
//! [`EditMode`]. Handlers never touch session state; prompt changes are
//! requested with a [`Transition`] and applied by the dispatcher.
//!
//! Handlers are registered by name in a static table so command tables can
//! refer to them from JSON.

pub mod huawei_smartax;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

use crate::error::CommandError;
use crate::grammar::{EditMode, Grammar};
use crate::prompt::PromptState;
use crate::state::{DeviceState, DeviceStore, SessionId, StagedEdit};

pub const ENGINE_QUIT: &str = "engine.quit";
pub const ENGINE_COMMIT: &str = "engine.commit";
pub const ENGINE_HELP: &str = "engine.help";
pub const ENGINE_EXIT: &str = "engine.exit";

pub type HandlerFn = fn(&mut CommandContext<'_>) -> Result<Reply, CommandError>;

/// Prompt change requested by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Transition {
    #[default]
    Stay,
    /// Move to `level`, instantiated with `params`.
    Enter {
        level: String,
        params: BTreeMap<String, String>,
    },
    /// Move to the parent level, discarding any staged edit when the parent
    /// is not an edit context.
    Parent,
    /// Commit the staged edit, then move to the parent level.
    Commit,
    /// End the session.
    Terminate,
}

/// Handler result: response text plus the transition to apply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    pub output: String,
    pub transition: Transition,
}

impl Reply {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            transition: Transition::Stay,
        }
    }

    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = lines
            .into_iter()
            .map(|line| line.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        Self::text(joined)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transition = transition;
        self
    }

    pub fn enter(level: &str, params: &[(&str, String)]) -> Self {
        Self::empty().transition(Transition::Enter {
            level: level.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        })
    }
}

/// Everything a handler may see for one dispatched line.
pub struct CommandContext<'a> {
    pub base_prompt: &'a str,
    pub prompt: &'a PromptState,
    /// Canonical key of the resolved command.
    pub key: &'a str,
    /// Trailing free-form arguments, trimmed.
    pub args: &'a str,
    pub grammar: &'a Grammar,
    /// Wall clock for the dispatch.
    pub now: DateTime<Utc>,
    edit: EditMode,
    session: SessionId,
    store: &'a DeviceStore,
    snapshot: Arc<DeviceState>,
    staged: Option<&'a mut StagedEdit>,
}

impl<'a> CommandContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        base_prompt: &'a str,
        prompt: &'a PromptState,
        key: &'a str,
        args: &'a str,
        grammar: &'a Grammar,
        edit: EditMode,
        session: SessionId,
        store: &'a DeviceStore,
        staged: Option<&'a mut StagedEdit>,
    ) -> Self {
        Self {
            base_prompt,
            prompt,
            key,
            args,
            grammar,
            now: Utc::now(),
            edit,
            session,
            store,
            snapshot: store.snapshot(),
            staged,
        }
    }

    /// State the command sees: the staged copy when one is open, otherwise
    /// the canonical snapshot taken at dispatch.
    pub fn state(&self) -> &DeviceState {
        match &self.staged {
            Some(edit) => edit.state(),
            None => &self.snapshot,
        }
    }

    pub fn has_staged_edit(&self) -> bool {
        self.staged.is_some()
    }

    pub fn edit_mode(&self) -> EditMode {
        self.edit
    }

    /// Prompt parameter captured by the command that entered this level.
    pub fn param(&self, name: &str) -> Result<&str, CommandError> {
        self.prompt
            .param(name)
            .ok_or_else(|| CommandError::Internal(format!("prompt parameter '{name}' is not set")))
    }

    /// Same as [`Self::param`], parsed as a number.
    pub fn param_u32(&self, name: &str) -> Result<u32, CommandError> {
        let raw = self.param(name)?;
        raw.parse::<u32>()
            .map_err(|_| CommandError::Internal(format!("prompt parameter '{name}' is not numeric")))
    }

    /// Applies `f` atomically. With a staged edit open the change lands in
    /// the staged copy; otherwise `Direct` commands commit immediately.
    pub fn mutate<T, F>(&mut self, f: F) -> Result<T, CommandError>
    where
        F: FnOnce(&mut DeviceState) -> Result<T, CommandError>,
    {
        if self.edit == EditMode::None {
            return Err(CommandError::Internal(format!(
                "command '{}' is not declared as mutating",
                self.key
            )));
        }
        if let Some(edit) = self.staged.as_deref_mut() {
            return edit.apply(f);
        }
        if self.edit != EditMode::Direct {
            return Err(CommandError::Rejected(
                "No configuration is being edited".to_string(),
            ));
        }
        let out = self.store.apply(self.session, f)?;
        self.snapshot = self.store.snapshot();
        Ok(out)
    }
}

struct HandlerEntry {
    func: HandlerFn,
    /// Prompt levels the handler may enter.
    enters: &'static [&'static str],
}

static HANDLERS: Lazy<HashMap<&'static str, HandlerEntry>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(ENGINE_QUIT, HandlerEntry { func: quit, enters: &[] });
    map.insert(ENGINE_COMMIT, HandlerEntry { func: commit, enters: &[] });
    map.insert(ENGINE_HELP, HandlerEntry { func: help, enters: &[] });
    map.insert(ENGINE_EXIT, HandlerEntry { func: exit, enters: &[] });
    for (name, func, enters) in huawei_smartax::handlers() {
        map.insert(name, HandlerEntry { func, enters });
    }
    #[cfg(test)]
    map.insert(TEST_FAULT, HandlerEntry { func: fault, enters: &[] });
    map
});

/// Handler that always panics, for exercising fault containment.
#[cfg(test)]
pub(crate) const TEST_FAULT: &str = "test.fault";

#[cfg(test)]
fn fault(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    panic!("fault injected into '{}'", ctx.key);
}

/// Resolves a registered handler name.
pub fn lookup(name: &str) -> Option<HandlerFn> {
    HANDLERS.get(name).map(|entry| entry.func)
}

/// Levels a handler declares it can enter, used by grammar diagnostics.
pub fn declared_targets(name: &str) -> &'static [&'static str] {
    HANDLERS.get(name).map(|entry| entry.enters).unwrap_or(&[])
}

/// Every registered handler name, sorted.
pub fn handler_names() -> Vec<&'static str> {
    let mut names = HANDLERS.keys().copied().collect::<Vec<_>>();
    names.sort_unstable();
    names
}

fn quit(_ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    Ok(Reply::empty().transition(Transition::Parent))
}

fn commit(_ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    Ok(Reply::empty().transition(Transition::Commit))
}

fn exit(_ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    Ok(Reply::empty().transition(Transition::Terminate))
}

fn help(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let commands = ctx.grammar.commands_for(ctx.prompt.level()).collect::<Vec<_>>();
    let width = commands.iter().map(|c| c.key.len()).max().unwrap_or(0) + 2;
    Ok(Reply::lines(
        commands
            .iter()
            .map(|c| format!("{:<width$}{}", c.key, c.help).trim_end().to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_handlers_are_registered() {
        for name in [ENGINE_QUIT, ENGINE_COMMIT, ENGINE_HELP, ENGINE_EXIT] {
            assert!(lookup(name).is_some(), "{name}");
        }
        assert!(lookup("engine.reboot").is_none());
    }

    #[test]
    fn handler_names_are_sorted_and_include_vendor_handlers() {
        let names = handler_names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert!(names.iter().any(|n| n.starts_with("huawei_smartax.")));
    }

    #[test]
    fn reply_lines_join_with_newline() {
        let reply = Reply::lines(["a", "b"]);
        assert_eq!(reply.output, "a\nb");
        assert_eq!(reply.transition, Transition::Stay);
    }
}
