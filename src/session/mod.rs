//! Interactive CLI sessions.
//!
//! A [`Session`] turns one input line into exactly one [`Response`]. It owns
//! the prompt state, the optional staged edit and the grammar view, and
//! shares the device store with every other session of the same device.
//!
//! # Dispatch
//!
//! 1. Refresh the grammar when hot reload is enabled.
//! 2. Resolve the line at the current prompt level. Lines that resolve to
//!    nothing, or only to commands filtered out at this level, get the
//!    unknown-command text.
//! 3. Run the command. Handler failures and panics are turned into a
//!    response; the session and device state stay usable.
//! 4. Apply the requested transition, opening, committing or discarding the
//!    staged edit as the prompt enters or leaves edit contexts.

use log::{debug, error, trace, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::EngineConfig;
use crate::error::{CommandError, EngineError};
use crate::grammar::{Action, CompiledCommand, EditMode, Grammar, GrammarRegistry, Resolution};
use crate::handlers::{CommandContext, HandlerFn, Transition};
use crate::prompt::{ParentStep, PromptState, substitute_base_prompt};
use crate::state::{DeviceState, DeviceStore, SessionId, StagedEdit};

pub use recording::{
    NormalizeOptions, ReplayContext, ReplayedCommand, SessionEvent, SessionRecordEntry,
    SessionRecordLevel, SessionRecorder, SessionReplayer,
};

mod recording;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// What the transport should do with a dispatched line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Write the text (possibly empty) followed by the prompt.
    Output(String),
    /// Close the connection.
    Terminate,
}

impl Response {
    pub fn output(&self) -> Option<&str> {
        match self {
            Response::Output(text) => Some(text),
            Response::Terminate => None,
        }
    }
}

/// One operator session against a shared device.
pub struct Session {
    id: SessionId,
    base_prompt: String,
    config: EngineConfig,
    registry: Arc<GrammarRegistry>,
    grammar: Arc<Grammar>,
    device: Arc<DeviceStore>,
    prompt: PromptState,
    staged: Option<StagedEdit>,
    recorder: Option<SessionRecorder>,
    closed: bool,
}

impl Session {
    /// Opens a session at the grammar's initial prompt.
    pub fn new(
        registry: Arc<GrammarRegistry>,
        device: Arc<DeviceStore>,
        base_prompt: &str,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let grammar = registry.grammar();
        let prompt = grammar.prompts().initial_state(base_prompt)?;
        let recorder = match config.record_level {
            SessionRecordLevel::Off => None,
            level => Some(SessionRecorder::new(level)),
        };
        let session = Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            base_prompt: base_prompt.to_string(),
            config,
            registry,
            grammar,
            device,
            prompt,
            staged: None,
            recorder,
            closed: false,
        };
        debug!(
            "session {} opened on '{}' at '{}'",
            session.id,
            session.grammar.device_type(),
            session.prompt
        );
        session.record(SessionEvent::SessionOpened {
            device_type: session.grammar.device_type().to_string(),
            base_prompt: session.base_prompt.clone(),
            prompt_after: session.prompt.text().to_string(),
        })?;
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn base_prompt(&self) -> &str {
        &self.base_prompt
    }

    pub fn prompt(&self) -> &PromptState {
        &self.prompt
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    pub fn device(&self) -> &Arc<DeviceStore> {
        &self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn has_staged_edit(&self) -> bool {
        self.staged.is_some()
    }

    /// The staged working copy, when an edit is open.
    pub fn staged_state(&self) -> Option<&DeviceState> {
        self.staged.as_ref().map(StagedEdit::state)
    }

    /// Connection banner with `{base_prompt}` substituted.
    pub fn intro(&self) -> String {
        self.render(&self.config.intro)
    }

    /// Dispatches one input line.
    ///
    /// Only prompt contract violations and recorder failures are returned
    /// as errors; every other outcome is a [`Response`].
    pub fn dispatch(&mut self, line: &str) -> Result<Response, EngineError> {
        if self.closed {
            return Ok(Response::Terminate);
        }
        self.reload()?;

        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(Response::Output(String::new()));
        }

        let prompt_before = self.prompt.text().to_string();
        let grammar = Arc::clone(&self.grammar);
        let (key, outcome) = match grammar.resolve(line, self.prompt.level()) {
            Resolution::Matched { command, args } => {
                debug!(
                    "session {}: '{line}' -> '{}' at '{}'",
                    self.id,
                    command.key,
                    self.prompt.level()
                );
                (Some(command.key.clone()), self.run(&grammar, command, &args)?)
            }
            Resolution::FilteredOut { keys } => {
                warn!(
                    "session {}: '{line}' matches {keys:?} which are not valid at '{}'",
                    self.id,
                    self.prompt.level()
                );
                (None, Some(grammar.unknown_command().to_string()))
            }
            Resolution::Unknown => {
                debug!("session {}: unknown command '{line}'", self.id);
                (None, Some(grammar.unknown_command().to_string()))
            }
        };

        match outcome {
            Some(text) => {
                let output = self.render(&text);
                self.record(SessionEvent::CommandDispatched {
                    line: line.to_string(),
                    key,
                    prompt_before,
                    prompt_after: self.prompt.text().to_string(),
                    output: output.clone(),
                    terminated: false,
                })?;
                Ok(Response::Output(output))
            }
            None => {
                self.record(SessionEvent::CommandDispatched {
                    line: line.to_string(),
                    key,
                    prompt_before: prompt_before.clone(),
                    prompt_after: prompt_before,
                    output: String::new(),
                    terminated: true,
                })?;
                self.close("terminated by command")?;
                Ok(Response::Terminate)
            }
        }
    }

    /// Ends the session, discarding any staged edit.
    pub fn close(&mut self, reason: &str) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.discard_staged(reason)?;
        self.closed = true;
        debug!("session {} closed: {reason}", self.id);
        self.record(SessionEvent::SessionClosed {
            reason: reason.to_string(),
            prompt_before: Some(self.prompt.text().to_string()),
        })
    }

    /// Runs a resolved command. `None` means the session terminates.
    fn run(
        &mut self,
        grammar: &Grammar,
        command: &CompiledCommand,
        args: &str,
    ) -> Result<Option<String>, EngineError> {
        match &command.action {
            Action::Static { output, new_prompt } => {
                if let Some(level) = new_prompt
                    && let Some(err) = self.enter(level, &BTreeMap::new())?
                {
                    return Ok(Some(err.to_string()));
                }
                Ok(Some(output.clone().unwrap_or_default()))
            }
            Action::Handler { name, func } => self.run_handler(grammar, command, name, *func, args),
        }
    }

    fn run_handler(
        &mut self,
        grammar: &Grammar,
        command: &CompiledCommand,
        name: &str,
        func: HandlerFn,
        args: &str,
    ) -> Result<Option<String>, EngineError> {
        let mut opened_here = false;
        match command.edit {
            EditMode::Open if self.staged.is_none() => match self.device.open_edit(self.id) {
                Ok(edit) => {
                    self.adopt_staged(edit)?;
                    opened_here = true;
                }
                Err(err) => {
                    debug!("session {}: cannot open edit: {err}", self.id);
                    return Ok(Some(err.to_string()));
                }
            },
            EditMode::Staged if self.staged.is_none() => {
                return Ok(Some(
                    CommandError::Rejected("No configuration is being edited".to_string())
                        .to_string(),
                ));
            }
            _ => {}
        }

        let result = {
            let mut ctx = CommandContext::new(
                &self.base_prompt,
                &self.prompt,
                &command.key,
                args,
                grammar,
                command.edit,
                self.id,
                &self.device,
                self.staged.as_mut(),
            );
            panic::catch_unwind(AssertUnwindSafe(|| func(&mut ctx)))
        };

        let reply = match result {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                debug!("session {}: '{}' failed: {err}", self.id, command.key);
                if opened_here {
                    self.discard_staged("command failed")?;
                }
                return Ok(Some(err.to_string()));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("handler '{name}' panicked on '{}': {message}", command.key);
                if opened_here {
                    self.discard_staged("handler fault")?;
                }
                return Ok(Some(
                    CommandError::Internal(format!("command '{}' failed: {message}", command.key))
                        .to_string(),
                ));
            }
        };

        let output = reply.output;
        match reply.transition {
            Transition::Stay => {
                if opened_here {
                    self.discard_staged("no edit context entered")?;
                }
                Ok(Some(output))
            }
            Transition::Enter { level, params } => match self.enter(&level, &params)? {
                Some(err) => Ok(Some(err.to_string())),
                None => Ok(Some(output)),
            },
            Transition::Parent => {
                if self.leave()? {
                    Ok(Some(output))
                } else {
                    Ok(None)
                }
            }
            Transition::Commit => self.commit(output),
            Transition::Terminate => Ok(None),
        }
    }

    /// Moves to `level`. Entering an edit context opens a staged edit if
    /// none is open; leaving all edit contexts discards it.
    fn enter(
        &mut self,
        level: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Option<CommandError>, EngineError> {
        let next = self
            .grammar
            .prompts()
            .instantiate(level, &self.base_prompt, params)?;
        if self.grammar.prompts().is_edit_context(level) {
            if self.staged.is_none() {
                match self.device.open_edit(self.id) {
                    Ok(edit) => self.adopt_staged(edit)?,
                    Err(err) => return Ok(Some(err)),
                }
            }
        } else {
            self.discard_staged("left edit context")?;
        }
        self.set_prompt(next)?;
        Ok(None)
    }

    /// Moves to the parent level. Returns `false` when the level has no
    /// parent and the session must end.
    fn leave(&mut self) -> Result<bool, EngineError> {
        match self.grammar.prompts().parent(&self.prompt, &self.base_prompt)? {
            ParentStep::Level(next) => {
                if !self.grammar.prompts().is_edit_context(next.level()) {
                    self.discard_staged("left edit context")?;
                }
                self.set_prompt(next)?;
                Ok(true)
            }
            ParentStep::Terminate => Ok(false),
        }
    }

    fn commit(&mut self, output: String) -> Result<Option<String>, EngineError> {
        let Some(edit) = self.staged.take() else {
            return Ok(Some(
                CommandError::Rejected("No configuration is being edited".to_string())
                    .to_string(),
            ));
        };
        match edit.commit() {
            Ok(generation) => {
                debug!("session {} committed generation {generation}", self.id);
                self.record(SessionEvent::StagedEditCommitted { generation })?;
                if self.leave()? {
                    Ok(Some(output))
                } else {
                    Ok(None)
                }
            }
            Err((edit, err)) => {
                debug!("session {}: commit refused: {err}", self.id);
                self.staged = Some(edit);
                Ok(Some(err.to_string()))
            }
        }
    }

    fn adopt_staged(&mut self, edit: StagedEdit) -> Result<(), EngineError> {
        let base_generation = edit.base_generation();
        self.staged = Some(edit);
        trace!("session {} opened staged edit at generation {base_generation}", self.id);
        self.record(SessionEvent::StagedEditOpened { base_generation })
    }

    fn discard_staged(&mut self, reason: &str) -> Result<(), EngineError> {
        if let Some(edit) = self.staged.take() {
            edit.discard();
            trace!("session {} discarded staged edit: {reason}", self.id);
            self.record(SessionEvent::StagedEditDiscarded {
                reason: reason.to_string(),
            })?;
        }
        Ok(())
    }

    fn set_prompt(&mut self, next: PromptState) -> Result<(), EngineError> {
        if next == self.prompt {
            self.prompt = next;
            return Ok(());
        }
        trace!("session {}: prompt '{}' -> '{}'", self.id, self.prompt, next);
        self.prompt = next;
        self.record(SessionEvent::PromptChanged {
            prompt: self.prompt.text().to_string(),
        })
    }

    /// Swaps in a newer grammar between commands, keeping the prompt level
    /// and its parameters. A level the new grammar no longer declares sends
    /// the session back to the initial prompt.
    fn reload(&mut self) -> Result<(), EngineError> {
        if !self.config.reload_commands {
            return Ok(());
        }
        let latest = self.registry.refresh();
        if Arc::ptr_eq(&latest, &self.grammar) {
            return Ok(());
        }
        let prompts = latest.prompts();
        let next = match prompts.instantiate(
            self.prompt.level(),
            &self.base_prompt,
            self.prompt.params(),
        ) {
            Ok(next) => next,
            Err(err) => {
                warn!(
                    "session {}: prompt '{}' does not survive reload ({err}); returning to initial",
                    self.id, self.prompt
                );
                prompts.initial_state(&self.base_prompt)?
            }
        };
        let keep_edit = prompts.is_edit_context(next.level());
        debug!(
            "session {} reloaded grammar '{}' ({} commands)",
            self.id,
            latest.device_type(),
            latest.commands().len()
        );
        self.record(SessionEvent::GrammarReloaded {
            device_type: latest.device_type().to_string(),
            commands: latest.commands().len(),
        })?;
        self.grammar = latest;
        if !keep_edit {
            self.discard_staged("grammar reloaded")?;
        }
        self.set_prompt(next)
    }

    fn render(&self, text: &str) -> String {
        let text = substitute_base_prompt(text, &self.base_prompt);
        normalize_newlines(&text, &self.config.newline)
    }

    fn record(&self, event: SessionEvent) -> Result<(), EngineError> {
        match &self.recorder {
            Some(recorder) => recorder.record_event(event),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close("session dropped") {
            warn!("session {}: close on drop failed: {err}", self.id);
        }
    }
}

/// Joins `text` lines with `newline`, whatever separator the text used.
pub fn normalize_newlines(text: &str, newline: &str) -> String {
    if !text.contains('\n') {
        return text.to_string();
    }
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect::<Vec<_>>()
        .join(newline)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Serialisable snapshot of a session, used by transports for status lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionSummary {
    pub id: SessionId,
    pub prompt: String,
    pub level: String,
    pub editing: bool,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            prompt: session.prompt.text().to_string(),
            level: session.prompt.level().to_string(),
            editing: session.staged.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates;

    fn session() -> Session {
        let registry = Arc::new(GrammarRegistry::builtin("huawei_smartax").expect("grammar"));
        let device = Arc::new(DeviceStore::new(
            templates::sample_state("huawei_smartax").expect("sample"),
        ));
        Session::new(registry, device, "OLT", EngineConfig::default()).expect("session")
    }

    fn faulting_session() -> Session {
        use crate::grammar::CommandSpec;
        use crate::handlers::TEST_FAULT;

        let mut table = templates::by_name("huawei_smartax").expect("table");
        table.commands.insert(
            0,
            CommandSpec::handled(
                "fault",
                Some("fa(ult)"),
                Some(&[templates::LEVEL_ENABLE]),
                TEST_FAULT,
                EditMode::None,
                "",
            ),
        );
        table.commands.insert(
            0,
            CommandSpec::handled(
                "fault edit",
                Some("fa(ult) e(dit)"),
                Some(&[templates::LEVEL_CONFIG]),
                TEST_FAULT,
                EditMode::Open,
                "",
            ),
        );
        let registry = Arc::new(GrammarRegistry::from_table(&table).expect("grammar"));
        let device = Arc::new(DeviceStore::new(
            templates::sample_state("huawei_smartax").expect("sample"),
        ));
        Session::new(registry, device, "OLT", EngineConfig::default()).expect("session")
    }

    #[test]
    fn handler_panic_is_reported_and_session_continues() {
        let mut s = faulting_session();
        s.dispatch("enable").expect("enable");

        let out = s.dispatch("fa").expect("fault is contained");
        let text = out.output().expect("fault output");
        assert!(text.starts_with("  Error: command 'fault' failed"), "{text}");
        assert!(text.contains("fault injected"), "{text}");
        assert_eq!(s.prompt().text(), "OLT#");
        assert!(!s.is_closed());

        s.dispatch("conf").expect("next line");
        assert_eq!(s.prompt().text(), "OLT(config)#");
    }

    #[test]
    fn handler_panic_discards_the_edit_it_opened() {
        let mut s = faulting_session();
        s.dispatch("enable").expect("enable");
        s.dispatch("config").expect("config");
        let before = s.device().snapshot().fingerprint();

        let out = s.dispatch("fault edit").expect("fault is contained");
        assert!(out.output().is_some_and(|o| o.starts_with("  Error:")));
        assert_eq!(s.prompt().text(), "OLT(config)#");
        assert!(!s.has_staged_edit());
        assert_eq!(s.device().edit_owner(), None);
        assert_eq!(s.device().snapshot().fingerprint(), before);

        s.dispatch("interface gpon 0/1").expect("edit after fault");
        assert!(s.has_staged_edit());
    }

    #[test]
    fn normalize_newlines_rewrites_separators() {
        assert_eq!(normalize_newlines("a\nb\r\nc", "\r\n"), "a\r\nb\r\nc");
        assert_eq!(normalize_newlines("single", "\r\n"), "single");
    }

    #[test]
    fn empty_line_produces_empty_output() {
        let mut s = session();
        assert_eq!(s.dispatch("   ").expect("dispatch"), Response::Output(String::new()));
        assert_eq!(s.prompt().text(), "OLT>");
    }

    #[test]
    fn static_commands_move_between_levels() {
        let mut s = session();
        s.dispatch("en").expect("enable");
        assert_eq!(s.prompt().text(), "OLT#");
        s.dispatch("conf").expect("config");
        assert_eq!(s.prompt().text(), "OLT(config)#");
    }

    #[test]
    fn quit_from_initial_terminates() {
        let mut s = session();
        assert_eq!(s.dispatch("quit").expect("quit"), Response::Terminate);
        assert!(s.is_closed());
        assert_eq!(s.dispatch("enable").expect("after close"), Response::Terminate);
    }

    #[test]
    fn exit_terminates_from_any_level() {
        let mut s = session();
        s.dispatch("enable").expect("enable");
        s.dispatch("config").expect("config");
        assert_eq!(s.dispatch("exit").expect("exit"), Response::Terminate);
    }

    #[test]
    fn help_lists_only_current_level_commands() {
        let mut s = session();
        let out = match s.dispatch("help").expect("help") {
            Response::Output(text) => text,
            Response::Terminate => panic!("help should not terminate"),
        };
        assert!(out.contains("enable"));
        assert!(!out.contains("dba-profile add"));
    }

    #[test]
    fn leaving_edit_context_discards_staged_edit() {
        let mut s = session();
        s.dispatch("enable").expect("enable");
        s.dispatch("config").expect("config");
        s.dispatch("ont-lineprofile gpon profile-id 1").expect("enter");
        assert!(s.has_staged_edit());
        s.dispatch("quit").expect("quit");
        assert!(!s.has_staged_edit());
        assert_eq!(s.device().edit_owner(), None);
    }

    #[test]
    fn failed_open_command_releases_lock() {
        let mut s = session();
        s.dispatch("enable").expect("enable");
        s.dispatch("config").expect("config");
        let out = s.dispatch("interface gpon 0/5").expect("dispatch");
        assert!(out.output().is_some_and(|o| o.contains("Failure")));
        assert_eq!(s.prompt().text(), "OLT(config)#");
        assert!(!s.has_staged_edit());
        assert_eq!(s.device().edit_owner(), None);
    }

    #[test]
    fn recorder_captures_dispatches() {
        let registry = Arc::new(GrammarRegistry::builtin("huawei_smartax").expect("grammar"));
        let device = Arc::new(DeviceStore::new(
            templates::sample_state("huawei_smartax").expect("sample"),
        ));
        let config = EngineConfig {
            record_level: SessionRecordLevel::Commands,
            ..EngineConfig::default()
        };
        let mut s = Session::new(registry, device, "OLT", config).expect("session");
        s.dispatch("enable").expect("enable");
        let entries = s.recorder().expect("recorder").entries().expect("entries");
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            &entries[1].event,
            SessionEvent::CommandDispatched { key: Some(key), prompt_after, .. }
                if key == "enable" && prompt_after == "OLT#"
        ));
    }
}
