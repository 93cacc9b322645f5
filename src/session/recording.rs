use super::*;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionRecordLevel {
    /// Disable recording.
    #[default]
    Off,
    /// Record session lifecycle and dispatched commands only.
    Commands,
    /// Also record prompt changes, staged edits and grammar reloads.
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep prompt-changed events.
    pub keep_prompt_changed: bool,
    /// Keep staged-edit open/commit/discard events.
    pub keep_edit_events: bool,
    /// Keep grammar-reloaded events.
    pub keep_grammar_reloads: bool,
    /// Replace timestamps with the entry position.
    pub renumber_timestamps: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_prompt_changed: false,
            keep_edit_events: true,
            keep_grammar_reloads: false,
            renumber_timestamps: true,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionOpened {
        device_type: String,
        base_prompt: String,
        prompt_after: String,
    },
    SessionClosed {
        reason: String,
        #[serde(default)]
        prompt_before: Option<String>,
    },
    CommandDispatched {
        line: String,
        /// Resolved command key; absent for unknown or filtered lines.
        #[serde(default)]
        key: Option<String>,
        prompt_before: String,
        prompt_after: String,
        output: String,
        #[serde(default)]
        terminated: bool,
    },
    PromptChanged {
        prompt: String,
    },
    StagedEditOpened {
        base_generation: u64,
    },
    StagedEditCommitted {
        generation: u64,
    },
    StagedEditDiscarded {
        reason: String,
    },
    GrammarReloaded {
        device_type: String,
        commands: usize,
    },
}

impl SessionEvent {
    fn is_detail(&self) -> bool {
        matches!(
            self,
            SessionEvent::PromptChanged { .. }
                | SessionEvent::StagedEditOpened { .. }
                | SessionEvent::StagedEditCommitted { .. }
                | SessionEvent::StagedEditDiscarded { .. }
                | SessionEvent::GrammarReloaded { .. }
        )
    }
}

/// In-memory session recorder.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record an event if the level admits it. Detail events need `Full`.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), EngineError> {
        match self.level {
            SessionRecordLevel::Off => return Ok(()),
            SessionRecordLevel::Commands if event.is_detail() => return Ok(()),
            _ => {}
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| EngineError::InternalServerError(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, EngineError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| EngineError::InternalServerError(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), EngineError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| EngineError::InternalServerError(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, EngineError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry).map_err(|e| {
                EngineError::InternalServerError(format!("record encode error: {e}"))
            })?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, EngineError> {
        let recorder = Self::new(SessionRecordLevel::Full);
        if jsonl.trim().is_empty() {
            return Ok(recorder);
        }

        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line).map_err(|e| {
                EngineError::InternalServerError(format!("record decode error: {e}"))
            })?;
            parsed.push(entry);
        }

        let mut guard = recorder
            .entries
            .lock()
            .map_err(|e| EngineError::InternalServerError(format!("record lock error: {e}")))?;
        *guard = parsed;
        drop(guard);

        Ok(recorder)
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Events are sorted by timestamp, filtered by `options`, and optionally
    /// renumbered so fixtures do not change between runs.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, EngineError> {
        let recorder = Self::from_jsonl(jsonl)?;
        let mut indexed = recorder
            .entries()?
            .into_iter()
            .enumerate()
            .collect::<Vec<(usize, SessionRecordEntry)>>();

        indexed
            .sort_by(|(idx_a, a), (idx_b, b)| a.ts_ms.cmp(&b.ts_ms).then_with(|| idx_a.cmp(idx_b)));

        let mut filtered = indexed
            .into_iter()
            .filter_map(|(_, entry)| match &entry.event {
                SessionEvent::PromptChanged { .. } if !options.keep_prompt_changed => None,
                SessionEvent::StagedEditOpened { .. }
                | SessionEvent::StagedEditCommitted { .. }
                | SessionEvent::StagedEditDiscarded { .. }
                    if !options.keep_edit_events =>
                {
                    None
                }
                SessionEvent::GrammarReloaded { .. } if !options.keep_grammar_reloads => None,
                _ => Some(entry),
            })
            .collect::<Vec<_>>();

        if options.renumber_timestamps {
            for (idx, entry) in filtered.iter_mut().enumerate() {
                entry.ts_ms = idx as u128 + 1;
            }
        }

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(filtered)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// Offline replayer backed by session recording data.
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayContext {
    pub device_type: String,
    pub base_prompt: String,
    pub prompt: String,
}

/// One recorded command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedCommand {
    pub line: String,
    pub key: Option<String>,
    pub prompt_before: String,
    pub prompt_after: String,
    pub output: String,
    pub terminated: bool,
}

impl SessionReplayer {
    /// Build a replayer from a recorder snapshot.
    pub fn from_recorder(recorder: &SessionRecorder) -> Self {
        let entries = recorder.entries().unwrap_or_default();
        Self { entries, cursor: 0 }
    }

    /// Build a replayer from JSONL recording data.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, EngineError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Ok(Self::from_recorder(&recorder))
    }

    /// Returns the session context recorded when the session opened.
    pub fn initial_context(&self) -> Option<ReplayContext> {
        self.entries.iter().find_map(|entry| match &entry.event {
            SessionEvent::SessionOpened {
                device_type,
                base_prompt,
                prompt_after,
            } => Some(ReplayContext {
                device_type: device_type.clone(),
                base_prompt: base_prompt.clone(),
                prompt: prompt_after.clone(),
            }),
            _ => None,
        })
    }

    /// Every recorded command exchange, in order.
    pub fn commands(&self) -> Vec<ReplayedCommand> {
        self.entries.iter().filter_map(|entry| as_command(&entry.event)).collect()
    }

    /// Returns the next recorded exchange for `line`, skipping others.
    pub fn replay_next(&mut self, line: &str) -> Result<ReplayedCommand, EngineError> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;
            if let Some(command) = as_command(&entry.event)
                && command.line == line
            {
                return Ok(command);
            }
        }
        Err(EngineError::ReplayMismatchError(format!(
            "no replayable output found for line '{line}'"
        )))
    }

    /// Re-runs every recorded line against `session` and checks output and
    /// resulting prompt. Returns the number of verified exchanges.
    ///
    /// The first divergence is reported as [`EngineError::ReplayMismatchError`].
    pub fn verify(&self, session: &mut Session) -> Result<usize, EngineError> {
        if let Some(ctx) = self.initial_context()
            && ctx.prompt != session.prompt().text()
        {
            return Err(EngineError::ReplayMismatchError(format!(
                "initial prompt: expected '{}', got '{}'",
                ctx.prompt,
                session.prompt().text()
            )));
        }

        let commands = self.commands();
        for (idx, expected) in commands.iter().enumerate() {
            let response = session.dispatch(&expected.line)?;
            let (output, terminated) = match response {
                Response::Output(text) => (text, false),
                Response::Terminate => (String::new(), true),
            };
            if output != expected.output || terminated != expected.terminated {
                return Err(EngineError::ReplayMismatchError(format!(
                    "exchange {} '{}': expected output {:?}, got {:?}",
                    idx + 1,
                    expected.line,
                    expected.output,
                    output
                )));
            }
            if session.prompt().text() != expected.prompt_after {
                return Err(EngineError::ReplayMismatchError(format!(
                    "exchange {} '{}': expected prompt '{}', got '{}'",
                    idx + 1,
                    expected.line,
                    expected.prompt_after,
                    session.prompt().text()
                )));
            }
        }
        Ok(commands.len())
    }
}

fn as_command(event: &SessionEvent) -> Option<ReplayedCommand> {
    match event {
        SessionEvent::CommandDispatched {
            line,
            key,
            prompt_before,
            prompt_after,
            output,
            terminated,
        } => Some(ReplayedCommand {
            line: line.clone(),
            key: key.clone(),
            prompt_before: prompt_before.clone(),
            prompt_after: prompt_after.clone(),
            output: output.clone(),
            terminated: *terminated,
        }),
        _ => None,
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
