//! Error types for the command engine.
//!
//! [`EngineError`] covers everything that stops the engine from working at
//! all: bad command tables, bad device documents, and prompt contract
//! violations. [`CommandError`] covers failures of a single command; its
//! `Display` output is exactly the line written back to the operator.

use thiserror::Error;

/// Fatal or load-time errors raised by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A `quit` was dispatched from a prompt level the machine does not know.
    ///
    /// This is a programming error in the command table or a handler and is
    /// never converted into a response.
    #[error("prompt contract violation: {0}")]
    PromptContract(String),

    /// The command table is structurally invalid.
    #[error("invalid command table: {0}")]
    InvalidCommandTable(String),

    /// An abbreviation pattern could not be compiled.
    #[error("invalid pattern for '{key}': {reason}")]
    InvalidPattern { key: String, reason: String },

    /// A command references a handler that is not registered.
    #[error("unknown handler '{handler}' for command '{key}'")]
    UnknownHandler { key: String, handler: String },

    /// No builtin grammar exists under this name.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The device-state document is malformed or breaks an invariant.
    #[error("invalid device document: {0}")]
    InvalidDeviceDocument(String),

    /// A recorded transcript does not match what the engine produced.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),

    /// Shared state was unusable.
    #[error("internal error: {0}")]
    InternalServerError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// Failure of one command. The session and device state stay usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Malformed or out-of-range operator input.
    #[error("  Failure: {0}")]
    InvalidInput(String),

    /// A referenced entity does not exist.
    #[error("  Failure: {0}")]
    MissingReference(String),

    /// The entity being created already exists.
    #[error("  Failure: {0}")]
    Duplicate(String),

    /// Another session holds the device edit lock.
    #[error("  Failure: The configuration is locked by another terminal")]
    Busy,

    /// The command is not allowed in the current context.
    #[error("  Failure: {0}")]
    Rejected(String),

    /// A handler fault that was contained by the dispatcher.
    #[error("  Error: {0}")]
    Internal(String),
}
