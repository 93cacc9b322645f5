//! # nosim - Virtual Network Device CLI Engine
//!
//! `nosim` simulates the command line of a network device closely enough
//! that automation written against the real box can be exercised against it.
//! Commands are described by a JSON command table, matched with vendor-style
//! abbreviations and dispatched to handlers that read and mutate a shared
//! device state. The bundled table models a Huawei SmartAX GPON OLT.
//!
//! ## Features
//!
//! - **Abbreviation Matching**: `di o i 0/1/0` resolves like `display ont info 0/1/0`
//! - **Prompt State Machine**: user, privileged, config and nested views with parameterised prompts
//! - **Staged Edits**: nested views edit a private working copy until `commit`
//! - **Shared Device State**: every session of a device sees the same committed state
//! - **Hot Reload**: command tables on disk are picked up between commands
//! - **Session Recording**: JSONL transcripts that can be replayed and verified
//!
//! ## Quick Start
//!
//! ```rust
//! use nosim::config::EngineConfig;
//! use nosim::grammar::GrammarRegistry;
//! use nosim::session::Session;
//! use nosim::state::DeviceStore;
//! use nosim::templates;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(GrammarRegistry::builtin("huawei_smartax")?);
//!     let device = Arc::new(DeviceStore::new(templates::sample_state("huawei_smartax")?));
//!
//!     let mut session = Session::new(registry, device, "OLT", EngineConfig::default())?;
//!     session.dispatch("en")?;
//!     assert_eq!(session.prompt().text(), "OLT#");
//!
//!     let response = session.dispatch("di sy s st")?;
//!     assert!(response.output().is_some_and(|out| out.contains("telnet")));
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`grammar::Grammar`] - Compiled command table and abbreviation matcher
//! - [`prompt::PromptMachine`] - Prompt levels and their parent chain
//! - [`state::DeviceStore`] - Shared committed state and the edit lock
//! - [`session::Session`] - Per-connection dispatcher
//! - [`server::DeviceServer`] - Line-oriented TCP transport
//! - [`templates`] - Builtin command tables and sample device states

pub mod config;
pub mod error;
pub mod grammar;
pub mod handlers;
pub mod prompt;
pub mod server;
pub mod session;
pub mod state;
pub mod table;
pub mod templates;
