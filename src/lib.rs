// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Flotilla - file-backed coordination for teams of worker agents.
//!
//! A lead agent spawns workers through an external runtime, organizes them
//! into named teams, and coordinates their work through shared on-disk
//! state: a task board with dependency gating, per-agent mailboxes, and a
//! team roster. Everything crosses process boundaries as plain files and
//! text, so any host that can read a transcript can participate.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Shared primitives (ids, timestamps, worker categories)
//! - [`error`] - Error types and result aliases
//! - [`config`] - Coordinator configuration and defaults
//! - [`persist`] - Atomic JSON persistence and advisory file locks
//! - [`telemetry`] - Tracing and observability infrastructure
//! - [`protocol`] - Text-embedded message envelopes for worker transcripts
//! - [`team`] - Team directory: membership, lead authority, state layout
//! - [`board`] - Shared task board with atomic claims and dependency gating
//! - [`mailbox`] - Per-agent mailboxes and the shutdown exchange
//! - [`runtime`] - Abstraction over the external worker runtime
//! - [`registry`] - Agent registry and spawn admission
//! - [`resources`] - Host resource sampling and spawn throttling
//! - [`session`] - Worker session lifecycle: spawn, poll, abort, wait
//! - [`tools`] - Tool handlers and registries for lead and teammate agents
//!
//! # Example
//!
//! ```rust,ignore
//! use flotilla::config::CoordinatorConfig;
//! use flotilla::session::SessionManager;
//! use flotilla::team::TeamDirectory;
//! use flotilla::tools::{ToolContext, ToolRegistry};
//!
//! let config = CoordinatorConfig::for_project(project_root);
//! let teams = Arc::new(TeamDirectory::new(config.coordination_root.clone(), config.lock));
//! let sessions = Arc::new(SessionManager::new(config, runtime, Arc::clone(&teams)));
//!
//! let ctx = ToolContext::new("my-team", "coordinator", sessions, teams);
//! let tools = ToolRegistry::for_lead(&ctx);
//! ```

pub mod board;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod persist;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod runtime;
pub mod session;
pub mod team;
pub mod telemetry;
pub mod tools;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{
    BoardError, LockError, MailboxError, ProtocolError, Result, RuntimeError, SessionError,
    TeamError, ToolError,
};
pub use session::{AgentDefinition, SessionManager, SessionStatus, TaskSession};
pub use tools::{ToolContext, ToolOutput, ToolRegistry};
pub use types::{WorkerCategory, COORDINATOR_ID};

/// Flotilla version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let category: WorkerCategory = "review".parse().unwrap();
        assert_eq!(category, WorkerCategory::Review);
        assert_eq!(COORDINATOR_ID, "coordinator");
    }
}
