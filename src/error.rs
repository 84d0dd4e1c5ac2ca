// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the Flotilla coordinator.
//!
//! This module provides strongly-typed errors for each subsystem, using
//! `thiserror` for ergonomic error definitions and `anyhow` for error
//! propagation. Expected coordination outcomes (a lost claim race, a denied
//! spawn) are modeled as ordinary return values, not errors; the enums here
//! cover genuine failures.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the file-lock primitive.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock contended after {attempts} attempts: {path}")]
    Contended { path: PathBuf, attempts: u32 },

    #[error("IO error on lock {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Errors from the message envelope codec.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message content is {len} bytes, exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },

    #[error("Message content contains the reserved marker {0} on its own line")]
    ReservedMarker(&'static str),
}

/// Errors from the shared task board.
#[derive(Error, Debug)]
pub enum BoardError {
    #[error("Task not found: {0}")]
    UnknownTask(String),

    #[error("Invalid task: {0}")]
    Validation(String),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Task board file corrupted: {0}")]
    Corrupted(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BoardError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors from per-agent mailboxes.
#[derive(Error, Debug)]
pub enum MailboxError {
    #[error("Message content is {len} bytes, exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },

    #[error("Message not found: {0}")]
    UnknownMessage(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Mailbox file corrupted: {0}")]
    Corrupted(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for MailboxError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors from the team directory.
#[derive(Error, Debug)]
pub enum TeamError {
    #[error("Invalid team name: {0}")]
    InvalidName(String),

    #[error("Team already exists: {0}")]
    AlreadyExists(String),

    #[error("Team not found: {0}")]
    NotFound(String),

    #[error("Agent {agent} is not the lead of team {team}")]
    NotLead { team: String, agent: String },

    #[error("Agent {agent} is not a member of team {team}")]
    NotMember { team: String, agent: String },

    #[error("Member not found in team {team}: {agent}")]
    UnknownMember { team: String, agent: String },

    #[error("Agent {agent} is already a member of team {team}")]
    DuplicateMember { team: String, agent: String },

    #[error("Team {team} still has {count} active member(s); shut them down or force delete")]
    ActiveMembers { team: String, count: usize },

    #[error("Member {agent} of team {team} is still active; request shutdown first")]
    MemberActive { team: String, agent: String },

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Team config corrupted: {0}")]
    Corrupted(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TeamError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors from the external worker runtime boundary.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Worker runtime unreachable: {0}")]
    Unreachable(String),

    #[error("Unknown worker handle: {0}")]
    UnknownHandle(String),

    #[error("Worker spawn failed: {0}")]
    SpawnFailed(String),
}

/// Errors from the session manager.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Normal backpressure signal, surfaced as an error only so callers
    /// cannot miss it; tool handlers report it as an ordinary rejection.
    #[error("Spawn rejected: {0}")]
    CapacityRejected(String),

    #[error("Session not found for task: {0}")]
    UnknownTask(String),

    #[error("Task already has a session: {0}")]
    DuplicateTask(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Team error: {0}")]
    Team(#[from] TeamError),
}

/// Errors that can occur during tool execution.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_display() {
        let err = LockError::Contended {
            path: PathBuf::from("/tmp/tasks.json.lock"),
            attempts: 5,
        };
        let display = format!("{err}");
        assert!(display.contains("5 attempts"));
        assert!(display.contains("tasks.json.lock"));
    }

    #[test]
    fn test_board_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let board_err: BoardError = io_err.into();
        assert!(matches!(board_err, BoardError::Io(_)));
    }

    #[test]
    fn test_team_error_active_members() {
        let err = TeamError::ActiveMembers {
            team: "sprint-review".to_string(),
            count: 2,
        };
        let display = format!("{err}");
        assert!(display.contains("2 active member"));
        assert!(display.contains("force delete"));
    }

    #[test]
    fn test_session_error_from_runtime() {
        let runtime_err = RuntimeError::Unreachable("socket closed".to_string());
        let session_err: SessionError = runtime_err.into();
        assert!(matches!(session_err, SessionError::Runtime(_)));
    }

    #[test]
    fn test_oversized_display() {
        let err = MailboxError::Oversized {
            len: 20_000,
            max: 10_240,
        };
        let display = format!("{err}");
        assert!(display.contains("20000"));
        assert!(display.contains("10240"));
    }
}
