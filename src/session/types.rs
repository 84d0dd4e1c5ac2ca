// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::WorkerCategory;

/// Lifecycle state of a worker session.
///
/// Terminal states are final: once a session reaches one, later poll results
/// and duplicate abort calls are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but the task has not been dispatched yet.
    Starting,
    /// Task dispatched; the poller is watching for completion.
    Running,
    Completed,
    Error,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Aborted)
    }
}

/// Static description of a worker to spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub agent_id: String,
    pub display_name: String,
    pub category: WorkerCategory,
    pub system_prompt: String,
    /// Model override; the runtime's default applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// The coordinator-side record of one worker session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSession {
    pub agent_id: String,
    /// Opaque handle assigned by the worker runtime.
    pub external_handle: String,
    pub task_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub category: WorkerCategory,
    /// Task-list entry this session is tracked under, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_todo_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionStatus::Starting.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Error.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_session_serialization_uses_camel_case() {
        let session = TaskSession {
            agent_id: "worker-1".to_string(),
            external_handle: "h-1".to_string(),
            task_id: "t-1".to_string(),
            status: SessionStatus::Running,
            started_at: crate::types::now(),
            completed_at: None,
            result: None,
            error: None,
            category: WorkerCategory::Research,
            linked_todo_id: None,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["agentId"], "worker-1");
        assert_eq!(json["externalHandle"], "h-1");
        assert_eq!(json["status"], "running");
        assert!(json.get("completedAt").is_none());
    }
}
