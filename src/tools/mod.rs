// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool surface consumed by coordinating agents.
//!
//! Every team-coordination operation is exposed as a named tool so the
//! agent host can offer it to a model. Two registries exist:
//!
//! - [`ToolRegistry::for_lead`] — team lifecycle and task authoring
//!   (create_team, spawn_teammate, broadcast, create_task, ...)
//! - [`ToolRegistry::for_teammate`] — self-coordination
//!   (claim_task, complete_task, check_messages, approve_shutdown, ...)
//!
//! Handlers validate the caller's membership or leadership before mutating
//! anything and return structured success/error outputs; nothing throws
//! across the tool boundary. Expected coordination outcomes — a lost claim
//! race, a capacity rejection, a contended lock — come back as ordinary
//! failure outputs with actionable text.

pub mod lead;
pub mod registry;
pub mod teammate;

pub use lead::{
    BroadcastHandler, CleanupTeamHandler, CreateTaskHandler, CreateTeamHandler,
    ListTasksHandler, ListTeammatesHandler, MessageTeammateHandler, ShutdownTeammateHandler,
    SpawnTeammateHandler,
};
pub use registry::{DispatchResult, ToolHandler, ToolOutput, ToolRegistry, ToolRegistryBuilder};
pub use teammate::{
    ApproveShutdownHandler, CheckMessagesHandler, ClaimTaskHandler, CompleteTaskHandler,
    GetClaimableTasksHandler, GetTeamMembersHandler, RejectShutdownHandler, SendMessageHandler,
};

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::board::TaskBoard;
use crate::error::{BoardError, MailboxError, TeamError, ToolError};
use crate::mailbox::Mailbox;
use crate::session::SessionManager;
use crate::team::TeamDirectory;

/// JSON Schema for tool input parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String, // Always "object"
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl InputSchema {
    /// Create a new input schema with object type.
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: HashMap::new(),
            required: None,
        }
    }

    /// Add a property to the schema.
    pub fn with_property(mut self, name: impl Into<String>, schema: serde_json::Value) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Mark properties as required.
    pub fn with_required(mut self, required: Vec<String>) -> Self {
        self.required = Some(required);
        self
    }
}

impl Default for InputSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Definition of a tool that can be offered to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: InputSchema::new(),
        }
    }

    /// Set the input schema for this tool.
    pub fn with_schema(mut self, schema: InputSchema) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Parse JSON arguments into a typed struct.
///
/// This is a helper function for tool handlers to deserialize their input.
pub fn parse_arguments<T>(arguments: &serde_json::Value) -> Result<T, ToolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(arguments.clone())
        .map_err(|err| ToolError::InvalidInput(format!("Failed to parse arguments: {err}")))
}

/// The caller identity and component handles every tool handler operates
/// against. One context per (team, agent); the coordinator constructs it
/// explicitly, so nothing here is global state.
pub struct ToolContext {
    /// Team this context is scoped to.
    pub team: String,
    /// Agent on whose behalf tools execute.
    pub agent_id: String,
    pub sessions: Arc<SessionManager>,
    pub teams: Arc<TeamDirectory>,
}

impl ToolContext {
    pub fn new(
        team: impl Into<String>,
        agent_id: impl Into<String>,
        sessions: Arc<SessionManager>,
        teams: Arc<TeamDirectory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            team: team.into(),
            agent_id: agent_id.into(),
            sessions,
            teams,
        })
    }

    /// The context team's task board.
    pub fn board(&self) -> TaskBoard {
        self.teams.board(&self.team)
    }

    /// The context team's mailboxes.
    pub fn mailbox(&self) -> Mailbox {
        self.teams.mailbox(&self.team)
    }

    /// Fail unless the calling agent is the team lead.
    pub(crate) fn ensure_lead(&self) -> Result<(), ToolError> {
        match self.teams.is_team_lead(&self.team, &self.agent_id) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ToolError::PermissionDenied(format!(
                "{} is not the lead of team {}",
                self.agent_id, self.team
            ))),
            Err(err) => Err(team_tool_error(err)),
        }
    }

    /// Fail unless the calling agent is the lead or a registered member.
    pub(crate) fn ensure_member(&self) -> Result<(), ToolError> {
        match self.teams.is_member(&self.team, &self.agent_id) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ToolError::PermissionDenied(format!(
                "{} is not a member of team {}",
                self.agent_id, self.team
            ))),
            Err(err) => Err(team_tool_error(err)),
        }
    }
}

pub(crate) fn team_tool_error(err: TeamError) -> ToolError {
    match err {
        TeamError::NotLead { .. } | TeamError::NotMember { .. } => {
            ToolError::PermissionDenied(err.to_string())
        }
        TeamError::InvalidName(_)
        | TeamError::AlreadyExists(_)
        | TeamError::NotFound(_)
        | TeamError::UnknownMember { .. }
        | TeamError::DuplicateMember { .. }
        | TeamError::ActiveMembers { .. }
        | TeamError::MemberActive { .. } => ToolError::InvalidInput(err.to_string()),
        other => ToolError::ExecutionFailed(other.to_string()),
    }
}

pub(crate) fn board_tool_error(err: BoardError) -> ToolError {
    match err {
        BoardError::UnknownTask(_) | BoardError::Validation(_) => {
            ToolError::InvalidInput(err.to_string())
        }
        other => ToolError::ExecutionFailed(other.to_string()),
    }
}

pub(crate) fn mailbox_tool_error(err: MailboxError) -> ToolError {
    match err {
        MailboxError::Oversized { .. }
        | MailboxError::InvalidRecipient(_)
        | MailboxError::UnknownMessage(_) => ToolError::InvalidInput(err.to_string()),
        other => ToolError::ExecutionFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct SampleArgs {
        task_id: String,
    }

    #[test]
    fn test_parse_arguments() {
        let args: SampleArgs = parse_arguments(&serde_json::json!({"task_id": "t-1"})).unwrap();
        assert_eq!(args.task_id, "t-1");

        let err = parse_arguments::<SampleArgs>(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[test]
    fn test_schema_builder() {
        let def = ToolDefinition::new("claim_task", "Claim a pending task").with_schema(
            InputSchema::new()
                .with_property("task_id", serde_json::json!({"type": "string"}))
                .with_required(vec!["task_id".to_string()]),
        );
        assert_eq!(def.name, "claim_task");
        assert!(def.input_schema.properties.contains_key("task_id"));
        assert_eq!(
            def.input_schema.required,
            Some(vec!["task_id".to_string()])
        );
    }

    #[test]
    fn test_error_mapping() {
        let err = team_tool_error(TeamError::NotLead {
            team: "alpha".to_string(),
            agent: "w1".to_string(),
        });
        assert!(matches!(err, ToolError::PermissionDenied(_)));

        let err = board_tool_error(BoardError::UnknownTask("t".to_string()));
        assert!(matches!(err, ToolError::InvalidInput(_)));

        let err = mailbox_tool_error(MailboxError::Oversized { len: 2, max: 1 });
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
