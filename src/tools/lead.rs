// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lead-only tool handlers: team lifecycle, teammate management, and task
//! authoring.
//!
//! Every mutating handler verifies the caller is the recorded team lead
//! before touching state. Capacity rejections come back as ordinary failure
//! outputs (backpressure, not errors); permission and validation problems
//! map to the corresponding [`ToolError`] variants.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{SessionError, ToolError};
use crate::mailbox::MessageKind;
use crate::session::AgentDefinition;
use crate::team::MemberStatus;
use crate::types::{generate_id, WorkerCategory};

use super::registry::{ToolHandler, ToolOutput};
use super::{
    board_tool_error, mailbox_tool_error, parse_arguments, team_tool_error, InputSchema,
    ToolContext, ToolDefinition,
};

/// Handler for the `create_team` tool.
pub struct CreateTeamHandler {
    ctx: Arc<ToolContext>,
}

impl CreateTeamHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for CreateTeamHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "create_team",
            "Create this context's team with the calling agent as its lead",
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let config = self
            .ctx
            .teams
            .create_team(&self.ctx.team, &self.ctx.agent_id)
            .await
            .map_err(team_tool_error)?;
        Ok(ToolOutput::success(format!(
            "Created team '{}' with '{}' as lead",
            config.name, config.lead_agent_id
        )))
    }
}

/// Arguments for the spawn_teammate tool.
#[derive(Debug, Deserialize)]
struct SpawnTeammateArgs {
    /// Agent id for the new teammate.
    name: String,

    /// Worker category (general, research, implement, review, test).
    category: Option<String>,

    /// Task text dispatched to the teammate.
    task: String,

    /// System prompt override.
    system_prompt: Option<String>,

    /// Model override.
    model: Option<String>,

    /// Task-board entry this teammate is spawned to work on.
    linked_task_id: Option<String>,
}

/// Handler for the `spawn_teammate` tool.
pub struct SpawnTeammateHandler {
    ctx: Arc<ToolContext>,
}

impl SpawnTeammateHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for SpawnTeammateHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "spawn_teammate",
            "Spawn a new worker onto the team and dispatch a task to it",
        )
        .with_schema(
            InputSchema::new()
                .with_property(
                    "name",
                    json!({"type": "string", "description": "Agent id for the new teammate"}),
                )
                .with_property(
                    "category",
                    json!({
                        "type": "string",
                        "description": "Worker category",
                        "enum": WorkerCategory::NAMES
                    }),
                )
                .with_property(
                    "task",
                    json!({"type": "string", "description": "Task text for the teammate"}),
                )
                .with_property(
                    "system_prompt",
                    json!({"type": "string", "description": "System prompt override"}),
                )
                .with_property(
                    "model",
                    json!({"type": "string", "description": "Model override"}),
                )
                .with_property(
                    "linked_task_id",
                    json!({"type": "string", "description": "Task-board entry to link the session to"}),
                )
                .with_required(vec!["name".to_string(), "task".to_string()]),
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: SpawnTeammateArgs = parse_arguments(&input)?;
        let category: WorkerCategory = args
            .category
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(ToolError::InvalidInput)?
            .unwrap_or_default();

        let def = AgentDefinition {
            agent_id: args.name.clone(),
            display_name: args.name.clone(),
            category,
            system_prompt: args.system_prompt.unwrap_or_else(|| {
                format!("You are a {category} worker on team '{}'.", self.ctx.team)
            }),
            model: args.model,
        };
        let task_id = generate_id();

        match self
            .ctx
            .sessions
            .spawn_teammate(&self.ctx.team, &self.ctx.agent_id, def, &task_id, &args.task)
            .await
        {
            Ok(session) => {
                if let Some(todo) = &args.linked_task_id {
                    self.ctx
                        .sessions
                        .link_todo(&task_id, todo)
                        .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?;
                }
                Ok(ToolOutput::structured(
                    format!(
                        "Spawned teammate '{}' ({category}) on team '{}'",
                        args.name, self.ctx.team
                    ),
                    true,
                    json!({
                        "agentId": args.name,
                        "taskId": task_id,
                        "handle": session.external_handle,
                    }),
                ))
            }
            // Backpressure, not a failure: report what was rejected and why.
            Err(SessionError::CapacityRejected(reason)) => {
                Ok(ToolOutput::error(format!("Spawn rejected: {reason}")))
            }
            Err(SessionError::Team(err)) => Err(team_tool_error(err)),
            Err(SessionError::Protocol(err)) => Err(ToolError::InvalidInput(err.to_string())),
            Err(err) => Err(ToolError::ExecutionFailed(err.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageTeammateArgs {
    to: String,
    content: String,
}

/// Handler for the `message_teammate` tool.
pub struct MessageTeammateHandler {
    ctx: Arc<ToolContext>,
}

impl MessageTeammateHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for MessageTeammateHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("message_teammate", "Send a direct message to a team member")
            .with_schema(
                InputSchema::new()
                    .with_property("to", json!({"type": "string", "description": "Recipient agent id"}))
                    .with_property("content", json!({"type": "string", "description": "Message text"}))
                    .with_required(vec!["to".to_string(), "content".to_string()]),
            )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: MessageTeammateArgs = parse_arguments(&input)?;
        self.ctx.ensure_lead()?;
        if !self
            .ctx
            .teams
            .is_member(&self.ctx.team, &args.to)
            .map_err(team_tool_error)?
        {
            return Err(ToolError::InvalidInput(format!(
                "{} is not a member of team {}",
                args.to, self.ctx.team
            )));
        }

        let message = self
            .ctx
            .mailbox()
            .send(&self.ctx.agent_id, &args.to, &args.content, MessageKind::Message)
            .await
            .map_err(mailbox_tool_error)?;
        Ok(ToolOutput::success(format!(
            "Message {} delivered to {}",
            message.id, args.to
        )))
    }
}

#[derive(Debug, Deserialize)]
struct BroadcastArgs {
    content: String,
}

/// Handler for the `broadcast` tool.
pub struct BroadcastHandler {
    ctx: Arc<ToolContext>,
}

impl BroadcastHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for BroadcastHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("broadcast", "Send a message to every team member").with_schema(
            InputSchema::new()
                .with_property("content", json!({"type": "string", "description": "Message text"}))
                .with_required(vec!["content".to_string()]),
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: BroadcastArgs = parse_arguments(&input)?;
        self.ctx.ensure_lead()?;

        let roster = self
            .ctx
            .teams
            .load_team(&self.ctx.team)
            .map_err(team_tool_error)?
            .roster();
        let delivered = self
            .ctx
            .mailbox()
            .broadcast(&self.ctx.agent_id, &args.content, &roster)
            .await
            .map_err(mailbox_tool_error)?;
        Ok(ToolOutput::success(format!(
            "Broadcast delivered to {} member(s)",
            delivered.len()
        )))
    }
}

#[derive(Debug, Deserialize)]
struct ShutdownTeammateArgs {
    agent_id: String,
    reason: Option<String>,
}

/// Handler for the `shutdown_teammate` tool.
///
/// Shutdown is an ordinary message exchange: this sends a shutdown request
/// and flips the member to shutting_down; the teammate answers with
/// approve_shutdown or reject_shutdown.
pub struct ShutdownTeammateHandler {
    ctx: Arc<ToolContext>,
}

impl ShutdownTeammateHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for ShutdownTeammateHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("shutdown_teammate", "Request that a teammate shut down gracefully")
            .with_schema(
                InputSchema::new()
                    .with_property("agent_id", json!({"type": "string", "description": "Teammate to shut down"}))
                    .with_property("reason", json!({"type": "string", "description": "Why the shutdown is requested"}))
                    .with_required(vec!["agent_id".to_string()]),
            )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: ShutdownTeammateArgs = parse_arguments(&input)?;
        self.ctx.ensure_lead()?;
        // Validate the target up front so a typo'd id leaves no stray
        // message behind.
        let members = self
            .ctx
            .teams
            .team_members(&self.ctx.team)
            .map_err(team_tool_error)?;
        if !members.iter().any(|m| m.agent_id == args.agent_id) {
            return Err(ToolError::InvalidInput(format!(
                "{} is not a teammate on team {}",
                args.agent_id, self.ctx.team
            )));
        }

        let content = args
            .reason
            .unwrap_or_else(|| "please finish your current work and shut down".to_string());
        let message = self
            .ctx
            .mailbox()
            .send(&self.ctx.agent_id, &args.agent_id, &content, MessageKind::ShutdownRequest)
            .await
            .map_err(mailbox_tool_error)?;
        self.ctx
            .teams
            .update_teammate_status(&self.ctx.team, &args.agent_id, MemberStatus::ShuttingDown)
            .await
            .map_err(team_tool_error)?;

        Ok(ToolOutput::structured(
            format!("Shutdown requested for {}", args.agent_id),
            true,
            json!({"requestId": message.id}),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct CleanupTeamArgs {
    /// Operator override: delete even with active members.
    #[serde(default)]
    force: bool,
}

/// Handler for the `cleanup_team` tool.
pub struct CleanupTeamHandler {
    ctx: Arc<ToolContext>,
}

impl CleanupTeamHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for CleanupTeamHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "cleanup_team",
            "Delete the team and its on-disk state (fails while members are active)",
        )
        .with_schema(InputSchema::new().with_property(
            "force",
            json!({"type": "boolean", "description": "Delete even with active members"}),
        ))
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: CleanupTeamArgs = parse_arguments(&input)?;
        self.ctx
            .teams
            .delete_team(&self.ctx.team, &self.ctx.agent_id, args.force)
            .await
            .map_err(team_tool_error)?;
        Ok(ToolOutput::success(format!(
            "Team '{}' deleted",
            self.ctx.team
        )))
    }
}

/// Handler for the `list_teammates` tool.
pub struct ListTeammatesHandler {
    ctx: Arc<ToolContext>,
}

impl ListTeammatesHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for ListTeammatesHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("list_teammates", "List the team's members and their statuses")
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.ctx.ensure_lead()?;
        let members = self
            .ctx
            .teams
            .team_members(&self.ctx.team)
            .map_err(team_tool_error)?;

        let lines: Vec<String> = members
            .iter()
            .map(|m| format!("{} ({}) - {:?}", m.agent_id, m.category, m.status))
            .collect();
        let content = if lines.is_empty() {
            "No teammates".to_string()
        } else {
            lines.join("\n")
        };
        Ok(ToolOutput::structured(
            content,
            true,
            serde_json::to_value(&members)
                .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct CreateTaskArgs {
    description: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Handler for the `create_task` tool.
pub struct CreateTaskHandler {
    ctx: Arc<ToolContext>,
}

impl CreateTaskHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for CreateTaskHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("create_task", "Add a task to the team's shared board").with_schema(
            InputSchema::new()
                .with_property(
                    "description",
                    json!({"type": "string", "description": "What the task is"}),
                )
                .with_property(
                    "dependencies",
                    json!({
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Task ids that must complete first"
                    }),
                )
                .with_required(vec!["description".to_string()]),
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: CreateTaskArgs = parse_arguments(&input)?;
        self.ctx.ensure_lead()?;

        let task = self
            .ctx
            .board()
            .create_task(&args.description, &args.dependencies)
            .await
            .map_err(board_tool_error)?;
        Ok(ToolOutput::structured(
            format!("Created task {}", task.id),
            true,
            json!({"taskId": task.id}),
        ))
    }
}

/// Handler for the `list_tasks` tool.
pub struct ListTasksHandler {
    ctx: Arc<ToolContext>,
}

impl ListTasksHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for ListTasksHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("list_tasks", "List every task on the team's board")
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.ctx.ensure_lead()?;
        let tasks = self.ctx.board().all_tasks().map_err(board_tool_error)?;

        let lines: Vec<String> = tasks
            .iter()
            .map(|t| {
                format!(
                    "{} [{:?}] {}{}",
                    t.id,
                    t.status,
                    t.description,
                    t.assignee
                        .as_deref()
                        .map(|a| format!(" (assignee: {a})"))
                        .unwrap_or_default()
                )
            })
            .collect();
        let content = if lines.is_empty() {
            "No tasks".to_string()
        } else {
            lines.join("\n")
        };
        Ok(ToolOutput::structured(
            content,
            true,
            serde_json::to_value(&tasks)
                .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?,
        ))
    }
}
