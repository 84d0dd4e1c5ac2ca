// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Teammate tool handlers: task claiming, messaging, and shutdown responses.
//!
//! Every handler verifies the caller is a registered member (or the lead)
//! before acting. A lost claim race and a contended board lock are expected
//! coordination outcomes, so they come back as failure outputs with
//! actionable text rather than errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{BoardError, ToolError};
use crate::mailbox::MessageKind;
use crate::team::MemberStatus;

use super::registry::{ToolHandler, ToolOutput};
use super::{
    board_tool_error, mailbox_tool_error, parse_arguments, team_tool_error, InputSchema,
    ToolContext, ToolDefinition,
};

#[derive(Debug, Deserialize)]
struct ClaimTaskArgs {
    task_id: String,
}

/// Handler for the `claim_task` tool.
pub struct ClaimTaskHandler {
    ctx: Arc<ToolContext>,
}

impl ClaimTaskHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for ClaimTaskHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("claim_task", "Atomically claim a pending task from the board")
            .with_schema(
                InputSchema::new()
                    .with_property("task_id", json!({"type": "string", "description": "Task to claim"}))
                    .with_required(vec!["task_id".to_string()]),
            )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: ClaimTaskArgs = parse_arguments(&input)?;
        self.ctx.ensure_member()?;

        match self
            .ctx
            .board()
            .claim_task(&args.task_id, &self.ctx.agent_id)
            .await
        {
            Ok(true) => Ok(ToolOutput::structured(
                format!("Claimed task {}", args.task_id),
                true,
                json!({"taskId": args.task_id, "assignee": self.ctx.agent_id}),
            )),
            Ok(false) => Ok(ToolOutput::error(format!(
                "Task {} is not claimable (already claimed or blocked by an \
                 incomplete dependency); call get_claimable_tasks and pick another",
                args.task_id
            ))),
            Err(BoardError::Lock(err)) => Ok(ToolOutput::error(format!(
                "Task board is busy ({err}); retry shortly"
            ))),
            Err(err) => Err(board_tool_error(err)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompleteTaskArgs {
    task_id: String,
    result: String,
}

/// Handler for the `complete_task` tool.
pub struct CompleteTaskHandler {
    ctx: Arc<ToolContext>,
}

impl CompleteTaskHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for CompleteTaskHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "complete_task",
            "Mark a claimed task completed and record its result",
        )
        .with_schema(
            InputSchema::new()
                .with_property("task_id", json!({"type": "string", "description": "Task to complete"}))
                .with_property("result", json!({"type": "string", "description": "Outcome summary"}))
                .with_required(vec!["task_id".to_string(), "result".to_string()]),
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: CompleteTaskArgs = parse_arguments(&input)?;
        self.ctx.ensure_member()?;

        let unblocked = self
            .ctx
            .board()
            .complete_task(&args.task_id, &self.ctx.agent_id, &args.result)
            .await
            .map_err(board_tool_error)?;

        let unblocked_ids: Vec<&str> = unblocked.iter().map(|t| t.id.as_str()).collect();
        let content = if unblocked_ids.is_empty() {
            format!("Completed task {}", args.task_id)
        } else {
            format!(
                "Completed task {}; now claimable: {}",
                args.task_id,
                unblocked_ids.join(", ")
            )
        };
        Ok(ToolOutput::structured(
            content,
            true,
            json!({"taskId": args.task_id, "unblocked": unblocked_ids}),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageArgs {
    to: String,
    content: String,
}

/// Handler for the `send_message` tool.
pub struct SendMessageHandler {
    ctx: Arc<ToolContext>,
}

impl SendMessageHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for SendMessageHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("send_message", "Send a direct message to another team member")
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
        let args: SendMessageArgs = parse_arguments(&input)?;
        self.ctx.ensure_member()?;
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

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct CheckMessagesArgs {
    /// Only unread messages (default). Pass false for the full inbox.
    #[serde(default = "default_true")]
    unread_only: bool,

    /// Mark the returned messages read.
    #[serde(default)]
    mark_read: bool,
}

/// Handler for the `check_messages` tool.
pub struct CheckMessagesHandler {
    ctx: Arc<ToolContext>,
}

impl CheckMessagesHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for CheckMessagesHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("check_messages", "Read this agent's inbox").with_schema(
            InputSchema::new()
                .with_property(
                    "unread_only",
                    json!({"type": "boolean", "description": "Only unread messages (default true)"}),
                )
                .with_property(
                    "mark_read",
                    json!({"type": "boolean", "description": "Mark the returned messages read"}),
                ),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: CheckMessagesArgs = parse_arguments(&input)?;
        self.ctx.ensure_member()?;

        let mailbox = self.ctx.mailbox();
        let messages = mailbox
            .messages(&self.ctx.agent_id, args.unread_only)
            .map_err(mailbox_tool_error)?;
        if args.mark_read && !messages.is_empty() {
            let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
            mailbox
                .mark_read(&self.ctx.agent_id, &ids)
                .await
                .map_err(mailbox_tool_error)?;
        }

        let lines: Vec<String> = messages
            .iter()
            .map(|m| format!("[{:?}] {} ({}): {}", m.kind, m.from, m.id, m.content))
            .collect();
        let content = if lines.is_empty() {
            "No messages".to_string()
        } else {
            lines.join("\n")
        };
        Ok(ToolOutput::structured(
            content,
            true,
            serde_json::to_value(&messages)
                .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?,
        ))
    }
}

/// Handler for the `get_team_members` tool.
pub struct GetTeamMembersHandler {
    ctx: Arc<ToolContext>,
}

impl GetTeamMembersHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for GetTeamMembersHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("get_team_members", "List the team's lead and members")
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.ctx.ensure_member()?;
        let config = self
            .ctx
            .teams
            .load_team(&self.ctx.team)
            .map_err(team_tool_error)?;

        let mut lines = vec![format!("{} (lead)", config.lead_agent_id)];
        lines.extend(
            config
                .members
                .iter()
                .map(|m| format!("{} ({}) - {:?}", m.agent_id, m.category, m.status)),
        );
        Ok(ToolOutput::structured(
            lines.join("\n"),
            true,
            json!({
                "lead": config.lead_agent_id,
                "members": config.members,
            }),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ApproveShutdownArgs {
    request_id: String,
}

/// Handler for the `approve_shutdown` tool.
pub struct ApproveShutdownHandler {
    ctx: Arc<ToolContext>,
}

impl ApproveShutdownHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for ApproveShutdownHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "approve_shutdown",
            "Approve a pending shutdown request and go inactive",
        )
        .with_schema(
            InputSchema::new()
                .with_property(
                    "request_id",
                    json!({"type": "string", "description": "Id of the shutdown request message"}),
                )
                .with_required(vec!["request_id".to_string()]),
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: ApproveShutdownArgs = parse_arguments(&input)?;
        self.ctx.ensure_member()?;

        self.ctx
            .mailbox()
            .respond_shutdown(&self.ctx.agent_id, &args.request_id, true, None)
            .await
            .map_err(mailbox_tool_error)?;
        self.ctx
            .teams
            .update_teammate_status(&self.ctx.team, &self.ctx.agent_id, MemberStatus::Inactive)
            .await
            .map_err(team_tool_error)?;

        Ok(ToolOutput::success(
            "Shutdown approved; finish any in-flight work and stop",
        ))
    }
}

#[derive(Debug, Deserialize)]
struct RejectShutdownArgs {
    request_id: String,
    reason: Option<String>,
}

/// Handler for the `reject_shutdown` tool.
pub struct RejectShutdownHandler {
    ctx: Arc<ToolContext>,
}

impl RejectShutdownHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for RejectShutdownHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "reject_shutdown",
            "Reject a pending shutdown request and stay active",
        )
        .with_schema(
            InputSchema::new()
                .with_property(
                    "request_id",
                    json!({"type": "string", "description": "Id of the shutdown request message"}),
                )
                .with_property(
                    "reason",
                    json!({"type": "string", "description": "Why the shutdown is rejected"}),
                )
                .with_required(vec!["request_id".to_string()]),
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: RejectShutdownArgs = parse_arguments(&input)?;
        self.ctx.ensure_member()?;

        self.ctx
            .mailbox()
            .respond_shutdown(
                &self.ctx.agent_id,
                &args.request_id,
                false,
                args.reason.as_deref(),
            )
            .await
            .map_err(mailbox_tool_error)?;
        self.ctx
            .teams
            .update_teammate_status(&self.ctx.team, &self.ctx.agent_id, MemberStatus::Active)
            .await
            .map_err(team_tool_error)?;

        Ok(ToolOutput::success("Shutdown rejected; continuing"))
    }
}

/// Handler for the `get_claimable_tasks` tool.
pub struct GetClaimableTasksHandler {
    ctx: Arc<ToolContext>,
}

impl GetClaimableTasksHandler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for GetClaimableTasksHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "get_claimable_tasks",
            "List pending tasks whose dependencies are all completed",
        )
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.ctx.ensure_member()?;
        let tasks = self.ctx.board().claimable_tasks().map_err(board_tool_error)?;

        let lines: Vec<String> = tasks
            .iter()
            .map(|t| format!("{}: {}", t.id, t.description))
            .collect();
        let content = if lines.is_empty() {
            "No claimable tasks".to_string()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoordinatorConfig, ResourceCeilings, SpawnLimits};
    use crate::persist::LockOptions;
    use crate::runtime::ScriptedRuntime;
    use crate::session::SessionManager;
    use crate::team::{TeamDirectory, TeamMember};
    use crate::types::{now, WorkerCategory};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn ctx(root: &Path, team: &str, agent: &str) -> Arc<ToolContext> {
        let config = CoordinatorConfig {
            coordination_root: root.join("teams"),
            poll_interval: Duration::from_millis(10),
            limits: SpawnLimits {
                max_parallel: 4,
                max_total: 100,
            },
            ceilings: ResourceCeilings {
                max_memory_percent: 100.0,
                max_cpu_percent: 100.0,
            },
            lock: LockOptions::default(),
        };
        let teams = Arc::new(TeamDirectory::new(
            config.coordination_root.clone(),
            config.lock,
        ));
        let runtime = Arc::new(ScriptedRuntime::new());
        let sessions = Arc::new(SessionManager::new(config, runtime, Arc::clone(&teams)));
        ToolContext::new(team, agent, sessions, teams)
    }

    async fn member_ctx(root: &Path, team: &str, agent: &str) -> Arc<ToolContext> {
        let ctx = ctx(root, team, agent);
        ctx.teams.create_team(team, "lead-1").await.unwrap();
        ctx.teams
            .add_teammate(
                team,
                "lead-1",
                TeamMember {
                    name: agent.to_string(),
                    agent_id: agent.to_string(),
                    category: WorkerCategory::General,
                    session_handle: "scripted-1".to_string(),
                    spawned_at: now(),
                    status: MemberStatus::Active,
                },
            )
            .await
            .unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_claim_and_complete_task() {
        let temp = tempdir().unwrap();
        let ctx = member_ctx(temp.path(), "alpha", "w1").await;
        let board = ctx.board();
        let t1 = board.create_task("first", &[]).await.unwrap();
        let t2 = board
            .create_task("second", &[t1.id.clone()])
            .await
            .unwrap();

        let output = ClaimTaskHandler::new(Arc::clone(&ctx))
            .execute(json!({"task_id": t1.id}))
            .await
            .unwrap();
        assert!(output.is_success());

        // Blocked by t1 until it completes.
        let output = ClaimTaskHandler::new(Arc::clone(&ctx))
            .execute(json!({"task_id": t2.id}))
            .await
            .unwrap();
        assert!(!output.is_success());
        assert!(output.content().contains("not claimable"));

        let output = CompleteTaskHandler::new(Arc::clone(&ctx))
            .execute(json!({"task_id": t1.id, "result": "done"}))
            .await
            .unwrap();
        assert!(output.is_success());
        assert!(output.content().contains(&t2.id));

        let output = ClaimTaskHandler::new(Arc::clone(&ctx))
            .execute(json!({"task_id": t2.id}))
            .await
            .unwrap();
        assert!(output.is_success());
    }

    #[tokio::test]
    async fn test_claim_unknown_task_is_invalid_input() {
        let temp = tempdir().unwrap();
        let ctx = member_ctx(temp.path(), "alpha", "w1").await;

        let err = ClaimTaskHandler::new(Arc::clone(&ctx))
            .execute(json!({"task_id": "ghost"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_non_member_is_denied() {
        let temp = tempdir().unwrap();
        let ctx = ctx(temp.path(), "alpha", "outsider");
        ctx.teams.create_team("alpha", "lead-1").await.unwrap();

        let err = GetClaimableTasksHandler::new(Arc::clone(&ctx))
            .execute(json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_send_and_check_messages() {
        let temp = tempdir().unwrap();
        let ctx = member_ctx(temp.path(), "alpha", "w1").await;

        let output = SendMessageHandler::new(Arc::clone(&ctx))
            .execute(json!({"to": "lead-1", "content": "blocked on review"}))
            .await
            .unwrap();
        assert!(output.is_success());

        // w1's own inbox is empty; deliver something and read it back.
        ctx.mailbox()
            .send("lead-1", "w1", "try the other branch", MessageKind::Message)
            .await
            .unwrap();
        let handler = CheckMessagesHandler::new(Arc::clone(&ctx));
        let output = handler.execute(json!({"mark_read": true})).await.unwrap();
        assert!(output.content().contains("try the other branch"));

        let output = handler.execute(json!({})).await.unwrap();
        assert_eq!(output.content(), "No messages");
    }

    #[tokio::test]
    async fn test_get_team_members_includes_lead() {
        let temp = tempdir().unwrap();
        let ctx = member_ctx(temp.path(), "alpha", "w1").await;

        let output = GetTeamMembersHandler::new(Arc::clone(&ctx))
            .execute(json!({}))
            .await
            .unwrap();
        assert!(output.content().contains("lead-1 (lead)"));
        assert!(output.content().contains("w1"));
    }

    #[tokio::test]
    async fn test_shutdown_approve_round_trip() {
        let temp = tempdir().unwrap();
        let ctx = member_ctx(temp.path(), "alpha", "w1").await;

        let request = ctx
            .mailbox()
            .send("lead-1", "w1", "wrap up", MessageKind::ShutdownRequest)
            .await
            .unwrap();

        let output = ApproveShutdownHandler::new(Arc::clone(&ctx))
            .execute(json!({"request_id": request.id}))
            .await
            .unwrap();
        assert!(output.is_success());
        assert_eq!(
            ctx.teams.team_members("alpha").unwrap()[0].status,
            MemberStatus::Inactive
        );
        let responses = ctx.mailbox().messages("lead-1", true).unwrap();
        assert!(responses
            .iter()
            .any(|m| m.kind == MessageKind::ShutdownResponse && m.content == "approved"));
    }

    #[tokio::test]
    async fn test_shutdown_reject_keeps_member_active() {
        let temp = tempdir().unwrap();
        let ctx = member_ctx(temp.path(), "alpha", "w1").await;
        ctx.teams
            .update_teammate_status("alpha", "w1", MemberStatus::ShuttingDown)
            .await
            .unwrap();

        let request = ctx
            .mailbox()
            .send("lead-1", "w1", "wrap up", MessageKind::ShutdownRequest)
            .await
            .unwrap();

        let output = RejectShutdownHandler::new(Arc::clone(&ctx))
            .execute(json!({"request_id": request.id, "reason": "mid-task"}))
            .await
            .unwrap();
        assert!(output.is_success());
        assert_eq!(
            ctx.teams.team_members("alpha").unwrap()[0].status,
            MemberStatus::Active
        );
        let responses = ctx.mailbox().messages("lead-1", true).unwrap();
        assert!(responses
            .iter()
            .any(|m| m.kind == MessageKind::ShutdownResponse
                && m.content == "rejected: mid-task"));
    }

    #[tokio::test]
    async fn test_reject_unknown_request_is_invalid_input() {
        let temp = tempdir().unwrap();
        let ctx = member_ctx(temp.path(), "alpha", "w1").await;

        let err = RejectShutdownHandler::new(Arc::clone(&ctx))
            .execute(json!({"request_id": "ghost"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
