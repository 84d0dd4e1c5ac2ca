// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end coordination scenarios: a lead drives the tool surface, workers
//! are played by the scripted runtime, and all shared state goes through the
//! on-disk board, mailboxes, and team directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;

use flotilla::config::{CoordinatorConfig, ResourceCeilings, SpawnLimits};
use flotilla::persist::LockOptions;
use flotilla::protocol::{self, Envelope};
use flotilla::runtime::ScriptedRuntime;
use flotilla::session::{SessionManager, SessionStatus};
use flotilla::team::{MemberStatus, TeamDirectory};
use flotilla::tools::{ToolContext, ToolRegistry};
use flotilla::ToolError;

struct Harness {
    runtime: Arc<ScriptedRuntime>,
    teams: Arc<TeamDirectory>,
    sessions: Arc<SessionManager>,
}

impl Harness {
    fn new(root: &Path, max_parallel: usize) -> Self {
        let config = CoordinatorConfig {
            coordination_root: root.join("teams"),
            poll_interval: Duration::from_millis(10),
            limits: SpawnLimits {
                max_parallel,
                max_total: 100,
            },
            // Never throttle in tests, regardless of the host's load.
            ceilings: ResourceCeilings {
                max_memory_percent: 100.0,
                max_cpu_percent: 100.0,
            },
            lock: LockOptions::default(),
        };
        let runtime = Arc::new(ScriptedRuntime::new());
        let teams = Arc::new(TeamDirectory::new(
            config.coordination_root.clone(),
            config.lock,
        ));
        let sessions = Arc::new(SessionManager::new(
            config,
            runtime.clone(),
            Arc::clone(&teams),
        ));
        Self {
            runtime,
            teams,
            sessions,
        }
    }

    fn ctx(&self, team: &str, agent: &str) -> Arc<ToolContext> {
        ToolContext::new(
            team,
            agent,
            Arc::clone(&self.sessions),
            Arc::clone(&self.teams),
        )
    }
}

#[tokio::test]
async fn dependency_gated_tasks_flow_through_the_board() {
    let temp = tempdir().unwrap();
    let harness = Harness::new(temp.path(), 4);
    let lead_ctx = harness.ctx("pipeline", "lead-1");
    let lead = ToolRegistry::for_lead(&lead_ctx);

    lead.dispatch("create_team", json!({})).await.unwrap();
    let t1 = lead
        .dispatch("create_task", json!({"description": "write the parser"}))
        .await
        .unwrap();
    let t1_id = t1.output.metadata().unwrap()["taskId"]
        .as_str()
        .unwrap()
        .to_string();
    let t2 = lead
        .dispatch(
            "create_task",
            json!({"description": "test the parser", "dependencies": [t1_id]}),
        )
        .await
        .unwrap();
    let t2_id = t2.output.metadata().unwrap()["taskId"]
        .as_str()
        .unwrap()
        .to_string();

    lead.dispatch("spawn_teammate", json!({"name": "w1", "task": "work the board"}))
        .await
        .unwrap();

    let worker_ctx = harness.ctx("pipeline", "w1");
    let worker = ToolRegistry::for_teammate(&worker_ctx);

    // Only the unblocked task is claimable.
    let claimable = worker.dispatch("get_claimable_tasks", json!({})).await.unwrap();
    assert!(claimable.output.content().contains("write the parser"));
    assert!(!claimable.output.content().contains("test the parser"));

    // Claiming the gated task is refused, not an error.
    let refused = worker
        .dispatch("claim_task", json!({"task_id": t2_id}))
        .await
        .unwrap();
    assert!(!refused.is_error);
    assert!(!refused.output.is_success());
    assert!(refused.output.content().contains("not claimable"));

    worker
        .dispatch("claim_task", json!({"task_id": t1_id}))
        .await
        .unwrap();
    let completed = worker
        .dispatch("complete_task", json!({"task_id": t1_id, "result": "parser done"}))
        .await
        .unwrap();
    assert!(completed.output.content().contains(&t2_id));

    // The completion unblocked the dependent task.
    let claimed = worker
        .dispatch("claim_task", json!({"task_id": t2_id}))
        .await
        .unwrap();
    assert!(claimed.output.is_success());
    worker
        .dispatch("complete_task", json!({"task_id": t2_id, "result": "tests pass"}))
        .await
        .unwrap();

    let listing = lead.dispatch("list_tasks", json!({})).await.unwrap();
    let tasks = listing.output.metadata().unwrap().as_array().unwrap().clone();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t["status"] == "completed"));
}

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() {
    let temp = tempdir().unwrap();
    let harness = Harness::new(temp.path(), 4);
    let lead_ctx = harness.ctx("race", "lead-1");
    let lead = ToolRegistry::for_lead(&lead_ctx);

    lead.dispatch("create_team", json!({})).await.unwrap();
    let task = lead
        .dispatch("create_task", json!({"description": "contested"}))
        .await
        .unwrap();
    let task_id = task.output.metadata().unwrap()["taskId"]
        .as_str()
        .unwrap()
        .to_string();
    for name in ["w1", "w2", "w3", "w4"] {
        lead.dispatch("spawn_teammate", json!({"name": name, "task": "race"}))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for name in ["w1", "w2", "w3", "w4"] {
        let ctx = harness.ctx("race", name);
        let id = task_id.clone();
        handles.push(tokio::spawn(async move {
            let tools = ToolRegistry::for_teammate(&ctx);
            tools.dispatch("claim_task", json!({"task_id": id})).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert!(!result.is_error);
        if result.output.is_success() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let board = harness.teams.board("race");
    let task = board.get_task(&task_id).unwrap();
    assert!(task.assignee.is_some());
}

#[tokio::test]
async fn spawn_capacity_recovers_when_a_worker_finishes() {
    let temp = tempdir().unwrap();
    let harness = Harness::new(temp.path(), 3);
    let lead_ctx = harness.ctx("fleet", "lead-1");
    let lead = ToolRegistry::for_lead(&lead_ctx);

    lead.dispatch("create_team", json!({})).await.unwrap();
    for name in ["w1", "w2", "w3"] {
        let result = lead
            .dispatch("spawn_teammate", json!({"name": name, "task": "work"}))
            .await
            .unwrap();
        assert!(result.output.is_success());
    }

    // The fleet is full; the rejection is a failure output, not an error.
    let rejected = lead
        .dispatch("spawn_teammate", json!({"name": "w4", "task": "work"}))
        .await
        .unwrap();
    assert!(!rejected.is_error);
    assert!(!rejected.output.is_success());
    assert!(rejected.output.content().contains("Spawn rejected"));

    // One worker finishing frees its slot.
    let handle = harness.teams.team_members("fleet").unwrap()[0]
        .session_handle
        .clone();
    harness.runtime.conclude(&handle, "done");
    let task_id = harness
        .sessions
        .sessions()
        .into_iter()
        .find(|s| s.external_handle == handle)
        .unwrap()
        .task_id;
    harness
        .sessions
        .wait_for_completion(&task_id, Some(Duration::from_secs(5)))
        .await
        .unwrap();

    let admitted = lead
        .dispatch("spawn_teammate", json!({"name": "w4", "task": "work"}))
        .await
        .unwrap();
    assert!(admitted.output.is_success());
}

#[tokio::test]
async fn lead_tools_are_denied_to_non_leads() {
    let temp = tempdir().unwrap();
    let harness = Harness::new(temp.path(), 4);
    let lead_ctx = harness.ctx("guard", "lead-1");
    let lead = ToolRegistry::for_lead(&lead_ctx);
    lead.dispatch("create_team", json!({})).await.unwrap();
    lead.dispatch("spawn_teammate", json!({"name": "w1", "task": "work"}))
        .await
        .unwrap();

    // A teammate's registry simply lacks the lead tools.
    let worker_ctx = harness.ctx("guard", "w1");
    let worker = ToolRegistry::for_teammate(&worker_ctx);
    assert!(!worker.contains("spawn_teammate"));
    let err = worker.dispatch("broadcast", json!({"content": "hi"})).await;
    assert!(matches!(err.unwrap_err(), ToolError::NotFound(_)));

    // Holding lead tools without being lead still fails the authority check.
    let impostor = ToolRegistry::for_lead(&harness.ctx("guard", "w1"));
    let denied = impostor
        .dispatch("broadcast", json!({"content": "hi"}))
        .await
        .unwrap();
    assert!(denied.is_error);
    assert!(denied.output.content().contains("Permission denied"));
}

#[tokio::test]
async fn teammate_outcome_is_adopted_and_team_cleaned_up() {
    let temp = tempdir().unwrap();
    let harness = Harness::new(temp.path(), 4);
    let lead_ctx = harness.ctx("wrap", "lead-1");
    let lead = ToolRegistry::for_lead(&lead_ctx);
    lead.dispatch("create_team", json!({})).await.unwrap();

    let spawned = lead
        .dispatch("spawn_teammate", json!({"name": "w1", "task": "summarize the logs"}))
        .await
        .unwrap();
    let meta = spawned.output.metadata().unwrap().clone();
    let handle = meta["handle"].as_str().unwrap().to_string();
    let task_id = meta["taskId"].as_str().unwrap().to_string();

    // The worker answers with a structured result followed by chatter; the
    // latest envelope wins.
    let reply = protocol::serialize(&Envelope::result("w1", "lead-1", "42 errors, 3 unique"))
        .unwrap();
    harness
        .runtime
        .conclude(&handle, &format!("{reply}\nok, signing off"));

    let done = harness
        .sessions
        .wait_for_completion(&task_id, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.result.as_deref(), Some("42 errors, 3 unique"));

    // The member went inactive, so the team deletes without force.
    assert_eq!(
        harness.teams.team_members("wrap").unwrap()[0].status,
        MemberStatus::Inactive
    );
    let cleaned = lead.dispatch("cleanup_team", json!({})).await.unwrap();
    assert!(cleaned.output.is_success());
    assert!(harness.teams.load_team("wrap").is_err());
}

#[tokio::test]
async fn shutdown_round_trip_through_the_mailboxes() {
    let temp = tempdir().unwrap();
    let harness = Harness::new(temp.path(), 4);
    let lead_ctx = harness.ctx("wind-down", "lead-1");
    let lead = ToolRegistry::for_lead(&lead_ctx);
    lead.dispatch("create_team", json!({})).await.unwrap();
    lead.dispatch("spawn_teammate", json!({"name": "w1", "task": "work"}))
        .await
        .unwrap();

    let requested = lead
        .dispatch(
            "shutdown_teammate",
            json!({"agent_id": "w1", "reason": "sprint complete"}),
        )
        .await
        .unwrap();
    let request_id = requested.output.metadata().unwrap()["requestId"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(
        harness.teams.team_members("wind-down").unwrap()[0].status,
        MemberStatus::ShuttingDown
    );

    // The teammate sees the request in its inbox and approves.
    let worker_ctx = harness.ctx("wind-down", "w1");
    let worker = ToolRegistry::for_teammate(&worker_ctx);
    let inbox = worker.dispatch("check_messages", json!({})).await.unwrap();
    assert!(inbox.output.content().contains("sprint complete"));
    assert!(inbox.output.content().contains(&request_id));

    worker
        .dispatch("approve_shutdown", json!({"request_id": request_id}))
        .await
        .unwrap();
    assert_eq!(
        harness.teams.team_members("wind-down").unwrap()[0].status,
        MemberStatus::Inactive
    );

    // The lead reads the approval back.
    let responses = harness
        .teams
        .mailbox("wind-down")
        .messages("lead-1", true)
        .unwrap();
    assert!(responses.iter().any(|m| m.content == "approved"));
}
