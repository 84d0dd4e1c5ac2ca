// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The session manager: spawns workers, polls them to completion, and
//! resolves their outcomes.
//!
//! One coordinator process owns one manager. Admission goes through the
//! resource monitor (throttle) and the agent registry (slot ceilings); every
//! in-flight task gets its own interval poller that watches the worker's
//! runtime status. The worker runtime offers no push notifications, so a
//! worker "finishing" is observed as its transcript settling to idle, at
//! which point the latest structured result envelope (or, failing that, the
//! trailing assistant text) becomes the session outcome.
//!
//! Pollers never block each other: each touches only its own session record
//! plus read-only registry queries, and performs exactly one registry
//! mutation at completion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{SessionError, TeamError};
use crate::protocol::{self, Envelope, EnvelopeKind};
use crate::registry::AgentRegistry;
use crate::resources::ResourceMonitor;
use crate::runtime::{FileChange, WorkerActivity, WorkerRuntime};
use crate::team::{MemberStatus, TeamConfig, TeamDirectory, TeamMember};
use crate::types::{now, COORDINATOR_ID};

use super::types::{AgentDefinition, SessionStatus, TaskSession};

/// How a session concluded, as decided by the poller or an abort.
enum Outcome {
    Completed(String),
    Failed(String),
    Aborted(String),
}

#[derive(Default)]
struct Inner {
    /// Session records keyed by task id. Never deleted; terminal records are
    /// retained for later inspection.
    sessions: HashMap<String, TaskSession>,
    /// Task id -> team name, for flipping the member record at completion.
    team_links: HashMap<String, String>,
    /// Parked `wait_for_completion` callers.
    waiters: HashMap<String, Vec<oneshot::Sender<TaskSession>>>,
    /// One poller per in-flight task.
    pollers: HashMap<String, JoinHandle<()>>,
}

/// State shared between the manager and its spawned pollers.
struct Shared {
    runtime: Arc<dyn WorkerRuntime>,
    registry: AgentRegistry,
    teams: Arc<TeamDirectory>,
    poll_interval: Duration,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("session manager poisoned")
    }

    /// One poll of one in-flight task. Returns true when the poller should
    /// stop (session reached a terminal state, here or elsewhere).
    async fn poll_tick(&self, task_id: &str) -> bool {
        let handle = {
            let inner = self.lock();
            match inner.sessions.get(task_id) {
                Some(session) if !session.status.is_terminal() => {
                    session.external_handle.clone()
                }
                _ => return true,
            }
        };

        let statuses = match self.runtime.status().await {
            Ok(statuses) => statuses,
            Err(err) => {
                warn!(task_id, %err, "Worker runtime unreachable");
                self.finalize(task_id, Outcome::Failed(format!(
                    "worker runtime unreachable: {err}"
                )))
                .await;
                return true;
            }
        };

        match statuses.get(&handle) {
            Some(WorkerActivity::Busy) => {
                debug!(task_id, "Worker still busy");
                false
            }
            Some(WorkerActivity::Idle) => {
                let outcome = match self.runtime.transcript(&handle).await {
                    Ok(transcript) => resolve_outcome(
                        transcript
                            .iter()
                            .filter(|part| part.role == "assistant")
                            .map(|part| part.text.as_str()),
                    ),
                    Err(err) => {
                        Outcome::Failed(format!("failed to fetch worker transcript: {err}"))
                    }
                };
                self.finalize(task_id, outcome).await;
                true
            }
            None => {
                self.finalize(task_id, Outcome::Failed(format!(
                    "worker handle {handle} unknown to the runtime"
                )))
                .await;
                true
            }
        }
    }

    /// Force a session into a terminal state. Idempotent: a session that is
    /// already terminal is left untouched. Releases the registry slot,
    /// resolves parked waiters, and flips any linked team member inactive.
    async fn finalize(&self, task_id: &str, outcome: Outcome) {
        let (session, waiters, team) = {
            let mut inner = self.lock();
            let Some(session) = inner.sessions.get_mut(task_id) else {
                return;
            };
            if session.status.is_terminal() {
                return;
            }
            match outcome {
                Outcome::Completed(result) => {
                    session.status = SessionStatus::Completed;
                    session.result = Some(result);
                }
                Outcome::Failed(error) => {
                    session.status = SessionStatus::Error;
                    session.error = Some(error);
                }
                Outcome::Aborted(reason) => {
                    session.status = SessionStatus::Aborted;
                    session.error = Some(reason);
                }
            }
            session.completed_at = Some(now());
            let session = session.clone();
            self.registry.mark_inactive(&session.agent_id);
            let waiters = inner.waiters.remove(task_id).unwrap_or_default();
            let team = inner.team_links.get(task_id).cloned();
            (session, waiters, team)
        };

        info!(
            task_id,
            agent_id = %session.agent_id,
            status = ?session.status,
            "Session finished"
        );
        for waiter in waiters {
            let _ = waiter.send(session.clone());
        }
        if let Some(team) = team {
            if let Err(err) = self
                .teams
                .update_teammate_status(&team, &session.agent_id, MemberStatus::Inactive)
                .await
            {
                warn!(team, agent_id = %session.agent_id, %err, "Failed to mark teammate inactive");
            }
        }
    }
}

/// Decide a session outcome from a worker's settled assistant text: the
/// latest structured result/error envelope wins, otherwise the trailing
/// chunk of raw text stands in as an unstructured result.
fn resolve_outcome<'a>(assistant_parts: impl Iterator<Item = &'a str>) -> Outcome {
    let parts: Vec<&str> = assistant_parts.collect();
    let text = parts.join("\n");
    match protocol::extract_latest_result(&text) {
        Some(envelope) if envelope.kind == EnvelopeKind::Error => {
            Outcome::Failed(envelope.content)
        }
        Some(envelope) => Outcome::Completed(envelope.content),
        None => {
            let tail = parts
                .iter()
                .rev()
                .map(|part| part.trim())
                .find(|part| !part.is_empty())
                .unwrap_or("")
                .to_string();
            Outcome::Completed(tail)
        }
    }
}

/// Coordinates worker sessions: spawn, poll, extract-result, abort, wait.
pub struct SessionManager {
    config: CoordinatorConfig,
    monitor: ResourceMonitor,
    /// Runtime handle of the session that owns this coordinator, passed to
    /// `create` so the runtime can parent new workers. Empty for a root
    /// coordinator.
    parent_handle: String,
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(
        config: CoordinatorConfig,
        runtime: Arc<dyn WorkerRuntime>,
        teams: Arc<TeamDirectory>,
    ) -> Self {
        let poll_interval = config.poll_interval;
        Self {
            config,
            monitor: ResourceMonitor::new(),
            parent_handle: String::new(),
            shared: Arc::new(Shared {
                runtime,
                registry: AgentRegistry::new(),
                teams,
                poll_interval,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Set the runtime handle new workers are parented under.
    pub fn with_parent_handle(mut self, handle: impl Into<String>) -> Self {
        self.parent_handle = handle.into();
        self
    }

    /// The admission-control registry (read access for tools and tests).
    pub fn registry(&self) -> &AgentRegistry {
        &self.shared.registry
    }

    /// The host resource monitor.
    pub fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    /// Spawn a plain worker and dispatch `task` to it.
    ///
    /// Admission reserves the worker slot atomically (throttled by host
    /// resource pressure), the runtime handle is created, the task is wrapped
    /// in a message envelope and sent, and a poller starts watching for
    /// completion.
    pub async fn spawn(
        &self,
        def: AgentDefinition,
        task_id: &str,
        task: &str,
    ) -> Result<TaskSession, SessionError> {
        self.ensure_new_task(task_id)?;
        let envelope = Envelope::new(EnvelopeKind::Message, COORDINATOR_ID, &def.agent_id, task);
        let text = protocol::serialize(&envelope)?;
        self.admit(&def.agent_id)?;

        let handle = match self.shared.runtime.create(&self.parent_handle).await {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.registry.mark_inactive(&def.agent_id);
                return Err(err.into());
            }
        };
        self.launch(def, task_id, handle, text, None).await
    }

    /// Spawn a worker as a member of `team`.
    ///
    /// Only the team lead may do this. The worker's runtime handle is created
    /// first so it can be recorded on the member, the member is registered in
    /// the team directory, and the task prompt is augmented with the roster,
    /// the task board path, and the mailbox path so the new worker can
    /// self-coordinate independently of this manager's polling.
    pub async fn spawn_teammate(
        &self,
        team: &str,
        caller: &str,
        def: AgentDefinition,
        task_id: &str,
        task: &str,
    ) -> Result<TaskSession, SessionError> {
        let team_config = self.shared.teams.load_team(team)?;
        if team_config.lead_agent_id != caller {
            return Err(TeamError::NotLead {
                team: team.to_string(),
                agent: caller.to_string(),
            }
            .into());
        }
        self.ensure_new_task(task_id)?;
        let prompt = self.teammate_prompt(&team_config, &def, task);
        let envelope = Envelope::new(EnvelopeKind::Message, caller, &def.agent_id, prompt);
        let text = protocol::serialize(&envelope)?;
        self.admit(&def.agent_id)?;

        let handle = match self.shared.runtime.create(&self.parent_handle).await {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.registry.mark_inactive(&def.agent_id);
                return Err(err.into());
            }
        };
        let member = TeamMember {
            name: def.display_name.clone(),
            agent_id: def.agent_id.clone(),
            category: def.category,
            session_handle: handle.clone(),
            spawned_at: now(),
            status: MemberStatus::Active,
        };
        if let Err(err) = self.shared.teams.add_teammate(team, caller, member).await {
            // The worker never got a task; tear it down rather than leak it.
            let _ = self.shared.runtime.abort(&handle).await;
            self.shared.registry.mark_inactive(&def.agent_id);
            return Err(err.into());
        }

        self.launch(def, task_id, handle, text, Some(team.to_string()))
            .await
    }

    /// Shared tail of the spawn paths: record, dispatch, poll. The worker
    /// slot was already reserved at admission.
    async fn launch(
        &self,
        def: AgentDefinition,
        task_id: &str,
        handle: String,
        envelope_text: String,
        team: Option<String>,
    ) -> Result<TaskSession, SessionError> {
        self.shared.registry.assign_handle(&def.agent_id, &handle);

        let session = TaskSession {
            agent_id: def.agent_id.clone(),
            external_handle: handle.clone(),
            task_id: task_id.to_string(),
            status: SessionStatus::Starting,
            started_at: now(),
            completed_at: None,
            result: None,
            error: None,
            category: def.category,
            linked_todo_id: None,
        };
        {
            let mut inner = self.shared.lock();
            inner.sessions.insert(task_id.to_string(), session);
            if let Some(team) = &team {
                inner.team_links.insert(task_id.to_string(), team.clone());
            }
        }

        if let Err(err) = self
            .shared
            .runtime
            .send(&handle, &def.system_prompt, &envelope_text, def.model.as_deref())
            .await
        {
            self.shared
                .finalize(task_id, Outcome::Failed(format!("task dispatch failed: {err}")))
                .await;
            return Err(err.into());
        }

        let session = {
            let mut inner = self.shared.lock();
            let session = inner
                .sessions
                .get_mut(task_id)
                .expect("session recorded above");
            session.status = SessionStatus::Running;
            session.clone()
        };
        self.start_poller(task_id.to_string());

        info!(
            task_id,
            agent_id = %session.agent_id,
            handle = %session.external_handle,
            team = team.as_deref().unwrap_or("-"),
            "Worker spawned"
        );
        Ok(session)
    }

    /// Abort a session. Best-effort toward the worker, authoritative locally:
    /// the record is forced to aborted and capacity released regardless of
    /// whether the runtime honors the signal. Aborting a terminal session is
    /// a no-op that returns the existing record.
    pub async fn abort(&self, task_id: &str, reason: &str) -> Result<TaskSession, SessionError> {
        let (handle, poller) = {
            let mut inner = self.shared.lock();
            let session = inner
                .sessions
                .get(task_id)
                .ok_or_else(|| SessionError::UnknownTask(task_id.to_string()))?;
            if session.status.is_terminal() {
                return Ok(session.clone());
            }
            (session.external_handle.clone(), inner.pollers.remove(task_id))
        };

        if let Some(poller) = poller {
            poller.abort();
        }
        if let Err(err) = self.shared.runtime.abort(&handle).await {
            warn!(task_id, %err, "Abort signal failed; local record is still authoritative");
        }
        self.shared
            .finalize(task_id, Outcome::Aborted(reason.to_string()))
            .await;
        self.session(task_id)
    }

    /// Wait until a session reaches a terminal state.
    ///
    /// Resolves immediately for an already-terminal session. On timeout the
    /// returned record is a locally synthesized error outcome; the stored
    /// session and the worker itself are untouched — only the wait is
    /// abandoned.
    pub async fn wait_for_completion(
        &self,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<TaskSession, SessionError> {
        let rx = {
            let mut inner = self.shared.lock();
            let session = inner
                .sessions
                .get(task_id)
                .ok_or_else(|| SessionError::UnknownTask(task_id.to_string()))?;
            if session.status.is_terminal() {
                return Ok(session.clone());
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.entry(task_id.to_string()).or_default().push(tx);
            rx
        };

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(Ok(session)) => Ok(session),
                Ok(Err(_)) => self.session(task_id),
                Err(_) => {
                    let mut session = self.session(task_id)?;
                    session.status = SessionStatus::Error;
                    session.error = Some(format!(
                        "wait for completion timed out after {}ms; the worker was not stopped",
                        limit.as_millis()
                    ));
                    Ok(session)
                }
            },
            None => match rx.await {
                Ok(session) => Ok(session),
                Err(_) => self.session(task_id),
            },
        }
    }

    /// Look up one session record.
    pub fn session(&self, task_id: &str) -> Result<TaskSession, SessionError> {
        self.shared
            .lock()
            .sessions
            .get(task_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownTask(task_id.to_string()))
    }

    /// Every session this manager has spawned, terminal records included.
    pub fn sessions(&self) -> Vec<TaskSession> {
        self.shared.lock().sessions.values().cloned().collect()
    }

    /// Number of sessions not yet terminal.
    pub fn active_session_count(&self) -> usize {
        self.shared
            .lock()
            .sessions
            .values()
            .filter(|s| !s.status.is_terminal())
            .count()
    }

    /// Link a session to the task-board entry it is working.
    pub fn link_todo(&self, task_id: &str, todo_id: &str) -> Result<(), SessionError> {
        let mut inner = self.shared.lock();
        let session = inner
            .sessions
            .get_mut(task_id)
            .ok_or_else(|| SessionError::UnknownTask(task_id.to_string()))?;
        session.linked_todo_id = Some(todo_id.to_string());
        Ok(())
    }

    /// File changes accumulated by a session's worker.
    pub async fn diff(&self, task_id: &str) -> Result<Vec<FileChange>, SessionError> {
        let session = self.session(task_id)?;
        Ok(self.shared.runtime.diff(&session.external_handle).await?)
    }

    fn ensure_new_task(&self, task_id: &str) -> Result<(), SessionError> {
        if self.shared.lock().sessions.contains_key(task_id) {
            return Err(SessionError::DuplicateTask(task_id.to_string()));
        }
        Ok(())
    }

    /// Admission control: host resource pressure scales the parallelism
    /// ceiling down, then the registry checks the limits and reserves the
    /// slot in one step, so concurrent spawns cannot both squeeze through a
    /// nearly-full ceiling. Rejection is ordinary backpressure, not a
    /// failure; on later spawn failures the caller releases the reservation.
    fn admit(&self, agent_id: &str) -> Result<(), SessionError> {
        let throttle = self
            .monitor
            .check_throttle(&self.config.limits, &self.config.ceilings);
        let limits = self
            .config
            .limits
            .with_max_parallel(throttle.effective_max_parallel);
        let admission = self.shared.registry.try_reserve(agent_id, &limits);
        if !admission.allowed {
            let mut reason = admission
                .reason
                .unwrap_or_else(|| "spawn rejected".to_string());
            if let Some(throttle_reason) = throttle.reason {
                reason = format!("{reason} (throttled: {throttle_reason})");
            }
            return Err(SessionError::CapacityRejected(reason));
        }
        Ok(())
    }

    fn teammate_prompt(&self, team: &TeamConfig, def: &AgentDefinition, task: &str) -> String {
        let board = self.shared.teams.board(&team.name);
        let mailbox = self.shared.teams.mailbox(&team.name);
        let mut roster = team.roster();
        roster.push(def.agent_id.clone());
        format!(
            "{task}\n\n\
             You are agent '{id}' on team '{team}' (lead: {lead}).\n\
             Team members: {roster}.\n\
             Shared task board: {board}\n\
             Mailbox directory: {mail}\n\
             Claim tasks from the board before working on them, post your results \
             when done, and check your mailbox for messages and shutdown requests \
             between tasks.",
            id = def.agent_id,
            team = team.name,
            lead = team.lead_agent_id,
            roster = roster.join(", "),
            board = board.path().display(),
            mail = mailbox.dir().display(),
        )
    }

    /// Start the repeating poll for one in-flight task. The first poll runs
    /// immediately; subsequent polls follow the configured interval.
    fn start_poller(&self, task_id: String) {
        let shared = Arc::clone(&self.shared);
        let key = task_id.clone();
        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if shared.poll_tick(&task_id).await {
                    break;
                }
            }
            shared.lock().pollers.remove(&task_id);
        });
        self.shared.lock().pollers.insert(key, poller);
    }
}
