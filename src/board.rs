// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared task board with dependency tracking.
//!
//! One JSON document per team holds every task; a sibling lock file
//! serializes mutation across concurrent claimants in different processes.
//! "Claimable" is computed from current state, never stored, so dependency
//! unblocking needs no explicit status flip: completing a task makes its
//! dependents visible to the next `claimable_tasks` call.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::BoardError;
use crate::persist::{load_json, store_json, FileLock, LockOptions};
use crate::types::{generate_id, now};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

/// One unit of work on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// On-disk shape of the board file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct BoardDocument {
    tasks: Vec<Task>,
}

impl BoardDocument {
    fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// All dependencies of `task` are completed.
    fn dependencies_satisfied(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.task(dep)
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }
}

/// File-backed task board for one team.
pub struct TaskBoard {
    path: PathBuf,
    lock_path: PathBuf,
    lock_options: LockOptions,
}

impl TaskBoard {
    /// Open a board at `path` (created lazily on first write).
    pub fn new(path: impl Into<PathBuf>, lock_options: LockOptions) -> Self {
        let path = path.into();
        let mut lock_path = path.as_os_str().to_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
            lock_options,
        }
    }

    /// Path of the board file, for inclusion in teammate prompts.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a pending task. Dependencies must reference existing tasks.
    pub async fn create_task(
        &self,
        description: &str,
        dependencies: &[String],
    ) -> Result<Task, BoardError> {
        if description.trim().is_empty() {
            return Err(BoardError::Validation(
                "task description must not be empty".to_string(),
            ));
        }

        let guard = FileLock::acquire(&self.lock_path, &self.lock_options).await?;
        let mut doc = self.load()?;

        for dep in dependencies {
            if doc.task(dep).is_none() {
                guard.release();
                return Err(BoardError::Validation(format!(
                    "dependency references unknown task: {dep}"
                )));
            }
        }

        let task = Task {
            id: generate_id(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            assignee: None,
            dependencies: dependencies.to_vec(),
            created_at: now(),
            claimed_at: None,
            completed_at: None,
            result: None,
        };
        doc.tasks.push(task.clone());
        self.store(&doc)?;
        guard.release();

        info!(task_id = %task.id, deps = dependencies.len(), "Task created");
        Ok(task)
    }

    /// Atomically claim a pending task for `agent_id`.
    ///
    /// Returns `Ok(false)` on a lost race or unmet dependencies; both are
    /// expected outcomes, not errors. The caller should pick another task.
    pub async fn claim_task(&self, task_id: &str, agent_id: &str) -> Result<bool, BoardError> {
        let guard = FileLock::acquire(&self.lock_path, &self.lock_options).await?;
        let mut doc = self.load()?;

        let claimable = match doc.task(task_id) {
            Some(task) => task.status == TaskStatus::Pending && doc.dependencies_satisfied(task),
            None => {
                guard.release();
                return Err(BoardError::UnknownTask(task_id.to_string()));
            }
        };
        if !claimable {
            guard.release();
            debug!(task_id, agent_id, "Claim refused (raced or blocked)");
            return Ok(false);
        }

        let task = doc.task_mut(task_id).expect("checked above");
        task.status = TaskStatus::InProgress;
        task.assignee = Some(agent_id.to_string());
        task.claimed_at = Some(now());
        self.store(&doc)?;
        guard.release();

        info!(task_id, agent_id, "Task claimed");
        Ok(true)
    }

    /// Complete an in-progress task. Only its assignee may complete it.
    /// Returns the tasks this completion newly unblocked.
    pub async fn complete_task(
        &self,
        task_id: &str,
        agent_id: &str,
        result: &str,
    ) -> Result<Vec<Task>, BoardError> {
        let guard = FileLock::acquire(&self.lock_path, &self.lock_options).await?;
        let mut doc = self.load()?;

        {
            let task = doc
                .task(task_id)
                .ok_or_else(|| BoardError::UnknownTask(task_id.to_string()))?;
            if task.status != TaskStatus::InProgress {
                guard.release();
                return Err(BoardError::Validation(format!(
                    "task {task_id} is {:?}, only in-progress tasks can be completed",
                    task.status
                )));
            }
            if task.assignee.as_deref() != Some(agent_id) {
                guard.release();
                return Err(BoardError::Validation(format!(
                    "task {task_id} is assigned to {}, not {agent_id}",
                    task.assignee.as_deref().unwrap_or("nobody")
                )));
            }
        }

        let task = doc.task_mut(task_id).expect("checked above");
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now());
        task.result = Some(result.to_string());

        // Anything pending that depended on this task and now has its full
        // dependency set satisfied became claimable.
        let unblocked: Vec<Task> = doc
            .tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.dependencies.iter().any(|d| d == task_id)
                    && doc.dependencies_satisfied(t)
            })
            .cloned()
            .collect();

        self.store(&doc)?;
        guard.release();

        info!(task_id, agent_id, unblocked = unblocked.len(), "Task completed");
        Ok(unblocked)
    }

    /// Cancel a pending task. In-progress tasks belong to their assignee and
    /// completed tasks are immutable.
    pub async fn cancel_task(&self, task_id: &str) -> Result<(), BoardError> {
        let guard = FileLock::acquire(&self.lock_path, &self.lock_options).await?;
        let mut doc = self.load()?;

        let task = doc
            .task_mut(task_id)
            .ok_or_else(|| BoardError::UnknownTask(task_id.to_string()))?;
        if task.status != TaskStatus::Pending {
            guard.release();
            return Err(BoardError::Validation(format!(
                "task {task_id} is {:?}, only pending tasks can be cancelled",
                task.status
            )));
        }
        task.status = TaskStatus::Cancelled;
        self.store(&doc)?;
        guard.release();

        info!(task_id, "Task cancelled");
        Ok(())
    }

    /// Tasks that are pending with every dependency completed.
    ///
    /// Read-only: writes are atomic renames, so an unlocked read always sees
    /// a consistent document.
    pub fn claimable_tasks(&self) -> Result<Vec<Task>, BoardError> {
        let doc = self.load()?;
        Ok(doc
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && doc.dependencies_satisfied(t))
            .cloned()
            .collect())
    }

    /// Look up a single task.
    pub fn get_task(&self, task_id: &str) -> Result<Task, BoardError> {
        self.load()?
            .task(task_id)
            .cloned()
            .ok_or_else(|| BoardError::UnknownTask(task_id.to_string()))
    }

    /// Every task on the board.
    pub fn all_tasks(&self) -> Result<Vec<Task>, BoardError> {
        Ok(self.load()?.tasks)
    }

    fn load(&self) -> Result<BoardDocument, BoardError> {
        match load_json::<BoardDocument>(&self.path) {
            Ok(Some(doc)) => Ok(doc),
            Ok(None) => Ok(BoardDocument::default()),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                Err(BoardError::Corrupted(err.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn store(&self, doc: &BoardDocument) -> Result<(), BoardError> {
        store_json(&self.path, doc).map_err(Into::into)
    }
}
