// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Abstraction over the external worker runtime.
//!
//! The session manager never talks to a concrete agent host directly; it
//! drives this trait. Sends are fire-and-forget and outcomes are read back
//! from transcripts, so a slow worker never blocks the coordination loop.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// What a worker session is doing right now, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerActivity {
    /// The worker has no in-flight turn; its transcript is settled.
    Idle,
    /// The worker is still producing output.
    Busy,
}

/// One entry of a worker's conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptPart {
    pub role: String,
    pub text: String,
}

/// A file the worker created, modified, or deleted during its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    pub change: String,
}

/// Interface to the host process that actually runs worker sessions.
///
/// Implementations must make [`send`](WorkerRuntime::send) non-blocking: it
/// queues work and returns, and completion is observed later through
/// [`status`](WorkerRuntime::status) plus
/// [`transcript`](WorkerRuntime::transcript).
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    /// Create a new worker session, returning the host's opaque handle.
    async fn create(&self, parent_handle: &str) -> Result<String, RuntimeError>;

    /// Queue a task for the worker. Returns as soon as the host accepts it.
    async fn send(
        &self,
        handle: &str,
        system_prompt: &str,
        task: &str,
        model: Option<&str>,
    ) -> Result<(), RuntimeError>;

    /// Activity of every session this runtime knows about, keyed by handle.
    async fn status(&self) -> Result<HashMap<String, WorkerActivity>, RuntimeError>;

    /// Full transcript of a session, oldest first.
    async fn transcript(&self, handle: &str) -> Result<Vec<TranscriptPart>, RuntimeError>;

    /// Tear down a session. Best effort; the host may already be gone.
    async fn abort(&self, handle: &str) -> Result<(), RuntimeError>;

    /// File changes accumulated by a session.
    async fn diff(&self, handle: &str) -> Result<Vec<FileChange>, RuntimeError>;
}

#[derive(Debug)]
struct ScriptedWorker {
    activity: WorkerActivity,
    transcript: Vec<TranscriptPart>,
    sent_tasks: Vec<String>,
    aborted: bool,
    diff: Vec<FileChange>,
}

#[derive(Default)]
struct ScriptedState {
    workers: HashMap<String, ScriptedWorker>,
    next_id: usize,
    unreachable: bool,
    create_delay: Option<std::time::Duration>,
}

/// In-memory [`WorkerRuntime`] driven by the test harness.
///
/// Freshly created workers report busy; calling [`conclude`](Self::conclude)
/// settles their transcript and flips them idle, which is what the session
/// poller watches for.
#[derive(Default)]
pub struct ScriptedRuntime {
    state: Mutex<ScriptedState>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish a worker: append `text` as its final assistant turn and mark
    /// it idle.
    pub fn conclude(&self, handle: &str, text: &str) {
        let mut state = self.state.lock().expect("scripted runtime poisoned");
        if let Some(worker) = state.workers.get_mut(handle) {
            worker.transcript.push(TranscriptPart {
                role: "assistant".to_string(),
                text: text.to_string(),
            });
            worker.activity = WorkerActivity::Idle;
        }
    }

    /// Make `create` yield for `delay` before the session exists, to widen
    /// windows between admission and handle creation.
    pub fn set_create_delay(&self, delay: std::time::Duration) {
        self.state
            .lock()
            .expect("scripted runtime poisoned")
            .create_delay = Some(delay);
    }

    /// Make every `status` call fail until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state
            .lock()
            .expect("scripted runtime poisoned")
            .unreachable = unreachable;
    }

    /// Task texts sent to a worker, in order.
    pub fn sent_tasks(&self, handle: &str) -> Vec<String> {
        self.state
            .lock()
            .expect("scripted runtime poisoned")
            .workers
            .get(handle)
            .map(|w| w.sent_tasks.clone())
            .unwrap_or_default()
    }

    /// Whether `abort` was signalled for a worker.
    pub fn was_aborted(&self, handle: &str) -> bool {
        self.state
            .lock()
            .expect("scripted runtime poisoned")
            .workers
            .get(handle)
            .map(|w| w.aborted)
            .unwrap_or(false)
    }

    /// Script the file changes a worker will report.
    pub fn set_diff(&self, handle: &str, diff: Vec<FileChange>) {
        let mut state = self.state.lock().expect("scripted runtime poisoned");
        if let Some(worker) = state.workers.get_mut(handle) {
            worker.diff = diff;
        }
    }
}

#[async_trait]
impl WorkerRuntime for ScriptedRuntime {
    async fn create(&self, _parent_handle: &str) -> Result<String, RuntimeError> {
        let delay = self
            .state
            .lock()
            .expect("scripted runtime poisoned")
            .create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().expect("scripted runtime poisoned");
        state.next_id += 1;
        let handle = format!("scripted-{}", state.next_id);
        state.workers.insert(
            handle.clone(),
            ScriptedWorker {
                activity: WorkerActivity::Busy,
                transcript: Vec::new(),
                sent_tasks: Vec::new(),
                aborted: false,
                diff: Vec::new(),
            },
        );
        Ok(handle)
    }

    async fn send(
        &self,
        handle: &str,
        _system_prompt: &str,
        task: &str,
        _model: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().expect("scripted runtime poisoned");
        let worker = state
            .workers
            .get_mut(handle)
            .ok_or_else(|| RuntimeError::UnknownHandle(handle.to_string()))?;
        worker.sent_tasks.push(task.to_string());
        worker.transcript.push(TranscriptPart {
            role: "user".to_string(),
            text: task.to_string(),
        });
        Ok(())
    }

    async fn status(&self) -> Result<HashMap<String, WorkerActivity>, RuntimeError> {
        let state = self.state.lock().expect("scripted runtime poisoned");
        if state.unreachable {
            return Err(RuntimeError::Unreachable(
                "scripted runtime offline".to_string(),
            ));
        }
        Ok(state
            .workers
            .iter()
            .map(|(handle, worker)| (handle.clone(), worker.activity))
            .collect())
    }

    async fn transcript(&self, handle: &str) -> Result<Vec<TranscriptPart>, RuntimeError> {
        let state = self.state.lock().expect("scripted runtime poisoned");
        state
            .workers
            .get(handle)
            .map(|w| w.transcript.clone())
            .ok_or_else(|| RuntimeError::UnknownHandle(handle.to_string()))
    }

    async fn abort(&self, handle: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().expect("scripted runtime poisoned");
        if let Some(worker) = state.workers.get_mut(handle) {
            worker.aborted = true;
            worker.activity = WorkerActivity::Idle;
        }
        Ok(())
    }

    async fn diff(&self, handle: &str) -> Result<Vec<FileChange>, RuntimeError> {
        let state = self.state.lock().expect("scripted runtime poisoned");
        state
            .workers
            .get(handle)
            .map(|w| w.diff.clone())
            .ok_or_else(|| RuntimeError::UnknownHandle(handle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_lifecycle() {
        let runtime = ScriptedRuntime::new();
        let handle = runtime.create("").await.unwrap();
        runtime.send(&handle, "prompt", "the task", None).await.unwrap();
        assert_eq!(runtime.sent_tasks(&handle), vec!["the task".to_string()]);

        let status = runtime.status().await.unwrap();
        assert_eq!(status[&handle], WorkerActivity::Busy);

        runtime.conclude(&handle, "all done");
        let status = runtime.status().await.unwrap();
        assert_eq!(status[&handle], WorkerActivity::Idle);
        let transcript = runtime.transcript(&handle).await.unwrap();
        assert_eq!(transcript.last().unwrap().text, "all done");
    }

    #[tokio::test]
    async fn test_scripted_unreachable() {
        let runtime = ScriptedRuntime::new();
        runtime.set_unreachable(true);
        assert!(matches!(
            runtime.status().await,
            Err(RuntimeError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_send_to_unknown_handle() {
        let runtime = ScriptedRuntime::new();
        let err = runtime.send("ghost", "p", "t", None).await.unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownHandle(_)));
    }
}
