// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent registry for spawn admission control.
//!
//! Tracks which agent ids currently occupy a worker slot and how many workers
//! have been spawned this run. Concurrent spawns race with each other and
//! with completion callbacks, so admission is check-and-reserve under one
//! mutex: `try_reserve` claims the slot in the same critical section that
//! checks the limits, and the caller releases it with `mark_inactive` if the
//! spawn fails downstream.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::config::SpawnLimits;

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Whether a new worker may be spawned.
    pub allowed: bool,
    /// Why the spawn was rejected, when it was.
    pub reason: Option<String>,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    /// Active agent id -> external runtime handle.
    active: HashMap<String, String>,
    /// Cumulative spawns this run. Never decremented.
    total_spawned: usize,
}

/// Bookkeeping for worker slots and spawn ceilings.
pub struct AgentRegistry {
    inner: Mutex<RegistryInner>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Atomically check the limits and claim a worker slot for `agent_id`.
    ///
    /// The check and the claim share one critical section, so two concurrent
    /// spawns can never both pass a full-but-for-one admission check. A
    /// successful reservation counts toward the cumulative spawn total; the
    /// caller must release it with [`mark_inactive`](Self::mark_inactive) if
    /// the spawn fails before a session exists.
    pub fn try_reserve(&self, agent_id: &str, limits: &SpawnLimits) -> Admission {
        let mut inner = self.inner.lock().expect("registry poisoned");
        if inner.active.contains_key(agent_id) {
            return Admission::rejected(format!(
                "agent {agent_id} already occupies a worker slot"
            ));
        }
        if inner.active.len() >= limits.max_parallel {
            return Admission::rejected(format!(
                "{} of {} worker slots in use; wait for a worker to finish",
                inner.active.len(),
                limits.max_parallel
            ));
        }
        if inner.total_spawned >= limits.max_total {
            return Admission::rejected(format!(
                "spawn budget exhausted ({} of {} total spawns used)",
                inner.total_spawned, limits.max_total
            ));
        }

        inner.active.insert(agent_id.to_string(), String::new());
        inner.total_spawned += 1;
        debug!(agent_id, active = inner.active.len(), "Slot reserved");
        Admission::allowed()
    }

    /// Attach the external runtime handle to a reserved slot.
    pub fn assign_handle(&self, agent_id: &str, handle: &str) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        if let Some(slot) = inner.active.get_mut(agent_id) {
            *slot = handle.to_string();
        }
        debug!(agent_id, handle, "Agent active");
    }

    /// Release an agent's worker slot. Idempotent.
    pub fn mark_inactive(&self, agent_id: &str) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        if inner.active.remove(agent_id).is_some() {
            debug!(agent_id, active = inner.active.len(), "Agent inactive");
        }
    }

    /// Number of agents currently occupying worker slots.
    pub fn active_count(&self) -> usize {
        self.inner.lock().expect("registry poisoned").active.len()
    }

    /// Cumulative spawns this run.
    pub fn total_spawned(&self) -> usize {
        self.inner.lock().expect("registry poisoned").total_spawned
    }

    /// Runtime handle for an active agent, if any.
    pub fn handle_for(&self, agent_id: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("registry poisoned")
            .active
            .get(agent_id)
            .cloned()
    }

}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
