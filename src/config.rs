// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Coordinator configuration.
//!
//! All tunables live here as explicit inputs rather than constants buried in
//! the components: poll cadence, spawn ceilings, resource ceilings, and the
//! lock retry/staleness policy shared by the task board and mailboxes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::persist::LockOptions;

/// Default interval between status polls of an in-flight worker.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default cap on concurrently running workers.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Default cap on total spawns for one coordinator run.
pub const DEFAULT_MAX_TOTAL: usize = 20;

/// Default memory ceiling (percent) before spawn throttling kicks in.
pub const DEFAULT_MAX_MEMORY_PERCENT: f64 = 85.0;

/// Default CPU ceiling (percent) before spawn throttling kicks in.
pub const DEFAULT_MAX_CPU_PERCENT: f64 = 90.0;

/// Ceilings on concurrent and total worker spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnLimits {
    /// Maximum workers running at once.
    pub max_parallel: usize,
    /// Maximum workers spawned over the coordinator's lifetime.
    pub max_total: usize,
}

impl Default for SpawnLimits {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            max_total: DEFAULT_MAX_TOTAL,
        }
    }
}

impl SpawnLimits {
    /// Return a copy with `max_parallel` replaced (used by throttling).
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }
}

/// Host resource ceilings that trigger spawn throttling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceCeilings {
    /// Memory usage percent above which parallelism is scaled down.
    pub max_memory_percent: f64,
    /// CPU usage percent above which parallelism is scaled down.
    pub max_cpu_percent: f64,
}

impl Default for ResourceCeilings {
    fn default() -> Self {
        Self {
            max_memory_percent: DEFAULT_MAX_MEMORY_PERCENT,
            max_cpu_percent: DEFAULT_MAX_CPU_PERCENT,
        }
    }
}

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Directory under which team state (config, board, mailboxes) lives.
    pub coordination_root: PathBuf,
    /// How often each in-flight worker is polled for completion.
    pub poll_interval: Duration,
    /// Spawn ceilings enforced by the agent registry.
    pub limits: SpawnLimits,
    /// Host resource ceilings for spawn throttling.
    pub ceilings: ResourceCeilings,
    /// File-lock retry and staleness policy for shared state.
    pub lock: LockOptions,
}

impl CoordinatorConfig {
    /// Create configuration rooted at `<project_root>/.flotilla/teams`.
    pub fn for_project(project_root: &Path) -> Self {
        Self {
            coordination_root: project_root.join(".flotilla").join("teams"),
            ..Self::default()
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            coordination_root: default_coordination_root(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            limits: SpawnLimits::default(),
            ceilings: ResourceCeilings::default(),
            lock: LockOptions::default(),
        }
    }
}

fn default_coordination_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".flotilla")
        .join("teams")
}
