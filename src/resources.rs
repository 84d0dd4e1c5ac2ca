// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Host resource monitoring for spawn admission control.
//!
//! Samples memory and CPU via `sysinfo` and derives a throttle factor when
//! usage exceeds configured ceilings. CPU usage is a delta between two
//! successive samples, so the first sample after construction has no baseline
//! and reports 0% rather than an error.

use std::sync::Mutex;

use sysinfo::System;
use tracing::debug;

use crate::config::{ResourceCeilings, SpawnLimits};

/// Minimum throttle factor; usage far over a ceiling never scales
/// parallelism below a quarter of the configured limit.
const MIN_THROTTLE_FACTOR: f64 = 0.25;

/// Ephemeral snapshot of host resource usage. Recomputed on demand,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    /// Used memory as a percentage of total.
    pub memory_percent: f64,
    /// Aggregate CPU usage percentage across all cores.
    pub cpu_percent: f64,
    /// Number of logical cores.
    pub core_count: usize,
}

/// Outcome of a throttle check.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleDecision {
    /// Whether any ceiling was exceeded.
    pub should_throttle: bool,
    /// Human-readable cause, present when throttling.
    pub reason: Option<String>,
    /// Parallelism cap after scaling; never below 1.
    pub effective_max_parallel: usize,
}

/// Samples host CPU/memory and computes throttle decisions.
pub struct ResourceMonitor {
    system: Mutex<System>,
    /// CPU deltas need a baseline; the first sample reports 0%.
    primed: Mutex<bool>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            primed: Mutex::new(false),
        }
    }

    /// Take a fresh usage snapshot.
    pub fn sample(&self) -> ResourceUsage {
        let mut system = self.system.lock().expect("resource monitor poisoned");
        system.refresh_memory();
        system.refresh_cpu_usage();

        let total = system.total_memory();
        let used = system.used_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };

        let mut primed = self.primed.lock().expect("resource monitor poisoned");
        let cpu_percent = if *primed {
            f64::from(system.global_cpu_usage())
        } else {
            *primed = true;
            0.0
        };

        ResourceUsage {
            memory_percent,
            cpu_percent,
            core_count: system.cpus().len(),
        }
    }

    /// Check current usage against the ceilings and scale `max_parallel`
    /// down when a ceiling is exceeded. The more restrictive of memory and
    /// CPU wins; the result never drops below 1.
    pub fn check_throttle(
        &self,
        limits: &SpawnLimits,
        ceilings: &ResourceCeilings,
    ) -> ThrottleDecision {
        let usage = self.sample();
        self.throttle_for(&usage, limits, ceilings)
    }

    /// Throttle computation on an explicit snapshot; split out so the math
    /// is testable without live host sampling.
    pub fn throttle_for(
        &self,
        usage: &ResourceUsage,
        limits: &SpawnLimits,
        ceilings: &ResourceCeilings,
    ) -> ThrottleDecision {
        let memory_factor = overshoot_factor(usage.memory_percent, ceilings.max_memory_percent);
        let cpu_factor = overshoot_factor(usage.cpu_percent, ceilings.max_cpu_percent);

        let mut reasons = Vec::new();
        if memory_factor < 1.0 {
            reasons.push(format!(
                "memory at {:.1}% exceeds the {:.0}% ceiling",
                usage.memory_percent, ceilings.max_memory_percent
            ));
        }
        if cpu_factor < 1.0 {
            reasons.push(format!(
                "CPU at {:.1}% exceeds the {:.0}% ceiling",
                usage.cpu_percent, ceilings.max_cpu_percent
            ));
        }

        let factor = memory_factor.min(cpu_factor);
        let effective = ((limits.max_parallel as f64) * factor).floor() as usize;
        let effective_max_parallel = effective.max(1);

        let should_throttle = factor < 1.0;
        if should_throttle {
            debug!(
                factor,
                effective_max_parallel,
                "Resource pressure, scaling parallelism"
            );
        }

        ThrottleDecision {
            should_throttle,
            reason: if reasons.is_empty() {
                None
            } else {
                Some(reasons.join("; "))
            },
            effective_max_parallel,
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Scale factor for one resource: 1.0 under the ceiling, otherwise
/// `max(0.25, 1 - excess / headroom)` where headroom is the distance from
/// the ceiling to 100%.
fn overshoot_factor(usage: f64, ceiling: f64) -> f64 {
    if usage <= ceiling {
        return 1.0;
    }
    let headroom = (100.0 - ceiling).max(1.0);
    let overshoot = (usage - ceiling) / headroom;
    (1.0 - overshoot).max(MIN_THROTTLE_FACTOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(memory: f64, cpu: f64) -> ResourceUsage {
        ResourceUsage {
            memory_percent: memory,
            cpu_percent: cpu,
            core_count: 8,
        }
    }

    #[test]
    fn test_first_sample_reports_zero_cpu() {
        let monitor = ResourceMonitor::new();
        let usage = monitor.sample();
        assert_eq!(usage.cpu_percent, 0.0);
    }

    #[test]
    fn test_no_throttle_under_ceilings() {
        let monitor = ResourceMonitor::new();
        let decision = monitor.throttle_for(
            &snapshot(50.0, 40.0),
            &SpawnLimits::default(),
            &ResourceCeilings::default(),
        );
        assert!(!decision.should_throttle);
        assert!(decision.reason.is_none());
        assert_eq!(decision.effective_max_parallel, 4);
    }

    #[test]
    fn test_memory_overshoot_scales_parallelism() {
        let monitor = ResourceMonitor::new();
        // ceiling 85, headroom 15; 92.5% is half the headroom over -> factor 0.5
        let decision = monitor.throttle_for(
            &snapshot(92.5, 10.0),
            &SpawnLimits::default(),
            &ResourceCeilings::default(),
        );
        assert!(decision.should_throttle);
        assert!(decision.reason.as_ref().unwrap().contains("memory"));
        assert_eq!(decision.effective_max_parallel, 2);
    }

    #[test]
    fn test_more_restrictive_resource_wins() {
        let monitor = ResourceMonitor::new();
        // CPU pinned at 100% -> factor floor 0.25; memory mildly over
        let decision = monitor.throttle_for(
            &snapshot(86.0, 100.0),
            &SpawnLimits::default().with_max_parallel(8),
            &ResourceCeilings::default(),
        );
        assert!(decision.should_throttle);
        assert_eq!(decision.effective_max_parallel, 2); // 8 * 0.25
        let reason = decision.reason.unwrap();
        assert!(reason.contains("memory"));
        assert!(reason.contains("CPU"));
    }

    #[test]
    fn test_throttle_never_below_one() {
        let monitor = ResourceMonitor::new();
        let decision = monitor.throttle_for(
            &snapshot(100.0, 100.0),
            &SpawnLimits::default().with_max_parallel(1),
            &ResourceCeilings::default(),
        );
        assert!(decision.should_throttle);
        assert_eq!(decision.effective_max_parallel, 1);
    }

    #[test]
    fn test_overshoot_factor_floor() {
        assert_eq!(overshoot_factor(100.0, 50.0), MIN_THROTTLE_FACTOR);
        assert_eq!(overshoot_factor(49.0, 50.0), 1.0);
    }
}
