// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared small types used across the coordination crate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Agent id the coordinator uses as the sender of dispatched tasks.
pub const COORDINATOR_ID: &str = "coordinator";

/// Recipient sentinel used in envelope headers for broadcast messages.
pub const BROADCAST_RECIPIENT: &str = "*";

/// Upper bound on message content, enforced by both the protocol codec
/// and the mailbox before anything touches disk.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024;

/// Generate a unique id for messages, tasks, and lock owner tokens.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Role a worker plays within a team.
///
/// Kept as a closed set so an unknown category is a validation failure
/// rather than a silent passthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerCategory {
    /// General-purpose worker.
    General,
    /// Research and investigation.
    Research,
    /// Implementation work.
    Implement,
    /// Code or document review.
    Review,
    /// Testing and verification.
    Test,
}

impl WorkerCategory {
    /// All recognized category names, for error messages.
    pub const NAMES: &'static [&'static str] =
        &["general", "research", "implement", "review", "test"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Research => "research",
            Self::Implement => "implement",
            Self::Review => "review",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for WorkerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(Self::General),
            "research" => Ok(Self::Research),
            "implement" => Ok(Self::Implement),
            "review" => Ok(Self::Review),
            "test" => Ok(Self::Test),
            other => Err(format!(
                "unknown category '{other}' (expected one of: {})",
                Self::NAMES.join(", ")
            )),
        }
    }
}

impl Default for WorkerCategory {
    fn default() -> Self {
        Self::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_category_round_trip() {
        for name in WorkerCategory::NAMES {
            let cat: WorkerCategory = name.parse().unwrap();
            assert_eq!(cat.as_str(), *name);
        }
    }

    #[test]
    fn test_category_unknown() {
        let err = "wizard".parse::<WorkerCategory>().unwrap_err();
        assert!(err.contains("unknown category"));
        assert!(err.contains("general"));
    }

    #[test]
    fn test_category_serde() {
        let json = serde_json::to_string(&WorkerCategory::Research).unwrap();
        assert_eq!(json, "\"research\"");
        let cat: WorkerCategory = serde_json::from_str("\"review\"").unwrap();
        assert_eq!(cat, WorkerCategory::Review);
    }
}
