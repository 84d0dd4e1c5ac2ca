// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Team directory: membership, lead authority, and per-team state layout.
//!
//! Each team owns one directory under the coordination root:
//!
//! ```text
//! <root>/<team>/team.json        membership and lead
//! <root>/<team>/tasks.json       task board
//! <root>/<team>/mailboxes/       one inbox file per agent
//! ```
//!
//! Every mutating operation verifies the caller is the recorded lead, except
//! status updates driven by the shutdown flow and the session poller.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::board::TaskBoard;
use crate::error::TeamError;
use crate::mailbox::Mailbox;
use crate::persist::{load_json, store_json, FileLock, LockOptions};
use crate::types::{now, WorkerCategory};

/// Maximum team name length.
const MAX_TEAM_NAME_LEN: usize = 64;

/// Lifecycle state of a team member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    ShuttingDown,
    Inactive,
}

/// One worker registered with a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub name: String,
    pub agent_id: String,
    pub category: WorkerCategory,
    /// External runtime handle for the member's worker session.
    pub session_handle: String,
    pub spawned_at: DateTime<Utc>,
    pub status: MemberStatus,
}

/// On-disk team config (`team.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
    pub name: String,
    pub lead_agent_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub members: Vec<TeamMember>,
}

impl TeamConfig {
    /// The lead and every registered member.
    pub fn roster(&self) -> Vec<String> {
        let mut roster = vec![self.lead_agent_id.clone()];
        roster.extend(self.members.iter().map(|m| m.agent_id.clone()));
        roster
    }
}

/// File-backed directory of teams.
pub struct TeamDirectory {
    root: PathBuf,
    lock_options: LockOptions,
}

impl TeamDirectory {
    pub fn new(root: impl Into<PathBuf>, lock_options: LockOptions) -> Self {
        Self {
            root: root.into(),
            lock_options,
        }
    }

    /// Create a team with `lead_id` as its immutable lead.
    pub async fn create_team(&self, name: &str, lead_id: &str) -> Result<TeamConfig, TeamError> {
        validate_team_name(name)?;

        let config_path = self.config_path(name);
        let guard = FileLock::acquire(&self.lock_path(name), &self.lock_options).await?;
        if config_path.exists() {
            guard.release();
            return Err(TeamError::AlreadyExists(name.to_string()));
        }

        let config = TeamConfig {
            name: name.to_string(),
            lead_agent_id: lead_id.to_string(),
            created_at: now(),
            members: Vec::new(),
        };
        std::fs::create_dir_all(self.team_dir(name).join("mailboxes"))?;
        store_json(&config_path, &config)?;
        guard.release();

        info!(team = name, lead = lead_id, "Team created");
        Ok(config)
    }

    /// Load a team's config.
    pub fn load_team(&self, name: &str) -> Result<TeamConfig, TeamError> {
        match load_json::<TeamConfig>(&self.config_path(name)) {
            Ok(Some(config)) => Ok(config),
            Ok(None) => Err(TeamError::NotFound(name.to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                Err(TeamError::Corrupted(err.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Whether `agent_id` is the recorded lead of `name`.
    pub fn is_team_lead(&self, name: &str, agent_id: &str) -> Result<bool, TeamError> {
        Ok(self.load_team(name)?.lead_agent_id == agent_id)
    }

    /// Whether `agent_id` is the lead or a registered member.
    pub fn is_member(&self, name: &str, agent_id: &str) -> Result<bool, TeamError> {
        let config = self.load_team(name)?;
        Ok(config.lead_agent_id == agent_id
            || config.members.iter().any(|m| m.agent_id == agent_id))
    }

    /// The team's member list (excluding the lead).
    pub fn team_members(&self, name: &str) -> Result<Vec<TeamMember>, TeamError> {
        Ok(self.load_team(name)?.members)
    }

    /// Register a newly spawned teammate. Invoked by the lead's spawn path.
    pub async fn add_teammate(
        &self,
        name: &str,
        caller: &str,
        member: TeamMember,
    ) -> Result<(), TeamError> {
        let guard = FileLock::acquire(&self.lock_path(name), &self.lock_options).await?;
        let mut config = self.load_team(name)?;
        self.ensure_lead(&config, caller)?;

        if config.members.iter().any(|m| m.agent_id == member.agent_id)
            || config.lead_agent_id == member.agent_id
        {
            guard.release();
            return Err(TeamError::DuplicateMember {
                team: name.to_string(),
                agent: member.agent_id,
            });
        }

        info!(team = name, agent = %member.agent_id, category = %member.category, "Teammate added");
        config.members.push(member);
        store_json(&self.config_path(name), &config)?;
        guard.release();
        Ok(())
    }

    /// Remove a teammate from the roster. Active members cannot be removed;
    /// request shutdown first.
    pub async fn remove_teammate(
        &self,
        name: &str,
        caller: &str,
        agent_id: &str,
    ) -> Result<(), TeamError> {
        let guard = FileLock::acquire(&self.lock_path(name), &self.lock_options).await?;
        let mut config = self.load_team(name)?;
        self.ensure_lead(&config, caller)?;

        let member = config
            .members
            .iter()
            .find(|m| m.agent_id == agent_id)
            .ok_or_else(|| TeamError::UnknownMember {
                team: name.to_string(),
                agent: agent_id.to_string(),
            })?;
        if member.status == MemberStatus::Active {
            guard.release();
            return Err(TeamError::MemberActive {
                team: name.to_string(),
                agent: agent_id.to_string(),
            });
        }

        config.members.retain(|m| m.agent_id != agent_id);
        store_json(&self.config_path(name), &config)?;
        guard.release();

        info!(team = name, agent = agent_id, "Teammate removed");
        Ok(())
    }

    /// Update a member's status. Driven by the shutdown exchange and the
    /// session poller, so no lead check.
    pub async fn update_teammate_status(
        &self,
        name: &str,
        agent_id: &str,
        status: MemberStatus,
    ) -> Result<(), TeamError> {
        let guard = FileLock::acquire(&self.lock_path(name), &self.lock_options).await?;
        let mut config = self.load_team(name)?;

        let member = config
            .members
            .iter_mut()
            .find(|m| m.agent_id == agent_id)
            .ok_or_else(|| TeamError::UnknownMember {
                team: name.to_string(),
                agent: agent_id.to_string(),
            })?;
        member.status = status;
        store_json(&self.config_path(name), &config)?;
        guard.release();

        info!(team = name, agent = agent_id, status = ?status, "Teammate status updated");
        Ok(())
    }

    /// Whether any member is still active.
    pub fn has_active_members(&self, name: &str) -> Result<bool, TeamError> {
        Ok(self
            .load_team(name)?
            .members
            .iter()
            .any(|m| m.status == MemberStatus::Active))
    }

    /// Delete a team and all its on-disk state. Fails while members are
    /// active unless `force`, which is an operator override for orphaned
    /// state.
    pub async fn delete_team(&self, name: &str, caller: &str, force: bool) -> Result<(), TeamError> {
        let guard = FileLock::acquire(&self.lock_path(name), &self.lock_options).await?;
        let config = self.load_team(name)?;
        self.ensure_lead(&config, caller)?;

        let active = config
            .members
            .iter()
            .filter(|m| m.status == MemberStatus::Active)
            .count();
        if active > 0 && !force {
            guard.release();
            return Err(TeamError::ActiveMembers {
                team: name.to_string(),
                count: active,
            });
        }
        if active > 0 {
            warn!(team = name, active, "Force-deleting team with active members");
        }

        guard.release();
        std::fs::remove_dir_all(self.team_dir(name))?;
        info!(team = name, "Team deleted");
        Ok(())
    }

    /// The team's task board.
    pub fn board(&self, name: &str) -> TaskBoard {
        TaskBoard::new(self.team_dir(name).join("tasks.json"), self.lock_options)
    }

    /// The team's mailboxes.
    pub fn mailbox(&self, name: &str) -> Mailbox {
        Mailbox::new(self.team_dir(name).join("mailboxes"), self.lock_options)
    }

    /// Directory holding one team's state.
    pub fn team_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.team_dir(name).join("team.json")
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.team_dir(name).join("team.json.lock")
    }

    fn ensure_lead(&self, config: &TeamConfig, agent_id: &str) -> Result<(), TeamError> {
        if config.lead_agent_id != agent_id {
            return Err(TeamError::NotLead {
                team: config.name.clone(),
                agent: agent_id.to_string(),
            });
        }
        Ok(())
    }
}

/// Team names are alphanumeric plus hyphens, bounded length.
fn validate_team_name(name: &str) -> Result<(), TeamError> {
    if name.is_empty() || name.len() > MAX_TEAM_NAME_LEN {
        return Err(TeamError::InvalidName(format!(
            "'{name}' must be 1-{MAX_TEAM_NAME_LEN} characters"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(TeamError::InvalidName(format!(
            "'{name}' may only contain letters, digits, and hyphens"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn directory(root: &Path) -> TeamDirectory {
        TeamDirectory::new(root.join("teams"), LockOptions::default())
    }

    fn member(agent_id: &str, status: MemberStatus) -> TeamMember {
        TeamMember {
            name: agent_id.to_string(),
            agent_id: agent_id.to_string(),
            category: WorkerCategory::General,
            session_handle: format!("handle-{agent_id}"),
            spawned_at: now(),
            status,
        }
    }

    #[tokio::test]
    async fn test_create_and_load_team() {
        let temp = tempdir().unwrap();
        let teams = directory(temp.path());

        let config = teams.create_team("sprint-7", "lead-1").await.unwrap();
        assert_eq!(config.lead_agent_id, "lead-1");
        assert!(config.members.is_empty());

        let loaded = teams.load_team("sprint-7").unwrap();
        assert_eq!(loaded.name, "sprint-7");
        assert!(teams.is_team_lead("sprint-7", "lead-1").unwrap());
        assert!(!teams.is_team_lead("sprint-7", "stranger").unwrap());
        assert!(teams.team_dir("sprint-7").join("mailboxes").is_dir());
    }

    #[tokio::test]
    async fn test_duplicate_team_rejected() {
        let temp = tempdir().unwrap();
        let teams = directory(temp.path());
        teams.create_team("alpha", "lead-1").await.unwrap();
        let err = teams.create_team("alpha", "lead-2").await.unwrap_err();
        assert!(matches!(err, TeamError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_team_name_validation() {
        let temp = tempdir().unwrap();
        let teams = directory(temp.path());

        for bad in ["", "has space", "under_score", "dots.die", &"x".repeat(65)] {
            let err = teams.create_team(bad, "lead-1").await.unwrap_err();
            assert!(matches!(err, TeamError::InvalidName(_)), "{bad:?}");
        }
        teams.create_team("Good-Name-7", "lead-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_add_teammate_requires_lead() {
        let temp = tempdir().unwrap();
        let teams = directory(temp.path());
        teams.create_team("alpha", "lead-1").await.unwrap();

        let err = teams
            .add_teammate("alpha", "impostor", member("w1", MemberStatus::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, TeamError::NotLead { .. }));

        teams
            .add_teammate("alpha", "lead-1", member("w1", MemberStatus::Active))
            .await
            .unwrap();
        assert_eq!(teams.team_members("alpha").unwrap().len(), 1);
        assert!(teams.is_member("alpha", "w1").unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_member_rejected() {
        let temp = tempdir().unwrap();
        let teams = directory(temp.path());
        teams.create_team("alpha", "lead-1").await.unwrap();
        teams
            .add_teammate("alpha", "lead-1", member("w1", MemberStatus::Active))
            .await
            .unwrap();

        let err = teams
            .add_teammate("alpha", "lead-1", member("w1", MemberStatus::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, TeamError::DuplicateMember { .. }));
    }

    #[tokio::test]
    async fn test_delete_guard_on_active_members() {
        let temp = tempdir().unwrap();
        let teams = directory(temp.path());
        teams.create_team("alpha", "lead-1").await.unwrap();
        teams
            .add_teammate("alpha", "lead-1", member("w1", MemberStatus::Active))
            .await
            .unwrap();

        let err = teams.delete_team("alpha", "lead-1", false).await.unwrap_err();
        assert!(matches!(err, TeamError::ActiveMembers { count: 1, .. }));

        teams
            .update_teammate_status("alpha", "w1", MemberStatus::Inactive)
            .await
            .unwrap();
        teams.delete_team("alpha", "lead-1", false).await.unwrap();
        assert!(matches!(
            teams.load_team("alpha").unwrap_err(),
            TeamError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_force_delete_overrides_guard() {
        let temp = tempdir().unwrap();
        let teams = directory(temp.path());
        teams.create_team("alpha", "lead-1").await.unwrap();
        teams
            .add_teammate("alpha", "lead-1", member("w1", MemberStatus::Active))
            .await
            .unwrap();

        teams.delete_team("alpha", "lead-1", true).await.unwrap();
        assert!(!teams.team_dir("alpha").exists());
    }

    #[tokio::test]
    async fn test_remove_active_member_rejected() {
        let temp = tempdir().unwrap();
        let teams = directory(temp.path());
        teams.create_team("alpha", "lead-1").await.unwrap();
        teams
            .add_teammate("alpha", "lead-1", member("w1", MemberStatus::Active))
            .await
            .unwrap();

        let err = teams
            .remove_teammate("alpha", "lead-1", "w1")
            .await
            .unwrap_err();
        assert!(matches!(err, TeamError::MemberActive { .. }));

        teams
            .update_teammate_status("alpha", "w1", MemberStatus::Inactive)
            .await
            .unwrap();
        teams.remove_teammate("alpha", "lead-1", "w1").await.unwrap();
        assert!(teams.team_members("alpha").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_roster_includes_lead() {
        let temp = tempdir().unwrap();
        let teams = directory(temp.path());
        teams.create_team("alpha", "lead-1").await.unwrap();
        teams
            .add_teammate("alpha", "lead-1", member("w1", MemberStatus::Active))
            .await
            .unwrap();

        let roster = teams.load_team("alpha").unwrap().roster();
        assert_eq!(roster, vec!["lead-1".to_string(), "w1".to_string()]);
    }
}
