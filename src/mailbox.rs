// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-agent mailbox files for point-to-point and broadcast messaging.
//!
//! Each recipient has its own append-only inbox file under the team's
//! `mailboxes/` directory. An inbox is written only by senders targeting
//! that one recipient and read only by its owner, so there is no
//! cross-recipient locking; concurrent senders to the same recipient
//! serialize through the per-inbox lock. Shutdown is an ordinary message
//! exchange: a `shutdown_request` answered by a `shutdown_response`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::MailboxError;
use crate::persist::{load_json, store_json, FileLock, LockOptions};
use crate::types::{generate_id, now, MAX_MESSAGE_BYTES};

/// Kind of a mailbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Message,
    Broadcast,
    Notification,
    ShutdownRequest,
    ShutdownResponse,
}

/// One message in an inbox. Content is never edited after send; only the
/// `read` flag flips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InboxDocument {
    messages: Vec<Message>,
}

/// File-backed mailboxes for one team.
pub struct Mailbox {
    dir: PathBuf,
    lock_options: LockOptions,
}

impl Mailbox {
    pub fn new(dir: impl Into<PathBuf>, lock_options: LockOptions) -> Self {
        Self {
            dir: dir.into(),
            lock_options,
        }
    }

    /// Directory holding the inbox files, for inclusion in teammate prompts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Send a message to one recipient's inbox.
    ///
    /// Oversized content is rejected, not truncated.
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, MailboxError> {
        if content.len() > MAX_MESSAGE_BYTES {
            return Err(MailboxError::Oversized {
                len: content.len(),
                max: MAX_MESSAGE_BYTES,
            });
        }
        let inbox = self.inbox_path(to)?;

        let message = Message {
            id: generate_id(),
            from: from.to_string(),
            to: to.to_string(),
            kind,
            content: content.to_string(),
            timestamp: now(),
            read: false,
        };

        let guard = FileLock::acquire(&self.lock_path(&inbox), &self.lock_options).await?;
        let mut doc = self.load(&inbox)?;
        doc.messages.push(message.clone());
        store_json(&inbox, &doc)?;
        guard.release();

        debug!(from, to, kind = ?kind, id = %message.id, "Message delivered");
        Ok(message)
    }

    /// Deliver a broadcast to every recipient except the sender.
    pub async fn broadcast(
        &self,
        from: &str,
        content: &str,
        recipients: &[String],
    ) -> Result<Vec<Message>, MailboxError> {
        let mut delivered = Vec::new();
        for recipient in recipients {
            if recipient == from {
                continue;
            }
            delivered.push(
                self.send(from, recipient, content, MessageKind::Broadcast)
                    .await?,
            );
        }
        info!(from, count = delivered.len(), "Broadcast delivered");
        Ok(delivered)
    }

    /// Read an agent's inbox, optionally only unread messages.
    pub fn messages(&self, agent_id: &str, unread_only: bool) -> Result<Vec<Message>, MailboxError> {
        let doc = self.load(&self.inbox_path(agent_id)?)?;
        Ok(doc
            .messages
            .into_iter()
            .filter(|m| !unread_only || !m.read)
            .collect())
    }

    /// Mark specific messages read. Unknown ids are ignored; returns how
    /// many flipped.
    pub async fn mark_read(&self, agent_id: &str, ids: &[String]) -> Result<usize, MailboxError> {
        self.flip_read(agent_id, |m| ids.iter().any(|id| id == &m.id))
            .await
    }

    /// Mark the whole inbox read; returns how many flipped.
    pub async fn mark_all_read(&self, agent_id: &str) -> Result<usize, MailboxError> {
        self.flip_read(agent_id, |_| true).await
    }

    async fn flip_read(
        &self,
        agent_id: &str,
        select: impl Fn(&Message) -> bool,
    ) -> Result<usize, MailboxError> {
        let inbox = self.inbox_path(agent_id)?;
        let guard = FileLock::acquire(&self.lock_path(&inbox), &self.lock_options).await?;
        let mut doc = self.load(&inbox)?;

        let mut flipped = 0;
        for message in doc.messages.iter_mut() {
            if !message.read && select(message) {
                message.read = true;
                flipped += 1;
            }
        }
        if flipped > 0 {
            store_json(&inbox, &doc)?;
        }
        guard.release();
        Ok(flipped)
    }

    /// Oldest unread shutdown request addressed to this agent, if any.
    pub fn pending_shutdown_request(&self, agent_id: &str) -> Result<Option<Message>, MailboxError> {
        Ok(self
            .messages(agent_id, true)?
            .into_iter()
            .find(|m| m.kind == MessageKind::ShutdownRequest))
    }

    /// Answer a shutdown request: mark it read and send a response back to
    /// the requester.
    pub async fn respond_shutdown(
        &self,
        agent_id: &str,
        request_id: &str,
        approve: bool,
        reason: Option<&str>,
    ) -> Result<Message, MailboxError> {
        let request = self
            .messages(agent_id, false)?
            .into_iter()
            .find(|m| m.id == request_id && m.kind == MessageKind::ShutdownRequest)
            .ok_or_else(|| MailboxError::UnknownMessage(request_id.to_string()))?;

        self.mark_read(agent_id, &[request_id.to_string()]).await?;

        let content = match (approve, reason) {
            (true, _) => "approved".to_string(),
            (false, Some(reason)) => format!("rejected: {reason}"),
            (false, None) => "rejected".to_string(),
        };
        self.send(agent_id, &request.from, &content, MessageKind::ShutdownResponse)
            .await
    }

    fn inbox_path(&self, agent_id: &str) -> Result<PathBuf, MailboxError> {
        if agent_id.is_empty()
            || agent_id.contains(['/', '\\', '.'])
            || agent_id.contains(char::is_whitespace)
        {
            return Err(MailboxError::InvalidRecipient(agent_id.to_string()));
        }
        Ok(self.dir.join(format!("{agent_id}.json")))
    }

    fn lock_path(&self, inbox: &Path) -> PathBuf {
        let mut lock = inbox.as_os_str().to_os_string();
        lock.push(".lock");
        PathBuf::from(lock)
    }

    fn load(&self, inbox: &Path) -> Result<InboxDocument, MailboxError> {
        match load_json::<InboxDocument>(inbox) {
            Ok(Some(doc)) => Ok(doc),
            Ok(None) => Ok(InboxDocument::default()),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                Err(MailboxError::Corrupted(err.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}
