// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Message protocol for structured envelopes embedded in worker text.
//!
//! The worker runtime offers no structured side-channel, only a linear text
//! transcript, so coordination messages are wrapped in unambiguous start/end
//! markers and smuggled through plain text. A worker that never emits an
//! envelope still works: `parse` returns an empty list and callers fall back
//! to the raw transcript tail.
//!
//! Wire form:
//!
//! ```text
//! [[FLOTILLA::BEGIN]]
//! result|worker-1|lead|2026-08-27T12:00:00Z
//! free-form content, any number of lines
//! ```json
//! {"filesChanged": 3}
//! ```
//! [[FLOTILLA::END]]
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProtocolError;
use crate::types::{now, MAX_MESSAGE_BYTES};

/// Start marker for an envelope. Must begin a line.
pub const ENVELOPE_BEGIN: &str = "[[FLOTILLA::BEGIN]]";

/// End marker for an envelope. Must begin a line.
pub const ENVELOPE_END: &str = "[[FLOTILLA::END]]";

const METADATA_FENCE_OPEN: &str = "```json";
const METADATA_FENCE_CLOSE: &str = "```";

/// Kind of a structured envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Point-to-point message.
    Message,
    /// Message to every team member.
    Broadcast,
    /// One-way informational notice.
    Notification,
    /// Request that the recipient shut down.
    ShutdownRequest,
    /// Approval or rejection of a shutdown request.
    ShutdownResponse,
    /// A worker's final result for its task.
    Result,
    /// A worker's final error for its task.
    Error,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Broadcast => "broadcast",
            Self::Notification => "notification",
            Self::ShutdownRequest => "shutdown_request",
            Self::ShutdownResponse => "shutdown_response",
            Self::Result => "result",
            Self::Error => "error",
        }
    }

    /// Whether this kind concludes a worker's task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result | Self::Error)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(Self::Message),
            "broadcast" => Ok(Self::Broadcast),
            "notification" => Ok(Self::Notification),
            "shutdown_request" => Ok(Self::ShutdownRequest),
            "shutdown_response" => Ok(Self::ShutdownResponse),
            "result" => Ok(Self::Result),
            "error" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

/// A structured message embedded in (or destined for) worker text.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub from: String,
    pub to: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    /// Optional structured payload carried in a fenced JSON block.
    pub metadata: Option<serde_json::Value>,
}

impl Envelope {
    pub fn new(
        kind: EnvelopeKind,
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            from: from.into(),
            to: to.into(),
            timestamp: now(),
            content: content.into(),
            metadata: None,
        }
    }

    /// Attach a structured metadata payload.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Create a result envelope.
    pub fn result(from: impl Into<String>, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Result, from, to, content)
    }

    /// Create an error envelope.
    pub fn error(from: impl Into<String>, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Error, from, to, content)
    }
}

/// Serialize an envelope to its marker-delimited text form.
///
/// Content larger than [`MAX_MESSAGE_BYTES`] is rejected, not truncated.
/// Content carrying a marker on a line of its own is rejected too: the wire
/// form has no escaping, so such content would terminate the envelope early
/// on parse.
pub fn serialize(envelope: &Envelope) -> Result<String, ProtocolError> {
    if envelope.content.len() > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::Oversized {
            len: envelope.content.len(),
            max: MAX_MESSAGE_BYTES,
        });
    }
    for line in envelope.content.lines() {
        let line = line.trim();
        if line == ENVELOPE_BEGIN {
            return Err(ProtocolError::ReservedMarker(ENVELOPE_BEGIN));
        }
        if line == ENVELOPE_END {
            return Err(ProtocolError::ReservedMarker(ENVELOPE_END));
        }
    }

    let mut out = String::new();
    out.push_str(ENVELOPE_BEGIN);
    out.push('\n');
    out.push_str(&format!(
        "{}|{}|{}|{}\n",
        envelope.kind,
        envelope.from,
        envelope.to,
        envelope.timestamp.to_rfc3339()
    ));
    out.push_str(&envelope.content);
    if !envelope.content.ends_with('\n') {
        out.push('\n');
    }
    if let Some(metadata) = &envelope.metadata {
        out.push_str(METADATA_FENCE_OPEN);
        out.push('\n');
        // Value serialization cannot fail
        out.push_str(&serde_json::to_string(metadata).unwrap_or_default());
        out.push('\n');
        out.push_str(METADATA_FENCE_CLOSE);
        out.push('\n');
    }
    out.push_str(ENVELOPE_END);
    out.push('\n');
    Ok(out)
}

/// Scan free-form text for envelopes.
///
/// Tolerates multiple envelopes, arbitrary text between them, malformed
/// headers (envelope skipped), malformed metadata (metadata dropped, content
/// kept), and unterminated envelopes (ignored). Never fails.
pub fn parse(text: &str) -> Vec<Envelope> {
    let mut envelopes = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        if line.trim() != ENVELOPE_BEGIN {
            continue;
        }

        let mut body: Vec<&str> = Vec::new();
        let mut terminated = false;
        for inner in lines.by_ref() {
            if inner.trim() == ENVELOPE_END {
                terminated = true;
                break;
            }
            body.push(inner);
        }
        if !terminated {
            debug!("Unterminated envelope in transcript, ignoring");
            break;
        }
        if let Some(envelope) = parse_body(&body) {
            envelopes.push(envelope);
        }
    }

    envelopes
}

/// Parse the lines between a marker pair. Returns `None` when the header is
/// unusable.
fn parse_body(body: &[&str]) -> Option<Envelope> {
    let (header, rest) = body.split_first()?;

    let mut fields = header.splitn(4, '|');
    let kind: EnvelopeKind = fields.next()?.trim().parse().ok()?;
    let from = fields.next()?.trim();
    let to = fields.next()?.trim();
    let timestamp = DateTime::parse_from_rfc3339(fields.next()?.trim())
        .ok()?
        .with_timezone(&Utc);
    if from.is_empty() || to.is_empty() {
        return None;
    }

    let (content_lines, metadata) = split_metadata(rest);

    Some(Envelope {
        kind,
        from: from.to_string(),
        to: to.to_string(),
        timestamp,
        content: content_lines.join("\n"),
        metadata,
    })
}

/// Split a trailing ```json fence off the content, if present. A malformed
/// block parses to no metadata but still strips the fence.
fn split_metadata<'a>(lines: &[&'a str]) -> (Vec<&'a str>, Option<serde_json::Value>) {
    let close = lines
        .iter()
        .rposition(|l| l.trim() == METADATA_FENCE_CLOSE);
    let open = lines.iter().rposition(|l| l.trim() == METADATA_FENCE_OPEN);

    match (open, close) {
        (Some(open), Some(close)) if open < close => {
            let metadata_text = lines[open + 1..close].join("\n");
            let metadata = match serde_json::from_str(&metadata_text) {
                Ok(value) => Some(value),
                Err(err) => {
                    debug!(%err, "Malformed envelope metadata, dropping");
                    None
                }
            };
            (lines[..open].to_vec(), metadata)
        }
        _ => (lines.to_vec(), None),
    }
}

/// Find the last `result` or `error` envelope in a transcript.
///
/// Used by the session poller to decide whether a worker has concluded
/// without re-interpreting the full transcript each poll.
pub fn extract_latest_result(text: &str) -> Option<Envelope> {
    parse(text)
        .into_iter()
        .rev()
        .find(|e| e.kind.is_terminal())
}
