// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool registry and handler trait.
//!
//! This module defines the core abstractions for the tool system:
//! - [`ToolHandler`] trait that all tools must implement
//! - [`ToolRegistry`] for managing and dispatching tool calls
//! - [`ToolOutput`] for returning results from tool execution

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ToolError;

use super::{ToolContext, ToolDefinition};

/// Output from executing a tool.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// Simple text content result
    Text { content: String, success: bool },
    /// Structured result with optional metadata
    Structured {
        content: String,
        success: bool,
        metadata: Option<serde_json::Value>,
    },
}

impl ToolOutput {
    /// Create a successful text output.
    pub fn success(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            success: true,
        }
    }

    /// Create an error text output.
    pub fn error(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            success: false,
        }
    }

    /// Create a structured output with metadata.
    pub fn structured(
        content: impl Into<String>,
        success: bool,
        metadata: serde_json::Value,
    ) -> Self {
        Self::Structured {
            content: content.into(),
            success,
            metadata: Some(metadata),
        }
    }

    /// Get the content string.
    pub fn content(&self) -> &str {
        match self {
            Self::Text { content, .. } => content,
            Self::Structured { content, .. } => content,
        }
    }

    /// Get the metadata, if this is a structured output carrying some.
    pub fn metadata(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Text { .. } => None,
            Self::Structured { metadata, .. } => metadata.as_ref(),
        }
    }

    /// Check if the output indicates success.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Text { success, .. } => *success,
            Self::Structured { success, .. } => *success,
        }
    }

    /// Get a preview suitable for logging (truncated).
    pub fn log_preview(&self, max_bytes: usize) -> String {
        let content = self.content();
        if content.len() <= max_bytes {
            content.to_string()
        } else {
            format!("{}... [truncated]", &content[..max_bytes])
        }
    }
}

impl From<ToolError> for ToolOutput {
    fn from(err: ToolError) -> Self {
        Self::error(err.to_string())
    }
}

/// Trait that all tool handlers must implement.
///
/// Each tool is a struct holding its [`ToolContext`] that implements this
/// trait, providing its definition and execution logic.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition (name, description, input schema).
    fn definition(&self) -> ToolDefinition;

    /// Returns true if this tool may mutate coordination state.
    fn is_mutating(&self) -> bool {
        false
    }

    /// Execute the tool with the given input parameters.
    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Registry of available tools, maps names to handlers.
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The tool set offered to a team lead.
    pub fn for_lead(ctx: &Arc<ToolContext>) -> Self {
        let mut builder = ToolRegistryBuilder::new();
        builder.register(super::lead::CreateTeamHandler::new(Arc::clone(ctx)));
        builder.register(super::lead::SpawnTeammateHandler::new(Arc::clone(ctx)));
        builder.register(super::lead::MessageTeammateHandler::new(Arc::clone(ctx)));
        builder.register(super::lead::BroadcastHandler::new(Arc::clone(ctx)));
        builder.register(super::lead::ShutdownTeammateHandler::new(Arc::clone(ctx)));
        builder.register(super::lead::CleanupTeamHandler::new(Arc::clone(ctx)));
        builder.register(super::lead::ListTeammatesHandler::new(Arc::clone(ctx)));
        builder.register(super::lead::CreateTaskHandler::new(Arc::clone(ctx)));
        builder.register(super::lead::ListTasksHandler::new(Arc::clone(ctx)));
        builder.build()
    }

    /// The tool set offered to a teammate.
    pub fn for_teammate(ctx: &Arc<ToolContext>) -> Self {
        let mut builder = ToolRegistryBuilder::new();
        builder.register(super::teammate::ClaimTaskHandler::new(Arc::clone(ctx)));
        builder.register(super::teammate::CompleteTaskHandler::new(Arc::clone(ctx)));
        builder.register(super::teammate::SendMessageHandler::new(Arc::clone(ctx)));
        builder.register(super::teammate::CheckMessagesHandler::new(Arc::clone(ctx)));
        builder.register(super::teammate::GetTeamMembersHandler::new(Arc::clone(ctx)));
        builder.register(super::teammate::ApproveShutdownHandler::new(Arc::clone(ctx)));
        builder.register(super::teammate::RejectShutdownHandler::new(Arc::clone(ctx)));
        builder.register(super::teammate::GetClaimableTasksHandler::new(Arc::clone(ctx)));
        builder.build()
    }

    /// Get a handler by tool name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Check if a tool exists.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Get all tool definitions.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.handlers.values().map(|h| h.definition()).collect()
    }

    /// Get all tool names.
    pub fn tool_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Dispatch a tool call and return the result.
    ///
    /// Handler errors are folded into an error [`ToolOutput`] rather than
    /// propagated; only an unknown tool name is an `Err`.
    pub async fn dispatch(
        &self,
        tool_name: &str,
        input: serde_json::Value,
    ) -> Result<DispatchResult, ToolError> {
        let handler = self
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;

        debug!(tool = %tool_name, "Executing tool");
        let start = Instant::now();
        let result = handler.execute(input).await;
        let duration = start.elapsed();

        match result {
            Ok(output) => {
                debug!(
                    tool = %tool_name,
                    duration_ms = duration.as_secs_f64() * 1000.0,
                    success = output.is_success(),
                    "Tool execution finished"
                );
                Ok(DispatchResult {
                    tool_name: tool_name.to_string(),
                    output,
                    duration,
                    is_error: false,
                })
            }
            Err(err) => {
                debug!(
                    tool = %tool_name,
                    duration_ms = duration.as_secs_f64() * 1000.0,
                    error = %err,
                    "Tool execution failed"
                );
                Ok(DispatchResult {
                    tool_name: tool_name.to_string(),
                    output: ToolOutput::from(err),
                    duration,
                    is_error: true,
                })
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of dispatching a tool call.
#[derive(Debug)]
pub struct DispatchResult {
    /// Name of the tool that was called
    pub tool_name: String,
    /// Output from the tool
    pub output: ToolOutput,
    /// Duration of execution
    pub duration: Duration,
    /// Whether the execution resulted in an error
    pub is_error: bool,
}

/// Builder for constructing a ToolRegistry.
pub struct ToolRegistryBuilder {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistryBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a tool handler.
    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) -> &mut Self {
        let def = handler.definition();
        self.handlers.insert(def.name.clone(), Arc::new(handler));
        self
    }

    /// Register a tool handler (boxed version for dynamic registration).
    pub fn register_boxed(&mut self, handler: Arc<dyn ToolHandler>) -> &mut Self {
        let def = handler.definition();
        self.handlers.insert(def.name.clone(), handler);
        self
    }

    /// Build the final registry.
    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            handlers: self.handlers,
        }
    }
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
