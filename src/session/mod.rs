// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker session lifecycle: spawn, poll, adopt outcomes, abort, wait.

mod manager;
mod types;

pub use manager::SessionManager;
pub use types::{AgentDefinition, SessionStatus, TaskSession};
