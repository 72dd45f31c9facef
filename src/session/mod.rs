//! Session management module.
//!
//! This module provides types and utilities for managing shell sessions,
//! including session identification, state tracking, and the registry that
//! owns every live session.

mod context;
mod id;
mod registry;
mod shell_session;
mod state;

pub use context::{CommandRecord, SessionContext};
pub use id::SessionId;
pub use registry::{RegistryConfig, SessionRegistry, SpawnOptions, RETIRED_CAPACITY};
pub use shell_session::{CloseSummary, SessionInfo, SessionSettings, ShellSession};
pub use state::SessionState;
