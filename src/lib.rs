//! # arbitrium
//!
//! Persistent shell sessions for programmatic clients.
//!
//! Each session is one long-lived shell process. Commands are written to
//! its stdin followed by a uniquely tokenized completion marker; output is
//! collected until the marker line comes back carrying the command's exit
//! status. Shell state (working directory, environment, functions) carries
//! over from one command to the next.
//!
//! ## Quick Start
//!
//! ```no_run
//! use arbitrium::session::{SessionRegistry, SpawnOptions};
//!
//! #[tokio::main]
//! async fn main() -> arbitrium::Result<()> {
//!     let registry = SessionRegistry::with_defaults();
//!     let session = registry.spawn(SpawnOptions::default()).await?;
//!
//!     let result = registry.exec(session.id().as_str(), "echo hello", None).await?;
//!     println!("{} (exit {:?})", result.output_trimmed(), result.exit_code());
//!
//!     registry.close_all().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod output;
pub mod process;
pub mod session;
pub mod transcript;

pub use error::{ArbitriumError, Result};
pub use execution::{ExecStatus, ExecutionResult};
pub use session::{SessionId, SessionRegistry, ShellSession, SpawnOptions};
