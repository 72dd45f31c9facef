//! Command execution over persistent shells.
//!
//! A shell's stdout is an undelimited byte stream; this module turns it
//! into request/response pairs:
//! - completion markers framing every command ([`frame_command`])
//! - an incremental line scanner that recognizes them ([`SentinelScanner`])
//! - the engine that drives one exec end to end ([`SentinelEngine`])
//!
//! # Example
//!
//! ```
//! use arbitrium::execution::{frame_command, Marker, SentinelScanner};
//! use arbitrium::process::ShellDialect;
//!
//! let marker = Marker::from_token("0123abcd");
//! let framed = frame_command(ShellDialect::Posix, "echo hi", &marker);
//! assert!(framed.contains("echo hi"));
//!
//! let mut scanner = SentinelScanner::new();
//! scanner.arm(marker);
//! let done = scanner.push(b"hi\n__ARB_END_0123abcd__:0\n").unwrap();
//! assert_eq!(done.output, b"hi");
//! assert_eq!(done.exit_code, 0);
//! ```

mod engine;
mod quoting;
mod result;
mod sentinel;

pub use engine::{SentinelEngine, DEFAULT_TIMEOUT};
pub use quoting::fix_powershell_quoting;
pub use result::{ExecStatus, ExecutionResult};
pub use sentinel::{frame_command, Completion, Marker, SentinelScanner, MARKER_PREFIX};
