//! Command-line flags.
//!
//! Parsed with lexopt. Every setting is optional: a flag that is not given
//! leaves the config file and `ARBITRIUM_*` environment values in place.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use lexopt::ValueExt;
use thiserror::Error;

/// Settings taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub host: Option<IpAddr>,
    pub port: Option<u16>,
    /// JSON config file.
    pub config: Option<PathBuf>,
    /// Bearer key required on `/api/v1` routes.
    pub api_key: Option<String>,
    /// Shell program for sessions that do not name one.
    pub shell: Option<String>,
    /// Where session transcripts go.
    pub log_dir: Option<PathBuf>,
    pub no_transcript: bool,
    /// Exec timeout for requests without `timeout_ms`. Never zero.
    pub timeout_ms: Option<u64>,
    /// Level or full `tracing` filter.
    pub log_level: Option<String>,
    pub version: bool,
    pub help: bool,
}

/// Why the command line was rejected.
#[derive(Debug, Error)]
pub enum ArgsError {
    #[error(transparent)]
    Lexopt(#[from] lexopt::Error),
    #[error("invalid value for --{0}: '{1}'")]
    InvalidValue(&'static str, String),
    #[error("unexpected argument: '{0}'")]
    UnexpectedArgument(String),
}

/// Parse the process arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse `args`, whose first item is the program name.
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut args_out = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => args_out.help = true,
            Short('V') | Long("version") => args_out.version = true,
            Short('H') | Long("host") => args_out.host = Some(typed(&mut parser, "host")?),
            Short('p') | Long("port") => args_out.port = Some(typed(&mut parser, "port")?),
            Short('c') | Long("config") => args_out.config = Some(parser.value()?.into()),
            Short('k') | Long("api-key") => args_out.api_key = Some(text(&mut parser)?),
            Short('s') | Long("shell") => args_out.shell = Some(text(&mut parser)?),
            Long("log-dir") => args_out.log_dir = Some(parser.value()?.into()),
            Long("no-transcript") => args_out.no_transcript = true,
            Short('t') | Long("timeout-ms") => {
                let ms: u64 = typed(&mut parser, "timeout-ms")?;
                if ms == 0 {
                    return Err(ArgsError::InvalidValue("timeout-ms", ms.to_string()));
                }
                args_out.timeout_ms = Some(ms);
            }
            Short('l') | Long("log-level") => args_out.log_level = Some(text(&mut parser)?),
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(
                    val.to_string_lossy().into_owned(),
                ))
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(args_out)
}

/// The option's value as UTF-8 text.
fn text(parser: &mut lexopt::Parser) -> Result<String, ArgsError> {
    Ok(parser.value()?.string()?)
}

/// The option's value parsed as `T`, reported against `--name` on failure.
fn typed<T: FromStr>(parser: &mut lexopt::Parser, name: &'static str) -> Result<T, ArgsError> {
    let raw = text(parser)?;
    raw.parse().map_err(|_| ArgsError::InvalidValue(name, raw))
}

/// Print usage.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"arbitrium {version}
Keeps shells alive between commands and serves them over HTTP.

Usage: arbitrium [OPTIONS]

Server:
  -H, --host <ADDR>        Bind address (127.0.0.1)
  -p, --port <PORT>        Bind port (3000)
  -k, --api-key <KEY>      Require 'Authorization: Bearer <KEY>' on /api/v1
  -c, --config <FILE>      Read settings from a JSON file first

Sessions:
  -s, --shell <PROGRAM>    Shell for sessions that do not name one
                           (bash/sh on Unix, pwsh/powershell/cmd on Windows)
  -t, --timeout-ms <MS>    Exec timeout when a request gives none (30000)
      --log-dir <DIR>      Transcript directory (./logs)
      --no-transcript      Keep no transcripts

Diagnostics:
  -l, --log-level <LVL>    error, warn, info, debug, trace or a filter string
  -h, --help               Show this text
  -V, --version            Show the version

Flags beat ARBITRIUM_HOST, ARBITRIUM_PORT, ARBITRIUM_API_KEY,
ARBITRIUM_SHELL, ARBITRIUM_TIMEOUT_MS, ARBITRIUM_LOG_DIR and
ARBITRIUM_LOG_LEVEL, which beat the config file. RUST_LOG stands in
for ARBITRIUM_LOG_LEVEL when that is unset.
"#
    );
}

/// Print the version line.
pub fn print_version() {
    println!("arbitrium {}", env!("CARGO_PKG_VERSION"));
}
