//! arbitrium binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use arbitrium::api::{serve_with_state, AppState};
use arbitrium::cli::{parse_args, print_help, print_version, Args};
use arbitrium::config::Config;
use arbitrium::logging;
use arbitrium::session::SessionRegistry;
use arbitrium::transcript::{FileLogSink, LogSink, NullLogSink};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'arbitrium --help' for more information.");
            return ExitCode::from(2);
        }
    };
    if args.help {
        print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        print_version();
        return ExitCode::SUCCESS;
    }

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> arbitrium::Result<()> {
    let config = Config::load(args)?;

    if let Err(e) = logging::init_with_filter(config.log_filter()) {
        eprintln!("warning: logging already initialized: {}", e);
    }
    info!("arbitrium v{}", env!("CARGO_PKG_VERSION"));

    let server_config = config.to_server_config()?;

    let sink: Arc<dyn LogSink> = if config.transcript.enabled {
        info!(dir = %config.transcript.log_dir.display(), "Writing session transcripts");
        Arc::new(FileLogSink::new(config.transcript.log_dir.clone()))
    } else {
        info!("Session transcripts disabled");
        Arc::new(NullLogSink)
    };
    let registry = Arc::new(SessionRegistry::new(config.to_registry_config(), sink));

    serve_with_state(server_config, AppState::with_registry(registry)).await
}
