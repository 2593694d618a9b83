//! Logging setup for the tessera binary.
//!
//! Log levels:
//! - ERROR: a run did not complete, a validator or synthesizer call failed
//! - WARN: task failures, blocking, summarization and intent fallbacks
//! - INFO: plan accepted, dispatch, verdicts, retries, synthesis
//! - DEBUG: context assembly, readiness, window bookkeeping
//!
//! Debug mode can be enabled with the `--debug` flag or `TESSERA_DEBUG=1`.
//! `TESSERA_LOG` takes a full filter directive and overrides both.
//! The library only emits `tracing` events; installing a subscriber is up to
//! the host.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive.
pub const LOG_ENV: &str = "TESSERA_LOG";
/// Environment variable enabling debug output.
pub const DEBUG_ENV: &str = "TESSERA_DEBUG";

/// Whether debug output is requested by flag or environment.
pub fn debug_requested(flag: bool) -> bool {
    flag || std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// The default filter directive for the given mode.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "tessera=debug,info"
    } else {
        "tessera=info,warn"
    }
}

/// Install the global subscriber: stderr plus `~/.tessera/tessera.log`.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process. No guard is returned when there is no home
/// directory; logging then goes to stderr only.
pub fn init(debug: bool) -> Option<WorkerGuard> {
    let debug = debug_requested(debug);
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(debug)
        .with_line_number(debug);

    let log_dir = dirs::home_dir().map(|home| home.join(".tessera"));
    match log_dir {
        Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let file_appender = tracing_appender::rolling::never(&dir, "tessera.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_line_number(true)
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
                .ok();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .try_init()
                .ok();
            None
        }
    }
}
