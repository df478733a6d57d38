//! Log setup shared by `q2d-server` and `q2d-device`.
//!
//! `-v` flags raise the level of the workspace crates only. Framework crates
//! (axum, tungstenite, rusqlite) stay at `error` until `-vvvv`, where they
//! follow at `debug`. `RUST_LOG` replaces the whole filter.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{Error, Result};

/// Targets emitted by this workspace.
const WORKSPACE_TARGETS: [&str; 4] = ["q2d_core", "q2d_server", "q2d_device", "q2d_test_utils"];

/// Third-party targets that only matter when tracing the transport itself.
const FRAMEWORK_TARGETS: [&str; 5] = [
    "axum",
    "hyper",
    "tungstenite",
    "tokio_tungstenite",
    "rusqlite",
];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Filter directives for a `-v` count.
fn directives(verbosity: u8) -> String {
    let ours = level_for(verbosity);
    let theirs = if verbosity >= 4 { "debug" } else { "error" };
    WORKSPACE_TARGETS
        .iter()
        .map(|target| format!("{target}={ours}"))
        .chain(FRAMEWORK_TARGETS.iter().map(|target| format!("{target}={theirs}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber.
///
/// Logs go to stderr, or are appended to `log_file` without ANSI colours.
/// Source locations are included from `-vvv` up in text mode.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(verbosity)));

    let (writer, ansi) = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let layer = match format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_file(verbosity >= 3)
            .with_line_number(verbosity >= 3)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}
