//! Structured logging setup.
//!
//! `RUST_LOG` wins over the configured level when it is set. Output goes to
//! stderr, a file, or both, as plain text or JSON.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

static INSTALLED: Mutex<bool> = Mutex::new(false);

fn make_writer(config: &LoggingConfig) -> Result<BoxMakeWriter> {
    let file = if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProtocolError::ConfigError(
                "log_file_path must be specified when log_to_file is true".to_string(),
            )
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open log file {path}: {e}")))?;
        Some(Arc::new(file))
    } else {
        None
    };

    Ok(match (config.log_to_console, file) {
        (true, Some(file)) => BoxMakeWriter::new(io::stderr.and(file)),
        (false, Some(file)) => BoxMakeWriter::new(file),
        (_, None) => BoxMakeWriter::new(io::stderr),
    })
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let writer = make_writer(config)?;

    let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
    if *installed {
        return Ok(());
    }

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(writer)
        // colour codes only make sense on an interactive terminal
        .with_ansi(!config.log_to_file && io::stderr().is_terminal());

    let result = if config.json_format {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| {
        ProtocolError::ConfigError(format!("Failed to install log subscriber: {e}"))
    })?;

    *installed = true;
    info!(app = %config.app_name, level = %config.log_level, "Logging initialised");
    Ok(())
}
