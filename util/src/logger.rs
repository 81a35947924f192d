//! Generic logger utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{self, info};
use fern;
use colored::{ColoredString, Colorize};
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Targets whose records are capped at `INFO`, the network and solver crates.
pub const CAPPED_TARGETS: &[&str] = &["zmq", "clarabel"];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level less than `INFO`, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
/// 
/// Records go to stdout with coloured level tags and to the session log file with plain ones, so
/// the file can be grepped and diffed between runs.
/// 
/// # Notes
/// 
/// - `min_level` must be greater than `log::Level::Info`.
/// - Targets in [`CAPPED_TARGETS`] are capped at `INFO` so that `TRACE` sessions only contain
///   controller output.
/// 
/// # Safety
/// 
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(
    min_level: self::LevelFilter, 
    session: &session::Session
) -> Result<(), LoggerInitError> {

    if min_level < log::Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level))
    }

    let log_file = fern::log_file(session.log_file_path.clone())
        .map_err(LoggerInitError::LogFileInitError)?;

    let console = fern::Dispatch::new()
        .format(|out, message, record| {
            let tag = level_to_str(record.level());
            out.finish(format_args!("{}", Line { tag, message, record }))
        })
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            let tag = level_to_plain_str(record.level());
            out.finish(format_args!("{}", Line { tag, message, record }))
        })
        .chain(log_file);

    CAPPED_TARGETS
        .iter()
        .fold(fern::Dispatch::new().level(min_level), |d, target| {
            d.level_for(*target, LevelFilter::Info)
        })
        .chain(console)
        .chain(file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;
    
    info!("Logging initialised");
    info!("    Session epoch: {}", session::get_epoch());
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE STRUCTS
// ---------------------------------------------------------------------------

/// One formatted log line, `[elapsed tag] target: message`.
///
/// The target is only shown for debug and trace records.
struct Line<'a, T: std::fmt::Display> {
    tag: T,
    message: &'a std::fmt::Arguments<'a>,
    record: &'a log::Record<'a>,
}

impl<'a, T: std::fmt::Display> std::fmt::Display for Line<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:10.6} {}] ", session::get_elapsed_seconds(), self.tag)?;

        if self.record.level() > log::Level::Info {
            write!(f, "{}: ", self.record.target())?;
        }

        write!(f, "{}", self.message)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the coloured representation of a log level
fn level_to_str(level: log::Level) -> ColoredString {
    match level {
        log::Level::Trace => level_to_plain_str(level).dimmed().italic(),
        log::Level::Debug => level_to_plain_str(level).dimmed(),
        log::Level::Info  => level_to_plain_str(level).normal(),
        log::Level::Warn  => level_to_plain_str(level).yellow(),
        log::Level::Error => level_to_plain_str(level).red().bold()
    }
}

/// Get the uncoloured tag of a log level
fn level_to_plain_str(level: log::Level) -> &'static str {
    match level {
        log::Level::Trace => "TRC",
        log::Level::Debug => "DBG",
        log::Level::Info  => "INF",
        log::Level::Warn  => "WRN",
        log::Level::Error => "ERR"
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_plain_tags_carry_no_escape_codes() {
        for level in [
            log::Level::Trace,
            log::Level::Debug,
            log::Level::Info,
            log::Level::Warn,
            log::Level::Error,
        ].iter() {
            let tag = level_to_plain_str(*level);
            assert_eq!(tag.len(), 3);
            assert!(!tag.contains('\x1b'));
        }
    }
}
