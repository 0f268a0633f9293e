//! Logging utilities for error tracking and state-leakage auditing
//!
//! File logging is set up once from the resolved [`EngineConfig`] paths; if
//! the log file cannot be opened the process falls back to stderr rather
//! than running silent.

use log::LevelFilter;
use simplelog::{Config, SimpleLogger, WriteLogger};
use std::error::Error;
use std::fs::File;
use std::path::Path;
use std::sync::Once;

static LOG_INIT: Once = Once::new();

/// Initialize the process-wide logger, writing to the given file
pub fn init_logging(log_path: &Path) {
    LOG_INIT.call_once(|| {
        if let Err(e) = init_file_logger(log_path) {
            eprintln!(
                "File logging at {} unavailable ({}); falling back to stderr",
                log_path.display(),
                e
            );
            let _ = SimpleLogger::init(LevelFilter::Debug, Config::default());
        }
    });
}

fn init_file_logger(log_path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = File::options().create(true).append(true).open(log_path)?;
    WriteLogger::init(LevelFilter::Debug, Config::default(), log_file)?;
    log::info!("[Startup] Logging to {}", log_path.display());
    Ok(())
}

/// Route panics through the logger before the default stderr report
///
/// Chains the standard hook so backtraces keep working; the log line is what
/// post-mortem debugging of a dead service reads first.
pub fn setup_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("[Panic] {}", panic_info);
        default_hook(panic_info);
    }));
}

/// Log an error with context
#[allow(dead_code)]
pub fn log_error(context: &str, error: &dyn Error) {
    log::error!("[{}] Error: {}", context, error);
    if let Some(source) = error.source() {
        log::error!("[{}] Caused by: {}", context, source);
    }
}

/// Log a ShortlistError with full context
pub fn log_engine_error(context: &str, error: &crate::errors::ShortlistError) {
    use crate::errors::ShortlistError;

    log::error!("[{}] {}", context, error);

    match error {
        ShortlistError::Storage(db_err) => {
            log::error!("[{}] Storage error details: {:?}", context, db_err);
        }
        ShortlistError::DuplicateEmbeddingDetected { .. }
        | ShortlistError::StateLeakageDetected { .. } => {
            // Isolation failures get the full variant dump so the audit
            // trail carries both job ids.
            log::error!("[{}] Isolation failure details: {:?}", context, error);
        }
        ShortlistError::Validation(msg) => {
            log::warn!("[{}] Validation error: {}", context, msg);
        }
        _ => {}
    }

    if let Some(source) = error.source() {
        log::error!("[{}] Root cause: {}", context, source);
    }
}

/// Log a warning with context
#[allow(dead_code)]
pub fn log_warning(context: &str, message: &str) {
    log::warn!("[{}] {}", context, message);
}

/// Log an info message with context
pub fn log_info(context: &str, message: &str) {
    log::info!("[{}] {}", context, message);
}
