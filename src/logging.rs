use std::sync::atomic::{AtomicUsize, Ordering};

/// Severity of a diagnostic line. Ordered so that `level >= threshold`
/// decides whether a line is emitted.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub enum LogLevel {
    LogDebug,
    LogInfo,
    LogWarn,
    LogError,
}

use LogLevel::*;

static THRESHOLD: AtomicUsize = AtomicUsize::new(LogInfo as usize);

/// Set the minimum level that will be printed. Called once from `main`
/// after parsing `--verbose`.
pub fn set_threshold(level: LogLevel) {
    THRESHOLD.store(level as usize, Ordering::Relaxed);
}

pub fn enabled(level: LogLevel) -> bool {
    level as usize >= THRESHOLD.load(Ordering::Relaxed)
}

pub fn write_line(level: LogLevel, line: &str) {
    if enabled(level) {
        eprintln!("*** {}", line);
    }
}

/// Leveled diagnostic output, in the style the target agent's own error
/// sink expects: short, prefixed with `***`, no trailing punctuation
/// conventions enforced.
///
/// ```ignore
/// log!(LogInfo, "attached to process {}", pid);
/// ```
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        $crate::logging::write_line($level, &format!($($arg)*))
    };
}

pub use log;
