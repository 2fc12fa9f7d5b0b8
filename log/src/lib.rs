//! # Logging Library
//!
//! Process-wide logging with configurable levels and colored terminal output.
//! A single [`Logger`] implementation is installed once and shared by every
//! thread; the `info!`/`warning!`/`error!` family of macros routes through it.
use colored::Colorize;
use std::fmt::Display;
use std::sync::{Arc, OnceLock};

pub mod logger;

static LOGGER: OnceLock<Arc<dyn Logger + Send + Sync>> = OnceLock::new();

/// Installs the global logger.
///
/// Returns `Err(LogError::AlreadyInitialized)` if a logger was installed
/// before; the first installation wins.
pub fn set_logger(logger: Arc<dyn Logger + Send + Sync>) -> Result<(), LogError> {
    LOGGER
        .set(logger)
        .map_err(|_| LogError::AlreadyInitialized)
}

/// Returns the installed logger, if any.
pub fn logger() -> Option<Arc<dyn Logger + Send + Sync>> {
    LOGGER.get().cloned()
}

/// Errors that can occur during logger operations
#[derive(Debug)]
pub enum LogError {
    /// Returned when attempting to initialize a logger after one has already been set
    AlreadyInitialized,
    /// Returned when attempting to use a logger before one has been set
    NoLogger,
}

impl Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::AlreadyInitialized => write!(f, "Logger has already been initialized"),
            LogError::NoLogger => write!(f, "No logger set"),
        }
    }
}

/// Trait that all logger implementations must implement
pub trait Logger: Send + Sync {
    /// Logs a message at INFO level
    fn info(&self, message: &str);
    /// Logs a message at WARNING level
    fn warning(&self, message: &str);
    /// Logs a message at ERROR level
    fn error(&self, message: &str);
    /// Logs a message at CRITICAL level
    fn critical(&self, message: &str);
    /// Logs a message at DEBUG level
    fn debug(&self, message: &str);
    /// Logs a message with a specified log level
    fn log(&self, level: LogLevel, message: &str);
    /// Sets the minimum logging level that will be output
    fn set_level(&self, level: LogLevel);
}

/// Logging levels in order of increasing severity.
///
/// `NoLog` sits above every real level and suppresses all output when used
/// as the minimum. The default minimum is `Info`.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogLevel {
    /// Debug information for development purposes
    Debug,
    #[default]
    /// Standard informational messages
    Info,
    /// Warning messages indicating potential issues
    Warning,
    /// Error messages for recoverable failures
    Error,
    /// Critical messages for severe errors that might cause program termination
    Critical,
    /// Special level that suppresses all logging
    NoLog,
}

impl LogLevel {
    fn severity(&self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
            LogLevel::Critical => 4,
            LogLevel::NoLog => 5,
        }
    }

    /// Returns the uncolored string representation of the log level
    pub fn raw_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
            LogLevel::NoLog => "NOLOG",
        }
    }
}

impl PartialEq for LogLevel {
    fn eq(&self, other: &Self) -> bool {
        self.severity() == other.severity()
    }
}

impl PartialOrd for LogLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.severity().partial_cmp(&other.severity())
    }
}

impl Display for LogLevel {
    /// Provides colored text formatting for each log level
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use LogLevel::*;
        let level_str = match self {
            NoLog => String::new(),
            Debug => format!("{}", "DEBUG".cyan().bold()),
            Info => format!("{}", "INFO".blue().bold()),
            Warning => format!("{}", "WARNING".yellow().bold()),
            Error => format!("{}", "ERROR".red().bold()),
            Critical => format!("{}", "CRITICAL".bright_red().bold()),
        };
        write!(f, "{level_str}")
    }
}

/// Logs a message with the specified log level
#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {{
        if let Some(logger) = $crate::logger() {
            let message = format!($($arg)*);
            logger.log($level, &message);
        }
    }};
}

/// Logs a message at INFO level
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        $crate::log!($crate::LogLevel::Info, $($arg)*);
    }};
}

/// Logs a message at WARNING level
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => {{
        $crate::log!($crate::LogLevel::Warning, $($arg)*);
    }};
}

/// Logs a message at ERROR level
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        $crate::log!($crate::LogLevel::Error, $($arg)*);
    }};
}

/// Logs a message at CRITICAL level
#[macro_export]
macro_rules! critical {
    ($($arg:tt)*) => {{
        $crate::log!($crate::LogLevel::Critical, $($arg)*);
    }};
}

/// Logs a message at DEBUG level
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        $crate::log!($crate::LogLevel::Debug, $($arg)*);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::RollingLogger;

    fn install_test_logger(level: LogLevel) {
        if let Some(logger) = logger() {
            logger.set_level(level);
        } else {
            let logger = Arc::new(RollingLogger::new(level, None));
            set_logger(logger).unwrap_or(());
        }
    }

    #[test]
    fn messages_at_or_above_minimum_pass() {
        install_test_logger(LogLevel::Debug);

        debug!("This is a debug message");
        info!("This is an info message");
        warning!("This is a warning message");
        error!("This is an error message");
        critical!("This is a critical message");
    }

    #[test]
    fn messages_below_minimum_are_suppressed() {
        install_test_logger(LogLevel::Warning);

        debug!("This debug message should not be displayed");
        info!("This info message should not be displayed");

        warning!("This warning should be displayed");
        error!("This error should be displayed");
        critical!("This critical message should be displayed");
    }

    #[test]
    fn level_ordering_follows_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
        assert!(LogLevel::Critical < LogLevel::NoLog);
        assert_eq!(LogLevel::Info, LogLevel::Info);
    }
}
