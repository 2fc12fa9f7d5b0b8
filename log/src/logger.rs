use crate::{LogError, LogLevel, Logger, set_logger};
use dirs::data_dir;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Logger that mirrors output to the terminal and an optional log file.
///
/// When the target file already exists from a previous run it is rotated:
/// renamed to a timestamped name, compressed to a `.7z` archive and the
/// uncompressed copy removed.
pub struct RollingLogger {
    min_level: Mutex<LogLevel>,
    log_file: Option<PathBuf>,
}

impl RollingLogger {
    pub fn new(min_level: LogLevel, log_file: Option<PathBuf>) -> Self {
        if let Some(file) = &log_file {
            if file.exists() {
                rotate(file);
            }

            if let Some(parent) = file.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).unwrap_or_else(|e| {
                        eprintln!("Failed to create log directory: {e}");
                    });
                }
            }

            std::fs::File::create(file).unwrap_or_else(|e| {
                eprintln!("Failed to create log file: {e}");
                panic!("Could not create log file");
            });
        }

        RollingLogger {
            min_level: Mutex::new(min_level),
            log_file,
        }
    }

    /// Installs a `RollingLogger` writing to the default application log path.
    pub fn init(min_level: LogLevel) -> Result<(), LogError> {
        let file = data_dir().map(|dir| dir.join("adsum").join("latest.log"));
        set_logger(Arc::new(RollingLogger::new(min_level, file)))
    }
}

fn rotate(file: &PathBuf) {
    let mut renamed = file.clone();
    renamed.set_file_name(format!(
        "{}.log",
        chrono::Local::now().format("%d%m%Y_%H%M%S")
    ));

    if let Err(e) = std::fs::rename(file, &renamed) {
        eprintln!("Failed to rename existing log file: {e}");
        return;
    }

    let mut archive = renamed.clone();
    archive.set_extension("7z");

    match sevenz_rust2::compress_to_path(&renamed, &archive) {
        Ok(()) => {
            std::fs::remove_file(&renamed).unwrap_or_else(|e| {
                eprintln!("Failed to remove old log file: {e}");
            });
        }
        Err(e) => eprintln!("Failed to compress old log file: {e}"),
    }
}

fn log_to_file(log_file: &PathBuf, message: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(log_file)?;
    writeln!(file, "{message}")?;
    Ok(())
}

impl Logger for RollingLogger {
    fn set_level(&self, level: LogLevel) {
        if let Ok(mut min) = self.min_level.lock() {
            *min = level;
        }
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message);
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn log(&self, level: LogLevel, message: &str) {
        let min = self.min_level.lock().map(|l| *l).unwrap_or_default();
        if level < min {
            return;
        }

        let timestamp = chrono::Local::now().format("%d%m%Y %H:%M:%S");
        println!("{timestamp} - [{level}] - {message}");

        if let Some(ref file) = self.log_file {
            let line = format!("{} - [{}] - {}", timestamp, level.raw_str(), message);
            log_to_file(file, &line).unwrap_or_else(|e| {
                eprintln!("Failed to write to log file: {e}");
            });
        }
    }
}
