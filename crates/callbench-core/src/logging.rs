//! Per-example log sink
//!
//! Each example in a run writes its own log file so a single conversation can
//! be inspected without untangling interleaved output from concurrent
//! workers. Messages are also forwarded to the `log` facade with the example
//! id as prefix.

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::EvalError;

pub struct ExampleLog {
    example_id: String,
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
}

impl ExampleLog {
    /// Opens (appending) `<dir>/<id>.log`, creating `dir` if needed.
    pub fn create(dir: &Path, example_id: &str) -> Result<Self, EvalError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", file_stem(example_id)));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            example_id: example_id.to_string(),
            path: Some(path),
            file: Some(Mutex::new(file)),
        })
    }

    /// A sink that only forwards to the `log` facade.
    pub fn disabled(example_id: &str) -> Self {
        Self {
            example_id: example_id.to_string(),
            path: None,
            file: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write(log::Level::Info, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.write(log::Level::Debug, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.write(log::Level::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write(log::Level::Error, message.as_ref());
    }

    fn write(&self, level: log::Level, message: &str) {
        log::log!(level, "[{}] {}", self.example_id, message);

        let Some(file) = &self.file else {
            return;
        };
        let line = format!("{} - {} - {}\n", Utc::now().to_rfc3339(), level, message);
        match file.lock() {
            Ok(mut file) => {
                if file.write_all(line.as_bytes()).is_err() {
                    log::error!("Failed to write log for example {}", self.example_id);
                }
            }
            Err(_) => log::error!("Log file lock poisoned for example {}", self.example_id),
        }
    }
}

/// Example ids become file names; path separators are replaced.
fn file_stem(example_id: &str) -> String {
    example_id
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_timestamped_and_leveled() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let sink = ExampleLog::create(&logs, "Car-Rental/12").unwrap();
        sink.info("model called search_car_rentals");
        sink.error("tool failed");

        let path = sink.path().unwrap().to_path_buf();
        assert_eq!(path.file_name().unwrap(), "Car-Rental_12.log");

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - INFO - model called search_car_rentals"));
        assert!(lines[1].contains(" - ERROR - "));
        let timestamp = lines[0].split(" - ").next().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn test_disabled_sink_writes_nothing() {
        let sink = ExampleLog::disabled("ex1");
        sink.warn("only forwarded");
        assert!(sink.path().is_none());
    }
}
