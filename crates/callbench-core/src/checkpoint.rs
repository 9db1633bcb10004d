//! Append-only checkpoint store
//!
//! Results are stored as JSON Lines, one [`ResultRecord`] per completed
//! example. The set of ids in the file is the checkpoint: a rerun skips every
//! example already present. Appends go through a single async lock and are
//! written with one `write_all` followed by a flush, so concurrent workers
//! never interleave partial lines.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::errors::EvalError;
use crate::record::ResultRecord;

pub struct CheckpointStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record. A missing file is an empty store; lines that do
    /// not parse (e.g. a torn final line) are skipped with a warning.
    pub fn load_records(&self) -> Result<Vec<ResultRecord>, EvalError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EvalError::CheckpointError(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ResultRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!(
                    "Skipping malformed record at {}:{}: {}",
                    self.path.display(),
                    line_no + 1,
                    e
                ),
            }
        }
        Ok(records)
    }

    pub fn completed_ids(&self) -> Result<HashSet<String>, EvalError> {
        Ok(self
            .load_records()?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }

    /// Appends one record as a single line and flushes it. A torn final
    /// line left by an interrupted run is terminated first so the new record
    /// starts on a line of its own.
    pub async fn append(&self, record: &ResultRecord) -> Result<(), EvalError> {
        let json = serde_json::to_string(record)?;

        let _guard = self.writer.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                EvalError::CheckpointError(format!("Failed to open {}: {}", self.path.display(), e))
            })?;

        let mut line = String::with_capacity(json.len() + 2);
        if ends_with_partial_line(&mut file)? {
            log::warn!("Terminating torn final line in {}", self.path.display());
            line.push('\n');
        }
        line.push_str(&json);
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

fn ends_with_partial_line(file: &mut std::fs::File) -> Result<bool, EvalError> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
