//! JSON-lines spectrum sink: one `<session>.jsonl` file per session,
//! one serialized record per line, appended as acquisitions complete.

use super::SpectrumSink;
use gamma_core::{SpectrumRecord, StorageError};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::warn;

/// File-backed sink writing under a configured directory.
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn session_path(&self, session_name: &str) -> PathBuf {
        // Session names come from the operator; keep them filesystem-safe.
        let safe: String = session_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }
}

impl SpectrumSink for JsonlSink {
    fn store(&self, record: &SpectrumRecord) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.session_path(&record.session_name))?;
        let line = serde_json::to_string(record)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    fn query(&self, session_name: &str) -> Result<Vec<SpectrumRecord>, StorageError> {
        let path = self.session_path(session_name);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::UnknownSession {
                    session_name: session_name.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    // A torn final line from a crash must not lose the
                    // rest of the session.
                    warn!(path = %path.display(), error = %e, "skipping unreadable record");
                }
            }
        }
        Ok(records)
    }
}
