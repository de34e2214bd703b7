//! In-memory spectrum sink, used by tests and as a no-filesystem fallback.

use super::SpectrumSink;
use gamma_core::{SpectrumRecord, StorageError};
use std::collections::HashMap;
use std::sync::Mutex;

/// Mutex-guarded map of session name to stored records.
#[derive(Default)]
pub struct MemorySink {
    sessions: Mutex<HashMap<String, Vec<SpectrumRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpectrumSink for MemorySink {
    fn store(&self, record: &SpectrumRecord) -> Result<(), StorageError> {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions
            .entry(record.session_name.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn query(&self, session_name: &str) -> Result<Vec<SpectrumRecord>, StorageError> {
        let sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions
            .get(session_name)
            .cloned()
            .ok_or_else(|| StorageError::UnknownSession {
                session_name: session_name.to_string(),
            })
    }
}
