//! Spectrum persistence sinks.
//!
//! The spectrometer worker stores every completed acquisition and never
//! treats a storage failure as fatal: errors are logged and the spectrum
//! still goes out on the wire. `dump_session` replays stored records
//! through [`SpectrumSink::query`].

mod jsonl;
mod memory;

pub use jsonl::JsonlSink;
pub use memory::MemorySink;

use gamma_core::{SpectrumRecord, StorageError};
use std::path::PathBuf;
use std::sync::Arc;

/// Persistence interface for completed acquisitions.
pub trait SpectrumSink: Send + Sync {
    /// Stores one record under its session.
    fn store(&self, record: &SpectrumRecord) -> Result<(), StorageError>;

    /// Returns all stored records of a session, in index order.
    fn query(&self, session_name: &str) -> Result<Vec<SpectrumRecord>, StorageError>;
}

/// Creates a sink from the static registry.
///
/// `dir` applies to the `jsonl` sink; when omitted the platform data
/// directory is used.
pub fn create(kind: &str, dir: Option<PathBuf>) -> Option<Arc<dyn SpectrumSink>> {
    match kind {
        "jsonl" => {
            let dir = dir.unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("/var/lib"))
                    .join("gammad")
            });
            Some(Arc::new(JsonlSink::new(dir)))
        }
        "memory" => Some(Arc::new(MemorySink::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        assert!(create("memory", None).is_some());
        assert!(create("jsonl", Some(PathBuf::from("/tmp/gammad-test"))).is_some());
        assert!(create("postgres", None).is_none());
    }
}
