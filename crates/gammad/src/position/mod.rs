//! Position worker - background poller maintaining a last-known fix.
//!
//! The worker runs on a dedicated OS thread (the source does raw socket
//! I/O and must never block the async workers). On a fixed interval it
//! drains every buffered sample from the source, then merges them into
//! the shared [`PositionFix`] cache under one lock with a copy-in
//! critical section. Readers take consistent snapshots via
//! [`PositionCache::snapshot`].
//!
//! The cache is the single sanctioned piece of shared mutable state in
//! the daemon; everything else communicates by message passing.

mod gpsd;

pub use gpsd::GpsdSource;

use gamma_core::{PositionFix, PositionSample};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pull-based position source.
///
/// `next_sample` must never block: it returns whatever the source has
/// buffered, one sample at a time, and `None` when drained.
pub trait PositionSource: Send {
    fn next_sample(&mut self) -> Option<PositionSample>;
}

/// A source that never reports; used when no position sensor is fitted.
pub struct NullSource;

impl PositionSource for NullSource {
    fn next_sample(&mut self) -> Option<PositionSample> {
        None
    }
}

/// Creates a position source from the static registry.
pub fn create(kind: &str, gpsd_addr: &str) -> Option<Box<dyn PositionSource>> {
    match kind {
        "gpsd" => Some(Box::new(GpsdSource::new(gpsd_addr.to_string()))),
        "none" => Some(Box::new(NullSource)),
        _ => None,
    }
}

/// Cloneable read handle to the position cache.
#[derive(Clone, Default)]
pub struct PositionCache {
    fix: Arc<Mutex<PositionFix>>,
}

impl PositionCache {
    /// Returns a consistent copy of the last known fix.
    pub fn snapshot(&self) -> PositionFix {
        match self.fix.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn apply_all(&self, samples: &[PositionSample]) {
        let mut guard = match self.fix.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for sample in samples {
            guard.apply(sample);
        }
    }
}

/// Owner handle for the position worker thread.
///
/// Dropping without calling [`PositionWorker::stop`] detaches the thread;
/// the daemon stops and joins it before process exit.
pub struct PositionWorker {
    cache: PositionCache,
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl PositionWorker {
    /// Spawns the poller thread over the given source.
    pub fn spawn(mut source: Box<dyn PositionSource>, poll_interval: Duration) -> Self {
        let cache = PositionCache::default();
        let worker_cache = cache.clone();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::spawn(move || {
            info!("position worker started");
            loop {
                match stop_rx.recv_timeout(poll_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }

                // Drain outside the lock, then merge in one critical section.
                let mut batch = Vec::new();
                while let Some(sample) = source.next_sample() {
                    batch.push(sample);
                }
                if !batch.is_empty() {
                    debug!(samples = batch.len(), "merged position samples");
                    worker_cache.apply_all(&batch);
                }
            }
            info!("position worker stopped");
        });

        Self {
            cache,
            stop_tx,
            thread: Some(thread),
        }
    }

    /// Returns a read handle for snapshots.
    pub fn cache(&self) -> PositionCache {
        self.cache.clone()
    }

    /// Signals the worker to stop and joins it.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("position worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source that replays a fixed script of samples, one per drain call.
    struct ScriptedSource {
        samples: Vec<PositionSample>,
    }

    impl PositionSource for ScriptedSource {
        fn next_sample(&mut self) -> Option<PositionSample> {
            if self.samples.is_empty() {
                None
            } else {
                Some(self.samples.remove(0))
            }
        }
    }

    #[test]
    fn test_worker_merges_and_keeps_previous_values() {
        let source = ScriptedSource {
            samples: vec![
                PositionSample {
                    latitude: Some(59.95),
                    longitude: Some(10.6),
                    ..Default::default()
                },
                PositionSample {
                    longitude: Some(10.7),
                    latitude: Some(f64::NAN),
                    ..Default::default()
                },
            ],
        };

        let worker = PositionWorker::spawn(Box::new(source), Duration::from_millis(5));
        let cache = worker.cache();

        // Wait for the first drain to land.
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while cache.snapshot().latitude == 0.0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let fix = cache.snapshot();
        assert_eq!(fix.latitude, 59.95);
        assert_eq!(fix.longitude, 10.7);

        worker.stop();
    }

    #[test]
    fn test_stop_joins_promptly() {
        let worker = PositionWorker::spawn(Box::new(NullSource), Duration::from_millis(500));
        let start = std::time::Instant::now();
        worker.stop();
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_registry() {
        assert!(create("none", "").is_some());
        assert!(create("gpsd", "127.0.0.1:2947").is_some());
        assert!(create("bogus", "").is_none());
    }
}
