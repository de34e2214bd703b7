//! Spectrometer worker - owns the session, spectrum, and detector state
//! machines and schedules acquisitions.
//!
//! The worker's loop multiplexes three sources: commands from the
//! supervisor, completions from background tasks, and the fixed-interval
//! session tick. Blocking driver calls (configure, acquire, gain
//! stabilization) run under `tokio::task::spawn_blocking` with the driver
//! handle behind one `std::sync::Mutex`, and their completions come back
//! as messages on the worker's own inbound queue, so every state mutation
//! happens on this single task and the loop stays responsive to
//! `stop_session` and `set_gain` during a multi-second acquisition.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use gamma_core::{
    AcquisitionRequest, DetectorConfig, DetectorState, DriverError, FailureCounter, GainSettings,
    PositionFix, Session, SessionState, SpectralData, SpectrumRecord, SpectrumState,
};
use gamma_protocol::{tags, Message};

use crate::driver::DetectorDriver;
use crate::link::WorkerLink;
use crate::position::PositionCache;
use crate::storage::SpectrumSink;

/// Interval between voltage-ramp polls during gain stabilization.
const RAMP_POLL_INTERVAL: Duration = Duration::from_millis(400);

/// Shared detector handle; the mutex serializes gain changes against an
/// in-flight acquisition.
pub type SharedDriver = Arc<Mutex<Box<dyn DetectorDriver>>>;

fn lock_driver(driver: &SharedDriver) -> MutexGuard<'_, Box<dyn DetectorDriver>> {
    match driver.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Completion of one background driver call, delivered onto the worker's
/// own queue.
enum TaskOutcome {
    Acquisition(Box<AcquisitionOutcome>),
    Config {
        request: Message,
        config: DetectorConfig,
        result: Result<(), DriverError>,
    },
    Gain {
        request: Message,
        result: Result<(), DriverError>,
    },
}

/// Result of one acquisition attempt with its timing and position context.
struct AcquisitionOutcome {
    session_name: String,
    result: Result<SpectralData, DriverError>,
    time_start: DateTime<Utc>,
    time_end: DateTime<Utc>,
    position_start: PositionFix,
    position_end: PositionFix,
}

/// The spectrometer worker.
pub struct SpectrometerWorker {
    link: WorkerLink,
    driver: SharedDriver,
    sink: Arc<dyn SpectrumSink>,
    position: PositionCache,
    tick_interval: Duration,

    session_state: SessionState,
    spectrum_state: SpectrumState,
    detector_state: DetectorState,

    current_config: Option<DetectorConfig>,
    session: Option<Session>,
    last_session_name: Option<String>,
    failures: FailureCounter,

    /// Next acquisition index of the current session.
    next_index: u64,
    /// Set when `start_session` arrives while a prior session's
    /// acquisition is still in flight; the counter reset is deferred
    /// until that outcome has taken its index.
    index_reset_pending: bool,

    outcome_tx: mpsc::Sender<TaskOutcome>,
    outcome_rx: mpsc::Receiver<TaskOutcome>,
}

impl SpectrometerWorker {
    /// Creates a worker over its collaborators.
    pub fn new(
        link: WorkerLink,
        driver: Box<dyn DetectorDriver>,
        sink: Arc<dyn SpectrumSink>,
        position: PositionCache,
        tick_interval: Duration,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel(16);
        Self {
            link,
            driver: Arc::new(Mutex::new(driver)),
            sink,
            position,
            tick_interval,
            session_state: SessionState::default(),
            spectrum_state: SpectrumState::default(),
            detector_state: DetectorState::default(),
            current_config: None,
            session: None,
            last_session_name: None,
            failures: FailureCounter::new(),
            next_index: 0,
            index_reset_pending: false,
            outcome_tx,
            outcome_rx,
        }
    }

    /// Runs the worker loop until `close` or supervisor link closure.
    pub async fn run(mut self) {
        info!("spectrometer worker started");

        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = self.link.recv() => {
                    match maybe {
                        Some(msg) => {
                            if !self.dispatch(msg).await {
                                break;
                            }
                        }
                        None => {
                            debug!("supervisor link closed");
                            break;
                        }
                    }
                }

                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome).await;
                }

                _ = tick.tick(), if self.session_state.is_busy() => {
                    self.session_tick();
                }
            }
        }

        info!("spectrometer worker stopped");
    }

    /// Sends a message to the supervisor, logging on link closure.
    async fn respond(&self, msg: Message) {
        if self.link.send(msg).await.is_err() {
            warn!("dropping response, supervisor link closed");
        }
    }

    /// Dispatches one supervisor command. Returns false on `close`.
    async fn dispatch(&mut self, msg: Message) -> bool {
        match msg.command.as_str() {
            tags::CLOSE => {
                self.respond(Message::new(tags::CLOSED)).await;
                return false;
            }
            tags::DETECTOR_CONFIG => self.handle_detector_config(msg).await,
            tags::START_SESSION => self.handle_start_session(msg).await,
            tags::STOP_SESSION => self.handle_stop_session().await,
            tags::DUMP_SESSION => self.handle_dump_session(msg).await,
            tags::SET_GAIN => self.handle_set_gain(msg).await,
            other => {
                warn!(command = %other, "spectrometer worker ignoring command");
            }
        }
        true
    }

    async fn handle_detector_config(&mut self, msg: Message) {
        if self.session_state.is_busy() {
            self.respond(Message::info(
                tags::DETECTOR_CONFIG_BUSY,
                "Detector config failed, session is active",
            ))
            .await;
            return;
        }

        let config: DetectorConfig = match msg.payload() {
            Ok(config) => config,
            Err(e) => {
                self.respond(Message::info(
                    tags::DETECTOR_CONFIG_ERROR,
                    format!("Detector config failed: {e}"),
                ))
                .await;
                return;
            }
        };

        let driver = Arc::clone(&self.driver);
        let outcome_tx = self.outcome_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = lock_driver(&driver).configure(&config);
            let _ = outcome_tx.blocking_send(TaskOutcome::Config {
                request: msg,
                config,
                result,
            });
        });
    }

    async fn handle_start_session(&mut self, msg: Message) {
        let Some(started) = self.session_state.start() else {
            self.respond(Message::info(
                tags::START_SESSION_BUSY,
                "Start session failed, session is active",
            ))
            .await;
            return;
        };

        let Some(name) = msg.get_str("session_name").map(str::to_string) else {
            self.respond(Message::error(
                "Start session failed, session_name missing",
            ))
            .await;
            return;
        };
        let livetime = msg.get_f64("livetime").unwrap_or(0.0);
        if livetime <= 0.0 {
            self.respond(Message::error(
                "Start session failed, livetime must be positive",
            ))
            .await;
            return;
        }

        self.session_state = started;
        self.failures.reset();
        if self.spectrum_state.is_busy() {
            self.index_reset_pending = true;
        } else {
            self.next_index = 0;
        }
        self.session = Some(Session {
            name: name.clone(),
            comment: msg.get_str("comment").map(str::to_string),
            livetime,
            detector_config: self.current_config.clone(),
        });
        self.last_session_name = Some(name.clone());

        info!(session = %name, livetime, "session started");
        self.respond(Message::echo(tags::START_SESSION_SUCCESS, &msg))
            .await;
    }

    async fn handle_stop_session(&mut self) {
        match self.session_state.stop() {
            Some(next) => {
                self.session_state = next;
                self.session = None;
                info!("session stopped");
                self.respond(Message::new(tags::STOP_SESSION_SUCCESS)).await;
            }
            None => {
                self.respond(Message::info(
                    tags::STOP_SESSION_NONE,
                    "Stop session failed, no session active",
                ))
                .await;
            }
        }
    }

    async fn handle_dump_session(&mut self, msg: Message) {
        let name = msg
            .get_str("session_name")
            .map(str::to_string)
            .or_else(|| self.last_session_name.clone());
        let Some(name) = name else {
            self.respond(Message::info(
                tags::DUMP_SESSION_NONE,
                "Dump session failed, no session has run",
            ))
            .await;
            return;
        };

        match self.sink.query(&name) {
            Ok(records) => {
                info!(session = %name, count = records.len(), "dumping session");
                self.respond(
                    Message::new(tags::DUMP_SESSION_SUCCESS)
                        .with("session_name", name)
                        .with("count", records.len()),
                )
                .await;
                for record in &records {
                    match Message::from_payload(tags::SPECTRUM, record) {
                        Ok(spectrum) => self.respond(spectrum).await,
                        Err(e) => warn!(error = %e, "skipping unserializable record"),
                    }
                }
            }
            Err(gamma_core::StorageError::UnknownSession { session_name }) => {
                self.respond(Message::info(
                    tags::DUMP_SESSION_NONE,
                    format!("Dump session failed, no records for {session_name}"),
                ))
                .await;
            }
            Err(e) => {
                self.respond(Message::error(format!("Dump session failed: {e}")))
                    .await;
            }
        }
    }

    async fn handle_set_gain(&mut self, msg: Message) {
        let settings: GainSettings = match msg.payload() {
            Ok(settings) => settings,
            Err(e) => {
                self.respond(Message::error(format!("Set gain failed: {e}")))
                    .await;
                return;
            }
        };

        let driver = Arc::clone(&self.driver);
        let outcome_tx = self.outcome_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = stabilize_and_apply(&driver, settings);
            let _ = outcome_tx.blocking_send(TaskOutcome::Gain {
                request: msg,
                result,
            });
        });
    }

    /// One session tick: launch an acquisition unless one is in flight.
    fn session_tick(&mut self) {
        let Some(launched) = self.spectrum_state.launch() else {
            return;
        };
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let request = AcquisitionRequest {
            session_name: session.name.clone(),
            livetime: session.livetime,
        };
        let driver = Arc::clone(&self.driver);
        let position = self.position.clone();
        let outcome_tx = self.outcome_tx.clone();

        self.spectrum_state = launched;
        debug!(session = %request.session_name, "launching acquisition");

        tokio::task::spawn_blocking(move || {
            let position_start = position.snapshot();
            let time_start = Utc::now();
            let result = lock_driver(&driver).acquire(&request);
            let time_end = Utc::now();
            let position_end = position.snapshot();

            let _ = outcome_tx.blocking_send(TaskOutcome::Acquisition(Box::new(
                AcquisitionOutcome {
                    session_name: request.session_name,
                    result,
                    time_start,
                    time_end,
                    position_start,
                    position_end,
                },
            )));
        });
    }

    async fn handle_outcome(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Acquisition(outcome) => self.finish_acquisition(*outcome).await,
            TaskOutcome::Config {
                request,
                config,
                result,
            } => match result {
                Ok(()) => {
                    self.detector_state = self.detector_state.configured();
                    self.current_config = Some(config);
                    info!("detector configured");
                    self.respond(Message::echo(tags::DETECTOR_CONFIG_SUCCESS, &request))
                        .await;
                }
                Err(e) => {
                    self.respond(Message::info(
                        tags::DETECTOR_CONFIG_ERROR,
                        format!("Detector config failed: {e}"),
                    ))
                    .await;
                }
            },
            TaskOutcome::Gain { request, result } => match result {
                Ok(()) => {
                    info!("gain has been set");
                    self.respond(Message::echo(tags::SET_GAIN_OK, &request)).await;
                }
                Err(e) => {
                    self.respond(Message::error(format!("Set gain failed: {e}")))
                        .await;
                }
            },
        }
    }

    async fn finish_acquisition(&mut self, outcome: AcquisitionOutcome) {
        self.spectrum_state = self.spectrum_state.finish();

        let belongs_to_current = self
            .session
            .as_ref()
            .is_some_and(|s| s.name == outcome.session_name);

        match outcome.result {
            Ok(data) => {
                let index = self.next_index;
                if self.index_reset_pending {
                    // The outcome took the previous session's index; the
                    // new session starts counting from zero.
                    self.next_index = 0;
                    self.index_reset_pending = false;
                } else {
                    self.next_index += 1;
                }

                let record = SpectrumRecord::assemble(
                    outcome.session_name,
                    index,
                    data,
                    outcome.time_start,
                    outcome.time_end,
                    outcome.position_start,
                    outcome.position_end,
                );

                // Fire-and-forget persistence: a sink failure loses the
                // stored copy, never the live telemetry.
                if let Err(e) = self.sink.store(&record) {
                    warn!(session = %record.session_name, index, error = %e, "failed to store spectrum");
                }
                if belongs_to_current {
                    self.failures.record_success();
                }

                debug!(session = %record.session_name, index, total = record.total_count, "spectrum acquired");
                match Message::from_payload(tags::SPECTRUM, &record) {
                    Ok(spectrum) => self.respond(spectrum).await,
                    Err(e) => warn!(error = %e, "failed to serialize spectrum"),
                }
            }
            Err(e) => {
                if self.index_reset_pending {
                    self.next_index = 0;
                    self.index_reset_pending = false;
                }
                warn!(session = %outcome.session_name, error = %e, "acquisition failed");
                self.respond(Message::error(format!("Acquisition failed: {e}")))
                    .await;

                if belongs_to_current && self.failures.record_failure() {
                    self.session_state = SessionState::Ready;
                    self.session = None;
                    warn!("three consecutive acquisition failures, stopping session");
                    self.respond(Message::info(
                        tags::SESSION_ABORTED,
                        "Acquiring spectrum has failed 3 times, stopping session",
                    ))
                    .await;
                }
            }
        }
    }
}

/// Stabilizes the probe if needed, then applies gain. Blocking.
fn stabilize_and_apply(driver: &SharedDriver, settings: GainSettings) -> Result<(), DriverError> {
    let mut guard = lock_driver(driver);
    if !guard.probe_stabilized()? {
        guard.set_high_voltage(settings.voltage)?;
        info!("ramping high voltage");
        while guard.is_ramping()? {
            std::thread::sleep(RAMP_POLL_INTERVAL);
        }
    }
    guard.apply_gain(settings.coarse_gain, settings.fine_gain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimDetector;
    use crate::storage::MemorySink;
    use tokio::time::{timeout, Duration as TokioDuration};

    const RECV_WINDOW: TokioDuration = TokioDuration::from_secs(5);

    struct TestRig {
        link: WorkerLink,
        fault: crate::driver::FaultHandle,
    }

    fn spawn_worker() -> TestRig {
        let (supervisor_side, worker_side) = WorkerLink::pair();
        let detector = SimDetector::new();
        let fault = detector.fault_handle();
        let worker = SpectrometerWorker::new(
            worker_side,
            Box::new(detector),
            Arc::new(MemorySink::new()),
            PositionCache::default(),
            Duration::from_millis(10),
        );
        tokio::spawn(worker.run());
        TestRig {
            link: supervisor_side,
            fault,
        }
    }

    async fn recv(link: &mut WorkerLink) -> Message {
        timeout(RECV_WINDOW, link.recv())
            .await
            .expect("timed out waiting for worker message")
            .expect("worker link closed")
    }

    fn config_message() -> Message {
        Message::new(tags::DETECTOR_CONFIG)
            .with("voltage", 775)
            .with("coarse_gain", 1.0)
            .with("fine_gain", 1.375)
            .with("num_channels", 64)
            .with("lld", 3)
            .with("uld", 110)
    }

    fn start_message(livetime: f64) -> Message {
        Message::new(tags::START_SESSION)
            .with("session_name", "S1")
            .with("livetime", livetime)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_detector_config_success_echoes_fields() {
        let mut rig = spawn_worker();
        rig.link.send(config_message()).await.unwrap();

        let reply = recv(&mut rig.link).await;
        assert_eq!(reply.command, tags::DETECTOR_CONFIG_SUCCESS);
        assert_eq!(reply.get_u64("voltage"), Some(775));
        assert_eq!(reply.get_u64("num_channels"), Some(64));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_detector_config_invalid_fields_is_error() {
        let mut rig = spawn_worker();
        rig.link
            .send(Message::new(tags::DETECTOR_CONFIG).with("voltage", 775))
            .await
            .unwrap();

        let reply = recv(&mut rig.link).await;
        assert_eq!(reply.command, tags::DETECTOR_CONFIG_ERROR);
        assert!(reply.get_str("message").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_produces_gap_free_indices() {
        let mut rig = spawn_worker();
        rig.link.send(config_message()).await.unwrap();
        recv(&mut rig.link).await;

        rig.link.send(start_message(0.01)).await.unwrap();
        let reply = recv(&mut rig.link).await;
        assert_eq!(reply.command, tags::START_SESSION_SUCCESS);

        let mut indices = Vec::new();
        while indices.len() < 3 {
            let msg = recv(&mut rig.link).await;
            if msg.command == tags::SPECTRUM {
                assert_eq!(msg.get_str("session_name"), Some("S1"));
                indices.push(msg.get_u64("index").unwrap());
            }
        }
        assert_eq!(indices, vec![0, 1, 2]);

        rig.link.send(Message::new(tags::STOP_SESSION)).await.unwrap();
        loop {
            let msg = recv(&mut rig.link).await;
            if msg.command == tags::STOP_SESSION_SUCCESS {
                break;
            }
            assert_eq!(msg.command, tags::SPECTRUM);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_while_busy_rejected() {
        let mut rig = spawn_worker();
        rig.link.send(config_message()).await.unwrap();
        recv(&mut rig.link).await;

        rig.link.send(start_message(0.05)).await.unwrap();
        recv(&mut rig.link).await;

        rig.link.send(start_message(0.05)).await.unwrap();
        let reply = recv(&mut rig.link).await;
        assert_eq!(reply.command, tags::START_SESSION_BUSY);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_without_session_is_none() {
        let mut rig = spawn_worker();
        rig.link.send(Message::new(tags::STOP_SESSION)).await.unwrap();
        let reply = recv(&mut rig.link).await;
        assert_eq!(reply.command, tags::STOP_SESSION_NONE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_three_failures_abort_session() {
        let mut rig = spawn_worker();
        rig.link.send(config_message()).await.unwrap();
        recv(&mut rig.link).await;

        rig.fault.fail_next(3);
        rig.link.send(start_message(0.01)).await.unwrap();
        recv(&mut rig.link).await; // start_session_success

        let mut errors = 0;
        loop {
            let msg = recv(&mut rig.link).await;
            match msg.command.as_str() {
                tags::ERROR => errors += 1,
                tags::SESSION_ABORTED => break,
                other => panic!("unexpected message during abort: {other}"),
            }
        }
        assert_eq!(errors, 3);

        // The worker is Ready again: a new session may start.
        rig.link.send(start_message(0.01)).await.unwrap();
        let reply = recv(&mut rig.link).await;
        assert_eq!(reply.command, tags::START_SESSION_SUCCESS);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dump_session_replays_records() {
        let mut rig = spawn_worker();
        rig.link.send(config_message()).await.unwrap();
        recv(&mut rig.link).await;

        rig.link.send(start_message(0.01)).await.unwrap();
        recv(&mut rig.link).await;

        // Wait for at least one stored spectrum, then stop.
        loop {
            let msg = recv(&mut rig.link).await;
            if msg.command == tags::SPECTRUM {
                break;
            }
        }
        rig.link.send(Message::new(tags::STOP_SESSION)).await.unwrap();
        loop {
            let msg = recv(&mut rig.link).await;
            if msg.command == tags::STOP_SESSION_SUCCESS {
                break;
            }
        }

        rig.link.send(Message::new(tags::DUMP_SESSION)).await.unwrap();
        let header = loop {
            let msg = recv(&mut rig.link).await;
            if msg.command != tags::SPECTRUM {
                break msg;
            }
        };
        assert_eq!(header.command, tags::DUMP_SESSION_SUCCESS);
        let count = header.get_u64("count").unwrap();
        assert!(count >= 1);
        for _ in 0..count {
            let msg = recv(&mut rig.link).await;
            assert_eq!(msg.command, tags::SPECTRUM);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dump_session_without_history_is_none() {
        let mut rig = spawn_worker();
        rig.link.send(Message::new(tags::DUMP_SESSION)).await.unwrap();
        let reply = recv(&mut rig.link).await;
        assert_eq!(reply.command, tags::DUMP_SESSION_NONE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_gain_without_session() {
        let mut rig = spawn_worker();
        rig.link
            .send(
                Message::new(tags::SET_GAIN)
                    .with("voltage", 775)
                    .with("coarse_gain", 1.0)
                    .with("fine_gain", 1.375),
            )
            .await
            .unwrap();

        let reply = recv(&mut rig.link).await;
        assert_eq!(reply.command, tags::SET_GAIN_OK);
        assert_eq!(reply.get_u64("voltage"), Some(775));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_acks_and_stops() {
        let mut rig = spawn_worker();
        rig.link.send(Message::new(tags::CLOSE)).await.unwrap();
        let reply = recv(&mut rig.link).await;
        assert_eq!(reply.command, tags::CLOSED);
        // The worker task has exited; the link reports closure.
        assert!(rig.link.recv().await.is_none());
    }
}
