//! Supervisor - the hub task that owns one link per worker and routes
//! every message in the daemon.
//!
//! Commands arriving from the network worker are answered directly
//! (`ping`, `get_status`, unknown tags) or forwarded to the spectrometer
//! worker; everything the spectrometer emits flows back out through the
//! network link. The supervisor keeps read-only mirrors of the session
//! and detector state, updated from the responses passing through, so
//! `get_status` never has to query a busy worker.
//!
//! Shutdown is one path for both triggers: a `close` command and daemon
//! cancellation (SIGTERM) forward `close` to the spectrometer, drain its
//! remaining output until the acknowledgement, then release the network
//! worker with `close_ok`.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gamma_core::{DetectorState, SessionState};
use gamma_protocol::{tags, Message};

use crate::link::WorkerLink;
use crate::position::PositionCache;

/// The supervisor task.
pub struct Supervisor {
    net_link: WorkerLink,
    spec_link: WorkerLink,
    position: PositionCache,
    cancel: CancellationToken,

    // Mirrors of spectrometer-owned state, maintained from responses.
    session_state: SessionState,
    detector_state: DetectorState,
    last_session_name: Option<String>,
    spectrum_count: u64,
}

impl Supervisor {
    pub fn new(
        net_link: WorkerLink,
        spec_link: WorkerLink,
        position: PositionCache,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            net_link,
            spec_link,
            position,
            cancel,
            session_state: SessionState::default(),
            detector_state: DetectorState::default(),
            last_session_name: None,
            spectrum_count: 0,
        }
    }

    /// Runs the routing loop until `close`, cancellation, or the loss of
    /// a worker link.
    pub async fn run(mut self) {
        info!("supervisor started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("shutdown requested");
                    self.shutdown().await;
                    break;
                }

                maybe = self.net_link.recv() => {
                    match maybe {
                        Some(msg) => {
                            if !self.handle_command(msg).await {
                                break;
                            }
                        }
                        None => {
                            warn!("network link closed");
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                maybe = self.spec_link.recv() => {
                    match maybe {
                        Some(msg) => self.handle_spectrometer(msg).await,
                        None => {
                            warn!("spectrometer link closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("supervisor stopped");
    }

    /// Sends a response back through the network worker.
    async fn reply(&self, msg: Message) {
        if self.net_link.send(msg).await.is_err() {
            warn!("dropping response, network link closed");
        }
    }

    /// Handles one inbound command. Returns false on `close`.
    async fn handle_command(&mut self, msg: Message) -> bool {
        debug!(command = %msg.command, "dispatching command");
        match msg.command.as_str() {
            tags::PING => {
                self.reply(Message::echo(tags::PING_OK, &msg)).await;
            }
            tags::GET_STATUS => {
                let status = self.status_message();
                self.reply(status).await;
            }
            tags::CLOSE => {
                self.shutdown().await;
                return false;
            }
            tags::DETECTOR_CONFIG
            | tags::START_SESSION
            | tags::STOP_SESSION
            | tags::DUMP_SESSION
            | tags::SET_GAIN => {
                if self.spec_link.send(msg).await.is_err() {
                    warn!("spectrometer link closed, rejecting command");
                    self.reply(Message::error("Spectrometer worker unavailable"))
                        .await;
                }
            }
            other => {
                self.reply(Message::info(
                    tags::UNKNOWN_COMMAND,
                    format!("Unknown command: {other}"),
                ))
                .await;
            }
        }
        true
    }

    /// Handles one spectrometer-originated message: update the mirrors,
    /// then pass it on.
    async fn handle_spectrometer(&mut self, msg: Message) {
        match msg.command.as_str() {
            tags::DETECTOR_CONFIG_SUCCESS => {
                self.detector_state = self.detector_state.configured();
            }
            tags::START_SESSION_SUCCESS => {
                self.session_state = SessionState::Busy;
                if let Some(name) = msg.get_str("session_name") {
                    self.last_session_name = Some(name.to_string());
                }
            }
            tags::STOP_SESSION_SUCCESS => {
                self.session_state = SessionState::Ready;
            }
            tags::SPECTRUM => {
                self.spectrum_count += 1;
            }
            tags::SESSION_ABORTED => {
                // Internal notice; the operator sees a final error after
                // the three acquisition errors that led here.
                self.session_state = SessionState::Ready;
                let reason = msg
                    .get_str("message")
                    .unwrap_or("Session stopped after repeated failures")
                    .to_string();
                warn!(reason = %reason, "session aborted");
                self.reply(Message::error(reason)).await;
                return;
            }
            _ => {}
        }
        self.reply(msg).await;
    }

    /// Builds a `status` response from the mirrors and the position cache.
    fn status_message(&self) -> Message {
        let position = serde_json::to_value(self.position.snapshot())
            .unwrap_or(serde_json::Value::Null);
        let mut status = Message::new(tags::STATUS)
            .with("session_state", self.session_state.to_string())
            .with("detector_state", self.detector_state.to_string())
            .with("spectrum_count", self.spectrum_count)
            .with("position", position);
        if let Some(name) = &self.last_session_name {
            status = status.with("session_name", name.clone());
        }
        status
    }

    /// Stops the spectrometer worker, draining its final output, then
    /// releases the network worker.
    async fn shutdown(&mut self) {
        if self.spec_link.send(Message::new(tags::CLOSE)).await.is_ok() {
            while let Some(msg) = self.spec_link.recv().await {
                if msg.command == tags::CLOSED {
                    break;
                }
                self.handle_spectrometer(msg).await;
            }
        }
        let _ = self.net_link.send(Message::new(tags::CLOSE_OK)).await;
    }
}
