//! Daemon assembly: wires the workers together from a [`Config`] and
//! owns their handles for shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use gamma_core::DriverError;

use crate::config::Config;
use crate::driver::{self, DetectorDriver};
use crate::link::WorkerLink;
use crate::network::{NetError, NetworkWorker};
use crate::position::{self, PositionSource, PositionWorker};
use crate::spectrometer::SpectrometerWorker;
use crate::storage::{self, SpectrumSink};
use crate::supervisor::Supervisor;

/// Errors that prevent the daemon from starting.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Unknown position source: {0}")]
    UnknownPositionSource(String),

    #[error("Unknown storage sink: {0}")]
    UnknownStorageSink(String),
}

/// Assembles a daemon, with override points for tests that inject their
/// own detector, sink, or position source.
pub struct DaemonBuilder {
    config: Config,
    driver: Option<Box<dyn DetectorDriver>>,
    sink: Option<Arc<dyn SpectrumSink>>,
    source: Option<Box<dyn PositionSource>>,
}

impl DaemonBuilder {
    pub fn driver(mut self, driver: Box<dyn DetectorDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn SpectrumSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn position_source(mut self, source: Box<dyn PositionSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Binds the endpoints, spawns every worker, and returns the running
    /// daemon. Fails on a bad bind or an unknown registry key.
    pub async fn spawn(self) -> Result<Daemon, DaemonError> {
        let config = self.config;

        let driver = match self.driver {
            Some(driver) => driver,
            None => driver::create(&config.detector.kind)?,
        };
        let sink = match self.sink {
            Some(sink) => sink,
            None => storage::create(&config.storage.kind, config.storage.dir.clone())
                .ok_or_else(|| DaemonError::UnknownStorageSink(config.storage.kind.clone()))?,
        };
        let source = match self.source {
            Some(source) => source,
            None => position::create(&config.position.source, &config.position.gpsd_addr)
                .ok_or_else(|| {
                    DaemonError::UnknownPositionSource(config.position.source.clone())
                })?,
        };

        let position = PositionWorker::spawn(
            source,
            Duration::from_millis(config.position.poll_interval_ms),
        );

        let (net_near, net_far) = WorkerLink::pair();
        let (spec_near, spec_far) = WorkerLink::pair();

        let network = NetworkWorker::bind(
            &config.network.tcp_listen,
            &config.network.udp_listen,
            net_far,
        )
        .await?;
        let tcp_addr = network.tcp_local_addr().map_err(|source| NetError::Bind {
            kind: "stream",
            addr: config.network.tcp_listen.clone(),
            source,
        })?;
        let udp_addr = network.udp_local_addr().map_err(|source| NetError::Bind {
            kind: "datagram",
            addr: config.network.udp_listen.clone(),
            source,
        })?;

        let spectrometer = SpectrometerWorker::new(
            spec_far,
            driver,
            sink,
            position.cache(),
            Duration::from_millis(config.session.tick_interval_ms),
        );

        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(net_near, spec_near, position.cache(), cancel.clone());

        Ok(Daemon {
            tcp_addr,
            udp_addr,
            cancel,
            supervisor: tokio::spawn(supervisor.run()),
            network: tokio::spawn(network.run()),
            spectrometer: tokio::spawn(spectrometer.run()),
            position: Some(position),
        })
    }
}

/// A running daemon: worker handles plus the bound endpoint addresses.
pub struct Daemon {
    /// Actual stream endpoint (resolved when configured with port 0)
    pub tcp_addr: SocketAddr,
    /// Actual datagram endpoint
    pub udp_addr: SocketAddr,

    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
    network: JoinHandle<()>,
    spectrometer: JoinHandle<()>,
    position: Option<PositionWorker>,
}

impl Daemon {
    /// Starts assembling a daemon from configuration.
    pub fn builder(config: Config) -> DaemonBuilder {
        DaemonBuilder {
            config,
            driver: None,
            sink: None,
            source: None,
        }
    }

    /// Token that triggers the shutdown sequence when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for every worker to finish, then stops the position thread.
    ///
    /// Returns once the supervisor has completed its close sequence,
    /// whether triggered by a `close` command or by cancellation.
    pub async fn wait(mut self) {
        for (name, handle) in [
            ("supervisor", self.supervisor),
            ("network", self.network),
            ("spectrometer", self.spectrometer),
        ] {
            if let Err(e) = handle.await {
                warn!(worker = name, error = %e, "worker task failed");
            }
        }
        if let Some(position) = self.position.take() {
            // Joining an OS thread blocks; keep it off the async workers.
            let _ = tokio::task::spawn_blocking(move || position.stop()).await;
        }
    }

    /// Cancels and waits.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.wait().await;
    }
}
