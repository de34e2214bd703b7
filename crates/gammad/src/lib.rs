//! Gamma Daemon - detector supervision and telemetry server
//!
//! This crate provides the daemon's orchestration layer:
//! - `supervisor` - top-level event loop validating and routing commands
//! - `network` - TCP/UDP worker translating wire frames to messages
//! - `spectrometer` - session/spectrum/detector state machines and
//!   acquisition scheduling
//! - `position` - background position poller with a lock-guarded cache
//! - `driver` - detector driver interface and the simulated detector
//! - `storage` - spectrum persistence sinks
//! - `link` - full-duplex message channels between supervisor and workers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         gammad                               │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │   ┌───────────────┐   link    ┌────────────────────────┐    │
//! │   │ NetworkWorker │◀─────────▶│       Supervisor       │    │
//! │   │  (TCP + UDP)  │           │ (dispatch + mirrors)   │    │
//! │   └───────────────┘           └───────────┬────────────┘    │
//! │                                           │ link             │
//! │   ┌───────────────┐  snapshot ┌───────────▼────────────┐    │
//! │   │ PositionWorker│◀──────────│   SpectrometerWorker   │    │
//! │   │ (cache+thread)│           │ (states, acquisitions) │    │
//! │   └───────────────┘           └────────────────────────┘    │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod daemon;
pub mod driver;
pub mod link;
pub mod network;
pub mod position;
pub mod spectrometer;
pub mod storage;
pub mod supervisor;
