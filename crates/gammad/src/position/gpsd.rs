//! gpsd position source.
//!
//! Speaks the gpsd line-JSON protocol over a non-blocking TCP socket:
//! on connect it sends a `?WATCH` enabling JSON reports, then parses TPV
//! (time-position-velocity) lines into [`PositionSample`]s. Connection
//! failures are absorbed; the source retries on a later poll and the
//! cache simply keeps its last known fix in the meantime.

use super::PositionSource;
use chrono::{DateTime, Utc};
use gamma_core::PositionSample;
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use tracing::{debug, warn};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";
const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);
const READ_CHUNK: usize = 4096;

/// One gpsd TPV report; every field the receiver may omit is optional.
#[derive(Debug, Deserialize)]
struct TpvReport {
    class: String,
    lat: Option<f64>,
    epy: Option<f64>,
    lon: Option<f64>,
    epx: Option<f64>,
    alt: Option<f64>,
    epv: Option<f64>,
    track: Option<f64>,
    epd: Option<f64>,
    speed: Option<f64>,
    eps: Option<f64>,
    climb: Option<f64>,
    epc: Option<f64>,
    time: Option<DateTime<Utc>>,
}

impl From<TpvReport> for PositionSample {
    fn from(tpv: TpvReport) -> Self {
        // gpsd names epx/epy relative to longitude/latitude respectively.
        Self {
            latitude: tpv.lat,
            latitude_error: tpv.epy,
            longitude: tpv.lon,
            longitude_error: tpv.epx,
            altitude: tpv.alt,
            altitude_error: tpv.epv,
            track: tpv.track,
            track_error: tpv.epd,
            speed: tpv.speed,
            speed_error: tpv.eps,
            climb: tpv.climb,
            climb_error: tpv.epc,
            time: tpv.time,
        }
    }
}

/// Position source backed by a gpsd endpoint.
pub struct GpsdSource {
    addr: String,
    stream: Option<TcpStream>,
    buffer: Vec<u8>,
    pending: VecDeque<PositionSample>,
    connect_logged: bool,
}

impl GpsdSource {
    pub fn new(addr: String) -> Self {
        Self {
            addr,
            stream: None,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            connect_logged: false,
        }
    }

    fn ensure_connected(&mut self) {
        if self.stream.is_some() {
            return;
        }
        let connected = self
            .addr
            .parse()
            .ok()
            .and_then(|addr| TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).ok())
            .and_then(|mut stream| {
                stream.set_nonblocking(true).ok()?;
                stream.write_all(WATCH_COMMAND).ok()?;
                Some(stream)
            });

        match connected {
            Some(stream) => {
                debug!(addr = %self.addr, "connected to gpsd");
                self.buffer.clear();
                self.stream = Some(stream);
                self.connect_logged = false;
            }
            None => {
                // Log the first failure per outage, then stay quiet.
                if !self.connect_logged {
                    warn!(addr = %self.addr, "gpsd unreachable, keeping last fix");
                    self.connect_logged = true;
                }
            }
        }
    }

    /// Reads every available byte without blocking; returns false if the
    /// connection is gone and must be reopened later.
    fn fill_buffer(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return false,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(e) => {
                    warn!(error = %e, "gpsd read failed");
                    return false;
                }
            }
        }
    }

    fn parse_lines(&mut self) {
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            match serde_json::from_slice::<TpvReport>(&line) {
                Ok(tpv) if tpv.class == "TPV" => self.pending.push_back(tpv.into()),
                // VERSION, WATCH, SKY and friends are expected noise.
                Ok(_) | Err(_) => {}
            }
        }
    }
}

impl PositionSource for GpsdSource {
    fn next_sample(&mut self) -> Option<PositionSample> {
        if let Some(sample) = self.pending.pop_front() {
            return Some(sample);
        }

        self.ensure_connected();
        if self.stream.is_some() {
            if !self.fill_buffer() {
                debug!("gpsd connection lost");
                self.stream = None;
            }
            self.parse_lines();
        }
        self.pending.pop_front()
    }
}
