//! Gamma Client - command-line operator console for the gamma daemon
//!
//! Sends one command over the framed TCP service (or as a UDP datagram
//! with `--udp`) and prints every response as a JSON line until the
//! daemon goes quiet for `--timeout` seconds or Ctrl+C is pressed. A
//! running session streams spectra, so `gammac start` keeps printing
//! until interrupted.
//!
//! # Usage
//!
//! ```bash
//! gammac ping
//! gammac config --voltage 775 --num-channels 1024
//! gammac start --session-name survey-42 --livetime 2
//! gammac stop
//! gammac dump --session-name survey-42
//! gammac status --udp
//! gammac set-gain --voltage 775 --coarse-gain 1.0 --fine-gain 1.375
//! gammac close
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::codec::Framed;

use gamma_protocol::{decode_datagram, encode_datagram, tags, Frame, FrameCodec, Message};

/// Gamma client - radiation measurement console
#[derive(Parser, Debug)]
#[command(name = "gammac", version, about)]
struct Args {
    /// Daemon TCP endpoint
    #[arg(long, default_value = "127.0.0.1:7000", global = true)]
    host: String,

    /// Send the command as a UDP datagram instead of over TCP
    #[arg(long, global = true)]
    udp: bool,

    /// Daemon UDP endpoint, used with --udp
    #[arg(long, default_value = "127.0.0.1:9999", global = true)]
    udp_host: String,

    /// Seconds of response silence before the client exits
    #[arg(long, default_value_t = 5.0, global = true)]
    timeout: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the daemon responds
    Ping,
    /// Apply a detector configuration
    Config {
        #[arg(long, default_value_t = 775)]
        voltage: u32,
        #[arg(long, default_value_t = 1.0)]
        coarse_gain: f64,
        #[arg(long, default_value_t = 1.375)]
        fine_gain: f64,
        #[arg(long, default_value_t = 1024)]
        num_channels: u32,
        #[arg(long, default_value_t = 3)]
        lld: u32,
        #[arg(long, default_value_t = 110)]
        uld: u32,
    },
    /// Start a measurement session and stream its spectra
    Start {
        /// Session name; a timestamp is generated when omitted
        #[arg(long)]
        session_name: Option<String>,
        /// Livetime per acquisition in seconds
        #[arg(long, default_value_t = 2.0)]
        livetime: f64,
        /// Free-text comment stored with the session
        #[arg(long)]
        comment: Option<String>,
    },
    /// Stop the running session
    Stop,
    /// Replay the stored spectra of a session
    Dump {
        /// Session name; the daemon's last session when omitted
        #[arg(long)]
        session_name: Option<String>,
    },
    /// Query daemon status
    Status,
    /// Stabilize the probe and apply amplifier gain
    SetGain {
        #[arg(long, default_value_t = 775)]
        voltage: u32,
        #[arg(long, default_value_t = 1.0)]
        coarse_gain: f64,
        #[arg(long, default_value_t = 1.375)]
        fine_gain: f64,
    },
    /// Shut the daemon down
    Close,
}

impl Command {
    fn into_message(self) -> Message {
        match self {
            Command::Ping => Message::new(tags::PING),
            Command::Config {
                voltage,
                coarse_gain,
                fine_gain,
                num_channels,
                lld,
                uld,
            } => Message::new(tags::DETECTOR_CONFIG)
                .with("voltage", voltage)
                .with("coarse_gain", coarse_gain)
                .with("fine_gain", fine_gain)
                .with("num_channels", num_channels)
                .with("lld", lld)
                .with("uld", uld),
            Command::Start {
                session_name,
                livetime,
                comment,
            } => {
                let name = session_name
                    .unwrap_or_else(|| Utc::now().format("session_%Y%m%d_%H%M%S").to_string());
                let mut msg = Message::new(tags::START_SESSION)
                    .with("session_name", name)
                    .with("livetime", livetime);
                if let Some(comment) = comment {
                    msg = msg.with("comment", comment);
                }
                msg
            }
            Command::Stop => Message::new(tags::STOP_SESSION),
            Command::Dump { session_name } => {
                let mut msg = Message::new(tags::DUMP_SESSION);
                if let Some(name) = session_name {
                    msg = msg.with("session_name", name);
                }
                msg
            }
            Command::Status => Message::new(tags::GET_STATUS),
            Command::SetGain {
                voltage,
                coarse_gain,
                fine_gain,
            } => Message::new(tags::SET_GAIN)
                .with("voltage", voltage)
                .with("coarse_gain", coarse_gain)
                .with("fine_gain", fine_gain),
            Command::Close => Message::new(tags::CLOSE),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let window = Duration::from_secs_f64(args.timeout);
    let msg = args.command.into_message();

    if args.udp {
        run_udp(&args.udp_host, msg, window).await
    } else {
        run_tcp(&args.host, msg, window).await
    }
}

/// Prints one response as a JSON line.
fn print_response(msg: &Message) -> Result<()> {
    println!("{}", serde_json::to_string(msg)?);
    Ok(())
}

async fn run_tcp(host: &str, msg: Message, window: Duration) -> Result<()> {
    let stream = TcpStream::connect(host)
        .await
        .with_context(|| format!("Failed to connect to {host}"))?;
    let mut framed = Framed::new(stream, FrameCodec);

    framed.send(msg).await.context("Failed to send command")?;

    loop {
        let frame = tokio::select! {
            frame = timeout(window, framed.next()) => frame,
            _ = tokio::signal::ctrl_c() => break,
        };
        match frame {
            Ok(Some(Ok(Frame::Message(reply)))) => {
                let closing = reply.command == tags::CLOSE_OK;
                print_response(&reply)?;
                if closing {
                    break;
                }
            }
            Ok(Some(Ok(Frame::Malformed(reason)))) => {
                eprintln!("Bad response: {reason}");
            }
            Ok(Some(Err(e))) => {
                eprintln!("Connection error: {e}");
                break;
            }
            Ok(None) => {
                eprintln!("Connection closed by daemon");
                break;
            }
            // Silence: the daemon has nothing more to say.
            Err(_) => break,
        }
    }

    Ok(())
}

async fn run_udp(host: &str, msg: Message, window: Duration) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("Failed to bind local socket")?;
    socket
        .connect(host)
        .await
        .with_context(|| format!("Failed to address {host}"))?;

    let bytes = encode_datagram(&msg).context("Failed to encode command")?;
    socket.send(&bytes).await.context("Failed to send command")?;

    let mut buf = vec![0u8; 65536];
    loop {
        let received = tokio::select! {
            received = timeout(window, socket.recv(&mut buf)) => received,
            _ = tokio::signal::ctrl_c() => break,
        };
        match received {
            Ok(Ok(len)) => match decode_datagram(&buf[..len]) {
                Ok(reply) => {
                    let closing = reply.command == tags::CLOSE_OK;
                    print_response(&reply)?;
                    if closing {
                        break;
                    }
                }
                Err(e) => eprintln!("Bad response: {e}"),
            },
            Ok(Err(e)) => return Err(e).context("Receive failed"),
            Err(_) => break,
        }
    }

    Ok(())
}
