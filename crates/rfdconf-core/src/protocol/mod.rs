//! Serial Protocol Communication
//!
//! Implements the SiK command-mode protocol used to configure RFD900 modems:
//! the `+++` escape into command mode, line-oriented AT request/response
//! exchanges, and the `ATO` return to transparent mode.

pub mod clock;
pub mod commands;
mod error;
pub mod lines;
pub mod serial;
mod session;
pub mod sim;

pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::{AtCommand, InfoQuery};
pub use error::ProtocolError;
pub use serial::{list_ports, ControlSignal, PortInfo, SerialTransport, Transport};
pub use session::{CommandResponse, ResponseStatus, Session, SessionMode};
pub use sim::SimulatedModem;

/// Default baud rate of SiK firmware
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Default per-command response timeout in milliseconds
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 1000;

/// Quiet period around `+++` required by the escape detector, in milliseconds
pub const DEFAULT_GUARD_MS: u64 = 1000;

/// How long to wait for the probe answer during entry, in milliseconds
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2000;

/// Full entry sequences attempted before giving up
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Pause between entry attempts in milliseconds
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

/// Interval between input polls in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;
