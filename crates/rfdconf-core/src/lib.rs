//! # rfdconf Core Library
//!
//! Core functionality for configuring RFD900 radio modems over a serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The SiK command-mode session protocol (`+++` entry, AT exchanges, `ATO` exit)
//! - The register catalog with ranges and defaults
//! - Validation of register writes before they reach the modem
//! - Write-then-verify and the other modem configuration operations
//! - A simulated modem for running the protocol without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use rfdconf_core::{config::SessionConfig, modem::Modem};
//!
//! let mut modem = Modem::connect(SessionConfig::for_port("/dev/ttyUSB0"))?;
//! let report = modem.set_parameter("NETID", 5)?;
//! for warning in &report.warnings {
//!     eprintln!("{:?}", warning);
//! }
//! modem.close();
//! ```

pub mod catalog;
pub mod config;
pub mod modem;
pub mod protocol;
pub mod validation;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalog::{RegisterDescriptor, REGISTERS};
    pub use crate::config::{EntryStrategy, SessionConfig};
    pub use crate::modem::{Modem, ModemError, ModemInfo, SetReport, SetWarning};
    pub use crate::protocol::{
        AtCommand, CommandResponse, ProtocolError, ResponseStatus, Session, SessionMode,
        SimulatedModem,
    };
    pub use crate::validation::{validate, ValidationError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
