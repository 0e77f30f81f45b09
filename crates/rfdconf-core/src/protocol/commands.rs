//! Protocol commands
//!
//! Defines the AT commands understood by SiK firmware on the RFD900.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Escape sequence that asks the modem to leave transparent mode
pub const ESCAPE_SEQUENCE: &[u8] = b"+++";

/// Line terminator appended to every request
pub const LINE_TERMINATOR: &str = "\r\n";

/// Terminal line for a successful command
pub const OK_TERMINATOR: &str = "OK";

/// Terminal line for a rejected command
pub const ERROR_TERMINATOR: &str = "ERROR";

/// Banner fragment some firmware prints instead of `OK` when probed
pub const MODEM_BANNER: &str = "RFD SiK";

/// AT commands for modem configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtCommand {
    /// Liveness probe (`AT`)
    Probe,
    /// Read a register (`ATS{n}?`)
    ReadRegister(u8),
    /// Write a register in RAM (`ATS{n}={v}`)
    WriteRegister(u8, i64),
    /// Persist RAM parameters to EEPROM (`AT&W`)
    Persist,
    /// Load factory defaults into RAM (`AT&F`)
    FactoryReset,
    /// Reboot the modem (`ATZ`)
    Reboot,
    /// Leave command mode and resume transparent mode (`ATO`)
    ExitCommandMode,
    /// Information query (`ATI`, `ATI2`..`ATI7`)
    Info(InfoQuery),
}

/// Information pages available through `ATIn`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfoQuery {
    /// `ATI`: firmware banner
    Version,
    /// `ATI2`: board type
    BoardType,
    /// `ATI3`: board frequency band
    BoardFrequency,
    /// `ATI4`: board version
    BoardVersion,
    /// `ATI5`: all register values
    Parameters,
    /// `ATI6`: TDM timing report
    TdmTiming,
    /// `ATI7`: RSSI and link statistics
    RssiReport,
}

impl InfoQuery {
    /// All pages in query order
    pub const ALL: [InfoQuery; 7] = [
        InfoQuery::Version,
        InfoQuery::BoardType,
        InfoQuery::BoardFrequency,
        InfoQuery::BoardVersion,
        InfoQuery::Parameters,
        InfoQuery::TdmTiming,
        InfoQuery::RssiReport,
    ];

    /// Command suffix after `ATI`
    pub fn suffix(&self) -> &'static str {
        match self {
            InfoQuery::Version => "",
            InfoQuery::BoardType => "2",
            InfoQuery::BoardFrequency => "3",
            InfoQuery::BoardVersion => "4",
            InfoQuery::Parameters => "5",
            InfoQuery::TdmTiming => "6",
            InfoQuery::RssiReport => "7",
        }
    }

    /// Display name of the page
    pub fn label(&self) -> &'static str {
        match self {
            InfoQuery::Version => "Version",
            InfoQuery::BoardType => "Board Type",
            InfoQuery::BoardFrequency => "Board Frequency",
            InfoQuery::BoardVersion => "Board Version",
            InfoQuery::Parameters => "Current Parameters",
            InfoQuery::TdmTiming => "TDM Timing",
            InfoQuery::RssiReport => "RSSI Statistics",
        }
    }
}

impl AtCommand {
    /// Request line without terminator
    pub fn to_line(&self) -> String {
        match self {
            AtCommand::Probe => "AT".to_string(),
            AtCommand::ReadRegister(n) => format!("ATS{}?", n),
            AtCommand::WriteRegister(n, v) => format!("ATS{}={}", n, v),
            AtCommand::Persist => "AT&W".to_string(),
            AtCommand::FactoryReset => "AT&F".to_string(),
            AtCommand::Reboot => "ATZ".to_string(),
            AtCommand::ExitCommandMode => "ATO".to_string(),
            AtCommand::Info(q) => format!("ATI{}", q.suffix()),
        }
    }

    /// Request line with CRLF, ready for the wire
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_request(&self.to_line())
    }

    /// Whether the modem answers this command with an `OK`/`ERROR` terminator.
    ///
    /// `ATZ` and `ATO` leave command mode before anything useful comes back.
    pub fn expects_response(&self) -> bool {
        !matches!(self, AtCommand::Reboot | AtCommand::ExitCommandMode)
    }

    /// Parse a request line into a typed command
    pub fn parse(line: &str) -> Option<AtCommand> {
        let upper = line.trim().to_ascii_uppercase();
        match upper.as_str() {
            "AT" => return Some(AtCommand::Probe),
            "AT&W" => return Some(AtCommand::Persist),
            "AT&F" => return Some(AtCommand::FactoryReset),
            "ATZ" => return Some(AtCommand::Reboot),
            "ATO" => return Some(AtCommand::ExitCommandMode),
            _ => {}
        }

        if let Some(rest) = upper.strip_prefix("ATI") {
            return InfoQuery::ALL
                .iter()
                .find(|q| q.suffix() == rest)
                .map(|q| AtCommand::Info(*q));
        }

        let rest = upper.strip_prefix("ATS")?;
        if let Some(reg) = rest.strip_suffix('?') {
            return reg.parse().ok().map(AtCommand::ReadRegister);
        }
        let (reg, value) = rest.split_once('=')?;
        Some(AtCommand::WriteRegister(reg.parse().ok()?, value.parse().ok()?))
    }
}

impl fmt::Display for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Append the line terminator to a request line
pub fn encode_request(line: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(line.len() + LINE_TERMINATOR.len());
    bytes.extend_from_slice(line.as_bytes());
    bytes.extend_from_slice(LINE_TERMINATOR.as_bytes());
    bytes
}
