//! Modem configuration operations
//!
//! Register reads and writes, EEPROM persistence, info queries and the
//! write-then-verify sequence, all built on [`Session::exchange`].

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{self, RegisterDescriptor};
use crate::config::SessionConfig;
use crate::protocol::{
    AtCommand, Clock, CommandResponse, InfoQuery, ProtocolError, SerialTransport, Session,
    SystemClock, Transport,
};
use crate::validation::{validate, ValidationError};

/// Errors from high-level modem operations
#[derive(Error, Debug)]
pub enum ModemError {
    /// Session or transport failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Request refused before reaching the modem
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The modem answered `OK` but the reply could not be interpreted
    #[error("Unexpected response to '{command}': {response:?}")]
    UnexpectedResponse {
        /// Request line
        command: String,
        /// Response lines joined with `\n`
        response: String,
    },
}

/// Current value of one register
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterReading {
    /// Catalog entry of the register
    pub descriptor: &'static RegisterDescriptor,
    /// Value reported by the modem
    pub value: i64,
}

/// One `S{n}:{NAME}={value}` line from `ATI5`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterValue {
    /// Register number
    pub index: u8,
    /// Register name as the modem prints it
    pub name: String,
    /// Value reported by the modem
    pub value: i64,
}

impl ParameterValue {
    /// Catalog entry for this register, if it is one we know
    pub fn descriptor(&self) -> Option<&'static RegisterDescriptor> {
        catalog::by_index(self.index)
    }
}

/// Parse a line of `ATI5` output such as `S3:NETID=25`
pub fn parse_parameter_line(line: &str) -> Option<ParameterValue> {
    let rest = line.trim().strip_prefix('S')?;
    let (index, rest) = rest.split_once(':')?;
    let (name, value) = rest.split_once('=')?;
    Some(ParameterValue {
        index: index.trim().parse().ok()?,
        name: name.trim().to_string(),
        value: value.trim().parse().ok()?,
    })
}

/// Something that went wrong after the register write itself succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SetWarning {
    /// The write got no terminator; the read-back decides whether it took
    WriteUnconfirmed,
    /// `AT&W` was refused. The new value is live in RAM until the next reboot.
    PersistRejected {
        /// Lines the modem sent before `ERROR`
        diagnostic: String,
    },
    /// `AT&W` got no terminator; EEPROM state is unknown
    PersistUnconfirmed,
    /// The modem reports a different value than requested
    VerificationMismatch {
        /// Value written
        expected: i64,
        /// Value read back
        actual: i64,
    },
    /// The read-back could not be obtained or parsed
    VerificationUnavailable {
        /// Why the value could not be read
        reason: String,
    },
}

/// Outcome of [`Modem::set_parameter`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetReport {
    /// Canonical register name
    pub parameter: &'static str,
    /// Register number
    pub index: u8,
    /// Value written
    pub requested: i64,
    /// `AT&W` was acknowledged with `OK`
    pub persisted: bool,
    /// Value reported after the write, if it could be read
    pub read_back: Option<i64>,
    /// Both ends of the link need the same value
    pub requires_matching: bool,
    /// Problems after the write itself succeeded
    pub warnings: Vec<SetWarning>,
}

impl SetReport {
    /// Persisted and read back with the requested value
    pub fn is_verified(&self) -> bool {
        self.persisted && self.read_back == Some(self.requested) && self.warnings.is_empty()
    }
}

/// One `ATIn` page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfoPage {
    /// Query that produced this page
    pub query: InfoQuery,
    /// Display name of the page
    pub label: &'static str,
    /// Non-blank response lines; empty if the modem refused or stayed silent
    pub lines: Vec<String>,
}

/// Everything `ATI`..`ATI7` report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModemInfo {
    /// Pages in `ATI`..`ATI7` order
    pub pages: Vec<InfoPage>,
}

impl ModemInfo {
    /// Page for one query
    pub fn page(&self, query: InfoQuery) -> Option<&InfoPage> {
        self.pages.iter().find(|p| p.query == query)
    }
}

/// A configured modem reachable through a command-mode session
pub struct Modem<T: Transport = SerialTransport, C: Clock = SystemClock> {
    session: Session<T, C>,
}

impl Modem<SerialTransport, SystemClock> {
    /// Open the port and enter command mode
    pub fn connect(config: SessionConfig) -> Result<Self, ModemError> {
        Ok(Self::new(Session::connect(config)?))
    }
}

impl<T: Transport, C: Clock> Modem<T, C> {
    /// Wrap an open session
    pub fn new(session: Session<T, C>) -> Self {
        Self { session }
    }

    /// Underlying session
    pub fn session(&self) -> &Session<T, C> {
        &self.session
    }

    /// Underlying session, mutably
    pub fn session_mut(&mut self) -> &mut Session<T, C> {
        &mut self.session
    }

    /// Read one register by name
    pub fn get_parameter(&mut self, name: &str) -> Result<ParameterReading, ModemError> {
        let descriptor = catalog::lookup(name)
            .ok_or_else(|| ValidationError::UnknownParameter(name.to_string()))?;
        let command = AtCommand::ReadRegister(descriptor.index);
        let response = self.session.send(command)?;

        let value = parse_register_value(&response).ok_or_else(|| {
            ModemError::UnexpectedResponse {
                command: command.to_line(),
                response: response.text(),
            }
        })?;

        Ok(ParameterReading { descriptor, value })
    }

    /// Validate, write, persist and read back a register.
    ///
    /// A rejected write aborts before anything is persisted. Persist and
    /// read-back problems are reported as warnings on the returned report;
    /// only transport faults turn them into errors.
    pub fn set_parameter(&mut self, name: &str, value: i64) -> Result<SetReport, ModemError> {
        let index = validate(name, value)?;
        let descriptor = catalog::by_index(index)
            .ok_or_else(|| ValidationError::UnknownParameter(name.to_string()))?;

        let mut report = SetReport {
            parameter: descriptor.name,
            index,
            requested: value,
            persisted: false,
            read_back: None,
            requires_matching: descriptor.requires_matching,
            warnings: Vec::new(),
        };

        let written = self.session.send(AtCommand::WriteRegister(index, value))?;
        if written.is_unterminated() {
            report.warnings.push(SetWarning::WriteUnconfirmed);
        }

        match self.session.send(AtCommand::Persist) {
            Ok(response) if response.is_ok() => report.persisted = true,
            Ok(_) => report.warnings.push(SetWarning::PersistUnconfirmed),
            Err(ProtocolError::CommandRejected { diagnostic, .. }) => {
                warn!(
                    "AT&W rejected; {}={} is active only until the next reboot",
                    descriptor.name, value
                );
                report.warnings.push(SetWarning::PersistRejected { diagnostic });
            }
            Err(e) => return Err(e.into()),
        }

        match self.session.send(AtCommand::ReadRegister(index)) {
            Ok(response) => match parse_register_value(&response) {
                Some(actual) => {
                    report.read_back = Some(actual);
                    if actual != value {
                        warn!(
                            "{} read back as {} after writing {}",
                            descriptor.name, actual, value
                        );
                        report.warnings.push(SetWarning::VerificationMismatch {
                            expected: value,
                            actual,
                        });
                    }
                }
                None => report.warnings.push(SetWarning::VerificationUnavailable {
                    reason: format!("unreadable response {:?}", response.text()),
                }),
            },
            Err(e) if e.is_recoverable() => {
                report.warnings.push(SetWarning::VerificationUnavailable {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "set {} (S{}) = {}{}",
            descriptor.name,
            index,
            value,
            if report.warnings.is_empty() { "" } else { " with warnings" }
        );
        Ok(report)
    }

    /// Write RAM parameters to EEPROM (`AT&W`)
    pub fn persist(&mut self) -> Result<(), ModemError> {
        self.session.send(AtCommand::Persist)?;
        Ok(())
    }

    /// Load factory defaults and persist them (`AT&F`, `AT&W`)
    pub fn factory_reset(&mut self) -> Result<(), ModemError> {
        self.session.send(AtCommand::FactoryReset)?;
        self.session.send(AtCommand::Persist)?;
        info!("factory defaults restored");
        Ok(())
    }

    /// Current values of every register as reported by `ATI5`
    pub fn show_parameters(&mut self) -> Result<Vec<ParameterValue>, ModemError> {
        let response = self.session.send(AtCommand::Info(InfoQuery::Parameters))?;
        Ok(response
            .non_blank_lines()
            .filter_map(parse_parameter_line)
            .collect())
    }

    /// Query every information page.
    ///
    /// A page the modem refuses is left empty rather than failing the whole query.
    pub fn info(&mut self) -> Result<ModemInfo, ModemError> {
        let mut pages = Vec::with_capacity(InfoQuery::ALL.len());
        for query in InfoQuery::ALL {
            let lines = match self.session.send(AtCommand::Info(query)) {
                Ok(response) => response.non_blank_lines().map(str::to_string).collect(),
                Err(e) if e.is_recoverable() => {
                    warn!("{} unavailable: {}", query.label(), e);
                    Vec::new()
                }
                Err(e) => return Err(e.into()),
            };
            pages.push(InfoPage {
                query,
                label: query.label(),
                lines,
            });
        }
        Ok(ModemInfo { pages })
    }

    /// Send an arbitrary request line; `ERROR` comes back as a status
    pub fn raw(&mut self, line: &str) -> Result<CommandResponse, ModemError> {
        Ok(self.session.exchange_raw(line)?)
    }

    /// Reboot the modem (`ATZ`). The session ends here.
    pub fn reboot(self) -> Result<(), ModemError> {
        self.session.reboot()?;
        Ok(())
    }

    /// Return to transparent mode and release the port
    pub fn close(mut self) {
        self.session.close();
    }
}

/// First non-blank line of a register read, as an integer
fn parse_register_value(response: &CommandResponse) -> Option<i64> {
    response.non_blank_lines().next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parameter_line() {
        assert_eq!(
            parse_parameter_line("S3:NETID=25"),
            Some(ParameterValue {
                index: 3,
                name: "NETID".to_string(),
                value: 25
            })
        );
        assert_eq!(
            parse_parameter_line(" S8:MIN_FREQ=915000 ").map(|p| p.value),
            Some(915000)
        );
        assert_eq!(parse_parameter_line("RFD SiK 2.65"), None);
        assert_eq!(parse_parameter_line("S3:NETID"), None);
        assert_eq!(parse_parameter_line("Sx:NETID=1"), None);
    }

    #[test]
    fn test_parameter_value_descriptor() {
        let p = parse_parameter_line("S15:NODEID=2").unwrap();
        assert_eq!(p.descriptor().map(|d| d.name), Some("NODEID"));
        let unknown = parse_parameter_line("S40:EXTRA=1").unwrap();
        assert!(unknown.descriptor().is_none());
    }

    #[test]
    fn test_report_verified() {
        let mut report = SetReport {
            parameter: "NETID",
            index: 3,
            requested: 5,
            persisted: true,
            read_back: Some(5),
            requires_matching: true,
            warnings: vec![],
        };
        assert!(report.is_verified());
        report.read_back = Some(7);
        assert!(!report.is_verified());
    }

    #[test]
    fn test_warning_serializes_with_kind_tag() {
        let json = serde_json::to_string(&SetWarning::VerificationMismatch {
            expected: 5,
            actual: 7,
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"verification_mismatch","expected":5,"actual":7}"#);
    }
}
