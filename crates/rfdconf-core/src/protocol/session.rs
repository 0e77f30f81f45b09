//! Command-mode session
//!
//! Handles the session lifecycle with the modem: entering command mode,
//! request/response exchanges, and the return to transparent mode.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::{
    clock::{Clock, SystemClock},
    commands::{
        encode_request, AtCommand, ERROR_TERMINATOR, ESCAPE_SEQUENCE, MODEM_BANNER,
        OK_TERMINATOR,
    },
    lines::{escape_for_log, LineBuffer},
    serial::{ControlSignal, SerialTransport, Transport},
    ProtocolError,
};
use crate::config::SessionConfig;

/// How long each half of the DTR pulse is held
const CONTROL_LINE_PULSE: Duration = Duration::from_millis(100);

/// Session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    /// Bytes are relayed over the radio link
    Transparent,
    /// Entry sequence in progress
    EnteringCommand,
    /// Modem is accepting AT commands
    Command,
    /// `ATO` sent, returning to transparent mode
    ExitingCommand,
}

/// How an exchange ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// Terminated by `OK`
    Ok,
    /// Terminated by `ERROR`
    Error,
    /// No terminator arrived before the command timeout
    Unterminated,
}

/// Lines returned by the modem for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Request line as sent, without terminator
    pub request: String,
    /// Response lines in arrival order, echo and terminator excluded.
    /// Blank lines are kept.
    pub lines: Vec<String>,
    /// How the exchange ended
    pub status: ResponseStatus,
}

impl CommandResponse {
    /// Response lines joined with `\n`
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Terminated by `OK`
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// No terminator before the timeout
    pub fn is_unterminated(&self) -> bool {
        self.status == ResponseStatus::Unterminated
    }

    /// Lines with blank entries filtered out, for display
    pub fn non_blank_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(|l| l.as_str())
            .filter(|l| !l.is_empty())
    }

    /// Turn an `ERROR` status into [`ProtocolError::CommandRejected`]
    pub fn into_result(self) -> Result<Self, ProtocolError> {
        match self.status {
            ResponseStatus::Error => Err(ProtocolError::CommandRejected {
                diagnostic: self.text(),
                command: self.request,
            }),
            _ => Ok(self),
        }
    }
}

/// An open command-mode session with one modem.
///
/// Construction only succeeds once the modem has answered the command-mode
/// probe. The transport is owned exclusively and is closed on every path
/// out of the session, including a failed entry.
pub struct Session<T: Transport = SerialTransport, C: Clock = SystemClock> {
    transport: T,
    clock: C,
    config: SessionConfig,
    mode: SessionMode,
    /// Set after a transport fault; no further exchanges are allowed
    faulted: bool,
    closed: bool,
    /// Time of the last write, for the escape guard period
    last_write: Instant,
    /// Metrics: cumulative bytes and requests
    tx_bytes: u64,
    rx_bytes: u64,
    requests: u64,
}

impl Session<SerialTransport, SystemClock> {
    /// Open the configured serial port and enter command mode
    pub fn connect(config: SessionConfig) -> Result<Self, ProtocolError> {
        config.validate()?;
        let transport = SerialTransport::open(&config)?;
        Self::establish(transport, SystemClock, config)
    }
}

impl<T: Transport, C: Clock> Session<T, C> {
    /// Take ownership of an open transport and enter command mode.
    ///
    /// On failure the transport has been closed before the error is returned.
    pub fn establish(transport: T, clock: C, config: SessionConfig) -> Result<Self, ProtocolError> {
        let last_write = clock.now();
        let mut session = Self {
            transport,
            clock,
            config,
            mode: SessionMode::Transparent,
            faulted: false,
            closed: false,
            last_write,
            tx_bytes: 0,
            rx_bytes: 0,
            requests: 0,
        };

        if let Err(e) = session.config.validate() {
            session.release();
            return Err(e);
        }

        match session.enter_command_mode() {
            Ok(()) => Ok(session),
            Err(e) => {
                session.release();
                Err(e)
            }
        }
    }

    /// Get current session mode
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Configuration the session runs with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a transport fault has made this session unusable
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Whether the transport has been released
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Get cumulative tx bytes, rx bytes and request count
    pub fn counters(&self) -> (u64, u64, u64) {
        (self.tx_bytes, self.rx_bytes, self.requests)
    }

    /// Run the entry sequence until the probe succeeds or attempts run out
    fn enter_command_mode(&mut self) -> Result<(), ProtocolError> {
        let attempts = self.config.entry_attempts;

        for attempt in 1..=attempts {
            self.mode = SessionMode::EnteringCommand;
            debug!(
                "entry attempt {}/{} ({:?})",
                attempt, attempts, self.config.entry_strategy
            );

            match self.attempt_entry() {
                Ok(true) => {
                    self.mode = SessionMode::Command;
                    info!("entered command mode on attempt {}", attempt);
                    return Ok(());
                }
                Ok(false) => {
                    self.mode = SessionMode::Transparent;
                    warn!("no answer to command-mode probe (attempt {}/{})", attempt, attempts);
                    if attempt < attempts {
                        self.clock.sleep(self.config.entry_backoff());
                    }
                }
                Err(e) => {
                    self.mode = SessionMode::Transparent;
                    self.faulted = true;
                    return Err(e);
                }
            }
        }

        Err(ProtocolError::CommandModeEntry { attempts })
    }

    /// One pass of the entry sequence. `Ok(false)` means the probe went unanswered.
    fn attempt_entry(&mut self) -> Result<bool, ProtocolError> {
        let strategy = self.config.entry_strategy;
        let guard = self.config.guard_period();

        if strategy.uses_control_line() {
            self.pulse_control_line()?;
        }

        if strategy.uses_escape() {
            // The escape detector only fires with silence on both sides of "+++"
            self.clock.sleep_until(self.last_write + guard);
            self.write_raw(ESCAPE_SEQUENCE)?;
            self.clock.sleep(guard);
        }

        self.probe()
    }

    /// Hold DTR high, flush both directions, then drop DTR
    fn pulse_control_line(&mut self) -> Result<(), ProtocolError> {
        debug!("pulsing DTR");
        self.transport.set_signal(ControlSignal::Dtr, true)?;
        self.clock.sleep(CONTROL_LINE_PULSE);
        self.transport.discard_input()?;
        self.transport.discard_output()?;
        self.transport.set_signal(ControlSignal::Dtr, false)?;
        self.clock.sleep(CONTROL_LINE_PULSE);
        Ok(())
    }

    /// Send `AT` and wait for `OK` or the modem banner
    fn probe(&mut self) -> Result<bool, ProtocolError> {
        self.transport.discard_input()?;
        self.write_raw(&AtCommand::Probe.to_bytes())?;

        let deadline = self.clock.now() + self.config.probe_timeout();
        let mut response = Vec::new();

        while let Some(chunk) = self.poll(deadline)? {
            response.extend_from_slice(&chunk);
            let text = String::from_utf8_lossy(&response);
            if text.contains(OK_TERMINATOR) || text.contains(MODEM_BANNER) {
                return Ok(true);
            }
        }

        debug!("probe response: {:?}", escape_for_log(&response));
        Ok(false)
    }

    /// Send a request line and classify the reply.
    ///
    /// `OK` yields the response; `ERROR` yields
    /// [`ProtocolError::CommandRejected`]; a missing terminator yields the
    /// partial response with [`ResponseStatus::Unterminated`]. Transport
    /// failures fault the session.
    pub fn exchange(&mut self, request: &str) -> Result<CommandResponse, ProtocolError> {
        let response = self.exchange_raw(request)?;
        if response.is_unterminated() {
            warn!(
                "'{}' got no terminator within {}ms ({} line(s))",
                response.request,
                self.config.command_timeout().as_millis(),
                response.lines.len()
            );
        }
        response.into_result()
    }

    /// Typed form of [`Session::exchange`]
    pub fn send(&mut self, command: AtCommand) -> Result<CommandResponse, ProtocolError> {
        self.exchange(&command.to_line())
    }

    /// Like [`Session::exchange`], but an `ERROR` terminator comes back as
    /// [`ResponseStatus::Error`] instead of an error value.
    ///
    /// `ATO` and `ATZ` are refused on every request path;
    /// [`Session::close`] and [`Session::reboot`] own those transitions.
    pub fn exchange_raw(&mut self, request: &str) -> Result<CommandResponse, ProtocolError> {
        self.ensure_command_mode()?;

        let request = request.trim();
        if let Some(command) = AtCommand::parse(request) {
            if !command.expects_response() {
                return Err(ProtocolError::Config(format!(
                    "'{}' leaves command mode; close or reboot the session instead",
                    command
                )));
            }
        }
        match self.collect_response(request) {
            Ok(response) => {
                self.requests = self.requests.saturating_add(1);
                Ok(response)
            }
            Err(e) => {
                if e.is_transport_fault() {
                    self.faulted = true;
                }
                Err(e)
            }
        }
    }

    fn ensure_command_mode(&self) -> Result<(), ProtocolError> {
        if self.faulted {
            return Err(ProtocolError::SessionFaulted);
        }
        if self.closed || self.mode != SessionMode::Command {
            return Err(ProtocolError::NotInCommandMode);
        }
        Ok(())
    }

    fn collect_response(&mut self, request: &str) -> Result<CommandResponse, ProtocolError> {
        // Anything still buffered belongs to an earlier exchange
        self.transport.discard_input()?;
        self.write_raw(&encode_request(request))?;

        let deadline = self.clock.now() + self.config.command_timeout();
        let mut buffer = LineBuffer::new();
        let mut lines = Vec::new();
        let mut echo_pending = true;

        let finish = |lines: Vec<String>, status| CommandResponse {
            request: request.to_string(),
            lines,
            status,
        };

        while let Some(chunk) = self.poll(deadline)? {
            for line in buffer.push(&chunk) {
                if echo_pending && line == request {
                    echo_pending = false;
                    trace!("dropped echo of '{}'", request);
                    continue;
                }
                if line == OK_TERMINATOR {
                    return Ok(finish(lines, ResponseStatus::Ok));
                }
                if line == ERROR_TERMINATOR {
                    return Ok(finish(lines, ResponseStatus::Error));
                }
                lines.push(line);
            }
        }

        if let Some(partial) = buffer.take_partial() {
            lines.push(partial);
        }
        Ok(finish(lines, ResponseStatus::Unterminated))
    }

    /// Wait for the next chunk of input, or `None` once `deadline` passes
    fn poll(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>, ProtocolError> {
        let poll_interval = self.config.poll_interval();

        loop {
            let now = self.clock.now();
            if now >= deadline {
                return Ok(None);
            }

            let slice_end = (now + poll_interval).min(deadline);
            let chunk = self.transport.read_available(slice_end)?;
            if !chunk.is_empty() {
                self.rx_bytes = self.rx_bytes.saturating_add(chunk.len() as u64);
                return Ok(Some(chunk));
            }
            self.clock.sleep_until(slice_end);
        }
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        trace!("write: {}", escape_for_log(bytes));
        self.transport.write(bytes)?;
        self.last_write = self.clock.now();
        self.tx_bytes = self.tx_bytes.saturating_add(bytes.len() as u64);
        Ok(())
    }

    /// Send `ATZ` and release the port.
    ///
    /// The modem drops out of command mode while rebooting, so no `ATO`
    /// follows and no reply is awaited.
    pub fn reboot(mut self) -> Result<(), ProtocolError> {
        self.ensure_command_mode()?;
        let result = self.write_raw(&AtCommand::Reboot.to_bytes());
        self.mode = SessionMode::Transparent;
        self.release();
        if result.is_ok() {
            info!("modem rebooting");
        }
        result
    }

    /// Return the modem to transparent mode and release the port.
    ///
    /// Best effort: `ATO` is sent without waiting for a reply and any
    /// failure is ignored. Calling this more than once is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        if self.mode == SessionMode::Command && !self.faulted {
            self.mode = SessionMode::ExitingCommand;
            match self.write_raw(&AtCommand::ExitCommandMode.to_bytes()) {
                Ok(()) => debug!("sent ATO"),
                Err(e) => debug!("ATO not delivered: {} (ignored)", e),
            }
        }

        self.mode = SessionMode::Transparent;
        self.release();
    }

    fn release(&mut self) {
        self.transport.close();
        self.closed = true;
    }
}

impl<T: Transport, C: Clock> Drop for Session<T, C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ManualClock, SimulatedModem};

    fn open_session() -> (Session<SimulatedModem, ManualClock>, SimulatedModem, ManualClock) {
        let clock = ManualClock::new();
        let modem = SimulatedModem::new(clock.clone());
        let session = Session::establish(
            modem.clone(),
            clock.clone(),
            SessionConfig::for_port("sim"),
        )
        .unwrap();
        (session, modem, clock)
    }

    #[test]
    fn test_response_text_and_filtering() {
        let response = CommandResponse {
            request: "ATI".to_string(),
            lines: vec!["".to_string(), "RFD SiK 2.65".to_string(), "".to_string()],
            status: ResponseStatus::Ok,
        };
        assert_eq!(response.text(), "\nRFD SiK 2.65\n");
        assert_eq!(response.non_blank_lines().collect::<Vec<_>>(), vec!["RFD SiK 2.65"]);
        assert!(response.clone().into_result().is_ok());
    }

    #[test]
    fn test_error_status_into_rejection() {
        let response = CommandResponse {
            request: "ATS99?".to_string(),
            lines: vec![],
            status: ResponseStatus::Error,
        };
        match response.into_result() {
            Err(ProtocolError::CommandRejected { command, diagnostic }) => {
                assert_eq!(command, "ATS99?");
                assert!(diagnostic.is_empty());
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_session_starts_in_command_mode() {
        let (session, _modem, _clock) = open_session();
        assert_eq!(session.mode(), SessionMode::Command);
        assert!(!session.is_faulted());
    }

    #[test]
    fn test_exchange_raw_keeps_error_status() {
        let (mut session, modem, _clock) = open_session();
        modem.reject("ATS3=5");
        let response = session.exchange_raw("ATS3=5").unwrap();
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(session.mode(), SessionMode::Command);
    }

    #[test]
    fn test_request_is_trimmed() {
        let (mut session, _modem, _clock) = open_session();
        let response = session.exchange("  ATS3?  ").unwrap();
        assert_eq!(response.request, "ATS3?");
        assert_eq!(response.lines, vec!["25"]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut session, modem, _clock) = open_session();
        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eq!(modem.close_count(), 1);
        assert!(matches!(
            session.exchange("AT"),
            Err(ProtocolError::NotInCommandMode)
        ));
    }

    #[test]
    fn test_send_refuses_mode_exits() {
        let (mut session, modem, _clock) = open_session();
        assert!(matches!(
            session.send(AtCommand::ExitCommandMode),
            Err(ProtocolError::Config(_))
        ));
        assert!(session.send(AtCommand::Reboot).is_err());
        assert_eq!(modem.requests(), vec!["AT"]);
        assert_eq!(session.mode(), SessionMode::Command);
    }

    #[test]
    fn test_counters_track_traffic() {
        let (mut session, _modem, _clock) = open_session();
        let (tx_before, _, requests_before) = session.counters();
        session.exchange("ATS3?").unwrap();
        let (tx, rx, requests) = session.counters();
        assert_eq!(tx - tx_before, "ATS3?\r\n".len() as u64);
        assert!(rx > 0);
        assert_eq!(requests, requests_before + 1);
    }
}
