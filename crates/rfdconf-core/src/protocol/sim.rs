//! Simulated RFD900 modem
//!
//! A [`Transport`] that behaves like SiK firmware closely enough to drive
//! the session protocol without hardware: guard-banded `+++` detection,
//! DTR entry, command echo, `OK`/`ERROR` terminators and a register bank
//! with separate RAM and EEPROM copies. Faults can be injected to exercise
//! timeouts and rejections.
//!
//! `SimulatedModem` is a cheap handle; clones share the same modem, so a
//! test can hand one clone to a session and inspect the other.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{
    clock::Clock,
    commands::{AtCommand, InfoQuery, ESCAPE_SEQUENCE},
    serial::{ControlSignal, Transport},
    ProtocolError, DEFAULT_GUARD_MS,
};
use crate::catalog::{self, REGISTERS, REGISTER_COUNT};

/// Banner returned by `ATI`
pub const SIM_BANNER: &str = "RFD SiK 2.65 on RFD900A";

/// Modem-side view of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    /// Bytes are treated as radio payload
    Data,
    /// Lines are interpreted as AT commands
    Command,
}

/// Something the host did to the simulated port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEventKind {
    /// Bytes written
    Write(Vec<u8>),
    /// Control line driven to a level
    Signal(ControlSignal, bool),
    /// Unread input dropped
    DiscardInput,
    /// Queued output dropped
    DiscardOutput,
    /// Handle closed
    Close,
}

/// A host action with the time it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEvent {
    /// When it happened
    pub at: Instant,
    /// What happened
    pub kind: WireEventKind,
}

#[derive(Debug)]
struct SimState {
    mode: SimMode,
    ram: [i64; REGISTER_COUNT],
    eeprom: [i64; REGISTER_COUNT],
    open: bool,
    close_count: usize,

    // Escape detection
    guard: Duration,
    enforce_guard: bool,
    last_write: Instant,
    escape_armed_at: Option<Instant>,
    dtr_high: bool,

    // Host side buffers
    line_buf: Vec<u8>,
    output: VecDeque<(Instant, Vec<u8>)>,
    payload: Vec<u8>,
    requests: Vec<String>,
    events: Vec<WireEvent>,

    // Fault injection
    echo: bool,
    silent: bool,
    drop_terminator: bool,
    fail_writes: bool,
    reply_delay: Duration,
    rejected: HashSet<String>,
    overrides: HashMap<String, Vec<String>>,
}

/// Shared handle to a simulated modem
#[derive(Clone)]
pub struct SimulatedModem {
    state: Arc<Mutex<SimState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl std::fmt::Debug for SimulatedModem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedModem")
            .field("state", &*self.lock())
            .finish()
    }
}

impl SimulatedModem {
    /// A modem in transparent mode with factory defaults, timed by `clock`
    pub fn new(clock: impl Clock + Send + Sync + 'static) -> Self {
        let now = clock.now();
        let defaults = catalog::defaults();
        let state = SimState {
            mode: SimMode::Data,
            ram: defaults,
            eeprom: defaults,
            open: true,
            close_count: 0,
            guard: Duration::from_millis(DEFAULT_GUARD_MS),
            enforce_guard: true,
            last_write: now,
            escape_armed_at: None,
            dtr_high: false,
            line_buf: Vec::new(),
            output: VecDeque::new(),
            payload: Vec::new(),
            requests: Vec::new(),
            events: Vec::new(),
            echo: true,
            silent: false,
            drop_terminator: false,
            fail_writes: false,
            reply_delay: Duration::ZERO,
            rejected: HashSet::new(),
            overrides: HashMap::new(),
        };

        Self {
            state: Arc::new(Mutex::new(state)),
            clock: Arc::new(clock),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- fault injection -------------------------------------------------

    /// Never answer anything
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Echo command lines back (SiK default)
    pub fn set_echo(&self, echo: bool) {
        self.lock().echo = echo;
    }

    /// Leave `OK`/`ERROR` off every reply
    pub fn set_drop_terminator(&self, drop: bool) {
        self.lock().drop_terminator = drop;
    }

    /// Fail every write as if the device had been unplugged
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Delay before replies become readable
    pub fn set_reply_delay(&self, delay: Duration) {
        self.lock().reply_delay = delay;
    }

    /// Accept `+++` regardless of surrounding silence
    pub fn set_enforce_guard(&self, enforce: bool) {
        self.lock().enforce_guard = enforce;
    }

    /// Answer `ERROR` to this exact request line
    pub fn reject(&self, line: &str) {
        self.lock().rejected.insert(line.to_string());
    }

    /// Answer this request line with `lines`, followed by `OK`
    pub fn override_reply(&self, line: &str, lines: &[&str]) {
        self.lock().overrides.insert(
            line.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
    }

    /// Put the modem straight into command mode
    pub fn force_command_mode(&self) {
        self.lock().mode = SimMode::Command;
    }

    // --- inspection ------------------------------------------------------

    /// Current modem-side mode
    pub fn mode(&self) -> SimMode {
        self.lock().mode
    }

    /// RAM value of a register
    pub fn register(&self, index: u8) -> Option<i64> {
        self.lock().ram.get(index as usize).copied()
    }

    /// EEPROM value of a register
    pub fn eeprom_register(&self, index: u8) -> Option<i64> {
        self.lock().eeprom.get(index as usize).copied()
    }

    /// Set a RAM register directly, bypassing range checks
    pub fn set_register(&self, index: u8, value: i64) {
        if let Some(slot) = self.lock().ram.get_mut(index as usize) {
            *slot = value;
        }
    }

    /// Command lines received while in command mode, in order
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    /// Bytes received in transparent mode
    pub fn payload(&self) -> Vec<u8> {
        self.lock().payload.clone()
    }

    /// Every host action so far, in order
    pub fn events(&self) -> Vec<WireEvent> {
        self.lock().events.clone()
    }

    /// Every write as text, in order
    pub fn writes(&self) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match &e.kind {
                WireEventKind::Write(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                _ => None,
            })
            .collect()
    }

    /// Number of times an open handle was closed
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }
}

impl SimState {
    fn record(&mut self, at: Instant, kind: WireEventKind) {
        self.events.push(WireEvent { at, kind });
    }

    /// Enter command mode if an armed escape has been followed by a full guard period
    fn settle(&mut self, now: Instant) {
        if let Some(armed_at) = self.escape_armed_at {
            if !self.enforce_guard || now.saturating_duration_since(armed_at) >= self.guard {
                self.escape_armed_at = None;
                self.mode = SimMode::Command;
                self.line_buf.clear();
                self.emit(now, &["OK"]);
            }
        }
    }

    fn emit(&mut self, now: Instant, lines: &[&str]) {
        if self.silent || lines.is_empty() {
            return;
        }
        let mut bytes = Vec::new();
        for line in lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        self.output.push_back((now + self.reply_delay, bytes));
    }

    fn handle_write(&mut self, now: Instant, bytes: &[u8]) {
        self.settle(now);

        if self.escape_armed_at.take().is_some() {
            // Data inside the trailing guard cancels the escape; "+++" was payload
            self.payload.extend_from_slice(ESCAPE_SEQUENCE);
        }

        let quiet_before = now.saturating_duration_since(self.last_write) >= self.guard;
        self.last_write = now;

        match self.mode {
            SimMode::Data => {
                if bytes == ESCAPE_SEQUENCE && (quiet_before || !self.enforce_guard) {
                    self.escape_armed_at = Some(now);
                } else {
                    self.payload.extend_from_slice(bytes);
                }
            }
            // The escape detector is idle in command mode
            SimMode::Command if bytes == ESCAPE_SEQUENCE && self.line_buf.is_empty() => {}
            SimMode::Command => {
                self.line_buf.extend_from_slice(bytes);
                while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\r' || b == b'\n') {
                    let raw: Vec<u8> = self.line_buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).trim().to_string();
                    if !line.is_empty() {
                        self.handle_command(now, &line);
                    }
                    if self.mode != SimMode::Command {
                        self.line_buf.clear();
                        break;
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, now: Instant, line: &str) {
        self.requests.push(line.to_string());

        let mut reply: Vec<String> = Vec::new();
        if self.echo {
            reply.push(line.to_string());
        }

        let terminator = if self.rejected.contains(line) {
            "ERROR"
        } else if let Some(lines) = self.overrides.get(line) {
            reply.extend(lines.iter().cloned());
            "OK"
        } else {
            match AtCommand::parse(line) {
                Some(command) => match self.execute(command, &mut reply) {
                    Some(true) => "OK",
                    Some(false) => "ERROR",
                    None => "",
                },
                None => "ERROR",
            }
        };

        if !terminator.is_empty() && !self.drop_terminator {
            reply.push(terminator.to_string());
        }
        let refs: Vec<&str> = reply.iter().map(|s| s.as_str()).collect();
        self.emit(now, &refs);
    }

    /// Apply a command. `None` means the modem sends no terminator.
    fn execute(&mut self, command: AtCommand, reply: &mut Vec<String>) -> Option<bool> {
        match command {
            AtCommand::Probe => Some(true),
            AtCommand::ReadRegister(n) => match self.ram.get(n as usize) {
                Some(value) => {
                    reply.push(value.to_string());
                    Some(true)
                }
                None => Some(false),
            },
            AtCommand::WriteRegister(n, value) => {
                let accepted = catalog::by_index(n).is_some_and(|r| r.contains(value));
                if accepted {
                    self.ram[n as usize] = value;
                }
                Some(accepted)
            }
            AtCommand::Persist => {
                self.eeprom = self.ram;
                Some(true)
            }
            AtCommand::FactoryReset => {
                self.ram = catalog::defaults();
                Some(true)
            }
            AtCommand::Reboot => {
                self.ram = self.eeprom;
                self.mode = SimMode::Data;
                None
            }
            AtCommand::ExitCommandMode => {
                self.mode = SimMode::Data;
                None
            }
            AtCommand::Info(query) => {
                reply.extend(self.info_page(query));
                Some(true)
            }
        }
    }

    fn info_page(&self, query: InfoQuery) -> Vec<String> {
        match query {
            InfoQuery::Version => vec![SIM_BANNER.to_string()],
            InfoQuery::BoardType => vec!["130".to_string()],
            InfoQuery::BoardFrequency => vec!["915".to_string()],
            InfoQuery::BoardVersion => vec!["1".to_string()],
            InfoQuery::Parameters => REGISTERS
                .iter()
                .map(|r| format!("S{}:{}={}", r.index, r.name, self.ram[r.index as usize]))
                .collect(),
            InfoQuery::TdmTiming => vec![
                "silence_period=36".to_string(),
                "tx_window_width=2652".to_string(),
                "max_data_packet_length=252".to_string(),
            ],
            InfoQuery::RssiReport => vec![
                "L/R RSSI: 212/198  L/R noise: 61/58 pkts: 17  txe=0 rxe=0 stx=0 srx=0 ecc=0/0 temp=38 dco=0"
                    .to_string(),
            ],
        }
    }
}

impl Transport for SimulatedModem {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let now = self.clock.now();
        let mut state = self.lock();
        if !state.open {
            return Err(ProtocolError::Port("simulated port is closed".into()));
        }
        if state.fail_writes {
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }
        state.record(now, WireEventKind::Write(bytes.to_vec()));
        state.handle_write(now, bytes);
        Ok(())
    }

    fn read_available(&mut self, _deadline: Instant) -> Result<Vec<u8>, ProtocolError> {
        let now = self.clock.now();
        let mut state = self.lock();
        if !state.open {
            return Err(ProtocolError::Port("simulated port is closed".into()));
        }
        state.settle(now);

        let mut data = Vec::new();
        while let Some((ready_at, _)) = state.output.front() {
            if *ready_at > now {
                break;
            }
            if let Some((_, bytes)) = state.output.pop_front() {
                data.extend_from_slice(&bytes);
            }
        }
        Ok(data)
    }

    fn discard_input(&mut self) -> Result<(), ProtocolError> {
        let now = self.clock.now();
        let mut state = self.lock();
        if !state.open {
            return Err(ProtocolError::Port("simulated port is closed".into()));
        }
        state.settle(now);
        state.record(now, WireEventKind::DiscardInput);
        state.output.retain(|(ready_at, _)| *ready_at > now);
        Ok(())
    }

    fn discard_output(&mut self) -> Result<(), ProtocolError> {
        let now = self.clock.now();
        let mut state = self.lock();
        if !state.open {
            return Err(ProtocolError::Port("simulated port is closed".into()));
        }
        state.record(now, WireEventKind::DiscardOutput);
        Ok(())
    }

    fn set_signal(&mut self, signal: ControlSignal, level: bool) -> Result<(), ProtocolError> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.record(now, WireEventKind::Signal(signal, level));
        if signal == ControlSignal::Dtr {
            // A high-to-low DTR transition drops SiK into command mode
            if state.dtr_high && !level {
                state.mode = SimMode::Command;
                state.line_buf.clear();
            }
            state.dtr_high = level;
        }
        Ok(())
    }

    fn close(&mut self) {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.open {
            state.open = false;
            state.close_count += 1;
            state.record(now, WireEventKind::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ManualClock;

    fn read_all(modem: &mut SimulatedModem, clock: &ManualClock) -> String {
        let bytes = modem.read_available(clock.now()).unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn test_escape_requires_guard_periods() {
        let clock = ManualClock::new();
        let mut modem = SimulatedModem::new(clock.clone());

        // No leading silence: "+++" is payload
        modem.write(b"+++").unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(modem.mode(), SimMode::Data);
        assert_eq!(read_all(&mut modem, &clock), "");
        assert_eq!(modem.payload(), b"+++".to_vec());

        // Properly guarded escape
        clock.advance(Duration::from_secs(1));
        modem.write(b"+++").unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(read_all(&mut modem, &clock), "OK\r\n");
        assert_eq!(modem.mode(), SimMode::Command);
    }

    #[test]
    fn test_unenforced_guard_accepts_bare_escape() {
        let clock = ManualClock::new();
        let mut modem = SimulatedModem::new(clock.clone());
        modem.set_enforce_guard(false);
        modem.write(b"+++").unwrap();
        assert_eq!(read_all(&mut modem, &clock), "OK\r\n");
        assert_eq!(modem.mode(), SimMode::Command);
    }

    #[test]
    fn test_write_inside_trailing_guard_cancels_escape() {
        let clock = ManualClock::new();
        let mut modem = SimulatedModem::new(clock.clone());
        clock.advance(Duration::from_secs(1));
        modem.write(b"+++").unwrap();
        clock.advance(Duration::from_millis(200));
        modem.write(b"AT\r\n").unwrap();
        assert_eq!(modem.mode(), SimMode::Data);
        assert_eq!(modem.payload(), b"+++AT\r\n".to_vec());
    }

    #[test]
    fn test_command_echo_and_registers() {
        let clock = ManualClock::new();
        let mut modem = SimulatedModem::new(clock.clone());
        modem.force_command_mode();

        modem.write(b"ATS3=7\r\n").unwrap();
        assert_eq!(read_all(&mut modem, &clock), "ATS3=7\r\nOK\r\n");
        modem.write(b"ATS3?\r\n").unwrap();
        assert_eq!(read_all(&mut modem, &clock), "ATS3?\r\n7\r\nOK\r\n");
        assert_eq!(modem.eeprom_register(3), Some(25));

        modem.write(b"AT&W\r\n").unwrap();
        read_all(&mut modem, &clock);
        assert_eq!(modem.eeprom_register(3), Some(7));
        assert_eq!(modem.requests(), vec!["ATS3=7", "ATS3?", "AT&W"]);
    }

    #[test]
    fn test_out_of_range_write_rejected() {
        let clock = ManualClock::new();
        let mut modem = SimulatedModem::new(clock.clone());
        modem.force_command_mode();
        modem.set_echo(false);
        modem.write(b"ATS4=99\r\n").unwrap();
        assert_eq!(read_all(&mut modem, &clock), "ERROR\r\n");
        assert_eq!(modem.register(4), Some(20));
    }

    #[test]
    fn test_reply_delay() {
        let clock = ManualClock::new();
        let mut modem = SimulatedModem::new(clock.clone());
        modem.force_command_mode();
        modem.set_reply_delay(Duration::from_millis(500));
        modem.write(b"AT\r\n").unwrap();
        assert_eq!(read_all(&mut modem, &clock), "");
        clock.advance(Duration::from_millis(500));
        assert_eq!(read_all(&mut modem, &clock), "AT\r\nOK\r\n");
    }

    #[test]
    fn test_dtr_pulse_enters_command_mode() {
        let clock = ManualClock::new();
        let mut modem = SimulatedModem::new(clock.clone());
        modem.set_signal(ControlSignal::Dtr, true).unwrap();
        assert_eq!(modem.mode(), SimMode::Data);
        modem.set_signal(ControlSignal::Dtr, false).unwrap();
        assert_eq!(modem.mode(), SimMode::Command);
    }

    #[test]
    fn test_reboot_restores_eeprom_and_leaves_command_mode() {
        let clock = ManualClock::new();
        let mut modem = SimulatedModem::new(clock.clone());
        modem.force_command_mode();
        modem.write(b"ATS4=10\r\nATZ\r\n").unwrap();
        assert_eq!(modem.register(4), Some(20));
        assert_eq!(modem.mode(), SimMode::Data);
    }

    #[test]
    fn test_closed_port_errors() {
        let clock = ManualClock::new();
        let mut modem = SimulatedModem::new(clock.clone());
        modem.close();
        modem.close();
        assert_eq!(modem.close_count(), 1);
        assert!(modem.write(b"AT\r\n").is_err());
        assert!(modem.read_available(clock.now()).is_err());
    }
}
