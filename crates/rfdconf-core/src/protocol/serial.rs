//! Serial port handling
//!
//! Provides the byte-level [`Transport`] used by the session and its
//! implementation on top of a real serial port.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{lines::escape_for_log, ProtocolError, DEFAULT_POLL_INTERVAL_MS};
use crate::config::SessionConfig;

/// Hardware control lines a transport may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Data Terminal Ready
    Dtr,
    /// Request To Send
    Rts,
}

/// Byte-level serial I/O used by the session protocol
pub trait Transport {
    /// Write all bytes and flush them toward the device
    fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError>;

    /// Return whatever bytes arrive by `deadline`.
    ///
    /// Returns as soon as any data is available. An empty result means
    /// nothing arrived before the deadline; that is not an error.
    fn read_available(&mut self, deadline: Instant) -> Result<Vec<u8>, ProtocolError>;

    /// Drop any input received but not yet read
    fn discard_input(&mut self) -> Result<(), ProtocolError>;

    /// Drop any output queued but not yet transmitted. Transports that
    /// write through immediately ignore this.
    fn discard_output(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Drive a control line. Transports without control lines ignore this.
    fn set_signal(&mut self, _signal: ControlSignal, _level: bool) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Release the underlying handle. Closing twice is a no-op.
    fn close(&mut self);

    /// Whether the handle is still open
    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        (**self).write(bytes)
    }

    fn read_available(&mut self, deadline: Instant) -> Result<Vec<u8>, ProtocolError> {
        (**self).read_available(deadline)
    }

    fn discard_input(&mut self) -> Result<(), ProtocolError> {
        (**self).discard_input()
    }

    fn discard_output(&mut self) -> Result<(), ProtocolError> {
        (**self).discard_output()
    }

    fn set_signal(&mut self, signal: ControlSignal, level: bool) -> Result<(), ProtocolError> {
        (**self).set_signal(signal, level)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Information about an available serial port
#[derive(Debug, Clone, serde::Serialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
                usb_info.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

/// Sort key putting FTDI-style ttyUSB* ports first (RFD900 boards use an
/// FTDI bridge), then ttyACM*, then everything else by name.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Some USB adapters never show up through the enumeration API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port with a short read timeout for polling
pub fn open_port(name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, ProtocolError> {
    serialport::new(name, baud_rate)
        .timeout(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
        .open()
        .map_err(|e| ProtocolError::Port(format!("{}: {}", name, e)))
}

/// Configure a serial port for 8N1 without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;
    Ok(())
}

/// [`Transport`] over a real serial device
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    poll_interval: Duration,
}

impl SerialTransport {
    /// Open and configure the device named in `config`
    pub fn open(config: &SessionConfig) -> Result<Self, ProtocolError> {
        let mut port = open_port(&config.port_name, config.baud_rate)?;
        configure_port(port.as_mut())?;
        port.clear(serialport::ClearBuffer::All)?;

        debug!(
            "opened {} at {} baud",
            config.port_name, config.baud_rate
        );

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            poll_interval: config.poll_interval(),
        })
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, ProtocolError> {
        self.port
            .as_mut()
            .ok_or_else(|| ProtocolError::Port(format!("{}: port is closed", self.name)))
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        debug!("tx: {}", escape_for_log(bytes));
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read_available(&mut self, deadline: Instant) -> Result<Vec<u8>, ProtocolError> {
        let poll_interval = self.poll_interval;
        let port = self.port_mut()?;
        let mut buffer = [0u8; 512];

        loop {
            // bytes_to_read() avoids blocking read() calls on Linux
            let available = port.bytes_to_read()? as usize;

            if available > 0 {
                let to_read = available.min(buffer.len());
                match port.read(&mut buffer[..to_read]) {
                    Ok(0) => return Ok(Vec::new()),
                    Ok(n) => {
                        debug!("rx: {}", escape_for_log(&buffer[..n]));
                        return Ok(buffer[..n].to_vec());
                    }
                    Err(ref e)
                        if e.kind() == std::io::ErrorKind::TimedOut
                            || e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e.into()),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            std::thread::sleep(poll_interval.min(deadline - now));
        }
    }

    fn discard_input(&mut self) -> Result<(), ProtocolError> {
        self.port_mut()?.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn discard_output(&mut self) -> Result<(), ProtocolError> {
        self.port_mut()?.clear(serialport::ClearBuffer::Output)?;
        Ok(())
    }

    fn set_signal(&mut self, signal: ControlSignal, level: bool) -> Result<(), ProtocolError> {
        let port = self.port_mut()?;
        let result = match signal {
            ControlSignal::Dtr => port.write_data_terminal_ready(level),
            ControlSignal::Rts => port.write_request_to_send(level),
        };
        if let Err(e) = result {
            // USB bridges without modem-control support report an error here
            warn!("failed to set {:?}={}: {} (continuing)", signal, level, e);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("closed {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "/dev/ttyUSB0",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyUSB10",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo::bare(n.to_string()))
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_open_missing_port_is_port_error() {
        let config = SessionConfig::for_port("/dev/rfdconf-does-not-exist");
        match SerialTransport::open(&config) {
            Err(ProtocolError::Port(msg)) => {
                assert!(msg.contains("/dev/rfdconf-does-not-exist"))
            }
            Err(other) => panic!("expected Port error, got {:?}", other),
            Ok(_) => panic!("opening a missing device should fail"),
        }
    }
}
