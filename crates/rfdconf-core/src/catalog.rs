//! Parameter catalog
//!
//! Static table of the S-registers exposed by SiK firmware on the RFD900,
//! with the ranges and defaults from the modem datasheet.

use serde::Serialize;
use std::fmt;

/// Number of registers in the catalog
pub const REGISTER_COUNT: usize = 19;

/// One configurable modem register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterDescriptor {
    /// Register number used in `ATS{n}`
    pub index: u8,
    /// Parameter name as printed by `ATI5`
    pub name: &'static str,
    /// Smallest accepted value
    pub min_val: i64,
    /// Largest accepted value
    pub max_val: i64,
    /// Factory default
    pub default_val: i64,
    /// Human-readable description
    pub description: &'static str,
    /// Must be set to the same value on both ends of the link
    pub requires_matching: bool,
}

impl RegisterDescriptor {
    /// Whether `value` lies within the register range
    pub fn contains(&self, value: i64) -> bool {
        (self.min_val..=self.max_val).contains(&value)
    }
}

impl fmt::Display for RegisterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}:{}", self.index, self.name)
    }
}

const fn reg(
    index: u8,
    name: &'static str,
    min_val: i64,
    max_val: i64,
    default_val: i64,
    description: &'static str,
    requires_matching: bool,
) -> RegisterDescriptor {
    RegisterDescriptor {
        index,
        name,
        min_val,
        max_val,
        default_val,
        description,
        requires_matching,
    }
}

/// All registers, ordered by index
pub static REGISTERS: [RegisterDescriptor; REGISTER_COUNT] = [
    reg(0, "FORMAT", 0, 0, 0, "EEPROM version (should not be changed)", false),
    reg(1, "SERIAL_SPEED", 2, 115, 57, "Serial speed (2=2400 ... 115=115200)", false),
    reg(2, "AIR_SPEED", 2, 250, 64, "Air data rate (2-250 kbps)", true),
    reg(3, "NETID", 0, 499, 25, "Network ID", true),
    reg(4, "TXPOWER", 0, 30, 20, "Transmit power in dBm", false),
    reg(5, "ECC", 0, 1, 1, "Error correcting code (0=disabled, 1=enabled)", true),
    reg(6, "MAVLINK", 0, 1, 1, "MAVLink framing (0=disabled, 1=enabled)", false),
    reg(7, "OP_RESEND", 0, 1, 1, "Opportunistic resend (0=disabled, 1=enabled)", false),
    reg(8, "MIN_FREQ", 902000, 927000, 915000, "Min frequency in KHz", true),
    reg(9, "MAX_FREQ", 903000, 928000, 928000, "Max frequency in KHz", true),
    reg(10, "NUM_CHANNELS", 5, 50, 50, "Number of frequency hopping channels", true),
    reg(11, "DUTY_CYCLE", 10, 100, 100, "Transmit duty cycle %", false),
    reg(12, "LBT_RSSI", 0, 1, 0, "Listen before talk threshold (do not change)", true),
    reg(13, "MANCHESTER", 0, 1, 0, "Manchester encoding (do not change)", true),
    reg(14, "RTSCTS", 0, 1, 0, "RTS/CTS flow control (do not change)", false),
    reg(15, "NODEID", 0, 29, 2, "Node ID (0=base node)", false),
    reg(16, "NODEDESTINATION", 0, 65535, 65535, "Remote node ID (65535=broadcast)", false),
    reg(17, "SYNCANY", 0, 1, 0, "Allow sending without base node sync", false),
    reg(18, "NODECOUNT", 2, 30, 3, "Total number of nodes in network", true),
];

/// Look up a register by name, ignoring case
pub fn lookup(name: &str) -> Option<&'static RegisterDescriptor> {
    let name = name.trim();
    REGISTERS.iter().find(|r| r.name.eq_ignore_ascii_case(name))
}

/// Look up a register by index
pub fn by_index(index: u8) -> Option<&'static RegisterDescriptor> {
    REGISTERS.get(index as usize)
}

/// Default value of every register, indexed by register number
pub fn defaults() -> [i64; REGISTER_COUNT] {
    let mut values = [0; REGISTER_COUNT];
    for r in &REGISTERS {
        values[r.index as usize] = r.default_val;
    }
    values
}
