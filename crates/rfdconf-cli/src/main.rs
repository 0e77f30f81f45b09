//! Binary entrypoint for the rfdconf CLI.
//!
//! Commands:
//! - `ports` - list serial ports, likely RFD900 adapters first
//! - `scan` - try to enter command mode on every port
//! - `params` - print the register catalog with ranges and defaults
//! - `info` - query every `ATI` page
//! - `show` - print all register values (`ATI5`)
//! - `get <PARAM>` / `set <PARAM> <VALUE>` - read or write-then-verify one register
//! - `persist`, `factory-reset`, `reboot` - EEPROM and restart operations
//! - `raw <LINE>` - send an arbitrary AT command
//!
//! `--demo` runs any of these against a simulated modem instead of a serial port.
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use rfdconf_core::catalog::REGISTERS;
use rfdconf_core::config::{EntryStrategy, SessionConfig};
use rfdconf_core::modem::{Modem, SetReport, SetWarning};
use rfdconf_core::protocol::{
    list_ports, Clock, ResponseStatus, Session, SimulatedModem, SystemClock, Transport,
};

#[derive(Parser)]
#[command(name = "rfdconf")]
#[command(about = "Configure RFD900 radio modems over a serial link")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Session configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port (e.g., /dev/ttyUSB0 or COM3)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Per-command response timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Command-mode entry strategy: escape, control-line, control-line-then-escape
    #[arg(long, global = true)]
    strategy: Option<EntryStrategy>,

    /// Entry attempts before giving up
    #[arg(long, global = true)]
    attempts: Option<u32>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Talk to a simulated modem instead of a serial port
    #[arg(long, global = true)]
    demo: bool,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,
    /// Probe every serial port for a modem in command mode
    Scan,
    /// Print the register catalog
    Params,
    /// Show modem identification and status pages
    Info,
    /// Show all register values
    Show,
    /// Read one register
    Get {
        /// Register name (e.g., NETID)
        param: String,
    },
    /// Write, persist and read back one register
    Set {
        /// Register name (e.g., NETID)
        param: String,
        /// New value
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    /// Save the current registers to EEPROM
    Persist,
    /// Restore and save factory defaults
    FactoryReset,
    /// Reboot the modem
    Reboot,
    /// Send a raw AT command
    Raw {
        /// Command line, e.g. ATI or ATS3?
        line: String,
    },
}

impl Cli {
    /// Defaults, then `--config`, then individual flags
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => SessionConfig::default(),
        };

        if let Some(port) = &self.port {
            config.port_name = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.command_timeout_ms = timeout_ms;
        }
        if let Some(strategy) = self.strategy {
            config.entry_strategy = strategy;
        }
        if let Some(attempts) = self.attempts {
            config.entry_attempts = attempts;
        }
        if self.demo && config.port_name.is_empty() {
            config.port_name = "demo".to_string();
        }

        config.validate().context("invalid session configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.session_config()?;
    debug!("session config: {:?}", config);

    match &cli.command {
        Commands::Ports => cmd_ports(cli.json),
        Commands::Params => cmd_params(cli.json),
        Commands::Scan => cmd_scan(&config, cli.demo, cli.json),
        command if cli.demo => {
            info!("using simulated modem");
            run_modem(open_demo(config)?, command, cli.json)
        }
        command => {
            if config.port_name.is_empty() {
                bail!("no serial port given; pass --port or set port_name in --config");
            }
            let port = config.port_name.clone();
            let modem = Modem::connect(config)
                .with_context(|| format!("failed to open modem on {}", port))?;
            run_modem(modem, command, cli.json)
        }
    }
}

fn init_logging(verbosity: u8) {
    // -v flags override RUST_LOG; without them RUST_LOG wins over the default
    let filter = match verbosity {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_demo(config: SessionConfig) -> Result<Modem<SimulatedModem, SystemClock>> {
    let sim = SimulatedModem::new(SystemClock);
    let session = Session::establish(sim, SystemClock, config)
        .context("simulated modem did not enter command mode")?;
    Ok(Modem::new(session))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_ports(json: bool) -> Result<()> {
    let ports = list_ports();
    if json {
        return print_json(&ports);
    }
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in &ports {
        let product = port.product.as_deref().unwrap_or("");
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => {
                println!("{:<20} {:04x}:{:04x} {}", port.name, vid, pid, product)
            }
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}

fn cmd_params(json: bool) -> Result<()> {
    if json {
        return print_json(&REGISTERS[..]);
    }
    println!(
        "{:<4} {:<16} {:>8} {:>8} {:>8}  {}",
        "REG", "NAME", "MIN", "MAX", "DEFAULT", "DESCRIPTION"
    );
    for r in &REGISTERS {
        println!(
            "S{:<3} {:<16} {:>8} {:>8} {:>8}  {}{}",
            r.index,
            r.name,
            r.min_val,
            r.max_val,
            r.default_val,
            r.description,
            if r.requires_matching { " (must match)" } else { "" }
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct ScanResult {
    port: String,
    found: bool,
    banner: Option<String>,
    error: Option<String>,
}

fn probe_port<T: Transport, C: Clock>(
    port: String,
    session: Result<Session<T, C>, rfdconf_core::protocol::ProtocolError>,
) -> ScanResult {
    match session {
        Ok(mut session) => {
            let banner = session
                .exchange("ATI")
                .ok()
                .and_then(|r| r.non_blank_lines().next().map(str::to_string));
            session.close();
            ScanResult {
                port,
                found: true,
                banner,
                error: None,
            }
        }
        Err(e) => ScanResult {
            port,
            found: false,
            banner: None,
            error: Some(e.to_string()),
        },
    }
}

fn cmd_scan(config: &SessionConfig, demo: bool, json: bool) -> Result<()> {
    let results: Vec<ScanResult> = if demo {
        let session = Session::establish(SimulatedModem::new(SystemClock), SystemClock, config.clone());
        vec![probe_port(config.port_name.clone(), session)]
    } else {
        list_ports()
            .into_iter()
            .map(|port| {
                info!("probing {}", port.name);
                let mut port_config = config.clone();
                port_config.port_name = port.name.clone();
                probe_port(port.name, Session::connect(port_config))
            })
            .collect()
    };

    if json {
        return print_json(&results);
    }
    if results.is_empty() {
        println!("No serial ports found");
    }
    for r in &results {
        match (&r.banner, &r.error) {
            (Some(banner), _) => println!("{:<20} {}", r.port, banner),
            (None, None) => println!("{:<20} modem (no banner)", r.port),
            (None, Some(error)) => println!("{:<20} - {}", r.port, error),
        }
    }
    Ok(())
}

fn print_set_report(report: &SetReport) {
    let status = if report.is_verified() {
        "verified"
    } else if report.persisted {
        "persisted, not verified"
    } else {
        "not persisted"
    };
    println!(
        "{} (S{}) = {} [{}]",
        report.parameter, report.index, report.requested, status
    );
    for warning in &report.warnings {
        let text = match warning {
            SetWarning::WriteUnconfirmed => "write was not acknowledged".to_string(),
            SetWarning::PersistRejected { diagnostic } if diagnostic.is_empty() => {
                "AT&W rejected; value is active until the next reboot".to_string()
            }
            SetWarning::PersistRejected { diagnostic } => format!(
                "AT&W rejected ({}); value is active until the next reboot",
                diagnostic
            ),
            SetWarning::PersistUnconfirmed => "AT&W was not acknowledged".to_string(),
            SetWarning::VerificationMismatch { expected, actual } => {
                format!("modem reports {} instead of {}", actual, expected)
            }
            SetWarning::VerificationUnavailable { reason } => {
                format!("could not read the value back: {}", reason)
            }
        };
        println!("warning: {}", text);
    }
    if report.requires_matching {
        println!(
            "note: {} must be set to the same value on both radios",
            report.parameter
        );
    }
}

fn run_modem<T: Transport, C: Clock>(
    mut modem: Modem<T, C>,
    command: &Commands,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Info => {
            let info = modem.info().context("info query failed")?;
            if json {
                print_json(&info)?;
            } else {
                for page in &info.pages {
                    println!("{}:", page.label);
                    if page.lines.is_empty() {
                        println!("  (unavailable)");
                    }
                    for line in &page.lines {
                        println!("  {}", line);
                    }
                }
            }
        }
        Commands::Show => {
            let params = modem.show_parameters().context("ATI5 failed")?;
            if json {
                print_json(&params)?;
            } else {
                for p in &params {
                    println!("S{:<3} {:<16} {}", p.index, p.name, p.value);
                }
            }
        }
        Commands::Get { param } => {
            let reading = modem
                .get_parameter(param)
                .with_context(|| format!("failed to read {}", param))?;
            if json {
                print_json(&json!({
                    "parameter": reading.descriptor.name,
                    "index": reading.descriptor.index,
                    "value": reading.value,
                }))?;
            } else {
                println!("{} = {}", reading.descriptor.name, reading.value);
            }
        }
        Commands::Set { param, value } => {
            let report = modem
                .set_parameter(param, *value)
                .with_context(|| format!("failed to set {}", param))?;
            if !report.warnings.is_empty() {
                warn!("{} set with {} warning(s)", report.parameter, report.warnings.len());
            }
            if json {
                print_json(&report)?;
            } else {
                print_set_report(&report);
            }
        }
        Commands::Persist => {
            modem.persist().context("AT&W failed")?;
            if json {
                print_json(&json!({ "persisted": true }))?;
            } else {
                println!("Parameters saved to EEPROM");
            }
        }
        Commands::FactoryReset => {
            modem.factory_reset().context("factory reset failed")?;
            if json {
                print_json(&json!({ "factory_reset": true }))?;
            } else {
                println!("Factory defaults restored and saved");
            }
        }
        Commands::Reboot => {
            modem.reboot().context("reboot failed")?;
            if json {
                print_json(&json!({ "rebooting": true }))?;
            } else {
                println!("Modem rebooting");
            }
            return Ok(());
        }
        Commands::Raw { line } => {
            let response = modem
                .raw(line)
                .with_context(|| format!("'{}' failed", line))?;
            if json {
                print_json(&response)?;
            } else {
                for l in response.non_blank_lines() {
                    println!("{}", l);
                }
                match response.status {
                    ResponseStatus::Ok => {}
                    ResponseStatus::Error => println!("ERROR"),
                    ResponseStatus::Unterminated => println!("(no terminator)"),
                }
            }
        }
        Commands::Ports | Commands::Params | Commands::Scan => {
            bail!("command does not use a modem session")
        }
    }

    modem.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut file_config = SessionConfig::for_port("/dev/ttyUSB1");
        file_config.baud_rate = 115200;
        file_config.entry_attempts = 5;
        file_config.save(&path).unwrap();

        let cli = Cli::parse_from([
            "rfdconf",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "/dev/ttyUSB0",
            "--strategy",
            "control-line",
            "show",
        ]);
        let config = cli.session_config().unwrap();

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.entry_attempts, 5);
        assert_eq!(config.entry_strategy, EntryStrategy::ControlLine);
    }

    #[test]
    fn test_set_accepts_arguments_after_subcommand() {
        let cli = Cli::parse_from(["rfdconf", "set", "NETID", "5", "--demo", "--json"]);
        assert!(cli.demo);
        assert!(cli.json);
        match &cli.command {
            Commands::Set { param, value } => {
                assert_eq!(param, "NETID");
                assert_eq!(*value, 5);
            }
            _ => panic!("expected set"),
        }
        assert_eq!(cli.session_config().unwrap().port_name, "demo");
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let cli = Cli::parse_from(["rfdconf", "--attempts", "0", "show"]);
        assert!(cli.session_config().is_err());
    }

    #[test]
    fn test_demo_set_round_trip() {
        let mut config = SessionConfig::for_port("demo");
        config.guard_ms = 0;
        let clock = rfdconf_core::protocol::ManualClock::new();
        let sim = SimulatedModem::new(clock.clone());
        let session = match Session::establish(sim.clone(), clock, config) {
            Ok(s) => s,
            Err(e) => panic!("entry failed: {}", e),
        };
        run_modem(
            Modem::new(session),
            &Commands::Set {
                param: "NETID".to_string(),
                value: 7,
            },
            true,
        )
        .unwrap();
        assert_eq!(sim.eeprom_register(3), Some(7));
        assert!(!sim.is_open());
    }
}
