//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the modem
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The device could not be opened or configured (missing, busy, permission denied)
    #[error("Serial port error: {0}")]
    Port(String),

    /// Read or write on an open port failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every entry attempt went unanswered
    #[error("Failed to enter command mode after {attempts} attempt(s)")]
    CommandModeEntry {
        /// Entry sequences tried
        attempts: u32,
    },

    /// The modem answered `ERROR`. `diagnostic` holds the lines received before it.
    #[error("Command '{command}' rejected by modem{}", diagnostic_suffix(.diagnostic))]
    CommandRejected {
        /// Request line
        command: String,
        /// Response lines before `ERROR`, joined with `\n`
        diagnostic: String,
    },

    /// An earlier transport fault ended the session
    #[error("Session is unusable after a transport fault")]
    SessionFaulted,

    /// The session is closed or not in command mode
    #[error("Session is not in command mode")]
    NotInCommandMode,

    /// Invalid configuration or a request the session refuses
    #[error("Configuration error: {0}")]
    Config(String),
}

fn diagnostic_suffix(diagnostic: &str) -> String {
    if diagnostic.is_empty() {
        String::new()
    } else {
        format!(": {}", diagnostic)
    }
}

impl ProtocolError {
    /// Whether the session may keep issuing requests after this error.
    ///
    /// Only modem-level rejections are recoverable; transport faults and
    /// entry failures leave no usable session behind.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::CommandRejected { .. })
    }

    /// Whether this error came from the serial transport itself
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, ProtocolError::Port(_) | ProtocolError::Io(_))
    }
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        ProtocolError::Port(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_recoverable() {
        let err = ProtocolError::CommandRejected {
            command: "ATS3=900".to_string(),
            diagnostic: String::new(),
        };
        assert!(err.is_recoverable());
        assert!(!err.is_transport_fault());
        assert_eq!(err.to_string(), "Command 'ATS3=900' rejected by modem");
    }

    #[test]
    fn test_rejection_display_includes_diagnostic() {
        let err = ProtocolError::CommandRejected {
            command: "ATS99?".to_string(),
            diagnostic: "bad register".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command 'ATS99?' rejected by modem: bad register"
        );
    }

    #[test]
    fn test_port_errors_are_fatal() {
        let err = ProtocolError::Port("No such file or directory".to_string());
        assert!(!err.is_recoverable());
        assert!(err.is_transport_fault());

        let io: ProtocolError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(io.is_transport_fault());
        assert!(!ProtocolError::CommandModeEntry { attempts: 3 }.is_recoverable());
    }
}
