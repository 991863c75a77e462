//! Protocol errors

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A command was issued while the link is down
    #[error("Not connected to spectrophotometer")]
    NotConnected,

    /// `connect` called on a live link
    #[error("Already connected")]
    AlreadyConnected,

    /// The host has not granted access to the port yet
    #[error("Permission to open {0} is pending, retry once it is granted")]
    PermissionPending(String),

    /// The port exists but could not be opened
    #[error("Could not open port: {0}")]
    OpenFailed(String),

    /// No port by that name
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// An I/O operation ran past its bound
    #[error("Timed out waiting on the device")]
    Timeout,

    /// The answer was shorter or longer than the opcode requires
    #[error("Length mismatch: expected {expected} bytes, received {received}")]
    LengthMismatch {
        /// Bytes the opcode answers with
        expected: usize,
        /// Bytes that arrived before the deadline
        received: usize,
    },

    /// Bytes arrived but match no answer for the opcode sent
    #[error("Unrecognized response to opcode {opcode:#04x}: {bytes:02x?}")]
    DecodeFailure {
        /// Opcode the answer belongs to
        opcode: u8,
        /// Raw answer
        bytes: Vec<u8>,
    },

    /// Negative acknowledgement on a two-stage command
    #[error("Device rejected opcode {opcode:#04x} with ack {ack:#04x}")]
    Rejected {
        /// Opcode that was refused
        opcode: u8,
        /// Acknowledgement byte received
        ack: u8,
    },

    /// A verb argument is outside the instrument range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The link failed; fatal
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The dispatcher cannot be started again
    #[error("Command worker was already started or has stopped")]
    WorkerUnavailable,

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the link can no longer be used after this error.
    ///
    /// Fatal errors tear the connection down; everything else only fails the
    /// command that produced it.
    pub fn is_fatal(&self) -> bool {
        match self {
            ProtocolError::Transport(_) => true,
            ProtocolError::IoError(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ProtocolError::Transport("unplugged".into()).is_fatal());
        assert!(ProtocolError::IoError(std::io::ErrorKind::BrokenPipe.into()).is_fatal());
        assert!(!ProtocolError::IoError(std::io::ErrorKind::TimedOut.into()).is_fatal());
        assert!(!ProtocolError::Timeout.is_fatal());
        assert!(!ProtocolError::LengthMismatch { expected: 1, received: 0 }.is_fatal());
    }

    #[test]
    fn test_display_includes_bytes() {
        let err = ProtocolError::DecodeFailure {
            opcode: 0x5A,
            bytes: vec![0x12],
        };
        let text = err.to_string();
        assert!(text.contains("0x5a"));
        assert!(text.contains("12"));
    }
}
