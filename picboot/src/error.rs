//! Error types for picboot.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::programmer::Region;
use crate::protocol::result_code_name;

/// Result type for picboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Programming sub-step, used as error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// An erase command.
    Erase,
    /// A write command.
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erase => write!(f, "erase"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Error type for picboot operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The read deadline expired before the expected bytes arrived.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The echoed frame diverged from the sent frame outside the two
    /// unlock-byte positions.
    #[error("echo mismatch at position {0}")]
    EchoMismatch(usize),

    /// The device answered a command with a non-success code.
    #[error("command returned code {code:#04X}: {}", result_code_name(*code))]
    CommandRejected {
        /// The raw result code from the device.
        code: u8,
    },

    /// Response length or content does not match the command's contract.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// An input segment fits none of the profile's memory regions.
    #[error("data segment at {0:#010X} fits no memory region")]
    UnclassifiedSegment(u32),

    /// Read-back verification found a byte that differs from the image.
    #[error("verify mismatch at {address:#010X}: expected {expected:#04X}, read {actual:#04X}")]
    VerifyMismatch {
        /// Address of the differing byte.
        address: u32,
        /// The byte the image holds.
        expected: u8,
        /// The byte the device reported.
        actual: u8,
    },

    /// The device checksum does not match the locally computed one.
    #[error("checksum mismatch at {address:#010X}: local {local:#06X}, device {device:#06X}")]
    ChecksumMismatch {
        /// Start address of the checksummed range.
        address: u32,
        /// The host-side checksum.
        local: u16,
        /// The checksum the device reported.
        device: u16,
    },

    /// A programming sub-step failed; carries the region and row address.
    #[error("failed to {op} {region} at {address:#010X}: {source}")]
    Programming {
        /// Memory region being programmed.
        region: Region,
        /// Whether the erase or the write failed.
        op: Operation,
        /// Row address the failing command targeted.
        address: u32,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Intel HEX input could not be parsed.
    #[error("invalid hex image: {0}")]
    Hex(String),

    /// An operation that needs an open, identified device was called first.
    #[error("not connected")]
    NotConnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_code_carries_device_semantics() {
        let err = Error::CommandRejected { code: 0xFE };
        assert_eq!(err.to_string(), "command returned code 0xFE: address error");

        let err = Error::CommandRejected { code: 0x42 };
        assert!(err.to_string().contains("invalid response code"));
    }

    #[test]
    fn programming_error_names_region_and_address() {
        let err = Error::Programming {
            region: Region::Flash,
            op: Operation::Erase,
            address: 0x800,
            source: Box::new(Error::Timeout("read 0 of 10 bytes".into())),
        };
        let text = err.to_string();
        assert!(text.contains("erase flash"));
        assert!(text.contains("0x00000800"));
    }
}
