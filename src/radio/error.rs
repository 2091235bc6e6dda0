//! Radio protocol error taxonomy.
//!
//! The module reports command failures as `+ERR=<code>` lines; each known
//! code maps to its own variant so callers can match on the failure class.

use thiserror::Error;

/// Errors surfaced by the radio driver.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RadioError {
    /// +ERR=1: command line missing its CR-LF terminator.
    #[error("no terminator at end of command")]
    NoTerminator,
    /// +ERR=2: command head is not `AT`.
    #[error("command head is not AT")]
    BadHead,
    /// +ERR=3: no `=` symbol in the command.
    #[error("missing '=' symbol in command")]
    MissingSeparator,
    /// +ERR=4: command unknown to the module.
    #[error("unknown command")]
    UnknownCommand,
    /// +ERR=10: transmission timed out.
    #[error("TX timeout")]
    TxTimeout,
    /// +ERR=11: reception timed out.
    #[error("RX timeout")]
    RxTimeout,
    /// +ERR=12: CRC mismatch on a received frame.
    #[error("CRC error")]
    Crc,
    /// +ERR=13: payload exceeds the 240-byte cap. Also raised locally before
    /// an oversize payload ever reaches the wire.
    #[error("TX data exceeds 240 bytes")]
    TxOverflow,
    /// +ERR=15 or any unmapped code.
    #[error("unknown radio error (code {0})")]
    Unknown(u8),

    /// The module has not reported `+READY` yet.
    #[error("radio not ready")]
    NotReady,
    /// The receive loop task is not running; commands cannot complete.
    #[error("receive loop not running")]
    ReceiveLoopNotRunning,
    /// No reply line arrived within the command timeout.
    #[error("timed out waiting for command reply")]
    CommandTimeout,
    /// A parameter failed validation locally; the wire was not touched.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A reply line did not have the expected shape.
    #[error("malformed reply: {0}")]
    MalformedReply(String),
}

impl RadioError {
    /// Map a `+ERR=<code>` value to its variant.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => RadioError::NoTerminator,
            2 => RadioError::BadHead,
            3 => RadioError::MissingSeparator,
            4 => RadioError::UnknownCommand,
            10 => RadioError::TxTimeout,
            11 => RadioError::RxTimeout,
            12 => RadioError::Crc,
            13 => RadioError::TxOverflow,
            code => RadioError::Unknown(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_variants() {
        assert_eq!(RadioError::from_code(1), RadioError::NoTerminator);
        assert_eq!(RadioError::from_code(4), RadioError::UnknownCommand);
        assert_eq!(RadioError::from_code(10), RadioError::TxTimeout);
        assert_eq!(RadioError::from_code(13), RadioError::TxOverflow);
    }

    #[test]
    fn unmapped_codes_are_unknown() {
        assert_eq!(RadioError::from_code(15), RadioError::Unknown(15));
        assert_eq!(RadioError::from_code(99), RadioError::Unknown(99));
    }
}
