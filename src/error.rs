//! Error related data structures.
//!
//! Invariant violations that should never be reachable from external
//! input (a popped device being read, a bank index out of range) go
//! through the `panic_gb!`/`assert_gb!` family in [`crate::diag`]
//! instead, since those indicate a bug in the core rather than bad
//! input.

use std::fmt::{self, Display, Formatter};

/// Top level enum for error handling within the core.
///
/// Most of the time, you will want to use the `CustomError` variant
/// to provide a more detailed error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The ROM image is too short for a header, or its length does
    /// not match the bank count the header implies.
    RomSize,
    /// The header's cartridge type byte (0x147) names a mapper this
    /// core does not implement.
    UnsupportedMapper(u8),
    /// The header's ROM or RAM size byte (0x148 / 0x149) is not one
    /// of the recognized codes.
    InvalidHeader,
    InvalidParameter(String),
    CustomError(String),
}

impl Error {
    pub fn description(&self) -> String {
        match self {
            Error::RomSize => String::from("Invalid ROM size"),
            Error::UnsupportedMapper(id) => format!("Unsupported cartridge mapper: 0x{:02x}", id),
            Error::InvalidHeader => String::from("Malformed cartridge header"),
            Error::InvalidParameter(message) => format!("Invalid parameter: {}", message),
            Error::CustomError(message) => message.clone(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl std::error::Error for Error {}
