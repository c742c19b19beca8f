//! Error taxonomy for the parts of the core that can actually fail.
//!
//! Anti-cheat trips and rule vetoes are not modeled here — they are control
//! flow (see [`crate::veto::Veto`]), not failures. These types only cover
//! things that mean "the bytes on the wire, or the config file, were wrong".

use thiserror::Error;

/// Errors raised while decoding a contained loader from a datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer truncated: needed {needed} more byte(s)")]
    Truncated { needed: usize },

    #[error("unknown loader id {0}")]
    UnknownLoader(u8),

    #[error("string exceeds maximum wire length ({0} bytes)")]
    StringTooLong(usize),
}

pub type WireResult<T> = Result<T, WireError>;

/// Errors raised while loading and validating server configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("could not read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("could not parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("config field `{field}` out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
