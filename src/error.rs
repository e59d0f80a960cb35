//! # Link Error Handling
//!
//! This module defines the LinkError enum, which represents the failures the
//! radio driver, the point-to-point link and the gateway forwarder can report.
//!
//! Delivery failures are not errors: a reliable send that exhausts its retries
//! returns `Ok(false)`. CRC errors on receive are counted and never raised.

use crate::radio::hal::BusError;
use thiserror::Error;

/// Represents the different error types that can occur in the LoRa link crate.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Register transport failure.
    #[error("Register bus error: {0}")]
    Bus(#[from] BusError),

    /// The chip did not enter LoRa sleep mode after reset.
    #[error("Radio init failed: op mode read back 0x{actual:02X}, expected 0x{expected:02X}")]
    InitFailed { expected: u8, actual: u8 },

    /// Header plus payload does not fit the chip FIFO.
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cipher capability rejected its key or input.
    #[error("Cipher error: {0}")]
    Cipher(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
