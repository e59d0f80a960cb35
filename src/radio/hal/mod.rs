//! # Hardware Abstraction Layer for the Radio Register Bus
//!
//! This module defines the register transport used by the LoRa driver and the
//! signal type the interrupt line posts. Platform implementations frame every
//! exchange with chip-select: one address byte (bit 7 set for write, clear for
//! read) followed by the data bytes.

use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;

/// Write bit OR-ed into the address byte
pub const WRITE_BIT: u8 = 0x80;

/// Errors that can occur during register bus operations
#[derive(Debug, Error)]
pub enum BusError {
    #[error("SPI communication error: {0}")]
    Spi(String),

    #[error("GPIO operation error: {0}")]
    Gpio(String),

    #[error("Feature not enabled: {0}")]
    FeatureNotEnabled(String),
}

/// Chip-select framed register transport
pub trait RegisterBus {
    /// Write `data` starting at `register` (FIFO writes stream into the FIFO)
    fn write(&mut self, register: u8, data: &[u8]) -> Result<(), BusError>;

    /// Read `buf.len()` bytes starting at `register`
    fn read(&mut self, register: u8, buf: &mut [u8]) -> Result<(), BusError>;

    /// Write a single register
    fn write_register(&mut self, register: u8, value: u8) -> Result<(), BusError> {
        self.write(register, &[value])
    }

    /// Read a single register
    fn read_register(&mut self, register: u8) -> Result<u8, BusError> {
        let mut buf = [0u8; 1];
        self.read(register, &mut buf)?;
        Ok(buf[0])
    }
}

/// Rising edge seen on the radio's interrupt line.
///
/// The interrupt context does nothing but post one of these; the driver runs
/// the actual handler when it drains the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqSignal;

/// Create the single-consumer channel between interrupt line and driver
pub fn irq_channel() -> (Sender<IrqSignal>, Receiver<IrqSignal>) {
    mpsc::channel()
}

// Platform implementations
#[cfg(feature = "raspberry-pi")]
pub mod raspberry_pi;

pub mod sim;

#[cfg(feature = "raspberry-pi")]
pub use raspberry_pi::RaspberryPiBus;
pub use sim::SimulatedRadio;
