//! # SX127x / RFM9x LoRa Register Definitions
//!
//! Register addresses, operating mode values and interrupt bits for the
//! Semtech SX1276/77/78/79 family (HopeRF RFM95/96/97/98) in LoRa mode.
//!
//! ## Register Map (LoRa page)
//!
//! - 0x00: FIFO access
//! - 0x01: operating mode
//! - 0x06-0x08: carrier frequency (24-bit FRF)
//! - 0x09-0x0C: power amplifier, OCP, LNA
//! - 0x0D-0x13: FIFO pointers, IRQ flags, RX byte count
//! - 0x19-0x1A: last packet SNR / RSSI
//! - 0x1D-0x26: modem configuration, preamble, payload length
//! - 0x33/0x3B: IQ inversion
//! - 0x39: sync word
//! - 0x40: DIO mapping
//! - 0x4D: high power PA DAC

use bitflags::bitflags;

// =============================================================================
// Register Addresses
// =============================================================================

/// FIFO read/write access
pub const REG_00_FIFO: u8 = 0x00;
/// Operating mode and LoRa/FSK selection
pub const REG_01_OP_MODE: u8 = 0x01;
/// RF carrier frequency (MSB)
pub const REG_06_FRF_MSB: u8 = 0x06;
/// RF carrier frequency (MID)
pub const REG_07_FRF_MID: u8 = 0x07;
/// RF carrier frequency (LSB)
pub const REG_08_FRF_LSB: u8 = 0x08;
/// PA selection and output power
pub const REG_09_PA_CONFIG: u8 = 0x09;
/// SPI interface address pointer in FIFO data buffer
pub const REG_0D_FIFO_ADDR_PTR: u8 = 0x0D;
/// Write base address in FIFO for TX
pub const REG_0E_FIFO_TX_BASE_ADDR: u8 = 0x0E;
/// Read base address in FIFO for RX
pub const REG_0F_FIFO_RX_BASE_ADDR: u8 = 0x0F;
/// Start address of the last packet received
pub const REG_10_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
/// IRQ flags (write 1 to clear)
pub const REG_12_IRQ_FLAGS: u8 = 0x12;
/// Number of payload bytes of the last packet received
pub const REG_13_RX_NB_BYTES: u8 = 0x13;
/// SNR of the last packet (two's complement, quarter dB)
pub const REG_19_PKT_SNR_VALUE: u8 = 0x19;
/// RSSI of the last packet
pub const REG_1A_PKT_RSSI_VALUE: u8 = 0x1A;
/// Bandwidth, coding rate, implicit header
pub const REG_1D_MODEM_CONFIG1: u8 = 0x1D;
/// Spreading factor, TX continuous, CRC on
pub const REG_1E_MODEM_CONFIG2: u8 = 0x1E;
/// Preamble length (MSB)
pub const REG_20_PREAMBLE_MSB: u8 = 0x20;
/// Preamble length (LSB)
pub const REG_21_PREAMBLE_LSB: u8 = 0x21;
/// Payload length for TX
pub const REG_22_PAYLOAD_LENGTH: u8 = 0x22;
/// Low data rate optimize, AGC auto
pub const REG_26_MODEM_CONFIG3: u8 = 0x26;
/// IQ inversion control
pub const REG_33_INVERT_IQ: u8 = 0x33;
/// LoRa sync word
pub const REG_39_SYNC_WORD: u8 = 0x39;
/// IQ inversion companion register
pub const REG_3B_INVERT_IQ2: u8 = 0x3B;
/// Mapping of pins DIO0 to DIO3
pub const REG_40_DIO_MAPPING1: u8 = 0x40;
/// Chip version (read-only)
pub const REG_42_VERSION: u8 = 0x42;
/// High power PA DAC
pub const REG_4D_PA_DAC: u8 = 0x4D;

// =============================================================================
// Operating Modes
// =============================================================================

/// LoRa (long range) mode bit, only writable in sleep
pub const LONG_RANGE_MODE: u8 = 0x80;
/// Mask of the mode bits in REG_01_OP_MODE
pub const MODE_MASK: u8 = 0x07;

pub const MODE_SLEEP: u8 = 0x00;
pub const MODE_STDBY: u8 = 0x01;
pub const MODE_TX: u8 = 0x03;
pub const MODE_RXCONTINUOUS: u8 = 0x05;
pub const MODE_CAD: u8 = 0x07;

// =============================================================================
// DIO0 Mapping
// =============================================================================

/// DIO0 = RxDone
pub const DIO0_RX_DONE: u8 = 0x00;
/// DIO0 = TxDone
pub const DIO0_TX_DONE: u8 = 0x40;
/// DIO0 = CadDone
pub const DIO0_CAD_DONE: u8 = 0x80;

// =============================================================================
// IQ Inversion (LoRaWAN downlink polarity)
// =============================================================================

pub const INVERT_IQ_TX: u8 = 0x26;
pub const INVERT_IQ2_TX: u8 = 0x19;
pub const INVERT_IQ_RX: u8 = 0x27;
pub const INVERT_IQ2_RX: u8 = 0x1D;

// =============================================================================
// Power Amplifier
// =============================================================================

pub const PA_DAC_ENABLE: u8 = 0x07;
pub const PA_DAC_DISABLE: u8 = 0x04;
pub const PA_SELECT: u8 = 0x80;

// =============================================================================
// Frequency Synthesis
// =============================================================================

/// Crystal oscillator frequency in Hz
pub const FXOSC: f64 = 32_000_000.0;
/// Frequency synthesizer step (FXOSC / 2^19)
pub const FSTEP: f64 = FXOSC / 524_288.0;

/// FIFO size shared between TX and RX
pub const FIFO_SIZE: usize = 256;
/// Largest value the payload length register accepts
pub const MAX_FRAME_LEN: usize = 255;

bitflags! {
    /// Contents of `REG_12_IRQ_FLAGS`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags: u8 {
        const RX_TIMEOUT = 0x80;
        const RX_DONE = 0x40;
        const PAYLOAD_CRC_ERROR = 0x20;
        const VALID_HEADER = 0x10;
        const TX_DONE = 0x08;
        const CAD_DONE = 0x04;
        const FHSS_CHANGE_CHANNEL = 0x02;
        const CAD_DETECTED = 0x01;
    }
}
