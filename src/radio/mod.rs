//! # Radio
//!
//! SX127x/RFM9x LoRa transceiver support, bottom-up:
//!
//! - `hal`: register bus and interrupt signal (Raspberry Pi, simulated chip)
//! - `registers`: register map and IRQ flags
//! - `state`: operating mode state machine
//! - `modem`: modem profiles, carrier frequency, TX power, time on air
//! - `link_quality`: calibrated RSSI/SNR
//! - `cad`: channel activity gate
//! - `interrupt`: DIO0 handler
//! - `driver`: the [`LoRa`] driver object

pub mod cad;
pub mod driver;
pub mod hal;
pub mod interrupt;
pub mod link_quality;
pub mod modem;
pub mod registers;
pub mod state;

pub use driver::{LoRa, RawFrame, ReceiveCallback, RxCounters};
pub use link_quality::LinkQuality;
pub use modem::{FrequencyConfig, ModemPreset, ModemProfile, TxPower};
pub use state::{RadioMode, RadioStateMachine};
