//! # lora-link - Point-to-Point LoRa Links and a Single-Channel Gateway
//!
//! The lora-link crate drives an SX127x/RFM9x LoRa transceiver over a register
//! bus and builds two roles on top of it: an addressed point-to-point link with
//! acknowledged delivery, and a single-channel gateway that forwards received
//! frames to a network server over the Semtech UDP protocol.
//!
//! ## Features
//!
//! - Register-level radio driver with an explicit operating mode state machine
//! - Interrupt handling through a message-passing boundary (no shared mutable state)
//! - Addressed frames with optional block-cipher payload encryption
//! - Reliable delivery with sequence ids, acknowledgements and jittered retries
//! - Channel activity detection before every transmission
//! - Calibrated RSSI/SNR link quality
//! - Semtech UDP PUSH_DATA uplinks and deadline-scheduled downlinks
//! - Offline LoRaWAN MAC frame inspection
//! - A simulated chip and a manual clock for testing without hardware
//!
//! ## Usage
//!
//! ```rust
//! use lora_link::clock::ManualClock;
//! use lora_link::config::RadioConfig;
//! use lora_link::radio::hal::SimulatedRadio;
//! use lora_link::{send_to_wait, LoRa};
//!
//! let (sim, irq) = SimulatedRadio::new();
//! let mut radio = LoRa::new(sim, irq, ManualClock::new(), &RadioConfig::new(1)).unwrap();
//! // Broadcasts are not acknowledged
//! assert!(send_to_wait(&mut radio, b"hello", 255, 3).unwrap());
//! ```
//!
//! On a Raspberry Pi, enable the `raspberry-pi` feature and open the bus with
//! `radio::hal::RaspberryPiBus::open`. Payload encryption needs the `crypto`
//! feature.

pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod link;
pub mod logging;
pub mod mac;
pub mod radio;

pub use crate::error::LinkError;
pub use crate::logging::{init_logger, init_logger_with_default};

// Radio
pub use radio::{FrequencyConfig, LinkQuality, LoRa, ModemPreset, ModemProfile, RadioMode};

// Point-to-point link
pub use link::{send_to_wait, Header, HeaderFlags, Packet, BROADCAST_ADDRESS, DEFAULT_RETRIES};

// Gateway
pub use gateway::{DownlinkBatch, Gateway, GatewayStatus, UdpTransport, UplinkTransport};

// Diagnostics
pub use mac::{MacError, MacFrame};
