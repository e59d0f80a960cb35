//! # Configuration
//!
//! JSON configuration for the radio, its register bus and the optional
//! gateway role. Every field except `radio.this_address` has a default, so a
//! minimal file is:
//!
//! ```json
//! { "radio": { "this_address": 2 } }
//! ```
//!
//! Timing values are the poll interval and deadlines of the driver's blocking
//! loops; tests shrink them or drive them from a simulated clock.

use crate::error::LinkError;
use crate::radio::modem::ModemProfile;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use zeroize::Zeroizing;

/// Default Semtech UDP forwarder port
pub const DEFAULT_FORWARDER_PORT: u16 = 1700;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub radio: RadioConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

impl AppConfig {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LinkError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, LinkError> {
        let config: AppConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        self.radio.validate()?;
        if let Some(gateway) = &self.gateway {
            gateway.gateway_id_bytes()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RadioConfig {
    /// Node address (0-254; 255 is broadcast)
    pub this_address: u8,
    #[serde(default = "default_frequency_mhz")]
    pub frequency_mhz: f64,
    /// Clamped to 5-23 dBm when applied
    #[serde(default = "default_tx_power_dbm")]
    pub tx_power_dbm: i8,
    #[serde(default)]
    pub modem: ModemProfile,
    /// Accept broadcast frames
    #[serde(default)]
    pub receive_all: bool,
    /// Acknowledge frames addressed to this node
    #[serde(default)]
    pub acks: bool,
    #[serde(default = "default_sync_word")]
    pub sync_word: u8,
    #[serde(default = "default_preamble_len")]
    pub preamble_len: u16,
    #[serde(default)]
    pub invert_iq_on_tx: bool,
    /// Queue every received frame for forwarding, whatever its header
    #[serde(default)]
    pub forward_raw: bool,
    /// AES-128 key as 32 hex characters
    #[serde(default)]
    pub cipher_key: Option<String>,
    #[serde(default)]
    pub timing: LinkTiming,
}

fn default_frequency_mhz() -> f64 {
    868.0
}

fn default_tx_power_dbm() -> i8 {
    14
}

fn default_sync_word() -> u8 {
    0x34
}

fn default_preamble_len() -> u16 {
    8
}

impl RadioConfig {
    /// Configuration with every default applied
    pub fn new(this_address: u8) -> Self {
        Self {
            this_address,
            frequency_mhz: default_frequency_mhz(),
            tx_power_dbm: default_tx_power_dbm(),
            modem: ModemProfile::default(),
            receive_all: false,
            acks: false,
            sync_word: default_sync_word(),
            preamble_len: default_preamble_len(),
            invert_iq_on_tx: false,
            forward_raw: false,
            cipher_key: None,
            timing: LinkTiming::default(),
        }
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if self.this_address == crate::link::frame::BROADCAST_ADDRESS {
            return Err(LinkError::Config(
                "this_address 255 is reserved for broadcast".to_string(),
            ));
        }
        if !(137.0..=1020.0).contains(&self.frequency_mhz) {
            return Err(LinkError::Config(format!(
                "Frequency {} MHz outside the SX127x range",
                self.frequency_mhz
            )));
        }
        self.cipher_key_bytes()?;
        Ok(())
    }

    /// Parsed cipher key, held in zeroizing storage
    pub fn cipher_key_bytes(&self) -> Result<Option<Zeroizing<[u8; 16]>>, LinkError> {
        let Some(hex_key) = &self.cipher_key else {
            return Ok(None);
        };
        let decoded = Zeroizing::new(
            hex::decode(hex_key.trim())
                .map_err(|e| LinkError::Config(format!("Invalid cipher_key: {}", e)))?,
        );
        if decoded.len() != 16 {
            return Err(LinkError::Config(format!(
                "cipher_key must be 16 bytes, got {}",
                decoded.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; 16]);
        key.copy_from_slice(&decoded);
        Ok(Some(key))
    }
}

/// Poll interval and deadlines of the driver's blocking loops
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkTiming {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Base ack window; each attempt waits between one and two times this
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,
    #[serde(default = "default_wait_packet_sent_timeout_ms")]
    pub wait_packet_sent_timeout_ms: u64,
    /// CAD before every transmit when set
    #[serde(default)]
    pub cad_timeout_ms: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_retry_timeout_ms() -> u64 {
    200
}

fn default_wait_packet_sent_timeout_ms() -> u64 {
    200
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retry_timeout_ms: default_retry_timeout_ms(),
            wait_packet_sent_timeout_ms: default_wait_packet_sent_timeout_ms(),
            cad_timeout_ms: None,
        }
    }
}

impl LinkTiming {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    pub fn wait_packet_sent_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_packet_sent_timeout_ms)
    }

    pub fn cad_timeout(&self) -> Option<Duration> {
        self.cad_timeout_ms.map(Duration::from_millis)
    }
}

/// SPI bus and GPIO pin selection (BCM numbering)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default)]
    pub spi_bus: u8,
    #[serde(default = "default_spi_speed_hz")]
    pub spi_speed_hz: u32,
    /// Manually driven chip-select, in addition to the hardware CE0
    #[serde(default)]
    pub cs_pin: Option<u8>,
    #[serde(default)]
    pub reset_pin: Option<u8>,
    #[serde(default = "default_interrupt_pin")]
    pub interrupt_pin: u8,
}

fn default_spi_speed_hz() -> u32 {
    5_000_000
}

fn default_interrupt_pin() -> u8 {
    24
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            spi_bus: 0,
            spi_speed_hz: default_spi_speed_hz(),
            cs_pin: None,
            reset_pin: None,
            interrupt_pin: default_interrupt_pin(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Network server `host[:port]`
    pub server: String,
    /// 8-byte gateway EUI as 16 hex characters
    pub gateway_id: String,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Subtracted from each downlink delay to cover retune and FIFO load
    #[serde(default = "default_downlink_overhead_ms")]
    pub downlink_overhead_ms: u64,
    /// UDP address accepting downlink JSON batches
    #[serde(default)]
    pub downlink_listen: Option<String>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub altitude: i32,
}

fn default_ack_timeout_ms() -> u64 {
    1000
}

fn default_downlink_overhead_ms() -> u64 {
    20
}

impl GatewayConfig {
    /// Server address with the default forwarder port applied
    pub fn server_addr(&self) -> String {
        if self.server.contains(':') {
            self.server.clone()
        } else {
            format!("{}:{}", self.server, DEFAULT_FORWARDER_PORT)
        }
    }

    pub fn gateway_id_bytes(&self) -> Result<[u8; 8], LinkError> {
        let decoded = hex::decode(self.gateway_id.trim())
            .map_err(|e| LinkError::Config(format!("Invalid gateway_id: {}", e)))?;
        decoded.try_into().map_err(|v: Vec<u8>| {
            LinkError::Config(format!("gateway_id must be 8 bytes, got {}", v.len()))
        })
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn downlink_overhead(&self) -> Duration {
        Duration::from_millis(self.downlink_overhead_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::modem::ModemPreset;
    use std::io::Write;

    #[test]
    fn test_minimal_config_defaults() {
        let config = AppConfig::from_json(r#"{ "radio": { "this_address": 2 } }"#).unwrap();
        assert_eq!(config.radio.frequency_mhz, 868.0);
        assert_eq!(config.radio.tx_power_dbm, 14);
        assert_eq!(config.radio.sync_word, 0x34);
        assert_eq!(config.radio.preamble_len, 8);
        assert_eq!(config.radio.modem, ModemProfile::default());
        assert_eq!(config.radio.timing.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.radio.timing.cad_timeout(), None);
        assert_eq!(config.bus.spi_speed_hz, 5_000_000);
        assert!(config.gateway.is_none());
    }

    #[test]
    fn test_load_gateway_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "radio": {{ "this_address": 1, "frequency_mhz": 902.3, "modem": "Lorawan",
                            "invert_iq_on_tx": true, "forward_raw": true }},
                "bus": {{ "reset_pin": 25, "interrupt_pin": 22 }},
                "gateway": {{ "server": "10.0.0.5", "gateway_id": "b827ebfffe123456",
                              "latitude": 46.24 }}
            }}"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.radio.modem, ModemPreset::Lorawan.into());
        assert_eq!(config.bus.reset_pin, Some(25));
        let gateway = config.gateway.unwrap();
        assert_eq!(gateway.server_addr(), "10.0.0.5:1700");
        assert_eq!(
            gateway.gateway_id_bytes().unwrap(),
            [0xb8, 0x27, 0xeb, 0xff, 0xfe, 0x12, 0x34, 0x56]
        );
        assert_eq!(gateway.downlink_overhead(), Duration::from_millis(20));
    }

    #[test]
    fn test_rejects_broadcast_address_and_bad_keys() {
        assert!(AppConfig::from_json(r#"{ "radio": { "this_address": 255 } }"#).is_err());

        let mut radio = RadioConfig::new(3);
        radio.cipher_key = Some("0011".to_string());
        assert!(radio.validate().is_err());

        radio.cipher_key = Some("000102030405060708090a0b0c0d0e0f".to_string());
        let key = radio.cipher_key_bytes().unwrap().unwrap();
        assert_eq!(key[15], 0x0f);
    }

    #[test]
    fn test_rejects_short_gateway_id() {
        let text = r#"{ "radio": { "this_address": 1 },
                        "gateway": { "server": "h:1", "gateway_id": "0102" } }"#;
        assert!(matches!(AppConfig::from_json(text), Err(LinkError::Config(_))));
    }
}
