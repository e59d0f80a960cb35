//! # Modem Configuration
//!
//! Physical-layer settings for the SX127x LoRa modem:
//!
//! - [`ModemProfile`]: the `REG_1D`/`REG_1E`/`REG_26` register triplet, with
//!   named presets and decoded bandwidth, coding rate, spreading factor, CRC
//!   and low-data-rate flags
//! - [`FrequencyConfig`]: carrier frequency as a 24-bit FRF value
//! - [`TxPower`]: output power mapped onto `REG_4D_PA_DAC` / `REG_09_PA_CONFIG`
//!
//! Time-on-air follows the Semtech formula (SX1276 datasheet §4.1.1.7) for an
//! explicit header.

use crate::error::LinkError;
use crate::radio::registers::{FSTEP, PA_DAC_DISABLE, PA_DAC_ENABLE, PA_SELECT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Bandwidth in Hz indexed by the `REG_1D` bandwidth code (bits 7-4)
const BANDWIDTH_HZ: [u32; 10] = [
    7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
];

const CONFIG1_IMPLICIT_HEADER: u8 = 0x01;
const CONFIG2_CRC_ON: u8 = 0x04;
const CONFIG3_LOW_DATA_RATE_OPTIMIZE: u8 = 0x08;
const CONFIG3_AGC_AUTO_ON: u8 = 0x04;

/// Symbol time above which low data rate optimization is mandatory
const LDRO_SYMBOL_TIME: Duration = Duration::from_millis(16);

/// Named register presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModemPreset {
    /// 125 kHz, 4/5, SF7, CRC on. Medium range, RadioHead default
    Bw125Cr45Sf128,
    /// 500 kHz, 4/5, SF7, CRC on. Fast, short range
    Bw500Cr45Sf128,
    /// 31.25 kHz, 4/8, SF9, CRC on. Slow, long range
    Bw31_25Cr48Sf512,
    /// 125 kHz, 4/8, SF12, CRC on, LDRO. Slow, long range
    Bw125Cr48Sf4096,
    /// 125 kHz, 4/5, SF11, CRC on
    Bw125Cr45Sf2048,
    /// 125 kHz, 4/5, SF10, CRC on. LoRaWAN uplink data rate
    Lorawan,
    /// 500 kHz, 4/5, SF12, CRC off. LoRaWAN downlink data rate
    Gateway,
}

/// Modem register triplet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ModemSetting")]
pub struct ModemProfile {
    pub config1: u8,
    pub config2: u8,
    pub config3: u8,
}

/// Configuration form of a profile: a preset name or raw registers
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum ModemSetting {
    Preset(ModemPreset),
    Registers { config1: u8, config2: u8, config3: u8 },
}

impl From<ModemSetting> for ModemProfile {
    fn from(setting: ModemSetting) -> Self {
        match setting {
            ModemSetting::Preset(preset) => preset.into(),
            ModemSetting::Registers {
                config1,
                config2,
                config3,
            } => ModemProfile::new(config1, config2, config3),
        }
    }
}

impl From<ModemPreset> for ModemProfile {
    fn from(preset: ModemPreset) -> Self {
        let (c1, c2, c3) = match preset {
            ModemPreset::Bw125Cr45Sf128 => (0x72, 0x74, 0x04),
            ModemPreset::Bw500Cr45Sf128 => (0x92, 0x74, 0x04),
            ModemPreset::Bw31_25Cr48Sf512 => (0x48, 0x94, 0x04),
            ModemPreset::Bw125Cr48Sf4096 => (0x78, 0xc4, 0x0c),
            ModemPreset::Bw125Cr45Sf2048 => (0x72, 0xb4, 0x04),
            ModemPreset::Lorawan => (0x72, 0xa4, 0x04),
            ModemPreset::Gateway => (0x92, 0xc0, 0x04),
        };
        ModemProfile::new(c1, c2, c3)
    }
}

impl Default for ModemProfile {
    fn default() -> Self {
        ModemPreset::Bw125Cr45Sf128.into()
    }
}

impl ModemProfile {
    pub const fn new(config1: u8, config2: u8, config3: u8) -> Self {
        Self {
            config1,
            config2,
            config3,
        }
    }

    /// Profile for a retuned single-shot send (downlink): 4/5 coding rate,
    /// explicit header, CRC on, LDRO when the symbol time requires it.
    pub fn for_transmit(bandwidth_hz: u32, spreading_factor: u8) -> Result<Self, LinkError> {
        let bw_code = BANDWIDTH_HZ
            .iter()
            .position(|&bw| bw == bandwidth_hz)
            .ok_or_else(|| LinkError::Config(format!("Unsupported bandwidth {} Hz", bandwidth_hz)))?
            as u8;
        if !(6..=12).contains(&spreading_factor) {
            return Err(LinkError::Config(format!(
                "Unsupported spreading factor {}",
                spreading_factor
            )));
        }

        let config1 = (bw_code << 4) | (1 << 1);
        let config2 = (spreading_factor << 4) | CONFIG2_CRC_ON;
        let mut config3 = CONFIG3_AGC_AUTO_ON;
        if symbol_time(bandwidth_hz, spreading_factor) > LDRO_SYMBOL_TIME {
            config3 |= CONFIG3_LOW_DATA_RATE_OPTIMIZE;
        }

        Ok(Self::new(config1, config2, config3))
    }

    /// Bandwidth in Hz; `None` for reserved codes
    pub fn bandwidth_hz(&self) -> Option<u32> {
        BANDWIDTH_HZ.get((self.config1 >> 4) as usize).copied()
    }

    /// Coding rate denominator (5..=8 for 4/5..4/8)
    pub fn coding_rate(&self) -> u8 {
        ((self.config1 >> 1) & 0x07) + 4
    }

    pub fn implicit_header(&self) -> bool {
        self.config1 & CONFIG1_IMPLICIT_HEADER != 0
    }

    pub fn spreading_factor(&self) -> u8 {
        self.config2 >> 4
    }

    pub fn crc_on(&self) -> bool {
        self.config2 & CONFIG2_CRC_ON != 0
    }

    pub fn low_data_rate_optimize(&self) -> bool {
        self.config3 & CONFIG3_LOW_DATA_RATE_OPTIMIZE != 0
    }

    /// Semtech data-rate string, e.g. `SF10BW125`
    pub fn datr(&self) -> String {
        let bw = match self.bandwidth_hz() {
            Some(hz) if hz % 1000 == 0 => format!("{}", hz / 1000),
            Some(hz) => format!("{}", hz as f64 / 1000.0),
            None => "?".to_string(),
        };
        format!("SF{}BW{}", self.spreading_factor(), bw)
    }

    /// Coding rate string, e.g. `4/5`
    pub fn codr(&self) -> String {
        format!("4/{}", self.coding_rate())
    }

    /// Time on air for `payload_len` bytes with `preamble_len` preamble symbols
    pub fn time_on_air(&self, payload_len: usize, preamble_len: u16) -> Duration {
        let Some(bw) = self.bandwidth_hz() else {
            return Duration::ZERO;
        };
        let sf = self.spreading_factor() as f64;
        let t_sym = (1u64 << self.spreading_factor().min(12)) as f64 / bw as f64;
        let t_preamble = (preamble_len as f64 + 4.25) * t_sym;

        let de = if self.low_data_rate_optimize() { 1.0 } else { 0.0 };
        let ih = if self.implicit_header() { 1.0 } else { 0.0 };
        let crc = if self.crc_on() { 1.0 } else { 0.0 };

        let numerator = 8.0 * payload_len as f64 - 4.0 * sf + 28.0 + 16.0 * crc - 20.0 * ih;
        let denominator = 4.0 * (sf - 2.0 * de);
        let payload_symbols = if denominator > 0.0 {
            8.0 + ((numerator / denominator).ceil() * self.coding_rate() as f64).max(0.0)
        } else {
            8.0
        };

        Duration::from_secs_f64(t_preamble + payload_symbols * t_sym)
    }
}

impl fmt::Display for ModemProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} CR {} CRC {} (0x{:02x} 0x{:02x} 0x{:02x})",
            self.datr(),
            self.codr(),
            if self.crc_on() { "on" } else { "off" },
            self.config1,
            self.config2,
            self.config3
        )
    }
}

fn symbol_time(bandwidth_hz: u32, spreading_factor: u8) -> Duration {
    Duration::from_secs_f64((1u64 << spreading_factor) as f64 / bandwidth_hz as f64)
}

/// Carrier frequency
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyConfig {
    frequency_hz: f64,
}

impl FrequencyConfig {
    pub fn from_mhz(mhz: f64) -> Self {
        Self {
            frequency_hz: mhz * 1_000_000.0,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        Self {
            frequency_hz: hz as f64,
        }
    }

    pub fn mhz(&self) -> f64 {
        self.frequency_hz / 1_000_000.0
    }

    /// 24-bit FRF register value
    pub fn frf(&self) -> u32 {
        ((self.frequency_hz / FSTEP) as u32) & 0x00FF_FFFF
    }

    /// `REG_06`..`REG_08` contents, MSB first
    pub fn registers(&self) -> [u8; 3] {
        let frf = self.frf();
        [(frf >> 16) as u8, (frf >> 8) as u8, frf as u8]
    }
}

/// Transmit power clamped to the PA_BOOST range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxPower {
    dbm: i8,
}

impl TxPower {
    pub const MIN_DBM: i8 = 5;
    pub const MAX_DBM: i8 = 23;

    pub fn new(dbm: i8) -> Self {
        Self {
            dbm: dbm.clamp(Self::MIN_DBM, Self::MAX_DBM),
        }
    }

    pub fn dbm(&self) -> i8 {
        self.dbm
    }

    /// `(REG_4D_PA_DAC, REG_09_PA_CONFIG)` values
    pub fn registers(&self) -> (u8, u8) {
        let (pa_dac, power) = if self.dbm < 20 {
            (PA_DAC_ENABLE, self.dbm - 3)
        } else {
            (PA_DAC_DISABLE, self.dbm)
        };
        // Below 8 dBm the DAC offset pushes the level under zero
        let level = (power - Self::MIN_DBM).max(0) as u8;
        (pa_dac, PA_SELECT | level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_decoding() {
        let p: ModemProfile = ModemPreset::Lorawan.into();
        assert_eq!(p.bandwidth_hz(), Some(125_000));
        assert_eq!(p.spreading_factor(), 10);
        assert_eq!(p.coding_rate(), 5);
        assert!(p.crc_on());
        assert_eq!(p.datr(), "SF10BW125");
        assert_eq!(p.codr(), "4/5");

        let slow: ModemProfile = ModemPreset::Bw125Cr48Sf4096.into();
        assert_eq!(slow.coding_rate(), 8);
        assert!(slow.low_data_rate_optimize());

        let narrow: ModemProfile = ModemPreset::Bw31_25Cr48Sf512.into();
        assert_eq!(narrow.datr(), "SF9BW31.25");

        let gw: ModemProfile = ModemPreset::Gateway.into();
        assert!(!gw.crc_on());
    }

    #[test]
    fn test_profile_for_transmit() {
        let p = ModemProfile::for_transmit(500_000, 12).unwrap();
        assert_eq!((p.config1, p.config2), (0x92, 0xc4));
        assert!(!p.low_data_rate_optimize());

        let p = ModemProfile::for_transmit(125_000, 12).unwrap();
        assert!(p.low_data_rate_optimize());

        assert!(ModemProfile::for_transmit(123_000, 7).is_err());
        assert!(ModemProfile::for_transmit(125_000, 13).is_err());
    }

    #[test]
    fn test_setting_from_json() {
        let p: ModemProfile = serde_json::from_str("\"Lorawan\"").unwrap();
        assert_eq!(p, ModemPreset::Lorawan.into());

        let p: ModemProfile =
            serde_json::from_str(r#"{"config1":114,"config2":116,"config3":4}"#).unwrap();
        assert_eq!(p, ModemProfile::default());
    }

    #[test]
    fn test_frequency_registers() {
        // 915 MHz -> FRF 0xE4C000
        assert_eq!(FrequencyConfig::from_mhz(915.0).registers(), [0xE4, 0xC0, 0x00]);
        // 868 MHz -> FRF 0xD90000
        assert_eq!(FrequencyConfig::from_mhz(868.0).frf(), 0xD9_0000);
    }

    #[test]
    fn test_tx_power_mapping() {
        assert_eq!(TxPower::new(14).registers(), (PA_DAC_ENABLE, 0x86));
        assert_eq!(TxPower::new(23).registers(), (PA_DAC_DISABLE, 0x80 | 18));
        assert_eq!(TxPower::new(40).dbm(), 23);
        assert_eq!(TxPower::new(0).dbm(), 5);
        assert_eq!(TxPower::new(5).registers(), (PA_DAC_ENABLE, 0x80));
    }

    #[test]
    fn test_time_on_air() {
        // SF7/125k/4/5, CRC on, 8 symbol preamble, 10 byte payload: 41.216 ms
        let p = ModemProfile::default();
        let toa = p.time_on_air(10, 8);
        assert!((toa.as_secs_f64() * 1000.0 - 41.216).abs() < 0.01);

        // SF12/125k/4/8 with LDRO is far slower
        let slow: ModemProfile = ModemPreset::Bw125Cr48Sf4096.into();
        assert!(slow.time_on_air(10, 8) > Duration::from_millis(1000));
    }
}
