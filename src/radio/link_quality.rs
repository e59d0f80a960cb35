//! Calibrated link quality for the last received packet.

use serde::Serialize;

/// Band edge above which the high-frequency RSSI offset applies
pub const HF_BAND_MIN_MHZ: f64 = 779.0;
/// RSSI offset for the high-frequency port (dB)
pub const RSSI_OFFSET_HF: f64 = 157.0;
/// RSSI offset for the low-frequency port (dB)
pub const RSSI_OFFSET_LF: f64 = 164.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinkQuality {
    /// Packet RSSI in dBm, rounded to two decimals
    pub rssi: f64,
    /// Packet SNR in dB, quantized to 0.25 dB
    pub snr: f64,
}

impl LinkQuality {
    /// Compute link quality from `REG_19_PKT_SNR_VALUE` and
    /// `REG_1A_PKT_RSSI_VALUE` for a radio tuned to `frequency_mhz`.
    pub fn from_raw(snr_raw: u8, rssi_raw: u8, frequency_mhz: f64) -> Self {
        let snr = snr_from_raw(snr_raw);
        let rssi_raw = rssi_raw as f64;

        let rssi = if snr < 0.0 {
            snr + rssi_raw
        } else {
            rssi_raw * 16.0 / 15.0
        };

        let offset = if frequency_mhz >= HF_BAND_MIN_MHZ {
            RSSI_OFFSET_HF
        } else {
            RSSI_OFFSET_LF
        };

        Self {
            rssi: round2(rssi - offset),
            snr,
        }
    }
}

/// Recover the signed quarter-dB SNR from its register value
pub fn snr_from_raw(raw: u8) -> f64 {
    let value = if raw > 128 {
        127 - raw as i32
    } else {
        raw as i32
    };
    value as f64 / 4.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
