//! # Forwarder Uplink (Semtech UDP PUSH_DATA)
//!
//! Datagram layout:
//!
//! ```text
//! [version=2:1][token:2 BE][PUSH_DATA=0:1][gateway EUI:8] || utf8(json)
//! ```
//!
//! The JSON body carries one `rxpk` entry for the received frame and the
//! gateway `stat` object. The server answers with a 4-byte PUSH_ACK echoing
//! the token.

use crate::radio::driver::RawFrame;
use crate::radio::modem::ModemProfile;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

pub const PROTOCOL_VERSION: u8 = 2;
pub const PUSH_DATA: u8 = 0;
pub const PUSH_ACK: u8 = 1;
/// PUSH_ACK datagram length
pub const ACK_LEN: usize = 4;
pub const HEADER_LEN: usize = 12;

/// Unix time of the GPS epoch (1980-01-06T00:00:00Z), milliseconds
const GPS_EPOCH_UNIX_MS: i64 = 315_964_800_000;
/// GPS-UTC offset since 2017-01-01
const GPS_LEAP_SECONDS: i64 = 18;

/// One received packet (`rxpk` entry)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rxpk {
    pub time: String,
    pub tmms: i64,
    pub tmst: u32,
    pub freq: f64,
    pub chan: u8,
    pub rfch: u8,
    pub stat: i8,
    pub modu: String,
    pub datr: String,
    pub codr: String,
    pub rssi: i32,
    pub lsnr: f64,
    pub size: usize,
    pub data: String,
}

impl Rxpk {
    pub fn from_frame(
        frame: &RawFrame,
        frequency_mhz: f64,
        modem: &ModemProfile,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            time: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            tmms: gps_time_ms(now),
            tmst: frame.tick_ms,
            freq: frequency_mhz,
            chan: 0,
            rfch: 0,
            stat: if frame.crc_ok { 1 } else { -1 },
            modu: "LORA".to_string(),
            datr: modem.datr(),
            codr: modem.codr(),
            rssi: frame.quality.rssi as i32,
            lsnr: frame.quality.snr,
            size: frame.data.len(),
            data: BASE64.encode(&frame.data),
        }
    }
}

/// Gateway status (`stat` object)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayStatus {
    pub time: String,
    pub lati: f64,
    pub long: f64,
    pub alti: i32,
    /// Packets received
    pub rxnb: u32,
    /// Packets received with a valid CRC
    pub rxok: u32,
    /// Packets forwarded and acknowledged
    pub rxfw: u32,
    /// Percentage of uplink datagrams acknowledged
    pub ackr: f64,
    /// Downlinks received
    pub dwnb: u32,
    /// Downlinks transmitted
    pub txnb: u32,
}

impl GatewayStatus {
    pub fn new(latitude: f64, longitude: f64, altitude: i32) -> Self {
        Self {
            time: String::new(),
            lati: latitude,
            long: longitude,
            alti: altitude,
            rxnb: 0,
            rxok: 0,
            rxfw: 0,
            ackr: 100.0,
            dwnb: 0,
            txnb: 0,
        }
    }

    pub fn stamp(&mut self, now: DateTime<Utc>) {
        self.time = now.format("%Y-%m-%d %H:%M:%S GMT").to_string();
    }
}

#[derive(Serialize)]
struct PushData<'a> {
    rxpk: [&'a Rxpk; 1],
    stat: &'a GatewayStatus,
}

/// Build a PUSH_DATA datagram
pub fn encode_push_data(
    token: u16,
    gateway_id: &[u8; 8],
    rxpk: &Rxpk,
    stat: &GatewayStatus,
) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(&PushData {
        rxpk: [rxpk],
        stat,
    })?;

    let mut datagram = Vec::with_capacity(HEADER_LEN + body.len());
    datagram.push(PROTOCOL_VERSION);
    datagram.extend_from_slice(&token.to_be_bytes());
    datagram.push(PUSH_DATA);
    datagram.extend_from_slice(gateway_id);
    datagram.extend_from_slice(&body);
    Ok(datagram)
}

/// Whether `datagram` is the PUSH_ACK for `token`
pub fn is_push_ack(datagram: &[u8], token: u16) -> bool {
    let [version, hi, lo, kind] = match datagram {
        [a, b, c, d] => [*a, *b, *c, *d],
        _ => return false,
    };
    version == PROTOCOL_VERSION && kind == PUSH_ACK && u16::from_be_bytes([hi, lo]) == token
}

/// Milliseconds since the GPS epoch, leap seconds included
pub fn gps_time_ms(now: DateTime<Utc>) -> i64 {
    now.timestamp_millis() - GPS_EPOCH_UNIX_MS + GPS_LEAP_SECONDS * 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::link_quality::LinkQuality;
    use crate::radio::modem::ModemPreset;
    use chrono::TimeZone;
    use std::time::Instant;

    fn frame(data: &[u8], crc_ok: bool) -> RawFrame {
        RawFrame {
            data: data.to_vec(),
            quality: LinkQuality::from_raw(10, 100, 902.3),
            crc_ok,
            tick_ms: 1234,
            received_at: Instant::now(),
        }
    }

    #[test]
    fn test_push_data_layout() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let rxpk = Rxpk::from_frame(
            &frame(&[0x40, 1, 2, 3], true),
            902.3,
            &ModemPreset::Lorawan.into(),
            now,
        );
        let mut stat = GatewayStatus::new(46.24, 3.2523, 145);
        stat.stamp(now);

        let id = [0xb8, 0x27, 0xeb, 0xff, 0xfe, 0, 0, 1];
        let datagram = encode_push_data(0x1234, &id, &rxpk, &stat).unwrap();
        assert_eq!(&datagram[..4], &[2, 0x12, 0x34, 0]);
        assert_eq!(&datagram[4..12], &id);

        let json: serde_json::Value = serde_json::from_slice(&datagram[12..]).unwrap();
        let pk = &json["rxpk"][0];
        assert_eq!(pk["size"], 4);
        assert_eq!(pk["data"], "QAECAw==");
        assert_eq!(pk["stat"], 1);
        assert_eq!(pk["datr"], "SF10BW125");
        assert_eq!(pk["codr"], "4/5");
        assert_eq!(pk["modu"], "LORA");
        assert_eq!(pk["tmst"], 1234);
        assert_eq!(pk["rssi"], -50);
        assert_eq!(pk["lsnr"], 2.5);
        assert_eq!(pk["time"], "2024-03-01T12:30:05.000000Z");
        assert_eq!(json["stat"]["time"], "2024-03-01 12:30:05 GMT");
        assert_eq!(json["stat"]["alti"], 145);
    }

    #[test]
    fn test_crc_error_stat() {
        let now = Utc::now();
        let rxpk = Rxpk::from_frame(&frame(&[1], false), 868.1, &ModemProfile::default(), now);
        assert_eq!(rxpk.stat, -1);
    }

    #[test]
    fn test_push_ack_matching() {
        assert!(is_push_ack(&[2, 0xAB, 0xCD, 1], 0xABCD));
        assert!(!is_push_ack(&[2, 0xAB, 0xCD, 1], 0xABCE));
        assert!(!is_push_ack(&[2, 0xAB, 0xCD, 4], 0xABCD));
        assert!(!is_push_ack(&[2, 0xAB, 0xCD], 0xABCD));
    }

    #[test]
    fn test_gps_time() {
        let epoch = Utc.with_ymd_and_hms(1980, 1, 6, 0, 0, 0).unwrap();
        assert_eq!(gps_time_ms(epoch), 18_000);
    }
}
