//! # LoRaWAN MAC Frame Inspection
//!
//! Offline, diagnostic decode of a LoRaWAN PHYPayload:
//!
//! ```text
//! [MHDR:1] [MACPayload:N] [MIC:4]
//!  MHDR = FType(3) | RFU(3) | Major(2)
//! ```
//!
//! Join-Request and data frame headers are decoded field by field. A
//! Join-Accept is encrypted on the air, so its fields are split out as
//! transmitted and the frame is marked partial. Bodies too short for their
//! frame type are kept raw and also marked partial; only a frame shorter than
//! MHDR plus MIC is an error.

use nom::bytes::complete::take;
use nom::combinator::rest;
use nom::number::complete::{le_u16, le_u32, le_u64, u8 as byte};
use nom::IResult;
use std::fmt;
use thiserror::Error;

/// MHDR plus MIC
pub const MIN_FRAME_LEN: usize = 5;
pub const MIC_LEN: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacError {
    #[error("MAC frame too short: {0} bytes")]
    TooShort(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    Rfu,
    Proprietary,
}

impl FrameType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => FrameType::JoinRequest,
            1 => FrameType::JoinAccept,
            2 => FrameType::UnconfirmedDataUp,
            3 => FrameType::UnconfirmedDataDown,
            4 => FrameType::ConfirmedDataUp,
            5 => FrameType::ConfirmedDataDown,
            6 => FrameType::Rfu,
            _ => FrameType::Proprietary,
        }
    }

    pub fn is_data(self) -> bool {
        matches!(
            self,
            FrameType::UnconfirmedDataUp
                | FrameType::UnconfirmedDataDown
                | FrameType::ConfirmedDataUp
                | FrameType::ConfirmedDataDown
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::JoinRequest => "Join-Request",
            FrameType::JoinAccept => "Join-Accept",
            FrameType::UnconfirmedDataUp => "Unconfirmed Data Up",
            FrameType::UnconfirmedDataDown => "Unconfirmed Data Down",
            FrameType::ConfirmedDataUp => "Confirmed Data Up",
            FrameType::ConfirmedDataDown => "Confirmed Data Down",
            FrameType::Rfu => "RFU",
            FrameType::Proprietary => "Proprietary",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mhdr {
    pub frame_type: FrameType,
    pub rfu: u8,
    pub major: u8,
}

impl Mhdr {
    pub fn from_byte(value: u8) -> Self {
        Self {
            frame_type: FrameType::from_bits(value >> 5),
            rfu: (value >> 2) & 0x07,
            major: value & 0x03,
        }
    }

    pub fn major_name(&self) -> &'static str {
        if self.major == 0 {
            "LoRaWAN R1"
        } else {
            "RFU"
        }
    }
}

/// Frame header and port of a data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub dev_addr: u32,
    pub fctrl: u8,
    pub fcnt: u16,
    pub fopts: Vec<u8>,
    pub fport: Option<u8>,
    pub frm_payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacPayload {
    JoinRequest {
        join_eui: u64,
        dev_eui: u64,
        dev_nonce: u16,
    },
    /// Fields as transmitted, still encrypted
    JoinAccept {
        join_nonce: [u8; 3],
        net_id: [u8; 3],
        dev_addr: u32,
        dl_settings: u8,
        cf_list: Vec<u8>,
    },
    Data(DataFrame),
    /// Undecoded body: RFU, proprietary or truncated frames
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacFrame {
    pub mhdr: Mhdr,
    pub payload: MacPayload,
    pub mic: u32,
    /// Set when the body could not be fully decoded
    pub partial: bool,
}

impl MacFrame {
    pub fn parse(raw: &[u8]) -> Result<Self, MacError> {
        if raw.len() < MIN_FRAME_LEN {
            return Err(MacError::TooShort(raw.len()));
        }
        let mhdr = Mhdr::from_byte(raw[0]);
        let (body, mic_bytes) = raw[1..].split_at(raw.len() - 1 - MIC_LEN);
        let mic = u32::from_le_bytes([mic_bytes[0], mic_bytes[1], mic_bytes[2], mic_bytes[3]]);

        let parsed = match mhdr.frame_type {
            FrameType::JoinRequest => Some(join_request(body)),
            FrameType::JoinAccept => Some(join_accept(body)),
            t if t.is_data() => Some(data_frame(body)),
            _ => None,
        };

        let (payload, partial) = match parsed {
            Some(Ok((_, payload @ MacPayload::JoinAccept { .. }))) => (payload, true),
            Some(Ok((_, payload))) => (payload, false),
            Some(Err(_)) => (MacPayload::Raw(body.to_vec()), true),
            None => (MacPayload::Raw(body.to_vec()), false),
        };

        Ok(Self {
            mhdr,
            payload,
            mic,
            partial,
        })
    }
}

fn join_request(input: &[u8]) -> IResult<&[u8], MacPayload> {
    let (input, join_eui) = le_u64(input)?;
    let (input, dev_eui) = le_u64(input)?;
    let (input, dev_nonce) = le_u16(input)?;
    Ok((
        input,
        MacPayload::JoinRequest {
            join_eui,
            dev_eui,
            dev_nonce,
        },
    ))
}

fn three_bytes(input: &[u8]) -> IResult<&[u8], [u8; 3]> {
    let (input, bytes) = take(3usize)(input)?;
    Ok((input, [bytes[0], bytes[1], bytes[2]]))
}

fn join_accept(input: &[u8]) -> IResult<&[u8], MacPayload> {
    let (input, join_nonce) = three_bytes(input)?;
    let (input, net_id) = three_bytes(input)?;
    let (input, dev_addr) = le_u32(input)?;
    let (input, dl_settings) = byte(input)?;
    let (input, cf_list) = rest(input)?;
    Ok((
        input,
        MacPayload::JoinAccept {
            join_nonce,
            net_id,
            dev_addr,
            dl_settings,
            cf_list: cf_list.to_vec(),
        },
    ))
}

fn data_frame(input: &[u8]) -> IResult<&[u8], MacPayload> {
    let (input, dev_addr) = le_u32(input)?;
    let (input, fctrl) = byte(input)?;
    let (input, fcnt) = le_u16(input)?;
    let (input, fopts) = take(usize::from(fctrl & 0x0F))(input)?;
    let (input, tail) = rest(input)?;

    let (fport, frm_payload) = match tail.split_first() {
        Some((port, body)) => (Some(*port), body.to_vec()),
        None => (None, Vec::new()),
    };

    Ok((
        input,
        MacPayload::Data(DataFrame {
            dev_addr,
            fctrl,
            fcnt,
            fopts: fopts.to_vec(),
            fport,
            frm_payload,
        }),
    ))
}

impl fmt::Display for MacFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>8}: {:03b}|{:03b}|{:02b}  {}|{}",
            "MHDR",
            self.mhdr.frame_type as u8,
            self.mhdr.rfu,
            self.mhdr.major,
            self.mhdr.frame_type,
            self.mhdr.major_name()
        )?;

        match &self.payload {
            MacPayload::JoinRequest {
                join_eui,
                dev_eui,
                dev_nonce,
            } => writeln!(
                f,
                "{:>8}: 0x{:016x}|0x{:016x}|0x{:04x}",
                "Join", join_eui, dev_eui, dev_nonce
            )?,
            MacPayload::JoinAccept {
                join_nonce,
                net_id,
                dev_addr,
                dl_settings,
                cf_list,
            } => writeln!(
                f,
                "{:>8}: 0x{}|0x{}|0x{:08x}|0x{:02x}|0x{} (encrypted)",
                "Accept",
                hex::encode(join_nonce),
                hex::encode(net_id),
                dev_addr,
                dl_settings,
                hex::encode(cf_list)
            )?,
            MacPayload::Data(data) => {
                write!(
                    f,
                    "{:>8}: 0x{:08x}|0x{:02x}|{}",
                    "FHDR", data.dev_addr, data.fctrl, data.fcnt
                )?;
                if !data.fopts.is_empty() {
                    write!(f, "|0x{}", hex::encode(&data.fopts))?;
                }
                writeln!(f)?;
                if let Some(port) = data.fport {
                    writeln!(f, "{:>8}: 0x{:02x}", "FPort", port)?;
                }
                if !data.frm_payload.is_empty() {
                    writeln!(f, "{:>8}: 0x{}", "FRMPay", hex::encode(&data.frm_payload))?;
                }
            }
            MacPayload::Raw(body) if !body.is_empty() => {
                writeln!(f, "{:>8}: 0x{}", "Body", hex::encode(body))?
            }
            MacPayload::Raw(_) => {}
        }

        if self.partial {
            writeln!(f, "{:>8}: partial decode", "Note")?;
        }
        write!(f, "{:>8}: 0x{:08x}", "MIC", self.mic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_short() {
        assert_eq!(MacFrame::parse(&[0x40, 1, 2, 3]), Err(MacError::TooShort(4)));
        assert!(MacFrame::parse(&[0x40, 1, 2, 3, 4]).is_ok());
    }

    #[test]
    fn test_mhdr_fields() {
        let mhdr = Mhdr::from_byte(0b100_101_01);
        assert_eq!(mhdr.frame_type, FrameType::ConfirmedDataUp);
        assert_eq!(mhdr.rfu, 0b101);
        assert_eq!(mhdr.major, 1);
        assert_eq!(mhdr.major_name(), "RFU");
        assert_eq!(Mhdr::from_byte(0x00).major_name(), "LoRaWAN R1");
    }

    #[test]
    fn test_join_request() {
        let raw = hex::decode("00efcdab9078563412281a0000a0f20103ab1f0a0b0c0d").unwrap();
        let frame = MacFrame::parse(&raw).unwrap();
        assert_eq!(frame.mhdr.frame_type, FrameType::JoinRequest);
        assert_eq!(
            frame.payload,
            MacPayload::JoinRequest {
                join_eui: 0x1234_5678_90ab_cdef,
                dev_eui: 0x0301_f2a0_0000_1a28,
                dev_nonce: 0x1fab,
            }
        );
        assert_eq!(frame.mic, 0x0d0c_0b0a);
        assert!(!frame.partial);
    }

    #[test]
    fn test_unconfirmed_data_up_with_fopts() {
        // DevAddr 0x26011bda, FCtrl with 2 FOpts bytes, FCnt 7, port 10
        let raw = hex::decode("40da1b0126820700030510cafe11223344").unwrap();
        let frame = MacFrame::parse(&raw).unwrap();
        let MacPayload::Data(data) = &frame.payload else {
            panic!("expected data frame, got {:?}", frame.payload);
        };
        assert_eq!(data.dev_addr, 0x2601_1bda);
        assert_eq!(data.fctrl, 0x82);
        assert_eq!(data.fcnt, 7);
        assert_eq!(data.fopts, vec![0x03, 0x05]);
        assert_eq!(data.fport, Some(0x10));
        assert_eq!(data.frm_payload, vec![0xca, 0xfe]);
        assert_eq!(frame.mic, 0x4433_2211);

        let text = frame.to_string();
        assert!(text.contains("Unconfirmed Data Up|LoRaWAN R1"));
        assert!(text.contains("0x26011bda|0x82|7|0x0305"));
        assert!(text.contains("FRMPay: 0xcafe"));
    }

    #[test]
    fn test_data_without_port() {
        let raw = hex::decode("60040302010001000a0b0c0d").unwrap();
        let frame = MacFrame::parse(&raw).unwrap();
        let MacPayload::Data(data) = frame.payload else {
            panic!("expected data frame");
        };
        assert_eq!(data.fcnt, 1);
        assert_eq!(data.fport, None);
        assert!(data.frm_payload.is_empty());
    }

    #[test]
    fn test_truncated_data_is_partial() {
        // FCtrl announces 15 FOpts bytes that are not there
        let raw = hex::decode("40010203040f0100aabbccdd").unwrap();
        let frame = MacFrame::parse(&raw).unwrap();
        assert!(frame.partial);
        assert_eq!(
            frame.payload,
            MacPayload::Raw(vec![0x01, 0x02, 0x03, 0x04, 0x0f, 0x01, 0x00])
        );
    }

    #[test]
    fn test_join_accept_is_partial() {
        let raw = hex::decode("20010203040506785634120200aabbccdd").unwrap();
        let frame = MacFrame::parse(&raw).unwrap();
        assert!(frame.partial);
        match frame.payload.clone() {
            MacPayload::JoinAccept {
                dev_addr, cf_list, ..
            } => {
                assert_eq!(dev_addr, 0x1234_5678);
                assert_eq!(cf_list, vec![0x00]);
            }
            other => panic!("expected join accept, got {:?}", other),
        }
        assert!(frame.to_string().contains("(encrypted)"));
    }

    #[test]
    fn test_proprietary_kept_raw() {
        let frame = MacFrame::parse(&[0xE0, 0x99, 1, 2, 3, 4]).unwrap();
        assert_eq!(frame.mhdr.frame_type, FrameType::Proprietary);
        assert_eq!(frame.payload, MacPayload::Raw(vec![0x99]));
        assert!(!frame.partial);
    }
}
