//! # Point-to-Point Frame Codec
//!
//! Wire format (RadioHead compatible):
//!
//! ```text
//! [dest:1][src:1][seq:1][flags:1][payload:0..251]
//! ```
//!
//! Destination 255 is broadcast. Flag bit 0x80 marks an acknowledgement. With a
//! cipher configured the payload is replaced by the encryption of
//! `[len:1][payload][zero padding to a 16-byte multiple]`.

use crate::link::cipher::{decrypt_blocks, encrypt_blocks, BlockCipher, BLOCK_SIZE};
use crate::radio::link_quality::LinkQuality;
use crate::radio::registers::MAX_FRAME_LEN;
use bitflags::bitflags;

pub const HEADER_LEN: usize = 4;
pub const BROADCAST_ADDRESS: u8 = 255;
/// Largest plaintext payload that fits the FIFO without a cipher
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;
/// Payload carried by every acknowledgement
pub const ACK_PAYLOAD: &[u8] = b"!";

bitflags! {
    /// Header flag byte; unknown bits are preserved
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u8 {
        const ACK = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub destination: u8,
    pub source: u8,
    pub id: u8,
    pub flags: HeaderFlags,
}

impl Header {
    pub fn new(destination: u8, source: u8, id: u8, flags: HeaderFlags) -> Self {
        Self {
            destination,
            source,
            id,
            flags,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(HeaderFlags::ACK)
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST_ADDRESS
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        [self.destination, self.source, self.id, self.flags.bits()]
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            destination: bytes[0],
            source: bytes[1],
            id: bytes[2],
            flags: HeaderFlags::from_bits_retain(bytes[3]),
        }
    }
}

/// A received frame as handed to the application
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
    pub quality: LinkQuality,
    /// False when the chip flagged a payload CRC error
    pub crc_ok: bool,
}

/// Encode header and payload, encrypting the payload if `cipher` is set
pub fn encode(header: &Header, payload: &[u8], cipher: Option<&dyn BlockCipher>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + BLOCK_SIZE);
    frame.extend_from_slice(&header.to_bytes());
    match cipher {
        Some(cipher) => frame.extend_from_slice(&seal(cipher, payload)),
        None => frame.extend_from_slice(payload),
    }
    frame
}

/// Split a frame into header and payload, decrypting when a cipher is set and
/// the payload is a whole number of blocks. Returns `None` below [`HEADER_LEN`].
pub fn decode(bytes: &[u8], cipher: Option<&dyn BlockCipher>) -> Option<(Header, Vec<u8>)> {
    let (head, body) = bytes.split_first_chunk::<HEADER_LEN>()?;
    let header = Header::from_bytes(head);

    let payload = match cipher {
        Some(cipher) if !body.is_empty() && body.len() % BLOCK_SIZE == 0 => open(cipher, body),
        _ => body.to_vec(),
    };
    Some((header, payload))
}

fn seal(cipher: &dyn BlockCipher, payload: &[u8]) -> Vec<u8> {
    let len = payload.len().min(u8::MAX as usize);
    let padded_len = (len + 1).div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

    let mut buf = vec![0u8; padded_len];
    buf[0] = len as u8;
    buf[1..=len].copy_from_slice(&payload[..len]);
    encrypt_blocks(cipher, &mut buf);
    buf
}

fn open(cipher: &dyn BlockCipher, body: &[u8]) -> Vec<u8> {
    let mut buf = body.to_vec();
    decrypt_blocks(cipher, &mut buf);
    let len = (buf[0] as usize).min(buf.len() - 1);
    buf[1..=len].to_vec()
}
