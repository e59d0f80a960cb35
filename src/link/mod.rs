//! # Point-to-Point Link
//!
//! Addressed frames with optional payload encryption (`frame`, `cipher`) and
//! acknowledged delivery with retries (`reliable`) on top of the radio driver.

pub mod cipher;
pub mod frame;
pub mod reliable;

pub use cipher::BlockCipher;
pub use frame::{Header, HeaderFlags, Packet, BROADCAST_ADDRESS};
pub use reliable::{send_to_wait, DEFAULT_RETRIES};
