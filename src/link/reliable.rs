//! Reliable delivery: retransmit until the peer acknowledges.
//!
//! One call to [`send_to_wait`] uses one sequence id for all of its attempts.
//! Each attempt transmits, returns to continuous receive and polls for an ACK
//! for a jittered window of one to two times the configured retry timeout, so
//! two nodes that collided do not retry in lockstep.

use crate::clock::Clock;
use crate::error::LinkError;
use crate::link::frame::{HeaderFlags, BROADCAST_ADDRESS};
use crate::radio::driver::LoRa;
use crate::radio::hal::RegisterBus;
use log::{debug, warn};
use rand::Rng;
use std::time::Duration;

/// Default number of retransmissions after the first attempt
pub const DEFAULT_RETRIES: u8 = 3;

/// Send `payload` to `destination` and wait for its acknowledgement.
///
/// Makes at most `retries + 1` attempts and returns `Ok(true)` on the first
/// matching ACK. A broadcast returns `Ok(true)` after one transmission. An
/// attempt lost to a busy channel still counts and still waits its window.
pub fn send_to_wait<B: RegisterBus, C: Clock>(
    lora: &mut LoRa<B, C>,
    payload: &[u8],
    destination: u8,
    retries: u8,
) -> Result<bool, LinkError> {
    lora.last_header_id = lora.last_header_id.wrapping_add(1);
    let id = lora.last_header_id;
    let mut rng = rand::thread_rng();

    for attempt in 0..=retries {
        lora.pending_ack = None;
        let sent = lora.send(payload, destination, id, HeaderFlags::empty())?;

        if sent {
            lora.wait_packet_sent()?;
        }
        lora.listen()?;

        if destination == BROADCAST_ADDRESS {
            return Ok(sent);
        }
        if !sent {
            debug!("Channel busy, attempt {} for id {} backs off", attempt + 1, id);
        }

        // A busy attempt still waits out its window before the next one
        let base = lora.timing.retry_timeout();
        let window = base + base.mul_f64(rng.gen::<f64>());
        if wait_for_ack(lora, destination, id, window)? {
            debug!("ACK for id {} from {} on attempt {}", id, destination, attempt + 1);
            return Ok(true);
        }
    }

    warn!(
        "No ACK from {} for id {} after {} attempts",
        destination,
        id,
        retries as u32 + 1
    );
    Ok(false)
}

fn wait_for_ack<B: RegisterBus, C: Clock>(
    lora: &mut LoRa<B, C>,
    destination: u8,
    id: u8,
    window: Duration,
) -> Result<bool, LinkError> {
    let deadline = lora.clock.now() + window;
    loop {
        lora.service_interrupts()?;
        if is_matching_ack(lora, destination, id) {
            return Ok(true);
        }
        if lora.clock.now() >= deadline {
            return Ok(false);
        }
        lora.clock.sleep(lora.timing.poll_interval());
    }
}

fn is_matching_ack<B: RegisterBus, C: Clock>(lora: &LoRa<B, C>, destination: u8, id: u8) -> bool {
    lora.pending_ack.as_ref().is_some_and(|packet| {
        let header = &packet.header;
        header.destination == lora.this_address
            && header.is_ack()
            && header.id == id
            && header.source == destination
    })
}
