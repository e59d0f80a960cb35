//! Interrupt handler for the SX127x DIO0 line.
//!
//! Runs once per [`IrqSignal`](crate::radio::hal::IrqSignal) drained by
//! [`LoRa::service_interrupts`]. The IRQ flags are read once and dispatched on
//! the current mode:
//!
//! | Mode | Flag | Action |
//! |------|------|--------|
//! | continuous RX | RX_DONE | drain FIFO, count, filter, accept packet |
//! | TX | TX_DONE | restore profile and carrier, back to RX |
//! | CAD | CAD_DONE | record result, back to standby |
//!
//! Any other combination is ignored. All flags are cleared on exit.

use crate::clock::Clock;
use crate::error::LinkError;
use crate::link::frame::{self, Header, Packet};
use crate::logging::frame_hex;
use crate::radio::driver::{LoRa, RawFrame};
use crate::radio::hal::RegisterBus;
use crate::radio::link_quality::LinkQuality;
use crate::radio::registers::*;
use crate::radio::state::RadioMode;
use log::{debug, trace, warn};

const CLEAR_ALL: u8 = 0xFF;

/// Handle one interrupt. Returns the header of a frame that must be
/// acknowledged; the caller sends the ACK once the flags are cleared.
pub(crate) fn handle_interrupt<B: RegisterBus, C: Clock>(
    lora: &mut LoRa<B, C>,
) -> Result<Option<Header>, LinkError> {
    let flags = IrqFlags::from_bits_retain(lora.bus.read_register(REG_12_IRQ_FLAGS)?);
    let mode = lora.state.mode();
    trace!("IRQ flags {:?} in {:?}", flags, mode);

    let ack = match mode {
        RadioMode::ReceivingContinuous if flags.contains(IrqFlags::RX_DONE) => {
            on_rx_done(lora, flags)?
        }
        RadioMode::Transmitting if flags.contains(IrqFlags::TX_DONE) => {
            lora.restore_profile()?;
            lora.state.enter_receive_continuous(&mut lora.bus)?;
            None
        }
        RadioMode::ChannelActivityDetection if flags.contains(IrqFlags::CAD_DONE) => {
            let detected = flags.contains(IrqFlags::CAD_DETECTED);
            lora.cad_detected = Some(detected);
            lora.state.enter_standby(&mut lora.bus)?;
            debug!("CAD done: {}", if detected { "activity" } else { "clear" });
            None
        }
        _ => None,
    };

    lora.bus.write_register(REG_12_IRQ_FLAGS, CLEAR_ALL)?;
    Ok(ack)
}

fn on_rx_done<B: RegisterBus, C: Clock>(
    lora: &mut LoRa<B, C>,
    flags: IrqFlags,
) -> Result<Option<Header>, LinkError> {
    let crc_ok = !flags.contains(IrqFlags::PAYLOAD_CRC_ERROR);
    lora.counters.received = lora.counters.received.wrapping_add(1);
    if crc_ok {
        lora.counters.crc_ok = lora.counters.crc_ok.wrapping_add(1);
    }

    let len = lora.bus.read_register(REG_13_RX_NB_BYTES)? as usize;
    let current = lora.bus.read_register(REG_10_FIFO_RX_CURRENT_ADDR)?;
    lora.bus.write_register(REG_0D_FIFO_ADDR_PTR, current)?;
    let mut data = vec![0u8; len];
    lora.bus.read(REG_00_FIFO, &mut data)?;
    lora.bus.write_register(REG_12_IRQ_FLAGS, CLEAR_ALL)?;

    let snr_raw = lora.bus.read_register(REG_19_PKT_SNR_VALUE)?;
    let rssi_raw = lora.bus.read_register(REG_1A_PKT_RSSI_VALUE)?;
    let quality = LinkQuality::from_raw(snr_raw, rssi_raw, lora.frequency.mhz());
    debug!(
        "RX {} bytes rssi {} snr {}: {}",
        len,
        quality.rssi,
        quality.snr,
        frame_hex(&data)
    );

    if lora.forward_raw {
        let frame = RawFrame {
            data: data.clone(),
            quality,
            crc_ok,
            tick_ms: lora.tick_ms(),
            received_at: lora.clock.now(),
        };
        lora.queue_raw_frame(frame);
    }

    if !crc_ok {
        warn!("Payload CRC error on {} byte frame", len);
    }

    let Some((header, payload)) = frame::decode(&data, lora.cipher.as_deref()) else {
        debug!("Frame shorter than header ({} bytes)", len);
        return Ok(None);
    };

    let for_us = header.destination == lora.this_address;
    if !for_us && !(header.is_broadcast() && lora.receive_all) {
        trace!("Frame for {} filtered", header.destination);
        return Ok(None);
    }

    let ack = (lora.acks && for_us && !header.is_ack()).then_some(header);

    lora.state.enter_receive_continuous(&mut lora.bus)?;
    let packet = &*lora.pending_ack.insert(Packet {
        header,
        payload,
        quality,
        crc_ok,
    });
    if !header.is_ack() {
        if let Some(callback) = lora.on_recv.as_mut() {
            callback(packet);
        }
    }

    Ok(ack)
}
