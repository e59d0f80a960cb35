//! # Simulated Radio
//!
//! A register-level model of an SX127x in LoRa mode, used by the test suites
//! and by `lora-link` dry runs on machines without radio hardware.
//!
//! The model keeps a register file and a 256-byte FIFO and reacts to operating
//! mode writes the way the chip does: TX and CAD complete immediately and
//! raise the interrupt line by posting an [`IrqSignal`]. Inbound frames queued
//! while the chip listens raise the line too, but a frame only lands in the
//! FIFO when the IRQ flags are next read in continuous receive, so it always
//! arrives after any completion interrupt that is still being handled.
//!
//! ```rust
//! use lora_link::radio::hal::{RegisterBus, SimulatedRadio};
//!
//! let (mut sim, _irq) = SimulatedRadio::new();
//! sim.write_register(0x39, 0x34).unwrap();
//! assert_eq!(sim.register(0x39), 0x34);
//! ```

use crate::radio::hal::{BusError, IrqSignal, RegisterBus};
use crate::radio::registers::*;
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

/// Called with every transmitted frame; may return a frame for the radio to
/// receive the next time it enters continuous receive.
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// How the simulated chip answers a CAD request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadResponse {
    /// CadDone without CadDetected
    Clear,
    /// CadDone with CadDetected
    Busy,
    /// Never completes (exercises the CAD timeout)
    Silent,
}

struct InboundFrame {
    data: Vec<u8>,
    crc_ok: bool,
}

struct SimState {
    registers: [u8; 0x80],
    fifo: [u8; FIFO_SIZE],
    transmitted: Vec<Vec<u8>>,
    inbound: VecDeque<InboundFrame>,
    responder: Option<Responder>,
    cad_response: CadResponse,
    stuck_op_mode: Option<u8>,
    writes: Vec<(u8, Vec<u8>)>,
    snr_raw: u8,
    rssi_raw: u8,
    irq_tx: Sender<IrqSignal>,
}

impl SimState {
    fn mode(&self) -> u8 {
        self.registers[REG_01_OP_MODE as usize] & MODE_MASK
    }

    fn flags(&self) -> IrqFlags {
        IrqFlags::from_bits_retain(self.registers[REG_12_IRQ_FLAGS as usize])
    }

    fn set_flags(&mut self, flags: IrqFlags) {
        self.registers[REG_12_IRQ_FLAGS as usize] |= flags.bits();
        self.raise_line();
    }

    fn raise_line(&self) {
        let _ = self.irq_tx.send(IrqSignal);
    }

    /// Announce queued inbound traffic while listening
    fn announce_inbound(&self) {
        if self.mode() == MODE_RXCONTINUOUS && !self.inbound.is_empty() {
            self.raise_line();
        }
    }

    fn fifo_write(&mut self, data: &[u8]) {
        let mut ptr = self.registers[REG_0D_FIFO_ADDR_PTR as usize];
        for &byte in data {
            self.fifo[ptr as usize] = byte;
            ptr = ptr.wrapping_add(1);
        }
        self.registers[REG_0D_FIFO_ADDR_PTR as usize] = ptr;
    }

    fn fifo_read(&mut self, buf: &mut [u8]) {
        let mut ptr = self.registers[REG_0D_FIFO_ADDR_PTR as usize];
        for byte in buf.iter_mut() {
            *byte = self.fifo[ptr as usize];
            ptr = ptr.wrapping_add(1);
        }
        self.registers[REG_0D_FIFO_ADDR_PTR as usize] = ptr;
    }

    fn deliver_next(&mut self) {
        if self.mode() != MODE_RXCONTINUOUS || self.flags().contains(IrqFlags::RX_DONE) {
            return;
        }
        let Some(frame) = self.inbound.pop_front() else {
            return;
        };

        let base = self.registers[REG_0F_FIFO_RX_BASE_ADDR as usize];
        let mut addr = base;
        for &byte in &frame.data {
            self.fifo[addr as usize] = byte;
            addr = addr.wrapping_add(1);
        }
        self.registers[REG_10_FIFO_RX_CURRENT_ADDR as usize] = base;
        self.registers[REG_13_RX_NB_BYTES as usize] = frame.data.len() as u8;
        self.registers[REG_19_PKT_SNR_VALUE as usize] = self.snr_raw;
        self.registers[REG_1A_PKT_RSSI_VALUE as usize] = self.rssi_raw;

        let mut flags = IrqFlags::RX_DONE | IrqFlags::VALID_HEADER;
        if !frame.crc_ok {
            flags |= IrqFlags::PAYLOAD_CRC_ERROR;
        }
        self.registers[REG_12_IRQ_FLAGS as usize] |= flags.bits();
        self.announce_inbound();
    }

    fn on_mode_write(&mut self) {
        match self.mode() {
            MODE_TX => {
                let len = self.registers[REG_22_PAYLOAD_LENGTH as usize] as usize;
                let mut addr = self.registers[REG_0E_FIFO_TX_BASE_ADDR as usize];
                let mut frame = Vec::with_capacity(len);
                for _ in 0..len {
                    frame.push(self.fifo[addr as usize]);
                    addr = addr.wrapping_add(1);
                }
                if let Some(responder) = self.responder.as_mut() {
                    if let Some(reply) = responder(&frame) {
                        self.inbound.push_back(InboundFrame {
                            data: reply,
                            crc_ok: true,
                        });
                    }
                }
                self.transmitted.push(frame);
                self.set_flags(IrqFlags::TX_DONE);
            }
            MODE_CAD => match self.cad_response {
                CadResponse::Clear => self.set_flags(IrqFlags::CAD_DONE),
                CadResponse::Busy => self.set_flags(IrqFlags::CAD_DONE | IrqFlags::CAD_DETECTED),
                CadResponse::Silent => {}
            },
            MODE_RXCONTINUOUS => self.announce_inbound(),
            _ => {}
        }
    }
}

/// Shareable handle to the simulated chip; clones observe the same state.
#[derive(Clone)]
pub struct SimulatedRadio {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRadio {
    /// Create a powered-up chip (FSK sleep) and its interrupt channel
    pub fn new() -> (Self, Receiver<IrqSignal>) {
        let (irq_tx, irq_rx) = super::irq_channel();
        let mut registers = [0u8; 0x80];
        registers[REG_42_VERSION as usize] = 0x12;
        registers[REG_09_PA_CONFIG as usize] = 0x4F;
        registers[REG_39_SYNC_WORD as usize] = 0x12;

        let state = SimState {
            registers,
            fifo: [0u8; FIFO_SIZE],
            transmitted: Vec::new(),
            inbound: VecDeque::new(),
            responder: None,
            cad_response: CadResponse::Clear,
            stuck_op_mode: None,
            writes: Vec::new(),
            snr_raw: 40,
            rssi_raw: 100,
            irq_tx,
        };

        (
            Self {
                state: Arc::new(Mutex::new(state)),
            },
            irq_rx,
        )
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current value of a register
    pub fn register(&self, register: u8) -> u8 {
        self.lock().registers[register as usize & 0x7F]
    }

    /// Current operating mode bits
    pub fn mode(&self) -> u8 {
        self.lock().mode()
    }

    /// Every frame the chip has transmitted so far
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.lock().transmitted.clone()
    }

    /// Register writes recorded since the last [`clear_write_log`](Self::clear_write_log)
    pub fn write_log(&self) -> Vec<(u8, Vec<u8>)> {
        self.lock().writes.clone()
    }

    pub fn clear_write_log(&self) {
        self.lock().writes.clear();
    }

    /// Queue a frame for reception; the line rises at once if the chip listens
    pub fn inject(&self, frame: &[u8]) {
        self.push_inbound(frame, true);
    }

    /// Queue a frame that fails the payload CRC
    pub fn inject_with_crc_error(&self, frame: &[u8]) {
        self.push_inbound(frame, false);
    }

    fn push_inbound(&self, frame: &[u8], crc_ok: bool) {
        let mut state = self.lock();
        state.inbound.push_back(InboundFrame {
            data: frame.to_vec(),
            crc_ok,
        });
        if state.inbound.len() == 1 {
            state.announce_inbound();
        }
    }

    /// Frames queued but not yet received
    pub fn inbound_len(&self) -> usize {
        self.lock().inbound.len()
    }

    /// Set IRQ flags and raise the interrupt line without any mode semantics
    pub fn raise_irq(&self, flags: IrqFlags) {
        self.lock().set_flags(flags);
    }

    pub fn set_responder(&self, responder: Responder) {
        self.lock().responder = Some(responder);
    }

    pub fn set_cad_response(&self, response: CadResponse) {
        self.lock().cad_response = response;
    }

    /// Raw SNR / RSSI register values reported for received frames
    pub fn set_link(&self, snr_raw: u8, rssi_raw: u8) {
        let mut state = self.lock();
        state.snr_raw = snr_raw;
        state.rssi_raw = rssi_raw;
    }

    /// Make the operating mode register read back a fixed value
    pub fn set_stuck_op_mode(&self, value: Option<u8>) {
        self.lock().stuck_op_mode = value;
    }
}

impl RegisterBus for SimulatedRadio {
    fn write(&mut self, register: u8, data: &[u8]) -> Result<(), BusError> {
        let mut state = self.lock();
        state.writes.push((register, data.to_vec()));

        match register {
            REG_00_FIFO => state.fifo_write(data),
            REG_12_IRQ_FLAGS => {
                if let Some(&mask) = data.first() {
                    state.registers[REG_12_IRQ_FLAGS as usize] &= !mask;
                }
            }
            REG_01_OP_MODE => {
                if let Some(&value) = data.first() {
                    state.registers[REG_01_OP_MODE as usize] = value;
                    state.on_mode_write();
                }
            }
            _ => {
                for (offset, &value) in data.iter().enumerate() {
                    let addr = (register as usize + offset) & 0x7F;
                    state.registers[addr] = value;
                }
            }
        }
        Ok(())
    }

    fn read(&mut self, register: u8, buf: &mut [u8]) -> Result<(), BusError> {
        let mut state = self.lock();
        match register {
            REG_00_FIFO => state.fifo_read(buf),
            REG_12_IRQ_FLAGS => {
                state.deliver_next();
                let flags = state.registers[REG_12_IRQ_FLAGS as usize];
                buf.iter_mut().for_each(|b| *b = flags);
            }
            REG_01_OP_MODE if state.stuck_op_mode.is_some() => {
                let value = state.stuck_op_mode.unwrap_or_default();
                buf.iter_mut().for_each(|b| *b = value);
            }
            _ => {
                for (offset, byte) in buf.iter_mut().enumerate() {
                    *byte = state.registers[(register as usize + offset) & 0x7F];
                }
            }
        }
        Ok(())
    }
}
