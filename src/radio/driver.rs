//! # SX127x LoRa Driver
//!
//! The [`LoRa`] object owns the register bus, the interrupt channel and all
//! state the interrupt handler shares with the caller: the current mode, the
//! last accepted packet (matched against outstanding reliable sends), the CAD
//! result, receive counters and the raw frame queue of the gateway role.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────┐
//! │  ReliableDelivery / Gateway     │
//! ├─────────────────────────────────┤
//! │     LoRa driver (this file)     │◄── IrqSignal channel
//! ├──────────────┬──────────────────┤
//! │ StateMachine │ InterruptHandler │
//! ├──────────────┴──────────────────┤
//! │        RegisterBus (HAL)        │
//! └─────────────────────────────────┘
//! ```
//!
//! The hardware interrupt only posts an [`IrqSignal`]. The handler runs when
//! [`LoRa::service_interrupts`] drains the channel, which every bounded wait
//! in the crate does on each poll iteration.
//!
//! ## Usage Example
//!
//! ```rust
//! use lora_link::clock::ManualClock;
//! use lora_link::config::RadioConfig;
//! use lora_link::radio::driver::LoRa;
//! use lora_link::radio::hal::SimulatedRadio;
//!
//! let (sim, irq) = SimulatedRadio::new();
//! let mut radio = LoRa::new(sim, irq, ManualClock::new(), &RadioConfig::new(2)).unwrap();
//! radio.on_recv(Box::new(|packet| println!("{:?}", packet.payload)));
//! radio.listen().unwrap();
//! radio.service_interrupts().unwrap();
//! ```

use crate::clock::Clock;
use crate::config::{LinkTiming, RadioConfig};
use crate::error::LinkError;
use crate::link::cipher::{self, BlockCipher};
use crate::link::frame::{self, Header, HeaderFlags, Packet, ACK_PAYLOAD};
use crate::logging::frame_hex;
use crate::radio::cad;
use crate::radio::hal::{IrqSignal, RegisterBus};
use crate::radio::interrupt;
use crate::radio::link_quality::LinkQuality;
use crate::radio::modem::{FrequencyConfig, ModemProfile, TxPower};
use crate::radio::registers::*;
use crate::radio::state::{RadioMode, RadioStateMachine};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

/// Settle time after the initial sleep-mode write
const INIT_SETTLE: Duration = Duration::from_millis(100);

/// Raw frames kept for forwarding before the oldest is dropped
const RAW_QUEUE_LIMIT: usize = 64;

/// Application receive callback; never called for acknowledgements
pub type ReceiveCallback = Box<dyn FnMut(&Packet) + Send>;

/// Receive statistics kept by the interrupt handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxCounters {
    /// RX_DONE interrupts
    pub received: u32,
    /// RX_DONE interrupts without a payload CRC error
    pub crc_ok: u32,
}

/// A frame as it came off the air, before any header interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub quality: LinkQuality,
    pub crc_ok: bool,
    /// Milliseconds since driver start (wrapping)
    pub tick_ms: u32,
    pub received_at: Instant,
}

/// SX127x LoRa driver
pub struct LoRa<B: RegisterBus, C: Clock> {
    pub(crate) bus: B,
    pub(crate) clock: C,
    irq_rx: Receiver<IrqSignal>,
    pub(crate) state: RadioStateMachine,
    pub(crate) this_address: u8,
    pub(crate) receive_all: bool,
    pub(crate) acks: bool,
    pub(crate) forward_raw: bool,
    pub(crate) modem: ModemProfile,
    pub(crate) frequency: FrequencyConfig,
    tx_power: TxPower,
    sync_word: u8,
    preamble_len: u16,
    pub(crate) timing: LinkTiming,
    pub(crate) cipher: Option<Box<dyn BlockCipher>>,
    pub(crate) last_header_id: u8,
    /// Most recently accepted packet, acknowledgements included
    pub(crate) pending_ack: Option<Packet>,
    /// Set by the handler on CAD_DONE
    pub(crate) cad_detected: Option<bool>,
    pub(crate) counters: RxCounters,
    pub(crate) raw_frames: VecDeque<RawFrame>,
    pub(crate) on_recv: Option<ReceiveCallback>,
    started: Instant,
}

impl<B: RegisterBus, C: Clock> LoRa<B, C> {
    /// Create the driver and run the chip initialization sequence.
    ///
    /// Fails with [`LinkError::InitFailed`] if the chip does not report LoRa
    /// sleep mode after the first mode write.
    pub fn new(
        bus: B,
        irq_rx: Receiver<IrqSignal>,
        clock: C,
        config: &RadioConfig,
    ) -> Result<Self, LinkError> {
        config.validate()?;
        let cipher = match config.cipher_key_bytes()? {
            Some(key) => Some(cipher::from_key(&key)?),
            None => None,
        };

        let started = clock.now();
        let mut lora = Self {
            bus,
            clock,
            irq_rx,
            state: RadioStateMachine::new(config.invert_iq_on_tx),
            this_address: config.this_address,
            receive_all: config.receive_all,
            acks: config.acks,
            forward_raw: config.forward_raw,
            modem: config.modem,
            frequency: FrequencyConfig::from_mhz(config.frequency_mhz),
            tx_power: TxPower::new(config.tx_power_dbm),
            sync_word: config.sync_word,
            preamble_len: config.preamble_len,
            timing: config.timing.clone(),
            cipher,
            last_header_id: 0,
            pending_ack: None,
            cad_detected: None,
            counters: RxCounters::default(),
            raw_frames: VecDeque::new(),
            on_recv: None,
            started,
        };
        lora.init()?;
        Ok(lora)
    }

    fn init(&mut self) -> Result<(), LinkError> {
        self.state.force(&mut self.bus, RadioMode::Sleep)?;
        self.clock.sleep(INIT_SETTLE);

        let expected = LONG_RANGE_MODE | MODE_SLEEP;
        let actual = self.bus.read_register(REG_01_OP_MODE)?;
        if actual != expected {
            return Err(LinkError::InitFailed { expected, actual });
        }

        self.bus.write_register(REG_0E_FIFO_TX_BASE_ADDR, 0)?;
        self.bus.write_register(REG_0F_FIFO_RX_BASE_ADDR, 0)?;
        self.state.enter_standby(&mut self.bus)?;

        self.write_modem_profile(self.modem)?;
        let [msb, lsb] = self.preamble_len.to_be_bytes();
        self.bus.write_register(REG_20_PREAMBLE_MSB, msb)?;
        self.bus.write_register(REG_21_PREAMBLE_LSB, lsb)?;
        self.write_frequency(self.frequency)?;

        let (pa_dac, pa_config) = self.tx_power.registers();
        self.bus.write_register(REG_4D_PA_DAC, pa_dac)?;
        self.bus.write_register(REG_09_PA_CONFIG, pa_config)?;
        self.bus.write_register(REG_39_SYNC_WORD, self.sync_word)?;

        info!(
            "LoRa radio ready: address {}, {:.3} MHz, {} dBm, {}",
            self.this_address,
            self.frequency.mhz(),
            self.tx_power.dbm(),
            self.modem
        );
        Ok(())
    }

    /// Replace the cipher capability
    pub fn set_cipher(&mut self, cipher: Option<Box<dyn BlockCipher>>) {
        self.cipher = cipher;
    }

    /// Install the receive callback
    pub fn on_recv(&mut self, callback: ReceiveCallback) {
        self.on_recv = Some(callback);
    }

    pub fn mode(&self) -> RadioMode {
        self.state.mode()
    }

    pub fn this_address(&self) -> u8 {
        self.this_address
    }

    pub fn modem_profile(&self) -> ModemProfile {
        self.modem
    }

    pub fn frequency(&self) -> FrequencyConfig {
        self.frequency
    }

    pub fn preamble_len(&self) -> u16 {
        self.preamble_len
    }

    pub fn timing(&self) -> &LinkTiming {
        &self.timing
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn counters(&self) -> RxCounters {
        self.counters
    }

    /// Sequence id of the most recent reliable send
    pub fn last_header_id(&self) -> u8 {
        self.last_header_id
    }

    /// Last accepted packet, acknowledgements included
    pub fn last_packet(&self) -> Option<&Packet> {
        self.pending_ack.as_ref()
    }

    /// Take the oldest queued raw frame (gateway role)
    pub fn pop_raw_frame(&mut self) -> Option<RawFrame> {
        self.raw_frames.pop_front()
    }

    /// Milliseconds since the driver started, wrapping at `u32::MAX`
    pub fn tick_ms(&self) -> u32 {
        self.clock.now().saturating_duration_since(self.started).as_millis() as u32
    }

    /// Change the active modem profile; restored after every transmission
    pub fn set_modem_profile(&mut self, profile: ModemProfile) -> Result<(), LinkError> {
        self.modem = profile;
        self.write_modem_profile(profile)
    }

    /// Change the active carrier; restored after every transmission
    pub fn set_frequency(&mut self, frequency: FrequencyConfig) -> Result<(), LinkError> {
        self.frequency = frequency;
        self.write_frequency(frequency)
    }

    pub(crate) fn write_modem_profile(&mut self, profile: ModemProfile) -> Result<(), LinkError> {
        self.bus.write_register(REG_1D_MODEM_CONFIG1, profile.config1)?;
        self.bus.write_register(REG_1E_MODEM_CONFIG2, profile.config2)?;
        self.bus.write_register(REG_26_MODEM_CONFIG3, profile.config3)?;
        Ok(())
    }

    pub(crate) fn write_frequency(&mut self, frequency: FrequencyConfig) -> Result<(), LinkError> {
        self.bus.write(REG_06_FRF_MSB, &frequency.registers())?;
        Ok(())
    }

    /// Enter continuous receive
    pub fn listen(&mut self) -> Result<(), LinkError> {
        self.state.enter_receive_continuous(&mut self.bus)?;
        Ok(())
    }

    pub fn standby(&mut self) -> Result<(), LinkError> {
        self.state.enter_standby(&mut self.bus)?;
        Ok(())
    }

    pub fn sleep(&mut self) -> Result<(), LinkError> {
        self.state.enter_sleep(&mut self.bus)?;
        Ok(())
    }

    /// Run the interrupt handler once per signal posted since the last call.
    ///
    /// Acknowledgements requested by the handler are sent here, after the
    /// handler has cleared the IRQ flags. Returns the number of signals
    /// handled.
    pub fn service_interrupts(&mut self) -> Result<usize, LinkError> {
        let mut handled = 0;
        loop {
            match self.irq_rx.try_recv() {
                Ok(IrqSignal) => {
                    handled += 1;
                    if let Some(ack) = interrupt::handle_interrupt(self)? {
                        self.send_ack(ack.source, ack.id)?;
                    }
                }
                // A closed channel means the interrupt line is gone; polling
                // loops still end on their deadlines.
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(handled)
    }

    /// Service interrupts, then sleep one poll interval
    pub(crate) fn poll_once(&mut self) -> Result<(), LinkError> {
        self.service_interrupts()?;
        self.clock.sleep(self.timing.poll_interval());
        Ok(())
    }

    /// Block until the handler has seen TX_DONE or the send timeout expires
    pub fn wait_packet_sent(&mut self) -> Result<bool, LinkError> {
        let deadline = self.clock.now() + self.timing.wait_packet_sent_timeout();
        loop {
            self.service_interrupts()?;
            if self.state.mode() != RadioMode::Transmitting {
                return Ok(true);
            }
            if self.clock.now() >= deadline {
                warn!("Transmit did not complete within {:?}", self.timing.wait_packet_sent_timeout());
                return Ok(false);
            }
            self.clock.sleep(self.timing.poll_interval());
        }
    }

    /// Transmit one addressed frame without waiting for completion.
    ///
    /// Returns `Ok(false)` when the channel is busy.
    pub fn send(
        &mut self,
        payload: &[u8],
        destination: u8,
        id: u8,
        flags: HeaderFlags,
    ) -> Result<bool, LinkError> {
        let header = Header::new(destination, self.this_address, id, flags);
        let bytes = frame::encode(&header, payload, self.cipher.as_deref());
        if bytes.len() > MAX_FRAME_LEN {
            return Err(LinkError::FrameTooLarge(bytes.len()));
        }

        self.wait_packet_sent()?;
        self.state.enter_standby(&mut self.bus)?;
        if !cad::wait_clear(self)? {
            warn!("Channel busy, frame to {} id {} not sent", destination, id);
            return Ok(false);
        }

        self.start_transmit(&bytes)?;
        debug!("TX to {} id {} flags 0x{:02x}: {}", destination, id, flags.bits(), frame_hex(payload));
        Ok(true)
    }

    /// Acknowledge frame `id` from `destination` and wait for it to go out
    pub fn send_ack(&mut self, destination: u8, id: u8) -> Result<bool, LinkError> {
        if !self.send(ACK_PAYLOAD, destination, id, HeaderFlags::ACK)? {
            return Ok(false);
        }
        self.wait_packet_sent()
    }

    /// Transmit `frame` verbatim on a temporary modem profile and carrier.
    ///
    /// The configured profile and frequency come back when the handler sees
    /// TX_DONE. Returns `Ok(false)` when the channel is busy.
    pub fn send_retuned(
        &mut self,
        frame: &[u8],
        profile: ModemProfile,
        frequency: FrequencyConfig,
    ) -> Result<bool, LinkError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(LinkError::FrameTooLarge(frame.len()));
        }

        self.wait_packet_sent()?;
        self.state.enter_standby(&mut self.bus)?;
        self.write_modem_profile(profile)?;
        self.write_frequency(frequency)?;
        if !cad::wait_clear(self)? {
            warn!("Channel busy at {:.3} MHz, retuned frame not sent", frequency.mhz());
            self.restore_profile()?;
            return Ok(false);
        }

        self.start_transmit(frame)?;
        debug!(
            "TX retuned {:.3} MHz {}: {}",
            frequency.mhz(),
            profile.datr(),
            frame_hex(frame)
        );
        Ok(true)
    }

    /// Write the configured profile and carrier back to the chip
    pub(crate) fn restore_profile(&mut self) -> Result<(), LinkError> {
        self.write_modem_profile(self.modem)?;
        self.write_frequency(self.frequency)
    }

    fn start_transmit(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.bus.write_register(REG_0D_FIFO_ADDR_PTR, 0)?;
        self.bus.write(REG_00_FIFO, bytes)?;
        self.bus.write_register(REG_22_PAYLOAD_LENGTH, bytes.len() as u8)?;
        self.state.enter_transmit(&mut self.bus)?;
        Ok(())
    }

    pub(crate) fn queue_raw_frame(&mut self, frame: RawFrame) {
        if self.raw_frames.len() >= RAW_QUEUE_LIMIT {
            warn!("Raw frame queue full, dropping oldest");
            self.raw_frames.pop_front();
        }
        self.raw_frames.push_back(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::radio::hal::SimulatedRadio;

    fn radio(config: &RadioConfig) -> (LoRa<SimulatedRadio, ManualClock>, SimulatedRadio) {
        let (sim, irq) = SimulatedRadio::new();
        let lora = LoRa::new(sim.clone(), irq, ManualClock::new(), config).unwrap();
        (lora, sim)
    }

    #[test]
    fn test_init_programs_registers() {
        let mut config = RadioConfig::new(2);
        config.frequency_mhz = 915.0;
        let (lora, sim) = radio(&config);

        assert_eq!(lora.mode(), RadioMode::Standby);
        assert_eq!(sim.register(REG_01_OP_MODE), LONG_RANGE_MODE | MODE_STDBY);
        assert_eq!(sim.register(REG_1D_MODEM_CONFIG1), 0x72);
        assert_eq!(sim.register(REG_1E_MODEM_CONFIG2), 0x74);
        assert_eq!(sim.register(REG_26_MODEM_CONFIG3), 0x04);
        assert_eq!(sim.register(REG_21_PREAMBLE_LSB), 8);
        assert_eq!(
            [sim.register(0x06), sim.register(0x07), sim.register(0x08)],
            [0xE4, 0xC0, 0x00]
        );
        assert_eq!(sim.register(REG_4D_PA_DAC), PA_DAC_ENABLE);
        assert_eq!(sim.register(REG_09_PA_CONFIG), 0x86);
        assert_eq!(sim.register(REG_39_SYNC_WORD), 0x34);
    }

    #[test]
    fn test_init_fails_on_mode_mismatch() {
        let (sim, irq) = SimulatedRadio::new();
        sim.set_stuck_op_mode(Some(0x00));
        let result = LoRa::new(sim, irq, ManualClock::new(), &RadioConfig::new(2));
        assert!(matches!(
            result,
            Err(LinkError::InitFailed {
                expected: 0x80,
                actual: 0x00
            })
        ));
    }

    #[test]
    fn test_send_writes_frame_and_completes() {
        let (mut lora, sim) = radio(&RadioConfig::new(2));
        assert!(lora.send(b"hi", 7, 3, HeaderFlags::empty()).unwrap());
        assert_eq!(lora.mode(), RadioMode::Transmitting);

        assert!(lora.wait_packet_sent().unwrap());
        assert_eq!(lora.mode(), RadioMode::ReceivingContinuous);
        assert_eq!(sim.transmitted(), vec![vec![7, 2, 3, 0, b'h', b'i']]);
    }

    #[test]
    fn test_send_rejects_oversized_frame() {
        let (mut lora, sim) = radio(&RadioConfig::new(2));
        let payload = [0u8; 252];
        assert!(matches!(
            lora.send(&payload, 7, 1, HeaderFlags::empty()),
            Err(LinkError::FrameTooLarge(256))
        ));
        assert!(sim.transmitted().is_empty());
    }

    #[test]
    fn test_retuned_send_restores_profile() {
        let (mut lora, sim) = radio(&RadioConfig::new(2));
        let downlink = ModemProfile::for_transmit(500_000, 12).unwrap();

        assert!(lora
            .send_retuned(&[0x60, 1, 2], downlink, FrequencyConfig::from_mhz(923.3))
            .unwrap());
        assert_eq!(sim.register(REG_1D_MODEM_CONFIG1), 0x92);
        assert_eq!(sim.transmitted(), vec![vec![0x60, 1, 2]]);

        assert!(lora.wait_packet_sent().unwrap());
        assert_eq!(sim.register(REG_1D_MODEM_CONFIG1), 0x72);
        assert_eq!(sim.register(REG_1E_MODEM_CONFIG2), 0x74);
        assert_eq!(sim.register(0x06), FrequencyConfig::from_mhz(868.0).registers()[0]);
    }
}
