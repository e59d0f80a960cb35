//! Operating mode state machine for the SX127x in LoRa mode.
//!
//! Every mode change goes through [`RadioStateMachine::enter`], which skips
//! the bus entirely when the chip is already in the requested mode. Entering a
//! mode also maps DIO0 to that mode's completion interrupt and, when IQ
//! inversion on transmit is enabled, switches the IQ registers.

use crate::radio::hal::{BusError, RegisterBus};
use crate::radio::registers::*;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Sleep,
    Standby,
    Transmitting,
    ReceivingContinuous,
    ChannelActivityDetection,
}

impl RadioMode {
    /// Mode bits of `REG_01_OP_MODE`
    pub fn op_mode_bits(self) -> u8 {
        match self {
            RadioMode::Sleep => MODE_SLEEP,
            RadioMode::Standby => MODE_STDBY,
            RadioMode::Transmitting => MODE_TX,
            RadioMode::ReceivingContinuous => MODE_RXCONTINUOUS,
            RadioMode::ChannelActivityDetection => MODE_CAD,
        }
    }

    /// DIO0 mapping for modes that complete with an interrupt
    fn dio0_mapping(self) -> Option<u8> {
        match self {
            RadioMode::Transmitting => Some(DIO0_TX_DONE),
            RadioMode::ReceivingContinuous => Some(DIO0_RX_DONE),
            RadioMode::ChannelActivityDetection => Some(DIO0_CAD_DONE),
            RadioMode::Sleep | RadioMode::Standby => None,
        }
    }
}

#[derive(Debug)]
pub struct RadioStateMachine {
    mode: RadioMode,
    invert_iq_on_tx: bool,
}

impl RadioStateMachine {
    pub fn new(invert_iq_on_tx: bool) -> Self {
        Self {
            mode: RadioMode::Sleep,
            invert_iq_on_tx,
        }
    }

    pub fn mode(&self) -> RadioMode {
        self.mode
    }

    /// Enter `mode`. Returns `false` without touching the bus if the chip is
    /// already there.
    pub fn enter<B: RegisterBus>(&mut self, bus: &mut B, mode: RadioMode) -> Result<bool, BusError> {
        if self.mode == mode {
            return Ok(false);
        }
        self.write_mode(bus, mode)?;
        Ok(true)
    }

    /// Write `mode` unconditionally (startup, where the chip state is unknown)
    pub fn force<B: RegisterBus>(&mut self, bus: &mut B, mode: RadioMode) -> Result<(), BusError> {
        self.write_mode(bus, mode)
    }

    fn write_mode<B: RegisterBus>(&mut self, bus: &mut B, mode: RadioMode) -> Result<(), BusError> {
        if self.invert_iq_on_tx {
            match mode {
                RadioMode::Transmitting => {
                    bus.write_register(REG_33_INVERT_IQ, INVERT_IQ_TX)?;
                    bus.write_register(REG_3B_INVERT_IQ2, INVERT_IQ2_TX)?;
                }
                RadioMode::ReceivingContinuous => {
                    bus.write_register(REG_33_INVERT_IQ, INVERT_IQ_RX)?;
                    bus.write_register(REG_3B_INVERT_IQ2, INVERT_IQ2_RX)?;
                }
                _ => {}
            }
        }
        if let Some(mapping) = mode.dio0_mapping() {
            bus.write_register(REG_40_DIO_MAPPING1, mapping)?;
        }

        bus.write_register(REG_01_OP_MODE, LONG_RANGE_MODE | mode.op_mode_bits())?;
        let previous = self.mode;
        self.mode = mode;

        debug!("Radio mode {:?} -> {:?}", previous, mode);
        Ok(())
    }

    pub fn enter_sleep<B: RegisterBus>(&mut self, bus: &mut B) -> Result<bool, BusError> {
        self.enter(bus, RadioMode::Sleep)
    }

    pub fn enter_standby<B: RegisterBus>(&mut self, bus: &mut B) -> Result<bool, BusError> {
        self.enter(bus, RadioMode::Standby)
    }

    pub fn enter_transmit<B: RegisterBus>(&mut self, bus: &mut B) -> Result<bool, BusError> {
        self.enter(bus, RadioMode::Transmitting)
    }

    pub fn enter_receive_continuous<B: RegisterBus>(&mut self, bus: &mut B) -> Result<bool, BusError> {
        self.enter(bus, RadioMode::ReceivingContinuous)
    }

    pub fn enter_cad<B: RegisterBus>(&mut self, bus: &mut B) -> Result<bool, BusError> {
        self.enter(bus, RadioMode::ChannelActivityDetection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::hal::SimulatedRadio;

    #[test]
    fn test_enter_is_idempotent() {
        let (mut sim, _irq) = SimulatedRadio::new();
        let mut sm = RadioStateMachine::new(false);

        assert!(sm.enter_standby(&mut sim).unwrap());
        assert_eq!(sim.register(REG_01_OP_MODE), LONG_RANGE_MODE | MODE_STDBY);

        sim.clear_write_log();
        assert!(!sm.enter_standby(&mut sim).unwrap());
        assert!(sim.write_log().is_empty());
    }

    #[test]
    fn test_dio_mapping_per_mode() {
        let (mut sim, _irq) = SimulatedRadio::new();
        let mut sm = RadioStateMachine::new(false);

        sm.enter_receive_continuous(&mut sim).unwrap();
        assert_eq!(sim.register(REG_40_DIO_MAPPING1), DIO0_RX_DONE);

        sm.enter_cad(&mut sim).unwrap();
        assert_eq!(sim.register(REG_40_DIO_MAPPING1), DIO0_CAD_DONE);

        sm.enter_transmit(&mut sim).unwrap();
        assert_eq!(sim.register(REG_40_DIO_MAPPING1), DIO0_TX_DONE);
        assert_eq!(sm.mode(), RadioMode::Transmitting);
    }

    #[test]
    fn test_iq_inversion_only_when_enabled() {
        let (mut sim, _irq) = SimulatedRadio::new();
        let mut plain = RadioStateMachine::new(false);
        plain.enter_transmit(&mut sim).unwrap();
        assert_eq!(sim.register(REG_33_INVERT_IQ), 0);

        let (mut sim, _irq) = SimulatedRadio::new();
        let mut inverted = RadioStateMachine::new(true);
        inverted.enter_transmit(&mut sim).unwrap();
        assert_eq!(sim.register(REG_33_INVERT_IQ), INVERT_IQ_TX);
        assert_eq!(sim.register(REG_3B_INVERT_IQ2), INVERT_IQ2_TX);

        inverted.enter_receive_continuous(&mut sim).unwrap();
        assert_eq!(sim.register(REG_33_INVERT_IQ), INVERT_IQ_RX);
        assert_eq!(sim.register(REG_3B_INVERT_IQ2), INVERT_IQ2_RX);
    }
}
