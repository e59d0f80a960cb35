//! Channel Activity Detection gate for Listen Before Talk.
//!
//! Every transmit attempt calls [`wait_clear`] first. With no CAD timeout
//! configured the gate is open. Otherwise the chip runs one CAD cycle and the
//! gate opens only if CAD_DONE arrives without CAD_DETECTED before the
//! deadline.

use crate::clock::Clock;
use crate::error::LinkError;
use crate::radio::driver::LoRa;
use crate::radio::hal::RegisterBus;
use crate::radio::state::RadioMode;
use log::{debug, warn};

/// Returns `true` when the channel is clear (or CAD is disabled), `false` on
/// detected activity or when no result arrives in time.
pub fn wait_clear<B: RegisterBus, C: Clock>(lora: &mut LoRa<B, C>) -> Result<bool, LinkError> {
    let Some(timeout) = lora.timing.cad_timeout() else {
        return Ok(true);
    };

    lora.cad_detected = None;
    lora.state.enter_cad(&mut lora.bus)?;
    let deadline = lora.clock.now() + timeout;

    loop {
        lora.service_interrupts()?;
        if let Some(detected) = lora.cad_detected.take() {
            if detected {
                debug!("CAD: channel activity detected");
            }
            return Ok(!detected);
        }
        if lora.clock.now() >= deadline {
            warn!("CAD result not received within {:?}", timeout);
            // Abandon the CAD cycle so the next transmit starts from standby
            if lora.state.mode() == RadioMode::ChannelActivityDetection {
                lora.state.enter_standby(&mut lora.bus)?;
            }
            return Ok(false);
        }
        lora.clock.sleep(lora.timing.poll_interval());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RadioConfig;
    use crate::radio::hal::sim::CadResponse;
    use crate::radio::hal::SimulatedRadio;

    fn radio_with_cad() -> (LoRa<SimulatedRadio, ManualClock>, SimulatedRadio) {
        let mut config = RadioConfig::new(2);
        config.timing.cad_timeout_ms = Some(50);
        let (sim, irq) = SimulatedRadio::new();
        let lora = LoRa::new(sim.clone(), irq, ManualClock::new(), &config).unwrap();
        (lora, sim)
    }

    #[test]
    fn test_gate_open_without_timeout() {
        let (sim, irq) = SimulatedRadio::new();
        let mut lora = LoRa::new(sim.clone(), irq, ManualClock::new(), &RadioConfig::new(2)).unwrap();
        sim.set_cad_response(CadResponse::Busy);
        assert!(wait_clear(&mut lora).unwrap());
        assert_eq!(lora.mode(), RadioMode::Standby);
    }

    #[test]
    fn test_clear_and_busy_channel() {
        let (mut lora, sim) = radio_with_cad();
        assert!(wait_clear(&mut lora).unwrap());
        assert_eq!(lora.mode(), RadioMode::Standby);

        sim.set_cad_response(CadResponse::Busy);
        assert!(!wait_clear(&mut lora).unwrap());
        assert_eq!(lora.mode(), RadioMode::Standby);
    }

    #[test]
    fn test_cad_timeout_closes_gate() {
        let (mut lora, sim) = radio_with_cad();
        sim.set_cad_response(CadResponse::Silent);
        let start = lora.clock().now();

        assert!(!wait_clear(&mut lora).unwrap());
        assert!(lora.clock().now() - start >= std::time::Duration::from_millis(50));
        assert_eq!(lora.mode(), RadioMode::Standby);
    }
}
