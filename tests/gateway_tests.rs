//! Gateway forwarding and downlink scheduling with a scripted network server.

use lora_link::clock::ManualClock;
use lora_link::config::{GatewayConfig, RadioConfig};
use lora_link::gateway::{DownlinkBatch, Gateway, UplinkTransport};
use lora_link::radio::hal::SimulatedRadio;
use lora_link::radio::registers::*;
use lora_link::{LoRa, RadioMode};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct ServerState {
    datagrams: Vec<Vec<u8>>,
    ack: bool,
    unanswered: bool,
}

/// In-memory network server; answers each PUSH_DATA with a PUSH_ACK when `ack` is set
#[derive(Clone, Default)]
struct ScriptedServer {
    state: Arc<Mutex<ServerState>>,
}

impl ScriptedServer {
    fn set_ack(&self, ack: bool) {
        self.state.lock().unwrap().ack = ack;
    }

    fn datagrams(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().datagrams.clone()
    }
}

impl UplinkTransport for ScriptedServer {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.datagrams.push(datagram.to_vec());
        state.unanswered = true;
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<Option<usize>> {
        let mut state = self.state.lock().unwrap();
        if !(state.ack && state.unanswered) {
            return Ok(None);
        }
        state.unanswered = false;
        let last = state.datagrams.last().cloned().unwrap_or_default();
        buf[..4].copy_from_slice(&[2, last[1], last[2], 1]);
        Ok(Some(4))
    }
}

fn gateway_config() -> GatewayConfig {
    serde_json::from_value(serde_json::json!({
        "server": "127.0.0.1",
        "gateway_id": "b827ebfffe000001",
        "latitude": 46.24,
        "longitude": 3.2523,
        "altitude": 145
    }))
    .unwrap()
}

fn gateway() -> (
    Gateway<SimulatedRadio, ManualClock, ScriptedServer>,
    SimulatedRadio,
    ScriptedServer,
    ManualClock,
) {
    let mut config = RadioConfig::new(1);
    config.forward_raw = true;
    config.invert_iq_on_tx = true;

    let (sim, irq) = SimulatedRadio::new();
    let clock = ManualClock::new();
    let radio = LoRa::new(sim.clone(), irq, clock.clone(), &config).unwrap();
    let server = ScriptedServer::default();
    let gateway = Gateway::new(radio, server.clone(), &gateway_config()).unwrap();
    (gateway, sim, server, clock)
}

fn body(datagram: &[u8]) -> serde_json::Value {
    serde_json::from_slice(&datagram[12..]).unwrap()
}

#[test]
fn test_uplink_datagram_and_forwarded_counter() {
    let (mut gw, sim, server, _clock) = gateway();
    gw.radio_mut().listen().unwrap();
    server.set_ack(true);

    let frame = [0x40, 0xda, 0x1b, 0x01, 0x26, 0x00, 0x01, 0x00, 0x0a, 0xca, 0xfe];
    sim.inject(&frame);
    gw.poll(None).unwrap();

    let datagrams = server.datagrams();
    assert_eq!(datagrams.len(), 1);
    assert_eq!(&datagrams[0][..1], &[2]);
    assert_eq!(datagrams[0][3], 0);
    assert_eq!(&datagrams[0][4..12], &[0xb8, 0x27, 0xeb, 0xff, 0xfe, 0, 0, 1]);

    let json = body(&datagrams[0]);
    assert_eq!(json["rxpk"][0]["size"], frame.len());
    assert_eq!(json["rxpk"][0]["stat"], 1);
    assert_eq!(json["rxpk"][0]["freq"], 868.0);
    assert_eq!(json["stat"]["rxnb"], 1);
    assert_eq!(json["stat"]["rxok"], 1);
    assert_eq!(gw.status().rxfw, 1);
    assert_eq!(gw.status().ackr, 100.0);
}

#[test]
fn test_forwarded_counter_only_moves_on_ack() {
    let (mut gw, sim, server, _clock) = gateway();
    gw.radio_mut().listen().unwrap();

    server.set_ack(true);
    sim.inject(&[0x40, 1, 2, 3, 4, 5]);
    gw.poll(None).unwrap();
    assert_eq!(gw.status().rxfw, 1);

    server.set_ack(false);
    sim.inject(&[0x40, 6, 7, 8, 9, 10]);
    gw.poll(None).unwrap();
    assert_eq!(gw.status().rxfw, 1);
    assert_eq!(gw.status().ackr, 50.0);

    sim.inject_with_crc_error(&[0x40, 0xff]);
    gw.poll(None).unwrap();
    let datagrams = server.datagrams();
    assert_eq!(datagrams.len(), 3);
    assert_eq!(body(&datagrams[2])["rxpk"][0]["stat"], -1);

    let status = gw.status();
    assert_eq!(status.rxnb, 3);
    assert_eq!(status.rxok, 2);
    assert_eq!(status.rxfw, 1);
}

#[test]
fn test_tokens_roll_per_uplink() {
    let (mut gw, sim, server, _clock) = gateway();
    gw.radio_mut().listen().unwrap();

    sim.inject(&[0x40, 1, 2, 3, 4]);
    sim.inject(&[0x40, 5, 6, 7, 8]);
    gw.poll(None).unwrap();

    let datagrams = server.datagrams();
    assert_eq!(datagrams.len(), 2);
    let first = u16::from_be_bytes([datagrams[0][1], datagrams[0][2]]);
    let second = u16::from_be_bytes([datagrams[1][1], datagrams[1][2]]);
    assert_eq!(second, first.wrapping_add(1));
}

const BATCH: &str = r#"{"items": [
    {"txInfo": {"frequency": 923300000,
                "modulation": {"lora": {"bandwidth": 500000, "spreadingFactor": 10}},
                "timing": {"delay": {"delay": "2s"}}},
     "phyPayload": "YAIC"},
    {"txInfo": {"frequency": 923900000,
                "modulation": {"lora": {"bandwidth": 500000, "spreadingFactor": 10}},
                "timing": {"delay": {"delay": ["1"]}}},
     "phyPayload": "YAEB"}
]}"#;

#[test]
fn test_downlinks_dropped_before_first_uplink() {
    let (mut gw, _sim, _server, _clock) = gateway();
    let batch = DownlinkBatch::from_json(BATCH.as_bytes()).unwrap();
    assert_eq!(gw.accept_downlinks(&batch), 0);
    assert_eq!(gw.pending_downlinks(), 0);
    assert_eq!(gw.status().dwnb, 0);
}

#[test]
fn test_downlinks_sent_in_deadline_order_and_profile_restored() {
    let (mut gw, sim, server, clock) = gateway();
    gw.radio_mut().listen().unwrap();
    server.set_ack(true);

    sim.inject(&[0x40, 1, 2, 3, 4]);
    gw.poll(None).unwrap();

    let batch = DownlinkBatch::from_json(BATCH.as_bytes()).unwrap();
    assert_eq!(gw.accept_downlinks(&batch), 2);
    assert_eq!(gw.pending_downlinks(), 2);
    assert_eq!(gw.dispatch_due().unwrap(), 0);

    clock.advance(Duration::from_secs(1));
    assert_eq!(gw.dispatch_due().unwrap(), 1);
    assert_eq!(sim.transmitted().last().unwrap(), &vec![0x60, 0x01, 0x01]);
    assert_eq!(gw.pending_downlinks(), 1);

    // The configured profile and carrier are back once the downlink is out
    assert_eq!(gw.radio().mode(), RadioMode::ReceivingContinuous);
    assert_eq!(sim.register(REG_1D_MODEM_CONFIG1), 0x72);
    assert_eq!(sim.register(REG_1E_MODEM_CONFIG2), 0x74);
    assert_eq!(
        [
            sim.register(REG_06_FRF_MSB),
            sim.register(REG_07_FRF_MID),
            sim.register(REG_08_FRF_LSB)
        ],
        [0xD9, 0x00, 0x00]
    );

    clock.advance(Duration::from_secs(1));
    assert_eq!(gw.dispatch_due().unwrap(), 1);
    assert_eq!(sim.transmitted().last().unwrap(), &vec![0x60, 0x02, 0x02]);
    assert_eq!(gw.pending_downlinks(), 0);

    let status = gw.status();
    assert_eq!(status.dwnb, 2);
    assert_eq!(status.txnb, 2);
}

#[test]
fn test_downlink_tx_inverts_iq_on_gateway() {
    let (mut gw, sim, server, clock) = gateway();
    gw.radio_mut().listen().unwrap();
    server.set_ack(true);
    sim.inject(&[0x40, 1, 2, 3, 4]);
    gw.poll(None).unwrap();

    let batch = DownlinkBatch::from_json(BATCH.as_bytes()).unwrap();
    gw.accept_downlinks(&batch);
    sim.clear_write_log();
    clock.advance(Duration::from_secs(3));
    assert_eq!(gw.dispatch_due().unwrap(), 2);

    let log = sim.write_log();
    assert!(log.contains(&(REG_33_INVERT_IQ, vec![INVERT_IQ_TX])));
    let tx_mode = (REG_01_OP_MODE, vec![LONG_RANGE_MODE | MODE_TX]);
    assert_eq!(log.iter().filter(|entry| **entry == tx_mode).count(), 2);

    // Listening again with normal polarity
    assert_eq!(sim.register(REG_33_INVERT_IQ), INVERT_IQ_RX);
}
