//! # Single-Channel Gateway
//!
//! Forwards every frame the radio receives to a network server as a Semtech
//! UDP PUSH_DATA datagram and transmits the downlinks the server side
//! schedules in reply.
//!
//! ```text
//!  radio RX ──► RawFrame queue ──► PUSH_DATA ──► UplinkTransport ──► server
//!                                                     ◄── PUSH_ACK (bounded wait)
//!  downlink JSON ──► DownlinkQueue (by deadline) ──► retuned single-shot TX
//! ```
//!
//! Uplink failures are logged and never retried; the loop moves on to the
//! next received frame. Downlink transmission blocks for the time on air, so
//! a long downlink delays whatever is queued behind it.

pub mod downlink;
pub mod transport;
pub mod uplink;

pub use downlink::{DownlinkBatch, DownlinkItem, DownlinkQueue, ScheduledDownlink};
pub use transport::{UdpTransport, UplinkTransport};
pub use uplink::{GatewayStatus, Rxpk};

use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::error::LinkError;
use crate::logging::{frame_hex, LogThrottle};
use crate::radio::driver::{LoRa, RawFrame};
use crate::radio::hal::RegisterBus;
use crate::radio::state::RadioMode;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

/// Transport warnings allowed per window
const WARN_CAP: u32 = 5;
const WARN_WINDOW_MS: u64 = 60_000;

/// Extra time allowed past the computed time on air for TX_DONE
const TX_DONE_SLACK: Duration = Duration::from_millis(50);

pub struct Gateway<B: RegisterBus, C: Clock, T: UplinkTransport> {
    radio: LoRa<B, C>,
    transport: T,
    gateway_id: [u8; 8],
    token: u16,
    status: GatewayStatus,
    uplinks_sent: u32,
    ack_timeout: Duration,
    overhead: Duration,
    downlinks: DownlinkQueue,
    last_uplink: Option<Instant>,
    throttle: LogThrottle,
}

impl<B: RegisterBus, C: Clock, T: UplinkTransport> Gateway<B, C, T> {
    pub fn new(radio: LoRa<B, C>, transport: T, config: &GatewayConfig) -> Result<Self, LinkError> {
        Ok(Self {
            radio,
            transport,
            gateway_id: config.gateway_id_bytes()?,
            token: rand::random(),
            status: GatewayStatus::new(config.latitude, config.longitude, config.altitude),
            uplinks_sent: 0,
            ack_timeout: config.ack_timeout(),
            overhead: config.downlink_overhead(),
            downlinks: DownlinkQueue::new(),
            last_uplink: None,
            throttle: LogThrottle::new(WARN_WINDOW_MS, WARN_CAP),
        })
    }

    pub fn radio(&self) -> &LoRa<B, C> {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut LoRa<B, C> {
        &mut self.radio
    }

    /// Current status counters, receive counts taken from the radio
    pub fn status(&self) -> GatewayStatus {
        let mut status = self.status.clone();
        let counters = self.radio.counters();
        status.rxnb = counters.received;
        status.rxok = counters.crc_ok;
        status
    }

    pub fn pending_downlinks(&self) -> usize {
        self.downlinks.len()
    }

    /// Forward one received frame. Returns whether the server acknowledged it.
    pub fn forward(&mut self, frame: &RawFrame, now: DateTime<Utc>) -> Result<bool, LinkError> {
        self.last_uplink = Some(frame.received_at);
        self.token = self.token.wrapping_add(1);

        let rxpk = Rxpk::from_frame(
            frame,
            self.radio.frequency().mhz(),
            &self.radio.modem_profile(),
            now,
        );
        let mut status = self.status();
        status.stamp(now);
        let datagram = uplink::encode_push_data(self.token, &self.gateway_id, &rxpk, &status)?;
        self.status.time = status.time;

        debug!("Forwarding {} byte frame: {}", frame.data.len(), frame_hex(&frame.data));
        self.uplinks_sent = self.uplinks_sent.wrapping_add(1);
        if let Err(e) = self.transport.send(&datagram) {
            if self.throttle.allow() {
                warn!("Uplink send failed: {}", e);
            }
            self.update_ack_ratio();
            return Ok(false);
        }

        let acked = self.wait_push_ack();
        if acked {
            self.status.rxfw = self.status.rxfw.wrapping_add(1);
            info!("Uplink {} acknowledged ({} forwarded)", self.token, self.status.rxfw);
        }
        self.update_ack_ratio();
        Ok(acked)
    }

    fn wait_push_ack(&mut self) -> bool {
        let clock_deadline = self.radio.clock().now() + self.ack_timeout;
        let mut buf = [0u8; 64];
        loop {
            let remaining = clock_deadline.saturating_duration_since(self.radio.clock().now());
            if remaining.is_zero() {
                break;
            }
            match self.transport.recv(&mut buf, remaining) {
                Ok(Some(n)) if uplink::is_push_ack(&buf[..n], self.token) => return true,
                Ok(Some(n)) => debug!("Ignoring {} byte reply: {}", n, frame_hex(&buf[..n])),
                Ok(None) => break,
                Err(e) => {
                    if self.throttle.allow() {
                        warn!("Uplink ack receive failed: {}", e);
                    }
                    return false;
                }
            }
        }
        if self.throttle.allow() {
            warn!("No PUSH_ACK for token {} within {:?}", self.token, self.ack_timeout);
        }
        false
    }

    fn update_ack_ratio(&mut self) {
        if self.uplinks_sent > 0 {
            let ratio = self.status.rxfw as f64 * 100.0 / self.uplinks_sent as f64;
            self.status.ackr = (ratio * 10.0).round() / 10.0;
        }
    }

    /// Queue a batch of downlinks against the most recent uplink. Returns the
    /// number of items accepted.
    pub fn accept_downlinks(&mut self, batch: &DownlinkBatch) -> usize {
        let Some(last_uplink) = self.last_uplink else {
            warn!("Dropping {} downlinks: no uplink received yet", batch.items.len());
            return 0;
        };

        let now = self.radio.clock().now();
        debug!(
            "Downlink batch {:?} after last uplink",
            now.saturating_duration_since(last_uplink)
        );

        let mut accepted = 0;
        for item in &batch.items {
            match item.schedule(last_uplink, self.overhead) {
                Ok(scheduled) => {
                    self.downlinks.push(scheduled);
                    accepted += 1;
                }
                Err(e) => warn!("Rejected downlink item: {}", e),
            }
        }
        self.status.dwnb = self.status.dwnb.wrapping_add(accepted as u32);
        info!("Scheduled {} downlinks, {} queued", accepted, self.downlinks.len());
        accepted
    }

    /// Transmit every downlink whose deadline has passed, earliest first
    pub fn dispatch_due(&mut self) -> Result<usize, LinkError> {
        let mut sent = 0;
        while let Some(item) = self.downlinks.pop_due(self.radio.clock().now()) {
            if self.transmit_downlink(&item)? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    fn transmit_downlink(&mut self, item: &ScheduledDownlink) -> Result<bool, LinkError> {
        let late = self.radio.clock().now().saturating_duration_since(item.deadline);
        if !self.radio.send_retuned(&item.frame, item.profile, item.frequency)? {
            warn!("Downlink at {:.3} MHz dropped: channel busy", item.frequency.mhz());
            return Ok(false);
        }

        let time_on_air = item
            .profile
            .time_on_air(item.frame.len(), self.radio.preamble_len());
        self.radio.clock().sleep(time_on_air);

        let deadline = self.radio.clock().now() + TX_DONE_SLACK;
        while self.radio.mode() == RadioMode::Transmitting {
            if self.radio.clock().now() >= deadline {
                warn!("Downlink TX_DONE not seen {:?} after time on air", TX_DONE_SLACK);
                break;
            }
            self.radio.poll_once()?;
        }

        self.status.txnb = self.status.txnb.wrapping_add(1);
        info!(
            "Sent downlink {} bytes at {:.3} MHz {} ({:?} late, {:?} on air)",
            item.frame.len(),
            item.frequency.mhz(),
            item.profile.datr(),
            late,
            time_on_air
        );
        Ok(true)
    }

    /// One pass of the gateway loop: service the radio, forward received
    /// frames, queue new downlinks and send the ones that are due.
    pub fn poll(&mut self, downlinks: Option<&Receiver<DownlinkBatch>>) -> Result<(), LinkError> {
        self.radio.service_interrupts()?;

        while let Some(frame) = self.radio.pop_raw_frame() {
            self.forward(&frame, Utc::now())?;
        }

        if let Some(rx) = downlinks {
            while let Ok(batch) = rx.try_recv() {
                self.accept_downlinks(&batch);
            }
        }

        self.dispatch_due()?;
        self.radio.listen()?;
        Ok(())
    }

    /// Run until `shutdown` is set
    pub fn run(
        &mut self,
        downlinks: Receiver<DownlinkBatch>,
        shutdown: &AtomicBool,
    ) -> Result<(), LinkError> {
        self.radio.listen()?;
        info!("Gateway listening at {:.3} MHz", self.radio.frequency().mhz());

        while !shutdown.load(Ordering::Relaxed) {
            self.poll(Some(&downlinks))?;
            let interval = self.radio.timing().poll_interval();
            self.radio.clock().sleep(interval);
        }

        info!("Gateway stopped: {:?}", self.status());
        Ok(())
    }
}
