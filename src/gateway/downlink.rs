//! # Scheduled Downlinks
//!
//! Downlink batches arrive as JSON from the network server side:
//!
//! ```json
//! {"items": [{
//!     "txInfo": {
//!         "frequency": 923300000,
//!         "modulation": {"lora": {"bandwidth": 500000, "spreadingFactor": 12}},
//!         "timing": {"delay": {"delay": "1s"}}
//!     },
//!     "phyPayload": "YAEAAAAAAQAB"
//! }]}
//! ```
//!
//! The delay counts from the end of the uplink the downlink answers. It may be
//! a number of seconds, a string such as `"1"` or `"1s"`, or a list whose
//! first element is one of those. `timing` is also accepted next to `txInfo`.
//!
//! [`DownlinkQueue`] keeps items ordered by absolute deadline so the item that
//! falls due is always the one transmitted.

use crate::error::LinkError;
use crate::radio::modem::{FrequencyConfig, ModemProfile};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Deserialize)]
pub struct DownlinkBatch {
    pub items: Vec<DownlinkItem>,
}

impl DownlinkBatch {
    pub fn from_json(data: &[u8]) -> Result<Self, LinkError> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownlinkItem {
    pub tx_info: TxInfo,
    pub phy_payload: String,
    #[serde(default)]
    pub timing: Option<Timing>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxInfo {
    /// Carrier in Hz
    pub frequency: u32,
    pub modulation: Modulation,
    #[serde(default)]
    pub timing: Option<Timing>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Modulation {
    pub lora: LoraModulation,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoraModulation {
    /// Bandwidth in Hz
    pub bandwidth: u32,
    pub spreading_factor: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Timing {
    pub delay: DelayTiming,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelayTiming {
    pub delay: DelayValue,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DelayValue {
    Seconds(f64),
    Text(String),
    List(Vec<DelayValue>),
}

impl DelayValue {
    pub fn duration(&self) -> Result<Duration, LinkError> {
        match self {
            DelayValue::Seconds(secs) => seconds(*secs),
            DelayValue::Text(text) => {
                let trimmed = text.trim();
                let number = trimmed.strip_suffix('s').unwrap_or(trimmed);
                let secs = number
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| LinkError::Config(format!("Invalid downlink delay {:?}", text)))?;
                seconds(secs)
            }
            DelayValue::List(values) => values
                .first()
                .ok_or_else(|| LinkError::Config("Empty downlink delay list".to_string()))?
                .duration(),
        }
    }
}

fn seconds(secs: f64) -> Result<Duration, LinkError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| LinkError::Config(format!("Invalid downlink delay {}", secs)))
}

impl DownlinkItem {
    /// Delay from the uplink, preferring `txInfo.timing`
    pub fn delay(&self) -> Result<Duration, LinkError> {
        self.tx_info
            .timing
            .as_ref()
            .or(self.timing.as_ref())
            .ok_or_else(|| LinkError::Config("Downlink item without timing".to_string()))?
            .delay
            .delay
            .duration()
    }

    /// Resolve payload and radio settings, scheduled against `last_uplink`
    pub fn schedule(
        &self,
        last_uplink: Instant,
        overhead: Duration,
    ) -> Result<ScheduledDownlink, LinkError> {
        let frame = BASE64
            .decode(self.phy_payload.trim())
            .map_err(|e| LinkError::Config(format!("Invalid phyPayload: {}", e)))?;
        let lora = &self.tx_info.modulation.lora;
        let profile = ModemProfile::for_transmit(lora.bandwidth, lora.spreading_factor)?;
        let delay = self.delay()?;

        Ok(ScheduledDownlink {
            deadline: last_uplink + delay.saturating_sub(overhead),
            frame,
            profile,
            frequency: FrequencyConfig::from_hz(self.tx_info.frequency),
        })
    }
}

/// A downlink ready for transmission at `deadline`
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledDownlink {
    pub deadline: Instant,
    pub frame: Vec<u8>,
    pub profile: ModemProfile,
    pub frequency: FrequencyConfig,
}

/// Downlinks ordered by deadline; equal deadlines keep arrival order
#[derive(Debug, Default)]
pub struct DownlinkQueue {
    items: Vec<ScheduledDownlink>,
}

impl DownlinkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: ScheduledDownlink) {
        let at = self.items.partition_point(|queued| queued.deadline <= item.deadline);
        self.items.insert(at, item);
    }

    /// Remove the earliest item if its deadline has passed
    pub fn pop_due(&mut self, now: Instant) -> Option<ScheduledDownlink> {
        match self.items.first() {
            Some(first) if first.deadline <= now => Some(self.items.remove(0)),
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.items.first().map(|item| item.deadline)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
