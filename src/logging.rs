//! # Logging Utilities
//!
//! Logger initialization plus the two helpers the radio and gateway paths
//! share: hex rendering of frames for `debug!` output and a rate limiter for
//! warnings that can repeat on every received packet.
//!
//! ```rust
//! use lora_link::logging::{frame_hex, LogThrottle};
//!
//! let mut throttle = LogThrottle::new(1000, 5); // 5 messages per second
//! if throttle.allow() {
//!     log::warn!("uplink ack timeout");
//! }
//! assert_eq!(frame_hex(&[0xff, 0x01]), "ff01");
//! ```

use std::time::{Duration, Instant};

/// Initializes the logger with the `env_logger` crate.
pub fn init_logger() {
    env_logger::init();
}

/// Initializes `env_logger`, falling back to `default_level` when `RUST_LOG`
/// is unset. Used by the binary.
pub fn init_logger_with_default(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    // A second init (tests, embedding) is harmless.
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Lowercase hex rendering of a frame for log output
pub fn frame_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Throttling structure for rate-limiting log messages
#[derive(Debug)]
pub struct LogThrottle {
    window: Duration,
    cap: u32,
    count: u32,
    /// Messages refused since the last reset of the window
    suppressed: u32,
    t0: Instant,
}

impl LogThrottle {
    /// Create new throttle with time window and message cap
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window: Duration::from_millis(window_ms),
            cap,
            count: 0,
            suppressed: 0,
            t0: Instant::now(),
        }
    }

    /// Check if logging is allowed (resets counter after window expires)
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Same as [`allow`](Self::allow) against an explicit instant
    pub fn allow_at(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.t0) > self.window {
            if self.suppressed > 0 {
                log::debug!("{} log messages suppressed", self.suppressed);
            }
            self.t0 = now;
            self.count = 0;
            self.suppressed = 0;
        }

        self.count += 1;
        let allowed = self.count <= self.cap;
        if !allowed {
            self.suppressed += 1;
        }
        allowed
    }

    /// Number of messages refused in the current window
    pub fn suppressed(&self) -> u32 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_caps_within_window() {
        let start = Instant::now();
        let mut throttle = LogThrottle::new(1000, 2);
        throttle.t0 = start;

        assert!(throttle.allow_at(start));
        assert!(throttle.allow_at(start + Duration::from_millis(10)));
        assert!(!throttle.allow_at(start + Duration::from_millis(20)));
        assert_eq!(throttle.suppressed(), 1);

        // New window
        assert!(throttle.allow_at(start + Duration::from_millis(1500)));
        assert_eq!(throttle.suppressed(), 0);
    }

    #[test]
    fn test_frame_hex() {
        assert_eq!(frame_hex(&[0x00, 0xab, 0x21]), "00ab21");
    }
}
