use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{RenoError, Result};

/// Maximum segment size unit. Windows are counted in multiples of it.
pub const MSS: f64 = 1.0;
pub const INITIAL_CWND: f64 = 1.0;
pub const INITIAL_SSTHRESH: u64 = 64;
pub const COMPLETION_LIMIT: u64 = 10_000;
pub const RETRANSMISSION_TIMEOUT: Duration = Duration::from_millis(2);
pub const DROP_PROBABILITY: f64 = 0.01;
pub const SERVE_TIME: Duration = Duration::from_secs(120);
pub const DEFAULT_PEER: &str = "127.0.0.1:9999";

/// Every option the sender and the receiver recognize.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub initial_cwnd: f64,
    pub initial_ssthresh: u64,
    /// The flow ends once the last segment sent exceeds this number.
    pub completion_limit: u64,
    pub retransmission_timeout: Duration,
    /// Pause between consecutive sends of one window refill.
    pub pacing: Duration,
    pub drop_probability: f64,
    pub peer: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_cwnd: INITIAL_CWND,
            initial_ssthresh: INITIAL_SSTHRESH,
            completion_limit: COMPLETION_LIMIT,
            retransmission_timeout: RETRANSMISSION_TIMEOUT,
            pacing: Duration::ZERO,
            drop_probability: DROP_PROBABILITY,
            peer: SocketAddr::from(([127, 0, 0, 1], 9999)),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.initial_cwnd.is_nan() || self.initial_cwnd < 1.0 {
            return Err(RenoError::invalid_config(format!(
                "initial cwnd must be at least 1, got {}",
                self.initial_cwnd
            )));
        }
        if self.initial_ssthresh < 1 {
            return Err(RenoError::invalid_config("initial ssthresh must be at least 1"));
        }
        if self.completion_limit == 0 {
            return Err(RenoError::invalid_config("completion limit must be positive"));
        }
        if self.retransmission_timeout.is_zero() {
            return Err(RenoError::invalid_config("retransmission timeout must be positive"));
        }
        validate_drop_probability(self.drop_probability)
    }
}

pub fn validate_drop_probability(p: f64) -> Result<()> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(RenoError::invalid_config(format!(
            "drop probability must be within [0, 1], got {p}"
        )))
    }
}
