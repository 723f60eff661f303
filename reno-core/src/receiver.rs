use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::trace;

use crate::config::validate_drop_probability;
use crate::error::Result;

/// Acknowledgment generator for one flow that loses a fixed fraction of its
/// acknowledgments.
pub struct Receiver<R: RngCore = StdRng> {
    current_ack: u64,
    drop_probability: f64,
    rng: R,
    dropped: u64,
}

impl Receiver<StdRng> {
    pub fn seeded(drop_probability: f64, seed: u64) -> Result<Self> {
        Self::with_rng(drop_probability, StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore> Receiver<R> {
    pub fn with_rng(drop_probability: f64, rng: R) -> Result<Self> {
        validate_drop_probability(drop_probability)?;
        Ok(Self {
            current_ack: 0,
            drop_probability,
            rng,
            dropped: 0,
        })
    }

    /// Returns the acknowledgment to send back, or `None` if it is dropped.
    ///
    /// A surviving segment above the current acknowledgment advances it;
    /// the receiver never rejects or reorders anything.
    pub fn on_segment_received(&mut self, segment: u64) -> Option<u64> {
        if self.rng.gen::<f64>() < self.drop_probability {
            self.dropped += 1;
            trace!("Dropping acknowledgment for segment {segment}");
            return None;
        }
        if segment > self.current_ack {
            self.current_ack = segment;
        }
        Some(self.current_ack)
    }

    pub fn current_ack(&self) -> u64 {
        self.current_ack
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
