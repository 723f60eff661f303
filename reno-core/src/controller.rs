//! Sender-side congestion control for one flow (simplified TCP Reno).
//!
//! The controller never touches a socket or a clock-driven timer. Its two
//! event entry points, [`Controller::on_segment_acknowledged`] and
//! [`Controller::on_timeout`], mutate the window state and queue
//! [`Action`]s that the driver executes before delivering the next event.

use std::collections::vec_deque::{Drain, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{Config, MSS};
use crate::error::RenoError;
use crate::telemetry::{EventKind, TelemetryRecord, TelemetrySink};

/// Duplicate acknowledgments that trigger a fast retransmit.
const DUPLICATE_ACK_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::SlowStart => "slow-start",
            State::CongestionAvoidance => "congestion-avoidance",
            State::FastRecovery => "fast-recovery",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = RenoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [State::SlowStart, State::CongestionAvoidance, State::FastRecovery]
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| RenoError::MalformedRecord { line: s.to_owned() })
    }
}

/// Side effect requested by the controller, in the order it must happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Transmit { segment: u64, retransmission: bool },
    /// Replaces the live timer, if any.
    ArmTimer { armed_for: u64 },
    CancelTimer,
    /// The completion limit was exceeded; release the channel.
    Finish,
}

/// How an acknowledgment was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckClass {
    New,
    Duplicate,
    /// Below the highest acknowledgment seen
    Stale,
    /// Above the highest segment sent
    Unsent,
    /// The flow is complete; the acknowledgment was not processed.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Loss,
    /// Armed for a segment that has since been acknowledged
    Stale,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub new_acks: u64,
    pub duplicate_acks: u64,
    pub stale_acks: u64,
    pub unsent_acks: u64,
    pub retransmissions: u64,
    pub fast_retransmits: u64,
    pub timeouts: u64,
    pub stale_timeouts: u64,
}

pub struct Controller<S: TelemetrySink> {
    cwnd: f64,
    ssthresh: u64,
    initial_cwnd: f64,
    state: State,
    duplicate_acks: u32,
    last_sent: u64,
    last_acked: u64,
    completion_limit: u64,
    /// Segment the live timer was armed for
    timer: Option<u64>,
    finished: bool,
    actions: VecDeque<Action>,
    stats: Stats,
    epoch: Instant,
    telemetry: S,
}

impl<S: TelemetrySink> Controller<S> {
    pub fn new(config: &Config, telemetry: S) -> Self {
        Self {
            cwnd: config.initial_cwnd,
            ssthresh: config.initial_ssthresh,
            initial_cwnd: config.initial_cwnd,
            state: State::SlowStart,
            duplicate_acks: 0,
            last_sent: 0,
            last_acked: 0,
            completion_limit: config.completion_limit,
            timer: None,
            finished: false,
            actions: VecDeque::new(),
            stats: Stats::default(),
            epoch: Instant::now(),
            telemetry,
        }
    }

    /// Sends the first segment and arms the timer for it.
    pub fn start(&mut self) {
        self.last_sent += 1;
        debug!("Sending first segment {}", self.last_sent);
        self.actions.push_back(Action::Transmit {
            segment: self.last_sent,
            retransmission: false,
        });
        self.record(EventKind::TransmitSegments);
        self.arm_timer(self.last_sent);
    }

    /// Handles one acknowledgment received from the peer.
    pub fn on_segment_acknowledged(&mut self, ack: u64) -> AckClass {
        if self.finished {
            return AckClass::Completed;
        }
        self.cancel_timer();

        if self.last_sent > self.completion_limit {
            self.finish();
            return AckClass::Completed;
        }

        if ack < self.last_acked {
            debug!(
                "Stale acknowledgment {ack} below {} in {}",
                self.last_acked, self.state
            );
            self.stats.stale_acks += 1;
            self.record(EventKind::StaleAck);
            self.rearm();
            AckClass::Stale
        } else if ack > self.last_sent {
            warn!(
                "Acknowledgment {ack} for a segment never sent (last sent {})",
                self.last_sent
            );
            self.stats.unsent_acks += 1;
            self.record(EventKind::UnsentAck);
            self.rearm();
            AckClass::Unsent
        } else if ack > self.last_acked {
            self.on_new_ack(ack);
            AckClass::New
        } else {
            self.on_duplicate_ack();
            AckClass::Duplicate
        }
    }

    /// Handles a retransmission timer that fired for `armed_for`.
    pub fn on_timeout(&mut self, armed_for: u64) -> TimeoutClass {
        if self.finished {
            return TimeoutClass::Completed;
        }
        // The timer that fired is no longer live.
        self.timer = None;

        // An acknowledgment at or beyond this point arrived after arming.
        if armed_for <= self.last_acked {
            debug!(
                "Stale timeout for {armed_for}, already acknowledged up to {}",
                self.last_acked
            );
            self.stats.stale_timeouts += 1;
            self.record(EventKind::StaleTimeout);
            self.refill_window();
            return TimeoutClass::Stale;
        }

        debug!(
            "Timeout for segment {armed_for} in {} with cwnd {:.2}",
            self.state, self.cwnd
        );
        self.stats.timeouts += 1;
        self.ssthresh = halve(self.cwnd);
        self.cwnd = self.initial_cwnd;
        self.duplicate_acks = 0;
        self.state = State::SlowStart;
        self.record(EventKind::LossTimeout);

        let segment = self.retransmit();
        self.arm_timer(segment);
        TimeoutClass::Loss
    }

    /// Transmits new segments while the number outstanding is below cwnd,
    /// then makes sure a timer covers the highest segment sent.
    pub fn refill_window(&mut self) {
        if self.finished {
            return;
        }
        let mut sent = 0;
        while ((self.last_sent - self.last_acked) as f64) < self.cwnd {
            self.last_sent += 1;
            self.actions.push_back(Action::Transmit {
                segment: self.last_sent,
                retransmission: false,
            });
            sent += 1;
        }
        if sent > 0 {
            debug!(
                "Sent {sent} segments up to {}, acknowledged {}",
                self.last_sent, self.last_acked
            );
        }
        self.record(EventKind::TransmitSegments);
        self.rearm();
    }

    fn on_new_ack(&mut self, ack: u64) {
        self.stats.new_acks += 1;
        self.last_acked = ack;
        self.duplicate_acks = 0;

        match self.state {
            State::SlowStart => {
                self.cwnd += MSS;
                if self.cwnd >= self.ssthresh as f64 {
                    self.state = State::CongestionAvoidance;
                }
            }
            State::CongestionAvoidance => {
                self.cwnd += MSS * (MSS / self.cwnd);
            }
            State::FastRecovery => {
                self.cwnd = self.ssthresh as f64;
                self.state = State::CongestionAvoidance;
            }
        }
        debug!(
            "New acknowledgment {ack}, cwnd {:.2} ssthresh {} in {}",
            self.cwnd, self.ssthresh, self.state
        );
        self.record(EventKind::NewAck);
        self.refill_window();
    }

    fn on_duplicate_ack(&mut self) {
        self.stats.duplicate_acks += 1;

        if self.state == State::FastRecovery {
            // One in-flight segment has left the network.
            self.cwnd += MSS;
            self.record(EventKind::DuplicateAck);
        } else {
            self.duplicate_acks += 1;
            debug!(
                "Duplicate acknowledgment {} ({} in a row) in {}",
                self.last_acked, self.duplicate_acks, self.state
            );
            self.record(EventKind::DuplicateAck);

            if self.duplicate_acks == DUPLICATE_ACK_THRESHOLD {
                self.fast_retransmit();
            }
        }
        self.refill_window();
    }

    fn fast_retransmit(&mut self) {
        debug!(
            "{DUPLICATE_ACK_THRESHOLD} duplicate acknowledgments with cwnd {:.2} ssthresh {}",
            self.cwnd, self.ssthresh
        );
        self.stats.fast_retransmits += 1;
        self.ssthresh = halve(self.cwnd);
        self.cwnd = self.ssthresh as f64 + 3.0 * MSS;
        self.state = State::FastRecovery;
        self.duplicate_acks = 0;
        self.record(EventKind::FastRetransmit);
        self.retransmit();
    }

    /// Resends the oldest unacknowledged segment.
    fn retransmit(&mut self) -> u64 {
        let segment = self.last_acked + 1;
        self.last_sent = self.last_sent.max(segment);
        debug!("Retransmitting segment {segment}");
        self.stats.retransmissions += 1;
        self.actions.push_back(Action::Transmit {
            segment,
            retransmission: true,
        });
        self.record(EventKind::TransmitSegment);
        segment
    }

    fn finish(&mut self) {
        info!(
            "Completion limit reached: last sent {}, acknowledged {}",
            self.last_sent, self.last_acked
        );
        self.finished = true;
        self.actions.push_back(Action::Finish);
    }

    /// Keeps a timer live while segments are outstanding.
    fn rearm(&mut self) {
        if self.last_sent > self.last_acked {
            self.arm_timer(self.last_sent);
        }
    }

    fn arm_timer(&mut self, armed_for: u64) {
        self.timer = Some(armed_for);
        self.actions.push_back(Action::ArmTimer { armed_for });
    }

    fn cancel_timer(&mut self) {
        if self.timer.take().is_some() {
            self.actions.push_back(Action::CancelTimer);
        }
    }

    fn record(&mut self, kind: EventKind) {
        self.telemetry.record(TelemetryRecord {
            elapsed: self.epoch.elapsed(),
            kind,
            cwnd: self.cwnd,
            ssthresh: self.ssthresh,
            state: self.state,
        });
    }

    /// Removes and returns the pending actions in execution order.
    pub fn actions(&mut self) -> Drain<'_, Action> {
        self.actions.drain(..)
    }

    pub fn poll_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u64 {
        self.ssthresh
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn duplicate_acks(&self) -> u32 {
        self.duplicate_acks
    }

    pub fn last_sent(&self) -> u64 {
        self.last_sent
    }

    pub fn last_acked(&self) -> u64 {
        self.last_acked
    }

    pub fn in_flight(&self) -> u64 {
        self.last_sent - self.last_acked
    }

    pub fn timer_armed_for(&self) -> Option<u64> {
        self.timer
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn telemetry(&self) -> &S {
        &self.telemetry
    }

    pub fn into_telemetry(self) -> S {
        self.telemetry
    }
}

/// `max(floor(cwnd / 2), 1)`
fn halve(cwnd: f64) -> u64 {
    ((cwnd / 2.0).floor() as u64).max(1)
}
