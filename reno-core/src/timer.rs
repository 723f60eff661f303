//! Single-shot, cancellable retransmission timers on the tokio runtime.
//!
//! An armed timer is a task that sleeps and then delivers
//! [`Event::Timeout`] on the flow's event channel. The facility remembers
//! the one live timer so that a timeout which was already queued when its
//! timer got cancelled can be recognised and dropped.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    id: u64,
    pub armed_for: u64,
}

#[derive(Debug)]
struct LiveTimer {
    token: TimerToken,
    abort: AbortHandle,
}

pub struct TimerFacility {
    events: UnboundedSender<Event>,
    delay: Duration,
    next_id: u64,
    live: Option<LiveTimer>,
}

impl TimerFacility {
    pub fn new(events: UnboundedSender<Event>, delay: Duration) -> Self {
        Self {
            events,
            delay,
            next_id: 0,
            live: None,
        }
    }

    /// Schedules a timeout for `armed_for`, replacing the live timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, armed_for: u64) -> TimerToken {
        self.cancel_live();

        self.next_id += 1;
        let token = TimerToken {
            id: self.next_id,
            armed_for,
        };
        let events = self.events.clone();
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The flow may already be gone.
            let _ = events.send(Event::Timeout(token));
        });

        trace!("Armed timer {} for segment {armed_for}", token.id);
        self.live = Some(LiveTimer {
            token,
            abort: task.abort_handle(),
        });
        token
    }

    /// Aborts the timer. Cancelling a fired or cancelled timer does nothing.
    pub fn cancel(&mut self, token: TimerToken) {
        if self.live_token() == Some(token) {
            self.cancel_live();
        }
    }

    pub fn cancel_live(&mut self) {
        if let Some(live) = self.live.take() {
            trace!("Cancelled timer {}", live.token.id);
            live.abort.abort();
        }
    }

    pub fn live_token(&self) -> Option<TimerToken> {
        self.live.as_ref().map(|live| live.token)
    }

    /// Accepts a delivered timeout if it belongs to the live timer, which is
    /// then no longer live. Timeouts from cancelled timers return false.
    pub fn take_fired(&mut self, token: TimerToken) -> bool {
        match self.live_token() {
            Some(live) if live == token => {
                self.live = None;
                true
            }
            _ => {
                trace!("Ignoring timeout from cancelled timer {}", token.id);
                false
            }
        }
    }
}

impl Drop for TimerFacility {
    fn drop(&mut self) {
        self.cancel_live();
    }
}
