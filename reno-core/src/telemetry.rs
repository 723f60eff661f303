//! Time series of (timestamp, cwnd, ssthresh) written for offline analysis.
//!
//! One record per significant controller event, one line per record:
//!
//! ```text
//! INFO: 0.004211 transmit segments cwnd 3.00 ssthresh 64 state slow-start
//! ```
//!
//! Whitespace token 1 is the time in seconds since the flow started, token 5
//! the congestion window and token 7 the slow-start threshold.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::controller::State;
use crate::error::RenoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Single retransmission of the oldest unacknowledged segment
    TransmitSegment,
    /// Window refill
    TransmitSegments,
    NewAck,
    DuplicateAck,
    StaleAck,
    /// Acknowledgment above the highest segment sent
    UnsentAck,
    FastRetransmit,
    LossTimeout,
    StaleTimeout,
}

impl EventKind {
    const ALL: [EventKind; 9] = [
        EventKind::TransmitSegment,
        EventKind::TransmitSegments,
        EventKind::NewAck,
        EventKind::DuplicateAck,
        EventKind::StaleAck,
        EventKind::UnsentAck,
        EventKind::FastRetransmit,
        EventKind::LossTimeout,
        EventKind::StaleTimeout,
    ];

    /// Two words, so that every line keeps the same token positions.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TransmitSegment => "transmit segment",
            EventKind::TransmitSegments => "transmit segments",
            EventKind::NewAck => "new ack",
            EventKind::DuplicateAck => "duplicate ack",
            EventKind::StaleAck => "stale ack",
            EventKind::UnsentAck => "unsent ack",
            EventKind::FastRetransmit => "fast retransmit",
            EventKind::LossTimeout => "loss timeout",
            EventKind::StaleTimeout => "stale timeout",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    /// Time since the controller was created
    pub elapsed: Duration,
    pub kind: EventKind,
    pub cwnd: f64,
    pub ssthresh: u64,
    pub state: State,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "INFO: {:.6} {} cwnd {:.2} ssthresh {} state {}",
            self.elapsed.as_secs_f64(),
            self.kind,
            self.cwnd,
            self.ssthresh,
            self.state
        )
    }
}

impl FromStr for TelemetryRecord {
    type Err = RenoError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || RenoError::MalformedRecord {
            line: line.to_owned(),
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let &[prefix, secs, first, second, "cwnd", cwnd, "ssthresh", ssthresh, "state", state] =
            tokens.as_slice()
        else {
            return Err(malformed());
        };
        if prefix != "INFO:" {
            return Err(malformed());
        }

        let secs: f64 = secs.parse().map_err(|_| malformed())?;
        let elapsed = Duration::try_from_secs_f64(secs).map_err(|_| malformed())?;
        let kind = EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == format!("{first} {second}"))
            .ok_or_else(malformed)?;

        Ok(Self {
            elapsed,
            kind,
            cwnd: cwnd.parse().map_err(|_| malformed())?,
            ssthresh: ssthresh.parse().map_err(|_| malformed())?,
            state: state.parse().map_err(|_| malformed())?,
        })
    }
}

/// Append-only destination for telemetry records. Emission order is the
/// order in which the controller handled its events.
pub trait TelemetrySink {
    fn record(&mut self, record: TelemetryRecord);
}

/// Discards everything.
impl TelemetrySink for () {
    fn record(&mut self, _record: TelemetryRecord) {}
}

/// In-memory capture.
impl TelemetrySink for Vec<TelemetryRecord> {
    fn record(&mut self, record: TelemetryRecord) {
        self.push(record);
    }
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for &mut S {
    fn record(&mut self, record: TelemetryRecord) {
        (**self).record(record);
    }
}

/// Writes one formatted line per record.
///
/// A failed write is logged and counted but never reaches the controller:
/// losing a telemetry line must not change protocol behaviour.
pub struct LogWriter<W: Write> {
    writer: W,
    written: u64,
    failed: u64,
}

impl<W: Write> LogWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            written: 0,
            failed: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Flushes and hands the writer back.
    pub fn finish(mut self) -> std::io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> TelemetrySink for LogWriter<W> {
    fn record(&mut self, record: TelemetryRecord) {
        match writeln!(self.writer, "{record}") {
            Ok(()) => self.written += 1,
            Err(e) => {
                self.failed += 1;
                // Only the first failure is worth a line; the rest repeat it.
                if self.failed == 1 {
                    warn!("Failed to write telemetry record: {e}");
                }
            }
        }
    }
}
