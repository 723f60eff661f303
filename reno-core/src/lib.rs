//! Simplified TCP Reno congestion control over an unreliable datagram channel.
//!
//! A sender transmits increasing segment numbers; the receiver answers with
//! cumulative acknowledgments and drops a configurable fraction of them.
//! The sender's [`Controller`] adapts its window with slow start,
//! congestion avoidance and fast retransmit/fast recovery.

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod telemetry;
pub mod timer;
pub mod wire;

pub use config::Config;
pub use controller::{Action, AckClass, Controller, State, Stats, TimeoutClass};
pub use error::{RenoError, Result};
pub use event::Event;
pub use receiver::Receiver;
pub use sender::{run_flow, FlowSummary};
pub use server::serve;
pub use telemetry::{EventKind, LogWriter, TelemetryRecord, TelemetrySink};
pub use timer::{TimerFacility, TimerToken};
