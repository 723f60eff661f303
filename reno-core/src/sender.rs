//! Drives one flow's [`Controller`] over a UDP socket.
//!
//! A single task owns the controller. Acknowledgments (from a reader task)
//! and timeouts (from the timer facility) arrive on one channel and are
//! handled one at a time; every action an event produces is executed
//! before the next event is taken off the channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};
use tokio::time;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::controller::{Action, Controller, Stats};
use crate::error::{is_transient, RenoError, Result};
use crate::event::Event;
use crate::telemetry::TelemetrySink;
use crate::timer::TimerFacility;
use crate::wire;

const RECV_BUFFER: usize = 1500;

#[derive(Debug, Clone, PartialEq)]
pub struct FlowSummary {
    pub peer: SocketAddr,
    pub last_sent: u64,
    pub last_acked: u64,
    pub cwnd: f64,
    pub ssthresh: u64,
    pub stats: Stats,
    pub elapsed: Duration,
}

/// Runs a flow to `config.peer` until the completion limit is exceeded.
///
/// Returns the summary together with the telemetry sink so the caller can
/// flush it. A malformed acknowledgment or a socket failure other than
/// ICMP feedback from an absent peer ends the flow with an error.
pub async fn run_flow<S: TelemetrySink>(
    socket: UdpSocket,
    config: &Config,
    telemetry: S,
) -> Result<(FlowSummary, S)> {
    config.validate()?;
    socket.connect(config.peer).await?;
    let socket = Arc::new(socket);

    info!(
        "Starting flow from {} to {} with completion limit {}",
        socket.local_addr()?,
        config.peer,
        config.completion_limit
    );
    let start = Instant::now();

    let (tx, events) = mpsc::unbounded_channel();
    let mut timers = TimerFacility::new(tx.clone(), config.retransmission_timeout);
    let mut reader = ReaderTask(tokio::spawn(read_acks(socket.clone(), tx)));

    let mut controller = Controller::new(config, telemetry);
    controller.start();

    let outcome = drive(
        &mut controller,
        &socket,
        &mut timers,
        events,
        &mut reader,
        config.pacing,
    )
    .await;
    drop(reader);
    timers.cancel_live();
    outcome?;

    let summary = FlowSummary {
        peer: config.peer,
        last_sent: controller.last_sent(),
        last_acked: controller.last_acked(),
        cwnd: controller.cwnd(),
        ssthresh: controller.ssthresh(),
        stats: controller.stats(),
        elapsed: start.elapsed(),
    };
    info!(
        "Flow finished: sent {} acknowledged {} in {:?}",
        summary.last_sent, summary.last_acked, summary.elapsed
    );
    Ok((summary, controller.into_telemetry()))
}

async fn drive<S: TelemetrySink>(
    controller: &mut Controller<S>,
    socket: &UdpSocket,
    timers: &mut TimerFacility,
    mut events: UnboundedReceiver<Event>,
    reader: &mut ReaderTask,
    pacing: Duration,
) -> Result<()> {
    loop {
        if execute(controller, socket, timers, pacing).await? {
            return Ok(());
        }

        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(Event::Ack(ack)) => {
                    let class = controller.on_segment_acknowledged(ack);
                    trace!("Acknowledgment {ack} classified as {class:?}");
                }
                Some(Event::Timeout(token)) => {
                    if timers.take_fired(token) {
                        controller.on_timeout(token.armed_for);
                    }
                }
                None => return Err(RenoError::ChannelClosed),
            },
            joined = &mut reader.0 => return Err(reader_failure(joined)),
        }
    }
}

/// Executes queued actions in order. Returns true once the flow finished.
async fn execute<S: TelemetrySink>(
    controller: &mut Controller<S>,
    socket: &UdpSocket,
    timers: &mut TimerFacility,
    pacing: Duration,
) -> Result<bool> {
    let mut sent = false;
    while let Some(action) = controller.poll_action() {
        match action {
            Action::Transmit {
                segment,
                retransmission,
            } => {
                if sent && !pacing.is_zero() {
                    time::sleep(pacing).await;
                }
                trace!("Sending segment {segment} (retransmission: {retransmission})");
                send_segment(socket, segment).await?;
                sent = true;
            }
            Action::ArmTimer { armed_for } => {
                timers.arm(armed_for);
            }
            Action::CancelTimer => timers.cancel_live(),
            Action::Finish => return Ok(true),
        }
    }
    Ok(false)
}

async fn send_segment(socket: &UdpSocket, segment: u64) -> Result<()> {
    match socket.send(&wire::encode(segment)).await {
        Ok(_) => Ok(()),
        // Indistinguishable from a lost acknowledgment; the timer covers it.
        Err(e) if is_transient(&e) => {
            debug!("Sending segment {segment} failed: {e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Stops the reader when the flow ends, or when the flow future is dropped.
struct ReaderTask(JoinHandle<Result<()>>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn read_acks(socket: Arc<UdpSocket>, events: UnboundedSender<Event>) -> Result<()> {
    let mut buf = [0u8; RECV_BUFFER];
    loop {
        let n = match socket.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) if is_transient(&e) => {
                debug!("Receive failed: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let ack = wire::decode(&buf[..n])?;
        trace!("Received acknowledgment {ack}");
        if events.send(Event::Ack(ack)).is_err() {
            return Ok(());
        }
    }
}

fn reader_failure(joined: std::result::Result<Result<()>, JoinError>) -> RenoError {
    match joined {
        Ok(Ok(())) => RenoError::ChannelClosed,
        Ok(Err(e)) => e,
        Err(e) => RenoError::Io(std::io::Error::other(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{EventKind, TelemetryRecord};

    async fn peer_socket() -> (UdpSocket, Config) {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            peer: peer.local_addr().unwrap(),
            completion_limit: 20,
            retransmission_timeout: Duration::from_millis(20),
            ..Config::default()
        };
        (peer, config)
    }

    /// Acknowledges every segment with the highest number seen so far.
    async fn echo_peer(peer: UdpSocket) {
        let mut buf = [0u8; RECV_BUFFER];
        let mut highest = 0;
        while let Ok((n, from)) = peer.recv_from(&mut buf).await {
            highest = highest.max(wire::decode(&buf[..n]).unwrap());
            let _ = peer.send_to(&wire::encode(highest), from).await;
        }
    }

    #[tokio::test]
    async fn flow_runs_to_completion_limit() {
        let (peer, config) = peer_socket().await;
        let echo = tokio::spawn(echo_peer(peer));

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (summary, records) = time::timeout(
            Duration::from_secs(10),
            run_flow(socket, &config, Vec::<TelemetryRecord>::new()),
        )
        .await
        .unwrap()
        .unwrap();
        echo.abort();

        assert!(summary.last_sent > config.completion_limit);
        assert!(summary.last_acked <= summary.last_sent);
        assert!(summary.stats.new_acks > 0);
        assert_eq!(records[0].kind, EventKind::TransmitSegments);
        assert!(records.iter().any(|r| r.kind == EventKind::NewAck));
    }

    #[tokio::test]
    async fn silent_peer_triggers_timeouts() {
        let (peer, config) = peer_socket().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut buf = [0u8; RECV_BUFFER];
        let outcome = time::timeout(Duration::from_millis(200), async {
            let flow = run_flow(socket, &config, ());
            tokio::pin!(flow);
            // Let the flow send and retransmit a few times without answering.
            let mut seen = Vec::new();
            loop {
                tokio::select! {
                    _ = &mut flow => unreachable!("flow cannot finish without acknowledgments"),
                    received = peer.recv_from(&mut buf) => {
                        let (n, _) = received.unwrap();
                        seen.push(wire::decode(&buf[..n]).unwrap());
                        if seen.len() == 3 {
                            return seen;
                        }
                    }
                }
            }
        })
        .await
        .unwrap();

        // The first segment, then its retransmissions after each timeout.
        assert_eq!(outcome, [1, 1, 1]);
    }

    #[tokio::test]
    async fn malformed_acknowledgment_ends_flow() {
        let (peer, config) = peer_socket().await;
        let responder = tokio::spawn(async move {
            let mut buf = [0u8; RECV_BUFFER];
            let (_, from) = peer.recv_from(&mut buf).await.unwrap();
            peer.send_to(b"not-a-number", from).await.unwrap();
            peer
        });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let result = time::timeout(Duration::from_secs(5), run_flow(socket, &config, ()))
            .await
            .unwrap();
        responder.await.unwrap();

        match result {
            Err(RenoError::MalformedPayload { payload }) => assert_eq!(payload, "not-a-number"),
            other => panic!("expected a decode failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_separates_sends_of_one_batch() {
        let (peer, config) = peer_socket().await;
        let config = Config {
            initial_cwnd: 4.0,
            pacing: Duration::from_millis(10),
            ..config
        };
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(config.peer).await.unwrap();

        let (tx, _events) = mpsc::unbounded_channel();
        let mut timers = TimerFacility::new(tx, config.retransmission_timeout);
        let mut controller = Controller::new(&config, ());
        controller.start();
        controller.refill_window();

        let before = time::Instant::now();
        let finished = execute(&mut controller, &socket, &mut timers, config.pacing)
            .await
            .unwrap();
        let elapsed = before.elapsed();
        assert!(!finished);

        // Four sends, three gaps.
        assert!(elapsed >= Duration::from_millis(30), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(40), "{elapsed:?}");

        let mut buf = [0u8; RECV_BUFFER];
        let mut received = Vec::new();
        for _ in 0..4 {
            let n = peer.recv(&mut buf).await.unwrap();
            received.push(wire::decode(&buf[..n]).unwrap());
        }
        assert_eq!(received, [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_sending() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            initial_ssthresh: 0,
            ..Config::default()
        };
        assert!(matches!(
            run_flow(socket, &config, ()).await,
            Err(RenoError::InvalidConfig { .. })
        ));
    }
}
