//! Receiver service: answers segments with cumulative acknowledgments.

use std::collections::hash_map::{Entry, HashMap};
use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::validate_drop_probability;
use crate::error::{is_transient, Result};
use crate::receiver::Receiver;
use crate::wire;

const RECV_BUFFER: usize = 1500;

/// Peers tracked at once. A new peer beyond this evicts the one idle longest.
pub const MAX_FLOWS: usize = 1024;

/// Serves acknowledgments on `socket` until the future is dropped.
///
/// Every peer address gets its own [`Receiver`], so independent flows never
/// share acknowledgment state. At most [`MAX_FLOWS`] peers are remembered;
/// a peer that comes back after eviction starts from acknowledgment 0.
/// Per-peer RNGs are derived from one service RNG, seeded from `seed` when
/// given.
pub async fn serve(socket: UdpSocket, drop_probability: f64, seed: Option<u64>) -> Result<()> {
    serve_bounded(socket, drop_probability, seed, MAX_FLOWS).await
}

async fn serve_bounded(
    socket: UdpSocket,
    drop_probability: f64,
    seed: Option<u64>,
    max_flows: usize,
) -> Result<()> {
    validate_drop_probability(drop_probability)?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut flows = Flows::new(max_flows);
    let mut buf = [0u8; RECV_BUFFER];

    info!(
        "Serving acknowledgments on {} with drop probability {drop_probability}",
        socket.local_addr()?
    );

    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) if is_transient(&e) => {
                debug!("Receive failed: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let segment = match wire::decode(&buf[..n]) {
            Ok(segment) => segment,
            Err(e) => {
                warn!("Skipping datagram from {peer}: {e}");
                continue;
            }
        };

        let receiver = flows.get_or_insert(peer, || Receiver::seeded(drop_probability, rng.gen()))?;

        let Some(ack) = receiver.on_segment_received(segment) else {
            continue;
        };
        if let Err(e) = socket.send_to(&wire::encode(ack), peer).await {
            if !is_transient(&e) {
                return Err(e.into());
            }
            debug!("Acknowledgment to {peer} failed: {e}");
        }
    }
}

struct Flow {
    receiver: Receiver,
    /// Value of `Flows::clock` at the last datagram from this peer
    last_seen: u64,
}

/// Per-peer receivers, at most `capacity` of them.
struct Flows {
    flows: HashMap<SocketAddr, Flow>,
    capacity: usize,
    clock: u64,
}

impl Flows {
    fn new(capacity: usize) -> Self {
        Self {
            flows: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    fn get_or_insert(
        &mut self,
        peer: SocketAddr,
        create: impl FnOnce() -> Result<Receiver>,
    ) -> Result<&mut Receiver> {
        self.clock += 1;
        let now = self.clock;
        if self.flows.len() >= self.capacity && !self.flows.contains_key(&peer) {
            self.evict_idlest();
        }
        let flow = match self.flows.entry(peer) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                info!("New flow from {peer}");
                entry.insert(Flow {
                    receiver: create()?,
                    last_seen: now,
                })
            }
        };
        flow.last_seen = now;
        Ok(&mut flow.receiver)
    }

    fn evict_idlest(&mut self) {
        let idlest = self
            .flows
            .iter()
            .min_by_key(|(_, flow)| flow.last_seen)
            .map(|(peer, _)| *peer);
        if let Some(peer) = idlest {
            info!("Forgetting idle flow from {peer}");
            self.flows.remove(&peer);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.flows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time;

    async fn start(drop_probability: f64) -> (SocketAddr, tokio::task::JoinHandle<Result<()>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (addr, tokio::spawn(serve(socket, drop_probability, Some(7))))
    }

    async fn exchange(client: &UdpSocket, server: SocketAddr, payload: &[u8]) -> Option<u64> {
        client.send_to(payload, server).await.unwrap();
        let mut buf = [0u8; RECV_BUFFER];
        match time::timeout(Duration::from_millis(100), client.recv(&mut buf)).await {
            Ok(n) => Some(wire::decode(&buf[..n.unwrap()]).unwrap()),
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn acknowledges_highest_segment() {
        let (server, service) = start(0.0).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        assert_eq!(exchange(&client, server, b"5").await, Some(5));
        assert_eq!(exchange(&client, server, b"3").await, Some(5));
        // Garbage is skipped without an answer and without killing the service.
        assert_eq!(exchange(&client, server, b"five").await, None);
        assert_eq!(exchange(&client, server, b"7").await, Some(7));

        service.abort();
    }

    #[tokio::test]
    async fn peers_have_independent_acknowledgments() {
        let (server, service) = start(0.0).await;
        let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        assert_eq!(exchange(&first, server, b"40").await, Some(40));
        assert_eq!(exchange(&second, server, b"2").await, Some(2));
        assert_eq!(exchange(&first, server, b"41").await, Some(41));

        service.abort();
    }

    #[tokio::test]
    async fn certain_loss_answers_nothing() {
        let (server, service) = start(1.0).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        assert_eq!(exchange(&client, server, b"1").await, None);
        assert_eq!(exchange(&client, server, b"2").await, None);

        service.abort();
    }

    fn receiver() -> Result<Receiver> {
        Receiver::seeded(0.0, 1)
    }

    fn current_ack(flows: &mut Flows, peer: SocketAddr) -> u64 {
        flows.get_or_insert(peer, receiver).unwrap().current_ack()
    }

    #[test]
    fn flows_evict_the_longest_idle_peer() {
        let a: SocketAddr = "127.0.0.1:1001".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:1002".parse().unwrap();
        let c: SocketAddr = "127.0.0.1:1003".parse().unwrap();
        let mut flows = Flows::new(2);

        let first = flows.get_or_insert(a, receiver).unwrap();
        assert_eq!(first.on_segment_received(9), Some(9));
        let second = flows.get_or_insert(b, receiver).unwrap();
        assert_eq!(second.on_segment_received(4), Some(4));
        // a is now more recent than b.
        flows.get_or_insert(a, receiver).unwrap();
        flows.get_or_insert(c, receiver).unwrap();
        assert_eq!(flows.len(), 2);

        // a kept its state, b starts over.
        assert_eq!(current_ack(&mut flows, a), 9);
        assert_eq!(current_ack(&mut flows, b), 0);
        assert_eq!(flows.len(), 2);
    }

    #[tokio::test]
    async fn evicted_peer_starts_a_fresh_flow() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = socket.local_addr().unwrap();
        let service = tokio::spawn(serve_bounded(socket, 0.0, Some(7), 1));
        let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        assert_eq!(exchange(&first, server, b"40").await, Some(40));
        assert_eq!(exchange(&second, server, b"2").await, Some(2));
        // The first peer was forgotten to make room for the second.
        assert_eq!(exchange(&first, server, b"1").await, Some(1));

        service.abort();
    }

    #[tokio::test]
    async fn rejects_invalid_probability() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        assert!(serve(socket, -1.0, None).await.is_err());
    }
}
