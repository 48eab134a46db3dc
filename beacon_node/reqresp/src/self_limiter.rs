//! A self-enforced rate limiter for outbound requests.
//!
//! The limiter is generic over the peer identifier so that it does not depend on the
//! transport. Per `(peer, protocol)` at most `MAX_CONCURRENT_REQUESTS` are in flight; the
//! rest queue. Stale in-flight requests are garbage-collected after `REQUEST_TIMEOUT`, and
//! peers with no traffic for `DISCONNECTED_TIMEOUT` are purged entirely.

use crate::protocol::Protocol;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::debug;

/// At most this many concurrent requests per (peer, protocol).
pub const MAX_CONCURRENT_REQUESTS: usize = 2;
/// An in-flight request older than this is assumed lost and its slot reclaimed.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// A peer with no activity for this long is dropped from the limiter.
pub const DISCONNECTED_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, PartialEq)]
pub enum SelfRateLimiterError {
    /// The request was queued behind the concurrency limit.
    RateLimited,
}

/// A request id assigned by the limiter, echoed back on completion.
pub type RequestId = u64;

struct InFlight {
    request_id: RequestId,
    started: Instant,
}

struct PeerState<R> {
    in_flight: HashMap<Protocol, Vec<InFlight>>,
    queued: HashMap<Protocol, VecDeque<(RequestId, R)>>,
    last_seen: Instant,
}

impl<R> Default for PeerState<R> {
    fn default() -> Self {
        Self {
            in_flight: HashMap::new(),
            queued: HashMap::new(),
            last_seen: Instant::now(),
        }
    }
}

/// Limits the requests this node sends, so that a well-behaved peer never needs to ban us.
pub struct SelfRateLimiter<P: Eq + Hash + Clone, R> {
    peers: HashMap<P, PeerState<R>>,
    next_request_id: RequestId,
}

impl<P: Eq + Hash + Clone, R> Default for SelfRateLimiter<P, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Eq + Hash + Clone, R> SelfRateLimiter<P, R> {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            next_request_id: 0,
        }
    }

    fn next_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Ask to send `request` to `peer_id` over `protocol`.
    ///
    /// Returns `Ok(request_id)` when a slot is free; otherwise the request is queued and
    /// `Err(RateLimited)` tells the caller it will be handed back by `next_ready`.
    pub fn allows(
        &mut self,
        peer_id: &P,
        protocol: Protocol,
        request: R,
    ) -> Result<RequestId, SelfRateLimiterError> {
        let request_id = self.next_id();
        let peer = self.peers.entry(peer_id.clone()).or_default();
        peer.last_seen = Instant::now();

        let in_flight = peer.in_flight.entry(protocol).or_default();
        if in_flight.len() < MAX_CONCURRENT_REQUESTS {
            in_flight.push(InFlight {
                request_id,
                started: Instant::now(),
            });
            Ok(request_id)
        } else {
            peer.queued
                .entry(protocol)
                .or_default()
                .push_back((request_id, request));
            Err(SelfRateLimiterError::RateLimited)
        }
    }

    /// Report a request finished (response complete or stream failed), freeing its slot.
    pub fn request_completed(&mut self, peer_id: &P, protocol: Protocol, request_id: RequestId) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.last_seen = Instant::now();
            if let Some(in_flight) = peer.in_flight.get_mut(&protocol) {
                in_flight.retain(|entry| entry.request_id != request_id);
            }
        }
    }

    /// Pop the next queued request for `(peer, protocol)` that now fits within the limit.
    pub fn next_ready(&mut self, peer_id: &P, protocol: Protocol) -> Option<(RequestId, R)> {
        let peer = self.peers.get_mut(peer_id)?;
        let in_flight = peer.in_flight.entry(protocol).or_default();
        if in_flight.len() >= MAX_CONCURRENT_REQUESTS {
            return None;
        }
        let (request_id, request) = peer.queued.get_mut(&protocol)?.pop_front()?;
        in_flight.push(InFlight {
            request_id,
            started: Instant::now(),
        });
        Some((request_id, request))
    }

    /// The number of requests currently in flight for `(peer, protocol)`.
    pub fn in_flight(&self, peer_id: &P, protocol: Protocol) -> usize {
        self.peers
            .get(peer_id)
            .and_then(|peer| peer.in_flight.get(&protocol))
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Garbage-collect timed-out requests and idle peers. Call periodically (e.g. once per
    /// slot).
    pub fn prune(&mut self) {
        let now = Instant::now();
        for peer in self.peers.values_mut() {
            for in_flight in peer.in_flight.values_mut() {
                let before = in_flight.len();
                in_flight.retain(|entry| now.duration_since(entry.started) < REQUEST_TIMEOUT);
                if in_flight.len() < before {
                    debug!(
                        reclaimed = before - in_flight.len(),
                        "Reclaimed timed-out request slots"
                    );
                }
            }
        }
        self.peers
            .retain(|_, peer| now.duration_since(peer.last_seen) < DISCONNECTED_TIMEOUT);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Limiter = SelfRateLimiter<u8, &'static str>;

    #[test]
    fn two_concurrent_then_queued() {
        let mut limiter = Limiter::new();
        let peer = 1u8;

        let first = limiter.allows(&peer, Protocol::BlocksByRange, "a").unwrap();
        let _second = limiter.allows(&peer, Protocol::BlocksByRange, "b").unwrap();
        // The third exceeds MAX_CONCURRENT_REQUESTS and queues.
        assert_eq!(
            limiter.allows(&peer, Protocol::BlocksByRange, "c"),
            Err(SelfRateLimiterError::RateLimited)
        );
        assert_eq!(limiter.in_flight(&peer, Protocol::BlocksByRange), 2);

        // A different protocol on the same peer has its own allowance.
        assert!(limiter.allows(&peer, Protocol::BlobsByRange, "d").is_ok());

        // Completing one request lets the queued one through.
        limiter.request_completed(&peer, Protocol::BlocksByRange, first);
        let (_, request) = limiter.next_ready(&peer, Protocol::BlocksByRange).unwrap();
        assert_eq!(request, "c");
        assert_eq!(limiter.in_flight(&peer, Protocol::BlocksByRange), 2);
        assert!(limiter.next_ready(&peer, Protocol::BlocksByRange).is_none());
    }

    #[test]
    fn prune_reclaims_stale_requests() {
        let mut limiter = Limiter::new();
        let peer = 1u8;
        limiter.allows(&peer, Protocol::Status, "a").unwrap();

        // Force the request into the past.
        limiter
            .peers
            .get_mut(&peer)
            .unwrap()
            .in_flight
            .get_mut(&Protocol::Status)
            .unwrap()[0]
            .started = Instant::now() - REQUEST_TIMEOUT - Duration::from_secs(1);

        limiter.prune();
        assert_eq!(limiter.in_flight(&peer, Protocol::Status), 0);
        // The peer itself is still known (it was seen recently).
        assert_eq!(limiter.peer_count(), 1);
    }

    #[test]
    fn prune_purges_idle_peers() {
        let mut limiter = Limiter::new();
        limiter.allows(&1u8, Protocol::Status, "a").unwrap();
        limiter.peers.get_mut(&1u8).unwrap().last_seen =
            Instant::now() - DISCONNECTED_TIMEOUT - Duration::from_secs(1);

        limiter.prune();
        assert_eq!(limiter.peer_count(), 0);
    }

    #[test]
    fn independent_peers_do_not_interfere() {
        let mut limiter = Limiter::new();
        for peer in 0..4u8 {
            assert!(limiter.allows(&peer, Protocol::BlocksByRoot, "x").is_ok());
            assert!(limiter.allows(&peer, Protocol::BlocksByRoot, "y").is_ok());
            assert!(limiter.allows(&peer, Protocol::BlocksByRoot, "z").is_err());
        }
    }
}
