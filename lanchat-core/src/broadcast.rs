//! In-process multicast group.
//!
//! A [`BroadcastGroup`] behaves like one multicast address/port: every
//! member receives every datagram sent to the group, its own included
//! (loopback always on). Members that fall more than `capacity` datagrams
//! behind lose the oldest ones, which models multicast loss.
//!
//! Used to exercise sessions without a network, and by consumers embedding
//! several peers in one process.

use log::{trace, warn};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};

use crate::transport::{Datagram, Received, Transport, TransportError};

/// Statistics for monitoring group health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub datagrams_sent: u64,
    /// Datagrams skipped by lagging members.
    pub datagrams_dropped: u64,
    pub active_members: usize,
}

struct AtomicBroadcastStats {
    datagrams_sent: AtomicU64,
    datagrams_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            datagrams_sent: AtomicU64::new(0),
            datagrams_dropped: AtomicU64::new(0),
        }
    }
}

/// A shared in-memory group standing in for one multicast address.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Datagram>>,
    capacity: usize,
    next_port: AtomicU16,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` is the per-member backlog before datagrams are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
            next_port: AtomicU16::new(40_000),
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Add a member. It receives everything sent from this point on.
    pub fn join(&self) -> BroadcastTransport {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        BroadcastTransport {
            sender: self.sender.clone(),
            receiver: Mutex::new(Some(self.sender.subscribe())),
            origin: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            closed: watch::Sender::new(false),
            atomic_stats: self.atomic_stats.clone(),
        }
    }

    /// Send raw bytes from outside any member, e.g. a foreign program
    /// sharing the group. Returns the number of members reached.
    pub fn inject(&self, payload: impl Into<Vec<u8>>) -> usize {
        let datagram = Arc::new(Datagram::new(payload, None));
        let count = self.sender.send(datagram).unwrap_or(0);
        self.atomic_stats.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn member_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            datagrams_sent: self.atomic_stats.datagrams_sent.load(Ordering::Relaxed),
            datagrams_dropped: self.atomic_stats.datagrams_dropped.load(Ordering::Relaxed),
            active_members: self.member_count(),
        }
    }
}

/// One member's handle on a [`BroadcastGroup`].
pub struct BroadcastTransport {
    sender: broadcast::Sender<Arc<Datagram>>,
    receiver: Mutex<Option<broadcast::Receiver<Arc<Datagram>>>>,
    /// Synthetic loopback address identifying this member.
    origin: SocketAddr,
    /// Wakes a receive in progress when the member closes.
    closed: watch::Sender<bool>,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastTransport {
    pub fn origin(&self) -> SocketAddr {
        self.origin
    }

    async fn next_datagram(
        &self,
        receiver: &mut broadcast::Receiver<Arc<Datagram>>,
    ) -> Result<Arc<Datagram>, TransportError> {
        loop {
            match receiver.recv().await {
                Ok(datagram) => return Ok(datagram),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("{} lagged, {skipped} datagrams lost", self.origin);
                    self.atomic_stats
                        .datagrams_dropped
                        .fetch_add(skipped, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(TransportError::Closed),
            }
        }
    }
}

impl Transport for BroadcastTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let datagram = Arc::new(Datagram::new(payload, Some(self.origin)));
        // No receivers is not an error for multicast.
        let count = self.sender.send(datagram).unwrap_or(0);
        self.atomic_stats.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        trace!("{} sent {} bytes to {count} members", self.origin, payload.len());
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Received, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut guard = self.receiver.lock().await;
        // close() may have run while we waited for the lock.
        if self.is_closed() {
            guard.take();
            return Err(TransportError::Closed);
        }

        let mut closed = self.closed.subscribe();
        let outcome = {
            let receiver = guard.as_mut().ok_or(TransportError::Closed)?;
            tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => None,
                next = tokio::time::timeout(timeout, self.next_datagram(receiver)) => Some(next),
            }
        };

        match outcome {
            None => {
                guard.take();
                Err(TransportError::Closed)
            }
            Some(Err(_)) => Ok(Received::Timeout),
            Some(Ok(Ok(datagram))) => Ok(Received::Datagram(datagram.as_ref().clone())),
            Some(Ok(Err(e))) => Err(e),
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
        // A receive in progress holds the lock; it drops the receiver itself
        // once it sees the flag.
        if let Ok(mut receiver) = self.receiver.try_lock() {
            receiver.take();
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}
