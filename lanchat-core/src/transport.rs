//! Datagram transport over an IPv4 multicast group.
//!
//! The transport knows nothing about the protocol: it moves byte payloads.
//! Two sockets are used so that sending never contends with the receive loop:
//!
//! ```text
//!  send socket   TTL n, loopback on, ephemeral port ──► group:port
//!  recv socket   SO_REUSEADDR, bound 0.0.0.0:port, joined to group ◄──
//! ```
//!
//! [`Transport`] is the seam the dispatcher and session are generic over;
//! [`BroadcastTransport`](crate::broadcast::BroadcastTransport) implements it
//! in-process for tests.

use log::{debug, trace};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;

/// Largest payload read from the receive socket. Longer datagrams are truncated.
pub const DEFAULT_MAX_DATAGRAM_LEN: usize = 65_536;

const SEND_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to create or configure socket: {0}")]
    Socket(#[source] io::Error),
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to join multicast group {group}: {source}")]
    Join {
        group: Ipv4Addr,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not a multicast address")]
    NotMulticast(Ipv4Addr),
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),
    #[error("transport is closed")]
    Closed,
}

/// One received payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub origin: Option<SocketAddr>,
}

impl Datagram {
    pub fn new(payload: impl Into<Vec<u8>>, origin: Option<SocketAddr>) -> Self {
        Self {
            payload: payload.into(),
            origin,
        }
    }
}

/// Result of a bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Datagram(Datagram),
    /// Nothing arrived within the window. Not an error.
    Timeout,
}

/// Best-effort datagram group membership.
///
/// `send` and `receive` may run concurrently from different tasks.
pub trait Transport: Send + Sync + 'static {
    /// Send one payload to the whole group, this member included when
    /// loopback is on.
    fn send(&self, payload: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait at most `timeout` for the next payload.
    fn receive(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Received, TransportError>> + Send;

    /// Release the underlying resources. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Socket options for [`MulticastTransport::open`].
#[derive(Debug, Clone)]
pub struct MulticastOptions {
    /// Multicast TTL; 1 keeps traffic on the local segment.
    pub ttl: u32,
    /// Deliver our own datagrams back to us.
    pub loopback: bool,
    /// Interface used for membership and outgoing traffic.
    pub interface: Ipv4Addr,
    pub max_datagram_len: usize,
}

impl Default for MulticastOptions {
    fn default() -> Self {
        Self {
            ttl: 2,
            loopback: true,
            interface: Ipv4Addr::UNSPECIFIED,
            max_datagram_len: DEFAULT_MAX_DATAGRAM_LEN,
        }
    }
}

/// UDP multicast transport.
pub struct MulticastTransport {
    group: SocketAddrV4,
    sender: Mutex<Option<Arc<UdpSocket>>>,
    receiver: Mutex<Option<Arc<UdpSocket>>>,
    max_datagram_len: usize,
}

impl MulticastTransport {
    /// Create both sockets and join `group`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(group: SocketAddrV4, options: &MulticastOptions) -> Result<Self, TransportError> {
        if !group.ip().is_multicast() {
            return Err(TransportError::NotMulticast(*group.ip()));
        }

        let sender = open_send_socket(options).map_err(TransportError::Socket)?;
        let receiver = open_recv_socket(group, options)?;

        debug!(
            "joined {group} (ttl={}, loopback={}, if={})",
            options.ttl, options.loopback, options.interface
        );

        Ok(Self {
            group,
            sender: Mutex::new(Some(Arc::new(sender))),
            receiver: Mutex::new(Some(Arc::new(receiver))),
            max_datagram_len: options.max_datagram_len.max(1),
        })
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }

    /// Local address of the receive socket.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        current(&self.receiver)?
            .local_addr()
            .map_err(TransportError::Socket)
    }
}

impl Transport for MulticastTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let socket = current(&self.sender)?;
        let target = SocketAddr::V4(self.group);
        match tokio::time::timeout(SEND_TIMEOUT, socket.send_to(payload, target)).await {
            Ok(Ok(_)) => {
                trace!("sent {} bytes to {target}", payload.len());
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Send(e)),
            Err(_) => Err(TransportError::Send(io::Error::new(
                io::ErrorKind::TimedOut,
                "send buffer stayed full",
            ))),
        }
    }

    async fn receive(&self, timeout: Duration) -> Result<Received, TransportError> {
        let socket = current(&self.receiver)?;
        match tokio::time::timeout(timeout, socket.readable()).await {
            Err(_) => return Ok(Received::Timeout),
            Ok(Err(e)) => return Err(TransportError::Receive(e)),
            Ok(Ok(())) => {}
        }

        // Only allocate once a datagram is actually waiting.
        let mut buf = vec![0u8; self.max_datagram_len];
        match socket.try_recv_from(&mut buf) {
            Ok((len, origin)) => {
                buf.truncate(len);
                trace!("received {len} bytes from {origin}");
                Ok(Received::Datagram(Datagram::new(buf, Some(origin))))
            }
            // Spurious readiness; report an empty round.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Received::Timeout),
            Err(e) => Err(TransportError::Receive(e)),
        }
    }

    fn close(&self) {
        let had_sender = lock(&self.sender).take().is_some();
        let had_receiver = lock(&self.receiver).take().is_some();
        if had_sender || had_receiver {
            debug!("closed transport for {}", self.group);
        }
    }

    fn is_closed(&self) -> bool {
        lock(&self.receiver).is_none()
    }
}

fn lock(slot: &Mutex<Option<Arc<UdpSocket>>>) -> MutexGuard<'_, Option<Arc<UdpSocket>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clone the socket out so the guard is released before any await.
fn current(slot: &Mutex<Option<Arc<UdpSocket>>>) -> Result<Arc<UdpSocket>, TransportError> {
    lock(slot).clone().ok_or(TransportError::Closed)
}

fn open_send_socket(options: &MulticastOptions) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_ttl_v4(options.ttl)?;
    socket.set_multicast_loop_v4(options.loopback)?;
    if !options.interface.is_unspecified() {
        socket.set_multicast_if_v4(&options.interface)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))?;
    into_tokio(socket)
}

fn open_recv_socket(
    group: SocketAddrV4,
    options: &MulticastOptions,
) -> Result<UdpSocket, TransportError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(TransportError::Socket)?;

    socket
        .set_reuse_address(true)
        .map_err(TransportError::Socket)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true).map_err(TransportError::Socket)?;
    socket.set_nonblocking(true).map_err(TransportError::Socket)?;

    let port = group.port();
    socket
        .bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))
        .map_err(|source| TransportError::Bind { port, source })?;

    socket
        .join_multicast_v4(group.ip(), &options.interface)
        .map_err(|source| TransportError::Join {
            group: *group.ip(),
            source,
        })?;

    into_tokio(socket).map_err(TransportError::Socket)
}

fn into_tokio(socket: Socket) -> io::Result<UdpSocket> {
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_rejects_unicast_group() {
        let group = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 10_000);
        let result = MulticastTransport::open(group, &MulticastOptions::default());
        assert!(matches!(
            result,
            Err(TransportError::NotMulticast(ip)) if ip == Ipv4Addr::new(192, 168, 1, 1)
        ));
    }

    #[test]
    fn test_default_options() {
        let options = MulticastOptions::default();
        assert_eq!(options.ttl, 2);
        assert!(options.loopback);
        assert!(options.interface.is_unspecified());
        assert_eq!(options.max_datagram_len, DEFAULT_MAX_DATAGRAM_LEN);
    }

    #[test]
    fn test_error_messages() {
        let err = TransportError::Join {
            group: Ipv4Addr::new(224, 1, 1, 1),
            source: io::Error::new(io::ErrorKind::Other, "no route"),
        };
        assert_eq!(err.to_string(), "failed to join multicast group 224.1.1.1: no route");
        assert_eq!(TransportError::Closed.to_string(), "transport is closed");
    }

    #[tokio::test]
    #[ignore = "requires a multicast-capable interface"]
    async fn test_multicast_loopback_roundtrip() {
        let group = SocketAddrV4::new(Ipv4Addr::new(239, 255, 77, 1), 47_101);
        let transport = MulticastTransport::open(group, &MulticastOptions::default()).unwrap();

        transport.send(b"ping").await.unwrap();
        let received = transport.receive(Duration::from_secs(2)).await.unwrap();
        match received {
            Received::Datagram(d) => assert_eq!(d.payload, b"ping"),
            Received::Timeout => panic!("loopback datagram not received"),
        }

        transport.close();
        transport.close();
        assert!(transport.is_closed());
        assert!(matches!(
            transport.send(b"late").await,
            Err(TransportError::Closed)
        ));
    }
}
