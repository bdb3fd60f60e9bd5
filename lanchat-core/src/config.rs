//! Session configuration.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use crate::codec::{validate_display_name, DEFAULT_MAX_FRAME_LEN};
use crate::dispatcher::DEFAULT_RECEIVE_TIMEOUT;
use crate::transport::{MulticastOptions, DEFAULT_MAX_DATAGRAM_LEN};

pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(224, 1, 1, 1);
pub const DEFAULT_PORT: u16 = 10_000;

/// Everything needed to start a [`Session`](crate::session::Session).
///
/// Group and port must match across all peers; there is no discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    pub display_name: String,
    /// Interface for membership and outgoing traffic (`0.0.0.0` = default route).
    pub interface: Ipv4Addr,
    pub ttl: u32,
    pub loopback: bool,
    /// Longest a single receive blocks before the loop rechecks for
    /// cancellation. `stop()` waits up to twice this for the loop to exit.
    pub receive_timeout: Duration,
    pub max_datagram_len: usize,
    pub max_frame_len: usize,
    /// Periodically re-announce presence. `None` = announce only on join.
    pub presence_refresh: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            display_name: "Anon".to_string(),
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 2,
            loopback: true,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            max_datagram_len: DEFAULT_MAX_DATAGRAM_LEN,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            presence_refresh: None,
        }
    }
}

impl SessionConfig {
    /// Default configuration for the given display name.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    pub fn group_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.group, self.port)
    }

    pub fn multicast_options(&self) -> MulticastOptions {
        MulticastOptions {
            ttl: self.ttl,
            loopback: self.loopback,
            interface: self.interface,
            max_datagram_len: self.max_datagram_len,
        }
    }

    /// Check the display name against the wire format's reserved sequences.
    pub fn validate(&self) -> Result<(), &'static str> {
        validate_display_name(&self.display_name)
    }
}
