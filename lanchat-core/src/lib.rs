//! # lanchat-core: serverless group chat over IP multicast
//!
//! Peers on one LAN segment share a multicast group/port. Each peer
//! announces itself, tracks who else is present from the control traffic it
//! observes, and exchanges chat lines. There is no server and no directory.
//!
//! ## Architecture
//!
//! ```text
//!  consumer (terminal, GUI tick, websocket fan-out)
//!     │ send(text)                   ▲ poll() -> Vec<Event>
//!     ▼                              │
//! ┌─────────┐                  ┌─────┴──────┐
//! │ Session │──── spawn ──────►│ Dispatcher │ (own task)
//! └────┬────┘                  └─────┬──────┘
//!      │ encode                      │ receive(timeout) → decode
//!      ▼                             │   control → PresenceTracker
//! ┌─────────────────────────────┐    │   chat    → ChatReceived
//! │ Transport (multicast / mem) │◄───┘
//! └─────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`transport`]: multicast sockets behind the [`Transport`] trait
//! - [`broadcast`]: in-process group implementing [`Transport`]
//! - [`codec`]: text wire format and classification
//! - [`presence`]: membership state machine
//! - [`dispatcher`]: the receive loop
//! - [`session`]: start / send / poll / stop
//!
//! Delivery is best-effort: nothing is acknowledged, retried or ordered
//! across peers.

pub mod broadcast;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod event;
pub mod presence;
pub mod session;
pub mod stats;
pub mod transport;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, BroadcastTransport};
pub use codec::{ChatText, Codec, CodecError, ControlMessage, DecodedMessage};
pub use config::SessionConfig;
pub use dispatcher::{CancelFlag, Dispatcher};
pub use event::{Event, Message, MessageKind};
pub use presence::{Peer, PeerState, PresenceTracker, Transition};
pub use session::{SendError, Session, StartError};
pub use stats::StatsSnapshot;
pub use transport::{
    Datagram, MulticastOptions, MulticastTransport, Received, Transport, TransportError,
};
