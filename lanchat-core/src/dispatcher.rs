//! Receive loop: wire activity in, [`Event`]s out.
//!
//! ```text
//! Transport::receive(timeout)
//!       │ Timeout ──► check cancel flag, maybe re-announce, loop
//!       ▼ Datagram
//! Codec::decode
//!       ├─ Control ──► PresenceTracker::apply ──► events ──► sink
//!       │                                    └──► reply ──► Transport::send
//!       ├─ Chat ─────► ChatReceived ──────────────────────► sink
//!       └─ Unrecognized / oversized ──► SystemNotice ─────► sink
//! ```
//!
//! The dispatcher owns the [`PresenceTracker`]; nothing else mutates
//! membership. Events reach the sink in datagram arrival order.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::codec::{Codec, ControlMessage, DecodedMessage};
use crate::event::{Event, Message};
use crate::presence::PresenceTracker;
use crate::stats::SessionStats;
use crate::transport::{Datagram, Received, Transport, TransportError};

/// How long a single receive may block before the cancel flag is rechecked.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a failed receive so a persistent socket error does not spin.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Cooperative stop signal shared between a session and its dispatcher.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    codec: Codec,
    tracker: PresenceTracker,
    sink: mpsc::UnboundedSender<Event>,
    cancel: CancelFlag,
    receive_timeout: Duration,
    presence_refresh: Option<Duration>,
    stats: Arc<SessionStats>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        transport: Arc<T>,
        codec: Codec,
        tracker: PresenceTracker,
        sink: mpsc::UnboundedSender<Event>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            transport,
            codec,
            tracker,
            sink,
            cancel,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            presence_refresh: None,
            stats: Arc::new(SessionStats::default()),
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Re-broadcast `PRESENCE:self` every `interval`.
    pub fn with_presence_refresh(mut self, interval: Option<Duration>) -> Self {
        self.presence_refresh = interval;
        self
    }

    pub fn with_stats(mut self, stats: Arc<SessionStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    /// Run until cancelled or the transport closes underneath us.
    ///
    /// Returns the final membership state.
    pub async fn run(mut self) -> PresenceTracker {
        info!("dispatcher started for {}", self.tracker.local_name());
        let mut last_refresh = Instant::now();

        while !self.cancel.is_cancelled() {
            match self.transport.receive(self.receive_timeout).await {
                Ok(Received::Timeout) => {}
                Ok(Received::Datagram(datagram)) => {
                    // A stop may have raced with this datagram; drop it.
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.handle_datagram(datagram).await;
                }
                Err(TransportError::Closed) => {
                    debug!("transport closed, dispatcher exiting");
                    break;
                }
                Err(e) => {
                    warn!("{e}");
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(interval) = self.presence_refresh {
                if last_refresh.elapsed() >= interval {
                    last_refresh = Instant::now();
                    let presence = self.tracker.presence_message();
                    self.send_control(&presence).await;
                }
            }
        }

        info!(
            "dispatcher stopped for {} ({} members)",
            self.tracker.local_name(),
            self.tracker.member_count()
        );
        self.tracker
    }

    /// Decode one datagram and route the result.
    pub async fn handle_datagram(&mut self, datagram: Datagram) {
        self.stats.record_datagram();

        match self.codec.decode(&datagram.payload) {
            Ok(DecodedMessage::Control(msg)) => {
                let transition = self.tracker.apply(&msg);
                for event in transition.events {
                    self.emit(event);
                }
                if let Some(reply) = transition.reply {
                    self.send_control(&reply).await;
                }
            }
            Ok(DecodedMessage::Chat(chat)) => {
                let local = chat.sender == self.tracker.local_name();
                let message = Message::chat(chat.sender, chat.text, datagram.origin, local);
                self.emit(Event::ChatReceived(message));
            }
            Ok(DecodedMessage::Unrecognized(raw)) => {
                debug!("unrecognized payload from {:?}: {raw:?}", datagram.origin);
                self.stats.record_rejected();
                self.emit(Event::SystemNotice(raw));
            }
            Err(e) => {
                warn!("dropped frame from {:?}: {e}", datagram.origin);
                self.stats.record_rejected();
                self.emit(Event::SystemNotice(format!("dropped frame: {e}")));
            }
        }
    }

    fn emit(&self, event: Event) {
        // A consumer that dropped its queue simply stops seeing events.
        if self.sink.send(event).is_ok() {
            self.stats.record_event();
        }
    }

    async fn send_control(&self, msg: &ControlMessage) {
        let frame = self.codec.encode_control(msg);
        match self.transport.send(&frame).await {
            Ok(()) => self.stats.record_control_sent(),
            Err(e) => {
                self.stats.record_send_failure();
                warn!("failed to send {msg:?}: {e}");
            }
        }
    }
}
