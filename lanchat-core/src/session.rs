//! The consumer-facing handle on one peer's group membership.
//!
//! Provides:
//! - Lifecycle: `start` joins and announces, `stop` says goodbye and releases
//!   the sockets
//! - `send` for chat lines
//! - `poll` for everything the receive loop produced since the last call
//!
//! Two activities per session: the dispatcher task (sole producer of events)
//! and whoever calls `poll` (sole drainer). `send` only touches the
//! transport's send path and never waits on the receive loop.

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{ChatText, Codec, CodecError, ControlMessage};
use crate::config::SessionConfig;
use crate::dispatcher::{CancelFlag, Dispatcher};
use crate::event::Event;
use crate::presence::PresenceTracker;
use crate::stats::{SessionStats, StatsSnapshot};
use crate::transport::{MulticastTransport, Transport, TransportError};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to join the group: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid display name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("message too large: {0}")]
    TooLarge(#[from] CodecError),
    #[error("session is stopped")]
    Stopped,
}

pub struct Session<T: Transport = MulticastTransport> {
    display_name: String,
    codec: Codec,
    transport: Option<Arc<T>>,
    events: mpsc::UnboundedReceiver<Event>,
    cancel: CancelFlag,
    dispatcher: Option<JoinHandle<PresenceTracker>>,
    /// How long `stop` waits for the dispatcher to notice cancellation.
    stop_grace: Duration,
    stats: Arc<SessionStats>,
}

impl Session<MulticastTransport> {
    /// Join the multicast group described by `config` and announce ourselves.
    pub async fn start(config: SessionConfig) -> Result<Self, StartError> {
        check_name(&config)?;
        let transport = MulticastTransport::open(config.group_addr(), &config.multicast_options())?;
        Self::launch(transport, config).await
    }
}

impl<T: Transport> Session<T> {
    /// Start over an already-open transport.
    pub async fn with_transport(transport: T, config: SessionConfig) -> Result<Self, StartError> {
        check_name(&config)?;
        Self::launch(transport, config).await
    }

    async fn launch(transport: T, config: SessionConfig) -> Result<Self, StartError> {
        let transport = Arc::new(transport);
        let codec = Codec::new(config.max_frame_len);
        let stats = Arc::new(SessionStats::default());
        let cancel = CancelFlag::default();
        let (sink, events) = mpsc::unbounded_channel();

        let tracker = PresenceTracker::new(config.display_name.clone());
        let join = tracker.join_message();
        // Seed the consumer's view with ourselves before any network event.
        let _ = sink.send(Event::PeerAdded(config.display_name.clone()));

        let dispatcher = Dispatcher::new(transport.clone(), codec, tracker, sink, cancel.clone())
            .with_receive_timeout(config.receive_timeout)
            .with_presence_refresh(config.presence_refresh)
            .with_stats(stats.clone());
        let handle = tokio::spawn(dispatcher.run());

        // The receive loop is live, so replies to this JOIN are not missed.
        if let Err(e) = transport.send(&codec.encode_control(&join)).await {
            cancel.cancel();
            handle.abort();
            transport.close();
            return Err(StartError::Transport(e));
        }
        stats.record_control_sent();
        info!("{} joined the group", config.display_name);

        Ok(Self {
            display_name: config.display_name,
            codec,
            transport: Some(transport),
            events,
            cancel,
            dispatcher: Some(handle),
            stop_grace: config.receive_timeout * 2,
            stats,
        })
    }

    /// Send a chat line as the local peer.
    ///
    /// Not echoed locally: loopback delivers it through the receive path.
    pub async fn send(&self, text: &str) -> Result<(), SendError> {
        let transport = self.transport.as_ref().ok_or(SendError::Stopped)?;
        let frame = self
            .codec
            .encode_chat(&ChatText::new(self.display_name.as_str(), text));
        self.codec.check_len(&frame)?;

        if let Err(e) = transport.send(&frame).await {
            self.stats.record_send_failure();
            return Err(e.into());
        }
        self.stats.record_chat_sent();
        Ok(())
    }

    /// Drain every queued event in arrival order. Never blocks.
    pub fn poll(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Stop the receive loop, announce departure and release the sockets.
    ///
    /// The receive loop has exited before `LEAVE` is sent, so `LEAVE` is the
    /// last thing this peer puts on the wire. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };

        self.cancel.cancel();
        if let Some(mut handle) = self.dispatcher.take() {
            match tokio::time::timeout(self.stop_grace, &mut handle).await {
                Ok(Ok(tracker)) => debug!("final membership: {:?}", tracker.members()),
                Ok(Err(e)) => warn!("dispatcher task failed: {e}"),
                Err(_) => {
                    warn!("dispatcher did not stop within {:?}, aborting", self.stop_grace);
                    handle.abort();
                    // Resolves once the task has actually been torn down.
                    let _ = handle.await;
                }
            }
        }

        let leave = ControlMessage::Leave(self.display_name.clone());
        match transport.send(&self.codec.encode_control(&leave)).await {
            Ok(()) => self.stats.record_control_sent(),
            Err(e) => {
                self.stats.record_send_failure();
                warn!("failed to announce leave: {e}");
            }
        }

        transport.close();
        info!("{} left the group", self.display_name);
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_running(&self) -> bool {
        self.transport.is_some()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            warn!(
                "session for {} dropped without stop(); no LEAVE sent",
                self.display_name
            );
            // Not aborted: the loop exits by itself once it sees the cancel
            // flag or the closed transport.
            self.cancel.cancel();
            drop(self.dispatcher.take());
            transport.close();
        }
    }
}

fn check_name(config: &SessionConfig) -> Result<(), StartError> {
    config.validate().map_err(|reason| StartError::InvalidName {
        name: config.display_name.clone(),
        reason,
    })
}
