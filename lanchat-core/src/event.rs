//! Events handed from the dispatcher to the consumer.
//!
//! [`Event`] is the only type that crosses from the receive task to whatever
//! drains [`Session::poll`](crate::session::Session::poll). Both types
//! serialize, so a consumer can forward them as-is (e.g. as JSON to a
//! websocket fan-out).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Chat,
    System,
}

/// A render-ready line of conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub kind: MessageKind,
    /// Empty for system messages.
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Source address of the datagram, when the transport knows it.
    pub origin: Option<SocketAddr>,
    /// Sent by the local peer and looped back.
    pub local: bool,
}

impl Message {
    pub fn chat(
        sender: impl Into<String>,
        text: impl Into<String>,
        origin: Option<SocketAddr>,
        local: bool,
    ) -> Self {
        Self {
            kind: MessageKind::Chat,
            sender: sender.into(),
            text: text.into(),
            timestamp: Utc::now(),
            origin,
            local,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::System,
            sender: String::new(),
            text: text.into(),
            timestamp: Utc::now(),
            origin: None,
            local: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Event {
    ChatReceived(Message),
    SystemNotice(String),
    PeerAdded(String),
    PeerRemoved(String),
}

impl Event {
    /// View chat and system notices as a conversation line.
    ///
    /// Membership changes return `None`; they belong in a roster, not the log.
    pub fn to_message(&self) -> Option<Message> {
        match self {
            Event::ChatReceived(msg) => Some(msg.clone()),
            Event::SystemNotice(text) => Some(Message::system(text.clone())),
            Event::PeerAdded(_) | Event::PeerRemoved(_) => None,
        }
    }

    /// Peer name for membership events.
    pub fn peer_name(&self) -> Option<&str> {
        match self {
            Event::PeerAdded(name) | Event::PeerRemoved(name) => Some(name),
            Event::ChatReceived(_) | Event::SystemNotice(_) => None,
        }
    }
}
