//! Decentralized presence: who is in the group, as inferred from control
//! traffic seen on the wire.
//!
//! ## Protocol
//!
//! ```text
//!   new peer X                       every live peer P
//!       │   __JOIN__:X   ──────────────►  │  X → Present, notice "X joined"
//!       │                                 │
//!       │  ◄──────────  __PRESENCE__:P    │  reply
//!   P → Present                           │
//!       │   __LEAVE__:X  ──────────────►  │  X → Departed
//! ```
//!
//! There is no directory. Views converge only if no control datagram is lost;
//! nothing is acknowledged or retried.
//!
//! [`PresenceTracker`] is a pure state machine: it performs no I/O and hands
//! back the events to emit plus an optional reply for the caller to send.

use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::codec::ControlMessage;
use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerState {
    Present,
    Departed,
}

/// A peer observed on the group. Identity is the display name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Peer {
    pub name: String,
    pub state: PeerState,
    /// Last control message referencing this peer.
    pub last_seen: DateTime<Utc>,
}

impl Peer {
    fn present(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: PeerState::Present,
            last_seen: Utc::now(),
        }
    }

    pub fn is_present(&self) -> bool {
        self.state == PeerState::Present
    }
}

/// Outcome of applying one control message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    /// Events to hand to the consumer, in order.
    pub events: Vec<Event>,
    /// Control message the caller must broadcast.
    pub reply: Option<ControlMessage>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.reply.is_none()
    }
}

/// Membership map for one local peer.
///
/// The local peer is inserted as present on construction and can never be
/// removed or marked departed through [`apply`](Self::apply).
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    local_name: String,
    peers: HashMap<String, Peer>,
}

impl PresenceTracker {
    pub fn new(local_name: impl Into<String>) -> Self {
        let local_name = local_name.into();
        let mut peers = HashMap::new();
        peers.insert(local_name.clone(), Peer::present(&local_name));
        Self { local_name, peers }
    }

    /// Apply an observed control message.
    pub fn apply(&mut self, msg: &ControlMessage) -> Transition {
        match msg {
            ControlMessage::Join(name) if *name == self.local_name => {
                trace!("ignoring own join echo");
                Transition::default()
            }

            ControlMessage::Join(name) => {
                let added = self.mark_present(name);
                debug!("{name} joined (new: {added})");

                let mut events = vec![Event::SystemNotice(format!("{name} joined"))];
                if added {
                    events.push(Event::PeerAdded(name.clone()));
                }
                Transition {
                    events,
                    reply: Some(ControlMessage::Presence(self.local_name.clone())),
                }
            }

            ControlMessage::Presence(name) => {
                if self.mark_present(name) {
                    debug!("{name} is present");
                    Transition {
                        events: vec![Event::PeerAdded(name.clone())],
                        reply: None,
                    }
                } else {
                    Transition::default()
                }
            }

            ControlMessage::Leave(name) if *name == self.local_name => {
                trace!("ignoring own leave echo");
                Transition::default()
            }

            ControlMessage::Leave(name) => {
                if self.mark_departed(name) {
                    debug!("{name} left");
                    Transition {
                        events: vec![Event::PeerRemoved(name.clone())],
                        reply: None,
                    }
                } else {
                    Transition::default()
                }
            }
        }
    }

    /// Mark a remote peer departed without having seen its LEAVE.
    ///
    /// Returns the `PeerRemoved` event if the peer was present.
    pub fn remove(&mut self, name: &str) -> Option<Event> {
        if name == self.local_name {
            return None;
        }
        self.mark_departed(name)
            .then(|| Event::PeerRemoved(name.to_string()))
    }

    /// Returns true if the peer was not present before.
    fn mark_present(&mut self, name: &str) -> bool {
        match self.peers.entry(name.to_string()) {
            Entry::Occupied(mut slot) => {
                let peer = slot.get_mut();
                let was_present = peer.is_present();
                peer.state = PeerState::Present;
                peer.last_seen = Utc::now();
                !was_present
            }
            Entry::Vacant(slot) => {
                slot.insert(Peer::present(name));
                true
            }
        }
    }

    /// Returns true if the peer was present before.
    fn mark_departed(&mut self, name: &str) -> bool {
        match self.peers.get_mut(name) {
            Some(peer) => {
                let was_present = peer.is_present();
                peer.state = PeerState::Departed;
                peer.last_seen = Utc::now();
                was_present
            }
            None => false,
        }
    }

    /// Present peers, sorted by name, local peer included.
    pub fn members(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .peers
            .values()
            .filter(|p| p.is_present())
            .map(|p| p.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn member_count(&self) -> usize {
        self.peers.values().filter(|p| p.is_present()).count()
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.peers.get(name).is_some_and(Peer::is_present)
    }

    /// Look up a peer in any state.
    pub fn peer(&self, name: &str) -> Option<&Peer> {
        self.peers.get(name)
    }

    /// All known peers, departed ones included.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Announcement the local peer broadcasts when it starts.
    pub fn join_message(&self) -> ControlMessage {
        ControlMessage::Join(self.local_name.clone())
    }

    /// Periodic re-announcement.
    pub fn presence_message(&self) -> ControlMessage {
        ControlMessage::Presence(self.local_name.clone())
    }

    pub fn leave_message(&self) -> ControlMessage {
        ControlMessage::Leave(self.local_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(name: &str) -> ControlMessage {
        ControlMessage::Join(name.into())
    }

    fn presence(name: &str) -> ControlMessage {
        ControlMessage::Presence(name.into())
    }

    fn leave(name: &str) -> ControlMessage {
        ControlMessage::Leave(name.into())
    }

    // ── Seeding ──────────────────────────────────────────────────

    #[test]
    fn test_local_peer_present_on_creation() {
        let tracker = PresenceTracker::new("alice");
        assert_eq!(tracker.members(), vec!["alice"]);
        assert!(tracker.is_present("alice"));
        assert_eq!(tracker.local_name(), "alice");
    }

    // ── JOIN ─────────────────────────────────────────────────────

    #[test]
    fn test_remote_join_adds_and_replies() {
        let mut tracker = PresenceTracker::new("bob");
        let t = tracker.apply(&join("alice"));

        assert_eq!(
            t.events,
            vec![
                Event::SystemNotice("alice joined".into()),
                Event::PeerAdded("alice".into()),
            ]
        );
        assert_eq!(t.reply, Some(presence("bob")));
        assert_eq!(tracker.members(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_self_join_suppressed() {
        let mut tracker = PresenceTracker::new("bob");
        let t = tracker.apply(&join("bob"));

        assert!(t.is_empty());
        assert_eq!(tracker.members(), vec!["bob"]);
    }

    #[test]
    fn test_rejoin_of_present_peer_still_replies() {
        let mut tracker = PresenceTracker::new("bob");
        tracker.apply(&join("alice"));
        let t = tracker.apply(&join("alice"));

        // No second PeerAdded, but the rejoiner still needs our presence.
        assert_eq!(t.events, vec![Event::SystemNotice("alice joined".into())]);
        assert_eq!(t.reply, Some(presence("bob")));
        assert_eq!(tracker.member_count(), 2);
    }

    // ── PRESENCE ─────────────────────────────────────────────────

    #[test]
    fn test_presence_is_idempotent() {
        let mut tracker = PresenceTracker::new("bob");
        let first = tracker.apply(&presence("alice"));
        let after_first = tracker.members();
        let second = tracker.apply(&presence("alice"));

        assert_eq!(first.events, vec![Event::PeerAdded("alice".into())]);
        assert!(second.is_empty());
        assert_eq!(tracker.members(), after_first);
    }

    #[test]
    fn test_presence_never_replies() {
        let mut tracker = PresenceTracker::new("bob");
        assert!(tracker.apply(&presence("alice")).reply.is_none());
    }

    #[test]
    fn test_presence_revives_departed_peer() {
        let mut tracker = PresenceTracker::new("bob");
        tracker.apply(&presence("alice"));
        tracker.apply(&leave("alice"));
        assert!(!tracker.is_present("alice"));

        let t = tracker.apply(&presence("alice"));
        assert_eq!(t.events, vec![Event::PeerAdded("alice".into())]);
        assert!(tracker.is_present("alice"));
    }

    // ── LEAVE ────────────────────────────────────────────────────

    #[test]
    fn test_leave_removes_exactly_one() {
        let mut tracker = PresenceTracker::new("dave");
        tracker.apply(&presence("carol"));

        let t = tracker.apply(&leave("carol"));
        assert_eq!(t.events, vec![Event::PeerRemoved("carol".into())]);
        assert_eq!(tracker.members(), vec!["dave"]);
    }

    #[test]
    fn test_departed_peer_retained() {
        let mut tracker = PresenceTracker::new("dave");
        tracker.apply(&presence("carol"));
        tracker.apply(&leave("carol"));

        let carol = tracker.peer("carol").unwrap();
        assert_eq!(carol.state, PeerState::Departed);
        assert_eq!(tracker.peers().count(), 2);
        assert_eq!(tracker.member_count(), 1);
    }

    #[test]
    fn test_leave_of_unknown_peer_is_silent() {
        let mut tracker = PresenceTracker::new("dave");
        assert!(tracker.apply(&leave("ghost")).is_empty());
        assert!(tracker.peer("ghost").is_none());
    }

    #[test]
    fn test_own_leave_echo_ignored() {
        let mut tracker = PresenceTracker::new("dave");
        assert!(tracker.apply(&leave("dave")).is_empty());
        assert!(tracker.is_present("dave"));
    }

    #[test]
    fn test_local_remove() {
        let mut tracker = PresenceTracker::new("dave");
        tracker.apply(&presence("erin"));

        assert_eq!(tracker.remove("erin"), Some(Event::PeerRemoved("erin".into())));
        assert_eq!(tracker.remove("erin"), None);
        assert_eq!(tracker.remove("dave"), None);
        assert_eq!(tracker.members(), vec!["dave"]);
    }

    // ── Convergence ──────────────────────────────────────────────

    /// Deliver a reply to every tracker except its author.
    fn deliver(trackers: &mut [&mut PresenceTracker], msg: &ControlMessage) {
        for t in trackers.iter_mut() {
            if t.local_name() != msg.name() {
                t.apply(msg);
            }
        }
    }

    #[test]
    fn test_join_presence_convergence() {
        let mut a = PresenceTracker::new("A");
        let mut b = PresenceTracker::new("B");
        let c = PresenceTracker::new("C");

        // B sees A's join and answers; A sees the answer.
        let reply = b.apply(&a.join_message()).reply.unwrap();
        deliver(&mut [&mut a], &reply);

        assert_eq!(a.members(), vec!["A", "B"]);
        assert_eq!(b.members(), vec!["A", "B"]);
        assert_eq!(c.members(), vec!["C"]);
    }

    #[test]
    fn test_convergence_independent_of_order() {
        // A processes B's presence before B has even seen the join.
        let mut a = PresenceTracker::new("A");
        let mut b = PresenceTracker::new("B");

        a.apply(&b.presence_message());
        b.apply(&a.join_message());

        assert_eq!(a.members(), b.members());
    }

    #[test]
    fn test_three_way_join_sequence() {
        let mut a = PresenceTracker::new("A");
        let mut b = PresenceTracker::new("B");
        let mut c = PresenceTracker::new("C");

        // A joins; B and C are listening.
        let join_a = a.join_message();
        let rb = b.apply(&join_a).reply.unwrap();
        let rc = c.apply(&join_a).reply.unwrap();
        deliver(&mut [&mut a, &mut b, &mut c], &rb);
        deliver(&mut [&mut a, &mut b, &mut c], &rc);

        let expected = vec!["A", "B", "C"];
        assert_eq!(a.members(), expected);
        assert_eq!(b.members(), expected);
        assert_eq!(c.members(), expected);
    }

    #[test]
    fn test_lifecycle_messages() {
        let tracker = PresenceTracker::new("zed");
        assert_eq!(tracker.join_message(), join("zed"));
        assert_eq!(tracker.presence_message(), presence("zed"));
        assert_eq!(tracker.leave_message(), leave("zed"));
    }
}
