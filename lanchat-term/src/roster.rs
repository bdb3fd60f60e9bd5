//! Consumer-side membership list.
//!
//! Rebuilt only from `PeerAdded` / `PeerRemoved` events drained on the UI
//! thread; the session's own presence map is never touched from here.
//!
//! ```text
//!  Session::poll()
//!       │
//!       ▼
//!  Roster::handle_event()   ── marks dirty on change
//!       │
//!       ▼
//!  Roster::lines()          ── redraw when dirty
//! ```

use lanchat_core::Event;
use std::collections::BTreeSet;

const LOCAL_ICON: &str = "👤";
const REMOTE_ICON: &str = "🟢";

pub struct Roster {
    local: String,
    members: BTreeSet<String>,
    /// Membership changed since the last redraw.
    dirty: bool,
}

impl Roster {
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            members: BTreeSet::new(),
            dirty: false,
        }
    }

    /// Returns `true` if membership changed.
    pub fn handle_event(&mut self, event: &Event) -> bool {
        let changed = match event {
            Event::PeerAdded(name) => self.members.insert(name.clone()),
            Event::PeerRemoved(name) => self.members.remove(name),
            Event::ChatReceived(_) | Event::SystemNotice(_) => false,
        };
        self.dirty |= changed;
        changed
    }

    /// Sorted display lines, local peer marked distinctly.
    pub fn lines(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|name| {
                let icon = if *name == self.local { LOCAL_ICON } else { REMOTE_ICON };
                format!("{icon} {name}")
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    /// Read and clear the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
