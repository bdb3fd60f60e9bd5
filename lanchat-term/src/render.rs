//! Line formatting for the terminal.

use crate::roster::Roster;
use chrono::{Local, TimeZone};
use lanchat_core::{Message, MessageKind};

const TIME_FORMAT: &str = "%H:%M:%S";

pub fn format_message(msg: &Message) -> String {
    format_message_in(msg, &Local)
}

/// Format with timestamps rendered in `tz`.
pub fn format_message_in<Tz>(msg: &Message, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let time = msg.timestamp.with_timezone(tz).format(TIME_FORMAT);
    match msg.kind {
        MessageKind::Chat if msg.local => format!("[{time}] {} (you): {}", msg.sender, msg.text),
        MessageKind::Chat => format!("[{time}] {}: {}", msg.sender, msg.text),
        MessageKind::System => format!("[{time}] * {}", msg.text),
    }
}

pub fn format_roster(roster: &Roster) -> String {
    format!("-- online ({}): {}", roster.len(), roster.lines().join("  "))
}
