//! Text wire format for chat lines and membership control datagrams.
//!
//! One datagram carries exactly one message, UTF-8, no framing:
//! ```text
//! __JOIN__:<name>        peer announces itself to the group
//! __PRESENCE__:<name>    reply to a JOIN, "I am here too"
//! __LEAVE__:<name>       clean departure
//! <name>: <text>         chat line
//! ```
//!
//! Names and text are not escaped. A name containing `": "` or starting with
//! a control prefix will be misclassified by every receiver; the session
//! refuses such names for the local peer (see [`validate_display_name`]).

use thiserror::Error;

pub const JOIN_PREFIX: &str = "__JOIN__:";
pub const PRESENCE_PREFIX: &str = "__PRESENCE__:";
pub const LEAVE_PREFIX: &str = "__LEAVE__:";

/// Separates sender from text in a chat line. Only the first occurrence counts.
pub const CHAT_DELIMITER: &str = ": ";

/// Frames above this size are rejected on decode and refused on send.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Membership lifecycle message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlMessage {
    Join(String),
    Presence(String),
    Leave(String),
}

impl ControlMessage {
    /// The peer name carried by any variant.
    pub fn name(&self) -> &str {
        match self {
            ControlMessage::Join(name)
            | ControlMessage::Presence(name)
            | ControlMessage::Leave(name) => name,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            ControlMessage::Join(_) => JOIN_PREFIX,
            ControlMessage::Presence(_) => PRESENCE_PREFIX,
            ControlMessage::Leave(_) => LEAVE_PREFIX,
        }
    }
}

/// A chat line before it gets a timestamp and origin attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatText {
    pub sender: String,
    pub text: String,
}

impl ChatText {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// Classification of one received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    Control(ControlMessage),
    Chat(ChatText),
    /// Matched no control prefix and had no chat delimiter.
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },
}

/// Stateless encoder/decoder with a frame size policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    max_frame_len: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Codec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Encode a chat line as `<sender>: <text>`.
    pub fn encode_chat(&self, chat: &ChatText) -> Vec<u8> {
        let mut frame =
            String::with_capacity(chat.sender.len() + CHAT_DELIMITER.len() + chat.text.len());
        frame.push_str(&chat.sender);
        frame.push_str(CHAT_DELIMITER);
        frame.push_str(&chat.text);
        frame.into_bytes()
    }

    /// Encode a control message as `<prefix><name>`.
    pub fn encode_control(&self, msg: &ControlMessage) -> Vec<u8> {
        format!("{}{}", msg.prefix(), msg.name()).into_bytes()
    }

    /// Reject frames larger than the configured limit.
    pub fn check_len(&self, frame: &[u8]) -> Result<(), CodecError> {
        if frame.len() > self.max_frame_len {
            return Err(CodecError::Oversized {
                len: frame.len(),
                max: self.max_frame_len,
            });
        }
        Ok(())
    }

    /// Classify a datagram payload.
    ///
    /// Control prefixes are checked first, then the chat delimiter. Invalid
    /// UTF-8 is replaced rather than rejected so the payload still surfaces
    /// as text.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedMessage, CodecError> {
        self.check_len(bytes)?;
        let text = String::from_utf8_lossy(bytes);
        Ok(classify(&text))
    }
}

fn classify(text: &str) -> DecodedMessage {
    if let Some(name) = text.strip_prefix(JOIN_PREFIX) {
        return control(ControlMessage::Join, name, text);
    }
    if let Some(name) = text.strip_prefix(PRESENCE_PREFIX) {
        return control(ControlMessage::Presence, name, text);
    }
    if let Some(name) = text.strip_prefix(LEAVE_PREFIX) {
        return control(ControlMessage::Leave, name, text);
    }

    match text.split_once(CHAT_DELIMITER) {
        Some((sender, body)) => DecodedMessage::Chat(ChatText::new(sender, body)),
        None => DecodedMessage::Unrecognized(text.to_string()),
    }
}

fn control(make: fn(String) -> ControlMessage, name: &str, raw: &str) -> DecodedMessage {
    if name.is_empty() {
        DecodedMessage::Unrecognized(raw.to_string())
    } else {
        DecodedMessage::Control(make(name.to_string()))
    }
}

/// Check that `name` round-trips through the wire format unambiguously.
///
/// Returns the reason on failure.
pub fn validate_display_name(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("name is empty");
    }
    if name.contains(CHAT_DELIMITER) {
        return Err("name contains the chat delimiter \": \"");
    }
    if name.contains(['\n', '\r']) {
        return Err("name contains a line break");
    }
    if [JOIN_PREFIX, PRESENCE_PREFIX, LEAVE_PREFIX]
        .iter()
        .any(|prefix| name.starts_with(prefix))
    {
        return Err("name starts with a reserved control prefix");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(s: &str) -> DecodedMessage {
        Codec::default().decode(s.as_bytes()).unwrap()
    }

    // ── Control messages ─────────────────────────────────────────

    #[test]
    fn test_decode_join() {
        assert_eq!(
            decode("__JOIN__:alice"),
            DecodedMessage::Control(ControlMessage::Join("alice".into()))
        );
    }

    #[test]
    fn test_decode_presence_and_leave() {
        assert_eq!(
            decode("__PRESENCE__:bob"),
            DecodedMessage::Control(ControlMessage::Presence("bob".into()))
        );
        assert_eq!(
            decode("__LEAVE__:carol"),
            DecodedMessage::Control(ControlMessage::Leave("carol".into()))
        );
    }

    #[test]
    fn test_control_name_keeps_colons() {
        // Everything after the prefix is the name.
        assert_eq!(
            decode("__JOIN__:a:b"),
            DecodedMessage::Control(ControlMessage::Join("a:b".into()))
        );
    }

    #[test]
    fn test_control_prefix_wins_over_chat_delimiter() {
        assert_eq!(
            decode("__LEAVE__:dave: bye"),
            DecodedMessage::Control(ControlMessage::Leave("dave: bye".into()))
        );
    }

    #[test]
    fn test_control_with_empty_name_is_unrecognized() {
        assert_eq!(
            decode("__JOIN__:"),
            DecodedMessage::Unrecognized("__JOIN__:".into())
        );
    }

    #[test]
    fn test_encode_control() {
        let codec = Codec::default();
        assert_eq!(
            codec.encode_control(&ControlMessage::Join("alice".into())),
            b"__JOIN__:alice"
        );
        assert_eq!(
            codec.encode_control(&ControlMessage::Presence("bob".into())),
            b"__PRESENCE__:bob"
        );
        assert_eq!(
            codec.encode_control(&ControlMessage::Leave("carol".into())),
            b"__LEAVE__:carol"
        );
    }

    #[test]
    fn test_control_name_accessor() {
        assert_eq!(ControlMessage::Presence("erin".into()).name(), "erin");
    }

    // ── Chat ─────────────────────────────────────────────────────

    #[test]
    fn test_chat_roundtrip() {
        let codec = Codec::default();
        for (sender, text) in [
            ("alice", "hello"),
            ("bob", "ratio is 1: 2"),
            ("carol", ""),
            ("dave", "__JOIN__:not a join"),
            ("émile", "ça va ?"),
        ] {
            let chat = ChatText::new(sender, text);
            let decoded = codec.decode(&codec.encode_chat(&chat)).unwrap();
            assert_eq!(decoded, DecodedMessage::Chat(chat));
        }
    }

    #[test]
    fn test_chat_splits_on_first_delimiter() {
        assert_eq!(
            decode("alice: a: b: c"),
            DecodedMessage::Chat(ChatText::new("alice", "a: b: c"))
        );
    }

    #[test]
    fn test_unrecognized_payload() {
        assert_eq!(
            decode("[alice] hello"),
            DecodedMessage::Unrecognized("[alice] hello".into())
        );
        // Colon without the trailing space is not a delimiter.
        assert_eq!(decode("a:b"), DecodedMessage::Unrecognized("a:b".into()));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let codec = Codec::default();
        let decoded = codec.decode(&[b'x', 0xFF, b':', b' ', b'y']).unwrap();
        assert_eq!(
            decoded,
            DecodedMessage::Chat(ChatText::new("x\u{FFFD}", "y"))
        );
    }

    // ── Frame policy ─────────────────────────────────────────────

    #[test]
    fn test_oversized_frame_rejected() {
        let codec = Codec::new(8);
        let err = codec.decode(b"alice: too long").unwrap_err();
        assert_eq!(err, CodecError::Oversized { len: 15, max: 8 });
    }

    #[test]
    fn test_frame_at_limit_accepted() {
        let codec = Codec::new(8);
        assert!(codec.decode(b"ab: cdef").is_ok());
        assert_eq!(codec.max_frame_len(), 8);
    }

    // ── Name validation ──────────────────────────────────────────

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("alice").is_ok());
        assert!(validate_display_name("Dr. Who").is_ok());
        assert!(validate_display_name("a:b").is_ok());

        assert!(validate_display_name("").is_err());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name("eve: x").is_err());
        assert!(validate_display_name("line\nbreak").is_err());
        assert!(validate_display_name("__LEAVE__:x").is_err());
    }
}
