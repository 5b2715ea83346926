//! Wire-level text of the chat protocol.
//!
//! There is no framing: one read of at most [`READ_BUFFER_SIZE`] bytes is one
//! message, and every server-originated line ends with a single `\n`.

use bytes::{BufMut, Bytes, BytesMut};

/// Largest payload taken from the channel by a single read.
pub const READ_BUFFER_SIZE: usize = 4095;

/// Sent once, right after the handshake. No trailing newline.
pub const USERNAME_PROMPT: &str = "Enter your username: ";

/// Prefix that marks a private-message command.
pub const PRIVATE_MESSAGE_PREFIX: &[u8] = b"/pm";

/// Remove every whitespace character from a submitted username.
///
/// Invalid UTF-8 sequences become U+FFFD rather than being rejected, so the
/// name relayed in notices may differ from the raw bytes sent.
pub fn sanitize_username(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Drop every carriage return and line feed, wherever they appear.
pub fn strip_line_endings(raw: &[u8]) -> Bytes {
    raw.iter()
        .copied()
        .filter(|&b| b != b'\r' && b != b'\n')
        .collect::<Vec<u8>>()
        .into()
}

/// Join notice, without the trailing newline the dispatcher appends.
pub fn join_notice(username: &str) -> Bytes {
    Bytes::from(format!("Server: {username} has joined the chat."))
}

/// Departure notice, without the trailing newline the dispatcher appends.
pub fn leave_notice(username: &str) -> Bytes {
    Bytes::from(format!("Server: {username} has left the chat."))
}

/// `<username>: <text>`, with the body copied byte for byte.
pub fn chat_line(username: &str, text: &[u8]) -> Bytes {
    let mut line = BytesMut::with_capacity(username.len() + 2 + text.len());
    line.put_slice(username.as_bytes());
    line.put_slice(b": ");
    line.put_slice(text);
    line.freeze()
}

/// Terminate `line` with exactly one newline for the wire.
pub fn terminate(line: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(line.len() + 1);
    out.put_slice(line);
    out.put_u8(b'\n');
    out.freeze()
}

/// A message received from an active session, after line-ending removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Ordinary text, relayed to everyone else.
    Chat(Bytes),
    /// `/pm <recipient> <body>`. Recognized, never delivered.
    PrivateMessage { recipient: String, body: Bytes },
}

impl Inbound {
    pub fn parse(message: Bytes) -> Self {
        if !message.starts_with(PRIVATE_MESSAGE_PREFIX) {
            return Self::Chat(message);
        }
        let rest = String::from_utf8_lossy(&message[PRIVATE_MESSAGE_PREFIX.len()..]).into_owned();
        let rest = rest.trim_start();
        let (recipient, body) = match rest.split_once(char::is_whitespace) {
            Some((recipient, body)) => (recipient, body.trim_start()),
            None => (rest, ""),
        };
        Self::PrivateMessage {
            recipient: recipient.to_string(),
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_exact() {
        assert_eq!(USERNAME_PROMPT, "Enter your username: ");
        assert_eq!(USERNAME_PROMPT.len(), 21);
    }

    #[test]
    fn sanitize_strips_all_whitespace() {
        assert_eq!(sanitize_username(b"  al ice "), "alice");
        assert_eq!(sanitize_username(b"bob\r\n"), "bob");
        assert_eq!(sanitize_username(b"\tc\x0bar\x0col\n"), "carol");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in [&b"  al ice "[..], b"x y\tz\n", b"", b"   ", b"plain"] {
            let once = sanitize_username(raw);
            let twice = sanitize_username(once.as_bytes());
            assert_eq!(once, twice);
            assert!(!once.chars().any(char::is_whitespace));
        }
    }

    #[test]
    fn sanitize_replaces_invalid_utf8_in_usernames_only() {
        // Names become `String`s for lookup and logging.
        assert_eq!(sanitize_username(b"j\xf6rg "), "j\u{fffd}rg");
        // Message bodies are never decoded.
        assert_eq!(&chat_line("ann", b"caf\xe9")[..], b"ann: caf\xe9");
    }

    #[test]
    fn sanitize_whitespace_only_is_empty() {
        assert_eq!(sanitize_username(b" \r\n\t"), "");
    }

    #[test]
    fn sanitize_strips_unicode_whitespace() {
        assert_eq!(sanitize_username("d\u{00a0}ave\u{2003}".as_bytes()), "dave");
    }

    #[test]
    fn strip_line_endings_anywhere() {
        assert_eq!(strip_line_endings(b"hello\r\n"), Bytes::from_static(b"hello"));
        assert_eq!(strip_line_endings(b"a\nb\rc"), Bytes::from_static(b"abc"));
        assert_eq!(strip_line_endings(b"\r\n"), Bytes::new());
    }

    #[test]
    fn notices_are_exact() {
        assert_eq!(join_notice("alice"), Bytes::from_static(b"Server: alice has joined the chat."));
        assert_eq!(leave_notice("bob"), Bytes::from_static(b"Server: bob has left the chat."));
    }

    #[test]
    fn chat_line_keeps_body_bytes() {
        let body = "caf\u{e9}  \t spaced ~!@".as_bytes();
        let line = chat_line("alice", body);
        assert_eq!(&line[..7], b"alice: ");
        assert_eq!(&line[7..], body);
    }

    #[test]
    fn terminate_appends_one_newline() {
        assert_eq!(terminate(b"x"), Bytes::from_static(b"x\n"));
        assert_eq!(terminate(b""), Bytes::from_static(b"\n"));
    }

    #[test]
    fn parse_plain_message() {
        let msg = Inbound::parse(Bytes::from_static(b"hello there"));
        assert_eq!(msg, Inbound::Chat(Bytes::from_static(b"hello there")));
    }

    #[test]
    fn parse_private_message() {
        let msg = Inbound::parse(Bytes::from_static(b"/pm bob  see you"));
        assert_eq!(
            msg,
            Inbound::PrivateMessage {
                recipient: "bob".to_string(),
                body: Bytes::from_static(b"see you"),
            }
        );
    }

    #[test]
    fn parse_bare_pm_prefix() {
        // Anything starting with /pm is the command, even without arguments.
        assert!(matches!(
            Inbound::parse(Bytes::from_static(b"/pm")),
            Inbound::PrivateMessage { ref recipient, .. } if recipient.is_empty()
        ));
        assert!(matches!(
            Inbound::parse(Bytes::from_static(b"/pmx")),
            Inbound::PrivateMessage { .. }
        ));
    }

    #[test]
    fn pm_prefix_must_lead() {
        let msg = Inbound::parse(Bytes::from_static(b" /pm bob hi"));
        assert!(matches!(msg, Inbound::Chat(_)));
    }
}
