//! Wire framing
//!
//! Every payload published to a slot is a `key=value` header block with
//! CRLF line endings, terminated by a blank line, optionally followed by a
//! body. The `messagetype` header selects the payload kind and is decoded
//! exactly once, here at the boundary, into a closed enum; nothing deeper
//! in the pipeline branches on the raw string.
//!
//! The pre-encryption handshake payload uses the same framing with the
//! fields in `rts_keys`.

/// Header field names used in the handshake (RTS) payload
pub mod rts_keys {
    pub const MAILSITE: &str = "mailsite";
    pub const TO: &str = "to";
    pub const CHANNEL: &str = "channel";
    pub const INITIATOR_SLOT: &str = "initiatorSlot";
    pub const RESPONDER_SLOT: &str = "responderSlot";
    pub const TIMEOUT: &str = "timeout";
}

/// A parsed header block plus whatever followed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    fields: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WireMessage {
    /// Value of the first header with the given name
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Payload kinds, classified once at the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A data message carrying an id and an opaque body
    Message { id: u64, body: Vec<u8> },
    /// The handshake-accepted reply
    Cts,
    /// Acknowledgement of one or more message ids
    Ack { ids: Vec<u64> },
    /// Anything unrecognized or malformed; discarded, slot still consumed
    Unknown(String),
}

/// Encode a header block: `key=value` CRLF lines plus the blank terminator
pub fn encode_headers(fields: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (key, value) in fields {
        out.extend_from_slice(key.as_bytes());
        out.push(b'=');
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Encode a header block followed by a body
pub fn encode_message(fields: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = encode_headers(fields);
    out.extend_from_slice(body);
    out
}

/// Parse a header block and split off the body
///
/// Returns `None` when no blank-line terminator is present. Lines without
/// an `=` are ignored; bare LF line endings are tolerated.
pub fn parse_message(bytes: &[u8]) -> Option<WireMessage> {
    let mut fields = Vec::new();
    let mut pos = 0;

    loop {
        let rest = &bytes[pos..];
        let line_end = rest.iter().position(|&b| b == b'\n')?;
        let mut line = &rest[..line_end];
        if line.ends_with(b"\r") {
            line = &line[..line.len() - 1];
        }
        pos += line_end + 1;

        if line.is_empty() {
            // Blank line terminates the header block
            return Some(WireMessage {
                fields,
                body: bytes[pos..].to_vec(),
            });
        }

        let line = match std::str::from_utf8(line) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if let Some((key, value)) = line.split_once('=') {
            fields.push((key.to_string(), value.to_string()));
        }
    }
}

/// Classify a parsed payload by its `messagetype` header
pub fn classify(message: WireMessage) -> Payload {
    let message_type = match message.get("messagetype") {
        Some(t) => t.to_string(),
        None => return Payload::Unknown("missing messagetype".to_string()),
    };

    match message_type.as_str() {
        "message" => {
            let id = message.get("id").and_then(|v| v.parse::<u64>().ok());
            match id {
                Some(id) => Payload::Message {
                    id,
                    body: message.body,
                },
                None => Payload::Unknown("message without valid id".to_string()),
            }
        }
        "cts" => Payload::Cts,
        "ack" => {
            let ids: Vec<u64> = message
                .get("id")
                .map(|v| v.split(',').filter_map(|s| s.trim().parse().ok()).collect())
                .unwrap_or_default();
            if ids.is_empty() {
                Payload::Unknown("ack without valid ids".to_string())
            } else {
                Payload::Ack { ids }
            }
        }
        other => Payload::Unknown(other.to_string()),
    }
}

/// Build the pre-encryption handshake payload
pub fn build_rts(
    mailsite: &str,
    to: &str,
    channel_private_key: &str,
    initiator_slot: &str,
    responder_slot: &str,
    timeout: i64,
) -> Vec<u8> {
    encode_headers(&[
        (rts_keys::MAILSITE, mailsite),
        (rts_keys::TO, to),
        (rts_keys::CHANNEL, channel_private_key),
        (rts_keys::INITIATOR_SLOT, initiator_slot),
        (rts_keys::RESPONDER_SLOT, responder_slot),
        (rts_keys::TIMEOUT, &timeout.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_parse_roundtrip() {
        let encoded = encode_message(
            &[("messagetype", "message"), ("id", "7")],
            b"Subject: hello\r\n\r\nbody",
        );
        let parsed = parse_message(&encoded).unwrap();

        assert_eq!(parsed.get("messagetype"), Some("message"));
        assert_eq!(parsed.get("id"), Some("7"));
        assert_eq!(parsed.body, b"Subject: hello\r\n\r\nbody");
    }

    #[test]
    fn test_parse_tolerates_bare_lf() {
        let parsed = parse_message(b"messagetype=cts\n\n").unwrap();
        assert_eq!(parsed.get("messagetype"), Some("cts"));
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn test_parse_without_terminator_fails() {
        assert!(parse_message(b"messagetype=cts\r\n").is_none());
    }

    #[test]
    fn test_classify_message() {
        let encoded = encode_message(&[("messagetype", "message"), ("id", "42")], b"payload");
        let payload = classify(parse_message(&encoded).unwrap());
        assert_eq!(
            payload,
            Payload::Message {
                id: 42,
                body: b"payload".to_vec()
            }
        );
    }

    #[test]
    fn test_classify_message_without_id_is_unknown() {
        let encoded = encode_headers(&[("messagetype", "message")]);
        let payload = classify(parse_message(&encoded).unwrap());
        assert!(matches!(payload, Payload::Unknown(_)));
    }

    #[test]
    fn test_classify_cts() {
        let encoded = encode_headers(&[("messagetype", "cts")]);
        assert_eq!(classify(parse_message(&encoded).unwrap()), Payload::Cts);
    }

    #[test]
    fn test_classify_ack_with_joined_ids() {
        let encoded = encode_headers(&[("messagetype", "ack"), ("id", "1,2,3")]);
        let payload = classify(parse_message(&encoded).unwrap());
        assert_eq!(payload, Payload::Ack { ids: vec![1, 2, 3] });
    }

    #[test]
    fn test_classify_ack_skips_malformed_ids() {
        let encoded = encode_headers(&[("messagetype", "ack"), ("id", "1,x,3")]);
        let payload = classify(parse_message(&encoded).unwrap());
        assert_eq!(payload, Payload::Ack { ids: vec![1, 3] });
    }

    #[test]
    fn test_classify_unknown_type() {
        let encoded = encode_headers(&[("messagetype", "hole-punch")]);
        let payload = classify(parse_message(&encoded).unwrap());
        assert_eq!(payload, Payload::Unknown("hole-punch".to_string()));
    }

    #[test]
    fn test_build_rts_fields() {
        let rts = build_rts("site-key", "remote-id", "sk-1:", "aa", "bb", 12345);
        let parsed = parse_message(&rts).unwrap();

        assert_eq!(parsed.get(rts_keys::MAILSITE), Some("site-key"));
        assert_eq!(parsed.get(rts_keys::TO), Some("remote-id"));
        assert_eq!(parsed.get(rts_keys::CHANNEL), Some("sk-1:"));
        assert_eq!(parsed.get(rts_keys::INITIATOR_SLOT), Some("aa"));
        assert_eq!(parsed.get(rts_keys::RESPONDER_SLOT), Some("bb"));
        assert_eq!(parsed.get(rts_keys::TIMEOUT), Some("12345"));
        assert!(parsed.body.is_empty());
    }
}
