//! SIP message parsing (spec.md S4.5).
//!
//! Two parsing modes share one header/body parser: lenient (`parse_datagram`,
//! used over UDP where one datagram is always one message) and strict
//! (`parse_streamed`, used over TCP/TLS/WebSocket where a message may be
//! split across multiple arrivals and must be held until `Content-Length`
//! bytes of body are available).

use crate::address::Address;
use crate::storage::{Message, MethodOrStatus};

use super::{DissectCtx, DissectOutcome, Dissector};
use crate::packet::{LayerData, Packet, ProtocolTag};

const REQUEST_METHODS: &[&str] = &[
    "INVITE", "ACK", "BYE", "CANCEL", "OPTIONS", "REGISTER", "PRACK", "SUBSCRIBE", "NOTIFY",
    "PUBLISH", "INFO", "REFER", "MESSAGE", "UPDATE",
];

/// Re-exported as the `Sip` [`LayerData`] variant; a lightweight summary of
/// a parsed message kept on the packet, distinct from the richer
/// [`crate::storage::Message`] handed to Storage.
pub type SipMessage = Message;

/// Outcome of attempting to parse one SIP message out of a byte buffer that
/// may not yet be complete.
pub enum ParseOutcome {
    Complete { message: Message, consumed: usize },
    Incomplete,
    Invalid,
}

/// Quick structural check used to decide whether a UDP payload or TCP
/// residual is SIP-shaped at all, before committing to a full parse.
pub fn looks_like_sip(data: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(&data[..data.len().min(32)]) else {
        return false;
    };
    if text.starts_with("SIP/2.0") {
        return true;
    }
    REQUEST_METHODS
        .iter()
        .any(|m| text.starts_with(m) && text[m.len()..].starts_with(' '))
}

struct ParsedHeaders<'a> {
    start_line: &'a str,
    call_id: Option<String>,
    cseq_num: Option<u32>,
    cseq_method: Option<String>,
    from_tag: Option<String>,
    to_tag: Option<String>,
    via_branch: Option<String>,
    x_call_id: Option<String>,
    content_length: usize,
}

/// Parse the header block (everything up to the blank line); returns the
/// parsed fields plus the byte offset where the body begins.
fn parse_headers(head: &str) -> Option<ParsedHeaders<'_>> {
    let mut lines = head.split("\r\n");
    let start_line = lines.next()?;
    if start_line.is_empty() {
        return None;
    }

    let mut h = ParsedHeaders {
        start_line,
        call_id: None,
        cseq_num: None,
        cseq_method: None,
        from_tag: None,
        to_tag: None,
        via_branch: None,
        x_call_id: None,
        content_length: 0,
    };

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("Call-ID") || name == "i" {
            h.call_id = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("CSeq") {
            let mut parts = value.split_whitespace();
            h.cseq_num = parts.next().and_then(|n| n.parse().ok());
            h.cseq_method = parts.next().map(|m| m.to_string());
        } else if name.eq_ignore_ascii_case("From") || name == "f" {
            h.from_tag = extract_tag(value);
        } else if name.eq_ignore_ascii_case("To") || name == "t" {
            h.to_tag = extract_tag(value);
        } else if name.eq_ignore_ascii_case("Via") || name == "v" {
            h.via_branch = extract_param(value, "branch");
        } else if name.eq_ignore_ascii_case("X-Call-ID") || name.eq_ignore_ascii_case("X-CID") {
            h.x_call_id = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Content-Length") || name == "l" {
            h.content_length = value.parse().unwrap_or(0);
        }
    }

    Some(h)
}

fn extract_param(value: &str, key: &str) -> Option<String> {
    value.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|v| v.trim_matches('"').to_string())
    })
}

fn extract_tag(value: &str) -> Option<String> {
    extract_param(value, "tag")
}

fn method_or_status(start_line: &str) -> Option<MethodOrStatus> {
    if let Some(rest) = start_line.strip_prefix("SIP/2.0 ") {
        let code: u16 = rest.split_whitespace().next()?.parse().ok()?;
        return Some(MethodOrStatus::Status(code));
    }
    let method = start_line.split_whitespace().next()?;
    if REQUEST_METHODS.contains(&method) {
        Some(MethodOrStatus::Method(method.to_string()))
    } else {
        None
    }
}

fn build_message(
    h: &ParsedHeaders,
    body: Vec<u8>,
    timestamp_us: u64,
    src: Address,
    dst: Address,
) -> Option<Message> {
    let call_id = h.call_id.clone()?;
    let method_or_status = method_or_status(h.start_line)?;
    Some(Message {
        call_id,
        cseq: h.cseq_num.unwrap_or(0),
        cseq_method: h.cseq_method.clone().unwrap_or_default(),
        method_or_status,
        from_tag: h.from_tag.clone(),
        to_tag: h.to_tag.clone(),
        via_branch: h.via_branch.clone(),
        x_call_id: h.x_call_id.clone(),
        body,
        timestamp_us,
        src,
        dst,
    })
}

/// Lenient parse for UDP: the whole datagram is one message regardless of
/// what `Content-Length` claims (spec.md S4.5: "over UDP (one datagram =
/// one message)").
pub fn parse_datagram(data: &[u8], src: Address, dst: Address, timestamp_us: u64) -> Option<Message> {
    let text = std::str::from_utf8(data).ok()?;
    let (head, body) = text.split_once("\r\n\r\n")?;
    let h = parse_headers(head)?;
    let body_bytes = body.as_bytes().to_vec();
    build_message(&h, body_bytes, timestamp_us, src, dst)
}

/// Strict, streaming parse for TCP/TLS/WebSocket: holds the message until
/// headers plus the declared `Content-Length` body bytes are present.
pub fn parse_streamed(data: &[u8], src: Address, dst: Address, timestamp_us: u64) -> ParseOutcome {
    let Ok(text) = std::str::from_utf8(data) else {
        return ParseOutcome::Invalid;
    };
    let Some(header_end) = text.find("\r\n\r\n") else {
        return ParseOutcome::Incomplete;
    };
    let head = &text[..header_end];
    let Some(h) = parse_headers(head) else {
        return ParseOutcome::Invalid;
    };
    let body_start = header_end + 4;
    let body_end = body_start + h.content_length;
    if data.len() < body_end {
        return ParseOutcome::Incomplete;
    }
    let body = data[body_start..body_end].to_vec();
    match build_message(&h, body, timestamp_us, src, dst) {
        Some(message) => ParseOutcome::Complete { message, consumed: body_end },
        None => ParseOutcome::Invalid,
    }
}

/// UDP-side [`Dissector`]: one datagram, one shot, no persistent state.
#[derive(Default)]
pub struct SipDissector;

impl Dissector for SipDissector {
    fn next_protocols(&self) -> &'static [ProtocolTag] {
        &[]
    }

    fn dissect(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, data: &[u8]) -> DissectOutcome {
        if !looks_like_sip(data) {
            return DissectOutcome::NotRecognized;
        }
        let Some((src, dst)) = packet.endpoints() else {
            return DissectOutcome::NotRecognized;
        };
        let Some(message) = parse_datagram(data, src, dst, packet.timestamp_us) else {
            return DissectOutcome::NotRecognized;
        };
        packet.push_layer(LayerData::Sip(message.clone()));
        ctx.telemetry.sip_messages_parsed += 1;
        if let Err(e) = ctx.storage.push_message(message) {
            ctx.telemetry.record_error(&crate::error::Error::Storage(e));
        }
        DissectOutcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> (Address, Address) {
        (
            Address::new("10.0.0.1".parse().unwrap(), 5060),
            Address::new("10.0.0.2".parse().unwrap(), 5060),
        )
    }

    #[test]
    fn parses_invite_datagram() {
        let (src, dst) = addrs();
        let raw = b"INVITE sip:bob@host SIP/2.0\r\nCall-ID: abc@host\r\nCSeq: 1 INVITE\r\nFrom: <sip:a>;tag=111\r\nTo: <sip:b>\r\nVia: SIP/2.0/UDP h;branch=z9\r\nContent-Length: 0\r\n\r\n";
        let msg = parse_datagram(raw, src, dst, 0).unwrap();
        assert_eq!(msg.call_id, "abc@host");
        assert_eq!(msg.cseq, 1);
        assert!(msg.method_or_status.is_method("INVITE"));
        assert_eq!(msg.from_tag.as_deref(), Some("111"));
        assert_eq!(msg.via_branch.as_deref(), Some("z9"));
    }

    #[test]
    fn parses_status_line_response() {
        let (src, dst) = addrs();
        let raw = b"SIP/2.0 486 Busy Here\r\nCall-ID: abc@host\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n";
        let msg = parse_datagram(raw, src, dst, 0).unwrap();
        assert_eq!(msg.method_or_status.status_code(), Some(486));
    }

    #[test]
    fn missing_call_id_is_rejected() {
        let (src, dst) = addrs();
        let raw = b"INVITE sip:bob@host SIP/2.0\r\nCSeq: 1 INVITE\r\n\r\n";
        assert!(parse_datagram(raw, src, dst, 0).is_none());
    }

    #[test]
    fn streamed_parse_waits_for_split_content_length_header() {
        let (src, dst) = addrs();
        let part1 = b"INVITE sip:bob@host SIP/2.0\r\nCall-ID: abc@host\r\nCSeq: 1 INVITE\r\nConte";
        match parse_streamed(part1, src.clone(), dst.clone(), 0) {
            ParseOutcome::Incomplete => {}
            _ => panic!("expected incomplete parse on split header"),
        }

        let full = b"INVITE sip:bob@host SIP/2.0\r\nCall-ID: abc@host\r\nCSeq: 1 INVITE\r\nContent-Length: 5\r\n\r\nhello";
        match parse_streamed(full, src, dst, 0) {
            ParseOutcome::Complete { message, consumed } => {
                assert_eq!(consumed, full.len());
                assert_eq!(message.body, b"hello");
            }
            _ => panic!("expected complete parse"),
        }
    }

    #[test]
    fn streamed_parse_holds_when_body_shorter_than_content_length() {
        let (src, dst) = addrs();
        let partial = b"INVITE sip:bob@host SIP/2.0\r\nCall-ID: abc@host\r\nCSeq: 1 INVITE\r\nContent-Length: 10\r\n\r\nhello";
        match parse_streamed(partial, src, dst, 0) {
            ParseOutcome::Incomplete => {}
            _ => panic!("expected incomplete: body shorter than Content-Length"),
        }
    }

    #[test]
    fn compact_headers_are_recognized() {
        let (src, dst) = addrs();
        let raw = b"INVITE sip:bob@host SIP/2.0\r\ni: abc@host\r\nCSeq: 1 INVITE\r\nf: <sip:a>;tag=222\r\nl: 0\r\n\r\n";
        let msg = parse_datagram(raw, src, dst, 0).unwrap();
        assert_eq!(msg.call_id, "abc@host");
        assert_eq!(msg.from_tag.as_deref(), Some("222"));
    }
}
