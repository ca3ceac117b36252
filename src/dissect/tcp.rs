//! TCP dissection, stream reassembly, and the TLS/WebSocket/SIP handoff
//! that only makes sense on a reassembled byte stream (spec.md S4.3).
//!
//! Unlike the other dissectors, `TcpDissector` does not hand residual bytes
//! back to [`super::Chain`]'s generic candidate dispatch: a TCP flow's
//! reassembled buffer is private, long-lived state that TLS record framing
//! and SIP's `Content-Length` framing both need to drain from repeatedly
//! across many segments, which the one-shot `Continue(bytes)` contract
//! cannot express. Instead this dissector owns a [`ReassemblyTable`] and a
//! [`TlsSessionTable`] and drives the rest of the pipeline with direct
//! calls, always returning [`DissectOutcome::Done`] itself.

use std::collections::HashMap;

use zerocopy::{FromBytes, Immutable, KnownLayout};

use super::sip::{self, ParseOutcome};
use super::tls::{self, TlsSessionTable};
use super::websocket;
use super::{DissectCtx, DissectOutcome, Dissector};
use crate::address::Address;
use crate::error::ParseError;
use crate::packet::{LayerData, Packet, ProtocolTag};
use crate::reassembly::{FlowKey, ReassemblyTable};

const FLAG_FIN: u8 = 0x01;
const FLAG_SYN: u8 = 0x02;
const FLAG_RST: u8 = 0x04;

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
struct TcpFixed {
    src_port: [u8; 2],
    dst_port: [u8; 2],
    seq: [u8; 4],
    ack: [u8; 4],
    data_offset_reserved_flags: [u8; 2],
    window: [u8; 2],
    checksum: [u8; 2],
    urgent: [u8; 2],
}

/// Decoded TCP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src: Address,
    pub dst: Address,
    pub seq: u32,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
}

/// Whether a flow, once reassembled, is known to be carrying plain SIP or
/// SIP-over-WebSocket. Learned from the first successfully parsed message
/// so later segments skip straight to the right framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum StreamKind {
    #[default]
    Unknown,
    Sip,
    WebSocket,
}

/// TCP-layer dissection: segment reassembly, the TLS record/handshake
/// handoff, and the SIP/WebSocket framing that follows either a plaintext
/// or a decrypted TLS stream.
#[derive(Default)]
pub struct TcpDissector {
    reassembly: ReassemblyTable,
    tls: Option<TlsSessionTable>,
    /// Decrypted TLS ApplicationData, buffered per flow until a full SIP
    /// message or WebSocket frame can be drained from it; unlike the raw
    /// TCP reassembly buffer this is keyed directly since a TLS flow's
    /// underlying segments are already consumed as records complete.
    tls_plaintext: HashMap<FlowKey, Vec<u8>>,
    flow_kinds: HashMap<FlowKey, StreamKind>,
}

impl TcpDissector {
    /// Age every reassembly flow by one tick and evict the ones past
    /// `TCP_MAX_AGE`/`TCP_MAX_SEGMENTS` (spec.md S4.3 step 5). Call once per
    /// frame handed to the chain.
    pub fn age_and_evict(&mut self) -> usize {
        self.reassembly.age_and_evict()
    }

    fn tls_table(&mut self, config: &crate::config::Config) -> &mut TlsSessionTable {
        self.tls.get_or_insert_with(|| TlsSessionTable::new(config))
    }

    fn flow_kind(&self, src: &Address, dst: &Address) -> StreamKind {
        self.flow_kinds.get(&FlowKey::new(src, dst)).copied().unwrap_or_default()
    }

    fn set_flow_kind(&mut self, src: &Address, dst: &Address, kind: StreamKind) {
        self.flow_kinds.insert(FlowKey::new(src, dst), kind);
    }
}

impl Dissector for TcpDissector {
    fn next_protocols(&self) -> &'static [ProtocolTag] {
        &[]
    }

    fn dissect(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, data: &[u8]) -> DissectOutcome {
        let Ok((hdr, _)) = TcpFixed::ref_from_prefix(data) else {
            ctx.telemetry.record_error(&crate::error::Error::Parse(ParseError::Truncated {
                layer: "tcp",
                expected: 20,
                actual: data.len(),
            }));
            return DissectOutcome::NotRecognized;
        };

        let Some(LayerData::Ip(ip)) = packet.layer(ProtocolTag::Ip).cloned() else {
            return DissectOutcome::NotRecognized;
        };

        let offset_flags = u16::from_be_bytes(hdr.data_offset_reserved_flags);
        let data_offset = ((offset_flags >> 12) & 0x0F) as usize * 4;
        let flags = (offset_flags & 0x00FF) as u8;
        if data_offset < 20 || data.len() < data_offset {
            ctx.telemetry.record_error(&crate::error::Error::Parse(ParseError::Malformed {
                layer: "tcp",
                reason: format!("invalid data offset {data_offset}"),
            }));
            return DissectOutcome::NotRecognized;
        }

        let src = Address::new(ip.src_ip, u16::from_be_bytes(hdr.src_port));
        let dst = Address::new(ip.dst_ip, u16::from_be_bytes(hdr.dst_port));
        let seq = u32::from_be_bytes(hdr.seq);
        let syn = flags & FLAG_SYN != 0;
        let fin = flags & FLAG_FIN != 0;
        let rst = flags & FLAG_RST != 0;
        let payload = &data[data_offset..];

        packet.push_layer(LayerData::Tcp(TcpHeader {
            src: src.clone(),
            dst: dst.clone(),
            seq,
            syn,
            fin,
            rst,
        }));

        if syn {
            self.tls_table(ctx.config).on_syn(&src, &dst);
        }

        if rst || (fin && payload.is_empty()) {
            self.evict_flow(&src, &dst);
            return DissectOutcome::Done;
        }

        if !payload.is_empty() {
            let appended = self.reassembly.flow_mut(&src, &dst).insert(seq, payload);
            if appended.is_some() {
                ctx.telemetry.tcp_segments_reassembled += 1;
            }
            self.deliver(ctx, packet, &src, &dst);
        }

        if fin {
            self.evict_flow(&src, &dst);
        }

        DissectOutcome::Done
    }
}

impl TcpDissector {
    fn evict_flow(&mut self, src: &Address, dst: &Address) {
        self.reassembly.remove(src, dst);
        if let Some(tls) = self.tls.as_mut() {
            tls.remove(src, dst);
        }
        self.tls_plaintext.remove(&FlowKey::new(src, dst));
        self.flow_kinds.remove(&FlowKey::new(src, dst));
    }

    /// Drain whatever complete messages can now be extracted, either from
    /// the TLS plaintext buffer (if this flow is a recognized TLS session)
    /// or directly from the raw TCP reassembly buffer otherwise.
    ///
    /// A pending TLS session (registered at SYN time because a key or
    /// server-port filter is configured) is only trusted once the buffered
    /// bytes actually look like a TLS record header — a SYN matching the
    /// filter doesn't guarantee the flow carries TLS (e.g. plain SIP on a
    /// misconfigured port), so an unconfirmed flow that turns out not to be
    /// TLS falls back to plaintext instead of spinning forever in
    /// `deliver_tls`'s record-length loop.
    fn deliver(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, src: &Address, dst: &Address) {
        if self.tls.as_ref().is_some_and(|t| t.has_session(src, dst)) {
            let verdict = {
                let buf = self.reassembly.flow_mut(src, dst).buffer();
                if tls::looks_like_record_header(buf) {
                    Some(true)
                } else if buf.len() >= 3 {
                    Some(false)
                } else {
                    None
                }
            };
            match verdict {
                Some(true) => return self.deliver_tls(ctx, packet, src, dst),
                Some(false) => {
                    if let Some(tls) = self.tls.as_mut() {
                        tls.remove(src, dst);
                    }
                }
                None => return,
            }
        }
        self.deliver_plaintext(ctx, packet, src, dst);
    }

    fn deliver_tls(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, src: &Address, dst: &Address) {
        loop {
            let record_len = {
                let buf = self.reassembly.flow_mut(src, dst).buffer();
                match tls_record_len(buf) {
                    Some(len) => len,
                    None => break,
                }
            };
            let record = {
                let stream = self.reassembly.flow_mut(src, dst);
                let record = stream.buffer()[..record_len].to_vec();
                stream.consume_buffer(record_len);
                record
            };
            let plaintext = self.tls_table(ctx.config).process_record(ctx, src, dst, &record);
            if let Some(plaintext) = plaintext {
                self.tls_plaintext.entry(FlowKey::new(src, dst)).or_default().extend_from_slice(&plaintext);
            }
        }
        self.drain_buffer(ctx, packet, src, dst, true);
    }

    fn deliver_plaintext(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, src: &Address, dst: &Address) {
        self.drain_buffer(ctx, packet, src, dst, false);
    }

    /// Shared drain loop: pulls a `Vec<u8>` snapshot of whichever buffer
    /// backs this flow (TLS plaintext, or the raw reassembled TCP stream),
    /// identifies WebSocket vs. plain SIP framing the first time there's
    /// enough to tell, and keeps draining until nothing more can be taken.
    fn drain_buffer(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, src: &Address, dst: &Address, from_tls: bool) {
        loop {
            let buf = self.buffer_snapshot(src, dst, from_tls);
            if buf.is_empty() {
                break;
            }

            if self.flow_kind(src, dst) == StreamKind::Unknown && !sip::looks_like_sip(&buf) {
                if let Some((_frame, _consumed)) = websocket::try_take_frame(&buf) {
                    self.set_flow_kind(src, dst, StreamKind::WebSocket);
                }
            }

            match self.flow_kind(src, dst) {
                StreamKind::WebSocket => {
                    let Some((frame, consumed)) = websocket::try_take_frame(&buf) else {
                        break;
                    };
                    self.consume(src, dst, from_tls, consumed);
                    if websocket::carries_sip_payload(frame.opcode) {
                        self.parse_and_push(ctx, packet, src, dst, &frame.payload);
                    }
                }
                StreamKind::Sip | StreamKind::Unknown => {
                    match sip::parse_streamed(&buf, src.clone(), dst.clone(), packet.timestamp_us) {
                        ParseOutcome::Complete { message, consumed } => {
                            self.consume(src, dst, from_tls, consumed);
                            self.set_flow_kind(src, dst, StreamKind::Sip);
                            ctx.telemetry.sip_messages_parsed += 1;
                            packet.push_layer(LayerData::Sip(message.clone()));
                            if let Err(e) = ctx.storage.push_message(message) {
                                ctx.telemetry.record_error(&crate::error::Error::Storage(e));
                            }
                        }
                        ParseOutcome::Incomplete => break,
                        ParseOutcome::Invalid => {
                            ctx.telemetry.record_error(&crate::error::Error::Parse(ParseError::Malformed {
                                layer: "sip",
                                reason: "unparseable streamed message".into(),
                            }));
                            self.consume(src, dst, from_tls, buf.len());
                            break;
                        }
                    }
                }
            }
        }
    }

    fn parse_and_push(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, src: &Address, dst: &Address, data: &[u8]) {
        if let ParseOutcome::Complete { message, .. } = sip::parse_streamed(data, src.clone(), dst.clone(), packet.timestamp_us) {
            ctx.telemetry.sip_messages_parsed += 1;
            packet.push_layer(LayerData::Sip(message.clone()));
            if let Err(e) = ctx.storage.push_message(message) {
                ctx.telemetry.record_error(&crate::error::Error::Storage(e));
            }
        }
    }

    fn buffer_snapshot(&mut self, src: &Address, dst: &Address, from_tls: bool) -> Vec<u8> {
        if from_tls {
            self.tls_plaintext.entry(FlowKey::new(src, dst)).or_default().clone()
        } else {
            self.reassembly.flow_mut(src, dst).buffer().to_vec()
        }
    }

    fn consume(&mut self, src: &Address, dst: &Address, from_tls: bool, n: usize) {
        if from_tls {
            if let Some(buf) = self.tls_plaintext.get_mut(&FlowKey::new(src, dst)) {
                buf.drain(0..n.min(buf.len()));
            }
        } else {
            self.reassembly.flow_mut(src, dst).consume_buffer(n);
        }
    }
}

/// Length of the next full TLS record at the front of `buf`, if the header
/// (and body) are fully present.
fn tls_record_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 5 {
        return None;
    }
    let body_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    let total = 5 + body_len;
    if buf.len() < total {
        None
    } else {
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dissect::ip::IpHeader;
    use crate::storage::Storage;
    use crate::telemetry::Telemetry;

    fn build_tcp(seq: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 20];
        buf[0..2].copy_from_slice(&5060u16.to_be_bytes());
        buf[2..4].copy_from_slice(&12345u16.to_be_bytes());
        buf[4..8].copy_from_slice(&seq.to_be_bytes());
        let offset_flags: u16 = (5u16 << 12) | flags as u16;
        buf[12..14].copy_from_slice(&offset_flags.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    fn ctx_parts() -> (Config, Telemetry, Storage) {
        (Config::default(), Telemetry::default(), Storage::new(10))
    }

    fn packet_with_ip() -> Packet {
        let mut packet = Packet::new(0, vec![]);
        packet.push_layer(LayerData::Ip(IpHeader {
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "10.0.0.2".parse().unwrap(),
            protocol: 6,
            ttl: 64,
        }));
        packet
    }

    #[test]
    fn split_sip_message_across_two_segments_delivers_once() {
        let (config, mut telemetry, mut storage) = ctx_parts();
        let mut ctx = DissectCtx {
            config: &config,
            telemetry: &mut telemetry,
            storage: &mut storage,
            tick: 0,
        };
        let mut d = TcpDissector::default();

        let full = b"INVITE sip:b@h SIP/2.0\r\nCall-ID: tcp1@host\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n";
        let (part1, part2) = full.split_at(40);

        let mut packet = packet_with_ip();
        let seg1 = build_tcp(0, 0, part1);
        d.dissect(&mut ctx, &mut packet, &seg1);
        assert!(ctx.storage.get("tcp1@host").is_none());

        let seg2 = build_tcp(part1.len() as u32, 0, part2);
        d.dissect(&mut ctx, &mut packet, &seg2);
        assert!(ctx.storage.get("tcp1@host").is_some());
    }

    #[test]
    fn fin_with_no_payload_evicts_flow() {
        let (config, mut telemetry, mut storage) = ctx_parts();
        let mut ctx = DissectCtx {
            config: &config,
            telemetry: &mut telemetry,
            storage: &mut storage,
            tick: 0,
        };
        let mut d = TcpDissector::default();
        let mut packet = packet_with_ip();
        let seg = build_tcp(0, FLAG_SYN, b"");
        d.dissect(&mut ctx, &mut packet, &seg);
        let fin = build_tcp(1, FLAG_FIN, b"");
        d.dissect(&mut ctx, &mut packet, &fin);
        assert!(d.reassembly.is_empty());
    }

    #[test]
    fn plain_sip_survives_a_preceding_syn_under_default_config() {
        let (config, mut telemetry, mut storage) = ctx_parts();
        let mut ctx = DissectCtx {
            config: &config,
            telemetry: &mut telemetry,
            storage: &mut storage,
            tick: 0,
        };
        let mut d = TcpDissector::default();
        let mut packet = packet_with_ip();

        let syn = build_tcp(0, FLAG_SYN, b"");
        d.dissect(&mut ctx, &mut packet, &syn);

        let sip = b"INVITE sip:b@h SIP/2.0\r\nCall-ID: syn1@host\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n";
        let seg = build_tcp(1, 0, sip);
        d.dissect(&mut ctx, &mut packet, &seg);

        assert!(ctx.storage.get("syn1@host").is_some());
    }

    #[test]
    fn tls_port_match_falls_back_to_plaintext_when_not_actually_tls() {
        let config = Config {
            tls_server_port: Some(12345),
            ..Config::default()
        };
        let mut telemetry = Telemetry::default();
        let mut storage = Storage::new(10);
        let mut ctx = DissectCtx {
            config: &config,
            telemetry: &mut telemetry,
            storage: &mut storage,
            tick: 0,
        };
        let mut d = TcpDissector::default();
        let mut packet = packet_with_ip();

        // SYN matches the configured TLS server port, so a candidate
        // session is registered, but the flow actually carries plain SIP.
        let syn = build_tcp(0, FLAG_SYN, b"");
        d.dissect(&mut ctx, &mut packet, &syn);

        let sip = b"INVITE sip:b@h SIP/2.0\r\nCall-ID: notls@host\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n";
        let seg = build_tcp(1, 0, sip);
        d.dissect(&mut ctx, &mut packet, &seg);

        assert!(ctx.storage.get("notls@host").is_some());
    }

    #[test]
    fn websocket_framed_sip_is_parsed_once_identified() {
        let (config, mut telemetry, mut storage) = ctx_parts();
        let mut ctx = DissectCtx {
            config: &config,
            telemetry: &mut telemetry,
            storage: &mut storage,
            tick: 0,
        };
        let mut d = TcpDissector::default();
        let mut packet = packet_with_ip();

        let sip_msg = b"INVITE sip:b@h SIP/2.0\r\nCall-ID: ws1@host\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n";
        let mut frame = vec![0x82, sip_msg.len() as u8];
        frame.extend_from_slice(sip_msg);

        let seg = build_tcp(0, 0, &frame);
        d.dissect(&mut ctx, &mut packet, &seg);
        assert!(ctx.storage.get("ws1@host").is_some());
    }
}
