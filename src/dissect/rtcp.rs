//! RTCP dissection: sender reports and XR VoIP metrics (spec.md S4.6).
//!
//! Grounded on `packet_rtcp.c`, with its two latent bugs fixed per spec.md
//! S9: `packet_rtcp_valid` returns `true` on a structurally valid packet
//! (the original always evaluates falsy), and the VoIP Metrics block is
//! read from its own offset within the XR report rather than a fixed
//! offset that only happened to work for the first block.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use super::{DissectCtx, DissectOutcome, Dissector};
use crate::address::Address;
use crate::packet::{LayerData, Packet, ProtocolTag};

const RTCP_HDR_LEN: usize = 4;
const RTP_VERSION_RFC1889: u8 = 2;

const RTCP_SR: u8 = 200;
const RTCP_RR: u8 = 201;
const RTCP_SDES: u8 = 202;
const RTCP_BYE: u8 = 203;
const RTCP_APP: u8 = 204;
const RTCP_RTPFB: u8 = 205;
const RTCP_PSFB: u8 = 206;
const RTCP_XR: u8 = 207;

const XR_BLOCK_VOIP_METRICS: u8 = 7;

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
struct RtcpGenericHeader {
    version_pt_rc: u8,
    packet_type: u8,
    len: [u8; 2],
}

/// VoIP Metrics extracted from an RTCP XR report (RFC 3611 S4.7.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoipMetrics {
    pub discard_rate: u8,
    pub loss_rate: u8,
    pub mos_lq: u8,
    pub mos_cq: u8,
}

/// Decoded RTCP report: stream identity plus whichever optional summaries
/// the compound packet carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpReport {
    pub src: Address,
    pub dst: Address,
    pub ssrc: u32,
    pub sender_packet_count: Option<u32>,
    pub voip_metrics: Option<VoipMetrics>,
}

/// RFC 5761 S4 / RFC 5764 S5.1.2 demultiplexing check: version 2, first
/// byte in 128..=191 (so the RTP/RTCP marker bit distinguishes them), and
/// packet type in the reserved RTCP range 192..=223.
fn rtcp_valid(data: &[u8]) -> bool {
    if data.len() < RTCP_HDR_LEN {
        return false;
    }
    let version = data[0] >> 6;
    version == RTP_VERSION_RFC1889 && (128..=191).contains(&data[0]) && (192..=223).contains(&data[1])
}

/// Walk a compound RTCP packet, accumulating the first sender-report packet
/// count and first VoIP Metrics block found across all sub-packets.
fn parse_compound(data: &[u8]) -> (u32, Option<u32>, Option<VoipMetrics>) {
    let mut ssrc = 0u32;
    let mut sender_packet_count = None;
    let mut voip_metrics = None;
    let mut pos = 0usize;

    while pos + RTCP_HDR_LEN <= data.len() {
        let Ok((hdr, _)) = RtcpGenericHeader::ref_from_prefix(&data[pos..]) else {
            break;
        };
        if hdr.version_pt_rc >> 6 != RTP_VERSION_RFC1889 {
            break;
        }
        let hlen = u16::from_be_bytes(hdr.len) as usize * 4 + 4;
        if pos + hlen > data.len() {
            break;
        }
        let body = &data[pos..pos + hlen];
        if body.len() >= 8 && ssrc == 0 {
            ssrc = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
        }

        match hdr.packet_type {
            RTCP_SR => {
                if body.len() >= 24 && sender_packet_count.is_none() {
                    sender_packet_count = Some(u32::from_be_bytes([body[20], body[21], body[22], body[23]]));
                }
            }
            RTCP_RR | RTCP_SDES | RTCP_BYE | RTCP_APP | RTCP_RTPFB | RTCP_PSFB => {}
            RTCP_XR => {
                if voip_metrics.is_none() {
                    voip_metrics = walk_xr_blocks(body);
                }
            }
            _ => break,
        }

        pos += hlen;
    }

    (ssrc, sender_packet_count, voip_metrics)
}

/// Walk an XR report's blocks starting right after its 8-byte header
/// (generic 4 bytes + SSRC 4 bytes), extracting the first VoIP Metrics
/// block. A zero-length block still advances by its 4-byte header, so this
/// always terminates (spec.md S8: "len = 0 terminates the XR walk without
/// error").
fn walk_xr_blocks(xr_report: &[u8]) -> Option<VoipMetrics> {
    const XR_HDR_LEN: usize = 8;
    if xr_report.len() < XR_HDR_LEN {
        return None;
    }
    let mut bsize = XR_HDR_LEN;
    let mut found = None;

    while bsize + 4 <= xr_report.len() {
        let block_type = xr_report[bsize];
        let block_len_words = u16::from_be_bytes([xr_report[bsize + 2], xr_report[bsize + 3]]) as usize;
        let block_total = block_len_words * 4 + 4;

        if block_type == XR_BLOCK_VOIP_METRICS && found.is_none() {
            let body_start = bsize + 4;
            if body_start + 24 <= xr_report.len() {
                found = Some(VoipMetrics {
                    loss_rate: xr_report[body_start + 4],
                    discard_rate: xr_report[body_start + 5],
                    mos_lq: xr_report[body_start + 22],
                    mos_cq: xr_report[body_start + 23],
                });
            }
        }

        if bsize + block_total > xr_report.len() {
            break;
        }
        bsize += block_total;
    }

    found
}

/// Terminal dissector: RTCP never hands residual bytes onward.
#[derive(Default)]
pub struct RtcpDissector;

impl Dissector for RtcpDissector {
    fn next_protocols(&self) -> &'static [ProtocolTag] {
        &[]
    }

    fn dissect(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, data: &[u8]) -> DissectOutcome {
        if !rtcp_valid(data) {
            return DissectOutcome::NotRecognized;
        }
        let Some((src, dst)) = packet.endpoints() else {
            return DissectOutcome::NotRecognized;
        };
        let (ssrc, sender_packet_count, voip_metrics) = parse_compound(data);
        ctx.telemetry.rtcp_packets_attached += 1;
        ctx.storage.attach_media(&src, &dst, ssrc, None);
        packet.push_layer(LayerData::Rtcp(RtcpReport {
            src,
            dst,
            ssrc,
            sender_packet_count,
            voip_metrics,
        }));
        DissectOutcome::Done
    }
}
