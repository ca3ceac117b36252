//! RTP dissection: media payload identity (spec.md S4.6).

use zerocopy::{FromBytes, Immutable, KnownLayout};

use super::{DissectCtx, DissectOutcome, Dissector};
use crate::address::Address;
use crate::packet::{LayerData, Packet, ProtocolTag};

const RTP_VERSION_RFC1889: u8 = 2;

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
struct RtpFixed {
    version_flags: u8,
    payload_type_marker: u8,
    seq: [u8; 2],
    timestamp: [u8; 4],
    ssrc: [u8; 4],
}

/// Decoded RTP header: identity plus the fields later codec lookup needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub src: Address,
    pub dst: Address,
    pub ssrc: u32,
    pub seq: u16,
    pub payload_type: u8,
}

/// The second byte's low 7 bits distinguish RTP payload type from RTCP's
/// reserved 192..=223 packet-type range (spec.md S4.6).
fn rtp_valid(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let version = data[0] >> 6;
    let payload_type = data[1] & 0x7F;
    version == RTP_VERSION_RFC1889 && !(192..=223).contains(&payload_type)
}

/// Terminal dissector: RTP never hands residual bytes onward (the media
/// payload itself is opaque to this crate, per spec.md S1's codec scoping).
#[derive(Default)]
pub struct RtpDissector;

impl Dissector for RtpDissector {
    fn next_protocols(&self) -> &'static [ProtocolTag] {
        &[]
    }

    fn dissect(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, data: &[u8]) -> DissectOutcome {
        if !rtp_valid(data) {
            return DissectOutcome::NotRecognized;
        }
        let Ok((hdr, _)) = RtpFixed::ref_from_prefix(data) else {
            return DissectOutcome::NotRecognized;
        };
        let Some((src, dst)) = packet.endpoints() else {
            return DissectOutcome::NotRecognized;
        };

        let ssrc = u32::from_be_bytes(hdr.ssrc);
        let payload_type = hdr.payload_type_marker & 0x7F;
        ctx.telemetry.rtp_packets_attached += 1;
        ctx.storage.attach_media(&src, &dst, ssrc, Some(payload_type));

        packet.push_layer(LayerData::Rtp(RtpHeader {
            src,
            dst,
            ssrc,
            seq: u16::from_be_bytes(hdr.seq),
            payload_type,
        }));
        DissectOutcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dissect::ip::IpHeader;
    use crate::dissect::udp::UdpHeader;
    use crate::storage::Storage;
    use crate::telemetry::Telemetry;

    fn build_rtp(payload_type: u8, ssrc: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 12];
        buf[0] = 0x80; // version 2, no padding/extension/csrc
        buf[1] = payload_type;
        buf[4..8].copy_from_slice(&0u32.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf
    }

    fn packet_with_endpoints(src: Address, dst: Address) -> Packet {
        let mut packet = Packet::new(0, vec![]);
        packet.push_layer(LayerData::Ip(IpHeader {
            src_ip: src.ip(),
            dst_ip: dst.ip(),
            protocol: 17,
            ttl: 64,
        }));
        packet.push_layer(LayerData::Udp(UdpHeader { src, dst }));
        packet
    }

    #[test]
    fn recognizes_and_attaches_rtp_packet() {
        let src = Address::new("10.0.0.2".parse().unwrap(), 30000);
        let dst = Address::new("10.0.0.1".parse().unwrap(), 40000);
        let data = build_rtp(0, 0xDEADBEEF);

        let config = Config::default();
        let mut telemetry = Telemetry::default();
        let mut storage = Storage::new(10);
        let body = b"m=audio 40000 RTP/AVP 0\r\nc=IN IP4 10.0.0.1\r\n".to_vec();
        storage.sdp.register_from_body("abc@host", &body);

        let mut ctx = DissectCtx {
            config: &config,
            telemetry: &mut telemetry,
            storage: &mut storage,
            tick: 0,
        };
        let mut packet = packet_with_endpoints(src, dst);
        let mut d = RtpDissector;
        match d.dissect(&mut ctx, &mut packet, &data) {
            DissectOutcome::Done => {}
            _ => panic!("expected RTP recognition"),
        }
        match packet.layer(ProtocolTag::Rtp).unwrap() {
            LayerData::Rtp(r) => assert_eq!(r.ssrc, 0xDEADBEEF),
            _ => unreachable!(),
        }
    }

    #[test]
    fn rtcp_type_range_is_rejected() {
        let data = build_rtp(200, 1);
        assert!(!rtp_valid(&data));
    }
}
