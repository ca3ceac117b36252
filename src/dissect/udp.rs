//! UDP dissection with content-sniffing fanout to SIP/RTP/RTCP.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use super::{DissectCtx, DissectOutcome, Dissector};
use crate::address::Address;
use crate::error::ParseError;
use crate::packet::{LayerData, Packet, ProtocolTag};

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
struct UdpFixed {
    src_port: [u8; 2],
    dst_port: [u8; 2],
    length: [u8; 2],
    checksum: [u8; 2],
}

/// Decoded UDP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpHeader {
    pub src: Address,
    pub dst: Address,
}

/// Dissects UDP headers and hands the payload to whichever of
/// SIP/RTP/RTCP/WebSocket recognizes it first (spec.md S4.2: "RTCP sniff
/// before RTP", and SIP is tried first on text-shaped payloads).
#[derive(Default)]
pub struct UdpDissector;

impl Dissector for UdpDissector {
    fn next_protocols(&self) -> &'static [ProtocolTag] {
        &[ProtocolTag::Sip, ProtocolTag::Rtcp, ProtocolTag::Rtp]
    }

    fn dissect(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, data: &[u8]) -> DissectOutcome {
        let Ok((hdr, rest)) = UdpFixed::ref_from_prefix(data) else {
            ctx.telemetry.record_error(&crate::error::Error::Parse(ParseError::Truncated {
                layer: "udp",
                expected: 8,
                actual: data.len(),
            }));
            return DissectOutcome::NotRecognized;
        };

        let Some(crate::packet::LayerData::Ip(ip)) = packet.layer(ProtocolTag::Ip).cloned() else {
            return DissectOutcome::NotRecognized;
        };

        let src = Address::new(ip.src_ip, u16::from_be_bytes(hdr.src_port));
        let dst = Address::new(ip.dst_ip, u16::from_be_bytes(hdr.dst_port));
        packet.push_layer(LayerData::Udp(UdpHeader { src, dst }));
        DissectOutcome::Continue(rest.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dissect::ip::IpHeader;
    use crate::storage::Storage;
    use crate::telemetry::Telemetry;

    #[test]
    fn decodes_ports_from_fixed_header() {
        let mut data = vec![0u8; 8];
        data[0..2].copy_from_slice(&5060u16.to_be_bytes());
        data[2..4].copy_from_slice(&5061u16.to_be_bytes());
        data.extend_from_slice(b"payload");

        let mut d = UdpDissector;
        let config = Config::default();
        let mut telemetry = Telemetry::default();
        let mut storage = Storage::new(10);
        let mut ctx = DissectCtx {
            config: &config,
            telemetry: &mut telemetry,
            storage: &mut storage,
            tick: 0,
        };
        let mut packet = Packet::new(0, vec![]);
        packet.push_layer(LayerData::Ip(IpHeader {
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "10.0.0.2".parse().unwrap(),
            protocol: 17,
            ttl: 64,
        }));
        match d.dissect(&mut ctx, &mut packet, &data) {
            DissectOutcome::Continue(rest) => assert_eq!(rest, b"payload"),
            _ => panic!("expected recognition"),
        }
        match packet.layer(ProtocolTag::Udp).unwrap() {
            LayerData::Udp(u) => assert_eq!(u.src.port(), 5060),
            _ => unreachable!(),
        }
    }
}
