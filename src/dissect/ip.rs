//! IPv4/IPv6 dissection.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use zerocopy::{FromBytes, Immutable, KnownLayout};

use super::{DissectCtx, DissectOutcome, Dissector};
use crate::error::ParseError;
use crate::packet::{LayerData, Packet, ProtocolTag};

const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
struct Ipv4Fixed {
    version_ihl: u8,
    dscp_ecn: u8,
    total_len: [u8; 2],
    identification: [u8; 2],
    flags_frag: [u8; 2],
    ttl: u8,
    protocol: u8,
    checksum: [u8; 2],
    src: [u8; 4],
    dst: [u8; 4],
}

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
struct Ipv6Fixed {
    version_class_flow: [u8; 4],
    payload_len: [u8; 2],
    next_header: u8,
    hop_limit: u8,
    src: [u8; 16],
    dst: [u8; 16],
}

/// Decoded IP header: just the fields later layers need (endpoints,
/// transport demux, TTL for diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpHeader {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub protocol: u8,
    pub ttl: u8,
}

/// Dissects IPv4 and (when the `ipv6` feature is enabled) IPv6 headers.
#[derive(Default)]
pub struct IpDissector;

impl Dissector for IpDissector {
    fn next_protocols(&self) -> &'static [ProtocolTag] {
        &[ProtocolTag::Udp, ProtocolTag::Tcp]
    }

    fn dissect(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, data: &[u8]) -> DissectOutcome {
        if data.is_empty() {
            return DissectOutcome::NotRecognized;
        }
        let version = data[0] >> 4;
        match version {
            4 => self.dissect_v4(ctx, packet, data),
            #[cfg(feature = "ipv6")]
            6 => self.dissect_v6(ctx, packet, data),
            _ => DissectOutcome::NotRecognized,
        }
    }
}

impl IpDissector {
    fn dissect_v4(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, data: &[u8]) -> DissectOutcome {
        let Ok((hdr, _)) = Ipv4Fixed::ref_from_prefix(data) else {
            ctx.telemetry.record_error(&crate::error::Error::Parse(ParseError::Truncated {
                layer: "ip",
                expected: 20,
                actual: data.len(),
            }));
            return DissectOutcome::NotRecognized;
        };
        let ihl = (hdr.version_ihl & 0x0F) as usize * 4;
        if ihl < 20 || data.len() < ihl {
            ctx.telemetry.record_error(&crate::error::Error::Parse(ParseError::Malformed {
                layer: "ip",
                reason: format!("invalid IHL {ihl}"),
            }));
            return DissectOutcome::NotRecognized;
        }
        if hdr.protocol != PROTO_TCP && hdr.protocol != PROTO_UDP {
            return DissectOutcome::NotRecognized;
        }
        packet.push_layer(LayerData::Ip(IpHeader {
            src_ip: IpAddr::V4(Ipv4Addr::from(hdr.src)),
            dst_ip: IpAddr::V4(Ipv4Addr::from(hdr.dst)),
            protocol: hdr.protocol,
            ttl: hdr.ttl,
        }));
        DissectOutcome::Continue(data[ihl..].to_vec())
    }

    #[cfg(feature = "ipv6")]
    fn dissect_v6(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, data: &[u8]) -> DissectOutcome {
        let Ok((hdr, _)) = Ipv6Fixed::ref_from_prefix(data) else {
            ctx.telemetry.record_error(&crate::error::Error::Parse(ParseError::Truncated {
                layer: "ip6",
                expected: 40,
                actual: data.len(),
            }));
            return DissectOutcome::NotRecognized;
        };
        if hdr.next_header != PROTO_TCP && hdr.next_header != PROTO_UDP {
            return DissectOutcome::NotRecognized;
        }
        if data.len() < 40 {
            return DissectOutcome::NotRecognized;
        }
        packet.push_layer(LayerData::Ip(IpHeader {
            src_ip: IpAddr::V6(Ipv6Addr::from(hdr.src)),
            dst_ip: IpAddr::V6(Ipv6Addr::from(hdr.dst)),
            protocol: hdr.next_header,
            ttl: hdr.hop_limit,
        }));
        DissectOutcome::Continue(data[40..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::Storage;
    use crate::telemetry::Telemetry;

    fn ctx<'a>(config: &'a Config, telemetry: &'a mut Telemetry, storage: &'a mut Storage) -> DissectCtx<'a> {
        DissectCtx { config, telemetry, storage, tick: 0 }
    }

    fn build_v4(protocol: u8, payload_len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; 20 + payload_len];
        buf[0] = 0x45;
        buf[8] = 64;
        buf[9] = protocol;
        buf[12..16].copy_from_slice(&[10, 0, 0, 1]);
        buf[16..20].copy_from_slice(&[10, 0, 0, 2]);
        buf
    }

    #[test]
    fn recognizes_udp_over_ipv4() {
        let data = build_v4(PROTO_UDP, 8);
        let mut d = IpDissector::default();
        let config = Config::default();
        let mut telemetry = Telemetry::default();
        let mut storage = Storage::new(10);
        let mut c = ctx(&config, &mut telemetry, &mut storage);
        let mut packet = Packet::new(0, vec![]);
        match d.dissect(&mut c, &mut packet, &data) {
            DissectOutcome::Continue(rest) => assert_eq!(rest.len(), 8),
            _ => panic!("expected recognition"),
        }
        assert!(packet.layer(ProtocolTag::Ip).is_some());
    }

    #[test]
    fn rejects_unknown_transport() {
        let data = build_v4(1, 8); // ICMP
        let mut d = IpDissector::default();
        let config = Config::default();
        let mut telemetry = Telemetry::default();
        let mut storage = Storage::new(10);
        let mut c = ctx(&config, &mut telemetry, &mut storage);
        let mut packet = Packet::new(0, vec![]);
        match d.dissect(&mut c, &mut packet, &data) {
            DissectOutcome::NotRecognized => {}
            _ => panic!("expected rejection"),
        }
    }
}
