//! Link-layer dissection (Ethernet, Linux SLL, raw IP).
//!
//! The capture input resolves the datalink type once per source (spec.md
//! S4.1); this dissector strips whatever link framing that type implies and
//! hands the L3 payload onward. It is stateless: successive frames from the
//! same source all carry the same link type, so there is nothing to track
//! between calls.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use super::{DissectCtx, DissectOutcome, Dissector};
use crate::packet::{LayerData, Packet, ProtocolTag};

/// Ethernet, Linux cooked capture, or bare IP — the three datalink types
/// spec.md S6 requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    LinuxSll,
    RawIp,
}

impl LinkType {
    /// Map a pcap `DLT_*` constant to our reduced set.
    pub fn from_dlt(dlt: i32) -> Option<LinkType> {
        match dlt {
            1 => Some(LinkType::Ethernet),
            113 => Some(LinkType::LinuxSll),
            12 | 14 => Some(LinkType::RawIp),
            _ => None,
        }
    }
}

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const SLL_PROTOCOL_IPV4: u16 = 0x0800;
const SLL_PROTOCOL_IPV6: u16 = 0x86DD;

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
struct EthernetHeader {
    dst: [u8; 6],
    src: [u8; 6],
    ethertype: [u8; 2],
}

#[repr(C)]
#[derive(FromBytes, Immutable, KnownLayout)]
struct SllHeader {
    packet_type: [u8; 2],
    arphrd_type: [u8; 2],
    addr_len: [u8; 2],
    addr: [u8; 8],
    protocol: [u8; 2],
}

/// Decoded link-layer header: just enough to know which L3 protocol follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    pub link_type: LinkType,
    pub is_ipv6: bool,
}

/// Dissects the outermost link-layer framing.
pub struct LinkDissector {
    link_type: LinkType,
}

impl Default for LinkDissector {
    fn default() -> Self {
        Self {
            link_type: LinkType::Ethernet,
        }
    }
}

impl LinkDissector {
    /// Fix the datalink type for this capture source.
    pub fn set_link_type(&mut self, link_type: LinkType) {
        self.link_type = link_type;
    }
}

impl Dissector for LinkDissector {
    fn next_protocols(&self) -> &'static [ProtocolTag] {
        &[ProtocolTag::Ip]
    }

    fn dissect(&mut self, _ctx: &mut DissectCtx, packet: &mut Packet, data: &[u8]) -> DissectOutcome {
        match self.link_type {
            LinkType::Ethernet => {
                let Ok((hdr, rest)) = EthernetHeader::ref_from_prefix(data) else {
                    return DissectOutcome::NotRecognized;
                };
                let ethertype = u16::from_be_bytes(hdr.ethertype);
                let is_ipv6 = match ethertype {
                    ETHERTYPE_IPV4 => false,
                    ETHERTYPE_IPV6 => true,
                    _ => return DissectOutcome::NotRecognized,
                };
                packet.push_layer(LayerData::Link(LinkHeader {
                    link_type: self.link_type,
                    is_ipv6,
                }));
                DissectOutcome::Continue(rest.to_vec())
            }
            LinkType::LinuxSll => {
                let Ok((hdr, rest)) = SllHeader::ref_from_prefix(data) else {
                    return DissectOutcome::NotRecognized;
                };
                let protocol = u16::from_be_bytes(hdr.protocol);
                let is_ipv6 = match protocol {
                    SLL_PROTOCOL_IPV4 => false,
                    SLL_PROTOCOL_IPV6 => true,
                    _ => return DissectOutcome::NotRecognized,
                };
                packet.push_layer(LayerData::Link(LinkHeader {
                    link_type: self.link_type,
                    is_ipv6,
                }));
                DissectOutcome::Continue(rest.to_vec())
            }
            LinkType::RawIp => {
                if data.is_empty() {
                    return DissectOutcome::NotRecognized;
                }
                let version = data[0] >> 4;
                let is_ipv6 = match version {
                    4 => false,
                    6 => true,
                    _ => return DissectOutcome::NotRecognized,
                };
                packet.push_layer(LayerData::Link(LinkHeader {
                    link_type: self.link_type,
                    is_ipv6,
                }));
                DissectOutcome::Continue(data.to_vec())
            }
        }
    }
}
