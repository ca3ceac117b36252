//! The packet envelope threaded through the dissector chain.
//!
//! A [`Packet`] carries its raw bytes (for later export, out of scope here)
//! plus an ordered list of [`Layer`]s, one per protocol the chain
//! successfully dissected. This replaces the original's `packet_set_protocol_data`
//! keyed lookup with a plain `Vec`, since packets only ever grow one layer at
//! a time and layer count is small (≤ 6).

use bytes::Bytes;

use crate::address::Address;

/// Tag identifying which protocol a [`Layer`] holds data for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolTag {
    Link,
    Ip,
    Udp,
    Tcp,
    Tls,
    Sip,
    Rtp,
    Rtcp,
    WebSocket,
}

/// Decoded, protocol-specific payload for one layer of a packet.
#[derive(Debug, Clone)]
pub enum LayerData {
    Link(crate::dissect::link::LinkHeader),
    Ip(crate::dissect::ip::IpHeader),
    Udp(crate::dissect::udp::UdpHeader),
    Tcp(crate::dissect::tcp::TcpHeader),
    Tls(crate::dissect::tls::TlsRecordSummary),
    Sip(crate::dissect::sip::SipMessage),
    Rtp(crate::dissect::rtp::RtpHeader),
    Rtcp(crate::dissect::rtcp::RtcpReport),
    WebSocket(crate::dissect::websocket::WebSocketFrame),
}

impl LayerData {
    /// The tag for this layer's data.
    pub fn tag(&self) -> ProtocolTag {
        match self {
            LayerData::Link(_) => ProtocolTag::Link,
            LayerData::Ip(_) => ProtocolTag::Ip,
            LayerData::Udp(_) => ProtocolTag::Udp,
            LayerData::Tcp(_) => ProtocolTag::Tcp,
            LayerData::Tls(_) => ProtocolTag::Tls,
            LayerData::Sip(_) => ProtocolTag::Sip,
            LayerData::Rtp(_) => ProtocolTag::Rtp,
            LayerData::Rtcp(_) => ProtocolTag::Rtcp,
            LayerData::WebSocket(_) => ProtocolTag::WebSocket,
        }
    }
}

/// One parsed protocol layer.
#[derive(Debug, Clone)]
pub struct Layer {
    pub data: LayerData,
}

/// A time-stamped envelope carrying raw bytes plus the layers dissected
/// from them so far.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Microsecond Unix epoch timestamp, as captured.
    pub timestamp_us: u64,
    /// Raw frame bytes, retained for later export (out of scope here).
    /// `Bytes` rather than `Vec<u8>` since packets are cloned onto export
    /// queues without needing to duplicate the backing buffer.
    pub raw: Bytes,
    /// Layers dissected so far, outermost (link) first.
    pub layers: Vec<Layer>,
}

impl Packet {
    /// Build a new packet from a captured frame.
    pub fn new(timestamp_us: u64, raw: impl Into<Bytes>) -> Self {
        Self {
            timestamp_us,
            raw: raw.into(),
            layers: Vec::new(),
        }
    }

    /// Append a dissected layer.
    pub fn push_layer(&mut self, data: LayerData) {
        self.layers.push(Layer { data });
    }

    /// Find the first layer matching a tag, if any.
    pub fn layer(&self, tag: ProtocolTag) -> Option<&LayerData> {
        self.layers.iter().map(|l| &l.data).find(|d| d.tag() == tag)
    }

    /// The highest-parsed source/destination pair, resolved from the
    /// highest L3/L4 layer present (UDP/TCP if present, else bare IP).
    pub fn endpoints(&self) -> Option<(Address, Address)> {
        if let Some(LayerData::Udp(u)) = self.layer(ProtocolTag::Udp) {
            return Some((u.src.clone(), u.dst.clone()));
        }
        if let Some(LayerData::Tcp(t)) = self.layer(ProtocolTag::Tcp) {
            return Some((t.src.clone(), t.dst.clone()));
        }
        if let Some(LayerData::Ip(i)) = self.layer(ProtocolTag::Ip) {
            return Some((
                Address::new(i.src_ip, 0),
                Address::new(i.dst_ip, 0),
            ));
        }
        None
    }
}
