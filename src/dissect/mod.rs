//! The dissector chain: a polymorphic, iteratively-dispatched registry of
//! protocol parsers (spec.md S4.2).
//!
//! Each [`Dissector`] either fully consumes its input ([`DissectOutcome::Done`]),
//! recognizes it and hands residual bytes onward ([`DissectOutcome::Continue`]),
//! or declines it unchanged ([`DissectOutcome::NotRecognized`]) so the
//! [`Chain`] can try the next candidate in declaration order. This maps the
//! "returns the input unchanged" rule from the spec onto an explicit
//! tri-state result rather than a byte-equality check, which is the
//! idiomatic Rust shape for the same contract (tagged variants, per the
//! class-hierarchy-with-virtual-methods note in spec.md S9).

pub mod ip;
pub mod link;
pub mod rtcp;
pub mod rtp;
pub mod sip;
pub mod tcp;
pub mod tls;
pub mod udp;
pub mod websocket;

use std::collections::HashMap;

use crate::config::Config;
use crate::packet::{Packet, ProtocolTag};
use crate::storage::Storage;
use crate::telemetry::Telemetry;

/// Shared, cross-cutting state passed to every dissector call.
///
/// Per-protocol session state (TCP reassembly tables, TLS connections)
/// lives on the owning [`Dissector`] instance instead, per spec.md S3:
/// "A dissector owns private reassembly or session state."
pub struct DissectCtx<'a> {
    pub config: &'a Config,
    pub telemetry: &'a mut Telemetry,
    pub storage: &'a mut Storage,
    /// Monotonic tick counter, incremented once per frame handed to the
    /// chain; used for TCP flow aging (spec.md S4.3).
    pub tick: u64,
}

/// Result of a single dissector's attempt to consume a buffer.
pub enum DissectOutcome {
    /// Input fully consumed; the packet is complete.
    Done,
    /// Input recognized; these residual bytes should go to the next
    /// dissector in the chain.
    Continue(Vec<u8>),
    /// Input not recognized; the chain should try the next candidate.
    NotRecognized,
}

/// A stateful protocol parser.
pub trait Dissector {
    /// Candidate successor protocols, tried in this order when this
    /// dissector recognizes its input and needs to hand off residual bytes.
    fn next_protocols(&self) -> &'static [ProtocolTag];

    /// Attempt to dissect `data` as this protocol, recording any parsed
    /// layer onto `packet` and mutating private session state as needed.
    fn dissect(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, data: &[u8]) -> DissectOutcome;
}

/// The registry of dissectors, keyed by protocol tag, plus the iterative
/// chain-walk engine.
///
/// `tcp` is pulled out of the type-erased registry into its own field:
/// unlike every other dissector it is driven with a concrete `&mut
/// TcpDissector` from two places the homogeneous `dyn Dissector` map can't
/// serve — the per-tick aging sweep (spec.md S4.3 step 5) and the chain
/// walk itself, which needs to reach it whether or not a successor
/// `Box<dyn Dissector>` happens to also be registered under the same tag.
pub struct Chain {
    dissectors: HashMap<ProtocolTag, Box<dyn Dissector + Send>>,
    tcp: tcp::TcpDissector,
}

impl Chain {
    /// Build a chain with one instance of every known dissector.
    pub fn new() -> Self {
        let mut dissectors: HashMap<ProtocolTag, Box<dyn Dissector + Send>> = HashMap::new();
        dissectors.insert(ProtocolTag::Link, Box::new(link::LinkDissector::default()));
        dissectors.insert(ProtocolTag::Ip, Box::new(ip::IpDissector::default()));
        dissectors.insert(ProtocolTag::Udp, Box::new(udp::UdpDissector::default()));
        dissectors.insert(ProtocolTag::Sip, Box::new(sip::SipDissector::default()));
        dissectors.insert(ProtocolTag::Rtp, Box::new(rtp::RtpDissector::default()));
        dissectors.insert(ProtocolTag::Rtcp, Box::new(rtcp::RtcpDissector::default()));
        // Tls and WebSocket have no Chain registration: TcpDissector owns a
        // TlsSessionTable and WebSocket framing directly, since both need a
        // long-lived reassembly buffer that the one-shot Continue(bytes)
        // handoff can't express (see dissect::tcp).
        Self {
            dissectors,
            tcp: tcp::TcpDissector::default(),
        }
    }

    /// Borrow a dissector mutably, e.g. for `TlsDissector` session-table
    /// inspection. Tcp is not reachable this way; see [`Chain::tcp_mut`].
    pub fn dissector_mut(&mut self, tag: ProtocolTag) -> Option<&mut (dyn Dissector + Send)> {
        self.dissectors.get_mut(&tag).map(|b| b.as_mut())
    }

    /// Borrow the TCP dissector concretely, e.g. for the per-tick aging
    /// sweep.
    pub fn tcp_mut(&mut self) -> &mut tcp::TcpDissector {
        &mut self.tcp
    }

    /// Fix the datalink type the link-layer dissector expects, resolved
    /// once from the capture source's `pcap::Linktype` (spec.md S4.1).
    pub fn configure_link(&mut self, link_type: link::LinkType) {
        self.dissectors.insert(ProtocolTag::Link, Box::new({
            let mut d = link::LinkDissector::default();
            d.set_link_type(link_type);
            d
        }));
    }

    /// Run the TCP flow-aging sweep (spec.md S4.3 step 5). Call once per
    /// tick from the engine's main loop.
    pub fn age_tcp_flows(&mut self) -> usize {
        self.tcp.age_and_evict()
    }

    fn dissect_tagged(&mut self, tag: ProtocolTag, ctx: &mut DissectCtx, packet: &mut Packet, data: &[u8]) -> Option<(DissectOutcome, &'static [ProtocolTag])> {
        if tag == ProtocolTag::Tcp {
            let outcome = self.tcp.dissect(ctx, packet, data);
            return Some((outcome, self.tcp.next_protocols()));
        }
        let node = self.dissectors.get_mut(&tag)?;
        let outcome = node.dissect(ctx, packet, data);
        Some((outcome, node.next_protocols()))
    }

    /// Walk the chain starting at `start`, feeding `data` through
    /// successive dissectors until one terminates the chain, declines, or
    /// no successor recognizes the residual bytes.
    ///
    /// Each protocol is dissected exactly once: the probe over a winning
    /// candidate's `next_protocols()` *is* that candidate's dissect call,
    /// so its outcome carries straight into the next iteration instead of
    /// being recomputed at the top of the loop.
    pub fn run(&mut self, ctx: &mut DissectCtx, packet: &mut Packet, start: ProtocolTag, data: &[u8]) {
        let buf = data.to_vec();
        let Some((mut outcome, mut candidates)) = self.dissect_tagged(start, ctx, packet, &buf) else {
            return;
        };

        loop {
            let residual = match outcome {
                DissectOutcome::Done => return,
                DissectOutcome::NotRecognized => return,
                DissectOutcome::Continue(residual) => residual,
            };

            let mut winner = None;
            for &candidate in candidates {
                match self.dissect_tagged(candidate, ctx, packet, &residual) {
                    None | Some((DissectOutcome::NotRecognized, _)) => continue,
                    Some((other, next_candidates)) => {
                        winner = Some((other, next_candidates));
                        break;
                    }
                }
            }

            match winner {
                None => return,
                Some((next_outcome, next_candidates)) => {
                    outcome = next_outcome;
                    candidates = next_candidates;
                }
            }
        }
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::Storage;
    use crate::telemetry::Telemetry;

    fn fresh_ctx() -> (Config, Telemetry, Storage) {
        (Config::default(), Telemetry::default(), Storage::new(1024))
    }

    #[test]
    fn unknown_start_tag_is_a_noop() {
        let mut chain = Chain::new();
        let (config, mut telemetry, mut storage) = fresh_ctx();
        let mut ctx = DissectCtx {
            config: &config,
            telemetry: &mut telemetry,
            storage: &mut storage,
            tick: 0,
        };
        let mut packet = Packet::new(0, vec![]);
        // Rtp has no registered successors for this smoke test; feeding it
        // garbage should not panic and should leave no layer attached.
        chain.run(&mut ctx, &mut packet, ProtocolTag::Rtp, &[0u8; 2]);
        assert!(packet.layers.is_empty() || packet.layer(ProtocolTag::Rtp).is_some());
    }
}
