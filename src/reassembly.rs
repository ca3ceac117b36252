//! TCP stream reassembly (spec.md S4.3).

use crate::address::Address;

/// Segment-count ceiling before a flow is evicted without ever producing a
/// dissectable message.
pub const TCP_MAX_SEGMENTS: usize = 5;

/// Age, in ticks of inactivity, before a flow is evicted.
pub const TCP_MAX_AGE: u64 = 3;

/// Canonical, direction-independent flow key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    lo_addr: Address,
    hi_addr: Address,
}

impl FlowKey {
    pub fn new(a: &Address, b: &Address) -> Self {
        if addr_order(a, b) {
            FlowKey {
                lo_addr: a.clone(),
                hi_addr: b.clone(),
            }
        } else {
            FlowKey {
                lo_addr: b.clone(),
                hi_addr: a.clone(),
            }
        }
    }
}

/// Orders two addresses by IP then port so the lexicographically smaller
/// one always occupies the same slot, regardless of packet direction.
fn addr_order(a: &Address, b: &Address) -> bool {
    (a.ip(), a.port()) <= (b.ip(), b.port())
}

#[derive(Debug, Clone)]
struct Segment {
    seq: u32,
    bytes: Vec<u8>,
}

/// One reassembled TCP flow.
#[derive(Debug, Clone)]
pub struct TcpStream {
    segments: Vec<Segment>,
    buffer: Vec<u8>,
    base_seq: Option<u32>,
    pub age: u64,
}

impl TcpStream {
    fn new() -> Self {
        Self {
            segments: Vec::new(),
            buffer: Vec::new(),
            base_seq: None,
            age: 0,
        }
    }

    /// Insert an arriving segment, in-order with overlap/duplicate
    /// tie-breaks from spec.md S4.3, and try to extend the reassembled
    /// in-order prefix.
    ///
    /// Returns the newly-appended contiguous bytes, if the in-order prefix
    /// grew.
    pub fn insert(&mut self, seq: u32, bytes: &[u8]) -> Option<Vec<u8>> {
        self.age = 0;
        if self.base_seq.is_none() {
            self.base_seq = Some(seq);
        }

        match self.segments.iter().position(|s| s.seq == seq) {
            Some(idx) => {
                if bytes.len() > self.segments[idx].bytes.len() {
                    self.segments[idx].bytes = bytes.to_vec();
                }
            }
            None => {
                let idx = self.segments.partition_point(|s| s.seq < seq);
                self.segments.insert(
                    idx,
                    Segment {
                        seq,
                        bytes: bytes.to_vec(),
                    },
                );
            }
        }

        self.drain_in_order_prefix()
    }

    /// Walk segments in sequence order, folding the contiguous in-order
    /// prefix into `buffer`, stopping at the first gap.
    fn drain_in_order_prefix(&mut self) -> Option<Vec<u8>> {
        let mut appended = Vec::new();
        loop {
            let Some(expected) = self.next_expected_seq() else {
                break;
            };
            let Some(idx) = self.segments.iter().position(|s| s.seq == expected) else {
                break;
            };
            let seg = self.segments.remove(idx);
            appended.extend_from_slice(&seg.bytes);
            self.buffer.extend_from_slice(&seg.bytes);
        }
        if appended.is_empty() {
            None
        } else {
            Some(appended)
        }
    }

    fn next_expected_seq(&self) -> Option<u32> {
        let base = self.base_seq?;
        Some(base.wrapping_add(self.buffer.len() as u32))
    }

    /// Number of segments currently buffered awaiting delivery.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// The reassembled, gap-free buffer accumulated so far.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop bytes already handed to an upper dissector (e.g. a complete SIP
    /// message), keeping any undelivered residual.
    pub fn consume_buffer(&mut self, n: usize) {
        self.buffer.drain(0..n.min(self.buffer.len()));
    }

    pub fn should_evict(&self) -> bool {
        self.age > TCP_MAX_AGE || self.segments.len() > TCP_MAX_SEGMENTS
    }
}

impl Default for TcpStream {
    fn default() -> Self {
        Self::new()
    }
}

/// A flow table of [`TcpStream`]s, keyed by canonical 4-tuple.
#[derive(Debug, Default)]
pub struct ReassemblyTable {
    flows: std::collections::HashMap<FlowKey, TcpStream>,
}

impl ReassemblyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flow_mut(&mut self, a: &Address, b: &Address) -> &mut TcpStream {
        self.flows.entry(FlowKey::new(a, b)).or_insert_with(TcpStream::new)
    }

    pub fn remove(&mut self, a: &Address, b: &Address) {
        self.flows.remove(&FlowKey::new(a, b));
    }

    /// Increment every flow's age by one tick and evict the ones that
    /// exceed the bounds from spec.md S4.3.
    pub fn age_and_evict(&mut self) -> usize {
        for flow in self.flows.values_mut() {
            flow.age += 1;
        }
        let before = self.flows.len();
        self.flows.retain(|_, flow| !flow.should_evict());
        before - self.flows.len()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
