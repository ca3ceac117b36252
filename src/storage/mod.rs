//! Call table and media-stream attachment (spec.md S4.7, S4.8).

pub mod call;

use std::collections::HashMap;

use crate::address::Address;
use crate::error::StorageError;
use crate::sdp::SdpCorrelator;

pub use call::{Call, CallAttribute, CallSummary, DialogState, Message, MethodOrStatus, Stream};

/// The call table plus the SDP correlator that feeds stream attachment.
///
/// Calls live in a Call-ID-keyed table bounded by `capacity`; eviction is
/// LRU by `last_touched_us`, preferring to keep calls in non-terminal
/// states (spec.md S5).
pub struct Storage {
    calls: HashMap<String, Call>,
    order: Vec<String>,
    capacity: usize,
    next_index: u64,
    pub sdp: SdpCorrelator,
}

impl Storage {
    pub fn new(capacity: usize) -> Self {
        Self {
            calls: HashMap::new(),
            order: Vec::new(),
            capacity,
            next_index: 0,
            sdp: SdpCorrelator::new(),
        }
    }

    /// Number of calls currently tracked.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Insert a message, creating a new call if its Call-ID is unseen.
    /// Evicts the least-recently-touched terminal call if the table is at
    /// capacity and the incoming message starts a new call.
    pub fn push_message(&mut self, msg: Message) -> Result<(), StorageError> {
        let call_id = msg.call_id.clone();
        if !self.calls.contains_key(&call_id) {
            if self.calls.len() >= self.capacity {
                self.evict_one()?;
            }
            let index = self.next_index;
            self.next_index += 1;
            self.calls.insert(call_id.clone(), Call::new(call_id.clone(), index));
            self.order.push(call_id.clone());
        }
        let was_terminal_before;
        {
            let call = self.calls.get_mut(&call_id).expect("just inserted");
            was_terminal_before = call.is_terminal();
            if let Some(b) = body_if_sdp(&msg) {
                self.sdp.register_from_body(&call_id, b);
            }
            call.push_message(msg);
        }
        let call = self.calls.get(&call_id).expect("present");
        if !was_terminal_before && call.is_terminal() {
            self.sdp.expire_call(&call_id, call.last_touched_us);
        }
        Ok(())
    }

    fn evict_one(&mut self) -> Result<(), StorageError> {
        let victim = self
            .order
            .iter()
            .filter_map(|id| self.calls.get(id).map(|c| (id.clone(), c.is_terminal(), c.last_touched_us)))
            .min_by_key(|(_, terminal, ts)| (!terminal, *ts))
            .map(|(id, _, _)| id);

        match victim {
            Some(id) => {
                self.calls.remove(&id);
                self.order.retain(|x| x != &id);
                Ok(())
            }
            None => Err(StorageError::CallTableFull {
                capacity: self.capacity,
            }),
        }
    }

    pub fn get(&self, call_id: &str) -> Option<&Call> {
        self.calls.get(call_id)
    }

    pub fn get_mut(&mut self, call_id: &str) -> Option<&mut Call> {
        self.calls.get_mut(call_id)
    }

    /// All tracked calls, in insertion order.
    pub fn list_calls(&self) -> impl Iterator<Item = &Call> {
        self.order.iter().filter_map(move |id| self.calls.get(id))
    }

    /// Attach an RTP/RTCP packet to the call whose SDP expectation matches
    /// `(src, dst)`, creating the stream on first sight.
    pub fn attach_media(
        &mut self,
        src: &Address,
        dst: &Address,
        ssrc: u32,
        codec: Option<u8>,
    ) -> Option<&mut Stream> {
        let call_id = self.sdp.match_endpoint(src, dst)?.to_string();
        let call = self.calls.get_mut(&call_id)?;
        let stream = call.attach_stream(src.clone(), dst.clone(), ssrc, codec);
        stream.packet_count += 1;
        Some(stream)
    }

    /// Age out stale SDP expectations. Call once per tick.
    pub fn sweep_expectations(&mut self, now_us: u64) {
        self.sdp.sweep(now_us);
    }
}

fn body_if_sdp(msg: &Message) -> Option<&[u8]> {
    if msg.body.is_empty() {
        None
    } else {
        Some(&msg.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use call::MethodOrStatus;

    fn msg(call_id: &str, method_or_status: MethodOrStatus, cseq: u32, body: Vec<u8>, ts: u64) -> Message {
        Message {
            call_id: call_id.to_string(),
            cseq,
            cseq_method: "INVITE".into(),
            method_or_status,
            from_tag: None,
            to_tag: None,
            via_branch: None,
            x_call_id: None,
            body,
            timestamp_us: ts,
            src: Address::new("10.0.0.1".parse().unwrap(), 5060),
            dst: Address::new("10.0.0.2".parse().unwrap(), 5060),
        }
    }

    #[test]
    fn new_call_id_creates_entry() {
        let mut s = Storage::new(10);
        s.push_message(msg("abc@host", MethodOrStatus::Method("INVITE".into()), 1, vec![], 0))
            .unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.get("abc@host").unwrap().messages.len(), 1);
    }

    #[test]
    fn eviction_prefers_terminal_calls() {
        let mut s = Storage::new(1);
        s.push_message(msg("a@host", MethodOrStatus::Method("INVITE".into()), 1, vec![], 0))
            .unwrap();
        s.get_mut("a@host").unwrap().state = DialogState::Completed;
        s.push_message(msg("b@host", MethodOrStatus::Method("INVITE".into()), 1, vec![], 1))
            .unwrap();
        assert!(s.get("a@host").is_none());
        assert!(s.get("b@host").is_some());
    }

    #[test]
    fn sdp_body_registers_expectation_and_attaches_media() {
        let mut s = Storage::new(10);
        let body = b"m=audio 40000 RTP/AVP 0\r\nc=IN IP4 10.0.0.1\r\n".to_vec();
        s.push_message(msg("abc@host", MethodOrStatus::Method("INVITE".into()), 1, body, 0))
            .unwrap();
        let src = Address::new("10.0.0.2".parse().unwrap(), 30000);
        let dst = Address::new("10.0.0.1".parse().unwrap(), 40000);
        let stream = s.attach_media(&src, &dst, 0xDEADBEEF, Some(0)).unwrap();
        assert_eq!(stream.ssrc, 0xDEADBEEF);
        assert_eq!(s.get("abc@host").unwrap().streams.len(), 1);
    }
}
