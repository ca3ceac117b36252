//! Call aggregate and SIP dialog state machine (spec.md S3, S4.7).

use serde::Serialize;

use crate::address::Address;

/// Dialog state, transitioned per the table in spec.md S4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DialogState {
    CallSetup,
    InCall,
    Cancelled,
    Busy,
    Rejected,
    Diverted,
    Completed,
}

/// A parsed SIP message attached to a [`Call`].
#[derive(Debug, Clone)]
pub struct Message {
    pub call_id: String,
    pub cseq: u32,
    pub cseq_method: String,
    pub method_or_status: MethodOrStatus,
    pub from_tag: Option<String>,
    pub to_tag: Option<String>,
    pub via_branch: Option<String>,
    pub x_call_id: Option<String>,
    pub body: Vec<u8>,
    pub timestamp_us: u64,
    pub src: Address,
    pub dst: Address,
}

/// Either a request method or a final/provisional status code, as carried on
/// the SIP start line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodOrStatus {
    Method(String),
    Status(u16),
}

impl MethodOrStatus {
    pub fn is_method(&self, name: &str) -> bool {
        matches!(self, MethodOrStatus::Method(m) if m.eq_ignore_ascii_case(name))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            MethodOrStatus::Status(code) => Some(*code),
            MethodOrStatus::Method(_) => None,
        }
    }
}

/// A media flow, identified once an RTP/RTCP packet matches an SDP
/// expectation (spec.md S4.8).
#[derive(Debug, Clone)]
pub struct Stream {
    pub src: Address,
    pub dst: Address,
    pub ssrc: u32,
    pub codec: Option<u8>,
    pub packet_count: u64,
}

/// Aggregate keyed by SIP Call-ID.
#[derive(Debug, Clone)]
pub struct Call {
    pub call_id: String,
    pub index: u64,
    pub messages: Vec<Message>,
    pub streams: Vec<Stream>,
    pub xref_call_ids: Vec<String>,
    pub state: DialogState,
    pub invite_cseq: Option<u32>,
    pub last_touched_us: u64,
    pub changed: bool,
    /// Three-valued filter memo: `None` = not yet evaluated, matching the
    /// original's `filtered = -1` sentinel.
    pub filtered: Option<bool>,
}

impl Call {
    /// Start a new call from its first message.
    pub fn new(call_id: String, index: u64) -> Self {
        Self {
            call_id,
            index,
            messages: Vec::new(),
            streams: Vec::new(),
            xref_call_ids: Vec::new(),
            state: DialogState::CallSetup,
            invite_cseq: None,
            last_touched_us: 0,
            changed: false,
            filtered: None,
        }
    }

    /// Apply the dialog transition table from spec.md S4.7 for an arriving
    /// message, then store it.
    pub fn push_message(&mut self, msg: Message) {
        self.last_touched_us = msg.timestamp_us;
        self.changed = true;
        if let Some(x) = &msg.x_call_id {
            if !self.xref_call_ids.contains(x) {
                self.xref_call_ids.push(x.clone());
            }
        }

        if msg.method_or_status.is_method("INVITE") {
            self.state = DialogState::CallSetup;
            self.invite_cseq = Some(msg.cseq);
        } else {
            match self.state {
                DialogState::CallSetup => {
                    if msg.method_or_status.is_method("ACK")
                        && self.invite_cseq == Some(msg.cseq)
                    {
                        self.state = DialogState::InCall;
                    } else if msg.method_or_status.is_method("CANCEL") {
                        self.state = DialogState::Cancelled;
                    } else if let Some(status) = msg.method_or_status.status_code() {
                        if matches!(status, 480 | 486 | 600) {
                            self.state = DialogState::Busy;
                        } else if status > 400 && self.invite_cseq == Some(msg.cseq) {
                            self.state = DialogState::Rejected;
                        } else if status > 300 {
                            self.state = DialogState::Diverted;
                        }
                    }
                }
                DialogState::InCall => {
                    if msg.method_or_status.is_method("BYE") {
                        self.state = DialogState::Completed;
                    }
                }
                _ => {}
            }
        }

        self.messages.push(msg);
    }

    /// Whether this call's dialog has reached a terminal state (spec.md
    /// S4.8's expectation-expiry rule).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            DialogState::Cancelled
                | DialogState::Busy
                | DialogState::Rejected
                | DialogState::Diverted
                | DialogState::Completed
        )
    }

    /// Find or create the stream matching `(src, dst, ssrc)`.
    pub fn attach_stream(&mut self, src: Address, dst: Address, ssrc: u32, codec: Option<u8>) -> &mut Stream {
        if let Some(pos) = self
            .streams
            .iter()
            .position(|s| s.ssrc == ssrc && s.src == src && s.dst == dst)
        {
            return &mut self.streams[pos];
        }
        self.streams.push(Stream {
            src,
            dst,
            ssrc,
            codec,
            packet_count: 0,
        });
        self.streams.last_mut().expect("just pushed")
    }

    /// This call's parsed messages, in arrival order (spec.md S6: `call_messages`).
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// This call's attached media streams (spec.md S6: `call_streams`).
    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    /// This call's current dialog state (spec.md S6: `call_state`).
    pub fn state(&self) -> DialogState {
        self.state
    }

    /// A serializable snapshot of this call's display-relevant fields, for
    /// the out-of-scope UI layer to render or export as JSON (spec.md S6's
    /// call table query API).
    pub fn summary(&self) -> CallSummary {
        CallSummary {
            call_id: self.call_id.clone(),
            index: self.index,
            state: self.state,
            message_count: self.messages.len(),
            stream_count: self.streams.len(),
            invite_cseq: self.invite_cseq,
        }
    }

    /// Look up a single display attribute (spec.md S6: `call_attribute`).
    pub fn attribute(&self, attr: CallAttribute) -> String {
        match attr {
            CallAttribute::CallIndex => self.index.to_string(),
            CallAttribute::CallId => self.call_id.clone(),
            CallAttribute::State => format!("{:?}", self.state),
            CallAttribute::MessageCount => self.messages.len().to_string(),
            CallAttribute::InviteCseq => self
                .invite_cseq
                .map(|c| c.to_string())
                .unwrap_or_default(),
        }
    }
}

/// JSON-serializable call summary returned by [`Call::summary`].
#[derive(Debug, Clone, Serialize)]
pub struct CallSummary {
    pub call_id: String,
    pub index: u64,
    pub state: DialogState,
    pub message_count: usize,
    pub stream_count: usize,
    pub invite_cseq: Option<u32>,
}

/// Attributes addressable through [`Call::attribute`], mirroring the
/// original `sip_attr_id` enum's subset relevant to call-level display
/// (spec.md S6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAttribute {
    CallIndex,
    CallId,
    State,
    MessageCount,
    InviteCseq,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(method_or_status: MethodOrStatus, cseq: u32) -> Message {
        Message {
            call_id: "abc@host".into(),
            cseq,
            cseq_method: "INVITE".into(),
            method_or_status,
            from_tag: None,
            to_tag: None,
            via_branch: None,
            x_call_id: None,
            body: Vec::new(),
            timestamp_us: 0,
            src: Address::new("10.0.0.1".parse().unwrap(), 5060),
            dst: Address::new("10.0.0.2".parse().unwrap(), 5060),
        }
    }

    #[test]
    fn invite_ack_bye_reaches_completed() {
        let mut call = Call::new("abc@host".into(), 0);
        call.push_message(msg(MethodOrStatus::Method("INVITE".into()), 1));
        assert_eq!(call.state, DialogState::CallSetup);
        assert_eq!(call.invite_cseq, Some(1));

        call.push_message(msg(MethodOrStatus::Status(200), 1));
        assert_eq!(call.state, DialogState::CallSetup);

        call.push_message(msg(MethodOrStatus::Method("ACK".into()), 1));
        assert_eq!(call.state, DialogState::InCall);

        call.push_message(msg(MethodOrStatus::Method("BYE".into()), 2));
        assert_eq!(call.state, DialogState::Completed);
        assert!(call.is_terminal());
    }

    #[test]
    fn invite_486_is_busy() {
        let mut call = Call::new("abc@host".into(), 0);
        call.push_message(msg(MethodOrStatus::Method("INVITE".into()), 1));
        call.push_message(msg(MethodOrStatus::Status(486), 1));
        assert_eq!(call.state, DialogState::Busy);
    }

    #[test]
    fn invite_302_is_diverted() {
        let mut call = Call::new("abc@host".into(), 0);
        call.push_message(msg(MethodOrStatus::Method("INVITE".into()), 1));
        call.push_message(msg(MethodOrStatus::Status(302), 1));
        assert_eq!(call.state, DialogState::Diverted);
    }

    #[test]
    fn attribute_lookup_reports_call_id_and_cseq() {
        let mut call = Call::new("abc@host".into(), 7);
        call.push_message(msg(MethodOrStatus::Method("INVITE".into()), 3));
        assert_eq!(call.attribute(CallAttribute::CallIndex), "7");
        assert_eq!(call.attribute(CallAttribute::CallId), "abc@host");
        assert_eq!(call.attribute(CallAttribute::InviteCseq), "3");
        assert_eq!(call.attribute(CallAttribute::MessageCount), "1");
    }

    #[test]
    fn summary_serializes_to_json() {
        let mut call = Call::new("abc@host".into(), 7);
        call.push_message(msg(MethodOrStatus::Method("INVITE".into()), 3));
        let json = serde_json::to_string(&call.summary()).unwrap();
        assert!(json.contains("\"abc@host\""));
        assert!(json.contains("\"CallSetup\""));
    }

    #[test]
    fn mismatched_cseq_final_response_still_diverts() {
        let mut call = Call::new("abc@host".into(), 0);
        call.push_message(msg(MethodOrStatus::Method("INVITE".into()), 1));
        // Evaluation order (S4.7): a status > 400 with a mismatched CSeq
        // misses the REJECTED row but still falls through to the status >
        // 300 row, landing on DIVERTED.
        call.push_message(msg(MethodOrStatus::Status(487), 99));
        assert_eq!(call.state, DialogState::Diverted);
    }
}
