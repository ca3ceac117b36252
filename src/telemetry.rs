//! Per-run counters (spec.md S7).
//!
//! Transient per-packet failures are swallowed at the dissector-chain
//! boundary rather than propagated; these counters are the only record that
//! they happened. Export/formatting of these counts is out of scope.

/// Tallies of dropped or noteworthy events, incremented as the engine runs.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    pub frames_seen: u64,
    pub parse_errors: u64,
    pub session_errors: u64,
    pub crypto_errors: u64,
    pub storage_errors: u64,
    pub tcp_segments_reassembled: u64,
    pub tcp_flows_evicted: u64,
    pub tls_sessions_decrypted: u64,
    pub tls_sessions_undecryptable: u64,
    pub sip_messages_parsed: u64,
    pub rtp_packets_attached: u64,
    pub rtcp_packets_attached: u64,
}

impl Telemetry {
    /// Record a dissection-layer error by its broad kind.
    pub fn record_error(&mut self, err: &crate::error::Error) {
        match err {
            crate::error::Error::Input(_) => {}
            crate::error::Error::Parse(_) => self.parse_errors += 1,
            crate::error::Error::Session(_) => self.session_errors += 1,
            crate::error::Error::Crypto(_) => self.crypto_errors += 1,
            crate::error::Error::Storage(_) => self.storage_errors += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ParseError};

    #[test]
    fn record_error_buckets_by_kind() {
        let mut t = Telemetry::default();
        t.record_error(&Error::Parse(ParseError::Truncated {
            layer: "ip",
            expected: 20,
            actual: 4,
        }));
        assert_eq!(t.parse_errors, 1);
        assert_eq!(t.session_errors, 0);
    }
}
