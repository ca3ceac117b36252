//! SDP media-endpoint correlator (spec.md S4.8).
//!
//! Parses `m=audio PORT …` / `c=IN IP4 IP` pairs out of a SIP body and
//! registers expectations that later RTP/RTCP packets attach against.

use std::net::IpAddr;

use crate::address::Address;

/// An expected media endpoint, registered from an SDP body, pending a
/// matching RTP/RTCP packet.
#[derive(Debug, Clone)]
pub struct Expectation {
    pub call_id: String,
    pub addr: Address,
    /// Microsecond timestamp after which this expectation is no longer
    /// honored (call reached a terminal state plus a 10s grace window).
    pub expires_at_us: Option<u64>,
}

/// Grace window after a call's terminal state before its SDP expectations
/// stop matching new media packets.
pub const EXPECTATION_GRACE_US: u64 = 10_000_000;

/// Pending `(ip:port, call_id)` expectations, keyed by endpoint.
#[derive(Debug, Default)]
pub struct SdpCorrelator {
    expectations: Vec<Expectation>,
}

impl SdpCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an SDP body and register bidirectional expectations for its
    /// first `m=audio` media description.
    pub fn register_from_body(&mut self, call_id: &str, body: &[u8]) {
        let Some((ip, port)) = parse_audio_endpoint(body) else {
            return;
        };
        self.expectations.push(Expectation {
            call_id: call_id.to_string(),
            addr: Address::new(ip, port),
            expires_at_us: None,
        });
    }

    /// Mark every expectation belonging to `call_id` to expire at `now_us +
    /// EXPECTATION_GRACE_US`, called once a call reaches a terminal state.
    pub fn expire_call(&mut self, call_id: &str, now_us: u64) {
        for e in self.expectations.iter_mut().filter(|e| e.call_id == call_id) {
            e.expires_at_us.get_or_insert(now_us + EXPECTATION_GRACE_US);
        }
    }

    /// Drop expectations whose grace window has elapsed.
    pub fn sweep(&mut self, now_us: u64) {
        self.expectations
            .retain(|e| e.expires_at_us.map_or(true, |exp| now_us < exp));
    }

    /// Find the call, if any, whose expectation matches either endpoint of
    /// an arriving RTP/RTCP packet.
    pub fn match_endpoint(&self, src: &Address, dst: &Address) -> Option<&str> {
        self.expectations
            .iter()
            .find(|e| e.addr.eq_ignore_port(src) || e.addr.eq_ignore_port(dst))
            .map(|e| e.call_id.as_str())
    }
}

/// Extract the first `m=audio PORT` / `c=IN IP4 IP` pair from an SDP body.
/// Lines are newline-separated and may use either `\r\n` or `\n`.
fn parse_audio_endpoint(body: &[u8]) -> Option<(IpAddr, u16)> {
    let text = std::str::from_utf8(body).ok()?;
    let mut port = None;
    let mut ip = None;
    let mut in_audio_section = false;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("m=audio ") {
            if port.is_none() {
                port = rest.split_whitespace().next()?.parse::<u16>().ok();
                in_audio_section = true;
            }
        } else if let Some(rest) = line.strip_prefix("c=IN IP4 ") {
            if ip.is_none() && (in_audio_section || port.is_none()) {
                ip = rest.split_whitespace().next()?.parse::<IpAddr>().ok();
            }
        } else if let Some(rest) = line.strip_prefix("c=IN IP6 ") {
            if ip.is_none() && (in_audio_section || port.is_none()) {
                ip = rest.split_whitespace().next()?.parse::<IpAddr>().ok();
            }
        }
    }

    Some((ip?, port?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"v=0\r\no=- 0 0 IN IP4 10.0.0.1\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=audio 40000 RTP/AVP 0\r\n";

    #[test]
    fn parses_audio_endpoint_from_body() {
        let (ip, port) = parse_audio_endpoint(BODY).unwrap();
        assert_eq!(ip.to_string(), "10.0.0.1");
        assert_eq!(port, 40000);
    }

    #[test]
    fn matches_registered_expectation_ignoring_port() {
        let mut corr = SdpCorrelator::new();
        corr.register_from_body("call-1", BODY);
        let src = Address::new("10.0.0.2".parse().unwrap(), 30000);
        let dst = Address::new("10.0.0.1".parse().unwrap(), 40000);
        assert_eq!(corr.match_endpoint(&src, &dst), Some("call-1"));
    }

    #[test]
    fn expired_expectation_is_swept() {
        let mut corr = SdpCorrelator::new();
        corr.register_from_body("call-1", BODY);
        corr.expire_call("call-1", 1_000_000);
        corr.sweep(1_000_000 + EXPECTATION_GRACE_US + 1);
        let src = Address::new("10.0.0.2".parse().unwrap(), 30000);
        let dst = Address::new("10.0.0.1".parse().unwrap(), 40000);
        assert_eq!(corr.match_endpoint(&src, &dst), None);
    }
}
