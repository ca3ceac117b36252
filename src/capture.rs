//! Capture input: live interfaces and offline capture files (spec.md S4.1).
//!
//! Built on the `pcap` crate the way `extract_tls_records` in the padding
//! research tool reads frames: `capture.next_packet()` in a loop, treating
//! `pcap::Error::NoMorePackets` as clean EOF rather than a failure.

use std::path::Path;

use pcap::{Active, Capture as PcapCapture, Offline};

use crate::dissect::link::LinkType;
use crate::error::{InputError, Result};

/// One captured frame, lifted out of `pcap`'s borrowed packet view so it can
/// outlive the capture handle's next call.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Microsecond Unix epoch timestamp, as captured.
    pub timestamp_us: u64,
    pub data: Vec<u8>,
}

/// A source of [`Frame`]s: a live interface or an offline capture file.
pub trait FrameSource {
    /// Pull the next frame, or `Ok(None)` on clean end of an offline file.
    /// Errors other than EOF are fatal to the run.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// The resolved datalink type for this source, used to configure the
    /// chain's link-layer dissector once.
    fn link_type(&self) -> LinkType;

    /// Bytes consumed so far / total bytes available, for progress
    /// reporting. Live sources report `(consumed, consumed)` since there is
    /// no known total.
    fn progress(&self) -> (u64, u64);
}

fn resolve_link_type(dlt: pcap::Linktype) -> Result<LinkType> {
    LinkType::from_dlt(dlt.0).ok_or_else(|| {
        InputError::OpenFailed(format!("unsupported datalink type {}", dlt.0)).into()
    })
}

/// A live capture opened on a named interface, with an optional BPF filter.
pub struct LiveCapture {
    capture: PcapCapture<Active>,
    link_type: LinkType,
    bytes_consumed: u64,
}

impl LiveCapture {
    pub fn open(interface: &str, bpf_filter: Option<&str>) -> Result<Self> {
        let mut capture = PcapCapture::from_device(interface)
            .map_err(|e| InputError::OpenFailed(e.to_string()))?
            .promisc(true)
            .snaplen(65535)
            .open()
            .map_err(|e| InputError::OpenFailed(e.to_string()))?;

        if let Some(filter) = bpf_filter {
            capture
                .filter(filter, true)
                .map_err(|e| InputError::FilterInvalid(e.to_string()))?;
        }

        let link_type = resolve_link_type(capture.get_datalink())?;
        Ok(Self {
            capture,
            link_type,
            bytes_consumed: 0,
        })
    }
}

impl FrameSource for LiveCapture {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let timestamp_us =
                    packet.header.ts.tv_sec as u64 * 1_000_000 + packet.header.ts.tv_usec as u64;
                self.bytes_consumed += packet.data.len() as u64;
                Ok(Some(Frame {
                    timestamp_us,
                    data: packet.data.to_vec(),
                }))
            }
            Err(pcap::Error::NoMorePackets) => Ok(None),
            Err(e) => Err(InputError::from(e).into()),
        }
    }

    fn link_type(&self) -> LinkType {
        self.link_type
    }

    fn progress(&self) -> (u64, u64) {
        (self.bytes_consumed, self.bytes_consumed)
    }
}

/// An offline capture replayed from a `.pcap`/`.pcapng` file.
///
/// `pcap::Capture<Offline>` exposes no running byte total, so the total is
/// read once up front from the file's size on disk and progress is tracked
/// by summing consumed per-frame lengths (spec.md S4.1).
pub struct OfflineCapture {
    capture: PcapCapture<Offline>,
    link_type: LinkType,
    bytes_consumed: u64,
    bytes_total: u64,
}

impl OfflineCapture {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes_total = std::fs::metadata(path)
            .map_err(|e| InputError::OpenFailed(e.to_string()))?
            .len();
        let capture =
            PcapCapture::from_file(path).map_err(|e| InputError::OpenFailed(e.to_string()))?;
        let link_type = resolve_link_type(capture.get_datalink())?;
        Ok(Self {
            capture,
            link_type,
            bytes_consumed: 0,
            bytes_total,
        })
    }
}

impl FrameSource for OfflineCapture {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let timestamp_us =
                    packet.header.ts.tv_sec as u64 * 1_000_000 + packet.header.ts.tv_usec as u64;
                self.bytes_consumed += packet.data.len() as u64;
                Ok(Some(Frame {
                    timestamp_us,
                    data: packet.data.to_vec(),
                }))
            }
            Err(pcap::Error::NoMorePackets) => Ok(None),
            Err(e) => Err(InputError::from(e).into()),
        }
    }

    fn link_type(&self) -> LinkType {
        self.link_type
    }

    fn progress(&self) -> (u64, u64) {
        (self.bytes_consumed, self.bytes_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_link_type_accepts_ethernet() {
        assert_eq!(resolve_link_type(pcap::Linktype(1)).unwrap(), LinkType::Ethernet);
    }

    #[test]
    fn resolve_link_type_rejects_unknown_dlt() {
        assert!(resolve_link_type(pcap::Linktype(9999)).is_err());
    }
}
