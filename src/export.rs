//! Save/export seams (spec.md S1 Non-goals: "Save/export formatting").
//!
//! PCAP, WAV, and text-dump formatting live entirely outside this crate;
//! these traits are the interface an external exporter implements against
//! the dissection pipeline's in-memory model, without this crate needing to
//! know anything about file formats.

use crate::packet::Packet;
use crate::storage::{Call, Stream};

/// Writes a call's messages out in some external format (e.g. a PCAP of the
/// signaling packets, or a text transcript).
pub trait CallExporter {
    type Error;

    /// Called once per packet that contributed a message to `call`, in
    /// arrival order.
    fn export_packet(&mut self, call: &Call, packet: &Packet) -> Result<(), Self::Error>;

    /// Called after the last packet for `call` has been exported.
    fn finish(&mut self, call: &Call) -> Result<(), Self::Error>;
}

/// Writes a media stream's decoded audio out in some external format (e.g.
/// a WAV file).
pub trait StreamExporter {
    type Error;

    /// Called once per decoded frame of PCM samples for `stream`.
    fn export_samples(&mut self, stream: &Stream, samples: &[i16]) -> Result<(), Self::Error>;

    fn finish(&mut self, stream: &Stream) -> Result<(), Self::Error>;
}
