//! Packet capture and protocol dissection pipeline for SIP call
//! reconstruction.
//!
//! This crate implements the stateful dissector chain that turns raw
//! link-layer frames — read live from an interface or replayed from a
//! capture file — into correlated SIP dialogs, their attached RTP/RTCP
//! media streams, and (given a server RSA private key) the plaintext of
//! TLS-encrypted SIP sessions.
//!
//! # Pipeline
//!
//! ```text
//! Capture Input -> Link -> IP -> {UDP, TCP -> TLS?} -> {SIP, RTP, RTCP, WebSocket} -> Storage
//! ```
//!
//! [`engine::Engine`] owns one capture source plus the dissector chain and
//! drives them frame by frame. Everything outside this pipeline — the
//! terminal UI, PCAP/WAV/text export, CLI/config-file parsing, and the
//! audio codecs' actual decode bodies — is out of scope; this crate exposes
//! the seams ([`codec::Decoder`], [`export::CallExporter`]) those
//! collaborators implement against.
//!
//! # Example
//!
//! ```ignore
//! use callscope_core::capture::OfflineCapture;
//! use callscope_core::config::Config;
//! use callscope_core::engine::Engine;
//!
//! let source = OfflineCapture::open(std::path::Path::new("call.pcap"))?;
//! let mut engine = Engine::new(Box::new(source), Config::default());
//! engine.run()?;
//!
//! for call in engine.storage().list_calls() {
//!     println!("{}: {:?}", call.call_id, call.state());
//! }
//! # Ok::<(), callscope_core::error::Error>(())
//! ```

pub mod address;
pub mod capture;
pub mod codec;
pub mod config;
pub mod dissect;
pub mod engine;
pub mod error;
pub mod export;
pub mod packet;
pub mod reassembly;
pub mod sdp;
pub mod storage;
pub mod telemetry;

pub use address::Address;
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use packet::{LayerData, Packet, ProtocolTag};
pub use storage::{Call, DialogState, Message, Storage, Stream};
