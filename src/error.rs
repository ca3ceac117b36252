//! Crate-wide error taxonomy.
//!
//! Kinds mirror the propagation policy of the dissection pipeline: transient
//! per-packet errors (`Parse`, `Session`, `Crypto`) are caught at the
//! dissector-chain boundary and never escape [`crate::engine::Engine::step`];
//! only `Input` (capture open/read) and keyfile validation failures are
//! fatal and surface to the caller.

use std::io;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum, grouped by the taxonomy in the design doc.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Capture open/read failure. Fatal at startup; offline EOF is not an error.
    #[error("capture input error: {0}")]
    Input(#[from] InputError),

    /// Malformed packet at some layer. The offending layer is dropped; lower
    /// layers already parsed remain attached to the packet.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Stateful-session failure (TCP reassembly, TLS handshake). The session
    /// is destroyed silently; a later packet on the same flow starts fresh.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Cryptographic failure. Decryption is disabled for the affected
    /// session; plaintext dissection elsewhere continues.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Call-table overflow. LRU eviction proceeds; never surfaced to callers
    /// other than via telemetry.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Capture input failures (spec.md S4.1).
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("failed to open capture source: {0}")]
    OpenFailed(String),

    #[error("invalid BPF filter: {0}")]
    FilterInvalid(String),

    #[error("truncated frame: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Not a real failure: clean end of an offline capture file.
    #[error("end of capture file")]
    Eof,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("pcap error: {0}")]
    Pcap(String),
}

/// Per-layer parse failures.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{layer}: truncated, expected at least {expected} bytes, got {actual}")]
    Truncated {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{layer}: malformed header: {reason}")]
    Malformed {
        layer: &'static str,
        reason: String,
    },

    #[error("unsupported {layer} value: {value}")]
    Unsupported { layer: &'static str, value: String },
}

/// Stateful session failures (TCP reassembly, TLS handshake).
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("tcp reassembly gap exhausted for flow")]
    ReassemblyExhausted,

    #[error("unsupported TLS cipher suite: {0:#06x}")]
    UnsupportedCipherSuite(u16),

    #[error("unsupported TLS version: {major}.{minor}")]
    UnsupportedTlsVersion { major: u8, minor: u8 },

    #[error("PRF computation failed: {0}")]
    PrfFailed(String),

    #[error("handshake out of order: {0}")]
    HandshakeOutOfOrder(&'static str),
}

/// Cryptographic failures.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("RSA PKCS#1 v1.5 unpadding failed")]
    UnpadFailed,

    #[error("cipher initialization failed: {0}")]
    CipherInit(String),

    #[error("record decryption failed: {0}")]
    DecryptFailed(String),
}

/// Errors from `validate_keyfile` (spec.md S6), kept distinct because they
/// are a fatal startup check rather than a per-packet `CryptoError`.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum KeyfileError {
    #[error("keyfile not readable: {0}")]
    NotReadable(String),

    #[error("keyfile is empty")]
    Empty,

    #[error("key backend initialization failed")]
    InitFailed,

    #[error("failed to load key: {0}")]
    LoadFailed(String),

    #[error("key is not an RSA key")]
    NotRSA,
}

/// Call-table capacity failures.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("call table full: capacity {capacity} reached")]
    CallTableFull { capacity: usize },
}

impl From<pcap::Error> for InputError {
    fn from(e: pcap::Error) -> Self {
        match e {
            pcap::Error::NoMorePackets => InputError::Eof,
            other => InputError::Pcap(other.to_string()),
        }
    }
}

impl From<pcap::Error> for Error {
    fn from(e: pcap::Error) -> Self {
        Error::Input(InputError::from(e))
    }
}
