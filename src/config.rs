//! Run configuration.
//!
//! Parsing command-line flags or config files is explicitly out of scope
//! (spec.md Non-goals); this struct is the landing spot a CLI or embedder
//! fills in before constructing an [`crate::engine::Engine`].

use std::path::PathBuf;

/// Settings that shape how the dissector chain and storage behave for a run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to a PEM-encoded RSA private key used for passive TLS decryption.
    /// `None` disables the TLS dissector's decryption path entirely; TLS
    /// records are still recognized and counted, just not decrypted.
    pub tls_key_file: Option<PathBuf>,

    /// Only attempt decryption for TLS sessions whose server port matches
    /// this filter. `None` means "try every TLS session".
    pub tls_server_port: Option<u16>,

    /// Maximum number of concurrent [`crate::storage::call::Call`] entries
    /// tracked before the oldest completed call is evicted.
    pub call_table_capacity: usize,

    /// BPF filter applied at the capture layer, if any.
    pub bpf_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tls_key_file: None,
            tls_server_port: None,
            call_table_capacity: 4096,
            bpf_filter: None,
        }
    }
}
