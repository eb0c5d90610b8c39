//! Error types for the log storage engine.
//!
//! Recoverable conditions (`NoSavedLog`, `NoBootstrapInfo`, `Compacted`,
//! `Unavailable`) are returned and handled by the Raft layer. `Corruption`
//! is fatal by contract: a replica whose log cannot be decoded must not be
//! served, so the runtime is expected to abort it and recover from peers.

use snafu::Snafu;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the log storage engine.
#[derive(Debug, Snafu)]
pub enum Error {
    /// No max-index or state record exists for the replica.
    #[snafu(display("no saved log for replica ({cluster_id}, {node_id})"))]
    NoSavedLog {
        /// Cluster of the replica.
        cluster_id: u64,
        /// Node of the replica.
        node_id: u64,
    },

    /// No bootstrap record exists for the replica.
    #[snafu(display("no bootstrap info for replica ({cluster_id}, {node_id})"))]
    NoBootstrapInfo {
        /// Cluster of the replica.
        cluster_id: u64,
        /// Node of the replica.
        node_id: u64,
    },

    /// Entry iteration started below the available range.
    #[snafu(display("entries at index {index} have been compacted"))]
    Compacted {
        /// First requested index.
        index: u64,
    },

    /// Entry iteration requested indices beyond the durable log.
    #[snafu(display("entry index {index} is beyond the durable log (max {max_index})"))]
    Unavailable {
        /// Last requested index.
        index: u64,
        /// Highest durable index.
        max_index: u64,
    },

    /// A stored record could not be decoded, or an encoded record violated
    /// a structural invariant. Fatal: callers must abort the replica.
    #[snafu(display("log store corruption: {reason}"))]
    Corruption {
        /// What failed to decode or which invariant broke.
        reason: String,
    },

    /// Error from the underlying key-value store.
    #[snafu(display("key-value store error: {source}"))]
    Kv {
        /// The KV-layer error.
        source: logstead_kv::Error,
    },
}

impl Error {
    /// True for the "replica has no durable log yet" condition.
    pub fn is_no_saved_log(&self) -> bool {
        matches!(self, Error::NoSavedLog { .. })
    }

    /// Builds a corruption error from a decode failure or broken invariant.
    pub(crate) fn corruption(reason: impl std::fmt::Display) -> Self {
        Error::Corruption { reason: reason.to_string() }
    }

    /// Wraps a KV-layer error.
    pub(crate) fn kv(source: logstead_kv::Error) -> Self {
        Error::Kv { source }
    }
}
