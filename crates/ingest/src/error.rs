//! Error types for change extraction.

use stellar_xdr::curr::LedgerEntryType;
use thiserror::Error;

/// Errors that can occur while extracting, assembling or compacting changes.
///
/// Decoding and assembly errors abort the enclosing transaction or ledger;
/// they are never turned into an empty change set.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A raw change log violates the `State` pairing rule, or could not be
    /// decoded at all.
    #[error("malformed change log: {0}")]
    MalformedChangeLog(String),

    /// Transaction meta encoding outside the supported set.
    #[error("unsupported TransactionMeta version {0}")]
    UnsupportedMetaVersion(i32),

    /// A change was fed to a compactor configured for another entry type.
    #[error("entry type mismatch: compactor handles {expected:?}, got {actual:?}")]
    TypeMismatch {
        expected: LedgerEntryType,
        actual: LedgerEntryType,
    },

    /// A processed transaction has no matching envelope in the ledger's set.
    #[error("ledger {ledger_seq}: no envelope for transaction {tx_hash}")]
    MissingEnvelope { ledger_seq: u32, tx_hash: String },

    /// An evicted key of a type that cannot be evicted.
    #[error("cannot build eviction change for {0:?} key")]
    UnsupportedEvictionKey(LedgerEntryType),

    /// The backend has no ledger with this sequence.
    #[error("ledger {0} not found")]
    LedgerNotFound(u32),

    /// The backend failed to supply a ledger.
    #[error("ledger backend error at {sequence}: {message}")]
    Backend { sequence: u32, message: String },

    /// Invalid ledger range or batch size.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// XDR serialization error.
    #[error("XDR error: {0}")]
    Xdr(#[from] stellar_xdr::curr::Error),

    /// Error from a shared utility, such as opening a meta stream.
    #[error(transparent)]
    Common(#[from] henyey_common::Error),
}

/// Result type for change extraction.
pub type Result<T> = std::result::Result<T, IngestError>;
