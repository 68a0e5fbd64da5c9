//! Common types and utilities shared by the henyey ingestion crates.
//!
//! - [`Hash256`]: SHA-256 digests (transaction hashes, network ids, key hashes)
//! - [`NetworkId`]: network identity derived from a passphrase
//! - [`protocol`]: protocol version constants and gating predicates
//! - [`xdr_stream`]: size-prefixed XDR frame readers and writers, the format
//!   used for `LedgerCloseMeta` streams

pub mod error;
pub mod network;
pub mod protocol;
pub mod types;
pub mod xdr_stream;

pub use error::{Error, Result};
pub use network::NetworkId;
pub use protocol::ProtocolVersion;
pub use types::Hash256;

/// Re-export stellar-xdr for convenience
pub use stellar_xdr;
