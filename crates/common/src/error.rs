//! Common error type for the henyey ingestion crates.
//!
//! Crate-specific errors (for example `henyey_ingest::IngestError`) wrap this
//! type when a failure comes from a shared utility.

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared utilities.
#[derive(Error, Debug)]
pub enum Error {
    /// XDR encoding/decoding error.
    #[error("XDR error: {0}")]
    Xdr(#[from] stellar_xdr::curr::Error),

    /// I/O error from a file, pipe or in-memory stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input, such as a frame too large to encode.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}
