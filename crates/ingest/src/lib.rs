//! Ledger entry change extraction and compaction for henyey.
//!
//! This crate turns the metadata stellar-core emits when it closes a ledger
//! (`LedgerCloseMeta`) into a stream of before/after changes to individual
//! ledger entries, and folds those changes into net changes over a window of
//! ledgers.
//!
//! # Pipeline
//!
//! ```text
//! LedgerBackend ──> LedgerChangeReader ──> ChangeCompactor (per entry type) ──> ChangeBatch
//!                     │
//!                     ├─ LedgerTransaction::assemble   (fee, tx, ops, tx)
//!                     ├─ evictions
//!                     └─ upgrades
//! ```
//!
//! - [`decode_changes`] pairs the raw `State`/`Updated`/`Removed` records of
//!   a change log into [`Change`] values.
//! - [`sort_changes`] orders a group of changes by [`EntryIdentity`], the XDR
//!   bytes of the entry's ledger key.
//! - [`LedgerTransaction`] walks one transaction's versioned meta and
//!   attributes each change to its fee, the transaction, or an operation.
//! - [`LedgerChangeReader`] yields every change of a closed ledger in apply
//!   order.
//! - [`ChangeCompactor`] keeps the earliest pre-image and the latest
//!   post-image per entry.
//! - [`extract_batch`] and [`stream_changes`] drive the above over a ledger
//!   range in non-overlapping batches.
//!
//! # Example
//!
//! ```no_run
//! use henyey_common::NetworkId;
//! use henyey_ingest::{extract_batch, BatchOptions, MemoryBackend};
//!
//! # fn example(mut backend: MemoryBackend) -> henyey_ingest::Result<()> {
//! let options = BatchOptions::new(NetworkId::testnet()).with_batch_size(16);
//! let batch = extract_batch(&mut backend, 100, 115, &options)?;
//! for (entry_type, changes) in &batch.changes {
//!     println!("{:?}: {} net changes", entry_type, changes.len());
//! }
//! # Ok(())
//! # }
//! ```

mod backend;
mod batch;
mod change;
mod compactor;
pub mod config;
mod error;
mod identity;
mod ledger;
pub mod logging;
mod transaction;

#[cfg(test)]
mod test_utils;

pub use backend::{LedgerBackend, LedgerRange, MemoryBackend, XdrStreamBackend};
pub use batch::{
    batch_ranges, extract_batch, stream_changes, BatchOptions, BatchRanges, BatchStream,
    ChangeBatch,
};
pub use change::{
    decode_changes, decode_xdr, sort_changes, Change, ChangeCause, ChangeReason, EntryDelta,
};
pub use compactor::ChangeCompactor;
pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use identity::{entry_to_key, key_entry_type, stub_entry_for_key, EntryIdentity};
pub use ledger::{
    evicted_keys, ledger_close_time, ledger_header, ledger_protocol_version, ledger_sequence,
    transaction_envelopes, transaction_hash, upgrade_metas, LedgerChangeReader, LedgerView,
};
pub use transaction::{LedgerTransaction, TransactionMetaView};
