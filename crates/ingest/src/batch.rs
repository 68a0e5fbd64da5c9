//! Batch driver: ledgers in, compacted change batches out.
//!
//! A ledger range is cut into consecutive non-overlapping windows of
//! `batch_size` ledgers. Every change of every ledger in a window goes
//! through one [`ChangeCompactor`] per tracked entry type; at the end of the
//! window the compactors are drained into a [`ChangeBatch`].
//!
//! ```text
//! [100, 109], batch_size 3  ->  [100,102] [103,105] [106,108] [109,109]
//! ```
//!
//! [`stream_changes`] runs the loop on a blocking task and hands batches to
//! the consumer over a single-slot channel. A failed ledger fetch or decode
//! fails the whole window: the error is the last item of the stream and no
//! partial batch is ever sent. The one short window is the last one of a
//! range read until the backend runs out of ledgers, which ends at the last
//! ledger actually read.

use std::collections::HashMap;

use henyey_common::NetworkId;
use stellar_xdr::curr::{LedgerCloseMeta, LedgerEntryType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{LedgerBackend, LedgerRange};
use crate::change::Change;
use crate::compactor::ChangeCompactor;
use crate::config::{entry_type_name, DEFAULT_BATCH_SIZE, ENTRY_TYPE_NAMES};
use crate::ledger::LedgerChangeReader;
use crate::{IngestError, Result};

/// What the driver extracts and how.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub network_id: NetworkId,
    pub batch_size: u32,
    /// Entry types to compact; changes to other types are skipped.
    pub entry_types: Vec<LedgerEntryType>,
}

impl BatchOptions {
    /// All entry types, default batch size.
    pub fn new(network_id: NetworkId) -> Self {
        Self {
            network_id,
            batch_size: DEFAULT_BATCH_SIZE,
            entry_types: ENTRY_TYPE_NAMES.iter().map(|(_, t)| *t).collect(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_entry_types(mut self, entry_types: Vec<LedgerEntryType>) -> Self {
        self.entry_types = entry_types;
        self
    }

    pub fn tracks(&self, entry_type: LedgerEntryType) -> bool {
        self.entry_types.contains(&entry_type)
    }
}

/// Net changes of one window of ledgers.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    /// Per tracked entry type, sorted by entry identity. Types without
    /// changes are present with an empty vector.
    pub changes: HashMap<LedgerEntryType, Vec<Change>>,
    pub batch_start: u32,
    pub batch_end: u32,
}

impl ChangeBatch {
    pub fn changes_of(&self, entry_type: LedgerEntryType) -> &[Change] {
        self.changes
            .get(&entry_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of changes across all entry types.
    pub fn len(&self) -> usize {
        self.changes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ledger_count(&self) -> u32 {
        self.batch_end - self.batch_start + 1
    }
}

/// Inclusive, non-overlapping windows covering `[start, end]`.
#[derive(Debug, Clone)]
pub struct BatchRanges {
    next: Option<u32>,
    end: u32,
    size: u32,
}

impl Iterator for BatchRanges {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<(u32, u32)> {
        let start = self.next?;
        let batch_end = start.saturating_add(self.size - 1).min(self.end);
        self.next = batch_end.checked_add(1).filter(|next| *next <= self.end);
        Some((start, batch_end))
    }
}

/// Cut `[start, end]` into windows of `size` ledgers; the last may be short.
///
/// # Errors
///
/// [`IngestError::InvalidRange`] if `start > end` or `size == 0`.
pub fn batch_ranges(start: u32, end: u32, size: u32) -> Result<BatchRanges> {
    validate_range(start, end)?;
    if size == 0 {
        return Err(IngestError::InvalidRange("batch size must be > 0".to_string()));
    }
    Ok(BatchRanges {
        next: Some(start),
        end,
        size,
    })
}

fn validate_range(start: u32, end: u32) -> Result<()> {
    if start > end {
        return Err(IngestError::InvalidRange(format!(
            "start ledger {} is after end ledger {}",
            start, end
        )));
    }
    Ok(())
}

/// Per-type compactors for one window of ledgers.
struct Window {
    start: u32,
    compactors: HashMap<LedgerEntryType, ChangeCompactor>,
    skipped: usize,
}

impl Window {
    fn new(start: u32, options: &BatchOptions) -> Self {
        Self {
            start,
            compactors: options
                .entry_types
                .iter()
                .map(|entry_type| (*entry_type, ChangeCompactor::new(*entry_type)))
                .collect(),
            skipped: 0,
        }
    }

    fn add_ledger(&mut self, meta: LedgerCloseMeta, options: &BatchOptions) -> Result<()> {
        let reader = LedgerChangeReader::new(meta, &options.network_id)?;
        let changes = reader.read_all()?;
        debug!(
            ledger_seq = reader.ledger().sequence(),
            tx_count = reader.transactions().len(),
            change_count = changes.len(),
            "Processed ledger"
        );

        for change in changes {
            match self.compactors.get_mut(&change.entry_type()) {
                Some(compactor) => compactor.add_change(change)?,
                None => self.skipped += 1,
            }
        }
        Ok(())
    }

    fn finish(self, end: u32) -> ChangeBatch {
        let start = self.start;
        if self.skipped > 0 {
            debug!(
                batch_start = start,
                batch_end = end,
                skipped = self.skipped,
                "Skipped changes to untracked entry types"
            );
        }

        let changes: HashMap<LedgerEntryType, Vec<Change>> = self
            .compactors
            .into_iter()
            .map(|(entry_type, mut compactor)| {
                let drained = compactor.drain_sorted();
                if !drained.is_empty() {
                    debug!(
                        entry_type = entry_type_name(entry_type),
                        count = drained.len(),
                        "Drained compactor"
                    );
                }
                (entry_type, drained)
            })
            .collect();

        let batch = ChangeBatch {
            changes,
            batch_start: start,
            batch_end: end,
        };
        info!(
            batch_start = start,
            batch_end = end,
            change_count = batch.len(),
            "Extracted change batch"
        );
        batch
    }
}

/// Extract and compact every change of the ledgers `[start, end]`.
///
/// Ledgers are fetched one at a time, in order. Any fetch or decode error
/// fails the whole batch.
pub fn extract_batch(
    backend: &mut dyn LedgerBackend,
    start: u32,
    end: u32,
    options: &BatchOptions,
) -> Result<ChangeBatch> {
    validate_range(start, end)?;

    let mut window = Window::new(start, options);
    for sequence in start..=end {
        window.add_ledger(backend.get_ledger(sequence)?, options)?;
    }
    Ok(window.finish(end))
}

/// How a window read by the stream producer ended.
enum WindowOutcome {
    Batch(ChangeBatch),
    /// An open-ended range ran out of ledgers before this window started.
    Exhausted,
    /// The consumer went away.
    Cancelled,
}

/// Producer side of [`stream_changes`]: one window, checking for a departed
/// consumer before every fetch.
///
/// With `open_ended`, running out of ledgers ends the stream: a window that
/// got at least one ledger is cut short at the last one read.
fn produce_window(
    backend: &mut dyn LedgerBackend,
    start: u32,
    end: u32,
    open_ended: bool,
    options: &BatchOptions,
    tx: &mpsc::Sender<Result<ChangeBatch>>,
) -> Result<WindowOutcome> {
    let mut window = Window::new(start, options);
    for sequence in start..=end {
        if tx.is_closed() {
            return Ok(WindowOutcome::Cancelled);
        }
        let meta = match backend.get_ledger(sequence) {
            Ok(meta) => meta,
            Err(IngestError::LedgerNotFound(missing)) if open_ended && missing == sequence => {
                debug!(ledger_seq = sequence, "Ledger source exhausted");
                if sequence == start {
                    return Ok(WindowOutcome::Exhausted);
                }
                return Ok(WindowOutcome::Batch(window.finish(sequence - 1)));
            }
            Err(e) => return Err(e),
        };
        window.add_ledger(meta, options)?;
    }
    Ok(WindowOutcome::Batch(window.finish(end)))
}

/// Consumer side of [`stream_changes`].
pub struct BatchStream {
    rx: mpsc::Receiver<Result<ChangeBatch>>,
    handle: JoinHandle<()>,
}

impl BatchStream {
    /// The next batch; `None` once the range is exhausted or after an error
    /// was delivered.
    pub async fn next(&mut self) -> Option<Result<ChangeBatch>> {
        self.rx.recv().await
    }

    /// Drain the stream, stopping at the first error.
    pub async fn try_collect(mut self) -> Result<Vec<ChangeBatch>> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next().await {
            batches.push(batch?);
        }
        Ok(batches)
    }

    /// Stop the producer and wait for it to exit.
    ///
    /// The producer notices before its next ledger fetch; the batch it was
    /// building and any batch not yet received are dropped.
    pub async fn abort(self) {
        drop(self.rx);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Change stream producer panicked");
        }
    }
}

/// Stream compacted batches over `range`.
///
/// An unbounded range ends at the backend's
/// [`latest_sequence`](LedgerBackend::latest_sequence) when the producer
/// starts. A backend without one, such as a meta stream, is read until it
/// runs out of ledgers; the last batch then ends at the last ledger read.
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// [`IngestError::InvalidRange`] for an empty bounded range or a zero batch
/// size. Errors found while producing are delivered through the stream.
pub fn stream_changes<B>(
    mut backend: B,
    range: LedgerRange,
    options: BatchOptions,
) -> Result<BatchStream>
where
    B: LedgerBackend + 'static,
{
    if let Some(end) = range.to() {
        batch_ranges(range.from(), end, options.batch_size)?;
    } else if options.batch_size == 0 {
        return Err(IngestError::InvalidRange("batch size must be > 0".to_string()));
    }

    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::task::spawn_blocking(move || {
        let ranges = backend
            .prepare_range(range)
            .and_then(|()| match range.to() {
                Some(end) => Ok(Some(end)),
                None => backend.latest_sequence(),
            })
            .and_then(|end| {
                let open_ended = end.is_none();
                batch_ranges(range.from(), end.unwrap_or(u32::MAX), options.batch_size)
                    .map(|ranges| (ranges, open_ended))
            });
        let (ranges, open_ended) = match ranges {
            Ok(ranges) => ranges,
            Err(e) => {
                warn!(error = %e, "Failed to prepare ledger range");
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };

        for (batch_start, batch_end) in ranges {
            let outcome =
                produce_window(&mut backend, batch_start, batch_end, open_ended, &options, &tx);
            let (result, last) = match outcome {
                Ok(WindowOutcome::Batch(batch)) => {
                    let last = open_ended && batch.batch_end < batch_end;
                    (Ok(batch), last)
                }
                Ok(WindowOutcome::Exhausted) => break,
                Ok(WindowOutcome::Cancelled) => {
                    debug!(batch_start, "Batch consumer went away");
                    return;
                }
                Err(e) => {
                    warn!(batch_start, batch_end, error = %e, "Batch extraction failed");
                    (Err(e), true)
                }
            };
            if tx.blocking_send(result).is_err() {
                debug!(batch_start, "Batch consumer went away");
                return;
            }
            if last {
                break;
            }
        }
        debug!("Change stream complete");
    });

    Ok(BatchStream { rx, handle })
}
