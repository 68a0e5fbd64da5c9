//! Sources of `LedgerCloseMeta`.
//!
//! The batch driver pulls one ledger at a time through [`LedgerBackend`].
//! Prefetching, retries and storage are the backend's business.

use std::collections::BTreeMap;
use std::path::Path;

use henyey_common::xdr_stream::XdrInputStream;
use stellar_xdr::curr::LedgerCloseMeta;
use tracing::{debug, info};

use crate::ledger::ledger_sequence;
use crate::{IngestError, Result};

/// Ledgers a caller is about to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerRange {
    /// `from..=to`.
    Bounded { from: u32, to: u32 },
    /// `from` onwards.
    Unbounded { from: u32 },
}

impl LedgerRange {
    pub fn bounded(from: u32, to: u32) -> Self {
        LedgerRange::Bounded { from, to }
    }

    pub fn unbounded(from: u32) -> Self {
        LedgerRange::Unbounded { from }
    }

    pub fn from(&self) -> u32 {
        match *self {
            LedgerRange::Bounded { from, .. } | LedgerRange::Unbounded { from } => from,
        }
    }

    pub fn to(&self) -> Option<u32> {
        match *self {
            LedgerRange::Bounded { to, .. } => Some(to),
            LedgerRange::Unbounded { .. } => None,
        }
    }

    pub fn contains(&self, sequence: u32) -> bool {
        sequence >= self.from() && self.to().map_or(true, |to| sequence <= to)
    }
}

/// A source of closed ledgers, read one sequence number at a time.
pub trait LedgerBackend: Send {
    /// Announce the range that will be read. Backends may start fetching.
    fn prepare_range(&mut self, range: LedgerRange) -> Result<()>;

    /// The ledger with this sequence number.
    fn get_ledger(&mut self, sequence: u32) -> Result<LedgerCloseMeta>;

    /// Highest sequence number currently available, or `None` when the
    /// backend can only find out by reading on (a stream). The batch driver
    /// reads an unbounded range up to this ledger, or until the backend runs
    /// out of ledgers when it is `None`.
    fn latest_sequence(&mut self) -> Result<Option<u32>>;
}

/// Ledgers held in memory, keyed by sequence.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    ledgers: BTreeMap<u32, LedgerCloseMeta>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, meta: LedgerCloseMeta) {
        self.ledgers.insert(ledger_sequence(&meta), meta);
    }

    pub fn len(&self) -> usize {
        self.ledgers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }
}

impl FromIterator<LedgerCloseMeta> for MemoryBackend {
    fn from_iter<I: IntoIterator<Item = LedgerCloseMeta>>(iter: I) -> Self {
        let mut backend = MemoryBackend::new();
        for meta in iter {
            backend.insert(meta);
        }
        backend
    }
}

impl LedgerBackend for MemoryBackend {
    fn prepare_range(&mut self, range: LedgerRange) -> Result<()> {
        if !self.ledgers.contains_key(&range.from()) {
            return Err(IngestError::LedgerNotFound(range.from()));
        }
        Ok(())
    }

    fn get_ledger(&mut self, sequence: u32) -> Result<LedgerCloseMeta> {
        self.ledgers
            .get(&sequence)
            .cloned()
            .ok_or(IngestError::LedgerNotFound(sequence))
    }

    fn latest_sequence(&mut self) -> Result<Option<u32>> {
        Ok(self.ledgers.keys().next_back().copied())
    }
}

/// Ledgers read from a size-prefixed `LedgerCloseMeta` stream, such as the
/// file or pipe a node's metadata output stream writes.
///
/// The stream is consumed front to back: ledgers before the requested one are
/// skipped and a sequence behind the cursor cannot be served again.
pub struct XdrStreamBackend {
    input: XdrInputStream,
    /// Last ledger read from the stream.
    last: Option<LedgerCloseMeta>,
}

impl XdrStreamBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening ledger meta stream");
        Ok(Self::new(XdrInputStream::open(path)?))
    }

    pub fn new(input: XdrInputStream) -> Self {
        Self { input, last: None }
    }

    fn last_sequence(&self) -> Option<u32> {
        self.last.as_ref().map(ledger_sequence)
    }

    /// Read the next frame. `None` at end of stream; the cursor stays put.
    fn advance(&mut self) -> Result<Option<u32>> {
        let next: Option<LedgerCloseMeta> =
            self.input.read_one().map_err(|e| IngestError::Backend {
                sequence: self.last_sequence().map_or(0, |seq| seq.saturating_add(1)),
                message: e.to_string(),
            })?;
        Ok(next.map(|meta| {
            let sequence = ledger_sequence(&meta);
            self.last = Some(meta);
            sequence
        }))
    }
}

impl LedgerBackend for XdrStreamBackend {
    fn prepare_range(&mut self, range: LedgerRange) -> Result<()> {
        debug!(from = range.from(), to = ?range.to(), "Preparing meta stream range");
        if let Some(last) = self.last_sequence() {
            if range.from() < last {
                return Err(IngestError::Backend {
                    sequence: range.from(),
                    message: format!("stream is already at ledger {}", last),
                });
            }
        }
        Ok(())
    }

    fn get_ledger(&mut self, sequence: u32) -> Result<LedgerCloseMeta> {
        loop {
            if let Some(meta) = &self.last {
                let last = ledger_sequence(meta);
                if last == sequence {
                    return Ok(meta.clone());
                }
                if last > sequence {
                    return Err(IngestError::Backend {
                        sequence,
                        message: format!("stream is already at ledger {}", last),
                    });
                }
            }
            if self.advance()?.is_none() {
                return Err(IngestError::LedgerNotFound(sequence));
            }
        }
    }

    /// Always `None`: the end of a stream is only known once it is reached.
    fn latest_sequence(&mut self) -> Result<Option<u32>> {
        Ok(None)
    }
}
