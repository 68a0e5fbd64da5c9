//! Before/after change records and the raw change-log decoder.
//!
//! stellar-core records entry mutations as an append-only log of
//! `LedgerEntryChange` records. Every `Updated` or `Removed` record is
//! immediately preceded by a `State` record holding the pre-image, while
//! `Created` records stand alone:
//!
//! ```text
//! [Created(A)]                 -> Change { pre: None,    post: Some(A)  }
//! [State(B), Updated(B')]      -> Change { pre: Some(B), post: Some(B') }
//! [State(C), Removed(key(C))]  -> Change { pre: Some(C), post: None     }
//! ```
//!
//! [`decode_changes`] turns such a log into [`Change`] values and
//! [`sort_changes`] puts a group of them into the canonical order (ascending
//! [`EntryIdentity`] bytes, stable for equal keys).
//!
//! # Invariants
//!
//! [`EntryDelta`] makes the "pre and post are never both absent" rule a
//! property of the type. Attribution lives in [`ChangeCause`], so an operation
//! index only exists on operation changes and a ledger reference only exists
//! on upgrade and eviction changes.

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use stellar_xdr::curr::{
    LedgerCloseMeta, LedgerEntry, LedgerEntryChange, LedgerEntryChangeType, LedgerEntryChanges,
    LedgerEntryType, LedgerKey, LedgerUpgrade, Limits, ReadXdr, WriteXdr,
};

use crate::identity::EntryIdentity;
use crate::ledger::{ledger_close_time, ledger_sequence};
use crate::transaction::LedgerTransaction;
use crate::{IngestError, Result};

/// The before/after pair of one change.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryDelta {
    /// The entry did not exist before.
    Created(LedgerEntry),
    /// The entry existed before and after.
    Updated {
        pre: LedgerEntry,
        post: Box<LedgerEntry>,
    },
    /// The entry existed before and is gone after.
    Removed(LedgerEntry),
}

impl EntryDelta {
    /// Build a delta from optional halves. `(None, None)` has no delta.
    pub fn from_parts(pre: Option<LedgerEntry>, post: Option<LedgerEntry>) -> Option<Self> {
        match (pre, post) {
            (None, Some(post)) => Some(EntryDelta::Created(post)),
            (Some(pre), Some(post)) => Some(EntryDelta::Updated {
                pre,
                post: Box::new(post),
            }),
            (Some(pre), None) => Some(EntryDelta::Removed(pre)),
            (None, None) => None,
        }
    }

    pub fn into_parts(self) -> (Option<LedgerEntry>, Option<LedgerEntry>) {
        match self {
            EntryDelta::Created(post) => (None, Some(post)),
            EntryDelta::Updated { pre, post } => (Some(pre), Some(*post)),
            EntryDelta::Removed(pre) => (Some(pre), None),
        }
    }

    pub fn pre(&self) -> Option<&LedgerEntry> {
        match self {
            EntryDelta::Created(_) => None,
            EntryDelta::Updated { pre, .. } | EntryDelta::Removed(pre) => Some(pre),
        }
    }

    pub fn post(&self) -> Option<&LedgerEntry> {
        match self {
            EntryDelta::Created(post) => Some(post),
            EntryDelta::Updated { post, .. } => Some(post.as_ref()),
            EntryDelta::Removed(_) => None,
        }
    }

    pub fn change_type(&self) -> LedgerEntryChangeType {
        match self {
            EntryDelta::Created(_) => LedgerEntryChangeType::Created,
            EntryDelta::Updated { .. } => LedgerEntryChangeType::Updated,
            EntryDelta::Removed(_) => LedgerEntryChangeType::Removed,
        }
    }

    /// The latest known state: post if present, otherwise the removed pre.
    fn latest(&self) -> &LedgerEntry {
        match self {
            EntryDelta::Created(post) => post,
            EntryDelta::Updated { post, .. } => post,
            EntryDelta::Removed(pre) => pre,
        }
    }
}

/// Why a change happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeReason {
    /// Not yet attributed (fresh out of the decoder).
    Unknown,
    Operation,
    Transaction,
    Fee,
    Upgrade,
    Eviction,
}

/// Attribution of a change to what caused it.
#[derive(Debug, Clone)]
pub enum ChangeCause {
    Unattributed,
    /// Operation `index` (0-based) of `transaction`.
    Operation {
        transaction: Arc<LedgerTransaction>,
        index: u32,
    },
    /// The transaction as a whole (sequence bump, signer cleanup, ...).
    Transaction { transaction: Arc<LedgerTransaction> },
    /// Fee charge or refund of `transaction`.
    Fee { transaction: Arc<LedgerTransaction> },
    /// A ledger upgrade applied while closing `ledger`.
    Upgrade {
        ledger: Arc<LedgerCloseMeta>,
        upgrade: Arc<LedgerUpgrade>,
    },
    /// A Soroban entry evicted while closing `ledger`.
    Eviction { ledger: Arc<LedgerCloseMeta> },
}

impl ChangeCause {
    pub fn reason(&self) -> ChangeReason {
        match self {
            ChangeCause::Unattributed => ChangeReason::Unknown,
            ChangeCause::Operation { .. } => ChangeReason::Operation,
            ChangeCause::Transaction { .. } => ChangeReason::Transaction,
            ChangeCause::Fee { .. } => ChangeReason::Fee,
            ChangeCause::Upgrade { .. } => ChangeReason::Upgrade,
            ChangeCause::Eviction { .. } => ChangeReason::Eviction,
        }
    }
}

/// A change to one ledger entry with its causal attribution.
///
/// The entry identity is computed once at construction and reused for
/// sorting and compaction.
#[derive(Debug, Clone)]
pub struct Change {
    entry_type: LedgerEntryType,
    identity: EntryIdentity,
    delta: EntryDelta,
    cause: ChangeCause,
}

impl Change {
    /// Create a change.
    ///
    /// For updates, the pre and post images must describe the same entry.
    pub fn new(delta: EntryDelta, cause: ChangeCause) -> Result<Self> {
        let identity = EntryIdentity::from_entry(delta.latest())?;
        if let EntryDelta::Updated { pre, .. } = &delta {
            if EntryIdentity::from_entry(pre)? != identity {
                return Err(IngestError::MalformedChangeLog(format!(
                    "updated entry {:?} does not match its state record",
                    identity
                )));
            }
        }
        Ok(Self {
            entry_type: delta.latest().data.discriminant(),
            identity,
            delta,
            cause,
        })
    }

    /// Replace the attribution.
    pub fn with_cause(mut self, cause: ChangeCause) -> Self {
        self.cause = cause;
        self
    }

    pub fn entry_type(&self) -> LedgerEntryType {
        self.entry_type
    }

    pub fn identity(&self) -> &EntryIdentity {
        &self.identity
    }

    pub fn delta(&self) -> &EntryDelta {
        &self.delta
    }

    pub fn into_delta(self) -> EntryDelta {
        self.delta
    }

    /// The entry before the change.
    ///
    /// For an eviction this is a key-only placeholder: the key fields are
    /// real, every other field is zero. A window in which an entry is
    /// evicted and then restored nets to an update whose pre-image is that
    /// placeholder.
    pub fn pre(&self) -> Option<&LedgerEntry> {
        self.delta.pre()
    }

    pub fn post(&self) -> Option<&LedgerEntry> {
        self.delta.post()
    }

    pub fn cause(&self) -> &ChangeCause {
        &self.cause
    }

    pub fn reason(&self) -> ChangeReason {
        self.cause.reason()
    }

    /// Index of the causing operation, for operation changes only.
    pub fn operation_index(&self) -> Option<u32> {
        match &self.cause {
            ChangeCause::Operation { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// The causing transaction, for operation, transaction and fee changes.
    pub fn transaction(&self) -> Option<&Arc<LedgerTransaction>> {
        match &self.cause {
            ChangeCause::Operation { transaction, .. }
            | ChangeCause::Transaction { transaction }
            | ChangeCause::Fee { transaction } => Some(transaction),
            _ => None,
        }
    }

    /// The closing ledger, for upgrade and eviction changes.
    pub fn ledger(&self) -> Option<&Arc<LedgerCloseMeta>> {
        match &self.cause {
            ChangeCause::Upgrade { ledger, .. } | ChangeCause::Eviction { ledger } => Some(ledger),
            _ => None,
        }
    }

    pub fn upgrade(&self) -> Option<&Arc<LedgerUpgrade>> {
        match &self.cause {
            ChangeCause::Upgrade { upgrade, .. } => Some(upgrade),
            _ => None,
        }
    }

    pub fn change_type(&self) -> LedgerEntryChangeType {
        self.delta.change_type()
    }

    /// The entry a consumer should look at: post for created/updated, pre for
    /// removed.
    pub fn entry(&self) -> &LedgerEntry {
        self.delta.latest()
    }

    pub fn deleted(&self) -> bool {
        matches!(self.delta, EntryDelta::Removed(_))
    }

    pub fn last_modified_ledger(&self) -> u32 {
        self.entry().last_modified_ledger_seq
    }

    pub fn ledger_key(&self) -> Result<LedgerKey> {
        self.identity.to_key()
    }

    /// Sequence of the ledger the change was observed in, if attributed.
    pub fn ledger_sequence(&self) -> Option<u32> {
        if let Some(tx) = self.transaction() {
            return Some(tx.ledger_sequence());
        }
        self.ledger().map(|ledger| ledger_sequence(ledger))
    }

    /// Close time (unix seconds) of the ledger the change was observed in.
    pub fn closed_at(&self) -> Option<u64> {
        if let Some(tx) = self.transaction() {
            return Some(ledger_close_time(tx.ledger()));
        }
        self.ledger().map(|ledger| ledger_close_time(ledger))
    }

    /// Fold a later change to the same entry into this one.
    ///
    /// The result keeps this change's pre-image and the later change's
    /// post-image and cause. Returns `None` when both halves are absent,
    /// i.e. the entry was created and removed in between.
    pub fn absorb(self, later: Change) -> Option<Change> {
        debug_assert_eq!(self.identity, later.identity);
        let (pre, _) = self.delta.into_parts();
        let (_, post) = later.delta.into_parts();
        EntryDelta::from_parts(pre, post).map(|delta| Change {
            entry_type: self.entry_type,
            identity: self.identity,
            delta,
            cause: later.cause,
        })
    }
}

impl fmt::Display for Change {
    /// Best effort: an image that fails to encode is left empty.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encode = |entry: Option<&LedgerEntry>| {
            entry
                .and_then(|e| e.to_xdr(Limits::none()).ok())
                .map(|bytes| STANDARD.encode(bytes))
                .unwrap_or_default()
        };
        write!(
            f,
            "Change{{Type: {:?}, Pre: {}, Post: {}}}",
            self.entry_type,
            encode(self.pre()),
            encode(self.post())
        )
    }
}

/// Decode a raw change log into unattributed changes, in log order.
///
/// `State` records only supply the pre-image of the next record. `Restored`
/// records (entries brought back from the archive) surface like creations.
///
/// # Errors
///
/// [`IngestError::MalformedChangeLog`] if an `Updated`/`Removed` record is
/// not immediately preceded by a `State` record for the same entry.
pub fn decode_changes(records: &[LedgerEntryChange]) -> Result<Vec<Change>> {
    let mut changes = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let delta = match record {
            LedgerEntryChange::State(_) => continue,
            LedgerEntryChange::Created(entry) | LedgerEntryChange::Restored(entry) => {
                EntryDelta::Created(entry.clone())
            }
            LedgerEntryChange::Updated(entry) => EntryDelta::Updated {
                pre: preceding_state(records, i)?.clone(),
                post: Box::new(entry.clone()),
            },
            LedgerEntryChange::Removed(key) => {
                let pre = preceding_state(records, i)?;
                if EntryIdentity::from_key(key)? != EntryIdentity::from_entry(pre)? {
                    return Err(IngestError::MalformedChangeLog(format!(
                        "removed record {} does not match its state record",
                        i
                    )));
                }
                EntryDelta::Removed(pre.clone())
            }
        };
        changes.push(Change::new(delta, ChangeCause::Unattributed)?);
    }
    Ok(changes)
}

fn preceding_state(records: &[LedgerEntryChange], i: usize) -> Result<&LedgerEntry> {
    match i.checked_sub(1).map(|prev| &records[prev]) {
        Some(LedgerEntryChange::State(state)) => Ok(state),
        Some(other) => Err(IngestError::MalformedChangeLog(format!(
            "record {} ({:?}) is preceded by {:?} instead of a state record",
            i,
            records[i].discriminant(),
            other.discriminant()
        ))),
        None => Err(IngestError::MalformedChangeLog(format!(
            "record {} ({:?}) has no preceding state record",
            i,
            records[i].discriminant()
        ))),
    }
}

/// Decode an XDR-encoded `LedgerEntryChanges` blob.
///
/// Codec failures (including unknown record tags) are reported as
/// [`IngestError::MalformedChangeLog`].
pub fn decode_xdr(bytes: &[u8]) -> Result<Vec<Change>> {
    let records = LedgerEntryChanges::from_xdr(bytes, Limits::none())
        .map_err(|e| IngestError::MalformedChangeLog(format!("undecodable change log: {}", e)))?;
    decode_changes(&records.0)
}

/// Sort changes by ascending entry identity.
///
/// The sort is stable: changes with equal identities keep their relative
/// order.
pub fn sort_changes(changes: &mut [Change]) {
    changes.sort_by(|a, b| a.identity.cmp(&b.identity));
}

/// Decode a raw log, attribute every change to `cause`, and sort.
pub(crate) fn decode_group(records: &LedgerEntryChanges, cause: &ChangeCause) -> Result<Vec<Change>> {
    let mut changes: Vec<Change> = decode_changes(&records.0)?
        .into_iter()
        .map(|change| change.with_cause(cause.clone()))
        .collect();
    sort_changes(&mut changes);
    Ok(changes)
}
