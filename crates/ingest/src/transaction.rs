//! A processed transaction and the walk over its version-tagged meta.
//!
//! [`LedgerTransaction::assemble`] produces every change a transaction made,
//! grouped and ordered as follows. Each group is decoded and sorted on its
//! own; the concatenation is not re-sorted.
//!
//! 1. fee changes (`Fee`)
//! 2. changes before the operations (`Transaction`)
//! 3. each operation's changes in operation order (`Operation`, with index)
//! 4. changes after the operations (`Transaction`)
//!
//! A transaction that failed with `txINTERNAL_ERROR` in a ledger at or below
//! protocol 12 stops after group 2: the operation and after-operation logs of
//! those transactions never reached the ledger.

use std::sync::Arc;

use henyey_common::protocol::drops_internal_error_operation_meta;
use henyey_common::Hash256;
use stellar_xdr::curr::{
    LedgerCloseMeta, LedgerEntryChanges, TransactionEnvelope, TransactionMeta, TransactionMetaV1,
    TransactionMetaV2, TransactionMetaV3, TransactionMetaV4, TransactionResultPair,
    TransactionResultResult,
};
use tracing::trace;

use crate::change::{decode_group, Change, ChangeCause};
use crate::ledger::ledger_sequence;
use crate::{IngestError, Result};

/// Borrowed view of the supported `TransactionMeta` layouts.
///
/// The layouts differ only in which logs exist: V1 has a single
/// before-operations log and no after-operations log, V2 and later have both,
/// and V4 wraps each operation's changes together with its events.
#[derive(Debug, Clone, Copy)]
pub enum TransactionMetaView<'a> {
    V1(&'a TransactionMetaV1),
    V2(&'a TransactionMetaV2),
    V3(&'a TransactionMetaV3),
    V4(&'a TransactionMetaV4),
}

impl<'a> TransactionMetaView<'a> {
    /// Dispatch on the meta version.
    ///
    /// # Errors
    ///
    /// [`IngestError::UnsupportedMetaVersion`] for `TransactionMeta::V0`,
    /// which carries no transaction-level logs.
    pub fn new(meta: &'a TransactionMeta) -> Result<Self> {
        match meta {
            TransactionMeta::V0(_) => Err(IngestError::UnsupportedMetaVersion(0)),
            TransactionMeta::V1(v1) => Ok(TransactionMetaView::V1(v1)),
            TransactionMeta::V2(v2) => Ok(TransactionMetaView::V2(v2)),
            TransactionMeta::V3(v3) => Ok(TransactionMetaView::V3(v3)),
            TransactionMeta::V4(v4) => Ok(TransactionMetaView::V4(v4)),
        }
    }

    pub fn version(&self) -> i32 {
        match self {
            TransactionMetaView::V1(_) => 1,
            TransactionMetaView::V2(_) => 2,
            TransactionMetaView::V3(_) => 3,
            TransactionMetaView::V4(_) => 4,
        }
    }

    pub fn changes_before(&self) -> &'a LedgerEntryChanges {
        match *self {
            TransactionMetaView::V1(v1) => &v1.tx_changes,
            TransactionMetaView::V2(v2) => &v2.tx_changes_before,
            TransactionMetaView::V3(v3) => &v3.tx_changes_before,
            TransactionMetaView::V4(v4) => &v4.tx_changes_before,
        }
    }

    /// `None` for V1, which has no after-operations log.
    pub fn changes_after(&self) -> Option<&'a LedgerEntryChanges> {
        match *self {
            TransactionMetaView::V1(_) => None,
            TransactionMetaView::V2(v2) => Some(&v2.tx_changes_after),
            TransactionMetaView::V3(v3) => Some(&v3.tx_changes_after),
            TransactionMetaView::V4(v4) => Some(&v4.tx_changes_after),
        }
    }

    pub fn operation_count(&self) -> usize {
        match *self {
            TransactionMetaView::V1(v1) => v1.operations.len(),
            TransactionMetaView::V2(v2) => v2.operations.len(),
            TransactionMetaView::V3(v3) => v3.operations.len(),
            TransactionMetaView::V4(v4) => v4.operations.len(),
        }
    }

    pub fn operation_changes(&self, index: usize) -> Option<&'a LedgerEntryChanges> {
        match *self {
            TransactionMetaView::V1(v1) => v1.operations.get(index).map(|op| &op.changes),
            TransactionMetaView::V2(v2) => v2.operations.get(index).map(|op| &op.changes),
            TransactionMetaView::V3(v3) => v3.operations.get(index).map(|op| &op.changes),
            TransactionMetaView::V4(v4) => v4.operations.get(index).map(|op| &op.changes),
        }
    }
}

/// One transaction as processed in a closed ledger.
///
/// Changes attributed to a transaction hold an `Arc` to it, so the meta
/// methods take `self: &Arc<Self>`.
#[derive(Debug, Clone)]
pub struct LedgerTransaction {
    /// 1-based position in apply order.
    pub index: u32,
    pub envelope: TransactionEnvelope,
    pub result: TransactionResultPair,
    pub fee_changes: LedgerEntryChanges,
    /// Refunds applied after every transaction in the ledger (protocol 23+).
    pub post_apply_fee_changes: LedgerEntryChanges,
    pub meta: TransactionMeta,
    /// Protocol version of the enclosing ledger.
    pub ledger_version: u32,
    pub ledger: Arc<LedgerCloseMeta>,
    pub hash: Hash256,
}

impl LedgerTransaction {
    pub fn ledger(&self) -> &LedgerCloseMeta {
        &self.ledger
    }

    pub fn ledger_sequence(&self) -> u32 {
        ledger_sequence(&self.ledger)
    }

    pub fn successful(&self) -> bool {
        matches!(
            self.result.result.result,
            TransactionResultResult::TxSuccess(_) | TransactionResultResult::TxFeeBumpInnerSuccess(_)
        )
    }

    pub fn internal_error(&self) -> bool {
        matches!(
            self.result.result.result,
            TransactionResultResult::TxInternalError
        )
    }

    /// Whether this transaction's operation and after-operation logs are
    /// ignored.
    pub fn drops_operation_meta(&self) -> bool {
        self.internal_error() && drops_internal_error_operation_meta(self.ledger_version)
    }

    pub fn operation_count(&self) -> Result<usize> {
        Ok(TransactionMetaView::new(&self.meta)?.operation_count())
    }

    /// Fee changes, sorted, attributed to this transaction.
    pub fn fee_changes(self: &Arc<Self>) -> Result<Vec<Change>> {
        decode_group(&self.fee_changes, &self.fee_cause())
    }

    /// Post-apply fee changes (refunds), sorted, attributed as fee changes.
    pub fn post_apply_fee_changes(self: &Arc<Self>) -> Result<Vec<Change>> {
        decode_group(&self.post_apply_fee_changes, &self.fee_cause())
    }

    /// Transaction-level and operation-level changes, excluding fees.
    pub fn changes(self: &Arc<Self>) -> Result<Vec<Change>> {
        let view = TransactionMetaView::new(&self.meta)?;
        let tx_cause = ChangeCause::Transaction {
            transaction: Arc::clone(self),
        };

        let mut changes = decode_group(view.changes_before(), &tx_cause)?;

        if self.drops_operation_meta() {
            trace!(
                ledger_seq = self.ledger_sequence(),
                tx_index = self.index,
                ledger_version = self.ledger_version,
                "Skipping operation meta of internal-error transaction"
            );
            return Ok(changes);
        }

        for index in 0..view.operation_count() {
            changes.extend(self.decode_operation(&view, index)?);
        }

        if let Some(after) = view.changes_after() {
            changes.extend(decode_group(after, &tx_cause)?);
        }

        Ok(changes)
    }

    /// Every change of this transaction: fee changes first, then
    /// [`LedgerTransaction::changes`].
    pub fn assemble(self: &Arc<Self>) -> Result<Vec<Change>> {
        let mut changes = self.fee_changes()?;
        changes.extend(self.changes()?);
        Ok(changes)
    }

    /// Changes of operation `index` (0-based).
    ///
    /// Empty if the index is out of range or the operation meta is ignored
    /// for this transaction.
    pub fn operation_changes(self: &Arc<Self>, index: u32) -> Result<Vec<Change>> {
        let view = TransactionMetaView::new(&self.meta)?;
        if self.drops_operation_meta() {
            return Ok(Vec::new());
        }
        self.decode_operation(&view, index as usize)
    }

    fn decode_operation(
        self: &Arc<Self>,
        view: &TransactionMetaView<'_>,
        index: usize,
    ) -> Result<Vec<Change>> {
        let Some(raw) = view.operation_changes(index) else {
            return Ok(Vec::new());
        };
        let cause = ChangeCause::Operation {
            transaction: Arc::clone(self),
            index: index as u32,
        };
        decode_group(raw, &cause)
    }

    fn fee_cause(self: &Arc<Self>) -> ChangeCause {
        ChangeCause::Fee {
            transaction: Arc::clone(self),
        }
    }
}
