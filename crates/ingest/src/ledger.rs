//! Ledger-level access to `LedgerCloseMeta` and the full change stream of one
//! closed ledger.
//!
//! # Transaction alignment
//!
//! `tx_processing` lists results and meta in apply order, while envelopes live
//! in the transaction set. For `LedgerCloseMeta::V0` the two are aligned by
//! position. From V1 on the set is a `GeneralizedTransactionSet` whose order
//! differs from apply order, so envelopes are matched through the
//! network-aware transaction hash:
//!
//! ```text
//! SHA-256(network_id || envelope_type (i32 BE) || transaction XDR)
//! ```
//!
//! # Change order
//!
//! [`LedgerChangeReader`] yields changes in the order stellar-core applied
//! them while closing the ledger:
//!
//! 1. fee changes of every transaction
//! 2. apply changes of every transaction
//! 3. post-apply fee changes (refunds) of every transaction
//! 4. evictions, sorted by entry identity
//! 5. upgrades, each upgrade's log sorted on its own
//!
//! Feeding this stream into a [`ChangeCompactor`](crate::ChangeCompactor)
//! yields the ledger's net effect on state.

use std::collections::HashMap;
use std::sync::Arc;

use henyey_common::protocol::{
    protocol_version_is_before, POST_APPLY_FEE_PROTOCOL_VERSION, SOROBAN_PROTOCOL_VERSION,
};
use henyey_common::{Hash256, NetworkId};
use sha2::{Digest, Sha256};
use stellar_xdr::curr::{
    EnvelopeType, GeneralizedTransactionSet, LedgerCloseMeta, LedgerEntryChanges, LedgerHeader,
    LedgerKey, Limits, TransactionEnvelope, TransactionMeta, TransactionPhase,
    TransactionResultPair, TxSetComponent, UpgradeEntryMeta, WriteXdr,
};
use tracing::{debug, warn};

use crate::change::{decode_group, sort_changes, Change, ChangeCause, EntryDelta};
use crate::identity::stub_entry_for_key;
use crate::transaction::LedgerTransaction;
use crate::{IngestError, Result};

pub fn ledger_header(meta: &LedgerCloseMeta) -> &LedgerHeader {
    match meta {
        LedgerCloseMeta::V0(v0) => &v0.ledger_header.header,
        LedgerCloseMeta::V1(v1) => &v1.ledger_header.header,
        LedgerCloseMeta::V2(v2) => &v2.ledger_header.header,
    }
}

pub fn ledger_sequence(meta: &LedgerCloseMeta) -> u32 {
    ledger_header(meta).ledger_seq
}

pub fn ledger_protocol_version(meta: &LedgerCloseMeta) -> u32 {
    ledger_header(meta).ledger_version
}

/// Close time in unix seconds.
pub fn ledger_close_time(meta: &LedgerCloseMeta) -> u64 {
    ledger_header(meta).scp_value.close_time.0
}

/// Keys evicted from the live state while closing the ledger.
///
/// V0 ledgers predate Soroban and never evict.
pub fn evicted_keys(meta: &LedgerCloseMeta) -> &[LedgerKey] {
    match meta {
        LedgerCloseMeta::V0(_) => &[],
        LedgerCloseMeta::V1(v1) => &v1.evicted_keys,
        LedgerCloseMeta::V2(v2) => &v2.evicted_keys,
    }
}

pub fn upgrade_metas(meta: &LedgerCloseMeta) -> &[UpgradeEntryMeta] {
    match meta {
        LedgerCloseMeta::V0(v0) => &v0.upgrades_processing,
        LedgerCloseMeta::V1(v1) => &v1.upgrades_processing,
        LedgerCloseMeta::V2(v2) => &v2.upgrades_processing,
    }
}

/// Envelopes of the ledger's transaction set, in set order.
pub fn transaction_envelopes(meta: &LedgerCloseMeta) -> Vec<&TransactionEnvelope> {
    match meta {
        LedgerCloseMeta::V0(v0) => v0.tx_set.txs.iter().collect(),
        LedgerCloseMeta::V1(v1) => generalized_set_envelopes(&v1.tx_set),
        LedgerCloseMeta::V2(v2) => generalized_set_envelopes(&v2.tx_set),
    }
}

fn generalized_set_envelopes(tx_set: &GeneralizedTransactionSet) -> Vec<&TransactionEnvelope> {
    let GeneralizedTransactionSet::V1(v1) = tx_set;
    let mut txs = Vec::new();
    for phase in v1.phases.iter() {
        match phase {
            TransactionPhase::V0(components) => {
                for component in components.iter() {
                    let TxSetComponent::TxsetCompTxsMaybeDiscountedFee(comp) = component;
                    txs.extend(comp.txs.iter());
                }
            }
            TransactionPhase::V1(parallel) => {
                for stage in parallel.execution_stages.iter() {
                    for cluster in stage.iter() {
                        txs.extend(cluster.0.iter());
                    }
                }
            }
        }
    }
    txs
}

/// Network-aware hash of a transaction envelope.
///
/// Pre-protocol-13 `TxV0` envelopes hash as the equivalent `Tx` envelope: the
/// V0 body is the V1 body with an implicit ed25519 source account tag.
pub fn transaction_hash(envelope: &TransactionEnvelope, network_id: &NetworkId) -> Result<Hash256> {
    let mut hasher = Sha256::new();
    hasher.update(network_id.as_bytes());
    match envelope {
        TransactionEnvelope::TxV0(v0) => {
            hasher.update((EnvelopeType::Tx as i32).to_be_bytes());
            hasher.update(0i32.to_be_bytes());
            hasher.update(v0.tx.to_xdr(Limits::none())?);
        }
        TransactionEnvelope::Tx(v1) => {
            hasher.update((EnvelopeType::Tx as i32).to_be_bytes());
            hasher.update(v1.tx.to_xdr(Limits::none())?);
        }
        TransactionEnvelope::TxFeeBump(fee_bump) => {
            hasher.update((EnvelopeType::TxFeeBump as i32).to_be_bytes());
            hasher.update(fee_bump.tx.to_xdr(Limits::none())?);
        }
    }
    let digest: [u8; 32] = hasher.finalize().into();
    Ok(Hash256::from(digest))
}

/// One `tx_processing` row, normalized across meta versions.
struct ProcessingRow<'a> {
    result: &'a TransactionResultPair,
    fee_changes: &'a LedgerEntryChanges,
    meta: &'a TransactionMeta,
    post_apply_fee_changes: Option<&'a LedgerEntryChanges>,
}

fn processing_rows(meta: &LedgerCloseMeta) -> Vec<ProcessingRow<'_>> {
    match meta {
        LedgerCloseMeta::V0(v0) => v0
            .tx_processing
            .iter()
            .map(|tp| ProcessingRow {
                result: &tp.result,
                fee_changes: &tp.fee_processing,
                meta: &tp.tx_apply_processing,
                post_apply_fee_changes: None,
            })
            .collect(),
        LedgerCloseMeta::V1(v1) => v1
            .tx_processing
            .iter()
            .map(|tp| ProcessingRow {
                result: &tp.result,
                fee_changes: &tp.fee_processing,
                meta: &tp.tx_apply_processing,
                post_apply_fee_changes: None,
            })
            .collect(),
        LedgerCloseMeta::V2(v2) => v2
            .tx_processing
            .iter()
            .map(|tp| ProcessingRow {
                result: &tp.result,
                fee_changes: &tp.fee_processing,
                meta: &tp.tx_apply_processing,
                post_apply_fee_changes: Some(&tp.post_tx_apply_fee_processing),
            })
            .collect(),
    }
}

/// A closed ledger.
#[derive(Debug, Clone)]
pub struct LedgerView {
    meta: Arc<LedgerCloseMeta>,
}

impl LedgerView {
    pub fn new(meta: LedgerCloseMeta) -> Self {
        Self::from_arc(Arc::new(meta))
    }

    pub fn from_arc(meta: Arc<LedgerCloseMeta>) -> Self {
        Self { meta }
    }

    pub fn meta(&self) -> &Arc<LedgerCloseMeta> {
        &self.meta
    }

    pub fn header(&self) -> &LedgerHeader {
        ledger_header(&self.meta)
    }

    pub fn sequence(&self) -> u32 {
        ledger_sequence(&self.meta)
    }

    pub fn protocol_version(&self) -> u32 {
        ledger_protocol_version(&self.meta)
    }

    pub fn close_time(&self) -> u64 {
        ledger_close_time(&self.meta)
    }

    pub fn evicted_keys(&self) -> &[LedgerKey] {
        evicted_keys(&self.meta)
    }

    pub fn upgrades(&self) -> &[UpgradeEntryMeta] {
        upgrade_metas(&self.meta)
    }

    pub fn transaction_count(&self) -> usize {
        processing_rows(&self.meta).len()
    }

    /// Transactions in apply order, each paired with its envelope.
    ///
    /// # Errors
    ///
    /// [`IngestError::MissingEnvelope`] if a processed transaction has no
    /// envelope in the transaction set.
    pub fn transactions(&self, network_id: &NetworkId) -> Result<Vec<Arc<LedgerTransaction>>> {
        let ledger_seq = self.sequence();
        let ledger_version = self.protocol_version();
        let envelopes = transaction_envelopes(&self.meta);
        let rows = processing_rows(&self.meta);

        let by_hash: HashMap<Hash256, &TransactionEnvelope> = match &*self.meta {
            LedgerCloseMeta::V0(_) => HashMap::new(),
            _ => envelopes
                .iter()
                .map(|env| Ok((transaction_hash(env, network_id)?, *env)))
                .collect::<Result<_>>()?,
        };

        let mut transactions = Vec::with_capacity(rows.len());
        for (position, row) in rows.into_iter().enumerate() {
            let hash = Hash256::from(row.result.transaction_hash.clone());
            let envelope = match &*self.meta {
                LedgerCloseMeta::V0(_) => envelopes.get(position).copied(),
                _ => by_hash.get(&hash).copied(),
            };
            let envelope = envelope.ok_or_else(|| IngestError::MissingEnvelope {
                ledger_seq,
                tx_hash: hash.to_hex(),
            })?;

            transactions.push(Arc::new(LedgerTransaction {
                index: position as u32 + 1,
                envelope: envelope.clone(),
                result: row.result.clone(),
                fee_changes: row.fee_changes.clone(),
                post_apply_fee_changes: row.post_apply_fee_changes.cloned().unwrap_or_default(),
                meta: row.meta.clone(),
                ledger_version,
                ledger: Arc::clone(&self.meta),
                hash,
            }));
        }

        debug!(
            ledger_seq,
            tx_count = transactions.len(),
            txs_in_set = envelopes.len(),
            "Aligned ledger transactions"
        );
        Ok(transactions)
    }
}

/// Every change of one closed ledger, in apply order.
pub struct LedgerChangeReader {
    ledger: LedgerView,
    transactions: Vec<Arc<LedgerTransaction>>,
}

impl LedgerChangeReader {
    pub fn new(meta: LedgerCloseMeta, network_id: &NetworkId) -> Result<Self> {
        Self::from_view(LedgerView::new(meta), network_id)
    }

    pub fn from_view(ledger: LedgerView, network_id: &NetworkId) -> Result<Self> {
        let transactions = ledger.transactions(network_id)?;
        Ok(Self {
            ledger,
            transactions,
        })
    }

    pub fn ledger(&self) -> &LedgerView {
        &self.ledger
    }

    pub fn transactions(&self) -> &[Arc<LedgerTransaction>] {
        &self.transactions
    }

    pub fn fee_changes(&self) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for tx in &self.transactions {
            changes.extend(tx.fee_changes()?);
        }
        Ok(changes)
    }

    pub fn apply_changes(&self) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for tx in &self.transactions {
            changes.extend(tx.changes()?);
        }
        Ok(changes)
    }

    pub fn post_apply_fee_changes(&self) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for tx in &self.transactions {
            changes.extend(tx.post_apply_fee_changes()?);
        }
        if !changes.is_empty()
            && protocol_version_is_before(self.ledger.protocol_version(), POST_APPLY_FEE_PROTOCOL_VERSION)
        {
            warn!(
                ledger_seq = self.ledger.sequence(),
                protocol_version = self.ledger.protocol_version(),
                count = changes.len(),
                "Post-apply fee changes in a ledger before protocol 23"
            );
        }
        Ok(changes)
    }

    /// Evictions as removals of placeholder pre-images.
    ///
    /// Eviction meta only carries keys, so the pre-image holds the key fields
    /// and zero values elsewhere.
    pub fn eviction_changes(&self) -> Result<Vec<Change>> {
        let keys = self.ledger.evicted_keys();
        let ledger_seq = self.ledger.sequence();
        if !keys.is_empty()
            && protocol_version_is_before(self.ledger.protocol_version(), SOROBAN_PROTOCOL_VERSION)
        {
            warn!(
                ledger_seq,
                protocol_version = self.ledger.protocol_version(),
                count = keys.len(),
                "Evicted keys in a ledger before Soroban"
            );
        }

        let cause = ChangeCause::Eviction {
            ledger: Arc::clone(self.ledger.meta()),
        };
        let mut changes = keys
            .iter()
            .map(|key| {
                let stub = stub_entry_for_key(key, ledger_seq)?;
                Change::new(EntryDelta::Removed(stub), cause.clone())
            })
            .collect::<Result<Vec<_>>>()?;
        sort_changes(&mut changes);
        Ok(changes)
    }

    pub fn upgrade_changes(&self) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for upgrade_meta in self.ledger.upgrades() {
            let cause = ChangeCause::Upgrade {
                ledger: Arc::clone(self.ledger.meta()),
                upgrade: Arc::new(upgrade_meta.upgrade.clone()),
            };
            changes.extend(decode_group(&upgrade_meta.changes, &cause)?);
        }
        Ok(changes)
    }

    /// All changes of the ledger in apply order.
    pub fn read_all(&self) -> Result<Vec<Change>> {
        let mut changes = self.fee_changes()?;
        changes.extend(self.apply_changes()?);
        changes.extend(self.post_apply_fee_changes()?);
        changes.extend(self.eviction_changes()?);
        changes.extend(self.upgrade_changes()?);
        debug!(
            ledger_seq = self.ledger.sequence(),
            tx_count = self.transactions.len(),
            change_count = changes.len(),
            "Read ledger changes"
        );
        Ok(changes)
    }
}
