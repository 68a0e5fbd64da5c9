//! Fixtures shared by the unit tests.

use std::sync::Arc;

use henyey_common::Hash256;
use stellar_xdr::curr::{
    AccountEntry, AccountEntryExt, AccountId, ExtensionPoint, Hash, LedgerCloseMeta,
    LedgerCloseMetaV2, LedgerEntry, LedgerEntryChange, LedgerEntryChanges, LedgerEntryData,
    LedgerEntryExt, LedgerKey, LedgerKeyTtl, Limits, Memo, MuxedAccount, OperationMeta,
    OperationMetaV2, Preconditions, PublicKey, SequenceNumber, String32, Thresholds, TimePoint,
    Transaction, TransactionEnvelope, TransactionExt, TransactionMeta, TransactionMetaV1,
    TransactionMetaV2, TransactionMetaV3, TransactionMetaV4, TransactionResult,
    TransactionResultExt, TransactionResultPair, TransactionResultResult, TransactionV1Envelope,
    TtlEntry, Uint256, VecM, WriteXdr,
};

use crate::identity::entry_to_key;
use crate::transaction::LedgerTransaction;

pub(crate) fn account_entry(id_byte: u8, balance: i64) -> LedgerEntry {
    let account = AccountEntry {
        account_id: AccountId(PublicKey::PublicKeyTypeEd25519(Uint256([id_byte; 32]))),
        balance,
        seq_num: SequenceNumber(1),
        num_sub_entries: 0,
        inflation_dest: None,
        flags: 0,
        home_domain: String32::default(),
        thresholds: Thresholds([1, 0, 0, 0]),
        signers: VecM::default(),
        ext: AccountEntryExt::V0,
    };
    LedgerEntry {
        last_modified_ledger_seq: 1,
        data: LedgerEntryData::Account(account),
        ext: LedgerEntryExt::V0,
    }
}

pub(crate) fn ttl_key(byte: u8) -> LedgerKey {
    LedgerKey::Ttl(LedgerKeyTtl {
        key_hash: Hash([byte; 32]),
    })
}

pub(crate) fn ttl_entry(byte: u8, live_until_ledger_seq: u32) -> LedgerEntry {
    LedgerEntry {
        last_modified_ledger_seq: 1,
        data: LedgerEntryData::Ttl(TtlEntry {
            key_hash: Hash([byte; 32]),
            live_until_ledger_seq,
        }),
        ext: LedgerEntryExt::V0,
    }
}

pub(crate) fn state(entry: &LedgerEntry) -> LedgerEntryChange {
    LedgerEntryChange::State(entry.clone())
}

pub(crate) fn removed(entry: &LedgerEntry) -> LedgerEntryChange {
    LedgerEntryChange::Removed(entry_to_key(entry))
}

pub(crate) fn changes(records: Vec<LedgerEntryChange>) -> LedgerEntryChanges {
    LedgerEntryChanges(records.try_into().unwrap_or_default())
}

pub(crate) fn changes_xdr(records: Vec<LedgerEntryChange>) -> Vec<u8> {
    changes(records).to_xdr(Limits::none()).unwrap()
}

fn operations(ops: Vec<Vec<LedgerEntryChange>>) -> VecM<OperationMeta> {
    ops.into_iter()
        .map(|records| OperationMeta {
            changes: changes(records),
        })
        .collect::<Vec<_>>()
        .try_into()
        .unwrap_or_default()
}

pub(crate) fn meta_v1(
    tx_changes: Vec<LedgerEntryChange>,
    ops: Vec<Vec<LedgerEntryChange>>,
) -> TransactionMeta {
    TransactionMeta::V1(TransactionMetaV1 {
        tx_changes: changes(tx_changes),
        operations: operations(ops),
    })
}

pub(crate) fn meta_v2(
    before: Vec<LedgerEntryChange>,
    ops: Vec<Vec<LedgerEntryChange>>,
    after: Vec<LedgerEntryChange>,
) -> TransactionMeta {
    TransactionMeta::V2(TransactionMetaV2 {
        tx_changes_before: changes(before),
        operations: operations(ops),
        tx_changes_after: changes(after),
    })
}

pub(crate) fn meta_v3(
    before: Vec<LedgerEntryChange>,
    ops: Vec<Vec<LedgerEntryChange>>,
    after: Vec<LedgerEntryChange>,
) -> TransactionMeta {
    TransactionMeta::V3(TransactionMetaV3 {
        ext: ExtensionPoint::V0,
        tx_changes_before: changes(before),
        operations: operations(ops),
        tx_changes_after: changes(after),
        soroban_meta: None,
    })
}

pub(crate) fn meta_v4(
    before: Vec<LedgerEntryChange>,
    ops: Vec<Vec<LedgerEntryChange>>,
    after: Vec<LedgerEntryChange>,
) -> TransactionMeta {
    let operations: Vec<OperationMetaV2> = ops
        .into_iter()
        .map(|records| OperationMetaV2 {
            ext: ExtensionPoint::V0,
            changes: changes(records),
            events: VecM::default(),
        })
        .collect();
    TransactionMeta::V4(TransactionMetaV4 {
        ext: ExtensionPoint::V0,
        tx_changes_before: changes(before),
        operations: operations.try_into().unwrap_or_default(),
        tx_changes_after: changes(after),
        soroban_meta: None,
        events: VecM::default(),
        diagnostic_events: VecM::default(),
    })
}

pub(crate) fn envelope(seq_num: i64) -> TransactionEnvelope {
    TransactionEnvelope::Tx(TransactionV1Envelope {
        tx: Transaction {
            source_account: MuxedAccount::Ed25519(Uint256([1; 32])),
            fee: 100,
            seq_num: SequenceNumber(seq_num),
            cond: Preconditions::None,
            memo: Memo::None,
            operations: VecM::default(),
            ext: TransactionExt::V0,
        },
        signatures: VecM::default(),
    })
}

pub(crate) fn tx_result(result: TransactionResultResult) -> TransactionResultPair {
    TransactionResultPair {
        transaction_hash: Hash([0; 32]),
        result: TransactionResult {
            fee_charged: 100,
            result,
            ext: TransactionResultExt::V0,
        },
    }
}

pub(crate) fn ledger_close_meta(ledger_seq: u32, ledger_version: u32) -> LedgerCloseMeta {
    let mut v2 = LedgerCloseMetaV2::default();
    v2.ledger_header.header.ledger_seq = ledger_seq;
    v2.ledger_header.header.ledger_version = ledger_version;
    v2.ledger_header.header.scp_value.close_time = TimePoint(1_700_000_000);
    LedgerCloseMeta::V2(v2)
}

/// A transaction in ledger 100 whose fee log charges account 2.
pub(crate) fn transaction(
    index: u32,
    meta: TransactionMeta,
    result: TransactionResultResult,
    ledger_version: u32,
) -> Arc<LedgerTransaction> {
    Arc::new(LedgerTransaction {
        index,
        envelope: envelope(index as i64),
        result: tx_result(result),
        fee_changes: changes(vec![
            state(&account_entry(2, 50)),
            LedgerEntryChange::Updated(account_entry(2, 49)),
        ]),
        post_apply_fee_changes: LedgerEntryChanges::default(),
        meta,
        ledger_version,
        ledger: Arc::new(ledger_close_meta(100, ledger_version)),
        hash: Hash256::ZERO,
    })
}
