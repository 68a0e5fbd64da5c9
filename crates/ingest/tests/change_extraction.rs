use henyey_common::xdr_stream::XdrOutputStream;
use henyey_common::NetworkId;
use henyey_ingest::{
    entry_to_key, extract_batch, ledger_sequence, stream_changes, transaction_hash, BatchOptions,
    ChangeReason, LedgerChangeReader, LedgerRange, MemoryBackend, XdrStreamBackend,
};
use stellar_xdr::curr::{
    AccountEntry, AccountEntryExt, AccountId, ExtensionPoint, GeneralizedTransactionSet, Hash,
    LedgerCloseMeta, LedgerCloseMetaV2, LedgerEntry, LedgerEntryChange, LedgerEntryChanges,
    LedgerEntryData, LedgerEntryExt, LedgerEntryType, LedgerKey, LedgerKeyTtl, Memo, MuxedAccount,
    OperationMetaV2, Preconditions, PublicKey, SequenceNumber, String32, Thresholds, TimePoint,
    Transaction, TransactionEnvelope, TransactionExt, TransactionMeta, TransactionMetaV4,
    TransactionPhase, TransactionResult, TransactionResultExt, TransactionResultMetaV1,
    TransactionResultPair, TransactionResultResult, TransactionSetV1, TransactionV1Envelope,
    TtlEntry, TxSetComponent, TxSetComponentTxsMaybeDiscountedFee, Uint256, VecM,
};

fn network() -> NetworkId {
    NetworkId::testnet()
}

fn account(id_byte: u8, balance: i64) -> LedgerEntry {
    LedgerEntry {
        last_modified_ledger_seq: 1,
        data: LedgerEntryData::Account(AccountEntry {
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
        }),
        ext: LedgerEntryExt::V0,
    }
}

fn ttl(byte: u8, live_until_ledger_seq: u32) -> LedgerEntry {
    LedgerEntry {
        last_modified_ledger_seq: 1,
        data: LedgerEntryData::Ttl(TtlEntry {
            key_hash: Hash([byte; 32]),
            live_until_ledger_seq,
        }),
        ext: LedgerEntryExt::V0,
    }
}

fn ttl_key(byte: u8) -> LedgerKey {
    LedgerKey::Ttl(LedgerKeyTtl {
        key_hash: Hash([byte; 32]),
    })
}

fn log(records: Vec<LedgerEntryChange>) -> LedgerEntryChanges {
    LedgerEntryChanges(records.try_into().unwrap_or_default())
}

fn update(pre: LedgerEntry, post: LedgerEntry) -> Vec<LedgerEntryChange> {
    vec![LedgerEntryChange::State(pre), LedgerEntryChange::Updated(post)]
}

fn remove(pre: LedgerEntry) -> Vec<LedgerEntryChange> {
    let key = entry_to_key(&pre);
    vec![LedgerEntryChange::State(pre), LedgerEntryChange::Removed(key)]
}

/// A protocol 23 transaction with one operation.
struct Tx {
    seq_num: i64,
    fee: Vec<LedgerEntryChange>,
    op: Vec<LedgerEntryChange>,
}

fn envelope(seq_num: i64) -> TransactionEnvelope {
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

fn ledger(seq: u32, txs: Vec<Tx>, evicted: Vec<LedgerKey>) -> LedgerCloseMeta {
    let mut envelopes = Vec::new();
    let mut processing = Vec::new();
    for tx in txs {
        let env = envelope(tx.seq_num);
        let meta = TransactionMeta::V4(TransactionMetaV4 {
            ext: ExtensionPoint::V0,
            tx_changes_before: LedgerEntryChanges::default(),
            operations: vec![OperationMetaV2 {
                ext: ExtensionPoint::V0,
                changes: log(tx.op),
                events: VecM::default(),
            }]
            .try_into()
            .unwrap(),
            tx_changes_after: LedgerEntryChanges::default(),
            soroban_meta: None,
            events: VecM::default(),
            diagnostic_events: VecM::default(),
        });
        processing.push(TransactionResultMetaV1 {
            ext: ExtensionPoint::V0,
            result: TransactionResultPair {
                transaction_hash: transaction_hash(&env, &network()).unwrap().into(),
                result: TransactionResult {
                    fee_charged: 10,
                    result: TransactionResultResult::TxSuccess(VecM::default()),
                    ext: TransactionResultExt::V0,
                },
            },
            fee_processing: log(tx.fee),
            tx_apply_processing: meta,
            post_tx_apply_fee_processing: LedgerEntryChanges::default(),
        });
        envelopes.push(env);
    }

    let mut v2 = LedgerCloseMetaV2::default();
    v2.ledger_header.header.ledger_seq = seq;
    v2.ledger_header.header.ledger_version = 23;
    v2.ledger_header.header.scp_value.close_time = TimePoint(1_700_000_000 + seq as u64 * 5);
    v2.tx_set = GeneralizedTransactionSet::V1(TransactionSetV1 {
        previous_ledger_hash: Hash([0; 32]),
        phases: vec![TransactionPhase::V0(
            vec![TxSetComponent::TxsetCompTxsMaybeDiscountedFee(
                TxSetComponentTxsMaybeDiscountedFee {
                    base_fee: None,
                    txs: envelopes.try_into().unwrap(),
                },
            )]
            .try_into()
            .unwrap(),
        )]
        .try_into()
        .unwrap(),
    });
    v2.tx_processing = processing.try_into().unwrap();
    v2.evicted_keys = evicted.try_into().unwrap();
    LedgerCloseMeta::V2(v2)
}

/// Ledgers 100..=102:
///
/// - account 1 pays a fee of 10 in each of three transactions
/// - account 5 is created in 100, updated in 100 and removed in 101
/// - TTL 9 is created in 101 and evicted in 102
/// - TTL 3 is evicted in 102
fn scenario() -> Vec<LedgerCloseMeta> {
    vec![
        ledger(
            100,
            vec![
                Tx {
                    seq_num: 1,
                    fee: update(account(1, 1000), account(1, 990)),
                    op: vec![LedgerEntryChange::Created(account(5, 50))],
                },
                Tx {
                    seq_num: 2,
                    fee: update(account(1, 990), account(1, 980)),
                    op: update(account(5, 50), account(5, 60)),
                },
            ],
            vec![],
        ),
        ledger(
            101,
            vec![Tx {
                seq_num: 3,
                fee: update(account(1, 980), account(1, 970)),
                op: [
                    remove(account(5, 60)),
                    vec![LedgerEntryChange::Created(ttl(9, 500))],
                ]
                .concat(),
            }],
            vec![],
        ),
        ledger(102, vec![], vec![ttl_key(9), ttl_key(3)]),
    ]
}

#[test]
fn test_reader_yields_fees_first() {
    let reader = LedgerChangeReader::new(scenario().remove(0), &network()).unwrap();
    assert_eq!(reader.transactions().len(), 2);

    let changes = reader.read_all().unwrap();
    let reasons: Vec<_> = changes.iter().map(|c| c.reason()).collect();
    assert_eq!(
        reasons,
        vec![
            ChangeReason::Fee,
            ChangeReason::Fee,
            ChangeReason::Operation,
            ChangeReason::Operation,
        ]
    );
    assert_eq!(changes[1].post(), Some(&account(1, 980)));
    assert_eq!(changes[3].transaction().unwrap().index, 2);
    assert_eq!(changes[3].closed_at(), Some(1_700_000_500));
}

#[test]
fn test_batch_nets_changes_across_ledgers() {
    let mut backend: MemoryBackend = scenario().into_iter().collect();
    let options = BatchOptions::new(network());
    let batch = extract_batch(&mut backend, 100, 102, &options).unwrap();

    let accounts = batch.changes_of(LedgerEntryType::Account);
    assert_eq!(accounts.len(), 1, "account 5 was created and removed");
    assert_eq!(accounts[0].pre(), Some(&account(1, 1000)));
    assert_eq!(accounts[0].post(), Some(&account(1, 970)));
    assert_eq!(accounts[0].reason(), ChangeReason::Fee);
    assert_eq!(accounts[0].ledger_sequence(), Some(101));

    let ttls = batch.changes_of(LedgerEntryType::Ttl);
    assert_eq!(ttls.len(), 1, "ttl 9 was created and evicted");
    assert_eq!(ttls[0].ledger_key().unwrap(), ttl_key(3));
    assert!(ttls[0].deleted());
    assert_eq!(ttls[0].reason(), ChangeReason::Eviction);
    assert_eq!(batch.len(), 2);
}

#[test]
fn test_batch_skips_untracked_types() {
    let mut backend: MemoryBackend = scenario().into_iter().collect();
    let options = BatchOptions::new(network()).with_entry_types(vec![LedgerEntryType::Ttl]);
    let batch = extract_batch(&mut backend, 101, 101, &options).unwrap();

    assert!(!batch.changes.contains_key(&LedgerEntryType::Account));
    let ttls = batch.changes_of(LedgerEntryType::Ttl);
    assert_eq!(ttls.len(), 1);
    assert_eq!(ttls[0].post(), Some(&ttl(9, 500)));
    assert_eq!(ttls[0].operation_index(), Some(0));
}

#[tokio::test]
async fn test_stream_from_meta_file() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    {
        let mut out = XdrOutputStream::open(tmp.path()).unwrap();
        for meta in scenario() {
            out.write_one(&meta).unwrap();
        }
    }

    let backend = XdrStreamBackend::open(tmp.path()).unwrap();
    let options = BatchOptions::new(network()).with_batch_size(2);
    let batches = stream_changes(backend, LedgerRange::bounded(100, 102), options)
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    let ranges: Vec<_> = batches.iter().map(|b| (b.batch_start, b.batch_end)).collect();
    assert_eq!(ranges, vec![(100, 101), (102, 102)]);

    // Inside the first window TTL 9 is a creation; the second window sees
    // only its eviction.
    let first_ttls = batches[0].changes_of(LedgerEntryType::Ttl);
    assert_eq!(first_ttls.len(), 1);
    assert_eq!(first_ttls[0].pre(), None);

    let second_ttls = batches[1].changes_of(LedgerEntryType::Ttl);
    let keys: Vec<_> = second_ttls.iter().map(|c| c.ledger_key().unwrap()).collect();
    assert_eq!(keys, vec![ttl_key(3), ttl_key(9)]);
    assert!(batches[1].changes_of(LedgerEntryType::Account).is_empty());
}

#[tokio::test]
async fn test_stream_stops_at_end_of_file() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    {
        let mut out = XdrOutputStream::open(tmp.path()).unwrap();
        for meta in scenario().into_iter().take(2) {
            assert!(ledger_sequence(&meta) <= 101);
            out.write_one(&meta).unwrap();
        }
    }

    let backend = XdrStreamBackend::open(tmp.path()).unwrap();
    let options = BatchOptions::new(network()).with_batch_size(1);
    let mut stream = stream_changes(backend, LedgerRange::bounded(100, 102), options).unwrap();

    assert!(stream.next().await.unwrap().is_ok());
    assert!(stream.next().await.unwrap().is_ok());
    assert!(stream.next().await.unwrap().is_err());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_stream_unbounded_meta_file_until_end() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    {
        let mut out = XdrOutputStream::open(tmp.path()).unwrap();
        for meta in scenario() {
            out.write_one(&meta).unwrap();
        }
    }

    let backend = XdrStreamBackend::open(tmp.path()).unwrap();
    let options = BatchOptions::new(network()).with_batch_size(2);
    let batches = stream_changes(backend, LedgerRange::unbounded(100), options)
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    let ranges: Vec<_> = batches.iter().map(|b| (b.batch_start, b.batch_end)).collect();
    assert_eq!(ranges, vec![(100, 101), (102, 102)]);
    let evicted = batches[1].changes_of(LedgerEntryType::Ttl);
    assert_eq!(evicted.len(), 2);
    assert!(evicted.iter().all(|c| c.reason() == ChangeReason::Eviction));
}
