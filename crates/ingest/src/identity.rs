//! Entry identity: the canonical byte form of a ledger key.
//!
//! Two entries are the same logical ledger object iff the XDR encodings of
//! their `LedgerKey`s are equal. [`EntryIdentity`] holds those bytes and
//! orders by unsigned lexicographic comparison, which makes it both the sort
//! key of the deterministic sorter and the map key of the compactor.
//!
//! The SHA-256 and base64 forms are for display and logging only; ordering
//! and compaction always use the raw bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use henyey_common::Hash256;
use stellar_xdr::curr::{
    BytesM, ContractCodeEntry, ContractCodeEntryExt, ContractDataEntry, ExtensionPoint,
    LedgerEntry, LedgerEntryData, LedgerEntryExt, LedgerEntryType, LedgerKey, LedgerKeyAccount,
    LedgerKeyClaimableBalance, LedgerKeyConfigSetting, LedgerKeyContractCode,
    LedgerKeyContractData, LedgerKeyData, LedgerKeyLiquidityPool, LedgerKeyOffer,
    LedgerKeyTrustLine, LedgerKeyTtl, Limits, ReadXdr, ScVal, TtlEntry, WriteXdr,
};

use crate::{IngestError, Result};

/// Canonical XDR bytes of a `LedgerKey`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryIdentity(Vec<u8>);

impl EntryIdentity {
    pub fn from_key(key: &LedgerKey) -> Result<Self> {
        Ok(Self(key.to_xdr(Limits::none())?))
    }

    pub fn from_entry(entry: &LedgerEntry) -> Result<Self> {
        Self::from_key(&entry_to_key(entry))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decode the bytes back into the key they encode.
    pub fn to_key(&self) -> Result<LedgerKey> {
        Ok(LedgerKey::from_xdr(&self.0, Limits::none())?)
    }

    /// SHA-256 of the key bytes.
    pub fn hash(&self) -> Hash256 {
        Hash256::hash(&self.0)
    }

    /// Base64 of the key bytes (the `ledger_key_hash` column downstream).
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl std::fmt::Debug for EntryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntryIdentity({})", self.to_base64())
    }
}

/// Derive the ledger key of an entry.
pub fn entry_to_key(entry: &LedgerEntry) -> LedgerKey {
    match &entry.data {
        LedgerEntryData::Account(account) => LedgerKey::Account(LedgerKeyAccount {
            account_id: account.account_id.clone(),
        }),
        LedgerEntryData::Trustline(trustline) => LedgerKey::Trustline(LedgerKeyTrustLine {
            account_id: trustline.account_id.clone(),
            asset: trustline.asset.clone(),
        }),
        LedgerEntryData::Offer(offer) => LedgerKey::Offer(LedgerKeyOffer {
            seller_id: offer.seller_id.clone(),
            offer_id: offer.offer_id,
        }),
        LedgerEntryData::Data(data) => LedgerKey::Data(LedgerKeyData {
            account_id: data.account_id.clone(),
            data_name: data.data_name.clone(),
        }),
        LedgerEntryData::ClaimableBalance(cb) => {
            LedgerKey::ClaimableBalance(LedgerKeyClaimableBalance {
                balance_id: cb.balance_id.clone(),
            })
        }
        LedgerEntryData::LiquidityPool(pool) => LedgerKey::LiquidityPool(LedgerKeyLiquidityPool {
            liquidity_pool_id: pool.liquidity_pool_id.clone(),
        }),
        LedgerEntryData::ContractData(data) => LedgerKey::ContractData(LedgerKeyContractData {
            contract: data.contract.clone(),
            key: data.key.clone(),
            durability: data.durability,
        }),
        LedgerEntryData::ContractCode(code) => LedgerKey::ContractCode(LedgerKeyContractCode {
            hash: code.hash.clone(),
        }),
        LedgerEntryData::ConfigSetting(setting) => {
            LedgerKey::ConfigSetting(LedgerKeyConfigSetting {
                config_setting_id: setting.discriminant(),
            })
        }
        LedgerEntryData::Ttl(ttl) => LedgerKey::Ttl(LedgerKeyTtl {
            key_hash: ttl.key_hash.clone(),
        }),
    }
}

/// Entry type of a key.
pub fn key_entry_type(key: &LedgerKey) -> LedgerEntryType {
    key.discriminant()
}

/// Build a placeholder pre-image for an evicted key.
///
/// Eviction metadata only lists keys. The stub carries the key fields and
/// zero values elsewhere, so its derived key is identical to `key`. Only
/// Soroban entries are ever evicted.
pub fn stub_entry_for_key(key: &LedgerKey, last_modified_ledger_seq: u32) -> Result<LedgerEntry> {
    let data = match key {
        LedgerKey::ContractData(k) => LedgerEntryData::ContractData(ContractDataEntry {
            ext: ExtensionPoint::V0,
            contract: k.contract.clone(),
            key: k.key.clone(),
            durability: k.durability,
            val: ScVal::Void,
        }),
        LedgerKey::ContractCode(k) => LedgerEntryData::ContractCode(ContractCodeEntry {
            ext: ContractCodeEntryExt::V0,
            hash: k.hash.clone(),
            code: BytesM::default(),
        }),
        LedgerKey::Ttl(k) => LedgerEntryData::Ttl(TtlEntry {
            key_hash: k.key_hash.clone(),
            live_until_ledger_seq: 0,
        }),
        other => return Err(IngestError::UnsupportedEvictionKey(key_entry_type(other))),
    };

    Ok(LedgerEntry {
        last_modified_ledger_seq,
        data,
        ext: LedgerEntryExt::V0,
    })
}
