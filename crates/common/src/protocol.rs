//! Protocol version constants and gates.
//!
//! Ledger metadata carries quirks that depend on the protocol version the
//! ledger closed under. The helpers here keep those comparisons typed:
//!
//! ```rust
//! use henyey_common::protocol::{protocol_version_starts_from, ProtocolVersion};
//!
//! assert!(protocol_version_starts_from(20, ProtocolVersion::V20));
//! assert!(!protocol_version_starts_from(12, ProtocolVersion::V13));
//! ```

/// Known Stellar protocol versions.
///
/// `#[repr(u32)]` keeps the discriminants equal to the on-chain numbers.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V0 = 0,
    V1 = 1,
    V2 = 2,
    V3 = 3,
    V4 = 4,
    V5 = 5,
    V6 = 6,
    V7 = 7,
    V8 = 8,
    V9 = 9,
    V10 = 10,
    V11 = 11,
    V12 = 12,
    V13 = 13,
    V14 = 14,
    V15 = 15,
    V16 = 16,
    V17 = 17,
    V18 = 18,
    V19 = 19,
    V20 = 20,
    V21 = 21,
    V22 = 22,
    V23 = 23,
    V24 = 24,
    V25 = 25,
}

impl ProtocolVersion {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Last protocol version whose `txINTERNAL_ERROR` transactions carry
/// operation and after-operation meta that must be ignored.
///
/// Up to this version stellar-core could emit partial operation meta for
/// transactions that failed with an internal error; those entries never
/// reached the ledger state.
pub const LEGACY_INTERNAL_ERROR_MAX_PROTOCOL: ProtocolVersion = ProtocolVersion::V12;

/// First protocol version with Soroban (contract data, contract code, TTL).
pub const SOROBAN_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::V20;

/// First protocol version that emits post-apply fee processing (refunds
/// charged after all transactions applied) and `TransactionMeta::V4`.
pub const POST_APPLY_FEE_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::V23;

/// Returns `true` if `version` is strictly before `before`.
#[inline]
pub fn protocol_version_is_before(version: u32, before: ProtocolVersion) -> bool {
    version < before.as_u32()
}

/// Returns `true` if `version` is at or after `from`.
#[inline]
pub fn protocol_version_starts_from(version: u32, from: ProtocolVersion) -> bool {
    version >= from.as_u32()
}

/// Returns `true` if an internal-error transaction closed at `version` must
/// have its operation and after-operation meta dropped.
#[inline]
pub fn drops_internal_error_operation_meta(version: u32) -> bool {
    version <= LEGACY_INTERNAL_ERROR_MAX_PROTOCOL.as_u32()
}
