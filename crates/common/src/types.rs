//! Fixed-size hash type.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::Result;

/// A 32-byte SHA-256 digest.
///
/// Used for transaction hashes, network ids and the presentable digest of an
/// entry identity.
///
/// ```rust
/// use henyey_common::Hash256;
///
/// let hash = Hash256::hash(b"ledger key bytes");
/// assert_eq!(hash.to_hex().len(), 64);
/// assert!(!hash.is_zero());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero digest.
    pub const ZERO: Self = Self([0u8; 32]);

    /// SHA-256 of `data`.
    pub fn hash(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// SHA-256 of the XDR encoding of `value`.
    pub fn hash_xdr<T: stellar_xdr::curr::WriteXdr>(value: &T) -> Result<Self> {
        let bytes = value.to_xdr(stellar_xdr::curr::Limits::none())?;
        Ok(Self::hash(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, always 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<stellar_xdr::curr::Hash> for Hash256 {
    fn from(hash: stellar_xdr::curr::Hash) -> Self {
        Self(hash.0)
    }
}

impl From<Hash256> for stellar_xdr::curr::Hash {
    fn from(hash: Hash256) -> Self {
        stellar_xdr::curr::Hash(hash.0)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}
