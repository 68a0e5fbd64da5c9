//! Network identity.

use crate::types::Hash256;

/// Passphrase of the public Stellar network.
pub const PUBLIC_NETWORK_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";

/// Passphrase of the Stellar test network.
pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

/// Network identifier: SHA-256 of the network passphrase.
///
/// Transaction hashes are computed over `network_id || envelope_type || tx`,
/// so the id is needed to match envelopes with their results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkId(pub Hash256);

impl NetworkId {
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self(Hash256::hash(passphrase.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn testnet() -> Self {
        Self::from_passphrase(TESTNET_PASSPHRASE)
    }

    pub fn mainnet() -> Self {
        Self::from_passphrase(PUBLIC_NETWORK_PASSPHRASE)
    }
}
