use std::fmt;

use alloy::primitives::B256;

use crate::crypto::field::{FieldError, parse_field};

/// Revealed once when a note is spent. The chain rejects a nullifier it has
/// already seen; the relayer additionally guards it while a spend is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nullifier(pub B256);

impl Nullifier {
    pub fn parse(input: &str) -> Result<Self, FieldError> {
        parse_field(input).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_ref()
    }

    /// Zero marks an unused input slot in the transaction circuits.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<B256> for Nullifier {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl From<Nullifier> for B256 {
    fn from(value: Nullifier) -> Self {
        value.0
    }
}

/// Guard key: nullifiers are scoped per chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NullifierKey {
    pub chain_id: u64,
    pub nullifier: Nullifier,
}

impl NullifierKey {
    pub fn new(chain_id: u64, nullifier: Nullifier) -> Self {
        Self { chain_id, nullifier }
    }

    /// Fixed-width key for persistent stores: chain id (8 bytes BE) || nullifier.
    pub fn storage_key(&self) -> [u8; 40] {
        let mut key = [0u8; 40];
        key[..8].copy_from_slice(&self.chain_id.to_be_bytes());
        key[8..].copy_from_slice(self.nullifier.as_bytes());
        key
    }
}

impl fmt::Display for NullifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.nullifier)
    }
}
