use std::fmt;

use alloy::primitives::B256;

use crate::crypto::field::{FieldError, parse_hex_field};

/// Public Merkle leaf binding a note's contents.
/// commitment = H(owner, amount, asset, blinding, chainId)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Commitment(pub B256);

impl Commitment {
    /// Parse from `0x`-prefixed hex, rejecting non-canonical field elements.
    pub fn from_hex(input: &str) -> Result<Self, FieldError> {
        parse_hex_field(input).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_ref()
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<B256> for Commitment {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl From<Commitment> for B256 {
    fn from(value: Commitment) -> Self {
        value.0
    }
}
