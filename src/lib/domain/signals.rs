use std::fmt;

use alloy::primitives::B256;

use super::commitment::Commitment;
use super::nullifier::Nullifier;
use crate::crypto::field::{FieldError, parse_field};

/// Circuits whose proofs the relayer forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProofKind {
    /// 2-in / 2-out transaction with a public withdrawal.
    Withdraw,
    /// 2-in / 8-out transaction with a public withdrawal.
    SplitWithdraw,
    /// Exclusion-tree non-membership for one nullifier.
    Compliance,
}

impl ProofKind {
    pub fn arity(&self) -> usize {
        match self {
            ProofKind::Withdraw => WithdrawSignals::ARITY,
            ProofKind::SplitWithdraw => SplitWithdrawSignals::ARITY,
            ProofKind::Compliance => ComplianceSignals::ARITY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProofKind::Withdraw => "withdraw",
            ProofKind::SplitWithdraw => "split_withdraw",
            ProofKind::Compliance => "compliance",
        }
    }
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("{kind} proof expects {expected} public signals, got {got}")]
    Arity {
        kind: ProofKind,
        expected: usize,
        got: usize,
    },

    #[error("public signal {index}: {source}")]
    Field {
        index: usize,
        #[source]
        source: FieldError,
    },
}

fn decode_fields<S: AsRef<str>>(kind: ProofKind, raw: &[S]) -> Result<Vec<B256>, SignalError> {
    if raw.len() != kind.arity() {
        return Err(SignalError::Arity {
            kind,
            expected: kind.arity(),
            got: raw.len(),
        });
    }
    raw.iter()
        .enumerate()
        .map(|(index, s)| parse_field(s.as_ref()).map_err(|source| SignalError::Field { index, source }))
        .collect()
}

/// Public signals of the withdraw circuit, in circuit order:
/// `[merkleRoot, nullifier0, nullifier1, outCommitment0, outCommitment1,
///   publicAmount, publicAsset, recipient, chainId]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawSignals {
    pub merkle_root: B256,
    pub nullifiers: [Nullifier; 2],
    pub out_commitments: [Commitment; 2],
    pub public_amount: B256,
    pub public_asset: B256,
    pub recipient: B256,
    pub chain_id: B256,
}

impl WithdrawSignals {
    pub const ARITY: usize = 9;

    pub fn decode<S: AsRef<str>>(raw: &[S]) -> Result<Self, SignalError> {
        let f = decode_fields(ProofKind::Withdraw, raw)?;
        Ok(Self {
            merkle_root: f[0],
            nullifiers: [Nullifier(f[1]), Nullifier(f[2])],
            out_commitments: [Commitment(f[3]), Commitment(f[4])],
            public_amount: f[5],
            public_asset: f[6],
            recipient: f[7],
            chain_id: f[8],
        })
    }

    pub fn to_fields(&self) -> Vec<B256> {
        let mut out = vec![self.merkle_root, self.nullifiers[0].0, self.nullifiers[1].0];
        out.extend(self.out_commitments.iter().map(|c| c.0));
        out.extend([self.public_amount, self.public_asset, self.recipient, self.chain_id]);
        out
    }
}

/// Public signals of the split-withdraw circuit, in circuit order:
/// `[merkleRoot, nullifier0, nullifier1, outCommitment0..7, publicAmount,
///   publicAsset, recipient, chainId]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitWithdrawSignals {
    pub merkle_root: B256,
    pub nullifiers: [Nullifier; 2],
    pub out_commitments: [Commitment; 8],
    pub public_amount: B256,
    pub public_asset: B256,
    pub recipient: B256,
    pub chain_id: B256,
}

impl SplitWithdrawSignals {
    pub const ARITY: usize = 15;

    pub fn decode<S: AsRef<str>>(raw: &[S]) -> Result<Self, SignalError> {
        let f = decode_fields(ProofKind::SplitWithdraw, raw)?;
        let mut out_commitments = [Commitment(B256::ZERO); 8];
        for (slot, value) in out_commitments.iter_mut().zip(&f[3..11]) {
            *slot = Commitment(*value);
        }
        Ok(Self {
            merkle_root: f[0],
            nullifiers: [Nullifier(f[1]), Nullifier(f[2])],
            out_commitments,
            public_amount: f[11],
            public_asset: f[12],
            recipient: f[13],
            chain_id: f[14],
        })
    }

    pub fn to_fields(&self) -> Vec<B256> {
        let mut out = vec![self.merkle_root, self.nullifiers[0].0, self.nullifiers[1].0];
        out.extend(self.out_commitments.iter().map(|c| c.0));
        out.extend([self.public_amount, self.public_asset, self.recipient, self.chain_id]);
        out
    }
}

/// Public signals of the compliance circuit: `[exclusionRoot, nullifier]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceSignals {
    pub exclusion_root: B256,
    pub nullifier: Nullifier,
}

impl ComplianceSignals {
    pub const ARITY: usize = 2;

    pub fn decode<S: AsRef<str>>(raw: &[S]) -> Result<Self, SignalError> {
        let f = decode_fields(ProofKind::Compliance, raw)?;
        Ok(Self {
            exclusion_root: f[0],
            nullifier: Nullifier(f[1]),
        })
    }

    pub fn to_fields(&self) -> Vec<B256> {
        vec![self.exclusion_root, self.nullifier.0]
    }
}

/// Either spend shape, with the accessors validation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpendSignals {
    Withdraw(WithdrawSignals),
    SplitWithdraw(SplitWithdrawSignals),
}

impl SpendSignals {
    pub fn kind(&self) -> ProofKind {
        match self {
            SpendSignals::Withdraw(_) => ProofKind::Withdraw,
            SpendSignals::SplitWithdraw(_) => ProofKind::SplitWithdraw,
        }
    }

    pub fn merkle_root(&self) -> B256 {
        match self {
            SpendSignals::Withdraw(s) => s.merkle_root,
            SpendSignals::SplitWithdraw(s) => s.merkle_root,
        }
    }

    pub fn nullifiers(&self) -> [Nullifier; 2] {
        match self {
            SpendSignals::Withdraw(s) => s.nullifiers,
            SpendSignals::SplitWithdraw(s) => s.nullifiers,
        }
    }

    /// Nullifiers of the inputs actually spent (zero slots are padding).
    pub fn active_nullifiers(&self) -> Vec<Nullifier> {
        self.nullifiers()
            .into_iter()
            .filter(|n| !n.is_zero())
            .collect()
    }

    pub fn public_asset(&self) -> B256 {
        match self {
            SpendSignals::Withdraw(s) => s.public_asset,
            SpendSignals::SplitWithdraw(s) => s.public_asset,
        }
    }

    pub fn recipient(&self) -> B256 {
        match self {
            SpendSignals::Withdraw(s) => s.recipient,
            SpendSignals::SplitWithdraw(s) => s.recipient,
        }
    }

    pub fn chain_id(&self) -> B256 {
        match self {
            SpendSignals::Withdraw(s) => s.chain_id,
            SpendSignals::SplitWithdraw(s) => s.chain_id,
        }
    }

    pub fn to_fields(&self) -> Vec<B256> {
        match self {
            SpendSignals::Withdraw(s) => s.to_fields(),
            SpendSignals::SplitWithdraw(s) => s.to_fields(),
        }
    }
}
