use std::fmt;
use std::future::Future;

use alloy::primitives::{Address, B256, Bytes};

use super::{DepositRecord, TxReceipt};
use crate::domain::nullifier::Nullifier;
use crate::domain::signals::{SplitWithdrawSignals, WithdrawSignals};

/// Port for one chain's pool contract.
///
/// Implementations:
/// - `EthereumPool` (alloy provider + `sol!` bindings)
/// - `MockChain` for testing
pub trait ChainPort: Send + Sync {
    /// Number of deposits the contract has queued (queue tail).
    fn deposit_count(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// Deposits with queue positions in `[from, to)`, in queue order.
    fn deposits(
        &self,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<Vec<DepositRecord>, ChainError>> + Send;

    /// Latest commitment-tree root the contract accepted.
    fn last_root(&self) -> impl Future<Output = Result<B256, ChainError>> + Send;

    /// Whether `root` is in the contract's root history.
    fn is_known_root(&self, root: B256)
    -> impl Future<Output = Result<bool, ChainError>> + Send;

    /// Post a new commitment-tree root.
    fn update_root(&self, root: B256)
    -> impl Future<Output = Result<TxReceipt, ChainError>> + Send;

    fn is_known_exclusion_root(
        &self,
        root: B256,
    ) -> impl Future<Output = Result<bool, ChainError>> + Send;

    /// Post a new compliance exclusion-tree root.
    fn update_exclusion_root(
        &self,
        root: B256,
    ) -> impl Future<Output = Result<TxReceipt, ChainError>> + Send;

    fn is_nullifier_spent(
        &self,
        nullifier: Nullifier,
    ) -> impl Future<Output = Result<bool, ChainError>> + Send;

    /// Current gas price in wei.
    fn gas_price(&self) -> impl Future<Output = Result<u128, ChainError>> + Send;

    fn withdraw(
        &self,
        proof: &Bytes,
        signals: &WithdrawSignals,
        token: Address,
    ) -> impl Future<Output = Result<TxReceipt, ChainError>> + Send;

    fn split_withdraw(
        &self,
        proof: &Bytes,
        signals: &SplitWithdrawSignals,
        token: Address,
    ) -> impl Future<Output = Result<TxReceipt, ChainError>> + Send;

    /// Record a compliance proof for `nullifier` against `exclusion_root`.
    fn verify_compliance(
        &self,
        proof: &Bytes,
        exclusion_root: B256,
        nullifier: Nullifier,
    ) -> impl Future<Output = Result<TxReceipt, ChainError>> + Send;
}

/// Typed revert causes surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    NullifierSpent,
    UnknownRoot,
    InsufficientBalance,
    InvalidProof,
    Other(String),
}

impl RevertReason {
    /// Classify a revert message or custom-error name from the pool contract.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("nullifier") && (lower.contains("spent") || lower.contains("used")) {
            RevertReason::NullifierSpent
        } else if lower.contains("unknownroot") || lower.contains("unknown root") {
            RevertReason::UnknownRoot
        } else if lower.contains("insufficient") {
            RevertReason::InsufficientBalance
        } else if lower.contains("invalidproof") || lower.contains("invalid proof") {
            RevertReason::InvalidProof
        } else {
            RevertReason::Other(message.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RevertReason::NullifierSpent => "nullifier_spent",
            RevertReason::UnknownRoot => "unknown_root",
            RevertReason::InsufficientBalance => "insufficient_balance",
            RevertReason::InvalidProof => "invalid_proof",
            RevertReason::Other(_) => "reverted",
        }
    }
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevertReason::Other(msg) => write!(f, "reverted: {msg}"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("transaction reverted: {0}")]
    Reverted(RevertReason),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    /// RPC and transport failures may succeed on retry; reverts will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Rpc(_))
    }
}
