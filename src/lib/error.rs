use std::fmt;

use alloy::primitives::B256;

use crate::crypto::field::FieldError;
use crate::domain::merkle::MerkleError;
use crate::domain::nullifier::Nullifier;
use crate::domain::signals::SignalError;
use crate::domain::smt::SmtError;
use crate::ports::chain::{ChainError, RevertReason};
use crate::ports::hasher::HashError;
use crate::ports::store::StoreError;
use crate::ports::verifier::VerifierError;

/// Machine-readable error class handed to the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    AlreadyProcessing,
    CooldownActive,
    CommitmentFlagged,
    StaleRoot,
    CapacityExceeded,
    ChainSubmission,
    GasTooHigh,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::AlreadyProcessing => "already_processing",
            ErrorKind::CooldownActive => "cooldown_active",
            ErrorKind::CommitmentFlagged => "commitment_flagged",
            ErrorKind::StaleRoot => "stale_root",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::ChainSubmission => "chain_submission_error",
            ErrorKind::GasTooHigh => "gas_too_high",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// Whether the client may resend the same request later.
    /// `StaleRoot` needs a fresh witness and proof, so it is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::AlreadyProcessing | ErrorKind::CooldownActive | ErrorKind::GasTooHigh
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tree a stale root belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Commitment,
    Exclusion,
}

impl fmt::Display for RootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootKind::Commitment => f.write_str("commitment"),
            RootKind::Exclusion => f.write_str("exclusion"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown chain id {0}")]
    UnknownChain(u64),

    #[error("nullifier {0} is already being processed")]
    AlreadyProcessing(Nullifier),

    #[error("nullifier {nullifier} is cooling down, retry after {retry_after_ms}ms")]
    CooldownActive {
        nullifier: Nullifier,
        retry_after_ms: u64,
    },

    #[error("commitment {0} is flagged")]
    CommitmentFlagged(B256),

    #[error("stale {kind} root {root}: fetch a new witness and re-prove")]
    StaleRoot { kind: RootKind, root: B256 },

    #[error("commitment tree is full ({capacity} leaves)")]
    CapacityExceeded { capacity: u64 },

    #[error("chain submission failed: {0}")]
    ChainSubmission(#[from] ChainError),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("gas price {current} wei exceeds ceiling {ceiling} wei")]
    GasTooHigh { current: u128, ceiling: u128 },

    #[error("local tree diverged from chain: {0}")]
    Desync(String),

    #[error("proof verifier error: {0}")]
    Verifier(#[from] VerifierError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayerError::Validation(_) | RelayerError::UnknownChain(_) => ErrorKind::Validation,
            RelayerError::AlreadyProcessing(_) => ErrorKind::AlreadyProcessing,
            RelayerError::CooldownActive { .. } => ErrorKind::CooldownActive,
            RelayerError::CommitmentFlagged(_) => ErrorKind::CommitmentFlagged,
            RelayerError::StaleRoot { .. } => ErrorKind::StaleRoot,
            RelayerError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            RelayerError::ChainSubmission(_) | RelayerError::Timeout(_) => {
                ErrorKind::ChainSubmission
            }
            RelayerError::GasTooHigh { .. } => ErrorKind::GasTooHigh,
            RelayerError::Desync(_)
            | RelayerError::Verifier(_)
            | RelayerError::Store(_)
            | RelayerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Sub-reason for chain submission failures (`"nullifier_spent"`, ...).
    pub fn reason(&self) -> Option<&str> {
        match self {
            RelayerError::ChainSubmission(ChainError::Reverted(r)) => Some(r.as_str()),
            RelayerError::ChainSubmission(ChainError::Rpc(_)) => Some("rpc"),
            RelayerError::ChainSubmission(_) => Some("transaction_failed"),
            RelayerError::Timeout(_) => Some("timeout"),
            _ => None,
        }
    }

    pub fn revert_reason(&self) -> Option<&RevertReason> {
        match self {
            RelayerError::ChainSubmission(ChainError::Reverted(r)) => Some(r),
            _ => None,
        }
    }
}

impl From<MerkleError> for RelayerError {
    fn from(err: MerkleError) -> Self {
        match err {
            MerkleError::CapacityExceeded { capacity } => RelayerError::CapacityExceeded { capacity },
            MerkleError::IndexOutOfRange { .. } => RelayerError::Validation(err.to_string()),
            other => RelayerError::Internal(other.to_string()),
        }
    }
}

impl From<SmtError> for RelayerError {
    fn from(err: SmtError) -> Self {
        match err {
            SmtError::KeyExists(key) => RelayerError::CommitmentFlagged(key),
            SmtError::NonCanonicalKey(_) => RelayerError::Validation(err.to_string()),
            other => RelayerError::Internal(other.to_string()),
        }
    }
}

impl From<SignalError> for RelayerError {
    fn from(err: SignalError) -> Self {
        RelayerError::Validation(err.to_string())
    }
}

impl From<FieldError> for RelayerError {
    fn from(err: FieldError) -> Self {
        RelayerError::Validation(err.to_string())
    }
}

impl From<HashError> for RelayerError {
    fn from(err: HashError) -> Self {
        RelayerError::Internal(err.to_string())
    }
}
