use std::future::Future;

use alloy::primitives::B256;

use crate::domain::signals::ProofKind;

/// Port for off-chain proof verification.
///
/// Proofs are checked before a transaction is paid for, so an invalid proof
/// costs the relayer nothing.
///
/// Implementations:
/// - `SnarkjsVerifier` (shells out to `snarkjs groth16 verify`)
/// - `MockVerifier` for testing
pub trait ProofVerifier: Send + Sync {
    /// Returns `Ok(false)` for a well-formed proof that does not verify.
    fn verify(
        &self,
        kind: ProofKind,
        proof: &[u8],
        public_signals: &[B256],
    ) -> impl Future<Output = Result<bool, VerifierError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("no verification key for {0} circuit")]
    MissingKey(String),

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("verifier binary failed: {0}")]
    VerifierFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl<T: ProofVerifier> ProofVerifier for std::sync::Arc<T> {
    fn verify(
        &self,
        kind: ProofKind,
        proof: &[u8],
        public_signals: &[B256],
    ) -> impl Future<Output = Result<bool, VerifierError>> + Send {
        (**self).verify(kind, proof, public_signals)
    }
}
