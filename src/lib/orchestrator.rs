//! Request flows the relayer exposes to its API layer.
//!
//! A spend moves through `Validating → LockAcquired → Verifying → Submitting`
//! and ends `Confirmed` or `Failed`. Everything that can be rejected without
//! touching the chain is rejected before any nullifier is locked; once locked,
//! the [`NullifierLease`](crate::guard::NullifierLease) releases on every exit.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use tracing::{debug, info, warn};

use crate::compliance::ComplianceTree;
use crate::config::OrchestratorConfig;
use crate::crypto::field::{field_to_address, field_to_u64};
use crate::domain::commitment::Commitment;
use crate::domain::note::asset_id;
use crate::domain::nullifier::Nullifier;
use crate::domain::signals::{
    ComplianceSignals, ProofKind, SpendSignals, SplitWithdrawSignals, WithdrawSignals,
};
use crate::domain::smt::NonMembershipWitness;
use crate::error::{RelayerError, RootKind};
use crate::guard::NullifierGuard;
use crate::ports::chain::{ChainError, ChainPort, RevertReason};
use crate::ports::hasher::FieldHasher;
use crate::ports::verifier::ProofVerifier;
use crate::ports::TxReceipt;
use crate::tree_sync::TreeSync;

/// Stage of one request flow, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Validating,
    LockAcquired,
    Verifying,
    Submitting,
    Confirmed,
    Failed,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowState::Validating => "validating",
            FlowState::LockAcquired => "lock_acquired",
            FlowState::Verifying => "verifying",
            FlowState::Submitting => "submitting",
            FlowState::Confirmed => "confirmed",
            FlowState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Answer to `check_deposit_status`. `leaf_index` is set iff confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositStatus {
    pub confirmed: bool,
    pub leaf_index: Option<u64>,
}

/// Result of a mined relayer transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    /// Wei paid by the relayer.
    pub fee: U256,
}

impl From<TxReceipt> for SubmissionReceipt {
    fn from(receipt: TxReceipt) -> Self {
        Self {
            fee: receipt.fee(),
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        }
    }
}

/// Relayer entry point.
///
/// Generic over `ChainPort` (pool contract access) and `ProofVerifier`
/// (off-chain Groth16 check). Chains are registered at construction.
pub struct RelayerOrchestrator<C: ChainPort, V: ProofVerifier> {
    chains: HashMap<u64, Arc<C>>,
    tree_sync: Arc<TreeSync<C>>,
    compliance: Arc<ComplianceTree<C>>,
    guard: NullifierGuard,
    verifier: V,
    hasher: Arc<dyn FieldHasher>,
    config: OrchestratorConfig,
}

impl<C: ChainPort, V: ProofVerifier> RelayerOrchestrator<C, V> {
    pub fn new(
        chains: HashMap<u64, Arc<C>>,
        tree_sync: Arc<TreeSync<C>>,
        compliance: Arc<ComplianceTree<C>>,
        guard: NullifierGuard,
        verifier: V,
        hasher: Arc<dyn FieldHasher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            chains,
            tree_sync,
            compliance,
            guard,
            verifier,
            hasher,
            config,
        }
    }

    pub fn tree_sync(&self) -> &Arc<TreeSync<C>> {
        &self.tree_sync
    }

    pub fn compliance(&self) -> &Arc<ComplianceTree<C>> {
        &self.compliance
    }

    pub fn guard(&self) -> &NullifierGuard {
        &self.guard
    }

    fn chain(&self, chain_id: u64) -> Result<&C, RelayerError> {
        self.chains
            .get(&chain_id)
            .map(Arc::as_ref)
            .ok_or(RelayerError::UnknownChain(chain_id))
    }

    // ── Read-only queries ──

    /// Whether `commitment_hex` is in the local tree. An unknown commitment
    /// triggers one sync first, so a freshly mined deposit is found.
    pub async fn check_deposit_status(
        &self,
        chain_id: u64,
        commitment_hex: &str,
    ) -> Result<DepositStatus, RelayerError> {
        let commitment = Commitment::from_hex(commitment_hex)?;
        let mut leaf_index = self
            .tree_sync
            .get_deposit_leaf_index(chain_id, commitment.0)
            .await?;
        if leaf_index.is_none() {
            if let Err(e) = self.tree_sync.sync_and_post_root(chain_id).await {
                warn!(chain_id, %commitment, error = %e, "sync before deposit lookup failed");
            }
            leaf_index = self
                .tree_sync
                .get_deposit_leaf_index(chain_id, commitment.0)
                .await?;
        }
        Ok(DepositStatus {
            confirmed: leaf_index.is_some(),
            leaf_index,
        })
    }

    pub async fn get_tree_root(&self, chain_id: u64) -> Result<B256, RelayerError> {
        self.tree_sync.get_relayer_tree_root(chain_id).await
    }

    /// Exclusion witness for `commitment_hex`; flagged commitments are refused.
    pub async fn get_compliance_witness(
        &self,
        chain_id: u64,
        commitment_hex: &str,
    ) -> Result<NonMembershipWitness, RelayerError> {
        let commitment = Commitment::from_hex(commitment_hex)?;
        self.compliance.generate_witness(chain_id, commitment.0).await
    }

    // ── Submissions ──

    /// Forward a compliance proof for `nullifier` against `exclusion_root`.
    pub async fn submit_compliant_proof(
        &self,
        chain_id: u64,
        proof: &Bytes,
        exclusion_root: &str,
        nullifier: &str,
    ) -> Result<SubmissionReceipt, RelayerError> {
        let kind = ProofKind::Compliance;
        let result = self
            .run_compliance(chain_id, proof, exclusion_root, nullifier)
            .await;
        self.finish(chain_id, kind, result)
    }

    pub async fn submit_withdraw<S: AsRef<str>>(
        &self,
        chain_id: u64,
        proof: &Bytes,
        public_signals: &[S],
        asset: Address,
    ) -> Result<SubmissionReceipt, RelayerError> {
        let result = match WithdrawSignals::decode(public_signals) {
            Ok(signals) => {
                self.run_spend(chain_id, proof, SpendSignals::Withdraw(signals), asset)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        self.finish(chain_id, ProofKind::Withdraw, result)
    }

    pub async fn submit_split_withdraw<S: AsRef<str>>(
        &self,
        chain_id: u64,
        proof: &Bytes,
        public_signals: &[S],
        asset: Address,
    ) -> Result<SubmissionReceipt, RelayerError> {
        let result = match SplitWithdrawSignals::decode(public_signals) {
            Ok(signals) => {
                self.run_spend(chain_id, proof, SpendSignals::SplitWithdraw(signals), asset)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        self.finish(chain_id, ProofKind::SplitWithdraw, result)
    }

    fn finish(
        &self,
        chain_id: u64,
        kind: ProofKind,
        result: Result<SubmissionReceipt, RelayerError>,
    ) -> Result<SubmissionReceipt, RelayerError> {
        match &result {
            Ok(receipt) => info!(
                chain_id,
                %kind,
                state = %FlowState::Confirmed,
                tx = %receipt.tx_hash,
                block = receipt.block_number,
                gas_used = receipt.gas_used,
                "relayed"
            ),
            Err(e) => warn!(
                chain_id,
                %kind,
                state = %FlowState::Failed,
                error_kind = %e.kind(),
                error = %e,
                "relay failed"
            ),
        }
        result
    }

    async fn run_spend(
        &self,
        chain_id: u64,
        proof: &Bytes,
        signals: SpendSignals,
        asset: Address,
    ) -> Result<SubmissionReceipt, RelayerError> {
        let kind = signals.kind();
        debug!(chain_id, %kind, state = %FlowState::Validating, "spend received");
        let chain = self.chain(chain_id)?;
        let nullifiers = self.validate_spend(chain_id, &signals, asset)?;
        self.check_gas(chain_id, chain).await?;
        self.ensure_merkle_root_known(chain_id, chain, signals.merkle_root())
            .await?;

        let lease = self.guard.acquire_all(chain_id, &nullifiers)?;
        debug!(chain_id, %kind, state = %FlowState::LockAcquired, "nullifiers locked");

        self.ensure_unspent(chain, &nullifiers).await?;
        self.verify_proof(chain_id, kind, proof, &signals.to_fields())
            .await?;

        debug!(chain_id, %kind, state = %FlowState::Submitting, "sending transaction");
        let receipt = self
            .with_timeout("chain submission", self.config.submit_timeout, async {
                match &signals {
                    SpendSignals::Withdraw(s) => chain.withdraw(proof, s, asset).await,
                    SpendSignals::SplitWithdraw(s) => chain.split_withdraw(proof, s, asset).await,
                }
            })
            .await??;
        drop(lease);

        // The tx is final; a failed refresh heals on the next sync.
        if let Err(e) = self.tree_sync.sync_and_post_root(chain_id).await {
            warn!(chain_id, error = %e, "post-confirmation sync failed");
        }
        Ok(receipt.into())
    }

    async fn run_compliance(
        &self,
        chain_id: u64,
        proof: &Bytes,
        exclusion_root: &str,
        nullifier: &str,
    ) -> Result<SubmissionReceipt, RelayerError> {
        let kind = ProofKind::Compliance;
        debug!(chain_id, %kind, state = %FlowState::Validating, "compliance proof received");
        let chain = self.chain(chain_id)?;
        let signals = ComplianceSignals::decode(&[exclusion_root, nullifier])?;
        if signals.nullifier.is_zero() {
            return Err(RelayerError::Validation("nullifier is zero".into()));
        }
        self.check_gas(chain_id, chain).await?;
        self.compliance
            .ensure_root_known(chain_id, signals.exclusion_root)
            .await?;

        let lease = self.guard.acquire_all(chain_id, &[signals.nullifier])?;
        debug!(chain_id, %kind, state = %FlowState::LockAcquired, "nullifier locked");

        self.verify_proof(chain_id, kind, proof, &signals.to_fields())
            .await?;

        debug!(chain_id, %kind, state = %FlowState::Submitting, "sending transaction");
        let receipt = self
            .with_timeout(
                "chain submission",
                self.config.submit_timeout,
                chain.verify_compliance(proof, signals.exclusion_root, signals.nullifier),
            )
            .await??;
        drop(lease);
        Ok(receipt.into())
    }

    // ── Validation ──

    /// Checks that need no chain access. Returns the nullifiers to lock.
    fn validate_spend(
        &self,
        chain_id: u64,
        signals: &SpendSignals,
        asset: Address,
    ) -> Result<Vec<Nullifier>, RelayerError> {
        let proof_chain = signals.chain_id();
        if field_to_u64(proof_chain) != Some(chain_id) {
            return Err(RelayerError::Validation(format!(
                "proof is bound to chain {proof_chain}, not target chain {chain_id}"
            )));
        }

        let expected_asset = asset_id(self.hasher.as_ref(), chain_id, asset)?;
        if signals.public_asset() != expected_asset {
            return Err(RelayerError::Validation(format!(
                "public asset {} does not match asset id of {asset}",
                signals.public_asset()
            )));
        }

        if field_to_address(signals.recipient()).is_none() {
            return Err(RelayerError::Validation(
                "recipient does not fit in an address".into(),
            ));
        }

        let nullifiers = signals.active_nullifiers();
        match nullifiers.as_slice() {
            [] => Err(RelayerError::Validation("no input nullifier".into())),
            [a, b] if a == b => Err(RelayerError::Validation(format!(
                "duplicate nullifier {a}"
            ))),
            _ => Ok(nullifiers),
        }
    }

    async fn check_gas(&self, chain_id: u64, chain: &C) -> Result<(), RelayerError> {
        let current = chain.gas_price().await?;
        let ceiling = self.config.max_gas_price_wei;
        if current > ceiling {
            debug!(chain_id, current, ceiling, "gas price above ceiling");
            return Err(RelayerError::GasTooHigh { current, ceiling });
        }
        Ok(())
    }

    /// The pool only accepts proofs against roots in its history. A root
    /// equal to the relayer's current local root is posted on demand.
    async fn ensure_merkle_root_known(
        &self,
        chain_id: u64,
        chain: &C,
        root: B256,
    ) -> Result<(), RelayerError> {
        if chain.is_known_root(root).await? {
            return Ok(());
        }
        let stale = RelayerError::StaleRoot {
            kind: RootKind::Commitment,
            root,
        };
        if self.tree_sync.get_relayer_tree_root(chain_id).await? != root {
            return Err(stale);
        }

        let receipt = chain.update_root(root).await?;
        info!(chain_id, %root, tx = %receipt.tx_hash, "posted commitment root for pending proof");
        if chain.is_known_root(root).await? {
            Ok(())
        } else {
            Err(stale)
        }
    }

    async fn ensure_unspent(&self, chain: &C, nullifiers: &[Nullifier]) -> Result<(), RelayerError> {
        for nullifier in nullifiers {
            if chain.is_nullifier_spent(*nullifier).await? {
                debug!(%nullifier, "nullifier already spent on-chain");
                return Err(ChainError::Reverted(RevertReason::NullifierSpent).into());
            }
        }
        Ok(())
    }

    async fn verify_proof(
        &self,
        chain_id: u64,
        kind: ProofKind,
        proof: &Bytes,
        public_signals: &[B256],
    ) -> Result<(), RelayerError> {
        debug!(chain_id, %kind, state = %FlowState::Verifying, "verifying proof");
        let valid = self
            .with_timeout(
                "proof verification",
                self.config.verify_timeout,
                self.verifier.verify(kind, proof, public_signals),
            )
            .await??;
        if !valid {
            return Err(RelayerError::Validation(format!("{kind} proof is invalid")));
        }
        Ok(())
    }

    async fn with_timeout<T, F>(
        &self,
        what: &'static str,
        limit: Duration,
        fut: F,
    ) -> Result<T, RelayerError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(limit, fut).await.map_err(|_| {
            warn!(what, timeout = ?limit, "timed out");
            RelayerError::Timeout(what)
        })
    }
}
