use std::collections::{HashMap, HashSet};
use std::time::Duration;

use alloy::primitives::{keccak256, Address, B256, Bytes};
use tokio::sync::Mutex;

use crate::domain::nullifier::Nullifier;
use crate::domain::signals::{SplitWithdrawSignals, WithdrawSignals};
use crate::ports::chain::{ChainError, ChainPort, RevertReason};
use crate::ports::{DepositRecord, TxReceipt};

/// A transaction the mock accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmittedTx {
    Withdraw {
        nullifiers: [Nullifier; 2],
        token: Address,
    },
    SplitWithdraw {
        nullifiers: [Nullifier; 2],
        token: Address,
    },
    Compliance {
        exclusion_root: B256,
        nullifier: Nullifier,
    },
}

#[derive(Default)]
struct MockState {
    deposits: Vec<B256>,
    roots: Vec<B256>,
    exclusion_roots: HashSet<B256>,
    spent: HashSet<Nullifier>,
    gas_price: u128,
    block_number: u64,
    tx_count: u64,
    root_updates: usize,
    exclusion_root_updates: usize,
    submissions: Vec<SubmittedTx>,
    failing_root_posts: u32,
    failing_reads: u32,
    next_revert: Option<RevertReason>,
    ignore_exclusion_updates: bool,
    submit_delay: Option<Duration>,
    /// Queue position -> reported position; `None` omits the record.
    misreported: HashMap<u64, Option<u64>>,
}

/// In-memory pool contract for tests and local runs.
///
/// Behaves like the deployed pool for the calls the relayer makes: a deposit
/// queue, a root history, an exclusion-root set, and spent-nullifier checks on
/// withdrawals. Failure injection helpers simulate RPC outages and reverts.
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                gas_price: 1_000_000_000,
                block_number: 1,
                ..MockState::default()
            }),
        }
    }

    /// Queue deposits (simulates `deposit` calls landing on-chain).
    pub async fn add_deposits(&self, commitments: &[B256]) {
        self.state.lock().await.deposits.extend_from_slice(commitments);
    }

    pub async fn set_gas_price(&self, wei: u128) {
        self.state.lock().await.gas_price = wei;
    }

    pub async fn mark_spent(&self, nullifier: Nullifier) {
        self.state.lock().await.spent.insert(nullifier);
    }

    /// Make the next `n` root posts fail with an RPC error.
    pub async fn fail_root_posts(&self, n: u32) {
        self.state.lock().await.failing_root_posts = n;
    }

    /// Make the next `n` deposit reads fail with an RPC error.
    pub async fn fail_reads(&self, n: u32) {
        self.state.lock().await.failing_reads = n;
    }

    /// Revert the next withdrawal or compliance submission with `reason`.
    pub async fn revert_next_submission(&self, reason: RevertReason) {
        self.state.lock().await.next_revert = Some(reason);
    }

    /// Accept exclusion-root posts without ever recognising them.
    pub async fn ignore_exclusion_updates(&self, ignore: bool) {
        self.state.lock().await.ignore_exclusion_updates = ignore;
    }

    /// Report the deposit at queue position `index` as if it sat at `reported_as`.
    pub async fn misreport_deposit(&self, index: u64, reported_as: u64) {
        self.state.lock().await.misreported.insert(index, Some(reported_as));
    }

    /// Leave the deposit at queue position `index` out of range reads.
    pub async fn omit_deposit(&self, index: u64) {
        self.state.lock().await.misreported.insert(index, None);
    }

    pub async fn set_submit_delay(&self, delay: Duration) {
        self.state.lock().await.submit_delay = Some(delay);
    }

    pub async fn root_updates(&self) -> usize {
        self.state.lock().await.root_updates
    }

    pub async fn exclusion_root_updates(&self) -> usize {
        self.state.lock().await.exclusion_root_updates
    }

    pub async fn submissions(&self) -> Vec<SubmittedTx> {
        self.state.lock().await.submissions.clone()
    }

    pub async fn is_spent(&self, nullifier: Nullifier) -> bool {
        self.state.lock().await.spent.contains(&nullifier)
    }

    fn mine(state: &mut MockState) -> TxReceipt {
        state.tx_count += 1;
        state.block_number += 1;
        TxReceipt {
            tx_hash: keccak256(state.tx_count.to_be_bytes()),
            block_number: state.block_number,
            gas_used: 21_000,
            effective_gas_price: state.gas_price,
        }
    }

    fn take_read_failure(state: &mut MockState) -> Result<(), ChainError> {
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(ChainError::Rpc("connection reset".into()));
        }
        Ok(())
    }

    async fn delay_submission(&self) {
        let delay = self.state.lock().await.submit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn spend(
        state: &mut MockState,
        root: B256,
        nullifiers: [Nullifier; 2],
    ) -> Result<(), ChainError> {
        if let Some(reason) = state.next_revert.take() {
            return Err(ChainError::Reverted(reason));
        }
        if !state.roots.contains(&root) {
            return Err(ChainError::Reverted(RevertReason::UnknownRoot));
        }
        let active: Vec<Nullifier> = nullifiers.into_iter().filter(|n| !n.is_zero()).collect();
        if active.iter().any(|n| state.spent.contains(n)) {
            return Err(ChainError::Reverted(RevertReason::NullifierSpent));
        }
        state.spent.extend(active);
        Ok(())
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainPort for MockChain {
    async fn deposit_count(&self) -> Result<u64, ChainError> {
        let mut state = self.state.lock().await;
        Self::take_read_failure(&mut state)?;
        Ok(state.deposits.len() as u64)
    }

    async fn deposits(&self, from: u64, to: u64) -> Result<Vec<DepositRecord>, ChainError> {
        let mut state = self.state.lock().await;
        Self::take_read_failure(&mut state)?;
        let end = (to as usize).min(state.deposits.len());
        let start = (from as usize).min(end);
        Ok(state.deposits[start..end]
            .iter()
            .enumerate()
            .filter_map(|(offset, commitment)| {
                let position = (start + offset) as u64;
                let leaf_index = match state.misreported.get(&position) {
                    Some(reported) => (*reported)?,
                    None => position,
                };
                Some(DepositRecord {
                    leaf_index,
                    commitment: *commitment,
                })
            })
            .collect())
    }

    async fn last_root(&self) -> Result<B256, ChainError> {
        Ok(self
            .state
            .lock()
            .await
            .roots
            .last()
            .copied()
            .unwrap_or(B256::ZERO))
    }

    async fn is_known_root(&self, root: B256) -> Result<bool, ChainError> {
        Ok(self.state.lock().await.roots.contains(&root))
    }

    async fn update_root(&self, root: B256) -> Result<TxReceipt, ChainError> {
        let mut state = self.state.lock().await;
        if state.failing_root_posts > 0 {
            state.failing_root_posts -= 1;
            return Err(ChainError::Rpc("root post dropped".into()));
        }
        state.roots.push(root);
        state.root_updates += 1;
        Ok(Self::mine(&mut state))
    }

    async fn is_known_exclusion_root(&self, root: B256) -> Result<bool, ChainError> {
        Ok(self.state.lock().await.exclusion_roots.contains(&root))
    }

    async fn update_exclusion_root(&self, root: B256) -> Result<TxReceipt, ChainError> {
        let mut state = self.state.lock().await;
        if !state.ignore_exclusion_updates {
            state.exclusion_roots.insert(root);
        }
        state.exclusion_root_updates += 1;
        Ok(Self::mine(&mut state))
    }

    async fn is_nullifier_spent(&self, nullifier: Nullifier) -> Result<bool, ChainError> {
        Ok(self.state.lock().await.spent.contains(&nullifier))
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(self.state.lock().await.gas_price)
    }

    async fn withdraw(
        &self,
        _proof: &Bytes,
        signals: &WithdrawSignals,
        token: Address,
    ) -> Result<TxReceipt, ChainError> {
        self.delay_submission().await;
        let mut state = self.state.lock().await;
        Self::spend(&mut state, signals.merkle_root, signals.nullifiers)?;
        state.submissions.push(SubmittedTx::Withdraw {
            nullifiers: signals.nullifiers,
            token,
        });
        Ok(Self::mine(&mut state))
    }

    async fn split_withdraw(
        &self,
        _proof: &Bytes,
        signals: &SplitWithdrawSignals,
        token: Address,
    ) -> Result<TxReceipt, ChainError> {
        self.delay_submission().await;
        let mut state = self.state.lock().await;
        Self::spend(&mut state, signals.merkle_root, signals.nullifiers)?;
        state.submissions.push(SubmittedTx::SplitWithdraw {
            nullifiers: signals.nullifiers,
            token,
        });
        Ok(Self::mine(&mut state))
    }

    async fn verify_compliance(
        &self,
        _proof: &Bytes,
        exclusion_root: B256,
        nullifier: Nullifier,
    ) -> Result<TxReceipt, ChainError> {
        self.delay_submission().await;
        let mut state = self.state.lock().await;
        if let Some(reason) = state.next_revert.take() {
            return Err(ChainError::Reverted(reason));
        }
        if !state.exclusion_roots.contains(&exclusion_root) {
            return Err(ChainError::Reverted(RevertReason::UnknownRoot));
        }
        state.submissions.push(SubmittedTx::Compliance {
            exclusion_root,
            nullifier,
        });
        Ok(Self::mine(&mut state))
    }
}
