pub mod chain;
pub mod hasher;
pub mod store;
pub mod verifier;

use alloy::primitives::{B256, U256};

/// A deposit as recorded by the pool's on-chain queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositRecord {
    /// Position in the deposit queue; equals the leaf index once inserted.
    pub leaf_index: u64,
    pub commitment: B256,
}

/// Mined transaction summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

impl TxReceipt {
    /// Fee paid in wei.
    pub fn fee(&self) -> U256 {
        U256::from(self.gas_used) * U256::from(self.effective_gas_price)
    }
}
