use std::fmt::Display;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, Bytes, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionReceipt,
    signers::local::PrivateKeySigner,
    sol,
};

use crate::{
    crypto::field::field_to_address,
    domain::{
        nullifier::Nullifier,
        signals::{SplitWithdrawSignals, WithdrawSignals},
    },
    ports::{
        chain::{ChainError, ChainPort, RevertReason},
        DepositRecord, TxReceipt,
    },
};

sol! {
    #[sol(rpc)]
    interface IDustPoolV2 {
        function depositQueueTail() external view returns (uint256);
        function depositQueue(uint256 index) external view returns (bytes32);

        function getLastRoot() external view returns (bytes32);
        function isKnownRoot(bytes32 root) external view returns (bool);
        function updateRoot(bytes32 newRoot) external;

        function isKnownExclusionRoot(bytes32 root) external view returns (bool);
        function updateExclusionRoot(bytes32 newRoot) external;

        function nullifiers(bytes32 nullifier) external view returns (bool);

        function withdraw(
            bytes calldata proof,
            bytes32 merkleRoot,
            bytes32 nullifier0,
            bytes32 nullifier1,
            bytes32 outCommitment0,
            bytes32 outCommitment1,
            uint256 publicAmount,
            uint256 publicAsset,
            address recipient,
            address tokenAddress
        ) external;

        function withdrawSplit(
            bytes calldata proof,
            bytes32 merkleRoot,
            bytes32 nullifier0,
            bytes32 nullifier1,
            bytes32[8] calldata outCommitments,
            uint256 publicAmount,
            uint256 publicAsset,
            address recipient,
            address tokenAddress
        ) external;

        function verifyComplianceProof(
            bytes32 exclusionRoot,
            bytes32 nullifier,
            bytes calldata proof
        ) external;
    }
}

/// Pool contract adapter over JSON-RPC.
#[derive(Clone)]
pub struct EthereumPool {
    provider: DynProvider,
    pool: Address,
}

impl EthereumPool {
    pub async fn new(rpc_url: &str, private_key: &str, pool: Address) -> Result<Self, ChainError> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| ChainError::Rpc(format!("Invalid private key: {}", e)))?;
        let wallet = EthereumWallet::from(signer);
        let provider = DynProvider::new(
            ProviderBuilder::new().wallet(wallet).connect_http(
                rpc_url
                    .parse()
                    .map_err(|e| ChainError::Rpc(format!("Invalid RPC URL: {}", e)))?,
            ),
        );

        Ok(Self { provider, pool })
    }

    /// Chain id reported by the RPC endpoint.
    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    fn contract(&self) -> IDustPoolV2::IDustPoolV2Instance<&DynProvider> {
        IDustPoolV2::new(self.pool, &self.provider)
    }

    fn convert_receipt(receipt: &TransactionReceipt) -> TxReceipt {
        TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.unwrap_or_default(),
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
        }
    }

    /// Reverts become typed reasons; everything else stays a send failure.
    fn send_error(e: impl Display) -> ChainError {
        let message = e.to_string();
        if message.contains("revert") {
            ChainError::Reverted(RevertReason::classify(&message))
        } else {
            ChainError::TransactionFailed(message)
        }
    }

    fn finish(receipt: TransactionReceipt, what: &str) -> Result<TxReceipt, ChainError> {
        if !receipt.status() {
            return Err(ChainError::Reverted(RevertReason::Other(format!(
                "{what} reverted in tx {}",
                receipt.transaction_hash
            ))));
        }
        Ok(Self::convert_receipt(&receipt))
    }

    fn recipient(value: B256) -> Result<Address, ChainError> {
        field_to_address(value)
            .ok_or_else(|| ChainError::TransactionFailed("recipient is not an address".into()))
    }
}

impl ChainPort for EthereumPool {
    async fn deposit_count(&self) -> Result<u64, ChainError> {
        let tail = self
            .contract()
            .depositQueueTail()
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        u64::try_from(tail).map_err(|_| ChainError::InvalidResponse(format!("queue tail {tail}")))
    }

    async fn deposits(&self, from: u64, to: u64) -> Result<Vec<DepositRecord>, ChainError> {
        let pool = self.contract();
        let mut records = Vec::with_capacity(to.saturating_sub(from) as usize);
        for leaf_index in from..to {
            let commitment = pool
                .depositQueue(U256::from(leaf_index))
                .call()
                .await
                .map_err(|e| ChainError::Rpc(e.to_string()))?;
            records.push(DepositRecord {
                leaf_index,
                commitment,
            });
        }
        Ok(records)
    }

    async fn last_root(&self) -> Result<B256, ChainError> {
        self.contract()
            .getLastRoot()
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn is_known_root(&self, root: B256) -> Result<bool, ChainError> {
        self.contract()
            .isKnownRoot(root)
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn update_root(&self, root: B256) -> Result<TxReceipt, ChainError> {
        let receipt = self
            .contract()
            .updateRoot(root)
            .send()
            .await
            .map_err(Self::send_error)?
            .get_receipt()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Self::finish(receipt, "updateRoot")
    }

    async fn is_known_exclusion_root(&self, root: B256) -> Result<bool, ChainError> {
        self.contract()
            .isKnownExclusionRoot(root)
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn update_exclusion_root(&self, root: B256) -> Result<TxReceipt, ChainError> {
        let receipt = self
            .contract()
            .updateExclusionRoot(root)
            .send()
            .await
            .map_err(Self::send_error)?
            .get_receipt()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Self::finish(receipt, "updateExclusionRoot")
    }

    async fn is_nullifier_spent(&self, nullifier: Nullifier) -> Result<bool, ChainError> {
        self.contract()
            .nullifiers(nullifier.0)
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn withdraw(
        &self,
        proof: &Bytes,
        signals: &WithdrawSignals,
        token: Address,
    ) -> Result<TxReceipt, ChainError> {
        let recipient = Self::recipient(signals.recipient)?;
        let receipt = self
            .contract()
            .withdraw(
                proof.clone(),
                signals.merkle_root,
                signals.nullifiers[0].0,
                signals.nullifiers[1].0,
                signals.out_commitments[0].0,
                signals.out_commitments[1].0,
                U256::from_be_bytes(signals.public_amount.0),
                U256::from_be_bytes(signals.public_asset.0),
                recipient,
                token,
            )
            .send()
            .await
            .map_err(Self::send_error)?
            .get_receipt()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Self::finish(receipt, "withdraw")
    }

    async fn split_withdraw(
        &self,
        proof: &Bytes,
        signals: &SplitWithdrawSignals,
        token: Address,
    ) -> Result<TxReceipt, ChainError> {
        let recipient = Self::recipient(signals.recipient)?;
        let out_commitments = signals.out_commitments.map(|c| c.0);
        let receipt = self
            .contract()
            .withdrawSplit(
                proof.clone(),
                signals.merkle_root,
                signals.nullifiers[0].0,
                signals.nullifiers[1].0,
                out_commitments,
                U256::from_be_bytes(signals.public_amount.0),
                U256::from_be_bytes(signals.public_asset.0),
                recipient,
                token,
            )
            .send()
            .await
            .map_err(Self::send_error)?
            .get_receipt()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Self::finish(receipt, "withdrawSplit")
    }

    async fn verify_compliance(
        &self,
        proof: &Bytes,
        exclusion_root: B256,
        nullifier: Nullifier,
    ) -> Result<TxReceipt, ChainError> {
        let receipt = self
            .contract()
            .verifyComplianceProof(exclusion_root, nullifier.0, proof.clone())
            .send()
            .await
            .map_err(Self::send_error)?
            .get_receipt()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Self::finish(receipt, "verifyComplianceProof")
    }
}
