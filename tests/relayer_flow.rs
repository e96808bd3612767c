//! End-to-end flows over the in-memory chain, backed by a sled store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256};

use dustpool_relayer::adapters::mock_chain::MockChain;
use dustpool_relayer::adapters::mock_verifier::MockVerifier;
use dustpool_relayer::adapters::sled_store::SledStore;
use dustpool_relayer::clock::ManualClock;
use dustpool_relayer::compliance::ComplianceTree;
use dustpool_relayer::config::{OrchestratorConfig, TreeConfig};
use dustpool_relayer::crypto::field::{address_to_field, u64_to_field};
use dustpool_relayer::crypto::poseidon::PoseidonHasher;
use dustpool_relayer::domain::merkle::MerkleTree;
use dustpool_relayer::domain::note::asset_id;
use dustpool_relayer::domain::nullifier::{Nullifier, NullifierKey};
use dustpool_relayer::error::ErrorKind;
use dustpool_relayer::ports::chain::ChainPort;
use dustpool_relayer::guard::NullifierGuard;
use dustpool_relayer::orchestrator::RelayerOrchestrator;
use dustpool_relayer::ports::hasher::FieldHasher;
use dustpool_relayer::retry::RetryPolicy;
use dustpool_relayer::tree_sync::TreeSync;

const SEPOLIA: u64 = 11_155_111;
const THANOS: u64 = 111_551_119_090;
const TOKEN: Address = Address::new([0xaa; 20]);
const RECIPIENT: Address = Address::new([0xbb; 20]);
const COOLDOWN: Duration = Duration::from_secs(30);

type Relayer = RelayerOrchestrator<MockChain, MockVerifier>;

struct Node {
    chains: HashMap<u64, Arc<MockChain>>,
    clock: Arc<ManualClock>,
    relayer: Relayer,
}

fn tree_config() -> TreeConfig {
    TreeConfig {
        depth: 4,
        root_history: 10,
        smt_levels: 20,
        sync_batch_size: 2,
    }
}

/// Build a relayer over `chains`, reading and writing state at `store`.
fn boot(chains: HashMap<u64, Arc<MockChain>>, store: Arc<SledStore>) -> Node {
    let hasher: Arc<dyn FieldHasher> = Arc::new(PoseidonHasher);
    let retry = RetryPolicy::none();
    let tree_sync = Arc::new(
        TreeSync::new(chains.clone(), store.clone(), hasher.clone(), &tree_config(), retry.clone())
            .unwrap(),
    );
    let compliance = Arc::new(
        ComplianceTree::new(chains.clone(), store.clone(), hasher.clone(), 20, retry).unwrap(),
    );
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let guard = NullifierGuard::new(store, clock.clone(), COOLDOWN);
    let relayer = RelayerOrchestrator::new(
        chains.clone(),
        tree_sync,
        compliance,
        guard,
        MockVerifier::accepting(),
        hasher,
        OrchestratorConfig::default(),
    );
    Node {
        chains,
        clock,
        relayer,
    }
}

fn two_chains() -> HashMap<u64, Arc<MockChain>> {
    HashMap::from([
        (SEPOLIA, Arc::new(MockChain::new())),
        (THANOS, Arc::new(MockChain::new())),
    ])
}

fn withdraw_signals(root: B256, n0: u64, n1: u64, proof_chain: u64) -> Vec<String> {
    let asset = asset_id(&PoseidonHasher, proof_chain, TOKEN).unwrap();
    vec![
        root.to_string(),
        u64_to_field(n0).to_string(),
        u64_to_field(n1).to_string(),
        "11".into(),
        "12".into(),
        "1000000".into(),
        asset.to_string(),
        address_to_field(RECIPIENT).to_string(),
        proof_chain.to_string(),
    ]
}

fn proof() -> Bytes {
    Bytes::from_static(b"proof")
}

#[tokio::test]
async fn test_deposit_scenario_depth_four() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
    let node = boot(two_chains(), store);
    let chain = &node.chains[&SEPOLIA];

    let leaves: Vec<B256> = [7u64, 42, 99].into_iter().map(u64_to_field).collect();
    chain.add_deposits(&leaves).await;
    let root = node.relayer.tree_sync().sync_and_post_root(SEPOLIA).await.unwrap();

    for (expected, value) in [7u64, 42, 99].into_iter().enumerate() {
        let status = node
            .relayer
            .check_deposit_status(SEPOLIA, &u64_to_field(value).to_string())
            .await
            .unwrap();
        assert_eq!(status.leaf_index, Some(expected as u64));
    }

    let witness = node.relayer.tree_sync().witness(SEPOLIA, 1).await.unwrap();
    assert_eq!(witness.root, root);
    assert!(witness.verify(leaves[1], &PoseidonHasher).unwrap());
    assert_eq!(node.relayer.get_tree_root(SEPOLIA).await.unwrap(), root);
    assert!(chain.is_known_root(root).await.unwrap());

    let permuted: Vec<B256> = [42u64, 7, 99].into_iter().map(u64_to_field).collect();
    let other = MerkleTree::from_leaves(4, 10, Arc::new(PoseidonHasher), &permuted).unwrap();
    assert_ne!(other.root(), root);
}

#[tokio::test]
async fn test_capacity_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
    let node = boot(two_chains(), store);
    let chain = &node.chains[&SEPOLIA];

    let leaves: Vec<B256> = (1..=16u64).map(u64_to_field).collect();
    chain.add_deposits(&leaves).await;
    node.relayer.tree_sync().sync_and_post_root(SEPOLIA).await.unwrap();
    assert_eq!(node.relayer.tree_sync().leaf_count(SEPOLIA).await.unwrap(), 16);

    chain.add_deposits(&[u64_to_field(17)]).await;
    let err = node
        .relayer
        .tree_sync()
        .sync_and_post_root(SEPOLIA)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let chains = two_chains();
    let (root, exclusion_root) = {
        let store = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
        let node = boot(chains.clone(), store);
        let leaves: Vec<B256> = [7u64, 42, 99].into_iter().map(u64_to_field).collect();
        node.chains[&SEPOLIA].add_deposits(&leaves).await;
        let root = node.relayer.tree_sync().sync_and_post_root(SEPOLIA).await.unwrap();
        let exclusion_root = node
            .relayer
            .compliance()
            .flag(SEPOLIA, u64_to_field(66))
            .await
            .unwrap();

        node.relayer
            .submit_withdraw(SEPOLIA, &proof(), &withdraw_signals(root, 1, 0, SEPOLIA), TOKEN)
            .await
            .unwrap();
        (root, exclusion_root)
    };

    let store = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
    let node = boot(chains, store);
    assert_eq!(node.relayer.get_tree_root(SEPOLIA).await.unwrap(), root);
    assert_eq!(
        node.relayer
            .compliance()
            .get_exclusion_root(SEPOLIA)
            .await
            .unwrap(),
        exclusion_root
    );
    assert_eq!(
        node.relayer
            .get_compliance_witness(SEPOLIA, "0x42")
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::CommitmentFlagged
    );
    // The cooldown table is durable too.
    let key = NullifierKey::new(SEPOLIA, Nullifier(u64_to_field(1)));
    assert!(!node.relayer.guard().check_cooldown(key).unwrap());
}

#[tokio::test]
async fn test_cross_chain_replay_rejected_then_cooldown_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
    let node = boot(two_chains(), store);

    let leaves: Vec<B256> = [7u64, 42, 99].into_iter().map(u64_to_field).collect();
    for chain_id in [SEPOLIA, THANOS] {
        node.chains[&chain_id].add_deposits(&leaves).await;
        node.relayer.tree_sync().sync_and_post_root(chain_id).await.unwrap();
    }
    let root = node.relayer.get_tree_root(SEPOLIA).await.unwrap();
    let signals = withdraw_signals(root, 0xabc, 0, SEPOLIA);

    let err = node
        .relayer
        .submit_withdraw(THANOS, &proof(), &signals, TOKEN)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(node.chains[&THANOS].submissions().await.is_empty());

    node.relayer
        .submit_withdraw(SEPOLIA, &proof(), &signals, TOKEN)
        .await
        .unwrap();

    let err = node
        .relayer
        .submit_withdraw(SEPOLIA, &proof(), &signals, TOKEN)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CooldownActive);

    node.clock.advance(COOLDOWN);
    let err = node
        .relayer
        .submit_withdraw(SEPOLIA, &proof(), &signals, TOKEN)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChainSubmission);
    assert_eq!(err.reason(), Some("nullifier_spent"));
}

#[tokio::test]
async fn test_compliance_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
    let node = boot(two_chains(), store);
    let compliance = node.relayer.compliance();

    for flagged in [3u64, 17, 1024] {
        compliance.flag(SEPOLIA, u64_to_field(flagged)).await.unwrap();
    }
    let witness = node.relayer.get_compliance_witness(SEPOLIA, "0x05").await.unwrap();
    assert_eq!(witness.siblings.len(), 20);
    assert!(witness.verify(u64_to_field(5), &PoseidonHasher).unwrap());

    assert!(compliance.is_flagged(SEPOLIA, u64_to_field(17)).await.unwrap());
    assert_eq!(
        node.relayer
            .get_compliance_witness(SEPOLIA, "0x11")
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::CommitmentFlagged
    );

    let receipt = node
        .relayer
        .submit_compliant_proof(SEPOLIA, &proof(), &witness.root.to_string(), "0x77")
        .await
        .unwrap();
    assert_ne!(receipt.tx_hash, B256::ZERO);
    assert!(compliance.is_known_root(SEPOLIA, witness.root).await.unwrap());
    // Exclusion trees are per chain.
    assert!(!node
        .relayer
        .compliance()
        .is_flagged(THANOS, u64_to_field(17))
        .await
        .unwrap());
}
