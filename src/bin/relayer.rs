//! Relayer daemon.
//!
//! Loads the TOML config, opens the sled database under `data_dir`, connects
//! every configured chain, restores the commitment and exclusion trees, and
//! keeps them in sync with the pool contracts until Ctrl-C.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use dustpool_relayer::adapters::ethereum::EthereumPool;
use dustpool_relayer::adapters::sled_store::SledStore;
use dustpool_relayer::adapters::snarkjs_verifier::SnarkjsVerifier;
use dustpool_relayer::clock::SystemClock;
use dustpool_relayer::compliance::ComplianceTree;
use dustpool_relayer::config::{ConfigError, RelayerConfig};
use dustpool_relayer::crypto::poseidon::PoseidonHasher;
use dustpool_relayer::error::RelayerError;
use dustpool_relayer::guard::NullifierGuard;
use dustpool_relayer::orchestrator::RelayerOrchestrator;
use dustpool_relayer::ports::chain::ChainError;
use dustpool_relayer::ports::hasher::FieldHasher;
use dustpool_relayer::ports::store::StoreError;
use dustpool_relayer::tree_sync::TreeSync;

#[derive(clap::Parser)]
#[command(name = "relayer", about = "Shielded pool relayer")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "./relayer.toml")]
    config: PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("chain {chain_id}: {source}")]
    Chain {
        chain_id: u64,
        #[source]
        source: ChainError,
    },

    #[error("chain {configured} is configured but the RPC endpoint reports chain {reported}")]
    ChainIdMismatch { configured: u64, reported: u64 },

    #[error("relayer error: {0}")]
    Relayer(#[from] RelayerError),

    #[error("missing [verifier] section")]
    MissingVerifier,
}

type Relayer = RelayerOrchestrator<EthereumPool, SnarkjsVerifier>;

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = <Args as clap::Parser>::parse();
    info!(config = %args.config.display(), "relayer starting");

    let (config, relayer) = match start(&args).await {
        Ok(started) => started,
        Err(e) => {
            error!("startup failed: {e}");
            std::process::exit(1);
        }
    };

    run(&config, &relayer).await;
    info!("shutting down");
}

async fn start(args: &Args) -> Result<(RelayerConfig, Relayer), StartupError> {
    // ── Load config ───────────────────────────────────────────────────────────
    let config = RelayerConfig::load(&args.config)?;
    let verifier_config = config
        .verifier
        .as_ref()
        .ok_or(StartupError::MissingVerifier)?;

    // ── Store ─────────────────────────────────────────────────────────────────
    let db_path = config.db_path();
    let store = Arc::new(SledStore::open(&db_path)?);
    info!(path = %db_path.display(), "store opened");

    // ── Chain adapters ────────────────────────────────────────────────────────
    let mut chains = HashMap::new();
    for chain in &config.chains {
        let label = chain.name.as_deref().unwrap_or("unnamed");
        let pool = EthereumPool::new(&chain.rpc_url, &config.relayer.private_key, chain.pool_address)
            .await
            .map_err(|source| StartupError::Chain {
                chain_id: chain.chain_id,
                source,
            })?;
        let reported = pool.chain_id().await.map_err(|source| StartupError::Chain {
            chain_id: chain.chain_id,
            source,
        })?;
        if reported != chain.chain_id {
            return Err(StartupError::ChainIdMismatch {
                configured: chain.chain_id,
                reported,
            });
        }
        info!(chain_id = chain.chain_id, name = label, pool = %chain.pool_address, "chain connected");
        chains.insert(chain.chain_id, Arc::new(pool));
    }

    // ── Trees ─────────────────────────────────────────────────────────────────
    let hasher: Arc<dyn FieldHasher> = Arc::new(PoseidonHasher);
    let tree_sync = Arc::new(TreeSync::new(
        chains.clone(),
        store.clone(),
        hasher.clone(),
        &config.tree,
        config.retry.clone(),
    )?);
    let compliance = Arc::new(ComplianceTree::new(
        chains.clone(),
        store.clone(),
        hasher.clone(),
        config.tree.smt_levels,
        config.retry.clone(),
    )?);

    // ── Orchestrator ──────────────────────────────────────────────────────────
    let guard = NullifierGuard::new(store, Arc::new(SystemClock), config.relayer.cooldown);
    let relayer = RelayerOrchestrator::new(
        chains,
        tree_sync,
        compliance,
        guard,
        SnarkjsVerifier::new(verifier_config),
        hasher,
        config.orchestrator(),
    );

    for chain in &config.chains {
        if let Err(e) = relayer.compliance().post_root(chain.chain_id).await {
            warn!(chain_id = chain.chain_id, error = %e, "initial exclusion root post failed");
        }
    }

    Ok((config, relayer))
}

/// Periodic sync of every chain plus cooldown purging, until Ctrl-C.
async fn run(config: &RelayerConfig, relayer: &Relayer) {
    let mut ticker = tokio::time::interval(config.relayer.sync_interval);
    info!(interval = ?config.relayer.sync_interval, "ready");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for chain in &config.chains {
                    match relayer.tree_sync().sync_chain(chain.chain_id).await {
                        Ok(report) if report.inserted > 0 || report.root_posted => info!(
                            chain_id = chain.chain_id,
                            inserted = report.inserted,
                            leaf_count = report.leaf_count,
                            root = %report.root,
                            "tree synced"
                        ),
                        Ok(_) => debug!(chain_id = chain.chain_id, "tree up to date"),
                        Err(e) => warn!(
                            chain_id = chain.chain_id,
                            error_kind = %e.kind(),
                            error = %e,
                            "sync failed"
                        ),
                    }
                }
                match relayer.guard().purge_expired() {
                    Ok(0) => {}
                    Ok(purged) => debug!(purged, "expired cooldowns purged"),
                    Err(e) => warn!(error = %e, "cooldown purge failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}
