//! Relayer core for a shielded ZK-UTXO pool.
//!
//! Keeps a local mirror of the on-chain commitment tree, guards nullifiers
//! against concurrent processing, and maintains the compliance exclusion tree
//! used for non-membership proofs.

pub mod adapters;
pub mod clock;
pub mod compliance;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod guard;
pub mod orchestrator;
pub mod ports;
pub mod retry;
pub mod tree_sync;
