//! Implementations of the port traits.

pub mod ethereum;
pub mod memory_store;
pub mod mock_chain;
pub mod mock_verifier;
pub mod sled_store;
pub mod snarkjs_verifier;
