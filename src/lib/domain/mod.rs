pub mod commitment;
pub mod merkle;
pub mod note;
pub mod nullifier;
pub mod signals;
pub mod smt;
