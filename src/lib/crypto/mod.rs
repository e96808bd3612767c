pub mod field;
pub mod poseidon;
