use alloy::primitives::B256;
use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher as _};

use super::field::{b256_to_fr, fr_to_b256};
use crate::ports::hasher::{FieldHasher, HashError};

/// Largest input width supported by the circom parameter set.
pub const MAX_INPUTS: usize = 12;

/// Circom-compatible Poseidon over the BN254 scalar field.
///
/// Inputs are reduced mod r before hashing, matching the circuits' behaviour
/// for signal assignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseidonHasher;

impl PoseidonHasher {
    pub fn new() -> Self {
        Self
    }
}

impl FieldHasher for PoseidonHasher {
    fn hash(&self, inputs: &[B256]) -> Result<B256, HashError> {
        if inputs.is_empty() || inputs.len() > MAX_INPUTS {
            return Err(HashError::UnsupportedWidth(inputs.len()));
        }
        let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())
            .map_err(|e| HashError::Internal(e.to_string()))?;
        let frs: Vec<Fr> = inputs.iter().copied().map(b256_to_fr).collect();
        let out = hasher
            .hash(&frs)
            .map_err(|e| HashError::Internal(e.to_string()))?;
        Ok(fr_to_b256(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::field::{parse_field, u64_to_field};

    #[test]
    fn test_poseidon2_matches_circomlib_vector() {
        // circomlibjs: poseidon([1, 2])
        let expected = parse_field(
            "7853200120776062878684798364095072458815029376092732009249414926327459813530",
        )
        .unwrap();
        let out = PoseidonHasher
            .hash2(u64_to_field(1), u64_to_field(2))
            .unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_poseidon2_deterministic() {
        let a = B256::repeat_byte(0x01);
        let b = B256::repeat_byte(0x02);
        assert_eq!(
            PoseidonHasher.hash2(a, b).unwrap(),
            PoseidonHasher.hash2(a, b).unwrap()
        );
    }

    #[test]
    fn test_poseidon2_order_matters() {
        let a = u64_to_field(7);
        let b = u64_to_field(42);
        assert_ne!(
            PoseidonHasher.hash2(a, b).unwrap(),
            PoseidonHasher.hash2(b, a).unwrap()
        );
    }

    #[test]
    fn test_width_limits() {
        assert_eq!(
            PoseidonHasher.hash(&[]),
            Err(HashError::UnsupportedWidth(0))
        );
        let too_many = vec![B256::ZERO; MAX_INPUTS + 1];
        assert_eq!(
            PoseidonHasher.hash(&too_many),
            Err(HashError::UnsupportedWidth(MAX_INPUTS + 1))
        );
        assert!(PoseidonHasher.hash(&[B256::ZERO; 5]).is_ok());
    }
}
