use alloy::primitives::{Address, B256, U256, uint};
use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};

/// BN254 scalar field modulus.
pub const FIELD_MODULUS: U256 =
    uint!(0x30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000001_U256);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("empty field element")]
    Empty,

    #[error("invalid field element encoding: {0}")]
    InvalidEncoding(String),

    #[error("value is not a canonical field element: {0}")]
    OutOfRange(String),

    #[error("expected 0x-prefixed hex: {0}")]
    MissingHexPrefix(String),
}

/// Convert B256 to BN254 field element (reduced mod r).
pub fn b256_to_fr(value: B256) -> Fr {
    Fr::from_be_bytes_mod_order(value.as_ref())
}

/// Convert BN254 field element to B256.
pub fn fr_to_b256(value: Fr) -> B256 {
    let bytes = value.into_bigint().to_bytes_be();
    B256::left_padding_from(&bytes)
}

/// True when the 32-byte value is strictly below the field modulus.
pub fn is_canonical(value: B256) -> bool {
    U256::from_be_bytes(value.0) < FIELD_MODULUS
}

/// Parse a field element from a decimal string or a `0x`-prefixed hex string.
///
/// Proof public signals are emitted as decimal strings by snarkjs while
/// on-chain values are usually hex, so both are accepted. The result must be
/// canonical.
pub fn parse_field(input: &str) -> Result<B256, FieldError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(FieldError::Empty);
    }

    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some("") => return Err(FieldError::Empty),
        Some(digits) => U256::from_str_radix(digits, 16),
        None => U256::from_str_radix(input, 10),
    }
    .map_err(|e| FieldError::InvalidEncoding(format!("{input}: {e}")))?;

    if parsed >= FIELD_MODULUS {
        return Err(FieldError::OutOfRange(input.to_string()));
    }
    Ok(B256::from(parsed))
}

/// Parse a `0x`-prefixed hex field element. Unprefixed input is refused
/// rather than read as decimal.
pub fn parse_hex_field(input: &str) -> Result<B256, FieldError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FieldError::Empty);
    }
    if !trimmed.starts_with("0x") && !trimmed.starts_with("0X") {
        return Err(FieldError::MissingHexPrefix(trimmed.to_string()));
    }
    parse_field(trimmed)
}

pub fn u64_to_field(value: u64) -> B256 {
    B256::from(U256::from(value))
}

/// Returns `None` if the element does not fit in 64 bits.
pub fn field_to_u64(value: B256) -> Option<u64> {
    u64::try_from(U256::from_be_bytes(value.0)).ok()
}

pub fn address_to_field(address: Address) -> B256 {
    address.into_word()
}

/// Returns `None` if the element does not fit in 160 bits.
pub fn field_to_address(value: B256) -> Option<Address> {
    if value[..12].iter().any(|&b| b != 0) {
        return None;
    }
    Some(Address::from_slice(&value[12..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulus_matches_arkworks() {
        let ark = U256::from_be_slice(&Fr::MODULUS.to_bytes_be());
        assert_eq!(ark, FIELD_MODULUS);
    }

    #[test]
    fn test_fr_conversion_preserves_value() {
        let value = u64_to_field(123_456_789);
        assert_eq!(fr_to_b256(b256_to_fr(value)), value);
    }

    #[test]
    fn test_parse_decimal_and_hex_agree() {
        let dec = parse_field("11155111").unwrap();
        let hex = parse_field("0xaa36a7").unwrap();
        assert_eq!(dec, hex);
        assert_eq!(field_to_u64(dec), Some(11_155_111));
    }

    #[test]
    fn test_parse_rejects_modulus() {
        let modulus = FIELD_MODULUS.to_string();
        assert!(matches!(
            parse_field(&modulus),
            Err(FieldError::OutOfRange(_))
        ));
        let below = (FIELD_MODULUS - U256::from(1)).to_string();
        assert!(parse_field(&below).is_ok());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_field(""), Err(FieldError::Empty));
        assert_eq!(parse_field("0x"), Err(FieldError::Empty));
        assert!(matches!(
            parse_field("12ab"),
            Err(FieldError::InvalidEncoding(_))
        ));
        assert!(matches!(
            parse_field("0xzz"),
            Err(FieldError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_hex_parse_requires_prefix() {
        assert_eq!(parse_hex_field("0x2a").unwrap(), u64_to_field(42));
        assert_eq!(
            parse_hex_field("42"),
            Err(FieldError::MissingHexPrefix("42".into()))
        );
        assert_eq!(parse_hex_field(" "), Err(FieldError::Empty));
    }

    #[test]
    fn test_is_canonical() {
        assert!(is_canonical(B256::ZERO));
        assert!(!is_canonical(B256::repeat_byte(0xff)));
    }

    #[test]
    fn test_address_round_trip() {
        let addr = Address::repeat_byte(0x11);
        let field = address_to_field(addr);
        assert_eq!(field_to_address(field), Some(addr));
        assert_eq!(field_to_address(B256::repeat_byte(0x01)), None);
    }
}
