//! Minimal ABI decoding for ERC-20 `transfer(address,uint256)` call data.
//!
//! Layout: 4-byte selector, then two 32-byte big-endian words. The address
//! word carries the recipient in its low 20 bytes.

use num_bigint::BigUint;

/// `keccak256("transfer(address,uint256)")[..4]`
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

const WORD: usize = 32;
const ADDRESS_LEN: usize = 20;
const CALL_LEN: usize = 4 + 2 * WORD;

/// Decoded `transfer` arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCall {
    /// Lowercase `0x`-prefixed recipient
    pub recipient: String,
    pub amount: BigUint,
}

/// Parse a `0x`-prefixed hex quantity (`value`, block numbers, ...).
/// `"0x"` is zero.
pub fn parse_hex_quantity(value: &str) -> Option<BigUint> {
    let digits = hex_digits(value)?;
    if digits.is_empty() {
        return Some(BigUint::default());
    }
    BigUint::parse_bytes(digits.as_bytes(), 16)
}

pub fn parse_hex_u64(value: &str) -> Option<u64> {
    u64::from_str_radix(hex_digits(value)?, 16).ok()
}

/// Digits after the `0x` prefix. The integer parsers tolerate `_` and a sign,
/// which are not valid in a JSON-RPC quantity.
fn hex_digits(value: &str) -> Option<&str> {
    let digits = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"))?;
    digits
        .bytes()
        .all(|b| b.is_ascii_hexdigit())
        .then_some(digits)
}

/// Empty call data: `None`, `""` or `"0x"`
pub fn is_empty_input(input: Option<&str>) -> bool {
    matches!(input, None | Some("") | Some("0x") | Some("0X"))
}

/// Decode ERC-20 `transfer` call data. Anything else (other selector,
/// truncated payload, non-hex) yields `None`.
pub fn decode_transfer(input: &str) -> Option<TransferCall> {
    let digits = input.strip_prefix("0x").or_else(|| input.strip_prefix("0X"))?;
    let bytes = hex::decode(digits).ok()?;
    if bytes.len() < CALL_LEN || bytes[..4] != TRANSFER_SELECTOR {
        return None;
    }

    let address_word = &bytes[4..4 + WORD];
    let recipient = format!("0x{}", hex::encode(&address_word[WORD - ADDRESS_LEN..]));
    let amount = BigUint::from_bytes_be(&bytes[4 + WORD..CALL_LEN]);

    Some(TransferCall { recipient, amount })
}

#[cfg(test)]
pub(crate) fn encode_transfer(recipient: &str, amount: &BigUint) -> String {
    let recipient = recipient.trim_start_matches("0x").to_ascii_lowercase();
    let amount = format!("{:x}", amount);
    format!("0xa9059cbb{:0>64}{:0>64}", recipient, amount)
}
