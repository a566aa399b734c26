use alloy_primitives::{Bytes, B256, U256};
use alloy_trie::KECCAK_EMPTY;

use crate::{is_empty_code_hash, Account, DecodeError};

/// Field-set bit marking a present nonce.
pub const FIELD_NONCE: u8 = 1;
/// Field-set bit marking a present balance.
pub const FIELD_BALANCE: u8 = 1 << 1;
/// Field-set bit marking a present incarnation.
pub const FIELD_INCARNATION: u8 = 1 << 2;
/// Field-set bit marking a present code hash.
pub const FIELD_CODE_HASH: u8 = 1 << 3;

/// Encodes `account` into its plain-state record.
///
/// The first byte is a field-set bitmask. Every field whose bit is set follows in the order
/// nonce, balance, incarnation, code hash, each as a one-byte length and a minimal big-endian
/// payload. Zero-valued fields and an empty code hash are omitted.
pub fn encode_account(account: &Account) -> Bytes {
    let mut out = Vec::with_capacity(1 + 9 + 33 + 9 + 33);
    out.push(0);
    let mut field_set = 0u8;

    if account.nonce > 0 {
        field_set |= FIELD_NONCE;
        push_minimal(&mut out, &account.nonce.to_be_bytes());
    }
    if !account.balance.is_zero() {
        field_set |= FIELD_BALANCE;
        push_minimal(&mut out, &account.balance.to_be_bytes::<32>());
    }
    if account.incarnation > 0 {
        field_set |= FIELD_INCARNATION;
        push_minimal(&mut out, &account.incarnation.to_be_bytes());
    }
    if !account.has_empty_code_hash() {
        field_set |= FIELD_CODE_HASH;
        out.push(32);
        out.extend_from_slice(account.code_hash.as_slice());
    }

    out[0] = field_set;
    out.into()
}

/// Decodes a plain-state account record.
///
/// A code-hash field that is present but zero-length, or that holds the zero hash, decodes as
/// [`KECCAK_EMPTY`]. Use [`has_code_hash_in_storage`] to tell such a record apart from one that
/// omitted the field.
pub fn decode_account(enc: &[u8]) -> Result<Account, DecodeError> {
    let (&field_set, mut rest) = enc.split_first().ok_or(DecodeError::Empty)?;
    let mut account = Account::default();

    if field_set & FIELD_NONCE != 0 {
        let (value, tail) = take_field(rest, "nonce")?;
        account.nonce = be_u64(value, "nonce")?;
        rest = tail;
    }
    if field_set & FIELD_BALANCE != 0 {
        let (value, tail) = take_field(rest, "balance")?;
        if value.len() > 32 {
            return Err(DecodeError::IntegerTooLong { field: "balance", len: value.len(), max: 32 });
        }
        account.balance = U256::from_be_slice(value);
        rest = tail;
    }
    if field_set & FIELD_INCARNATION != 0 {
        let (value, tail) = take_field(rest, "incarnation")?;
        account.incarnation = be_u64(value, "incarnation")?;
        rest = tail;
    }
    if field_set & FIELD_CODE_HASH != 0 {
        let (value, _) = take_field(rest, "code hash")?;
        account.code_hash = match value.len() {
            0 => KECCAK_EMPTY,
            32 => {
                let hash = B256::from_slice(value);
                if is_empty_code_hash(&hash) {
                    KECCAK_EMPTY
                } else {
                    hash
                }
            }
            len => return Err(DecodeError::InvalidCodeHashLength(len)),
        };
    }

    Ok(account)
}

/// Whether the raw record announces a code-hash field, regardless of its value.
pub fn has_code_hash_in_storage(enc: &[u8]) -> bool {
    enc.first().is_some_and(|field_set| field_set & FIELD_CODE_HASH != 0)
}

/// Decodes a plain-state storage value.
pub fn decode_storage_value(enc: &[u8]) -> Result<U256, DecodeError> {
    if enc.len() > 32 {
        return Err(DecodeError::StorageValueTooLong(enc.len()));
    }
    Ok(U256::from_be_slice(enc))
}

/// Encodes a storage value with leading zero bytes stripped.
pub fn encode_storage_value(value: U256) -> Bytes {
    let bytes = value.to_be_bytes::<32>();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    Bytes::copy_from_slice(&bytes[start..])
}

fn push_minimal(out: &mut Vec<u8>, be: &[u8]) {
    let start = be.iter().position(|b| *b != 0).unwrap_or(be.len());
    let payload = &be[start..];
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
}

fn take_field<'a>(
    input: &'a [u8],
    field: &'static str,
) -> Result<(&'a [u8], &'a [u8]), DecodeError> {
    let (&len, rest) =
        input.split_first().ok_or(DecodeError::Truncated { field, needed: 1, remaining: 0 })?;
    let len = len as usize;
    if rest.len() < len {
        return Err(DecodeError::Truncated { field, needed: len, remaining: rest.len() });
    }
    Ok(rest.split_at(len))
}

fn be_u64(value: &[u8], field: &'static str) -> Result<u64, DecodeError> {
    if value.len() > 8 {
        return Err(DecodeError::IntegerTooLong { field, len: value.len(), max: 8 });
    }
    Ok(value.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{b256, keccak256};

    #[test]
    fn test_empty_account_encodes_to_bare_field_set() {
        let enc = encode_account(&Account::default());
        assert_eq!(&enc[..], &[0u8]);
        assert!(!has_code_hash_in_storage(&enc));
        assert_eq!(decode_account(&enc).unwrap(), Account::default());
    }

    #[test]
    fn test_contract_account_layout() {
        let code_hash = keccak256([0x60, 0x00]);
        let account = Account {
            nonce: 1,
            balance: U256::from(0x0100u64),
            incarnation: 2,
            code_hash,
        };
        let enc = encode_account(&account);
        assert_eq!(enc[0], FIELD_NONCE | FIELD_BALANCE | FIELD_INCARNATION | FIELD_CODE_HASH);
        // nonce: len 1, value 1; balance: len 2, 0x0100; incarnation: len 1, value 2
        assert_eq!(&enc[1..8], &[1, 1, 2, 1, 0, 1, 2]);
        assert_eq!(enc[8], 32);
        assert_eq!(&enc[9..], code_hash.as_slice());
        assert_eq!(decode_account(&enc).unwrap(), account);
    }

    #[test]
    fn test_flagged_but_empty_code_hash_decodes_as_empty() {
        let zero_len = [FIELD_CODE_HASH, 0];
        assert!(has_code_hash_in_storage(&zero_len));
        assert_eq!(decode_account(&zero_len).unwrap().code_hash, KECCAK_EMPTY);

        let mut zero_hash = vec![FIELD_CODE_HASH, 32];
        zero_hash.extend_from_slice(B256::ZERO.as_slice());
        assert_eq!(decode_account(&zero_hash).unwrap().code_hash, KECCAK_EMPTY);
    }

    #[test]
    fn test_malformed_records_are_rejected() {
        assert_eq!(decode_account(&[]), Err(DecodeError::Empty));
        assert_eq!(
            decode_account(&[FIELD_NONCE, 4, 1]),
            Err(DecodeError::Truncated { field: "nonce", needed: 4, remaining: 1 })
        );
        assert_eq!(
            decode_account(&[FIELD_NONCE, 9, 1, 1, 1, 1, 1, 1, 1, 1, 1]),
            Err(DecodeError::IntegerTooLong { field: "nonce", len: 9, max: 8 })
        );
        assert_eq!(
            decode_account(&[FIELD_CODE_HASH, 3, 1, 2, 3]),
            Err(DecodeError::InvalidCodeHashLength(3))
        );
    }

    #[test]
    fn test_storage_value_trims_leading_zeros() {
        let value = U256::from(0x1234u64);
        let enc = encode_storage_value(value);
        assert_eq!(&enc[..], &[0x12, 0x34]);
        assert_eq!(decode_storage_value(&enc).unwrap(), value);
        assert!(encode_storage_value(U256::ZERO).is_empty());
        assert_eq!(decode_storage_value(&[0u8; 33]), Err(DecodeError::StorageValueTooLong(33)));

        let full = b256!("0xff00000000000000000000000000000000000000000000000000000000000001");
        let enc = encode_storage_value(U256::from_be_bytes(full.0));
        assert_eq!(enc.len(), 32);
    }
}
