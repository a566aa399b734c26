use alloy_eips::eip7702::constants::EIP7702_DELEGATION_DESIGNATOR;
use alloy_primitives::{Address, Bytes};

/// Length of an EIP-7702 delegation designator: the 3-byte prefix plus a 20-byte address.
pub const DELEGATION_CODE_LEN: usize = EIP7702_DELEGATION_DESIGNATOR.len() + 20;

/// Whether `code` is a well-formed delegation designator (`0xef0100 ‖ address`).
pub fn is_delegation(code: &[u8]) -> bool {
    code.len() == DELEGATION_CODE_LEN && code.starts_with(&EIP7702_DELEGATION_DESIGNATOR)
}

/// Returns the delegate address if `code` is a delegation designator.
pub fn delegation_target(code: &[u8]) -> Option<Address> {
    is_delegation(code).then(|| Address::from_slice(&code[EIP7702_DELEGATION_DESIGNATOR.len()..]))
}

/// Builds the delegation designator pointing at `target`.
pub fn delegation_code(target: Address) -> Bytes {
    let mut code = Vec::with_capacity(DELEGATION_CODE_LEN);
    code.extend_from_slice(&EIP7702_DELEGATION_DESIGNATOR);
    code.extend_from_slice(target.as_slice());
    code.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, hex};

    #[test]
    fn test_designator_round_trip() {
        let target = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let code = delegation_code(target);
        assert_eq!(code.len(), 23);
        assert!(is_delegation(&code));
        assert_eq!(delegation_target(&code), Some(target));
    }

    #[test]
    fn test_near_misses_are_not_delegations() {
        let target = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let code = delegation_code(target);

        // one byte short, one byte long
        assert!(!is_delegation(&code[..22]));
        let mut long = code.to_vec();
        long.push(0);
        assert!(!is_delegation(&long));

        // wrong version byte
        let mut wrong = code.to_vec();
        wrong[2] = 0x02;
        assert!(!is_delegation(&wrong));

        assert!(!is_delegation(&hex!("6080604052")));
        assert!(!is_delegation(&[]));
    }
}
