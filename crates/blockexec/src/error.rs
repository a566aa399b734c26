use alloy_primitives::{Address, B256};

/// Malformed on-disk encoding. Always fatal for the block being executed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The encoding carries no field-set byte.
    #[error("empty account encoding")]
    Empty,
    /// A field announces more bytes than the encoding holds.
    #[error("truncated {field} field: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Name of the field being decoded
        field: &'static str,
        /// Number of bytes the field announced
        needed: usize,
        /// Number of bytes left in the encoding
        remaining: usize,
    },
    /// An integer field is wider than its type.
    #[error("{field} field is {len} bytes wide, max is {max}")]
    IntegerTooLong {
        /// Name of the field being decoded
        field: &'static str,
        /// Announced width
        len: usize,
        /// Maximum width of the target integer
        max: usize,
    },
    /// A code-hash field is neither absent-valued nor 32 bytes wide.
    #[error("code hash field is {0} bytes wide, expected 0 or 32")]
    InvalidCodeHashLength(usize),
    /// A storage value is wider than a word.
    #[error("storage value is {0} bytes wide, max is 32")]
    StorageValueTooLong(usize),
    /// An incarnation-map entry is not an 8-byte big-endian integer.
    #[error("incarnation entry is {0} bytes wide, expected 8")]
    InvalidIncarnation(usize),
}

/// Failure reported by a backing store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend could not serve the request.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Failure while reading or mutating state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The account record of `address` could not be decoded.
    #[error("failed to decode account {address}: {source}")]
    Decode {
        /// Account whose record is malformed
        address: Address,
        /// Decoding failure
        #[source]
        source: DecodeError,
    },
    /// A storage value of `address` could not be decoded.
    #[error("failed to decode storage {address}/{slot}: {source}")]
    StorageDecode {
        /// Account owning the slot
        address: Address,
        /// Slot index
        slot: B256,
        /// Decoding failure
        #[source]
        source: DecodeError,
    },
    /// An account points at code that is not in the code table.
    #[error("code {code_hash} of account {address} not found")]
    MissingCode {
        /// Account referencing the code
        address: Address,
        /// Missing code hash
        code_hash: B256,
    },
    /// A balance credit overflowed 256 bits.
    #[error("balance overflow on {0}")]
    BalanceOverflow(Address),
    /// A balance debit exceeded the balance.
    #[error("balance underflow on {0}")]
    BalanceUnderflow(Address),
}

impl StateError {
    /// Wraps a decode failure of the account record of `address`.
    pub const fn decode(address: Address, source: DecodeError) -> Self {
        Self::Decode { address, source }
    }
}
