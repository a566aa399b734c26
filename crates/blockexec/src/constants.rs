//! Protocol constants used by the state-transition core.
//!
//! Constants are grouped by the hardfork that introduced them.

/// Constants for the Frontier rules and their Homestead amendments.
pub mod frontier {
    /// Base cost of every transaction.
    pub const TX_GAS: u64 = 21_000;
    /// Base cost of a contract-creating transaction from Homestead on.
    pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
    /// Cost per zero byte of calldata.
    pub const TX_DATA_ZERO_GAS: u64 = 4;
    /// Cost per non-zero byte of calldata before Istanbul.
    pub const TX_DATA_NON_ZERO_GAS: u64 = 68;
    /// Maximum share of the used gas that can be refunded before London (`gas_used / 2`).
    pub const MAX_REFUND_QUOTIENT: u64 = 2;
}

/// Constants for the Istanbul rules.
pub mod istanbul {
    /// Cost per non-zero byte of calldata (EIP-2028).
    pub const TX_DATA_NON_ZERO_GAS: u64 = 16;
}

/// Constants for the Berlin rules.
pub mod berlin {
    /// Cost per address in an access list (EIP-2930).
    pub const TX_ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;
    /// Cost per storage key in an access list (EIP-2930).
    pub const TX_ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1_900;
}

/// Constants for the London rules.
pub mod london {
    /// Maximum share of the used gas that can be refunded (EIP-3529).
    pub const MAX_REFUND_QUOTIENT: u64 = 5;
}

/// Constants for the Shanghai rules.
pub mod shanghai {
    /// Cost per 32-byte word of initcode (EIP-3860).
    pub const INIT_CODE_WORD_GAS: u64 = 2;
    /// Maximum size of initcode (EIP-3860).
    pub const MAX_INIT_CODE_SIZE: usize = 2 * 24_576;
}

/// Constants for the Cancun rules.
pub mod cancun {
    /// Default target number of blobs per block.
    pub const TARGET_BLOBS_PER_BLOCK: u64 = 3;
    /// Default maximum number of blobs per block.
    pub const MAX_BLOBS_PER_BLOCK: u64 = 6;
    /// Default blob base fee update fraction.
    pub const BLOB_BASE_FEE_UPDATE_FRACTION: u64 = 3_338_477;
}

/// Constants for the Prague rules.
pub mod prague {
    /// Default target number of blobs per block (EIP-7691).
    pub const TARGET_BLOBS_PER_BLOCK: u64 = 6;
    /// Default maximum number of blobs per block (EIP-7691).
    pub const MAX_BLOBS_PER_BLOCK: u64 = 9;
    /// Default blob base fee update fraction (EIP-7691).
    pub const BLOB_BASE_FEE_UPDATE_FRACTION: u64 = 5_007_716;
    /// Intrinsic cost of one authorization tuple (EIP-7702).
    pub const PER_EMPTY_ACCOUNT_COST: u64 = 25_000;
    /// Part of the authorization cost that stays charged when the authority already exists.
    pub const PER_AUTH_BASE_COST: u64 = 12_500;
    /// Calldata floor cost per token (EIP-7623).
    pub const TOTAL_COST_FLOOR_PER_TOKEN: u64 = 10;
    /// Number of calldata tokens a non-zero byte counts for (EIP-7623).
    pub const NON_ZERO_BYTE_TOKENS: u64 = 4;
}

/// Gas ceiling of a single system call. System calls never draw from the block gas pool.
pub const SYS_CALL_GAS_LIMIT: u64 = 30_000_000;

/// Incarnation assumed for accounts whose stored incarnation is zero when probing the legacy
/// code-pointer table.
pub const DEFAULT_INCARNATION: u64 = 1;

/// Default number of entries held by the read-through cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 64 * 1024;
