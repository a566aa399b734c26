//! Block gas and blob-gas accounting.
//!
//! A [`GasPool`] starts each block with the header gas limit and the blob gas allowed at the
//! block timestamp. Transactions draw their gas limit from it up front and hand back what they
//! did not use. System calls never touch it.

/// Error raised by a [`GasPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GasPoolError {
    /// Not enough gas left in the block.
    #[error("gas limit reached: have={have} < want={want}")]
    GasLimitReached {
        /// Gas left in the pool
        have: u64,
        /// Gas requested
        want: u64,
    },
    /// Not enough blob gas left in the block.
    #[error("blob gas limit reached: have={have} < want={want}")]
    BlobGasLimitReached {
        /// Blob gas left in the pool
        have: u64,
        /// Blob gas requested
        want: u64,
    },
    /// Adding to the pool would overflow it.
    #[error("gas pool overflow: have={have} + add={add}")]
    Overflow {
        /// Amount in the pool
        have: u64,
        /// Amount added
        add: u64,
    },
}

/// Gas and blob gas still available to the transactions of a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GasPool {
    gas: u64,
    blob_gas: u64,
}

impl GasPool {
    /// Creates an empty pool.
    pub const fn new() -> Self {
        Self { gas: 0, blob_gas: 0 }
    }

    /// Makes `amount` more gas available.
    pub fn add_gas(&mut self, amount: u64) -> Result<&mut Self, GasPoolError> {
        self.gas = self
            .gas
            .checked_add(amount)
            .ok_or(GasPoolError::Overflow { have: self.gas, add: amount })?;
        Ok(self)
    }

    /// Takes `amount` gas out of the pool.
    pub fn sub_gas(&mut self, amount: u64) -> Result<(), GasPoolError> {
        if self.gas < amount {
            return Err(GasPoolError::GasLimitReached { have: self.gas, want: amount });
        }
        self.gas -= amount;
        Ok(())
    }

    /// Makes `amount` more blob gas available.
    pub fn add_blob_gas(&mut self, amount: u64) -> Result<&mut Self, GasPoolError> {
        self.blob_gas = self
            .blob_gas
            .checked_add(amount)
            .ok_or(GasPoolError::Overflow { have: self.blob_gas, add: amount })?;
        Ok(self)
    }

    /// Takes `amount` blob gas out of the pool.
    pub fn sub_blob_gas(&mut self, amount: u64) -> Result<(), GasPoolError> {
        if self.blob_gas < amount {
            return Err(GasPoolError::BlobGasLimitReached { have: self.blob_gas, want: amount });
        }
        self.blob_gas -= amount;
        Ok(())
    }

    /// Gas left in the pool.
    pub const fn gas(&self) -> u64 {
        self.gas
    }

    /// Blob gas left in the pool.
    pub const fn blob_gas(&self) -> u64 {
        self.blob_gas
    }

    /// Overwrites the gas left in the pool.
    pub fn set_gas(&mut self, gas: u64) {
        self.gas = gas;
    }

    /// Overwrites the blob gas left in the pool.
    pub fn set_blob_gas(&mut self, blob_gas: u64) {
        self.blob_gas = blob_gas;
    }
}

impl core::fmt::Display for GasPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "gas: {}, blob gas: {}", self.gas, self.blob_gas)
    }
}
