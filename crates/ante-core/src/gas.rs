//! Gas metering for untrusted assertion predicates.
//!
//! A predicate receives a [`GasMeter`] holding the forwarded budget and must
//! charge it for its work. Exhausting the budget surfaces as
//! [`PredicateError::OutOfGas`], which the pool treats as a failed test.

use crate::constants::GAS_RESERVE_DIVISOR;
use crate::error::PredicateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasMeter {
    limit: u64,
    used: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Splits `gas_limit` into the forwarded budget and the held-back
    /// reserve (`gas_limit / 64`).
    pub fn forwarded(gas_limit: u64) -> (Self, u64) {
        let reserve = gas_limit / GAS_RESERVE_DIVISOR;
        (Self::new(gas_limit - reserve), reserve)
    }

    /// Charge `amount`; the meter saturates at its limit on failure.
    pub fn consume(&mut self, amount: u64) -> Result<(), PredicateError> {
        match self.used.checked_add(amount) {
            Some(total) if total <= self.limit => {
                self.used = total;
                Ok(())
            }
            _ => {
                self.used = self.limit;
                Err(PredicateError::OutOfGas)
            }
        }
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}
