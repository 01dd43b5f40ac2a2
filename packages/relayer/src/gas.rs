//! Gas policy: static ceilings applied before anything is signed.

use crate::chain::FeeEstimate;
use crate::error::RelayError;

/// Fee and gas ceilings for forwarder transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    /// Ceiling on the outer transaction's gas limit.
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    /// Gas the forwarder itself spends around the inner call.
    pub forwarder_overhead: u64,
}

/// Gas parameters for one forwarder transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasQuote {
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl GasPolicy {
    /// Outer gas limit needed for an inner budget of `declared`.
    fn outer_gas(&self, declared: u64) -> Option<u64> {
        declared.checked_add(self.forwarder_overhead)
    }

    /// Static check on the caller-declared inner gas budget.
    pub fn check_declared_gas(&self, declared: u64) -> Result<u64, RelayError> {
        match self.outer_gas(declared) {
            Some(total) if declared <= self.gas_limit && total <= self.gas_limit => Ok(total),
            _ => Err(RelayError::GasPolicyViolation(format!(
                "declared gas {declared} plus forwarder overhead {} exceeds gas limit {}",
                self.forwarder_overhead, self.gas_limit
            ))),
        }
    }

    /// Combine the declared budget with current fee-market conditions.
    pub fn quote(&self, declared: u64, market: FeeEstimate) -> Result<GasQuote, RelayError> {
        let gas_limit = self.check_declared_gas(declared)?;

        if market.max_fee_per_gas > self.max_fee_per_gas {
            return Err(RelayError::GasPolicyViolation(format!(
                "network max fee {} wei exceeds ceiling {} wei",
                market.max_fee_per_gas, self.max_fee_per_gas
            )));
        }

        let priority = market
            .max_priority_fee_per_gas
            .min(self.max_priority_fee_per_gas);
        let max_fee = market.max_fee_per_gas.max(priority);

        Ok(GasQuote {
            gas_limit,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
        })
    }
}
