use crate::core::account::AccountId;
use crate::core::error::{CoreError, CoreResult};
use crate::core::fixed::{self, MathError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fee token a vendor keeps staked, and the markup charged against it
/// since the last settlement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorStake {
    pub staked: Decimal,
    /// Markup collected this cycle, valued in fee token.
    pub paid: Decimal,
}

impl VendorStake {
    /// Markup the vendor can still collect this cycle.
    pub fn available(&self) -> Decimal {
        fixed::saturating_sub(self.staked, self.paid)
    }
}

/// What the fee calculator needs to know about the vendor on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorTerms<'a> {
    pub account: &'a AccountId,
    pub markup: Decimal,
    /// Largest markup, in fee token, the vendor may still collect.
    pub capacity: Decimal,
}

/// Stakes of registered vendors.
///
/// A vendor only earns its markup on an order while the markup fits in
/// its unspent stake. Paid markup resets when a settlement completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorStakes {
    stakes: BTreeMap<AccountId, VendorStake>,
}

impl VendorStakes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, vendor: &AccountId) -> VendorStake {
        self.stakes.get(vendor).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &VendorStake)> {
        self.stakes.iter()
    }

    /// Grow a stake. Returns the new staked total.
    pub fn add(&mut self, vendor: &AccountId, amount: Decimal) -> Result<Decimal, MathError> {
        let stake = self.stakes.entry(vendor.clone()).or_default();
        stake.staked = fixed::add(stake.staked, amount)?;
        Ok(stake.staked)
    }

    /// Shrink a stake by at most its unspent part. Returns the new staked total.
    pub fn remove(&mut self, vendor: &AccountId, amount: Decimal) -> CoreResult<Decimal> {
        let stake = self.get(vendor);
        let available = stake.available();
        if amount > available {
            return Err(CoreError::insufficient(vendor, "vendor stake", available, amount));
        }
        let staked = stake.staked - amount;
        if staked.is_zero() && stake.paid.is_zero() {
            self.stakes.remove(vendor);
        } else if let Some(entry) = self.stakes.get_mut(vendor) {
            entry.staked = staked;
        }
        Ok(staked)
    }

    pub fn record_paid(&mut self, vendor: &AccountId, amount: Decimal) -> Result<(), MathError> {
        let stake = self.stakes.entry(vendor.clone()).or_default();
        stake.paid = fixed::add(stake.paid, amount)?;
        Ok(())
    }

    pub fn reset_paid(&mut self) {
        for stake in self.stakes.values_mut() {
            stake.paid = Decimal::ZERO;
        }
    }
}
