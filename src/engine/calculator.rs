//! Interest and commission math.
//!
//! Everything here is pure: inputs in, amounts out, no ledger access except
//! the read-only balance and allowance checks that pick the fee currency.

use crate::core::account::AccountId;
use crate::core::config::{InterestCurve, ProtocolConfig};
use crate::core::event::FeeAmounts;
use crate::core::fixed::{self, MathError};
use crate::core::token::OperationKind;
use crate::engine::vendors::VendorTerms;
use crate::market::ledger::AssetLedger;
use crate::market::price::PriceSnapshot;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whole days left until the next settlement block.
///
/// # Examples
///
/// ```
/// use collateral_engine::engine::calculator::days_to_settlement;
///
/// assert_eq!(days_to_settlement(0, 20_160, 2_880), 7);
/// assert_eq!(days_to_settlement(2_000, 20_160, 2_880), 6);
/// assert_eq!(days_to_settlement(30_000, 20_160, 2_880), 0);
/// ```
pub fn days_to_settlement(block: u64, next_settlement_block: u64, day_block_span: u64) -> u64 {
    if day_block_span == 0 {
        return 0;
    }
    next_settlement_block.saturating_sub(block) / day_block_span
}

/// Leverage of a bucket kept at `target_coverage`: `c / (c - 1)`.
pub fn leverage(target_coverage: Decimal) -> Result<Decimal, MathError> {
    fixed::div(target_coverage, target_coverage - Decimal::ONE)
}

/// Share of the Doc liability lent out to leveraged buckets.
pub fn utilization(borrowed: Decimal, free: Decimal) -> Result<Decimal, MathError> {
    let total = borrowed + free;
    if total <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    fixed::div(borrowed, total)
}

/// Daily rate at utilization `u`: `min + (max - min) * u^power`.
pub fn interest_rate(curve: &InterestCurve, u: Decimal) -> Result<Decimal, MathError> {
    let spread = curve.max_rate - curve.min_rate;
    Ok(curve.min_rate + fixed::mul(spread, fixed::pow(u, curve.power)?)?)
}

/// Average of the rates before and after moving `delta` Doc from free to
/// borrowed. A negative delta repays.
pub fn average_rate(
    curve: &InterestCurve,
    borrowed: Decimal,
    free: Decimal,
    delta: Decimal,
) -> Result<Decimal, MathError> {
    let before = interest_rate(curve, utilization(borrowed, free)?)?;
    let borrowed_after = (borrowed + delta).max(Decimal::ZERO);
    let free_after = (free - delta).max(Decimal::ZERO);
    let after = interest_rate(curve, utilization(borrowed_after, free_after)?)?;
    fixed::div(before + after, Decimal::TWO)
}

/// Interest charged when minting: `rate * amount * days`.
pub fn mint_interest(rate: Decimal, amount: Decimal, days: u64) -> Result<Decimal, MathError> {
    fixed::mul(fixed::mul(rate, amount)?, Decimal::from(days))
}

/// Interest recovered when redeeming.
///
/// One day fewer than a mint would pay, since the current day was already
/// charged at settlement. Never more than what the bucket has collected.
pub fn redeem_interest(
    rate: Decimal,
    amount: Decimal,
    days: u64,
    collected: Decimal,
) -> Result<Decimal, MathError> {
    let recovered = fixed::mul(fixed::mul(rate, amount)?, Decimal::from(days.saturating_sub(1)))?;
    Ok(recovered.min(collected))
}

/// Currency a fee is paid in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeCurrency {
    Reserve,
    FeeToken,
}

/// Commission and vendor markup for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub currency: FeeCurrency,
    pub commission: FeeAmounts,
    pub vendor_fee: FeeAmounts,
}

impl FeeQuote {
    pub fn free() -> Self {
        Self {
            currency: FeeCurrency::Reserve,
            commission: FeeAmounts::default(),
            vendor_fee: FeeAmounts::default(),
        }
    }

    /// Reserve-denominated part of the fees.
    pub fn reserve_total(&self) -> Decimal {
        self.commission.reserve.saturating_add(self.vendor_fee.reserve)
    }

    /// Fee-token-denominated part of the fees.
    pub fn fee_token_total(&self) -> Decimal {
        self.commission.fee_token.saturating_add(self.vendor_fee.fee_token)
    }
}

/// Commission and vendor fee for an operation moving `value` of reserve.
///
/// The fee token is used only when it is configured and `account` holds
/// enough of it, with enough allowance, to cover both fees. Otherwise both
/// fees are charged in reserve.
///
/// A vendor's markup applies only while its fee-token value fits in the
/// vendor's remaining stake.
pub fn commission_and_vendor_fee<L: AssetLedger + ?Sized>(
    config: &ProtocolConfig,
    ledger: &L,
    account: &AccountId,
    operation: OperationKind,
    value: Decimal,
    vendor: Option<&VendorTerms<'_>>,
    prices: &PriceSnapshot,
) -> Result<FeeQuote, MathError> {
    let rates = config.fees.rates(operation);
    let markup = match vendor {
        Some(terms) if !terms.markup.is_zero() => {
            let charge = fixed::mul(value_in_fee_token(value, prices)?, terms.markup)?;
            if charge <= terms.capacity {
                terms.markup
            } else {
                debug!(
                    "vendor {} stake covers {} of a {} markup, charging none",
                    terms.account, terms.capacity, charge
                );
                Decimal::ZERO
            }
        }
        _ => Decimal::ZERO,
    };

    match config.resolved_fee_token() {
        Ok(_) => {
            let in_fee_token = value_in_fee_token(value, prices)?;
            let commission = fixed::mul(in_fee_token, rates.fee_token_rate)?;
            let vendor_fee = fixed::mul(in_fee_token, markup)?;
            let total = fixed::add(commission, vendor_fee)?;
            if ledger.fee_token_balance(account) >= total
                && ledger.fee_token_allowance(account) >= total
            {
                return Ok(FeeQuote {
                    currency: FeeCurrency::FeeToken,
                    commission: FeeAmounts::in_fee_token(commission),
                    vendor_fee: FeeAmounts::in_fee_token(vendor_fee),
                });
            }
        }
        Err(e) if config.fee_token.is_some() => {
            warn!("{}, charging {} fees in reserve", e, operation)
        }
        Err(_) => {}
    }

    Ok(FeeQuote {
        currency: FeeCurrency::Reserve,
        commission: FeeAmounts::in_reserve(fixed::mul(value, rates.reserve_rate)?),
        vendor_fee: FeeAmounts::in_reserve(fixed::mul(value, markup)?),
    })
}

/// Reserve `value` expressed in fee token.
pub fn value_in_fee_token(value: Decimal, prices: &PriceSnapshot) -> Result<Decimal, MathError> {
    fixed::mul_div(value, prices.reserve_price, prices.fee_token_price)
}

/// A charged vendor fee valued in fee token, whichever currency it was paid in.
pub fn vendor_fee_in_fee_token(fee: &FeeAmounts, prices: &PriceSnapshot) -> Result<Decimal, MathError> {
    fixed::add(fee.fee_token, value_in_fee_token(fee.reserve, prices)?)
}
