use crate::core::bucket::BucketLedger;
use crate::core::config::CoverageThresholds;
use crate::core::fixed::{self, MathError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Solvency state of the whole system.
///
/// Derived from coverage after every mutating operation. `Liquidated` is
/// absorbing: once entered, no recomputation leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlobalState {
    Liquidated,
    BelowTarget,
    AtTarget,
    AboveTarget,
}

impl fmt::Display for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GlobalState::Liquidated => "Liquidated",
            GlobalState::BelowTarget => "BelowTarget",
            GlobalState::AtTarget => "AtTarget",
            GlobalState::AboveTarget => "AboveTarget",
        };
        write!(f, "{}", name)
    }
}

/// Reserve value over stable liability value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coverage {
    /// No liability outstanding.
    Infinite,
    Finite(Decimal),
}

impl Coverage {
    /// `reserve * price / liability`, truncated.
    pub fn compute(reserve: Decimal, liability: Decimal, price: Decimal) -> Result<Self, MathError> {
        if liability.is_zero() {
            return Ok(Coverage::Infinite);
        }
        Ok(Coverage::Finite(fixed::mul_div(reserve, price, liability)?))
    }

    /// Coverage of all buckets together.
    pub fn of_ledger(ledger: &BucketLedger, price: Decimal) -> Result<Self, MathError> {
        Self::compute(ledger.total_reserve(), ledger.total_stable_liability(), price)
    }

    pub fn at_or_below(&self, threshold: Decimal) -> bool {
        match self {
            Coverage::Infinite => false,
            Coverage::Finite(value) => *value <= threshold,
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        match self {
            Coverage::Infinite => None,
            Coverage::Finite(value) => Some(*value),
        }
    }

    /// Lossy view for reporting.
    pub fn ratio(&self) -> f64 {
        match self {
            Coverage::Infinite => f64::INFINITY,
            Coverage::Finite(value) => value.to_f64().unwrap_or(f64::INFINITY),
        }
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coverage::Infinite => write!(f, "inf"),
            Coverage::Finite(value) => write!(f, "{}", value.round_dp(4)),
        }
    }
}

/// Classify a coverage ratio, ignoring any previous state.
pub fn classify(coverage: Coverage, thresholds: &CoverageThresholds) -> GlobalState {
    if coverage.at_or_below(thresholds.liquidation) {
        GlobalState::Liquidated
    } else if coverage.at_or_below(thresholds.discount) {
        GlobalState::BelowTarget
    } else if coverage.at_or_below(thresholds.target) {
        GlobalState::AtTarget
    } else {
        GlobalState::AboveTarget
    }
}

/// The state after a recomputation.
///
/// Liquidation is only ever committed by the liquidation controller, so a
/// solvent state never becomes `Liquidated` here; a breached coverage is
/// reported as `BelowTarget` until the controller acts.
///
/// # Examples
///
/// ```
/// use collateral_engine::core::config::CoverageThresholds;
/// use collateral_engine::engine::state::{next_state, Coverage, GlobalState};
/// use rust_decimal_macros::dec;
///
/// let thresholds = CoverageThresholds::default();
/// let state = next_state(GlobalState::AtTarget, Coverage::Finite(dec!(4)), &thresholds);
/// assert_eq!(state, GlobalState::AboveTarget);
///
/// let state = next_state(GlobalState::Liquidated, Coverage::Infinite, &thresholds);
/// assert_eq!(state, GlobalState::Liquidated);
/// ```
pub fn next_state(
    current: GlobalState,
    coverage: Coverage,
    thresholds: &CoverageThresholds,
) -> GlobalState {
    if current == GlobalState::Liquidated {
        return GlobalState::Liquidated;
    }
    match classify(coverage, thresholds) {
        GlobalState::Liquidated => GlobalState::BelowTarget,
        other => other,
    }
}

/// Snapshot of solvency figures, for logs and demos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageReport {
    pub state: GlobalState,
    pub reserve_price: Decimal,
    pub total_reserve: Decimal,
    pub total_stable_liability: Decimal,
    pub global_coverage: Coverage,
    pub base_coverage: Coverage,
    pub thresholds: CoverageThresholds,
}

impl CoverageReport {
    pub fn new(
        state: GlobalState,
        ledger: &BucketLedger,
        price: Decimal,
        thresholds: &CoverageThresholds,
    ) -> Result<Self, MathError> {
        let base = ledger.base();
        Ok(Self {
            state,
            reserve_price: price,
            total_reserve: ledger.total_reserve(),
            total_stable_liability: ledger.total_stable_liability(),
            global_coverage: Coverage::of_ledger(ledger, price)?,
            base_coverage: Coverage::compute(base.total_reserve(), base.stable_liability, price)?,
            thresholds: thresholds.clone(),
        })
    }

    /// Distance of global coverage above the liquidation threshold, as a ratio.
    pub fn liquidation_headroom(&self) -> f64 {
        let threshold = self.thresholds.liquidation.to_f64().unwrap_or(1.0);
        self.global_coverage.ratio() / threshold - 1.0
    }
}

impl fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Coverage Report ===")?;
        writeln!(f, "State:            {}", self.state)?;
        writeln!(f, "Reserve Price:    {}", self.reserve_price)?;
        writeln!(f, "Total Reserve:    {}", self.total_reserve)?;
        writeln!(f, "Stable Liability: {}", self.total_stable_liability)?;
        writeln!(f, "Global Coverage:  {}", self.global_coverage)?;
        writeln!(f, "Base Coverage:    {}", self.base_coverage)?;

        writeln!(f, "\nThresholds:")?;
        writeln!(f, "  liquidation: {}", self.thresholds.liquidation)?;
        writeln!(f, "  discount:    {}", self.thresholds.discount)?;
        writeln!(f, "  target:      {}", self.thresholds.target)?;
        Ok(())
    }
}
