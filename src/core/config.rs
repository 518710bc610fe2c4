//! Protocol configuration.
//!
//! A [`ProtocolConfig`] is always replaced as a whole: edits happen on a
//! copy, the copy is validated, and only then swapped in.

use crate::core::account::AccountId;
use crate::core::error::ConfigurationError;
use crate::core::token::{BucketId, OperationKind};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Coverage thresholds driving the global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageThresholds {
    /// At or below this coverage the system liquidates.
    pub liquidation: Decimal,
    /// At or below this coverage BPro mints at a discount.
    pub discount: Decimal,
    /// Target coverage of the base bucket.
    pub target: Decimal,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            liquidation: dec!(1.04),
            discount: dec!(2),
            target: dec!(3),
        }
    }
}

/// Daily interest rate as a function of Doc utilization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestCurve {
    pub min_rate: Decimal,
    pub max_rate: Decimal,
    pub power: u32,
}

impl Default for InterestCurve {
    fn default() -> Self {
        Self {
            min_rate: dec!(0.0001),
            max_rate: dec!(0.001),
            power: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeveragedBucketConfig {
    pub id: BucketId,
    /// Coverage the bucket is kept at; leverage is `target / (target - 1)`.
    pub target_coverage: Decimal,
    #[serde(default)]
    pub interest: InterestCurve,
}

impl LeveragedBucketConfig {
    pub fn new(id: impl Into<String>, target_coverage: Decimal) -> Self {
        Self {
            id: BucketId::new(id),
            target_coverage,
            interest: InterestCurve::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Blocks between two settlements.
    pub block_span: u64,
    /// Blocks in a day, used to turn blocks into interest days.
    pub day_block_span: u64,
    /// Block of the first settlement.
    pub first_settlement_block: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            block_span: 20_160,
            day_block_span: 2_880,
            first_settlement_block: 20_160,
        }
    }
}

/// Commission rates for one operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeRates {
    /// Rate applied when the fee is paid in reserve asset.
    pub reserve_rate: Decimal,
    /// Rate applied when the fee is paid in fee token.
    pub fee_token_rate: Decimal,
}

impl FeeRates {
    pub fn new(reserve_rate: Decimal, fee_token_rate: Decimal) -> Self {
        Self {
            reserve_rate,
            fee_token_rate,
        }
    }
}

/// Commission rates per operation kind. Missing kinds are free.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeParameters {
    rates: BTreeMap<OperationKind, FeeRates>,
}

impl FeeParameters {
    pub fn rates(&self, operation: OperationKind) -> FeeRates {
        self.rates.get(&operation).copied().unwrap_or_default()
    }

    pub fn set(&mut self, operation: OperationKind, rates: FeeRates) {
        self.rates.insert(operation, rates);
    }

    pub fn with(mut self, operation: OperationKind, rates: FeeRates) -> Self {
        self.set(operation, rates);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OperationKind, &FeeRates)> {
        self.rates.iter()
    }
}

/// A registered transaction originator and its markup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub markup: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub coverage: CoverageThresholds,
    /// Discount applied to BPro mints at the liquidation threshold.
    pub max_discount_rate: Decimal,
    pub leveraged_buckets: Vec<LeveragedBucketConfig>,
    pub settlement: SettlementConfig,
    pub fees: FeeParameters,
    /// Reference to the fee token. Absent, empty or zero-address means unresolved.
    pub fee_token: Option<String>,
    pub commission_account: AccountId,
    pub vendors: BTreeMap<AccountId, Vendor>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            coverage: CoverageThresholds::default(),
            max_discount_rate: dec!(0.5),
            leveraged_buckets: vec![LeveragedBucketConfig::new("X2", dec!(2))],
            settlement: SettlementConfig::default(),
            fees: FeeParameters::default(),
            fee_token: None,
            commission_account: AccountId::commissions(),
            vendors: BTreeMap::new(),
        }
    }
}

impl ProtocolConfig {
    pub fn leveraged_bucket(&self, id: &BucketId) -> Option<&LeveragedBucketConfig> {
        self.leveraged_buckets.iter().find(|b| &b.id == id)
    }

    pub fn bucket_ids(&self) -> BTreeSet<BucketId> {
        self.leveraged_buckets.iter().map(|b| b.id.clone()).collect()
    }

    /// Markup of a vendor; unregistered vendors charge nothing.
    pub fn vendor_markup(&self, vendor: Option<&AccountId>) -> Decimal {
        vendor
            .and_then(|v| self.vendors.get(v))
            .map(|v| v.markup)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn is_vendor(&self, account: &AccountId) -> bool {
        self.vendors.contains_key(account)
    }

    pub fn register_vendor(&mut self, account: AccountId, markup: Decimal) {
        self.vendors.insert(account, Vendor { markup });
    }

    /// The fee token reference, if it resolves to something usable.
    pub fn resolved_fee_token(&self) -> Result<&str, ConfigurationError> {
        match self.fee_token.as_deref() {
            Some(token) if !token.is_empty() && !is_zero_address(token) => Ok(token),
            _ => Err(ConfigurationError::UnresolvedFeeToken),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let c = &self.coverage;
        if !(c.liquidation >= Decimal::ONE && c.liquidation < c.discount && c.discount < c.target) {
            return Err(ConfigurationError::InvalidCoverageThresholds);
        }
        check_rate("max_discount_rate", self.max_discount_rate)?;

        let mut seen = BTreeSet::new();
        for bucket in &self.leveraged_buckets {
            if bucket.id.is_base() || !seen.insert(bucket.id.clone()) {
                return Err(ConfigurationError::DuplicateBucket(bucket.id.clone()));
            }
            if bucket.target_coverage <= Decimal::ONE {
                return Err(ConfigurationError::InvalidLeverage(bucket.id.clone()));
            }
            check_rate(&format!("{}.min_rate", bucket.id), bucket.interest.min_rate)?;
            check_rate(&format!("{}.max_rate", bucket.id), bucket.interest.max_rate)?;
        }

        if self.settlement.block_span == 0 || self.settlement.day_block_span == 0 {
            return Err(ConfigurationError::InvalidBlockSpan);
        }

        for (operation, rates) in self.fees.iter() {
            check_rate(&format!("{}.reserve_rate", operation), rates.reserve_rate)?;
            check_rate(&format!("{}.fee_token_rate", operation), rates.fee_token_rate)?;
        }
        for (account, vendor) in &self.vendors {
            check_rate(&format!("vendor {} markup", account), vendor.markup)?;
        }
        Ok(())
    }
}

fn check_rate(name: &str, value: Decimal) -> Result<(), ConfigurationError> {
    if value < Decimal::ZERO || value >= Decimal::ONE {
        return Err(ConfigurationError::InvalidRate {
            name: name.to_string(),
            value,
        });
    }
    Ok(())
}

fn is_zero_address(reference: &str) -> bool {
    let digits = reference.strip_prefix("0x").unwrap_or(reference);
    !digits.is_empty() && digits.chars().all(|c| c == '0')
}
