use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors arising from price reads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    #[error("{feed} price must be positive, got {price}")]
    NonPositive { feed: &'static str, price: Decimal },
    #[error("{0} price is unavailable")]
    Unavailable(&'static str),
}

/// Source of the current prices consumed by each operation.
///
/// Prices are read once per operation and never cached across operations.
pub trait PriceFeed {
    /// Price of one unit of reserve asset, quoted in Doc.
    fn reserve_price(&self) -> Result<Decimal, PriceError>;

    /// Price of one unit of fee token, quoted in Doc.
    fn fee_token_price(&self) -> Result<Decimal, PriceError>;
}

/// Prices read for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub reserve_price: Decimal,
    pub fee_token_price: Decimal,
}

impl PriceSnapshot {
    /// Read both prices, rejecting non-positive values.
    pub fn read(feed: &dyn PriceFeed) -> Result<Self, PriceError> {
        let reserve_price = feed.reserve_price()?;
        if reserve_price <= Decimal::ZERO {
            return Err(PriceError::NonPositive {
                feed: "reserve",
                price: reserve_price,
            });
        }
        let fee_token_price = feed.fee_token_price()?;
        if fee_token_price <= Decimal::ZERO {
            return Err(PriceError::NonPositive {
                feed: "fee token",
                price: fee_token_price,
            });
        }
        Ok(Self {
            reserve_price,
            fee_token_price,
        })
    }
}

/// A price feed holding fixed values, updated explicitly.
///
/// # Examples
///
/// ```
/// use collateral_engine::market::price::{FixedPriceFeed, PriceFeed};
/// use rust_decimal_macros::dec;
///
/// let mut feed = FixedPriceFeed::new(dec!(10000));
/// feed.set_reserve_price(dec!(3400));
/// assert_eq!(feed.reserve_price().unwrap(), dec!(3400));
/// // The fee token follows the reserve price until set explicitly.
/// assert_eq!(feed.fee_token_price().unwrap(), dec!(10000));
/// ```
#[derive(Debug, Clone)]
pub struct FixedPriceFeed {
    reserve_price: Decimal,
    fee_token_price: Decimal,
}

impl FixedPriceFeed {
    pub fn new(reserve_price: Decimal) -> Self {
        Self {
            reserve_price,
            fee_token_price: reserve_price,
        }
    }

    pub fn with_fee_token_price(mut self, price: Decimal) -> Self {
        self.fee_token_price = price;
        self
    }

    pub fn set_reserve_price(&mut self, price: Decimal) {
        self.reserve_price = price;
    }

    pub fn set_fee_token_price(&mut self, price: Decimal) {
        self.fee_token_price = price;
    }
}

impl PriceFeed for FixedPriceFeed {
    fn reserve_price(&self) -> Result<Decimal, PriceError> {
        Ok(self.reserve_price)
    }

    fn fee_token_price(&self) -> Result<Decimal, PriceError> {
        Ok(self.fee_token_price)
    }
}
