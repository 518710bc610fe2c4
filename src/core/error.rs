use crate::core::account::AccountId;
use crate::core::fixed::MathError;
use crate::core::token::{BucketId, TokenKind};
use crate::engine::state::GlobalState;
use crate::market::price::PriceError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Top-level error for every command of the protocol.
///
/// A command that returns an error has not mutated any ledger.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("operation not allowed: {0}")]
    State(#[from] StateError),
    #[error("insufficient {asset} funds for {account}: available {available}, required {required}")]
    InsufficientFunds {
        account: AccountId,
        asset: String,
        available: Decimal,
        required: Decimal,
    },
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Math(#[from] MathError),
    #[error(transparent)]
    Price(#[from] PriceError),
}

impl CoreError {
    pub fn insufficient(
        account: &AccountId,
        asset: impl Into<String>,
        available: Decimal,
        required: Decimal,
    ) -> Self {
        CoreError::InsufficientFunds {
            account: account.clone(),
            asset: asset.into(),
            available,
            required,
        }
    }
}

/// Invalid input to an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("unknown bucket {0}")]
    UnknownBucket(BucketId),
    #[error("{token} requires a leveraged bucket")]
    BucketRequired { token: TokenKind },
    #[error("{token} cannot be used with bucket {bucket}")]
    BucketNotAllowed { token: TokenKind, bucket: BucketId },
    #[error("no capacity left to {operation} {token}")]
    NoCapacity { operation: &'static str, token: TokenKind },
    #[error("no pending redeem request for {0}")]
    UnknownRedeemRequest(AccountId),
    #[error("fees {fees} exceed the redeemed value {value}")]
    FeesExceedValue { fees: Decimal, value: Decimal },
    #[error("nothing to redeem for {0}")]
    NothingToRedeem(AccountId),
    #[error("{0} is not a registered vendor")]
    UnknownVendor(AccountId),
}

/// The global state or the settlement phase forbids the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("the system is liquidated")]
    Liquidated,
    #[error("function can only be called when the system is liquidated")]
    NotLiquidated,
    #[error("function requires state {required}, current state is {current}")]
    RequiresState {
        required: GlobalState,
        current: GlobalState,
    },
    #[error("function can only be called when settlement is ready")]
    SettlementNotReady,
    #[error("token {0} is paused")]
    TokenPaused(TokenKind),
    #[error("the system is paused")]
    Paused,
}

/// Invalid or unresolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("fee token reference is not configured")]
    UnresolvedFeeToken,
    #[error("coverage thresholds must satisfy 1 <= liquidation < discount < target")]
    InvalidCoverageThresholds,
    #[error("rate {name} must be in [0, 1), got {value}")]
    InvalidRate { name: String, value: Decimal },
    #[error("leveraged bucket {0} must have a target coverage above 1")]
    InvalidLeverage(BucketId),
    #[error("bucket {0} is declared more than once")]
    DuplicateBucket(BucketId),
    #[error("the set of leveraged buckets cannot change after start")]
    BucketSetChanged,
    #[error("block spans must be positive")]
    InvalidBlockSpan,
}

pub type CoreResult<T> = Result<T, CoreError>;
