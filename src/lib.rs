//! # collateral-engine
//!
//! Accounting and lifecycle core of a reserve-backed, multi-token
//! stable-value protocol.
//!
//! A shared reserve backs a stable token (Doc), an equity token (BPro) and
//! leveraged tokens (BProx) issued per named bucket. The engine keeps the
//! collateral ledger, gates every operation on the global solvency state,
//! drains queued Doc redemptions in resumable batches and winds the system
//! down for good once coverage falls below the liquidation threshold.
//!
//! ## Architecture
//!
//! - **core**: Foundational types such as fixed-point math, ids, buckets, config, events, errors
//! - **market**: Seams to the outside: price feed and asset ledger
//! - **engine**: Interest and fee calculator, solvency state, collateral ledger
//! - **settlement**: Settlement schedule, redemption queue, batch processor
//! - **liquidation**: One-way liquidation and position close-out
//! - **protocol**: Facade that wires the components and journals events
//! - **simulation**: Random command generation for stress runs

pub mod core;
pub mod engine;
pub mod liquidation;
pub mod market;
pub mod protocol;
pub mod settlement;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::core::account::AccountId;
    pub use crate::core::config::{FeeRates, LeveragedBucketConfig, ProtocolConfig};
    pub use crate::core::error::{CoreError, CoreResult, StateError, ValidationError};
    pub use crate::core::event::{EventRecord, ExchangeEvent, ProtocolEvent};
    pub use crate::core::token::{BucketId, OperationKind, TokenKind};
    pub use crate::engine::collateral::ExchangeRequest;
    pub use crate::engine::state::{Coverage, GlobalState};
    pub use crate::engine::vendors::VendorStake;
    pub use crate::market::ledger::{AssetLedger, InMemoryAssetLedger};
    pub use crate::market::price::{FixedPriceFeed, PriceFeed};
    pub use crate::protocol::{Command, Protocol};
}
