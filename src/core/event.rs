use crate::core::account::AccountId;
use crate::core::fixed::{self, MathError};
use crate::core::token::{BucketId, OperationKind, TokenKind};
use crate::engine::state::GlobalState;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An amount split by the currency it was paid in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAmounts {
    pub reserve: Decimal,
    pub fee_token: Decimal,
}

impl FeeAmounts {
    pub fn in_reserve(amount: Decimal) -> Self {
        Self {
            reserve: amount,
            fee_token: Decimal::ZERO,
        }
    }

    pub fn in_fee_token(amount: Decimal) -> Self {
        Self {
            reserve: Decimal::ZERO,
            fee_token: amount,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.reserve.is_zero() && self.fee_token.is_zero()
    }
}

/// Outcome of a mint, a redeem, or a post-liquidation Doc exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeEvent {
    pub operation: OperationKind,
    pub token: TokenKind,
    pub account: AccountId,
    pub bucket: BucketId,
    /// Tokens minted or burned.
    pub amount: Decimal,
    /// Reserve principal moved, before interest and fees.
    pub reserve_total: Decimal,
    /// Interest charged on a mint, or recovered on a redeem.
    pub interest: Decimal,
    pub commission: FeeAmounts,
    pub vendor_fee: FeeAmounts,
    pub vendor: Option<AccountId>,
    pub reserve_price: Decimal,
}

impl ExchangeEvent {
    /// Reserve the caller paid (mint) or received (redeem), all-in.
    pub fn reserve_settled(&self) -> Result<Decimal, MathError> {
        let gross = fixed::add(self.reserve_total, self.interest)?;
        let fees = fixed::add(self.commission.reserve, self.vendor_fee.reserve)?;
        if self.operation.is_mint() {
            fixed::add(gross, fees)
        } else {
            fixed::sub(gross, fees)
        }
    }
}

/// Everything observable the protocol does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    Exchange(ExchangeEvent),
    RedeemRequestQueued {
        account: AccountId,
        amount: Decimal,
        sequence: u64,
    },
    RedeemRequestAltered {
        account: AccountId,
        is_increase: bool,
        delta: Decimal,
        amount: Decimal,
    },
    SettlementStarted {
        pending_requests: usize,
        reserve_price: Decimal,
    },
    RedeemRequestProcessed {
        account: AccountId,
        requested: Decimal,
        filled: Decimal,
        reserve_paid: Decimal,
        commission: FeeAmounts,
        vendor_fee: FeeAmounts,
    },
    SettlementCompleted {
        processed: usize,
        next_settlement_block: u64,
    },
    SettlementStalled,
    SettlementRestarted {
        next_settlement_block: u64,
    },
    StateChanged {
        from: GlobalState,
        to: GlobalState,
    },
    Liquidated {
        reserve_price: Decimal,
        frozen_price: Decimal,
        total_reserve: Decimal,
        doc_supply: Decimal,
    },
    LeveragedPositionClosed {
        account: AccountId,
        bucket: BucketId,
        amount: Decimal,
    },
    RemainderSwept {
        account: AccountId,
        amount: Decimal,
    },
    TokenTransferred {
        token: TokenKind,
        bucket: BucketId,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    },
    ConfigurationApplied,
    SystemPaused,
    SystemUnpaused,
    VendorStakeAdded {
        vendor: AccountId,
        amount: Decimal,
        staked: Decimal,
    },
    VendorStakeRemoved {
        vendor: AccountId,
        amount: Decimal,
        staked: Decimal,
    },
}

/// A journal entry for one emitted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub block: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: ProtocolEvent,
}

impl EventRecord {
    pub fn new(block: u64, event: ProtocolEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            block,
            recorded_at: Utc::now(),
            event,
        }
    }
}
