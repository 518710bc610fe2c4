use crate::core::account::AccountId;
use crate::core::error::{CoreResult, ValidationError};
use crate::core::fixed;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use uuid::Uuid;

/// A pending Doc redemption, serviced at the next settlement.
///
/// There is at most one request per account. Its amount can be changed
/// while it waits; its place in the queue cannot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    id: Uuid,
    account: AccountId,
    amount: Decimal,
    sequence: u64,
    created_at: DateTime<Utc>,
}

impl RedemptionRequest {
    fn new(account: AccountId, amount: Decimal, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            account,
            amount,
            sequence,
            created_at: Utc::now(),
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Pending redemptions in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedemptionQueue {
    requests: BTreeMap<u64, RedemptionRequest>,
    by_account: HashMap<AccountId, u64>,
    next_sequence: u64,
}

impl RedemptionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn get(&self, account: &AccountId) -> Option<&RedemptionRequest> {
        self.by_account
            .get(account)
            .and_then(|seq| self.requests.get(seq))
    }

    /// Requests in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &RedemptionRequest> {
        self.requests.values()
    }

    /// Total Doc waiting to be redeemed.
    pub fn total_requested(&self) -> Decimal {
        self.requests.values().map(|r| r.amount).sum()
    }

    /// Sequence number of the most recent request, if any.
    pub fn last_sequence(&self) -> Option<u64> {
        self.requests.keys().next_back().copied()
    }

    /// First request whose sequence falls in `range`.
    pub fn first_in(&self, range: RangeInclusive<u64>) -> Option<&RedemptionRequest> {
        self.requests.range(range).next().map(|(_, r)| r)
    }

    /// Queue `amount` for `account`, or replace the amount of its pending request.
    ///
    /// Returns the request's sequence number.
    pub fn request(&mut self, account: &AccountId, amount: Decimal) -> u64 {
        if let Some(seq) = self.by_account.get(account) {
            if let Some(existing) = self.requests.get_mut(seq) {
                existing.amount = amount;
                return *seq;
            }
        }
        let seq = self.next_sequence;
        self.next_sequence += 1;
        self.requests
            .insert(seq, RedemptionRequest::new(account.clone(), amount, seq));
        self.by_account.insert(account.clone(), seq);
        seq
    }

    /// Add to or subtract from a pending request. Returns the new amount.
    ///
    /// Subtraction stops at zero. Increasing without a pending request
    /// creates one; decreasing without one fails, as does an increase past
    /// the largest representable amount.
    pub fn alter(
        &mut self,
        account: &AccountId,
        is_increase: bool,
        delta: Decimal,
    ) -> CoreResult<Decimal> {
        let existing = self
            .by_account
            .get(account)
            .and_then(|seq| self.requests.get_mut(seq));
        match (existing, is_increase) {
            (Some(request), true) => {
                request.amount = fixed::add(request.amount, delta)?;
                Ok(request.amount)
            }
            (Some(request), false) => {
                request.amount = fixed::saturating_sub(request.amount, delta);
                Ok(request.amount)
            }
            (None, true) => {
                self.request(account, delta);
                Ok(delta)
            }
            (None, false) => Err(ValidationError::UnknownRedeemRequest(account.clone()).into()),
        }
    }

    /// Keep a request with a reduced amount, or drop it when nothing is left.
    pub(crate) fn settle(&mut self, sequence: u64, remaining: Decimal) {
        if remaining > Decimal::ZERO {
            if let Some(request) = self.requests.get_mut(&sequence) {
                request.amount = remaining;
            }
        } else if let Some(request) = self.requests.remove(&sequence) {
            self.by_account.remove(&request.account);
        }
    }
}
