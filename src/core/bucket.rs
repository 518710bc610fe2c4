use crate::core::account::AccountId;
use crate::core::error::{CoreError, CoreResult, ValidationError};
use crate::core::fixed::{self, MathError};
use crate::core::token::{BucketId, TokenKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One leverage product's slice of the reserve.
///
/// In the base bucket `leveraged_supply` is the BPro supply; in a
/// leveraged bucket it is that bucket's BProx supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: BucketId,
    /// Reserve asset backing the bucket. Never negative.
    pub reserve: Decimal,
    /// Doc liability carried by the bucket.
    pub stable_liability: Decimal,
    pub leveraged_supply: Decimal,
    /// Interest collected from leveraged mints, not yet recovered.
    pub accumulated_interest: Decimal,
}

impl Bucket {
    pub fn new(id: BucketId) -> Self {
        Self {
            id,
            reserve: Decimal::ZERO,
            stable_liability: Decimal::ZERO,
            leveraged_supply: Decimal::ZERO,
            accumulated_interest: Decimal::ZERO,
        }
    }

    /// Reserve plus the interest bag.
    pub fn total_reserve(&self) -> Decimal {
        self.reserve + self.accumulated_interest
    }

    pub fn is_empty(&self) -> bool {
        self.reserve.is_zero()
            && self.stable_liability.is_zero()
            && self.leveraged_supply.is_zero()
            && self.accumulated_interest.is_zero()
    }
}

/// All bucket records, keyed by bucket id.
///
/// Owned exclusively by the collateral engine. The base bucket always exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketLedger {
    base: Bucket,
    leveraged: BTreeMap<BucketId, Bucket>,
}

impl BucketLedger {
    /// Create a ledger with the base bucket and the given leveraged buckets.
    pub fn new<'a>(leveraged: impl IntoIterator<Item = &'a BucketId>) -> Self {
        Self {
            base: Bucket::new(BucketId::c0()),
            leveraged: leveraged
                .into_iter()
                .map(|id| (id.clone(), Bucket::new(id.clone())))
                .collect(),
        }
    }

    pub fn get(&self, id: &BucketId) -> Result<&Bucket, ValidationError> {
        if id.is_base() {
            return Ok(&self.base);
        }
        self.leveraged
            .get(id)
            .ok_or_else(|| ValidationError::UnknownBucket(id.clone()))
    }

    pub fn get_mut(&mut self, id: &BucketId) -> Result<&mut Bucket, ValidationError> {
        if id.is_base() {
            return Ok(&mut self.base);
        }
        self.leveraged
            .get_mut(id)
            .ok_or_else(|| ValidationError::UnknownBucket(id.clone()))
    }

    /// A leveraged bucket; the base bucket is rejected.
    pub fn leveraged_bucket(&self, id: &BucketId) -> Result<&Bucket, ValidationError> {
        self.leveraged
            .get(id)
            .ok_or_else(|| ValidationError::UnknownBucket(id.clone()))
    }

    pub fn base(&self) -> &Bucket {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut Bucket {
        &mut self.base
    }

    pub fn contains(&self, id: &BucketId) -> bool {
        id.is_base() || self.leveraged.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        std::iter::once(&self.base).chain(self.leveraged.values())
    }

    /// Leveraged buckets, in id order.
    pub fn leveraged(&self) -> impl Iterator<Item = &Bucket> {
        self.leveraged.values()
    }

    pub fn leveraged_ids(&self) -> Vec<BucketId> {
        self.leveraged.keys().cloned().collect()
    }

    /// Reserve across all buckets, interest bags included.
    pub fn total_reserve(&self) -> Decimal {
        self.iter().map(Bucket::total_reserve).sum()
    }

    /// Doc liability across all buckets.
    pub fn total_stable_liability(&self) -> Decimal {
        self.iter().map(|b| b.stable_liability).sum()
    }

    /// Doc liability lent out to leveraged buckets.
    pub fn borrowed_stable(&self) -> Decimal {
        self.leveraged().map(|b| b.stable_liability).sum()
    }

    /// Move every leveraged bucket's reserve, liability and interest into the base bucket.
    pub fn fold_into_base(&mut self) {
        for bucket in self.leveraged.values_mut() {
            self.base.reserve += bucket.total_reserve();
            self.base.stable_liability += bucket.stable_liability;
            bucket.reserve = Decimal::ZERO;
            bucket.accumulated_interest = Decimal::ZERO;
            bucket.stable_liability = Decimal::ZERO;
        }
    }
}

/// Key of a holder position: token, bucket, account.
pub type PositionKey = (TokenKind, BucketId, AccountId);

/// Holder balances of the protocol's own tokens.
///
/// Doc and BPro positions live under the base bucket; BProx positions under
/// their leveraged bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenBalances {
    #[serde(with = "positions_serde")]
    positions: HashMap<PositionKey, Decimal>,
    paused: BTreeSet<TokenKind>,
}

mod positions_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    /// One holder position as stored on disk.
    #[derive(Serialize, Deserialize)]
    struct Entry {
        token: TokenKind,
        bucket: BucketId,
        account: AccountId,
        amount: Decimal,
    }

    pub fn serialize<S: Serializer>(
        positions: &HashMap<PositionKey, Decimal>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<Entry> = positions
            .iter()
            .map(|((token, bucket, account), amount)| Entry {
                token: *token,
                bucket: bucket.clone(),
                account: account.clone(),
                amount: *amount,
            })
            .collect();
        entries.sort_by(|a, b| (a.token, &a.bucket, &a.account).cmp(&(b.token, &b.bucket, &b.account)));
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<PositionKey, Decimal>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| ((e.token, e.bucket, e.account), e.amount))
            .collect())
    }
}

impl TokenBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, token: TokenKind, bucket: &BucketId, account: &AccountId) -> Decimal {
        self.positions
            .get(&(token, bucket.clone(), account.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn credit(
        &mut self,
        token: TokenKind,
        bucket: &BucketId,
        account: &AccountId,
        amount: Decimal,
    ) -> Result<(), MathError> {
        let balance = self
            .positions
            .entry((token, bucket.clone(), account.clone()))
            .or_insert(Decimal::ZERO);
        *balance = fixed::add(*balance, amount)?;
        Ok(())
    }

    /// Remove `amount` from a position; fails if the holder has less.
    pub fn debit(
        &mut self,
        token: TokenKind,
        bucket: &BucketId,
        account: &AccountId,
        amount: Decimal,
    ) -> CoreResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let key = (token, bucket.clone(), account.clone());
        let balance = self.positions.get(&key).copied().unwrap_or(Decimal::ZERO);
        if balance < amount {
            return Err(CoreError::insufficient(account, token.to_string(), balance, amount));
        }
        let remaining = balance - amount;
        if remaining.is_zero() {
            self.positions.remove(&key);
        } else {
            self.positions.insert(key, remaining);
        }
        Ok(())
    }

    /// Sum of all holder balances of a token in a bucket.
    pub fn supply(&self, token: TokenKind, bucket: &BucketId) -> Decimal {
        self.positions
            .iter()
            .filter(|((t, b, _), _)| *t == token && b == bucket)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Holders with a positive balance of a token in a bucket, sorted by account.
    pub fn holders(&self, token: TokenKind, bucket: &BucketId) -> Vec<AccountId> {
        let mut holders: Vec<AccountId> = self
            .positions
            .iter()
            .filter(|((t, b, _), v)| *t == token && b == bucket && **v > Decimal::ZERO)
            .map(|((_, _, a), _)| a.clone())
            .collect();
        holders.sort();
        holders
    }

    pub fn pause(&mut self, token: TokenKind) {
        self.paused.insert(token);
    }

    pub fn is_paused(&self, token: TokenKind) -> bool {
        self.paused.contains(&token)
    }

    pub fn all_positions(&self) -> &HashMap<PositionKey, Decimal> {
        &self.positions
    }
}
