use crate::core::account::AccountId;
use crate::core::error::CoreError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// External ledger for the reserve asset and the fee token.
///
/// The protocol never holds these balances itself: it debits callers into
/// the reserve, credits payouts out of it, and moves fee tokens between
/// accounts on the caller's allowance.
pub trait AssetLedger {
    fn reserve_balance(&self, account: &AccountId) -> Decimal;

    /// Move `amount` of reserve asset from `account` into the protocol.
    fn debit_reserve(&mut self, account: &AccountId, amount: Decimal) -> Result<(), CoreError>;

    /// Move `amount` of reserve asset from the protocol to `account`.
    fn credit_reserve(&mut self, account: &AccountId, amount: Decimal);

    fn fee_token_balance(&self, account: &AccountId) -> Decimal;

    /// Amount of fee token `account` allows the protocol to spend.
    fn fee_token_allowance(&self, account: &AccountId) -> Decimal;

    /// Spend `amount` of `from`'s fee token on its allowance, paying `to`.
    fn transfer_fee_token(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<(), CoreError>;

    /// Spend `amount` of `from`'s fee token on its allowance into protocol custody.
    fn deposit_fee_token(&mut self, from: &AccountId, amount: Decimal) -> Result<(), CoreError>;

    /// Return `amount` of fee token from protocol custody to `to`.
    fn withdraw_fee_token(&mut self, to: &AccountId, amount: Decimal) -> Result<(), CoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Holdings {
    reserve: Decimal,
    fee_token: Decimal,
    allowance: Decimal,
}

/// An [`AssetLedger`] kept in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryAssetLedger {
    accounts: HashMap<AccountId, Holdings>,
    /// Reserve held on behalf of the protocol.
    protocol_reserve: Decimal,
    /// Fee token held in custody, i.e. vendor stakes.
    #[serde(default)]
    protocol_fee_token: Decimal,
}

impl InMemoryAssetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fund_reserve(&mut self, account: &AccountId, amount: Decimal) {
        self.accounts.entry(account.clone()).or_default().reserve += amount;
    }

    pub fn fund_fee_token(&mut self, account: &AccountId, amount: Decimal) {
        self.accounts.entry(account.clone()).or_default().fee_token += amount;
    }

    pub fn approve_fee_token(&mut self, account: &AccountId, allowance: Decimal) {
        self.accounts.entry(account.clone()).or_default().allowance = allowance;
    }

    /// Reserve currently held by the protocol.
    pub fn protocol_reserve(&self) -> Decimal {
        self.protocol_reserve
    }

    pub fn protocol_fee_token(&self) -> Decimal {
        self.protocol_fee_token
    }

    fn spend_fee_token(&mut self, from: &AccountId, amount: Decimal) -> Result<(), CoreError> {
        let balance = self.fee_token_balance(from);
        if balance < amount {
            return Err(CoreError::insufficient(from, "fee token", balance, amount));
        }
        let allowance = self.fee_token_allowance(from);
        if allowance < amount {
            return Err(CoreError::insufficient(
                from,
                "fee token allowance",
                allowance,
                amount,
            ));
        }
        let holdings = self.accounts.entry(from.clone()).or_default();
        holdings.fee_token -= amount;
        holdings.allowance -= amount;
        Ok(())
    }
}

impl AssetLedger for InMemoryAssetLedger {
    fn reserve_balance(&self, account: &AccountId) -> Decimal {
        self.accounts
            .get(account)
            .map(|h| h.reserve)
            .unwrap_or(Decimal::ZERO)
    }

    fn debit_reserve(&mut self, account: &AccountId, amount: Decimal) -> Result<(), CoreError> {
        let available = self.reserve_balance(account);
        if available < amount {
            return Err(CoreError::insufficient(account, "reserve", available, amount));
        }
        self.accounts.entry(account.clone()).or_default().reserve -= amount;
        self.protocol_reserve += amount;
        Ok(())
    }

    fn credit_reserve(&mut self, account: &AccountId, amount: Decimal) {
        self.accounts.entry(account.clone()).or_default().reserve += amount;
        self.protocol_reserve -= amount;
    }

    fn fee_token_balance(&self, account: &AccountId) -> Decimal {
        self.accounts
            .get(account)
            .map(|h| h.fee_token)
            .unwrap_or(Decimal::ZERO)
    }

    fn fee_token_allowance(&self, account: &AccountId) -> Decimal {
        self.accounts
            .get(account)
            .map(|h| h.allowance)
            .unwrap_or(Decimal::ZERO)
    }

    fn transfer_fee_token(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<(), CoreError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.spend_fee_token(from, amount)?;
        self.accounts.entry(to.clone()).or_default().fee_token += amount;
        Ok(())
    }

    fn deposit_fee_token(&mut self, from: &AccountId, amount: Decimal) -> Result<(), CoreError> {
        self.spend_fee_token(from, amount)?;
        self.protocol_fee_token += amount;
        Ok(())
    }

    fn withdraw_fee_token(&mut self, to: &AccountId, amount: Decimal) -> Result<(), CoreError> {
        if self.protocol_fee_token < amount {
            return Err(CoreError::insufficient(
                to,
                "fee token in custody",
                self.protocol_fee_token,
                amount,
            ));
        }
        self.protocol_fee_token -= amount;
        self.accounts.entry(to.clone()).or_default().fee_token += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reserve_round_trip() {
        let mut ledger = InMemoryAssetLedger::new();
        let alice = AccountId::new("alice");
        ledger.fund_reserve(&alice, dec!(10));

        ledger.debit_reserve(&alice, dec!(4)).unwrap();
        assert_eq!(ledger.reserve_balance(&alice), dec!(6));
        assert_eq!(ledger.protocol_reserve(), dec!(4));

        ledger.credit_reserve(&alice, dec!(1));
        assert_eq!(ledger.reserve_balance(&alice), dec!(7));
        assert_eq!(ledger.protocol_reserve(), dec!(3));
    }

    #[test]
    fn test_debit_beyond_balance_fails() {
        let mut ledger = InMemoryAssetLedger::new();
        let alice = AccountId::new("alice");
        ledger.fund_reserve(&alice, dec!(1));
        let err = ledger.debit_reserve(&alice, dec!(2)).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientFunds { .. }));
        assert_eq!(ledger.reserve_balance(&alice), dec!(1));
    }

    #[test]
    fn test_fee_token_transfer_consumes_allowance() {
        let mut ledger = InMemoryAssetLedger::new();
        let alice = AccountId::new("alice");
        let fees = AccountId::new("fees");
        ledger.fund_fee_token(&alice, dec!(100));
        ledger.approve_fee_token(&alice, dec!(30));

        ledger.transfer_fee_token(&alice, &fees, dec!(20)).unwrap();
        assert_eq!(ledger.fee_token_balance(&alice), dec!(80));
        assert_eq!(ledger.fee_token_allowance(&alice), dec!(10));
        assert_eq!(ledger.fee_token_balance(&fees), dec!(20));

        assert!(ledger.transfer_fee_token(&alice, &fees, dec!(20)).is_err());
    }

    #[test]
    fn test_fee_token_custody() {
        let mut ledger = InMemoryAssetLedger::new();
        let vendor = AccountId::new("vendor");
        ledger.fund_fee_token(&vendor, dec!(100));
        ledger.approve_fee_token(&vendor, dec!(100));

        ledger.deposit_fee_token(&vendor, dec!(60)).unwrap();
        assert_eq!(ledger.fee_token_balance(&vendor), dec!(40));
        assert_eq!(ledger.protocol_fee_token(), dec!(60));

        ledger.withdraw_fee_token(&vendor, dec!(10)).unwrap();
        assert_eq!(ledger.fee_token_balance(&vendor), dec!(50));
        assert!(ledger.withdraw_fee_token(&vendor, dec!(51)).is_err());
        assert_eq!(ledger.protocol_fee_token(), dec!(50));
    }
}
