use crate::core::account::AccountId;
use crate::core::bucket::{Bucket, BucketLedger, TokenBalances};
use crate::core::config::{CoverageThresholds, ProtocolConfig};
use crate::core::error::{CoreError, CoreResult, StateError, ValidationError};
use crate::core::event::{ExchangeEvent, FeeAmounts, ProtocolEvent};
use crate::core::fixed::{self, MathError};
use crate::core::token::{BucketId, OperationKind, TokenKind};
use crate::engine::calculator::{self, FeeQuote};
use crate::engine::state::{next_state, Coverage, CoverageReport, GlobalState};
use crate::engine::vendors::{VendorStakes, VendorTerms};
use crate::market::ledger::AssetLedger;
use crate::market::price::PriceSnapshot;
use log::{debug, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What an operation reads besides the engine's own ledgers.
///
/// Built fresh for every command; prices are never carried over.
#[derive(Debug, Clone, Copy)]
pub struct OperationContext<'a> {
    pub config: &'a ProtocolConfig,
    pub prices: PriceSnapshot,
    pub days_to_settlement: u64,
    /// Whether the settlement processor is idle and not due.
    pub settlement_ready: bool,
}

impl OperationContext<'_> {
    pub fn reserve_price(&self) -> Decimal {
        self.prices.reserve_price
    }
}

/// A mint or redeem order.
///
/// Mint amounts are in reserve asset; redeem amounts are in the token
/// being redeemed.
///
/// # Examples
///
/// ```
/// use collateral_engine::core::account::AccountId;
/// use collateral_engine::core::token::{BucketId, TokenKind};
/// use collateral_engine::engine::collateral::ExchangeRequest;
/// use rust_decimal_macros::dec;
///
/// let request = ExchangeRequest::new(TokenKind::BProx, dec!(5), AccountId::new("alice"))
///     .in_bucket(BucketId::new("X2"))
///     .with_vendor(AccountId::new("vendor"));
/// assert_eq!(request.bucket, Some(BucketId::new("X2")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub token: TokenKind,
    pub amount: Decimal,
    pub account: AccountId,
    #[serde(default)]
    pub bucket: Option<BucketId>,
    #[serde(default)]
    pub vendor: Option<AccountId>,
}

impl ExchangeRequest {
    pub fn new(token: TokenKind, amount: Decimal, account: AccountId) -> Self {
        Self {
            token,
            amount,
            account,
            bucket: None,
            vendor: None,
        }
    }

    pub fn in_bucket(mut self, bucket: BucketId) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn with_vendor(mut self, vendor: AccountId) -> Self {
        self.vendor = Some(vendor);
        self
    }
}

/// Result of servicing one queued Doc redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementFill {
    pub requested: Decimal,
    pub filled: Decimal,
    /// Amount still owed to the holder for the next cycle.
    pub retained: Decimal,
    /// Reserve credited to the holder, net of fees.
    pub reserve_paid: Decimal,
    pub event: Option<ExchangeEvent>,
}

/// Owner of every bucket record and every token balance.
///
/// Mutations happen only through the command methods below. Each command
/// validates and prices the whole operation, moves external funds, then
/// writes the bucket ledger, so a failed command leaves everything as it was.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralEngine {
    buckets: BucketLedger,
    balances: TokenBalances,
    #[serde(default)]
    vendors: VendorStakes,
    state: GlobalState,
}

impl CollateralEngine {
    pub fn new(config: &ProtocolConfig) -> Self {
        let ids: Vec<BucketId> = config.leveraged_buckets.iter().map(|b| b.id.clone()).collect();
        Self {
            buckets: BucketLedger::new(ids.iter()),
            balances: TokenBalances::new(),
            vendors: VendorStakes::new(),
            state: GlobalState::AboveTarget,
        }
    }

    // --- Queries ---

    pub fn state(&self) -> GlobalState {
        self.state
    }

    pub fn buckets(&self) -> &BucketLedger {
        &self.buckets
    }

    pub fn bucket(&self, id: &BucketId) -> Result<&Bucket, ValidationError> {
        self.buckets.get(id)
    }

    pub fn balances(&self) -> &TokenBalances {
        &self.balances
    }

    pub fn vendor_stakes(&self) -> &VendorStakes {
        &self.vendors
    }

    pub fn balance_of(&self, token: TokenKind, bucket: &BucketId, account: &AccountId) -> Decimal {
        self.balances.balance(token, bucket, account)
    }

    pub fn doc_supply(&self) -> Decimal {
        self.balances.supply(TokenKind::Doc, &BucketId::c0())
    }

    pub fn coverage(&self, price: Decimal) -> Result<Coverage, MathError> {
        Coverage::of_ledger(&self.buckets, price)
    }

    pub fn is_liquidation_reached(
        &self,
        price: Decimal,
        thresholds: &CoverageThresholds,
    ) -> Result<bool, MathError> {
        Ok(self.coverage(price)?.at_or_below(thresholds.liquidation))
    }

    pub fn report(&self, price: Decimal, thresholds: &CoverageThresholds) -> Result<CoverageReport, MathError> {
        CoverageReport::new(self.state, &self.buckets, price, thresholds)
    }

    /// Technical BPro price in reserve: base bucket equity per BPro.
    pub fn bpro_price(&self, price: Decimal) -> Result<Decimal, MathError> {
        equity_per_token(self.buckets.base(), price)
    }

    /// BProx price in reserve for a leveraged bucket.
    pub fn bprox_price(&self, bucket: &BucketId, price: Decimal) -> CoreResult<Decimal> {
        Ok(equity_per_token(self.buckets.leveraged_bucket(bucket)?, price)?)
    }

    /// Most reserve that can currently be minted into `bucket`.
    ///
    /// For the base bucket this is the Doc mint capacity, for a leveraged
    /// bucket its BProx mint capacity.
    pub fn max_issuable(&self, bucket: &BucketId, ctx: &OperationContext<'_>) -> CoreResult<Decimal> {
        if bucket.is_base() {
            return Ok(self.max_doc_mint(ctx)?);
        }
        self.buckets.leveraged_bucket(bucket)?;
        self.max_bprox_mint(bucket, ctx)
    }

    /// Daily interest rate a BProx mint of `amount` reserve would pay now.
    pub fn bprox_interest_rate(
        &self,
        bucket: &BucketId,
        amount: Decimal,
        ctx: &OperationContext<'_>,
    ) -> CoreResult<Decimal> {
        let leverage = self.leverage_of(bucket, ctx.config)?;
        let borrowed_docs = fixed::mul(fixed::mul(amount, leverage - Decimal::ONE)?, ctx.reserve_price())?;
        self.leveraged_rate(bucket, borrowed_docs, ctx.config)
    }

    // --- State ---

    /// Reclassify the global state from current totals.
    pub fn recompute_state(
        &mut self,
        price: Decimal,
        thresholds: &CoverageThresholds,
    ) -> CoreResult<Option<ProtocolEvent>> {
        let coverage = self.coverage(price)?;
        let next = next_state(self.state, coverage, thresholds);
        if next == self.state {
            return Ok(None);
        }
        info!("global state {} -> {} at coverage {}", self.state, next, coverage);
        let event = ProtocolEvent::StateChanged {
            from: self.state,
            to: next,
        };
        self.state = next;
        Ok(Some(event))
    }

    /// Put back a state classification undone by a failed command.
    pub(crate) fn restore_state(&mut self, state: GlobalState) {
        self.state = state;
    }

    /// Check the state gates for `operation`.
    pub fn admit(&self, operation: OperationKind, settlement_ready: bool) -> Result<(), StateError> {
        if operation == OperationKind::RedeemAllDoc {
            return match self.state {
                GlobalState::Liquidated => Ok(()),
                _ => Err(StateError::NotLiquidated),
            };
        }
        if self.state == GlobalState::Liquidated {
            return Err(StateError::Liquidated);
        }
        if matches!(operation, OperationKind::MintBProx | OperationKind::RedeemBProx)
            && !settlement_ready
        {
            return Err(StateError::SettlementNotReady);
        }
        if matches!(
            operation,
            OperationKind::RedeemBPro | OperationKind::MintDoc | OperationKind::MintBProx
        ) && self.state != GlobalState::AboveTarget
        {
            return Err(StateError::RequiresState {
                required: GlobalState::AboveTarget,
                current: self.state,
            });
        }
        if operation == OperationKind::MintBPro && self.balances.is_paused(TokenKind::BPro) {
            return Err(StateError::TokenPaused(TokenKind::BPro));
        }
        Ok(())
    }

    // --- Commands ---

    pub fn mint<L: AssetLedger + ?Sized>(
        &mut self,
        request: &ExchangeRequest,
        ctx: &OperationContext<'_>,
        ledger: &mut L,
    ) -> CoreResult<Vec<ProtocolEvent>> {
        self.admit(request.token.mint_operation(), ctx.settlement_ready)?;
        let bucket = self.resolve_bucket(request)?;
        check_positive(request.amount)?;

        let event = match request.token {
            TokenKind::BPro => self.mint_bpro(request, ctx, ledger)?,
            TokenKind::Doc => self.mint_doc(request, ctx, ledger)?,
            TokenKind::BProx => self.mint_bprox(request, &bucket, ctx, ledger)?,
        };
        debug!(
            "{} minted {} {} for {} reserve (interest {})",
            event.account, event.amount, event.token, event.reserve_total, event.interest
        );
        self.finish(event, ctx)
    }

    pub fn redeem<L: AssetLedger + ?Sized>(
        &mut self,
        request: &ExchangeRequest,
        ctx: &OperationContext<'_>,
        ledger: &mut L,
    ) -> CoreResult<Vec<ProtocolEvent>> {
        self.admit(request.token.redeem_operation(), ctx.settlement_ready)?;
        let bucket = self.resolve_bucket(request)?;
        check_positive(request.amount)?;

        let event = match request.token {
            TokenKind::BPro => self.redeem_bpro(request, ctx, ledger)?,
            TokenKind::Doc => {
                let available = self.free_doc_capacity(request, ctx)?;
                self.redeem_doc(
                    &request.account,
                    request.amount.min(available),
                    OperationKind::RedeemFreeDoc,
                    request.vendor.as_ref(),
                    ctx,
                    ledger,
                )?
            }
            TokenKind::BProx => self.redeem_bprox(request, &bucket, ctx, ledger)?,
        };
        debug!(
            "{} redeemed {} {} for {} reserve (interest {})",
            event.account, event.amount, event.token, event.reserve_total, event.interest
        );
        self.finish(event, ctx)
    }

    /// Service one queued Doc redemption at the current price.
    ///
    /// The fill is limited by the holder's balance and by base bucket
    /// liquidity. Only the liquidity-limited part is retained.
    pub fn redeem_doc_for_settlement<L: AssetLedger + ?Sized>(
        &mut self,
        account: &AccountId,
        requested: Decimal,
        ctx: &OperationContext<'_>,
        ledger: &mut L,
    ) -> CoreResult<SettlementFill> {
        let p = ctx.reserve_price();
        let base = self.buckets.base();
        let holdable = requested.min(self.balances.balance(TokenKind::Doc, &BucketId::c0(), account));
        let liquidity = base.stable_liability.min(fixed::mul(base.reserve, p)?);
        let filled = holdable.min(liquidity);
        let retained = holdable - filled;

        if filled <= Decimal::ZERO {
            return Ok(SettlementFill {
                requested,
                filled: Decimal::ZERO,
                retained,
                reserve_paid: Decimal::ZERO,
                event: None,
            });
        }
        let event = self.redeem_doc(
            account,
            filled,
            OperationKind::SettlementRedeemDoc,
            None,
            ctx,
            ledger,
        )?;
        let reserve_paid = event.reserve_settled()?;
        Ok(SettlementFill {
            requested,
            filled,
            retained,
            reserve_paid,
            event: Some(event),
        })
    }

    /// Move `amount` of a token between holders.
    pub fn transfer(
        &mut self,
        token: TokenKind,
        bucket: &BucketId,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> CoreResult<()> {
        if self.balances.is_paused(token) {
            return Err(StateError::TokenPaused(token).into());
        }
        let request = ExchangeRequest::new(token, amount, from.clone()).in_bucket(bucket.clone());
        let bucket = self.resolve_bucket(&request)?;
        check_positive(amount)?;

        fixed::add(self.balances.balance(token, &bucket, to), amount)?;
        self.balances.debit(token, &bucket, from, amount)?;
        self.balances.credit(token, &bucket, to, amount)?;
        debug!("{} transferred {} {} to {}", from, amount, token, to);
        Ok(())
    }

    /// Stake fee token for a registered vendor, taken on its allowance.
    pub fn add_vendor_stake<L: AssetLedger + ?Sized>(
        &mut self,
        vendor: &AccountId,
        amount: Decimal,
        config: &ProtocolConfig,
        ledger: &mut L,
    ) -> CoreResult<ProtocolEvent> {
        if !config.is_vendor(vendor) {
            return Err(ValidationError::UnknownVendor(vendor.clone()).into());
        }
        check_positive(amount)?;
        fixed::add(self.vendors.get(vendor).staked, amount)?;

        ledger.deposit_fee_token(vendor, amount)?;
        let staked = self.vendors.add(vendor, amount)?;
        info!("vendor {} staked {}, now {}", vendor, amount, staked);
        Ok(ProtocolEvent::VendorStakeAdded {
            vendor: vendor.clone(),
            amount,
            staked,
        })
    }

    /// Return unspent stake to a vendor.
    pub fn remove_vendor_stake<L: AssetLedger + ?Sized>(
        &mut self,
        vendor: &AccountId,
        amount: Decimal,
        ledger: &mut L,
    ) -> CoreResult<ProtocolEvent> {
        check_positive(amount)?;
        let available = self.vendors.get(vendor).available();
        if amount > available {
            return Err(CoreError::insufficient(vendor, "vendor stake", available, amount));
        }

        ledger.withdraw_fee_token(vendor, amount)?;
        let staked = self.vendors.remove(vendor, amount)?;
        info!("vendor {} unstaked {}, now {}", vendor, amount, staked);
        Ok(ProtocolEvent::VendorStakeRemoved {
            vendor: vendor.clone(),
            amount,
            staked,
        })
    }

    /// Start a new markup cycle for every vendor.
    pub fn reset_vendor_markups(&mut self) {
        self.vendors.reset_paid();
    }

    // --- Liquidation ---

    /// Reserve price Doc holders exit at: the market price, or the price
    /// at which the reserve exactly covers the liability if that is higher.
    pub fn liquidation_price(&self, price: Decimal) -> Result<Decimal, MathError> {
        let reserve = self.buckets.total_reserve();
        let liability = self.buckets.total_stable_liability();
        if reserve.is_zero() || liability.is_zero() {
            return Ok(price);
        }
        Ok(price.max(fixed::div(liability, reserve)?))
    }

    /// Commit the liquidated state.
    ///
    /// Pauses BPro and folds every leveraged bucket into the base bucket.
    /// Returns the leveraged positions still to be closed out.
    pub fn enter_liquidation(&mut self) -> Vec<(BucketId, AccountId)> {
        self.state = GlobalState::Liquidated;
        self.balances.pause(TokenKind::BPro);
        self.buckets.fold_into_base();

        let mut positions = Vec::new();
        for id in self.buckets.leveraged_ids() {
            for holder in self.balances.holders(TokenKind::BProx, &id) {
                positions.push((id.clone(), holder));
            }
        }
        positions
    }

    /// Burn a holder's BProx in a folded bucket. Returns the amount burned.
    pub fn close_leveraged_position(&mut self, bucket: &BucketId, account: &AccountId) -> CoreResult<Decimal> {
        let amount = self.balances.balance(TokenKind::BProx, bucket, account);
        let record = self.buckets.get_mut(bucket)?;
        record.leveraged_supply = fixed::saturating_sub(record.leveraged_supply, amount);
        self.balances.debit(TokenKind::BProx, bucket, account, amount)?;
        Ok(amount)
    }

    /// Remove the reserve not needed to pay outstanding Doc at `frozen_price`.
    pub fn sweep_surplus(&mut self, frozen_price: Decimal) -> Result<Decimal, MathError> {
        let supply = self.doc_supply();
        let base = self.buckets.base_mut();
        let owed = if supply.is_zero() {
            Decimal::ZERO
        } else {
            fixed::div(supply, frozen_price)?.min(base.reserve)
        };
        let surplus = fixed::saturating_sub(base.reserve, owed);
        base.reserve -= surplus;
        Ok(surplus)
    }

    /// Pay out a holder's whole Doc balance at the frozen price.
    ///
    /// Once the last Doc is redeemed, leftover reserve is swept to the
    /// commission account.
    pub fn redeem_all_doc<L: AssetLedger + ?Sized>(
        &mut self,
        account: &AccountId,
        frozen_price: Decimal,
        config: &ProtocolConfig,
        ledger: &mut L,
    ) -> CoreResult<Vec<ProtocolEvent>> {
        self.admit(OperationKind::RedeemAllDoc, false)?;
        let c0 = BucketId::c0();
        let docs = self.balances.balance(TokenKind::Doc, &c0, account);
        if docs.is_zero() {
            return Err(ValidationError::NothingToRedeem(account.clone()).into());
        }
        let payout = fixed::div(docs, frozen_price)?.min(self.buckets.base().reserve);

        ledger.credit_reserve(account, payout);
        let base = self.buckets.base_mut();
        base.reserve -= payout;
        base.stable_liability = fixed::saturating_sub(base.stable_liability, docs);
        self.balances.debit(TokenKind::Doc, &c0, account, docs)?;
        debug!("{} redeemed {} DOC for {} reserve after liquidation", account, docs, payout);

        let mut events = vec![ProtocolEvent::Exchange(ExchangeEvent {
            operation: OperationKind::RedeemAllDoc,
            token: TokenKind::Doc,
            account: account.clone(),
            bucket: c0,
            amount: docs,
            reserve_total: payout,
            interest: Decimal::ZERO,
            commission: FeeAmounts::default(),
            vendor_fee: FeeAmounts::default(),
            vendor: None,
            reserve_price: frozen_price,
        })];

        if self.doc_supply().is_zero() {
            let base = self.buckets.base_mut();
            let dust = base.reserve;
            if dust > Decimal::ZERO {
                base.reserve = Decimal::ZERO;
                ledger.credit_reserve(&config.commission_account, dust);
                info!("swept {} reserve dust to {}", dust, config.commission_account);
                events.push(ProtocolEvent::RemainderSwept {
                    account: config.commission_account.clone(),
                    amount: dust,
                });
            }
        }
        Ok(events)
    }

    // --- Operation bodies ---

    fn mint_bpro<L: AssetLedger + ?Sized>(
        &mut self,
        request: &ExchangeRequest,
        ctx: &OperationContext<'_>,
        ledger: &mut L,
    ) -> CoreResult<ExchangeEvent> {
        let price = self.bpro_mint_price(ctx)?;
        if price <= Decimal::ZERO {
            return Err(no_capacity("mint", TokenKind::BPro));
        }
        let amount = request.amount;
        let tokens = fixed::div(amount, price)?;
        let fees = quote(ctx, &*ledger, &self.vendors, request, OperationKind::MintBPro, amount)?;
        let event = exchange_event(request, OperationKind::MintBPro, BucketId::c0(), tokens, amount, Decimal::ZERO, fees, ctx);

        let mut base = self.buckets.base().clone();
        base.reserve = fixed::add(base.reserve, amount)?;
        base.leveraged_supply = fixed::add(base.leveraged_supply, tokens)?;

        collect_from_caller(ledger, ctx.config, &event)?;
        *self.buckets.base_mut() = base;
        self.balances.credit(TokenKind::BPro, &event.bucket, &event.account, tokens)?;
        Ok(event)
    }

    fn mint_doc<L: AssetLedger + ?Sized>(
        &mut self,
        request: &ExchangeRequest,
        ctx: &OperationContext<'_>,
        ledger: &mut L,
    ) -> CoreResult<ExchangeEvent> {
        let max = self.max_doc_mint(ctx)?;
        if max <= Decimal::ZERO {
            return Err(no_capacity("mint", TokenKind::Doc));
        }
        let amount = request.amount.min(max);
        let docs = fixed::mul(amount, ctx.reserve_price())?;
        let fees = quote(ctx, &*ledger, &self.vendors, request, OperationKind::MintDoc, amount)?;
        let event = exchange_event(request, OperationKind::MintDoc, BucketId::c0(), docs, amount, Decimal::ZERO, fees, ctx);

        let mut base = self.buckets.base().clone();
        base.reserve = fixed::add(base.reserve, amount)?;
        base.stable_liability = fixed::add(base.stable_liability, docs)?;

        collect_from_caller(ledger, ctx.config, &event)?;
        *self.buckets.base_mut() = base;
        self.balances.credit(TokenKind::Doc, &event.bucket, &event.account, docs)?;
        Ok(event)
    }

    fn mint_bprox<L: AssetLedger + ?Sized>(
        &mut self,
        request: &ExchangeRequest,
        bucket: &BucketId,
        ctx: &OperationContext<'_>,
        ledger: &mut L,
    ) -> CoreResult<ExchangeEvent> {
        let p = ctx.reserve_price();
        let max = self.max_bprox_mint(bucket, ctx)?;
        let price = self.bprox_price(bucket, p)?;
        if max <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(no_capacity("mint", TokenKind::BProx));
        }
        let amount = request.amount.min(max);
        let leverage = self.leverage_of(bucket, ctx.config)?;
        let borrowed_reserve = fixed::mul(amount, leverage - Decimal::ONE)?;
        let borrowed_docs = fixed::mul(borrowed_reserve, p)?;
        let tokens = fixed::div(amount, price)?;

        let rate = self.leveraged_rate(bucket, borrowed_docs, ctx.config)?;
        let interest = calculator::mint_interest(rate, amount, ctx.days_to_settlement)?;
        let fees = quote(ctx, &*ledger, &self.vendors, request, OperationKind::MintBProx, amount)?;
        let event = exchange_event(request, OperationKind::MintBProx, bucket.clone(), tokens, amount, interest, fees, ctx);

        let mut base = self.buckets.base().clone();
        base.reserve = fixed::sub(base.reserve, borrowed_reserve)?;
        base.stable_liability = fixed::sub(base.stable_liability, borrowed_docs)?;
        let mut record = self.buckets.leveraged_bucket(bucket)?.clone();
        record.reserve = fixed::add(record.reserve, fixed::add(amount, borrowed_reserve)?)?;
        record.stable_liability = fixed::add(record.stable_liability, borrowed_docs)?;
        record.accumulated_interest = fixed::add(record.accumulated_interest, interest)?;
        record.leveraged_supply = fixed::add(record.leveraged_supply, tokens)?;

        collect_from_caller(ledger, ctx.config, &event)?;
        *self.buckets.base_mut() = base;
        *self.buckets.get_mut(bucket)? = record;
        self.balances.credit(TokenKind::BProx, bucket, &event.account, tokens)?;
        Ok(event)
    }

    fn redeem_bpro<L: AssetLedger + ?Sized>(
        &mut self,
        request: &ExchangeRequest,
        ctx: &OperationContext<'_>,
        ledger: &mut L,
    ) -> CoreResult<ExchangeEvent> {
        let p = ctx.reserve_price();
        let c0 = BucketId::c0();
        let balance = self.require_balance(TokenKind::BPro, &c0, request)?;
        let price = self.bpro_price(p)?;
        if price <= Decimal::ZERO {
            return Err(no_capacity("redeem", TokenKind::BPro));
        }
        let base = self.buckets.base();
        let target = ctx.config.coverage.target;
        let free_reserve = fixed::saturating_sub(
            base.reserve,
            fixed::mul_div(target, base.stable_liability, p)?,
        );
        let max = fixed::div(free_reserve, price)?;
        let amount = request.amount.min(balance).min(max);
        if amount <= Decimal::ZERO {
            return Err(no_capacity("redeem", TokenKind::BPro));
        }
        let value = fixed::mul(amount, price)?;
        let fees = quote(ctx, &*ledger, &self.vendors, request, OperationKind::RedeemBPro, value)?;
        let event = exchange_event(request, OperationKind::RedeemBPro, c0, amount, value, Decimal::ZERO, fees, ctx);

        let mut base = self.buckets.base().clone();
        base.reserve = fixed::sub(base.reserve, value)?;
        base.leveraged_supply = fixed::sub(base.leveraged_supply, amount)?;

        pay_caller(ledger, ctx.config, &event)?;
        *self.buckets.base_mut() = base;
        self.balances.debit(TokenKind::BPro, &event.bucket, &event.account, amount)?;
        Ok(event)
    }

    /// Doc the holder could redeem right now.
    fn free_doc_capacity(&self, request: &ExchangeRequest, ctx: &OperationContext<'_>) -> CoreResult<Decimal> {
        let balance = self.require_balance(TokenKind::Doc, &BucketId::c0(), request)?;
        let base = self.buckets.base();
        Ok(balance
            .min(base.stable_liability)
            .min(fixed::mul(base.reserve, ctx.reserve_price())?))
    }

    fn redeem_doc<L: AssetLedger + ?Sized>(
        &mut self,
        account: &AccountId,
        docs: Decimal,
        operation: OperationKind,
        vendor: Option<&AccountId>,
        ctx: &OperationContext<'_>,
        ledger: &mut L,
    ) -> CoreResult<ExchangeEvent> {
        if docs <= Decimal::ZERO {
            return Err(no_capacity("redeem", TokenKind::Doc));
        }
        let value = fixed::div(docs, ctx.reserve_price())?;
        let terms = vendor_terms(ctx.config, &self.vendors, vendor);
        let fees = calculator::commission_and_vendor_fee(
            ctx.config,
            &*ledger,
            account,
            operation,
            value,
            terms.as_ref(),
            &ctx.prices,
        )?;
        let mut request = ExchangeRequest::new(TokenKind::Doc, docs, account.clone());
        request.vendor = vendor.cloned();
        let event = exchange_event(&request, operation, BucketId::c0(), docs, value, Decimal::ZERO, fees, ctx);

        let mut base = self.buckets.base().clone();
        base.reserve = fixed::sub(base.reserve, value)?;
        base.stable_liability = fixed::sub(base.stable_liability, docs)?;

        pay_caller(ledger, ctx.config, &event)?;
        *self.buckets.base_mut() = base;
        self.balances.debit(TokenKind::Doc, &event.bucket, account, docs)?;
        Ok(event)
    }

    fn redeem_bprox<L: AssetLedger + ?Sized>(
        &mut self,
        request: &ExchangeRequest,
        bucket: &BucketId,
        ctx: &OperationContext<'_>,
        ledger: &mut L,
    ) -> CoreResult<ExchangeEvent> {
        let p = ctx.reserve_price();
        let balance = self.require_balance(TokenKind::BProx, bucket, request)?;
        let amount = request.amount.min(balance);
        let record = self.buckets.leveraged_bucket(bucket)?;
        let supply = record.leveraged_supply;
        if supply <= Decimal::ZERO {
            return Err(no_capacity("redeem", TokenKind::BProx));
        }

        let (gross, returned_docs) = if amount == supply {
            (record.reserve, record.stable_liability)
        } else {
            (
                fixed::mul_div(amount, record.reserve, supply)?,
                fixed::mul_div(amount, record.stable_liability, supply)?,
            )
        };
        let returned_reserve = fixed::div(returned_docs, p)?.min(gross);
        let equity = gross - returned_reserve;
        let collected = record.accumulated_interest;

        let rate = self.leveraged_rate(bucket, -returned_docs, ctx.config)?;
        let recovered = calculator::redeem_interest(rate, equity, ctx.days_to_settlement, collected)?;
        let fees = quote(ctx, &*ledger, &self.vendors, request, OperationKind::RedeemBProx, equity)?;
        let event = exchange_event(request, OperationKind::RedeemBProx, bucket.clone(), amount, equity, recovered, fees, ctx);

        let mut record = record.clone();
        record.reserve = fixed::sub(record.reserve, gross)?;
        record.stable_liability = fixed::sub(record.stable_liability, returned_docs)?;
        record.accumulated_interest = fixed::sub(record.accumulated_interest, recovered)?;
        record.leveraged_supply = fixed::sub(record.leveraged_supply, amount)?;
        let mut base = self.buckets.base().clone();
        base.reserve = fixed::add(base.reserve, returned_reserve)?;
        base.stable_liability = fixed::add(base.stable_liability, returned_docs)?;

        pay_caller(ledger, ctx.config, &event)?;
        *self.buckets.get_mut(bucket)? = record;
        *self.buckets.base_mut() = base;
        self.balances.debit(TokenKind::BProx, bucket, &event.account, amount)?;
        Ok(event)
    }

    // --- Helpers ---

    fn finish(&mut self, event: ExchangeEvent, ctx: &OperationContext<'_>) -> CoreResult<Vec<ProtocolEvent>> {
        if let Some(vendor) = &event.vendor {
            let paid = calculator::vendor_fee_in_fee_token(&event.vendor_fee, &ctx.prices)?;
            if paid > Decimal::ZERO {
                self.vendors.record_paid(vendor, paid)?;
            }
        }
        let mut events = vec![ProtocolEvent::Exchange(event)];
        if let Some(change) = self.recompute_state(ctx.reserve_price(), &ctx.config.coverage)? {
            events.push(change);
        }
        Ok(events)
    }

    fn resolve_bucket(&self, request: &ExchangeRequest) -> Result<BucketId, ValidationError> {
        let token = request.token;
        match (token.is_bucket_scoped(), &request.bucket) {
            (true, None) => Err(ValidationError::BucketRequired { token }),
            (true, Some(id)) if id.is_base() => Err(ValidationError::BucketNotAllowed {
                token,
                bucket: id.clone(),
            }),
            (true, Some(id)) => {
                self.buckets.leveraged_bucket(id)?;
                Ok(id.clone())
            }
            (false, Some(id)) if !id.is_base() => Err(ValidationError::BucketNotAllowed {
                token,
                bucket: id.clone(),
            }),
            (false, _) => Ok(BucketId::c0()),
        }
    }

    fn require_balance(
        &self,
        token: TokenKind,
        bucket: &BucketId,
        request: &ExchangeRequest,
    ) -> CoreResult<Decimal> {
        let balance = self.balances.balance(token, bucket, &request.account);
        if balance.is_zero() {
            return Err(CoreError::insufficient(
                &request.account,
                token.to_string(),
                balance,
                request.amount,
            ));
        }
        Ok(balance)
    }

    /// BPro mint price, discounted while the system is below target.
    fn bpro_mint_price(&self, ctx: &OperationContext<'_>) -> Result<Decimal, MathError> {
        let p = ctx.reserve_price();
        let price = self.bpro_price(p)?;
        if self.state != GlobalState::BelowTarget {
            return Ok(price);
        }
        let coverage = match self.coverage(p)? {
            Coverage::Finite(value) => value,
            Coverage::Infinite => return Ok(price),
        };
        let t = &ctx.config.coverage;
        let span = t.discount - t.liquidation;
        let depth = fixed::saturating_sub(t.discount, coverage).min(span);
        let discount = fixed::mul_div(ctx.config.max_discount_rate, depth, span)?;
        fixed::mul(price, Decimal::ONE - discount)
    }

    /// Reserve that can be minted into Doc while keeping the base bucket at target.
    fn max_doc_mint(&self, ctx: &OperationContext<'_>) -> Result<Decimal, MathError> {
        let p = ctx.reserve_price();
        let target = ctx.config.coverage.target;
        let base = self.buckets.base();
        let excess = fixed::saturating_sub(
            fixed::mul(base.reserve, p)?,
            fixed::mul(target, base.stable_liability)?,
        );
        fixed::div(excess, fixed::mul(p, target - Decimal::ONE)?)
    }

    fn max_bprox_mint(&self, bucket: &BucketId, ctx: &OperationContext<'_>) -> CoreResult<Decimal> {
        let p = ctx.reserve_price();
        let borrow_ratio = self.leverage_of(bucket, ctx.config)? - Decimal::ONE;
        let base = self.buckets.base();
        let by_docs = fixed::div(base.stable_liability, fixed::mul(p, borrow_ratio)?)?;
        let by_reserve = fixed::div(base.reserve, borrow_ratio)?;
        Ok(by_docs.min(by_reserve))
    }

    fn leverage_of(&self, bucket: &BucketId, config: &ProtocolConfig) -> CoreResult<Decimal> {
        let bucket_config = config
            .leveraged_bucket(bucket)
            .ok_or_else(|| ValidationError::UnknownBucket(bucket.clone()))?;
        Ok(calculator::leverage(bucket_config.target_coverage)?)
    }

    /// Average daily rate for moving `borrowed_delta` Doc into `bucket`.
    fn leveraged_rate(
        &self,
        bucket: &BucketId,
        borrowed_delta: Decimal,
        config: &ProtocolConfig,
    ) -> CoreResult<Decimal> {
        let bucket_config = config
            .leveraged_bucket(bucket)
            .ok_or_else(|| ValidationError::UnknownBucket(bucket.clone()))?;
        Ok(calculator::average_rate(
            &bucket_config.interest,
            self.buckets.borrowed_stable(),
            self.buckets.base().stable_liability,
            borrowed_delta,
        )?)
    }
}

/// Bucket equity in reserve per token; 1 for an unissued token.
fn equity_per_token(bucket: &Bucket, price: Decimal) -> Result<Decimal, MathError> {
    if bucket.leveraged_supply.is_zero() {
        return Ok(Decimal::ONE);
    }
    let equity = fixed::saturating_sub(bucket.reserve, fixed::div(bucket.stable_liability, price)?);
    fixed::div(equity, bucket.leveraged_supply)
}

fn check_positive(amount: Decimal) -> Result<(), ValidationError> {
    if amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount(amount));
    }
    Ok(())
}

fn no_capacity(operation: &'static str, token: TokenKind) -> CoreError {
    ValidationError::NoCapacity { operation, token }.into()
}

fn vendor_terms<'a>(
    config: &ProtocolConfig,
    stakes: &VendorStakes,
    vendor: Option<&'a AccountId>,
) -> Option<VendorTerms<'a>> {
    let account = vendor.filter(|v| config.is_vendor(v))?;
    Some(VendorTerms {
        account,
        markup: config.vendor_markup(Some(account)),
        capacity: stakes.get(account).available(),
    })
}

fn quote<L: AssetLedger + ?Sized>(
    ctx: &OperationContext<'_>,
    ledger: &L,
    stakes: &VendorStakes,
    request: &ExchangeRequest,
    operation: OperationKind,
    value: Decimal,
) -> Result<FeeQuote, MathError> {
    let terms = vendor_terms(ctx.config, stakes, request.vendor.as_ref());
    calculator::commission_and_vendor_fee(
        ctx.config,
        ledger,
        &request.account,
        operation,
        value,
        terms.as_ref(),
        &ctx.prices,
    )
}

#[allow(clippy::too_many_arguments)]
fn exchange_event(
    request: &ExchangeRequest,
    operation: OperationKind,
    bucket: BucketId,
    amount: Decimal,
    reserve_total: Decimal,
    interest: Decimal,
    fees: FeeQuote,
    ctx: &OperationContext<'_>,
) -> ExchangeEvent {
    ExchangeEvent {
        operation,
        token: request.token,
        account: request.account.clone(),
        bucket,
        amount,
        reserve_total,
        interest,
        commission: fees.commission,
        vendor_fee: fees.vendor_fee,
        vendor: request.vendor.clone(),
        reserve_price: ctx.reserve_price(),
    }
}

/// Debit the caller for a mint: principal, interest and reserve fees.
fn collect_from_caller<L: AssetLedger + ?Sized>(
    ledger: &mut L,
    config: &ProtocolConfig,
    event: &ExchangeEvent,
) -> CoreResult<()> {
    let total = event.reserve_settled()?;
    let available = ledger.reserve_balance(&event.account);
    if available < total {
        return Err(CoreError::insufficient(&event.account, "reserve", available, total));
    }
    ledger.debit_reserve(&event.account, total)?;
    pay_fees(ledger, config, event)
}

/// Credit the caller for a redeem, net of reserve fees.
fn pay_caller<L: AssetLedger + ?Sized>(
    ledger: &mut L,
    config: &ProtocolConfig,
    event: &ExchangeEvent,
) -> CoreResult<()> {
    let gross = fixed::add(event.reserve_total, event.interest)?;
    let fees = fixed::add(event.commission.reserve, event.vendor_fee.reserve)?;
    if fees > gross {
        return Err(ValidationError::FeesExceedValue { fees, value: gross }.into());
    }
    ledger.credit_reserve(&event.account, gross - fees);
    pay_fees(ledger, config, event)
}

fn pay_fees<L: AssetLedger + ?Sized>(
    ledger: &mut L,
    config: &ProtocolConfig,
    event: &ExchangeEvent,
) -> CoreResult<()> {
    let commissions = &config.commission_account;
    if event.commission.reserve > Decimal::ZERO {
        ledger.credit_reserve(commissions, event.commission.reserve);
    }
    if event.commission.fee_token > Decimal::ZERO {
        ledger.transfer_fee_token(&event.account, commissions, event.commission.fee_token)?;
    }
    if let Some(vendor) = &event.vendor {
        if event.vendor_fee.reserve > Decimal::ZERO {
            ledger.credit_reserve(vendor, event.vendor_fee.reserve);
        }
        if event.vendor_fee.fee_token > Decimal::ZERO {
            ledger.transfer_fee_token(&event.account, vendor, event.vendor_fee.fee_token)?;
        }
    }
    Ok(())
}
