//! The protocol facade.
//!
//! [`Protocol`] wires the collateral engine, the settlement processor and
//! the liquidation controller to a price feed and an asset ledger, and is
//! the only way commands reach them. Every command reads prices once,
//! re-evaluates liquidation, runs, and journals the events it produced
//! once it has succeeded.

use crate::core::account::AccountId;
use crate::core::bucket::Bucket;
use crate::core::config::ProtocolConfig;
use crate::core::error::{ConfigurationError, CoreResult, StateError};
use crate::core::event::{EventRecord, ProtocolEvent};
use crate::core::token::{BucketId, OperationKind, TokenKind};
use crate::engine::calculator;
use crate::engine::collateral::{CollateralEngine, ExchangeRequest, OperationContext};
use crate::engine::state::{Coverage, CoverageReport, GlobalState};
use crate::engine::vendors::VendorStake;
use crate::liquidation::controller::LiquidationController;
use crate::market::ledger::AssetLedger;
use crate::market::price::{PriceFeed, PriceSnapshot};
use crate::settlement::processor::SettlementProcessor;
use crate::settlement::queue::RedemptionRequest;
use crate::settlement::schedule::SettlementPhase;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Every mutating command, as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Mint(ExchangeRequest),
    Redeem(ExchangeRequest),
    RedeemDocRequest {
        account: AccountId,
        amount: Decimal,
    },
    AlterRedeemRequestAmount {
        account: AccountId,
        is_increase: bool,
        amount: Decimal,
    },
    RunSettlement {
        step_count: usize,
    },
    EvalLiquidation {
        step_count: usize,
    },
    RedeemAllDoc {
        account: AccountId,
    },
    Transfer {
        token: TokenKind,
        bucket: BucketId,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    },
    AddVendorStake {
        vendor: AccountId,
        amount: Decimal,
    },
    RemoveVendorStake {
        vendor: AccountId,
        amount: Decimal,
    },
    Pause,
    Unpause,
    StallSettlement,
    RestartSettlement,
}

/// Outcome of the liquidation check that precedes a command.
enum Gate {
    /// Run the command. `pending` is journaled only if it succeeds.
    Proceed {
        pending: Vec<ProtocolEvent>,
        prior: GlobalState,
    },
    /// The check liquidated the system; the command must not run.
    Halted(Vec<ProtocolEvent>),
}

/// Journal records kept by default before the oldest are dropped.
pub const DEFAULT_JOURNAL_LIMIT: usize = 50_000;

/// A running protocol instance.
///
/// # Examples
///
/// ```
/// use collateral_engine::prelude::*;
/// use rust_decimal_macros::dec;
///
/// let alice = AccountId::new("alice");
/// let mut ledger = InMemoryAssetLedger::new();
/// ledger.fund_reserve(&alice, dec!(10));
///
/// let mut protocol = Protocol::new(
///     ProtocolConfig::default(),
///     FixedPriceFeed::new(dec!(10000)),
///     ledger,
/// )
/// .unwrap();
///
/// protocol
///     .mint(ExchangeRequest::new(TokenKind::BPro, dec!(1), alice.clone()))
///     .unwrap();
/// protocol
///     .mint(ExchangeRequest::new(TokenKind::Doc, dec!(0.25), alice.clone()))
///     .unwrap();
///
/// assert_eq!(protocol.balance_of(TokenKind::Doc, &BucketId::c0(), &alice), dec!(2500));
/// assert_eq!(protocol.state(), GlobalState::AboveTarget);
/// ```
pub struct Protocol<P: PriceFeed, L: AssetLedger> {
    config: ProtocolConfig,
    engine: CollateralEngine,
    settlement: SettlementProcessor,
    liquidation: LiquidationController,
    price_feed: P,
    ledger: L,
    block: u64,
    paused: bool,
    journal: Vec<EventRecord>,
    journal_limit: usize,
}

impl<P: PriceFeed, L: AssetLedger> Protocol<P, L> {
    pub fn new(config: ProtocolConfig, price_feed: P, ledger: L) -> CoreResult<Self> {
        config.validate()?;
        info!(
            "protocol started with {} leveraged buckets",
            config.leveraged_buckets.len()
        );
        Ok(Self {
            engine: CollateralEngine::new(&config),
            settlement: SettlementProcessor::new(&config.settlement),
            liquidation: LiquidationController::new(),
            config,
            price_feed,
            ledger,
            block: 0,
            paused: false,
            journal: Vec::new(),
            journal_limit: DEFAULT_JOURNAL_LIMIT,
        })
    }

    /// Keep at most `limit` journal records, dropping the oldest first.
    pub fn with_journal_limit(mut self, limit: usize) -> Self {
        self.journal_limit = limit.max(1);
        self
    }

    // --- Commands ---

    pub fn mint(&mut self, request: ExchangeRequest) -> CoreResult<Vec<ProtocolEvent>> {
        self.guarded(|p, prices| {
            let ctx = OperationContext {
                config: &p.config,
                prices,
                days_to_settlement: p.days_to_settlement(),
                settlement_ready: p.is_settlement_ready(),
            };
            p.engine.mint(&request, &ctx, &mut p.ledger)
        })
    }

    pub fn redeem(&mut self, request: ExchangeRequest) -> CoreResult<Vec<ProtocolEvent>> {
        self.guarded(|p, prices| {
            let ctx = OperationContext {
                config: &p.config,
                prices,
                days_to_settlement: p.days_to_settlement(),
                settlement_ready: p.is_settlement_ready(),
            };
            p.engine.redeem(&request, &ctx, &mut p.ledger)
        })
    }

    /// Queue `amount` Doc of `account` for redemption at the next settlement.
    pub fn redeem_doc_request(
        &mut self,
        account: &AccountId,
        amount: Decimal,
    ) -> CoreResult<Vec<ProtocolEvent>> {
        self.guarded(|p, _| {
            p.engine.admit(OperationKind::SettlementRedeemDoc, true)?;
            let queued = p.settlement.redeem_doc_request(account, amount, p.block)?;
            Ok(vec![queued])
        })
    }

    pub fn alter_redeem_request_amount(
        &mut self,
        account: &AccountId,
        is_increase: bool,
        amount: Decimal,
    ) -> CoreResult<Vec<ProtocolEvent>> {
        self.guarded(|p, _| {
            p.engine.admit(OperationKind::SettlementRedeemDoc, true)?;
            let altered = p
                .settlement
                .alter_redeem_request_amount(account, is_increase, amount, p.block)?;
            Ok(vec![altered])
        })
    }

    /// Drain at most `step_count` queued redemptions.
    pub fn run_settlement(&mut self, step_count: usize) -> CoreResult<Vec<ProtocolEvent>> {
        self.guarded(|p, prices| {
            if p.engine.state() == GlobalState::Liquidated {
                return Err(StateError::Liquidated.into());
            }
            let ctx = OperationContext {
                config: &p.config,
                prices,
                days_to_settlement: p.days_to_settlement(),
                settlement_ready: p.is_settlement_ready(),
            };
            let mut drained =
                p.settlement
                    .run_settlement(step_count, p.block, &mut p.engine, &ctx, &mut p.ledger)?;
            if let Some(change) = p
                .engine
                .recompute_state(prices.reserve_price, &p.config.coverage)?
            {
                drained.push(change);
            }
            Ok(drained)
        })
    }

    /// Liquidate if coverage is breached and close up to `step_count`
    /// leveraged positions. Runs while paused.
    pub fn eval_liquidation(&mut self, step_count: usize) -> CoreResult<Vec<ProtocolEvent>> {
        let price = self.prices()?.reserve_price;
        let mut events = self.liquidation.eval_liquidation(
            step_count,
            price,
            &mut self.engine,
            &self.config,
            &mut self.ledger,
        )?;
        if !self.liquidation.is_liquidated() {
            if let Some(change) = self.engine.recompute_state(price, &self.config.coverage)? {
                events.push(change);
            }
        }
        Ok(self.record(events))
    }

    /// Exit a holder's whole Doc balance at the frozen liquidation price.
    /// Runs while paused.
    pub fn redeem_all_doc(&mut self, account: &AccountId) -> CoreResult<Vec<ProtocolEvent>> {
        let price = self.prices()?.reserve_price;
        let (mut events, pending, prior) = match self.gate(price)? {
            Gate::Halted(events) => (events, Vec::new(), self.engine.state()),
            Gate::Proceed { pending, prior } => (Vec::new(), pending, prior),
        };
        let outcome =
            self.liquidation
                .redeem_all_doc(account, &mut self.engine, &self.config, &mut self.ledger);
        events.extend(self.conclude(pending, prior, outcome)?);
        Ok(events)
    }

    pub fn transfer(
        &mut self,
        token: TokenKind,
        bucket: &BucketId,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> CoreResult<Vec<ProtocolEvent>> {
        self.engine.transfer(token, bucket, from, to, amount)?;
        Ok(self.record(vec![ProtocolEvent::TokenTransferred {
            token,
            bucket: bucket.clone(),
            from: from.clone(),
            to: to.clone(),
            amount,
        }]))
    }

    /// Stake fee token for a registered vendor.
    pub fn add_vendor_stake(&mut self, vendor: &AccountId, amount: Decimal) -> CoreResult<Vec<ProtocolEvent>> {
        self.ensure_running()?;
        let event = self
            .engine
            .add_vendor_stake(vendor, amount, &self.config, &mut self.ledger)?;
        Ok(self.record(vec![event]))
    }

    pub fn remove_vendor_stake(&mut self, vendor: &AccountId, amount: Decimal) -> CoreResult<Vec<ProtocolEvent>> {
        self.ensure_running()?;
        let event = self.engine.remove_vendor_stake(vendor, amount, &mut self.ledger)?;
        Ok(self.record(vec![event]))
    }

    /// Stop every user command except liquidation and post-liquidation exits.
    pub fn pause(&mut self) -> Vec<ProtocolEvent> {
        if self.paused {
            return Vec::new();
        }
        self.paused = true;
        warn!("system paused at block {}", self.block);
        self.record(vec![ProtocolEvent::SystemPaused])
    }

    pub fn unpause(&mut self) -> Vec<ProtocolEvent> {
        if !self.paused {
            return Vec::new();
        }
        self.paused = false;
        info!("system unpaused at block {}", self.block);
        self.record(vec![ProtocolEvent::SystemUnpaused])
    }

    pub fn stall_settlement(&mut self) -> Vec<ProtocolEvent> {
        let event = self.settlement.stall();
        self.record(vec![event])
    }

    pub fn restart_settlement(&mut self) -> Vec<ProtocolEvent> {
        let event = self.settlement.restart(self.block);
        self.record(vec![event])
    }

    /// Edit a copy of the configuration and swap it in if it validates.
    pub fn apply_config<F>(&mut self, edit: F) -> CoreResult<Vec<ProtocolEvent>>
    where
        F: FnOnce(&mut ProtocolConfig),
    {
        let mut candidate = self.config.clone();
        edit(&mut candidate);
        self.replace_config(candidate)
    }

    /// Replace the configuration as a whole.
    pub fn replace_config(&mut self, config: ProtocolConfig) -> CoreResult<Vec<ProtocolEvent>> {
        config.validate()?;
        if config.bucket_ids() != self.config.bucket_ids() {
            return Err(ConfigurationError::BucketSetChanged.into());
        }
        self.settlement.set_block_span(config.settlement.block_span);
        self.config = config;
        info!("configuration applied at block {}", self.block);
        Ok(self.record(vec![ProtocolEvent::ConfigurationApplied]))
    }

    pub fn execute(&mut self, command: Command) -> CoreResult<Vec<ProtocolEvent>> {
        debug!("executing {:?}", command);
        match command {
            Command::Mint(request) => self.mint(request),
            Command::Redeem(request) => self.redeem(request),
            Command::RedeemDocRequest { account, amount } => {
                self.redeem_doc_request(&account, amount)
            }
            Command::AlterRedeemRequestAmount {
                account,
                is_increase,
                amount,
            } => self.alter_redeem_request_amount(&account, is_increase, amount),
            Command::RunSettlement { step_count } => self.run_settlement(step_count),
            Command::EvalLiquidation { step_count } => self.eval_liquidation(step_count),
            Command::RedeemAllDoc { account } => self.redeem_all_doc(&account),
            Command::Transfer {
                token,
                bucket,
                from,
                to,
                amount,
            } => self.transfer(token, &bucket, &from, &to, amount),
            Command::AddVendorStake { vendor, amount } => self.add_vendor_stake(&vendor, amount),
            Command::RemoveVendorStake { vendor, amount } => {
                self.remove_vendor_stake(&vendor, amount)
            }
            Command::Pause => Ok(self.pause()),
            Command::Unpause => Ok(self.unpause()),
            Command::StallSettlement => Ok(self.stall_settlement()),
            Command::RestartSettlement => Ok(self.restart_settlement()),
        }
    }

    // --- Queries ---

    pub fn state(&self) -> GlobalState {
        self.engine.state()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn vendor_stake(&self, vendor: &AccountId) -> VendorStake {
        self.engine.vendor_stakes().get(vendor)
    }

    pub fn is_liquidation_reached(&self) -> CoreResult<bool> {
        let price = self.prices()?.reserve_price;
        Ok(self
            .engine
            .is_liquidation_reached(price, &self.config.coverage)?)
    }

    pub fn settlement_phase(&self) -> SettlementPhase {
        self.settlement.phase(self.block)
    }

    pub fn is_settlement_running(&self) -> bool {
        self.settlement.schedule().is_running(self.block)
    }

    pub fn is_settlement_ready(&self) -> bool {
        self.settlement.schedule().is_ready(self.block)
    }

    pub fn is_settlement_enabled(&self) -> bool {
        self.settlement.schedule().is_enabled(self.block)
    }

    pub fn next_settlement_block(&self) -> u64 {
        self.settlement.schedule().next_settlement_block()
    }

    pub fn days_to_settlement(&self) -> u64 {
        calculator::days_to_settlement(
            self.block,
            self.next_settlement_block(),
            self.config.settlement.day_block_span,
        )
    }

    /// Reserve that can currently be minted into `bucket`.
    pub fn max_issuable(&self, bucket: &BucketId) -> CoreResult<Decimal> {
        let ctx = self.context()?;
        self.engine.max_issuable(bucket, &ctx)
    }

    /// Daily rate a BProx mint of `amount` reserve into `bucket` would pay now.
    pub fn bprox_interest_rate(&self, bucket: &BucketId, amount: Decimal) -> CoreResult<Decimal> {
        let ctx = self.context()?;
        self.engine.bprox_interest_rate(bucket, amount, &ctx)
    }

    pub fn bpro_price(&self) -> CoreResult<Decimal> {
        let price = self.prices()?.reserve_price;
        Ok(self.engine.bpro_price(price)?)
    }

    pub fn bprox_price(&self, bucket: &BucketId) -> CoreResult<Decimal> {
        let price = self.prices()?.reserve_price;
        self.engine.bprox_price(bucket, price)
    }

    pub fn coverage(&self) -> CoreResult<Coverage> {
        let price = self.prices()?.reserve_price;
        Ok(self.engine.coverage(price)?)
    }

    pub fn report(&self) -> CoreResult<CoverageReport> {
        let price = self.prices()?.reserve_price;
        Ok(self.engine.report(price, &self.config.coverage)?)
    }

    pub fn bucket(&self, id: &BucketId) -> CoreResult<&Bucket> {
        Ok(self.engine.bucket(id)?)
    }

    pub fn balance_of(&self, token: TokenKind, bucket: &BucketId, account: &AccountId) -> Decimal {
        self.engine.balance_of(token, bucket, account)
    }

    pub fn doc_supply(&self) -> Decimal {
        self.engine.doc_supply()
    }

    /// Reserve held across all buckets, interest included.
    pub fn total_reserve(&self) -> Decimal {
        self.engine.buckets().total_reserve()
    }

    pub fn pending_request(&self, account: &AccountId) -> Option<&RedemptionRequest> {
        self.settlement.queue().get(account)
    }

    pub fn pending_requests(&self) -> usize {
        self.settlement.queue().len()
    }

    /// Doc exit price once liquidated.
    pub fn frozen_price(&self) -> Option<Decimal> {
        self.liquidation.frozen_price()
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Journaled events, oldest first, up to the journal limit.
    pub fn events(&self) -> &[EventRecord] {
        &self.journal
    }

    // --- Environment ---

    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn set_block(&mut self, block: u64) {
        self.block = block;
    }

    pub fn advance_blocks(&mut self, blocks: u64) {
        self.block += blocks;
    }

    pub fn price_feed(&self) -> &P {
        &self.price_feed
    }

    pub fn price_feed_mut(&mut self) -> &mut P {
        &mut self.price_feed
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    // --- Internals ---

    fn prices(&self) -> CoreResult<PriceSnapshot> {
        Ok(PriceSnapshot::read(&self.price_feed)?)
    }

    fn context(&self) -> CoreResult<OperationContext<'_>> {
        Ok(OperationContext {
            config: &self.config,
            prices: self.prices()?,
            days_to_settlement: self.days_to_settlement(),
            settlement_ready: self.is_settlement_ready(),
        })
    }

    fn ensure_running(&self) -> CoreResult<()> {
        if self.paused {
            return Err(StateError::Paused.into());
        }
        Ok(())
    }

    /// Run a user command behind the pause check and the liquidation gate.
    ///
    /// When the gate liquidates, `op` does not run and the liquidation
    /// events are returned instead.
    fn guarded<F>(&mut self, op: F) -> CoreResult<Vec<ProtocolEvent>>
    where
        F: FnOnce(&mut Self, PriceSnapshot) -> CoreResult<Vec<ProtocolEvent>>,
    {
        self.ensure_running()?;
        let prices = self.prices()?;
        let (pending, prior) = match self.gate(prices.reserve_price)? {
            Gate::Halted(events) => return Ok(events),
            Gate::Proceed { pending, prior } => (pending, prior),
        };
        let outcome = op(self, prices);
        self.conclude(pending, prior, outcome)
    }

    /// Journal the gate's events with the command's, or on failure put the
    /// global state back to what it was before the gate.
    fn conclude(
        &mut self,
        pending: Vec<ProtocolEvent>,
        prior: GlobalState,
        outcome: CoreResult<Vec<ProtocolEvent>>,
    ) -> CoreResult<Vec<ProtocolEvent>> {
        match outcome {
            Ok(produced) => {
                let mut events = pending;
                events.extend(produced);
                Ok(self.record(events))
            }
            Err(e) => {
                self.engine.restore_state(prior);
                Err(e)
            }
        }
    }

    /// Re-evaluate solvency before a command.
    ///
    /// A breach liquidates the system and halts the command; those events
    /// are journaled at once. Otherwise the state may be reclassified, and
    /// that change is held back until the command succeeds.
    fn gate(&mut self, price: Decimal) -> CoreResult<Gate> {
        let prior = self.engine.state();
        if self.liquidation.is_liquidated() {
            return Ok(Gate::Proceed {
                pending: Vec::new(),
                prior,
            });
        }
        if self
            .engine
            .is_liquidation_reached(price, &self.config.coverage)?
        {
            let events = self.liquidation.eval_liquidation(
                0,
                price,
                &mut self.engine,
                &self.config,
                &mut self.ledger,
            )?;
            return Ok(Gate::Halted(self.record(events)));
        }
        let pending = self
            .engine
            .recompute_state(price, &self.config.coverage)?
            .into_iter()
            .collect();
        Ok(Gate::Proceed { pending, prior })
    }

    fn record(&mut self, events: Vec<ProtocolEvent>) -> Vec<ProtocolEvent> {
        for event in &events {
            self.journal.push(EventRecord::new(self.block, event.clone()));
        }
        if self.journal.len() > self.journal_limit {
            let excess = self.journal.len() - self.journal_limit;
            self.journal.drain(..excess);
        }
        events
    }
}
