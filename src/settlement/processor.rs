use crate::core::account::AccountId;
use crate::core::config::SettlementConfig;
use crate::core::error::{CoreResult, StateError, ValidationError};
use crate::core::event::{FeeAmounts, ProtocolEvent};
use crate::engine::collateral::{CollateralEngine, OperationContext};
use crate::market::ledger::AssetLedger;
use crate::settlement::queue::RedemptionQueue;
use crate::settlement::schedule::{SettlementPhase, SettlementSchedule};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Position inside the batch currently being drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct BatchCursor {
    /// Lowest sequence not yet visited.
    next: u64,
    /// Highest sequence that belongs to this batch.
    last: Option<u64>,
    processed: usize,
}

/// Owner of the redemption queue and the settlement schedule.
///
/// A settlement run drains the queue in insertion order, a bounded number
/// of requests per call. The batch is fixed when the run starts and each
/// request in it is visited exactly once, however many calls it takes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementProcessor {
    schedule: SettlementSchedule,
    queue: RedemptionQueue,
    cursor: Option<BatchCursor>,
}

impl SettlementProcessor {
    pub fn new(config: &SettlementConfig) -> Self {
        Self {
            schedule: SettlementSchedule::from_config(config),
            queue: RedemptionQueue::new(),
            cursor: None,
        }
    }

    pub fn schedule(&self) -> &SettlementSchedule {
        &self.schedule
    }

    pub fn queue(&self) -> &RedemptionQueue {
        &self.queue
    }

    pub fn phase(&self, block: u64) -> SettlementPhase {
        self.schedule.phase(block)
    }

    pub fn set_block_span(&mut self, block_span: u64) {
        self.schedule.set_block_span(block_span);
    }

    /// Queue a Doc redemption for the next settlement.
    pub fn redeem_doc_request(
        &mut self,
        account: &AccountId,
        amount: Decimal,
        block: u64,
    ) -> CoreResult<ProtocolEvent> {
        self.require_ready(block)?;
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(amount).into());
        }
        let sequence = self.queue.request(account, amount);
        debug!("{} queued a redemption of {} DOC (#{})", account, amount, sequence);
        Ok(ProtocolEvent::RedeemRequestQueued {
            account: account.clone(),
            amount,
            sequence,
        })
    }

    pub fn alter_redeem_request_amount(
        &mut self,
        account: &AccountId,
        is_increase: bool,
        delta: Decimal,
        block: u64,
    ) -> CoreResult<ProtocolEvent> {
        self.require_ready(block)?;
        if delta <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(delta).into());
        }
        let amount = self.queue.alter(account, is_increase, delta)?;
        debug!("{} altered its redemption request to {} DOC", account, amount);
        Ok(ProtocolEvent::RedeemRequestAltered {
            account: account.clone(),
            is_increase,
            delta,
            amount,
        })
    }

    /// Advance the settlement by at most `step_count` requests.
    ///
    /// Starts a batch when a settlement is due and none is running. Returns
    /// no events when there is nothing to do. Safe to call repeatedly.
    pub fn run_settlement<L: AssetLedger + ?Sized>(
        &mut self,
        step_count: usize,
        block: u64,
        engine: &mut CollateralEngine,
        ctx: &OperationContext<'_>,
        ledger: &mut L,
    ) -> CoreResult<Vec<ProtocolEvent>> {
        let mut events = Vec::new();
        if self.phase(block) == SettlementPhase::Stalled {
            debug!("settlement is stalled, nothing drained");
            return Ok(events);
        }

        let mut cursor = match self.cursor {
            Some(cursor) => cursor,
            None if self.schedule.is_due(block) => {
                self.schedule.start();
                info!(
                    "settlement started at block {} with {} requests",
                    block,
                    self.queue.len()
                );
                events.push(ProtocolEvent::SettlementStarted {
                    pending_requests: self.queue.len(),
                    reserve_price: ctx.reserve_price(),
                });
                BatchCursor {
                    next: 0,
                    last: self.queue.last_sequence(),
                    processed: 0,
                }
            }
            None => return Ok(events),
        };

        for _ in 0..step_count {
            let (sequence, account, requested) = match self.pending(&cursor) {
                Some(next) => next,
                None => break,
            };
            let processed = match engine.redeem_doc_for_settlement(&account, requested, ctx, ledger) {
                Ok(fill) => {
                    self.queue.settle(sequence, fill.retained);
                    let (commission, vendor_fee) = match &fill.event {
                        Some(e) => (e.commission, e.vendor_fee),
                        None => Default::default(),
                    };
                    ProtocolEvent::RedeemRequestProcessed {
                        account,
                        requested,
                        filled: fill.filled,
                        reserve_paid: fill.reserve_paid,
                        commission,
                        vendor_fee,
                    }
                }
                Err(e) => {
                    warn!("redemption for {} not serviced: {}", account, e);
                    ProtocolEvent::RedeemRequestProcessed {
                        account,
                        requested,
                        filled: Decimal::ZERO,
                        reserve_paid: Decimal::ZERO,
                        commission: FeeAmounts::default(),
                        vendor_fee: FeeAmounts::default(),
                    }
                }
            };
            events.push(processed);
            cursor.next = sequence + 1;
            cursor.processed += 1;
        }

        if self.pending(&cursor).is_some() {
            self.cursor = Some(cursor);
            return Ok(events);
        }

        self.cursor = None;
        self.schedule.complete(block);
        engine.reset_vendor_markups();
        info!(
            "settlement completed: {} requests processed, next at block {}",
            cursor.processed,
            self.schedule.next_settlement_block()
        );
        events.push(ProtocolEvent::SettlementCompleted {
            processed: cursor.processed,
            next_settlement_block: self.schedule.next_settlement_block(),
        });
        Ok(events)
    }

    /// Freeze settlement: nothing drains and gated operations stay blocked.
    pub fn stall(&mut self) -> ProtocolEvent {
        self.schedule.stall();
        warn!("settlement stalled");
        ProtocolEvent::SettlementStalled
    }

    /// Clear the stall, drop any batch in progress and become ready.
    pub fn restart(&mut self, block: u64) -> ProtocolEvent {
        self.cursor = None;
        self.schedule.restart(block);
        info!(
            "settlement restarted, next at block {}",
            self.schedule.next_settlement_block()
        );
        ProtocolEvent::SettlementRestarted {
            next_settlement_block: self.schedule.next_settlement_block(),
        }
    }

    fn require_ready(&self, block: u64) -> Result<(), StateError> {
        match self.phase(block) {
            SettlementPhase::Ready => Ok(()),
            _ => Err(StateError::SettlementNotReady),
        }
    }

    fn pending(&self, cursor: &BatchCursor) -> Option<(u64, AccountId, Decimal)> {
        let last = cursor.last?;
        if cursor.next > last {
            return None;
        }
        self.queue
            .first_in(cursor.next..=last)
            .map(|r| (r.sequence(), r.account().clone(), r.amount()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ProtocolConfig;
    use crate::core::error::CoreError;
    use crate::core::token::TokenKind;
    use crate::engine::collateral::ExchangeRequest;
    use crate::market::ledger::InMemoryAssetLedger;
    use crate::market::price::PriceSnapshot;
    use rust_decimal_macros::dec;

    struct Fixture {
        config: ProtocolConfig,
        engine: CollateralEngine,
        ledger: InMemoryAssetLedger,
        processor: SettlementProcessor,
        holders: Vec<AccountId>,
    }

    fn ctx(config: &ProtocolConfig) -> OperationContext<'_> {
        OperationContext {
            config,
            prices: PriceSnapshot {
                reserve_price: dec!(10000),
                fee_token_price: dec!(10000),
            },
            days_to_settlement: 0,
            settlement_ready: true,
        }
    }

    /// Five holders with 10000 DOC each, every one queued for 10 DOC.
    fn fixture() -> Fixture {
        let mut config = ProtocolConfig::default();
        config.settlement.block_span = 1;
        config.settlement.first_settlement_block = 10;
        let mut engine = CollateralEngine::new(&config);
        let mut ledger = InMemoryAssetLedger::new();
        let mut processor = SettlementProcessor::new(&config.settlement);
        let holders: Vec<AccountId> = (0..5).map(|i| AccountId::new(format!("holder-{}", i))).collect();

        for holder in &holders {
            ledger.fund_reserve(holder, dec!(10));
            let c = ctx(&config);
            engine
                .mint(&ExchangeRequest::new(TokenKind::BPro, dec!(3), holder.clone()), &c, &mut ledger)
                .unwrap();
            engine
                .mint(&ExchangeRequest::new(TokenKind::Doc, dec!(1), holder.clone()), &c, &mut ledger)
                .unwrap();
            processor.redeem_doc_request(holder, dec!(10), 0).unwrap();
        }
        Fixture {
            config,
            engine,
            ledger,
            processor,
            holders,
        }
    }

    #[test]
    fn test_run_is_noop_before_due() {
        let mut f = fixture();
        let c = ctx(&f.config);
        let events = f.processor.run_settlement(10, 5, &mut f.engine, &c, &mut f.ledger).unwrap();
        assert!(events.is_empty());
        assert_eq!(f.processor.queue().len(), 5);
    }

    #[test]
    fn test_partial_run_resumes() {
        let mut f = fixture();
        let c = ctx(&f.config);

        let events = f.processor.run_settlement(2, 10, &mut f.engine, &c, &mut f.ledger).unwrap();
        let processed = events
            .iter()
            .filter(|e| matches!(e, ProtocolEvent::RedeemRequestProcessed { .. }))
            .count();
        assert_eq!(processed, 2);
        assert!(f.processor.schedule().is_running(10));
        assert!(f.processor.schedule().is_enabled(10));
        assert_eq!(f.processor.queue().len(), 3);

        let err = f.processor.redeem_doc_request(&f.holders[0], dec!(1), 10).unwrap_err();
        assert_eq!(err, CoreError::State(StateError::SettlementNotReady));

        let events = f.processor.run_settlement(100, 10, &mut f.engine, &c, &mut f.ledger).unwrap();
        assert!(matches!(
            events.last(),
            Some(ProtocolEvent::SettlementCompleted { processed: 5, next_settlement_block: 11 })
        ));
        assert!(f.processor.queue().is_empty());
        assert!(f.processor.schedule().is_ready(10));
        for holder in &f.holders {
            assert_eq!(f.engine.balance_of(TokenKind::Doc, &crate::core::token::BucketId::c0(), holder), dec!(9990));
        }
    }

    #[test]
    fn test_stalled_run_drains_nothing() {
        let mut f = fixture();
        let c = ctx(&f.config);
        f.processor.stall();

        let events = f.processor.run_settlement(100, 10, &mut f.engine, &c, &mut f.ledger).unwrap();
        assert!(events.is_empty());
        assert_eq!(f.processor.phase(10), SettlementPhase::Stalled);
        assert_eq!(f.processor.queue().len(), 5);

        f.processor.restart(10);
        assert_eq!(f.processor.phase(10), SettlementPhase::Ready);
        assert!(f.processor.alter_redeem_request_amount(&f.holders[0], true, dec!(1), 10).is_ok());
    }
}
