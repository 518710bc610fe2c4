use crate::core::account::AccountId;
use crate::core::config::ProtocolConfig;
use crate::core::error::{CoreResult, StateError};
use crate::core::event::ProtocolEvent;
use crate::core::token::BucketId;
use crate::engine::collateral::CollateralEngine;
use crate::market::ledger::AssetLedger;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Progress of the wind-down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationPhase {
    Solvent,
    /// Liquidated, leveraged positions still being closed.
    Unwinding {
        frozen_price: Decimal,
        pending: VecDeque<(BucketId, AccountId)>,
    },
    /// Liquidated and fully unwound; only Doc exits remain.
    Settled { frozen_price: Decimal },
}

/// Watches coverage and winds the system down once it is breached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationController {
    phase: LiquidationPhase,
}

impl Default for LiquidationController {
    fn default() -> Self {
        Self::new()
    }
}

impl LiquidationController {
    pub fn new() -> Self {
        Self {
            phase: LiquidationPhase::Solvent,
        }
    }

    pub fn phase(&self) -> &LiquidationPhase {
        &self.phase
    }

    pub fn is_liquidated(&self) -> bool {
        !matches!(self.phase, LiquidationPhase::Solvent)
    }

    /// The reserve price Doc holders exit at, once liquidated.
    pub fn frozen_price(&self) -> Option<Decimal> {
        match &self.phase {
            LiquidationPhase::Solvent => None,
            LiquidationPhase::Unwinding { frozen_price, .. }
            | LiquidationPhase::Settled { frozen_price } => Some(*frozen_price),
        }
    }

    /// Liquidate if coverage is breached, then close up to `step_count`
    /// leveraged positions.
    ///
    /// The transition happens once. Later calls only continue the close-out
    /// and emit nothing when there is nothing left to do.
    pub fn eval_liquidation<L: AssetLedger + ?Sized>(
        &mut self,
        step_count: usize,
        reserve_price: Decimal,
        engine: &mut CollateralEngine,
        config: &ProtocolConfig,
        ledger: &mut L,
    ) -> CoreResult<Vec<ProtocolEvent>> {
        let mut events = Vec::new();

        if self.phase == LiquidationPhase::Solvent {
            if !engine.is_liquidation_reached(reserve_price, &config.coverage)? {
                return Ok(events);
            }
            let frozen_price = engine.liquidation_price(reserve_price)?;
            let total_reserve = engine.buckets().total_reserve();
            let doc_supply = engine.doc_supply();
            let from = engine.state();
            let pending: VecDeque<_> = engine.enter_liquidation().into();

            warn!(
                "coverage breached at price {}: liquidating, Doc exits at {}",
                reserve_price, frozen_price
            );
            events.push(ProtocolEvent::StateChanged {
                from,
                to: engine.state(),
            });
            events.push(ProtocolEvent::Liquidated {
                reserve_price,
                frozen_price,
                total_reserve,
                doc_supply,
            });
            self.phase = LiquidationPhase::Unwinding {
                frozen_price,
                pending,
            };
        }

        let frozen_price = match &mut self.phase {
            LiquidationPhase::Unwinding {
                frozen_price,
                pending,
            } => {
                for _ in 0..step_count {
                    let (bucket, account) = match pending.pop_front() {
                        Some(position) => position,
                        None => break,
                    };
                    let amount = engine.close_leveraged_position(&bucket, &account)?;
                    debug!("closed {} BPROX of {} in {}", amount, account, bucket);
                    events.push(ProtocolEvent::LeveragedPositionClosed {
                        account,
                        bucket,
                        amount,
                    });
                }
                if !pending.is_empty() {
                    return Ok(events);
                }
                *frozen_price
            }
            _ => return Ok(events),
        };

        let surplus = engine.sweep_surplus(frozen_price)?;
        if surplus > Decimal::ZERO {
            ledger.credit_reserve(&config.commission_account, surplus);
            info!("swept {} reserve remainder to {}", surplus, config.commission_account);
            events.push(ProtocolEvent::RemainderSwept {
                account: config.commission_account.clone(),
                amount: surplus,
            });
        }
        self.phase = LiquidationPhase::Settled { frozen_price };
        Ok(events)
    }

    pub fn redeem_all_doc<L: AssetLedger + ?Sized>(
        &self,
        account: &AccountId,
        engine: &mut CollateralEngine,
        config: &ProtocolConfig,
        ledger: &mut L,
    ) -> CoreResult<Vec<ProtocolEvent>> {
        let frozen_price = self.frozen_price().ok_or(StateError::NotLiquidated)?;
        engine.redeem_all_doc(account, frozen_price, config, ledger)
    }
}
