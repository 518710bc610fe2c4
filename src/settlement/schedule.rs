use crate::core::config::SettlementConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the settlement cycle.
///
/// Never stored: always derived from the schedule and the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementPhase {
    /// A settlement is due and has not started yet.
    NotReady,
    /// Idle, the next settlement is in the future.
    Ready,
    /// A batch is in progress.
    Running,
    /// Frozen by an administrator.
    Stalled,
}

impl fmt::Display for SettlementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Timing of settlement batches.
///
/// # Examples
///
/// ```
/// use collateral_engine::settlement::schedule::{SettlementPhase, SettlementSchedule};
///
/// let mut schedule = SettlementSchedule::new(100, 100);
/// assert_eq!(schedule.phase(50), SettlementPhase::Ready);
/// assert_eq!(schedule.phase(100), SettlementPhase::NotReady);
///
/// // Fell behind by more than one span: skip to the next boundary.
/// schedule.advance_past(345);
/// assert_eq!(schedule.next_settlement_block(), 400);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSchedule {
    block_span: u64,
    next_settlement_block: u64,
    running: bool,
    stalled: bool,
}

impl SettlementSchedule {
    pub fn new(block_span: u64, first_settlement_block: u64) -> Self {
        Self {
            block_span: block_span.max(1),
            next_settlement_block: first_settlement_block,
            running: false,
            stalled: false,
        }
    }

    pub fn from_config(config: &SettlementConfig) -> Self {
        Self::new(config.block_span, config.first_settlement_block)
    }

    pub fn block_span(&self) -> u64 {
        self.block_span
    }

    pub fn set_block_span(&mut self, block_span: u64) {
        self.block_span = block_span.max(1);
    }

    pub fn next_settlement_block(&self) -> u64 {
        self.next_settlement_block
    }

    pub fn is_due(&self, block: u64) -> bool {
        block >= self.next_settlement_block
    }

    pub fn phase(&self, block: u64) -> SettlementPhase {
        if self.stalled {
            SettlementPhase::Stalled
        } else if self.running {
            SettlementPhase::Running
        } else if self.is_due(block) {
            SettlementPhase::NotReady
        } else {
            SettlementPhase::Ready
        }
    }

    pub fn is_running(&self, block: u64) -> bool {
        self.phase(block) == SettlementPhase::Running
    }

    pub fn is_ready(&self, block: u64) -> bool {
        self.phase(block) == SettlementPhase::Ready
    }

    /// Whether a `run` call would make progress.
    pub fn is_enabled(&self, block: u64) -> bool {
        !self.stalled && (self.running || self.is_due(block))
    }

    pub(crate) fn start(&mut self) {
        self.running = true;
    }

    /// Leave the running state and move to the next boundary after `block`.
    pub(crate) fn complete(&mut self, block: u64) {
        self.running = false;
        self.advance_past(block);
    }

    /// Move `next_settlement_block` to the first span boundary strictly after `block`.
    pub fn advance_past(&mut self, block: u64) {
        if block < self.next_settlement_block {
            return;
        }
        let spans = (block - self.next_settlement_block) / self.block_span + 1;
        self.next_settlement_block += spans * self.block_span;
    }

    pub(crate) fn stall(&mut self) {
        self.stalled = true;
    }

    pub(crate) fn restart(&mut self, block: u64) {
        self.stalled = false;
        self.running = false;
        self.advance_past(block);
    }
}
