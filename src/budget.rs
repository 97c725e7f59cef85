//! Per-run token budget ledger.
//!
//! One ledger is constructed per commit run and shared by reference with
//! every code path that may call the model. Estimates are reserved before a
//! call (prompt tokens plus a completion cap) and trued up afterwards.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

/// Default ceiling when the configuration store has no value.
pub const DEFAULT_TOKEN_BUDGET: usize = 250_000;

/// How a reservation treats the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationMode {
    /// Fails without side effects if the ceiling would be exceeded.
    Hard,
    /// Always succeeds; the ceiling is advisory and callers check
    /// [`BudgetLedger::is_over_budget`] afterwards.
    Soft,
}

/// Thread-safe counter of tokens spent against a ceiling.
#[derive(Debug)]
pub struct BudgetLedger {
    ceiling: AtomicUsize,
    spent: AtomicUsize,
}

impl BudgetLedger {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: AtomicUsize::new(ceiling),
            spent: AtomicUsize::new(0),
        }
    }

    /// Atomically reserve `n` tokens if `spent + n <= ceiling`.
    ///
    /// On failure the ledger is left untouched.
    pub fn try_reserve_hard(&self, n: usize) -> bool {
        let ceiling = self.ceiling();
        let reserved = self
            .spent
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |spent| {
                spent.checked_add(n).filter(|total| *total <= ceiling)
            })
            .is_ok();
        if !reserved {
            debug!("Hard reservation of {n} tokens refused ({}/{ceiling})", self.spent());
        }
        reserved
    }

    /// Reserve `n` tokens regardless of the ceiling.
    pub fn reserve_soft(&self, n: usize) {
        self.spent.fetch_add(n, Ordering::AcqRel);
    }

    /// Reserve with the given mode; soft reservations always succeed.
    pub fn reserve(&self, n: usize, mode: ReservationMode) -> bool {
        match mode {
            ReservationMode::Hard => self.try_reserve_hard(n),
            ReservationMode::Soft => {
                self.reserve_soft(n);
                true
            }
        }
    }

    /// Return `n` tokens to the pool, never going below zero.
    pub fn refund(&self, n: usize) {
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .spent
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |spent| {
                Some(spent.saturating_sub(n))
            });
    }

    /// True-up a reservation once the actual cost is known.
    pub fn settle(&self, reserved: usize, actual: usize) {
        if actual < reserved {
            self.refund(reserved - actual);
        }
    }

    pub fn is_over_budget(&self) -> bool {
        self.spent() > self.ceiling()
    }

    pub fn spent(&self) -> usize {
        self.spent.load(Ordering::Acquire)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::Acquire)
    }

    /// Tokens left before the ceiling, zero once it is reached or passed.
    pub fn remaining(&self) -> usize {
        self.ceiling().saturating_sub(self.spent())
    }

    /// Start a new run: zero the spend and pick up the configured ceiling.
    pub fn reset(&self, ceiling: usize) {
        self.ceiling.store(ceiling, Ordering::Release);
        self.spent.store(0, Ordering::Release);
    }
}

impl Default for BudgetLedger {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_BUDGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn hard_reservation_within_ceiling_succeeds() {
        let ledger = BudgetLedger::new(100);
        assert!(ledger.try_reserve_hard(60));
        assert!(ledger.try_reserve_hard(40));
        assert_eq!(ledger.spent(), 100);
        assert!(!ledger.is_over_budget());
    }

    #[test]
    fn hard_reservation_over_ceiling_leaves_state_unchanged() {
        let ledger = BudgetLedger::new(100);
        assert!(ledger.try_reserve_hard(70));
        assert!(!ledger.try_reserve_hard(31));
        assert_eq!(ledger.spent(), 70);
    }

    #[test]
    fn hard_reservation_never_overflows() {
        let ledger = BudgetLedger::new(usize::MAX);
        assert!(ledger.try_reserve_hard(10));
        assert!(!ledger.try_reserve_hard(usize::MAX));
        assert_eq!(ledger.spent(), 10);
    }

    #[test]
    fn soft_reservation_may_exceed_ceiling() {
        let ledger = BudgetLedger::new(10);
        ledger.reserve_soft(25);
        assert_eq!(ledger.spent(), 25);
        assert!(ledger.is_over_budget());
        assert_eq!(ledger.remaining(), 0);
    }

    #[test]
    fn refund_is_floored_at_zero() {
        let ledger = BudgetLedger::new(100);
        ledger.reserve_soft(5);
        ledger.refund(1_000);
        assert_eq!(ledger.spent(), 0);
        ledger.refund(usize::MAX);
        assert_eq!(ledger.spent(), 0);
    }

    #[test]
    fn settle_refunds_only_overestimates() {
        let ledger = BudgetLedger::new(1_000);
        assert!(ledger.try_reserve_hard(300));
        ledger.settle(300, 120);
        assert_eq!(ledger.spent(), 120);
        ledger.settle(100, 150);
        assert_eq!(ledger.spent(), 120);
    }

    #[test]
    fn reset_zeroes_spend_and_updates_ceiling() {
        let ledger = BudgetLedger::new(10);
        ledger.reserve_soft(50);
        ledger.reset(500);
        assert_eq!(ledger.spent(), 0);
        assert_eq!(ledger.ceiling(), 500);
    }

    #[test]
    fn reserve_dispatches_on_mode() {
        let ledger = BudgetLedger::new(10);
        assert!(!ledger.reserve(11, ReservationMode::Hard));
        assert!(ledger.reserve(11, ReservationMode::Soft));
        assert_eq!(ledger.spent(), 11);
    }

    #[test]
    fn concurrent_hard_reservations_never_exceed_ceiling() {
        let ledger = Arc::new(BudgetLedger::new(1_000));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    let mut granted = 0;
                    for _ in 0..100 {
                        if ledger.try_reserve_hard(7) {
                            granted += 1;
                        }
                        assert!(ledger.spent() <= ledger.ceiling());
                    }
                    granted
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 1_000 / 7);
        assert_eq!(ledger.spent(), granted * 7);
    }
}
