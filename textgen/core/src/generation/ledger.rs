//! Token Budget Ledger
//!
//! Per-batch record of what each input has reserved against the server
//! allowance. Earlier inputs are counted first: input `i` may only be admitted
//! once `tokens_used + sum(cost[0..=i])` fits the capacity. A reservation is
//! dropped to zero once its input reaches a terminal outcome.

use parking_lot::Mutex;

/// Reservations of one batch call
#[derive(Debug)]
pub struct TokenBudgetLedger {
    costs: Mutex<Vec<u64>>,
}

impl TokenBudgetLedger {
    /// Reserve `cost` for each of `inputs` inputs
    #[must_use]
    pub fn reserve(inputs: usize, cost: u64) -> Self {
        Self {
            costs: Mutex::new(vec![cost; inputs]),
        }
    }

    /// Sum of reservations for inputs `0..=index`
    #[must_use]
    pub fn cumulative_through(&self, index: usize) -> u64 {
        let costs = self.costs.lock();
        let end = index.saturating_add(1).min(costs.len());
        costs[..end].iter().sum()
    }

    /// Release the reservation of `index`
    pub fn release(&self, index: usize) {
        if let Some(cost) = self.costs.lock().get_mut(index) {
            *cost = 0;
        }
    }

    /// Current reservation of `index`
    #[must_use]
    pub fn reserved(&self, index: usize) -> u64 {
        self.costs.lock().get(index).copied().unwrap_or(0)
    }

    /// Sum of every outstanding reservation
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.costs.lock().iter().sum()
    }
}
