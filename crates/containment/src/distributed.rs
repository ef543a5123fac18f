//! Budget backends for cross-process cost coordination
//!
//! The default backend is in-process. The shared-store variant keeps a
//! counter keyed by chain id in a remote KV store with a TTL; on any store
//! error it falls back to the local counter and records that it is in
//! fallback mode.

use std::time::Duration;

use parking_lot::Mutex;

use crate::types::{ContainmentError, ContainmentResult};

const KEY_PREFIX: &str = "veronica:budget:";

/// Cross-process budget counter contract.
pub trait BudgetBackend: Send + Sync {
    /// Atomically add `amount` and return the new total. Negative amounts
    /// are caller bugs.
    fn add(&self, amount: f64) -> ContainmentResult<f64>;

    /// Current total.
    fn get(&self) -> f64;

    /// Zero the counter.
    fn reset(&self);

    /// Release any held connections.
    fn close(&self) {}
}

fn reject_negative(amount: f64) -> ContainmentResult<()> {
    if amount < 0.0 {
        return Err(ContainmentError::InvalidArgument(format!(
            "budget add must be non-negative, got {}",
            amount
        )));
    }
    Ok(())
}

/// In-process budget backend. Thread-safe; the default.
#[derive(Default)]
pub struct LocalBudgetBackend {
    total: Mutex<f64>,
}

impl LocalBudgetBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BudgetBackend for LocalBudgetBackend {
    fn add(&self, amount: f64) -> ContainmentResult<f64> {
        reject_negative(amount)?;
        let mut total = self.total.lock();
        *total += amount;
        Ok(*total)
    }

    fn get(&self) -> f64 {
        *self.total.lock()
    }

    fn reset(&self) {
        *self.total.lock() = 0.0;
    }
}

/// Contract a remote KV store must provide: atomic float increments with
/// expiry, reads, and deletes.
pub trait SharedCounterStore: Send + Sync {
    fn incr_by(&self, key: &str, amount: f64, ttl: Duration) -> Result<f64, String>;
    fn get(&self, key: &str) -> Result<Option<f64>, String>;
    fn delete(&self, key: &str) -> Result<(), String>;
}

/// Shared-store budget backend keyed by chain id.
///
/// Any store error switches the backend into local fallback mode; the
/// switch is sticky and observable via `is_using_fallback`.
pub struct SharedStoreBudgetBackend<S: SharedCounterStore> {
    store: S,
    key: String,
    ttl: Duration,
    fallback: LocalBudgetBackend,
    using_fallback: Mutex<bool>,
}

impl<S: SharedCounterStore> SharedStoreBudgetBackend<S> {
    pub fn new(store: S, chain_id: &str, ttl: Duration) -> Self {
        Self {
            store,
            key: format!("{}{}", KEY_PREFIX, chain_id),
            ttl,
            fallback: LocalBudgetBackend::new(),
            using_fallback: Mutex::new(false),
        }
    }

    pub fn is_using_fallback(&self) -> bool {
        *self.using_fallback.lock()
    }

    fn enter_fallback(&self, operation: &str, error: &str) {
        tracing::error!(operation, error, "shared budget store failed; using local fallback");
        *self.using_fallback.lock() = true;
    }
}

impl<S: SharedCounterStore> BudgetBackend for SharedStoreBudgetBackend<S> {
    fn add(&self, amount: f64) -> ContainmentResult<f64> {
        reject_negative(amount)?;
        if self.is_using_fallback() {
            return self.fallback.add(amount);
        }
        match self.store.incr_by(&self.key, amount, self.ttl) {
            Ok(total) => Ok(total),
            Err(e) => {
                self.enter_fallback("add", &e);
                self.fallback.add(amount)
            }
        }
    }

    fn get(&self) -> f64 {
        if self.is_using_fallback() {
            return self.fallback.get();
        }
        match self.store.get(&self.key) {
            Ok(total) => total.unwrap_or(0.0),
            Err(e) => {
                self.enter_fallback("get", &e);
                self.fallback.get()
            }
        }
    }

    fn reset(&self) {
        if self.is_using_fallback() {
            self.fallback.reset();
            return;
        }
        if let Err(e) = self.store.delete(&self.key) {
            self.enter_fallback("reset", &e);
            self.fallback.reset();
        }
    }
}
